// GEP Publisher - Per-client subscription pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # GEP Publisher - Per-client subscription pipeline
//!
//! This crate turns the raw measurement stream of a data publisher into
//! the data packets each connected client receives.
//!
//! ## Overview
//!
//! Every client gets a [`ClientSubscription`]. Incoming measurements are
//! filtered down to what the client asked for and handed to an external
//! [`Concentrator`]. Each frame the concentrator produces comes back to the
//! subscription and is packed into size-bounded data packets.
//!
//! A client that subscribes with `synchronized=false` skips the
//! concentrator: each queued batch is packed straight away with a time per
//! measurement, optionally as offsets from rotating base times.
//!
//! ## Features
//!
//! - **Input filtering**: Filter expressions resolved to explicit keys
//! - **Signal index cache**: Per-client 16-bit runtime IDs, swapped atomically
//! - **Packet packing**: Frames split at the negotiated packet size
//! - **Compact or verbose**: Per-client measurement form
//! - **Unsynchronized mode**: Per-measurement times with base time offsets
//!
//! ## Quick Start
//!
//! ```rust
//! use gep::{MeasurementKey, MeasurementRecord};
//! use gep_publisher::{
//!     ClientSubscription, Concentrator, Frame, MemoryPublisher, SubscriptionConfig,
//! };
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! struct Discard;
//!
//! impl Concentrator for Discard {
//!     fn sort_measurements(&self, _measurements: Vec<MeasurementRecord>) {}
//! }
//!
//! let publisher = Arc::new(MemoryPublisher::new());
//! let subscription = ClientSubscription::new(
//!     Uuid::new_v4(),
//!     Uuid::new_v4(),
//!     publisher.clone(),
//!     Arc::new(Discard),
//!     SubscriptionConfig::default(),
//! ).unwrap();
//!
//! // Subscribe to one signal
//! let key = MeasurementKey::new(Uuid::new_v4(), "PPA", 1);
//! subscription.initialize("").unwrap();
//! subscription.set_input_keys(Some(vec![key.clone()])).unwrap();
//! subscription.start().unwrap();
//!
//! // The concentrator calls back once per frame
//! let frame = Frame::with_measurements(0, vec![MeasurementRecord::new(key, 59.98, 0)]);
//! let packets = subscription.publish_frame(&frame, 0).unwrap();
//! assert_eq!(packets, 1);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Publisher                                                  │
//! │  ┌────────────────────────────────────────────────────────┐│
//! │  │  ClientSubscription                                    ││
//! │  │                                                        ││
//! │  │  queue_measurements ─▶ [NaN + key filter]              ││
//! │  │                              │                         ││
//! │  │                              ▼                         ││
//! │  │                        ┌────────────┐                  ││
//! │  │                        │Concentrator│                  ││
//! │  │                        └─────┬──────┘                  ││
//! │  │                              ▼                         ││
//! │  │  publish_frame ─▶ [PacketBuilder] ─▶ send(DataPacket)  ││
//! │  │                         ▲                              ││
//! │  │               SignalIndexCache snapshot                ││
//! │  └────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod filter;
mod frame;
mod publisher;
mod subscription;
mod temporal;

// Public API
pub use config::{parse_key_value_pairs, SubscriptionConfig, SubscriptionSettings};
pub use error::{PublisherError, Result};
pub use filter::{signal_id_expression, FilterResolver, MetadataResolver};
pub use frame::{Concentrator, Frame};
pub use publisher::{MemoryPublisher, Publisher, SentResponse};
pub use subscription::{ClientSubscription, PublishMode, SubscriptionState};
pub use temporal::{TemporalConstraint, TemporalSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
