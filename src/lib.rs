// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # GEP - Gateway Exchange Protocol
//!
//! Wire-level transport for streaming time-series measurements (such as
//! synchrophasor data) from a publisher to many subscribers.
//!
//! ## Key Features
//!
//! - **Compact Measurements**: 7-15 bytes per sample, identity compressed
//!   to a 16-bit runtime ID
//! - **Base Time Offsets**: Timestamps as 2 or 4 byte deltas from a
//!   rotating pair of base times
//! - **Copy-on-Write Signal Index**: Rebuilds never tear concurrent encodes
//! - **Size-Bounded Packets**: Frames split across packets of a fixed budget
//!
//! ## Quick Start
//!
//! ```rust
//! use gep::{
//!     CompactCodec, CompactConfig, MeasurementCodec, MeasurementKey, MeasurementRecord,
//!     SignalIndexCache,
//! };
//! use uuid::Uuid;
//!
//! let key = MeasurementKey::new(Uuid::new_v4(), "PPA", 1);
//! let cache = SignalIndexCache::build(Uuid::new_v4(), &[key.clone()], |_| true).unwrap();
//!
//! let codec = CompactCodec::new(CompactConfig::with_base_time_offsets([1000, 0], 0, true));
//! let record = MeasurementRecord::new(key, 59.98, 1000 + 50_000);
//!
//! let mut buf = Vec::new();
//! let written = codec.encode(&record, &cache, &mut buf).unwrap();
//! assert_eq!(written, 9);
//!
//! let (decoded, _) = codec.decode(&buf, &cache).unwrap();
//! assert_eq!(decoded.timestamp, record.timestamp);
//! ```
//!
//! ## Modules
//!
//! - [`measurement`]: Measurement records, keys and tick timestamps
//! - [`state_flags`]: Full and compact quality flags
//! - [`signal_index`]: Per-client runtime ID cache
//! - [`compact`]: Compact measurement codec
//! - [`verbose`]: Self-describing measurement codec
//! - [`packet`]: Data packet assembly and parsing
//! - [`protocol`]: Server responses, framing and base times
//! - [`metrics`]: Transport statistics

// Modules
pub mod compact;
pub mod error;
pub mod format;
pub mod measurement;
pub mod metrics;
pub mod packet;
pub mod protocol;
pub mod signal_index;
pub mod state_flags;
pub mod text;
pub mod verbose;
pub mod wire;

// Re-exports for convenience
pub use compact::{CompactCodec, CompactConfig, CompactMeasurement, TimeEncoding, TimeEncodingKind};
pub use error::{CacheError, DecodeError, EncodeError, GepError, Result};
pub use format::{MeasurementCodec, MeasurementFormat, PreparedMeasurement};
pub use measurement::{MeasurementKey, MeasurementRecord, Ticks, TICKS_PER_MILLISECOND, TICKS_PER_SECOND};
pub use metrics::TransportMetrics;
pub use packet::{DataPacket, DataPacketFlags, PacketBuilder, SYNCHRONIZED_HEADER_SIZE};
pub use protocol::{BaseTimeOffsets, ResponseHeader, ServerCommand, ServerResponse, MAX_PACKET_SIZE};
pub use signal_index::{SharedSignalIndexCache, SignalIndexCache};
pub use state_flags::{CompactStateFlags, MeasurementStateFlags};
pub use text::TextEncoding;
pub use verbose::VerboseCodec;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
