// GEP Publisher - Per-client subscription pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for GEP Publisher

use crate::subscription::SubscriptionState;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for publisher operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublisherError {
    /// Wire codec error
    #[error("Codec error: {0}")]
    Codec(#[from] gep::GepError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not allowed in the current state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SubscriptionState,
    },

    /// Subscription was disposed
    #[error("Subscription disposed")]
    Disposed,

    /// One measurement does not fit an empty packet
    #[error("Measurement too large: {size} bytes (max: {max})")]
    MeasurementTooLarge { size: usize, max: usize },

    /// Client is not connected
    #[error("Client not found: {0}")]
    ClientNotFound(Uuid),

    /// Publisher has no temporal (historical replay) support
    #[error("Temporal sessions are not supported by this publisher")]
    TemporalUnsupported,
}

/// Result type alias for publisher operations
pub type Result<T> = std::result::Result<T, PublisherError>;
