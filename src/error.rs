// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for GEP
//!
//! This module defines all error types used by the wire-level transport.
//! Codec failures are never papered over with default values: every
//! error here is meant to abort the record or packet being processed.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for GEP operations
pub type Result<T> = std::result::Result<T, GepError>;

/// Main error type for GEP operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GepError {
    /// Encoding error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Signal index cache error
    #[error("Signal index cache error: {0}")]
    Cache(#[from] CacheError),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors during encoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Signal is not present in the active signal index cache
    #[error("Unknown signal: {signal_id} has no runtime ID in the active cache")]
    UnknownSignal { signal_id: Uuid },

    /// Output range lies outside the destination buffer
    #[error("Argument out of range: {length} bytes at offset {start} exceed buffer of {buffer_len}")]
    ArgumentRange {
        start: usize,
        length: usize,
        buffer_len: usize,
    },

    /// Length field cannot be represented on the wire
    #[error("Field too long: {size} exceeds maximum {max}")]
    FieldTooLong { size: usize, max: usize },
}

/// Errors during decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Buffer too short
    #[error("Buffer too short: need at least {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Runtime ID is not present in the active signal index cache
    #[error("Unknown signal ID: runtime ID {runtime_id} not present in the active cache")]
    UnknownSignalId { runtime_id: u16 },

    /// Input range lies outside the source buffer
    #[error("Argument out of range: {length} bytes at offset {start} exceed buffer of {buffer_len}")]
    ArgumentRange {
        start: usize,
        length: usize,
        buffer_len: usize,
    },

    /// Offset-encoded time arrived while the referenced base time is unset
    #[error("Base time offset {time_index} is not available")]
    BaseTimeUnavailable { time_index: usize },

    /// Malformed message
    #[error("Malformed message at offset {offset}: {reason}")]
    MalformedMessage { offset: usize, reason: String },

    /// Unknown server response code
    #[error("Unknown server response: 0x{0:02x}")]
    UnknownResponse(u8),

    /// Unknown server command code
    #[error("Unknown server command: 0x{0:02x}")]
    UnknownCommand(u8),

    /// Packet uses a payload feature this core does not implement
    #[error("Unsupported packet flags: 0x{0:02x}")]
    UnsupportedPacket(u8),
}

/// Errors related to the signal index cache
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    /// More authorized signals than runtime IDs
    #[error("Too many signals: {count} authorized, runtime IDs support {max}")]
    TooManySignals { count: usize, max: usize },
}
