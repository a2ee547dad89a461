// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Measurement data model
//!
//! This module defines the value types moving through the transport:
//! - Tick timestamps (100 ns resolution)
//! - Measurement keys (signal identity)
//! - Measurement records (one scalar sample)

use crate::state_flags::MeasurementStateFlags;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Timestamp as 100-nanosecond ticks since 0001-01-01T00:00:00Z
pub type Ticks = i64;

/// Ticks per millisecond
pub const TICKS_PER_MILLISECOND: i64 = 10_000;

/// Ticks per second
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Tick value of the Unix epoch (1970-01-01T00:00:00Z)
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Current UTC time in ticks
pub fn utc_now() -> Ticks {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => UNIX_EPOCH_TICKS + (elapsed.as_nanos() / 100) as i64,
        Err(before) => UNIX_EPOCH_TICKS - (before.duration().as_nanos() / 100) as i64,
    }
}

/// Convert ticks to a UTC date/time
///
/// Returns `None` when the tick value lies outside chrono's range.
#[cfg(feature = "timestamps")]
pub fn ticks_to_datetime(ticks: Ticks) -> Option<chrono::DateTime<chrono::Utc>> {
    let unix_ticks = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let secs = unix_ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    chrono::DateTime::from_timestamp(secs, nanos)
}

/// Convert a UTC date/time to ticks
#[cfg(feature = "timestamps")]
pub fn datetime_to_ticks(time: &chrono::DateTime<chrono::Utc>) -> Ticks {
    UNIX_EPOCH_TICKS
        + time.timestamp() * TICKS_PER_SECOND
        + i64::from(time.timestamp_subsec_nanos() / 100)
}

/// Identity of one measurement signal
///
/// The signal ID is the global identity; `source` and `id` form the
/// human-readable point tag (`SOURCE:ID`) carried alongside it in the
/// signal index cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeasurementKey {
    /// Globally unique signal identity
    pub signal_id: Uuid,
    /// Source (historian / device acronym)
    pub source: Arc<str>,
    /// Point ID within the source
    pub id: u32,
}

impl MeasurementKey {
    /// Source name used by the undefined key
    pub const UNDEFINED_SOURCE: &'static str = "__";

    /// Create a new key
    pub fn new(signal_id: Uuid, source: impl Into<Arc<str>>, id: u32) -> Self {
        Self {
            signal_id,
            source: source.into(),
            id,
        }
    }

    /// The undefined key
    ///
    /// A filter holding only this key detaches a subscription from all
    /// signals without rebuilding its cache.
    pub fn undefined() -> Self {
        Self::new(Uuid::nil(), Self::UNDEFINED_SOURCE, u32::MAX)
    }

    /// Check if this is the undefined key
    pub fn is_undefined(&self) -> bool {
        self.signal_id.is_nil() && self.id == u32::MAX
    }
}

impl fmt::Display for MeasurementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// One scalar telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    /// Signal identity
    pub key: MeasurementKey,
    /// Raw value
    pub value: f64,
    /// Additive scaling coefficient
    pub adder: f64,
    /// Multiplicative scaling coefficient
    pub multiplier: f64,
    /// Sample time in ticks
    pub timestamp: Ticks,
    /// Fine-grained quality and state flags
    pub state_flags: MeasurementStateFlags,
}

impl MeasurementRecord {
    /// Create a new record with unit scaling and normal state
    pub fn new(key: MeasurementKey, value: f64, timestamp: Ticks) -> Self {
        Self {
            key,
            value,
            adder: 0.0,
            multiplier: 1.0,
            timestamp,
            state_flags: MeasurementStateFlags::NORMAL,
        }
    }

    /// Set the state flags
    pub fn with_state_flags(mut self, state_flags: MeasurementStateFlags) -> Self {
        self.state_flags = state_flags;
        self
    }

    /// Set the linear scaling coefficients
    pub fn with_scaling(mut self, adder: f64, multiplier: f64) -> Self {
        self.adder = adder;
        self.multiplier = multiplier;
        self
    }

    /// Globally unique signal identity
    pub fn signal_id(&self) -> Uuid {
        self.key.signal_id
    }

    /// Value with scaling applied (`value * multiplier + adder`)
    pub fn adjusted_value(&self) -> f64 {
        self.value * self.multiplier + self.adder
    }
}
