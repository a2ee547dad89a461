// GEP Publisher - Per-client subscription pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Temporal (historical replay) session hooks

/// Replay window requested by a client
///
/// Times are kept as the client sent them (absolute or relative
/// expressions such as `*-5M`); interpreting them is up to the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TemporalConstraint {
    /// Replay start
    pub start_time: Option<String>,
    /// Replay stop
    pub stop_time: Option<String>,
}

impl TemporalConstraint {
    /// Check if the client asked for historical data
    pub fn is_defined(&self) -> bool {
        self.start_time.is_some() || self.stop_time.is_some()
    }
}

/// Historical replay session attached to a subscription
pub trait TemporalSession: Send + Sync {
    /// Human-readable status
    fn status(&self) -> String;

    /// Change the replay processing interval (milliseconds, -1 for default)
    fn set_processing_interval(&self, interval: i32);

    /// Release the session
    fn dispose(&self);
}
