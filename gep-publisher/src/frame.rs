// GEP Publisher - Per-client subscription pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Time-aligned frames
//!
//! A [`Frame`] is one timestamp plus the measurements a [`Concentrator`]
//! aligned to it. The concentrator is external: subscriptions feed it raw
//! measurements and it calls back with frames in time order.

use gep::{MeasurementRecord, Ticks};

/// One time-aligned group of measurements
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    /// Shared timestamp
    pub timestamp: Ticks,
    /// Measurements in publish order
    pub measurements: Vec<MeasurementRecord>,
}

impl Frame {
    /// Create a new empty frame
    pub fn new(timestamp: Ticks) -> Self {
        Self {
            timestamp,
            measurements: Vec::new(),
        }
    }

    /// Create a frame holding `measurements`
    pub fn with_measurements(timestamp: Ticks, measurements: Vec<MeasurementRecord>) -> Self {
        Self {
            timestamp,
            measurements,
        }
    }

    /// Add a measurement to the frame
    pub fn push(&mut self, measurement: MeasurementRecord) {
        self.measurements.push(measurement);
    }

    /// Get the number of measurements in the frame
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Check if the frame is empty
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}

/// Time-alignment engine fed by a subscription
///
/// Implementations buffer measurements and invoke
/// [`ClientSubscription::publish_frame`](crate::ClientSubscription::publish_frame)
/// once per frame, sequentially and in frame order.
pub trait Concentrator: Send + Sync {
    /// Accept measurements for alignment
    fn sort_measurements(&self, measurements: Vec<MeasurementRecord>);
}
