// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metrics collection for the measurement transport
//!
//! This module provides statistics about packet fill, measurement
//! throughput and the distribution of compact time encodings.

use crate::compact::TimeEncodingKind;
use std::collections::HashMap;

/// Transport statistics collector
#[derive(Debug, Clone, Default)]
pub struct TransportMetrics {
    /// Frames handed to the publish path
    pub frames_published: u64,
    /// Frames abandoned after a codec error
    pub failed_frames: u64,
    /// Data packets sent
    pub packets_sent: u64,
    /// Measurements sent
    pub measurements_sent: u64,
    /// Packet bytes sent, headers included
    pub bytes_sent: u64,
    /// Measurements discarded by the input filter
    pub measurements_filtered: u64,
    /// Compact time field distribution
    pub time_encoding_distribution: HashMap<TimeEncodingKind, u64>,
    /// Sum of packet sizes relative to the maximum packet size
    fill_ratio_sum: f64,
}

impl TransportMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sent packet
    pub fn record_packet(&mut self, packet_size: usize, measurement_count: u32, max_packet_size: usize) {
        self.packets_sent += 1;
        self.bytes_sent += packet_size as u64;
        self.measurements_sent += u64::from(measurement_count);
        if max_packet_size > 0 {
            self.fill_ratio_sum += packet_size as f64 / max_packet_size as f64;
        }
    }

    /// Record the time field chosen for a compact measurement
    pub fn record_time_encoding(&mut self, kind: TimeEncodingKind) {
        *self.time_encoding_distribution.entry(kind).or_insert(0) += 1;
    }

    /// Record a published frame
    pub fn record_frame(&mut self, succeeded: bool) {
        self.frames_published += 1;
        if !succeeded {
            self.failed_frames += 1;
        }
    }

    /// Record measurements dropped by filtering
    pub fn record_filtered(&mut self, count: usize) {
        self.measurements_filtered += count as u64;
    }

    /// Average packet size in bytes
    pub fn average_packet_size(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.bytes_sent as f64 / self.packets_sent as f64
    }

    /// Average measurements per packet
    pub fn average_measurements_per_packet(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.measurements_sent as f64 / self.packets_sent as f64
    }

    /// Average packet fill (0.0 - 1.0)
    pub fn average_fill_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.fill_ratio_sum / self.packets_sent as f64
    }

    /// Fraction of frames that failed
    pub fn failure_rate(&self) -> f64 {
        if self.frames_published == 0 {
            return 0.0;
        }
        self.failed_frames as f64 / self.frames_published as f64
    }

    /// Reset all metrics
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Generate a summary report
    pub fn summary(&self) -> String {
        format!(
            "Frames: {} ({} failed)\n\
             Packets: {} ({:.1} bytes avg, {:.1}% fill)\n\
             Measurements: {} sent, {} filtered ({:.1} per packet)",
            self.frames_published,
            self.failed_frames,
            self.packets_sent,
            self.average_packet_size(),
            self.average_fill_ratio() * 100.0,
            self.measurements_sent,
            self.measurements_filtered,
            self.average_measurements_per_packet(),
        )
    }
}
