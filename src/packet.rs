// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Data packet envelope
//!
//! This module handles:
//! - Packet flags
//! - Size-bounded packet assembly ([`PacketBuilder`])
//! - Packet parsing on the subscriber side ([`DataPacket`])
//!
//! # Packet Format
//!
//! ```text
//! [flags: 1] [timestamp: 8, synchronized only] [count: 4] [measurement...]
//! ```

use crate::compact::{CompactCodec, CompactConfig};
use crate::error::{DecodeError, Result};
use crate::format::{MeasurementCodec, PreparedMeasurement};
use crate::measurement::{MeasurementRecord, Ticks};
use crate::signal_index::SignalIndexCache;
use crate::text::TextEncoding;
use crate::verbose::VerboseCodec;
use crate::wire::WireReader;
use std::ops::BitOr;

/// Header size of a synchronized packet (flags + timestamp + count)
pub const SYNCHRONIZED_HEADER_SIZE: usize = 13;

/// Header size of an unsynchronized packet (flags + count)
pub const UNSYNCHRONIZED_HEADER_SIZE: usize = 5;

/// Data packet flag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DataPacketFlags(pub u8);

impl DataPacketFlags {
    pub const NONE: Self = Self(0x00);
    /// One shared frame timestamp follows the flags
    pub const SYNCHRONIZED: Self = Self(0x01);
    /// Measurements use the compact form
    pub const COMPACT: Self = Self(0x02);
    /// Payload encrypted with the odd cipher key
    pub const CIPHER_INDEX: Self = Self(0x04);
    /// Payload compressed
    pub const COMPRESSED: Self = Self(0x08);
    /// Compressed payload is little-endian
    pub const LITTLE_ENDIAN_COMPRESSION: Self = Self(0x10);

    /// Raw bits
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Check if all bits of `other` are set
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Size of the header for these flags
    pub fn header_size(&self) -> usize {
        if self.contains(Self::SYNCHRONIZED) {
            SYNCHRONIZED_HEADER_SIZE
        } else {
            UNSYNCHRONIZED_HEADER_SIZE
        }
    }
}

impl BitOr for DataPacketFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Builder for size-bounded data packets
///
/// Measurements are appended until the next one would push the packet
/// past `max_size`; the caller then takes the packet and keeps going.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    flags: DataPacketFlags,
    timestamp: Ticks,
    max_size: usize,
    body: Vec<u8>,
    count: u32,
}

impl PacketBuilder {
    /// Create a builder for synchronized packets sharing `timestamp`
    pub fn synchronized(flags: DataPacketFlags, timestamp: Ticks, max_size: usize) -> Self {
        Self::new(flags | DataPacketFlags::SYNCHRONIZED, timestamp, max_size)
    }

    /// Create a builder with explicit flags
    pub fn new(flags: DataPacketFlags, timestamp: Ticks, max_size: usize) -> Self {
        Self {
            flags,
            timestamp,
            max_size,
            body: Vec::new(),
            count: 0,
        }
    }

    /// Packet flags
    pub fn flags(&self) -> DataPacketFlags {
        self.flags
    }

    /// Header size in bytes
    pub fn header_size(&self) -> usize {
        self.flags.header_size()
    }

    /// Current packet size in bytes, header included
    pub fn current_size(&self) -> usize {
        self.header_size() + self.body.len()
    }

    /// Get the remaining space in bytes
    pub fn remaining(&self) -> usize {
        self.max_size.saturating_sub(self.current_size())
    }

    /// Number of measurements in the packet
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Check if the packet holds no measurements
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Check if `length` more bytes fit
    pub fn fits(&self, length: usize) -> bool {
        self.current_size() + length <= self.max_size
    }

    /// Check if `length` bytes fit in an otherwise empty packet
    pub fn fits_empty(&self, length: usize) -> bool {
        self.header_size() + length <= self.max_size
    }

    /// Try to add a measurement, returns false if the packet would exceed max size
    pub fn try_add(&mut self, measurement: &PreparedMeasurement) -> bool {
        if !self.fits(measurement.binary_length()) {
            return false;
        }

        measurement.write_to(&mut self.body);
        self.count += 1;
        true
    }

    /// Take the finished packet and reset for the next one
    pub fn take(&mut self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(self.current_size());
        packet.push(self.flags.bits());
        if self.flags.contains(DataPacketFlags::SYNCHRONIZED) {
            packet.extend_from_slice(&self.timestamp.to_be_bytes());
        }
        packet.extend_from_slice(&self.count.to_be_bytes());
        packet.append(&mut self.body);
        self.count = 0;
        packet
    }
}

/// Parsed data packet
#[derive(Debug, Clone, PartialEq)]
pub struct DataPacket {
    /// Packet flags
    pub flags: DataPacketFlags,
    /// Frame timestamp of a synchronized packet
    pub timestamp: Option<Ticks>,
    /// Decoded measurements in wire order
    pub measurements: Vec<MeasurementRecord>,
}

impl DataPacket {
    /// Parse a packet
    ///
    /// `compact` describes the subscriber's base times and resolution; in a
    /// synchronized packet it is overridden to omit the per-measurement time
    /// and every compact measurement takes the frame timestamp.
    pub fn parse(
        bytes: &[u8],
        compact: &CompactConfig,
        encoding: TextEncoding,
        cache: &SignalIndexCache,
    ) -> Result<Self> {
        let mut reader = WireReader::new(bytes);
        let flags = DataPacketFlags(reader.read_u8()?);

        if flags.contains(DataPacketFlags::COMPRESSED) || flags.contains(DataPacketFlags::CIPHER_INDEX) {
            return Err(DecodeError::UnsupportedPacket(flags.bits()).into());
        }

        let synchronized = flags.contains(DataPacketFlags::SYNCHRONIZED);
        let timestamp = if synchronized {
            Some(reader.read_i64()?)
        } else {
            None
        };
        let count = reader.read_u32()?;

        let compact_codec = if synchronized {
            CompactCodec::new(CompactConfig {
                include_time: false,
                ..compact.clone()
            })
        } else {
            CompactCodec::new(compact.clone())
        };
        let verbose_codec = VerboseCodec::new(encoding);
        let is_compact = flags.contains(DataPacketFlags::COMPACT);

        let mut measurements = Vec::with_capacity(count.min(4096) as usize);
        let mut offset = reader.position();

        for _ in 0..count {
            let (record, used) = if is_compact {
                let (mut record, used) = compact_codec.decode(&bytes[offset..], cache)?;
                if let Some(frame_time) = timestamp {
                    record.timestamp = frame_time;
                }
                (record, used)
            } else {
                verbose_codec.decode(&bytes[offset..], cache)?
            };
            measurements.push(record);
            offset += used;
        }

        if offset != bytes.len() {
            return Err(DecodeError::MalformedMessage {
                offset,
                reason: format!("{} trailing bytes after {} measurements", bytes.len() - offset, count),
            }
            .into());
        }

        Ok(Self {
            flags,
            timestamp,
            measurements,
        })
    }
}
