// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Compact measurement codec
//!
//! Encodes one measurement in 7 to 15 bytes:
//!
//! ```text
//! [flags: 1] [runtime_id: 2] [value: 4 f32] [time: 0 | 2 | 4 | 8]
//! ```
//!
//! The flags byte carries the compact state categories plus two time-field
//! bits: `TIME_INDEX` (base time slot 1 is active) and `BASE_TIME_OFFSET`
//! (the time field is an offset rather than absolute ticks).
//!
//! The time field layout is chosen per record by [`CompactCodec::plan`].
//! The resulting [`TimeEncoding`] is the only input to both the length
//! query and the writer, so they cannot disagree.

use crate::error::{DecodeError, EncodeError, Result};
use crate::format::MeasurementCodec;
use crate::measurement::{MeasurementRecord, Ticks, TICKS_PER_MILLISECOND};
use crate::signal_index::SignalIndexCache;
use crate::state_flags::CompactStateFlags;
use crate::wire::WireReader;

/// Header size without the time field
pub const FIXED_LENGTH: usize = 7;

/// Largest compact measurement (8-byte time field)
pub const MAX_LENGTH: usize = FIXED_LENGTH + 8;

/// Compact encoding context
///
/// Fixed for the lifetime of one encoder or parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactConfig {
    /// Write a per-measurement time field
    pub include_time: bool,
    /// Two base times, or `None` for absolute ticks only
    pub base_time_offsets: Option<[Ticks; 2]>,
    /// Active base time slot (0 or 1)
    pub time_index: usize,
    /// Prefer 2-byte millisecond offsets over 4-byte tick offsets
    pub use_millisecond_resolution: bool,
}

impl Default for CompactConfig {
    fn default() -> Self {
        Self {
            include_time: true,
            base_time_offsets: None,
            time_index: 0,
            use_millisecond_resolution: false,
        }
    }
}

impl CompactConfig {
    /// Configuration for measurements inside a synchronized packet
    ///
    /// The packet carries the frame timestamp, so no time field is written.
    pub fn synchronized() -> Self {
        Self {
            include_time: false,
            ..Default::default()
        }
    }

    /// Configuration with base time offsets
    pub fn with_base_time_offsets(offsets: [Ticks; 2], time_index: usize, use_millisecond_resolution: bool) -> Self {
        Self {
            include_time: true,
            base_time_offsets: Some(offsets),
            time_index: time_index & 1,
            use_millisecond_resolution,
        }
    }

    /// Base time of a slot, or 0 when offsets are not in use
    pub fn base_time(&self, time_index: usize) -> Ticks {
        self.base_time_offsets
            .map(|offsets| offsets[time_index & 1])
            .unwrap_or(0)
    }

    /// Base time of the active slot
    pub fn active_base_time(&self) -> Ticks {
        self.base_time(self.time_index)
    }
}

/// Time field chosen for one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeEncoding {
    /// No time field
    Omitted,
    /// Absolute 8-byte ticks
    Full(Ticks),
    /// Milliseconds past the active base time
    MillisecondOffset(u16),
    /// Ticks past the active base time
    TickOffset(u32),
}

/// Time field layout without its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeEncodingKind {
    Omitted,
    Full,
    MillisecondOffset,
    TickOffset,
}

impl TimeEncoding {
    /// Size of the time field in bytes
    pub fn len(&self) -> usize {
        match self {
            TimeEncoding::Omitted => 0,
            TimeEncoding::Full(_) => 8,
            TimeEncoding::MillisecondOffset(_) => 2,
            TimeEncoding::TickOffset(_) => 4,
        }
    }

    /// Check if no time field is written
    pub fn is_empty(&self) -> bool {
        matches!(self, TimeEncoding::Omitted)
    }

    /// Check if the field is relative to a base time
    pub fn uses_base_offset(&self) -> bool {
        matches!(
            self,
            TimeEncoding::MillisecondOffset(_) | TimeEncoding::TickOffset(_)
        )
    }

    /// Layout of this encoding
    pub fn kind(&self) -> TimeEncodingKind {
        match self {
            TimeEncoding::Omitted => TimeEncodingKind::Omitted,
            TimeEncoding::Full(_) => TimeEncodingKind::Full,
            TimeEncoding::MillisecondOffset(_) => TimeEncodingKind::MillisecondOffset,
            TimeEncoding::TickOffset(_) => TimeEncodingKind::TickOffset,
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            TimeEncoding::Omitted => {}
            TimeEncoding::Full(ticks) => buf.extend_from_slice(&ticks.to_be_bytes()),
            TimeEncoding::MillisecondOffset(ms) => buf.extend_from_slice(&ms.to_be_bytes()),
            TimeEncoding::TickOffset(ticks) => buf.extend_from_slice(&ticks.to_be_bytes()),
        }
    }
}

/// A measurement resolved against one cache snapshot, ready to write
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactMeasurement {
    /// Flags byte, including time-field bits
    pub flags: CompactStateFlags,
    /// Runtime ID from the signal index cache
    pub runtime_id: u16,
    /// Adjusted value, single precision
    pub value: f32,
    /// Time field
    pub time: TimeEncoding,
}

impl CompactMeasurement {
    /// Encoded size in bytes
    pub fn binary_length(&self) -> usize {
        FIXED_LENGTH + self.time.len()
    }

    /// Append the encoded measurement to `buf`, returning bytes written
    pub fn write_to(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();
        buf.push(self.flags.bits());
        buf.extend_from_slice(&self.runtime_id.to_be_bytes());
        buf.extend_from_slice(&self.value.to_be_bytes());
        self.time.write_to(buf);
        buf.len() - start
    }
}

/// Compact measurement encoder and parser
#[derive(Debug, Clone, Default)]
pub struct CompactCodec {
    config: CompactConfig,
}

impl CompactCodec {
    /// Create a new codec with the given configuration
    pub fn new(config: CompactConfig) -> Self {
        Self { config }
    }

    /// Create a codec for synchronized packets
    pub fn synchronized() -> Self {
        Self::new(CompactConfig::synchronized())
    }

    /// Get the configuration
    pub fn config(&self) -> &CompactConfig {
        &self.config
    }

    /// Choose the time field for a timestamp
    ///
    /// Pure: the same configuration and timestamp always give the same
    /// encoding. Timestamps at or before the active base time fall back to
    /// absolute ticks, since offsets are unsigned.
    pub fn plan(&self, timestamp: Ticks) -> TimeEncoding {
        if !self.config.include_time {
            return TimeEncoding::Omitted;
        }

        let base = self.config.active_base_time();
        if base <= 0 {
            return TimeEncoding::Full(timestamp);
        }

        if timestamp <= base {
            return TimeEncoding::Full(timestamp);
        }

        let diff = timestamp - base;

        if self.config.use_millisecond_resolution {
            let ms = diff / TICKS_PER_MILLISECOND;
            if ms < u16::MAX as i64 {
                return TimeEncoding::MillisecondOffset(ms as u16);
            }
        } else if diff < (1i64 << 32) {
            return TimeEncoding::TickOffset(diff as u32);
        }

        TimeEncoding::Full(timestamp)
    }

    /// Flags byte for a record with the given time field
    pub fn flags(&self, record: &MeasurementRecord, time: &TimeEncoding) -> CompactStateFlags {
        let mut flags = record.state_flags.to_compact();
        if self.config.time_index != 0 {
            flags |= CompactStateFlags::TIME_INDEX;
        }
        if time.uses_base_offset() {
            flags |= CompactStateFlags::BASE_TIME_OFFSET;
        }
        flags
    }

    /// Resolve a record into its compact form
    ///
    /// Fails with `UnknownSignal` if the record's signal has no runtime ID
    /// in `cache`.
    pub fn prepare(&self, record: &MeasurementRecord, cache: &SignalIndexCache) -> Result<CompactMeasurement> {
        let runtime_id = cache.lookup(&record.signal_id())?;
        let time = self.plan(record.timestamp);

        Ok(CompactMeasurement {
            flags: self.flags(record, &time),
            runtime_id,
            value: record.adjusted_value() as f32,
            time,
        })
    }

    /// Encode into a caller-provided buffer starting at `start`
    pub fn encode_to_slice(
        &self,
        record: &MeasurementRecord,
        cache: &SignalIndexCache,
        buffer: &mut [u8],
        start: usize,
    ) -> Result<usize> {
        let prepared = self.prepare(record, cache)?;
        let length = prepared.binary_length();

        if start.checked_add(length).map_or(true, |end| end > buffer.len()) {
            return Err(EncodeError::ArgumentRange {
                start,
                length,
                buffer_len: buffer.len(),
            }
            .into());
        }

        let mut image = Vec::with_capacity(length);
        prepared.write_to(&mut image);
        buffer[start..start + length].copy_from_slice(&image);
        Ok(length)
    }

    /// Decode from `buffer[start..start + length]`
    pub fn decode_at(
        &self,
        buffer: &[u8],
        start: usize,
        length: usize,
        cache: &SignalIndexCache,
    ) -> Result<(MeasurementRecord, usize)> {
        if start.checked_add(length).map_or(true, |end| end > buffer.len()) {
            return Err(DecodeError::ArgumentRange {
                start,
                length,
                buffer_len: buffer.len(),
            }
            .into());
        }

        self.decode(&buffer[start..start + length], cache)
    }
}

impl MeasurementCodec for CompactCodec {
    fn binary_length(&self, record: &MeasurementRecord) -> usize {
        FIXED_LENGTH + self.plan(record.timestamp).len()
    }

    fn encode(&self, record: &MeasurementRecord, cache: &SignalIndexCache, buf: &mut Vec<u8>) -> Result<usize> {
        Ok(self.prepare(record, cache)?.write_to(buf))
    }

    /// Decode one measurement from the start of `buffer`
    ///
    /// Values come back with unit scaling; state flags come back as full
    /// category masks. Without a time field the timestamp is 0 and the
    /// caller supplies the frame time.
    fn decode(&self, buffer: &[u8], cache: &SignalIndexCache) -> Result<(MeasurementRecord, usize)> {
        let mut reader = WireReader::new(buffer);

        let flags = CompactStateFlags(reader.read_u8()?);
        let time_index = usize::from(flags.contains(CompactStateFlags::TIME_INDEX));
        let uses_offset = flags.contains(CompactStateFlags::BASE_TIME_OFFSET);

        let runtime_id = reader.read_u16()?;
        let key = cache.resolve(runtime_id)?.clone();
        let value = f64::from(reader.read_f32()?);

        let timestamp = if !self.config.include_time {
            0
        } else if uses_offset {
            let offset = if self.config.use_millisecond_resolution {
                i64::from(reader.read_u16()?) * TICKS_PER_MILLISECOND
            } else {
                i64::from(reader.read_u32()?)
            };

            let base = self.config.base_time(time_index);
            if base <= 0 {
                return Err(DecodeError::BaseTimeUnavailable { time_index }.into());
            }
            base.checked_add(offset).ok_or_else(|| DecodeError::MalformedMessage {
                offset: FIXED_LENGTH,
                reason: format!("time offset {} overflows base time {}", offset, base),
            })?
        } else {
            reader.read_i64()?
        };

        let record = MeasurementRecord::new(key, value, timestamp).with_state_flags(flags.to_full());
        Ok((record, reader.position()))
    }
}
