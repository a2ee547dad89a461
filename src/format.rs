// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Measurement encoding forms
//!
//! A client receives either compact or verbose measurements. The form is
//! negotiated once per subscription and is uniform within a packet.

use crate::compact::{CompactCodec, CompactMeasurement, TimeEncoding};
use crate::error::Result;
use crate::measurement::MeasurementRecord;
use crate::packet::DataPacketFlags;
use crate::signal_index::SignalIndexCache;
use crate::text::TextEncoding;
use crate::verbose::VerboseCodec;

/// Binary encoding of one measurement
pub trait MeasurementCodec {
    /// Encoded size of `record` in bytes
    fn binary_length(&self, record: &MeasurementRecord) -> usize;

    /// Append `record` to `buf`, returning bytes written
    fn encode(&self, record: &MeasurementRecord, cache: &SignalIndexCache, buf: &mut Vec<u8>) -> Result<usize>;

    /// Decode one record from the start of `buffer`, returning bytes consumed
    fn decode(&self, buffer: &[u8], cache: &SignalIndexCache) -> Result<(MeasurementRecord, usize)>;
}

/// Negotiated encoding form for a client
#[derive(Debug, Clone)]
pub enum MeasurementFormat {
    /// 7-15 byte compact form
    Compact(CompactCodec),
    /// Self-describing form
    Verbose(VerboseCodec),
}

impl MeasurementFormat {
    /// Compact form for synchronized packets
    pub fn compact() -> Self {
        MeasurementFormat::Compact(CompactCodec::synchronized())
    }

    /// Verbose form with the client's text encoding
    pub fn verbose(encoding: TextEncoding) -> Self {
        MeasurementFormat::Verbose(VerboseCodec::new(encoding))
    }

    /// Check if this is the compact form
    pub fn is_compact(&self) -> bool {
        matches!(self, MeasurementFormat::Compact(_))
    }

    /// Packet flag bits describing this form
    pub fn packet_flags(&self) -> DataPacketFlags {
        match self {
            MeasurementFormat::Compact(_) => DataPacketFlags::COMPACT,
            MeasurementFormat::Verbose(_) => DataPacketFlags::NONE,
        }
    }

    /// Resolve a record once, fixing its length and bytes
    pub fn prepare(&self, record: &MeasurementRecord, cache: &SignalIndexCache) -> Result<PreparedMeasurement> {
        match self {
            MeasurementFormat::Compact(codec) => Ok(PreparedMeasurement::Compact(codec.prepare(record, cache)?)),
            MeasurementFormat::Verbose(codec) => Ok(PreparedMeasurement::Verbose(codec.to_bytes(record)?)),
        }
    }
}

impl MeasurementCodec for MeasurementFormat {
    fn binary_length(&self, record: &MeasurementRecord) -> usize {
        match self {
            MeasurementFormat::Compact(codec) => codec.binary_length(record),
            MeasurementFormat::Verbose(codec) => codec.binary_length(record),
        }
    }

    fn encode(&self, record: &MeasurementRecord, cache: &SignalIndexCache, buf: &mut Vec<u8>) -> Result<usize> {
        match self {
            MeasurementFormat::Compact(codec) => codec.encode(record, cache, buf),
            MeasurementFormat::Verbose(codec) => codec.encode(record, cache, buf),
        }
    }

    fn decode(&self, buffer: &[u8], cache: &SignalIndexCache) -> Result<(MeasurementRecord, usize)> {
        match self {
            MeasurementFormat::Compact(codec) => codec.decode(buffer, cache),
            MeasurementFormat::Verbose(codec) => codec.decode(buffer, cache),
        }
    }
}

/// A measurement whose encoded length is already fixed
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedMeasurement {
    Compact(CompactMeasurement),
    Verbose(Vec<u8>),
}

impl PreparedMeasurement {
    /// Encoded size in bytes
    pub fn binary_length(&self) -> usize {
        match self {
            PreparedMeasurement::Compact(m) => m.binary_length(),
            PreparedMeasurement::Verbose(bytes) => bytes.len(),
        }
    }

    /// Append the encoded bytes to `buf`
    pub fn write_to(&self, buf: &mut Vec<u8>) -> usize {
        match self {
            PreparedMeasurement::Compact(m) => m.write_to(buf),
            PreparedMeasurement::Verbose(bytes) => {
                buf.extend_from_slice(bytes);
                bytes.len()
            }
        }
    }

    /// Time field, for compact measurements
    pub fn time_encoding(&self) -> Option<TimeEncoding> {
        match self {
            PreparedMeasurement::Compact(m) => Some(m.time),
            PreparedMeasurement::Verbose(_) => None,
        }
    }
}
