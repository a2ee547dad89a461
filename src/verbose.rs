// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Verbose (self-describing) measurement codec
//!
//! Used for clients that did not negotiate compact encoding. Each record
//! carries its full identity, scaling and state, so no signal index cache
//! is needed to read it.
//!
//! ```text
//! [id: 4] [source_len: 4] [source: N] [signal_id: 16]
//! [value: 8 f64] [adder: 8 f64] [multiplier: 8 f64]
//! [timestamp: 8] [state_flags: 4]
//! ```

use crate::error::{EncodeError, Result};
use crate::format::MeasurementCodec;
use crate::measurement::{MeasurementKey, MeasurementRecord};
use crate::signal_index::SignalIndexCache;
use crate::state_flags::MeasurementStateFlags;
use crate::text::TextEncoding;
use crate::wire::WireReader;

/// Size of all fields except the source text
pub const FIXED_LENGTH: usize = 60;

/// Verbose measurement encoder and parser
#[derive(Debug, Clone, Copy, Default)]
pub struct VerboseCodec {
    encoding: TextEncoding,
}

impl VerboseCodec {
    /// Create a codec writing text in the client's encoding
    pub fn new(encoding: TextEncoding) -> Self {
        Self { encoding }
    }

    /// Text encoding of the source field
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Serialize one record
    pub fn to_bytes(&self, record: &MeasurementRecord) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.binary_length(record));
        self.write_to(record, &mut buf)?;
        Ok(buf)
    }

    fn write_to(&self, record: &MeasurementRecord, buf: &mut Vec<u8>) -> Result<usize> {
        let start = buf.len();
        let source_len = self.encoding.encoded_len(&record.key.source);
        let source_len = i32::try_from(source_len).map_err(|_| EncodeError::FieldTooLong {
            size: source_len,
            max: i32::MAX as usize,
        })?;

        buf.extend_from_slice(&record.key.id.to_be_bytes());
        buf.extend_from_slice(&source_len.to_be_bytes());
        self.encoding.encode_into(&record.key.source, buf);
        buf.extend_from_slice(record.key.signal_id.as_bytes());
        buf.extend_from_slice(&record.value.to_be_bytes());
        buf.extend_from_slice(&record.adder.to_be_bytes());
        buf.extend_from_slice(&record.multiplier.to_be_bytes());
        buf.extend_from_slice(&record.timestamp.to_be_bytes());
        buf.extend_from_slice(&record.state_flags.bits().to_be_bytes());

        Ok(buf.len() - start)
    }
}

impl MeasurementCodec for VerboseCodec {
    fn binary_length(&self, record: &MeasurementRecord) -> usize {
        FIXED_LENGTH + self.encoding.encoded_len(&record.key.source)
    }

    fn encode(&self, record: &MeasurementRecord, _cache: &SignalIndexCache, buf: &mut Vec<u8>) -> Result<usize> {
        self.write_to(record, buf)
    }

    fn decode(&self, buffer: &[u8], _cache: &SignalIndexCache) -> Result<(MeasurementRecord, usize)> {
        let mut reader = WireReader::new(buffer);

        let id = reader.read_u32()?;
        let source_len = reader.read_length()?;
        let source = self.encoding.decode(reader.take(source_len)?)?;
        let signal_id = reader.read_uuid()?;

        let record = MeasurementRecord {
            key: MeasurementKey::new(signal_id, source, id),
            value: reader.read_f64()?,
            adder: reader.read_f64()?,
            multiplier: reader.read_f64()?,
            timestamp: reader.read_i64()?,
            state_flags: MeasurementStateFlags(reader.read_u32()?),
        };

        Ok((record, reader.position()))
    }
}
