// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Client text encodings
//!
//! Strings on the wire (point sources in the signal index cache and in
//! verbose measurements) use the encoding negotiated by each client
//! through its operational modes.

use crate::error::DecodeError;
use std::fmt;

/// Text encoding negotiated by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextEncoding {
    /// UTF-16 little-endian
    #[default]
    Unicode,
    /// UTF-16 big-endian
    BigEndianUnicode,
    /// UTF-8
    Utf8,
    /// Single-byte Latin-1, unmappable characters become `?`
    Ansi,
}

impl TextEncoding {
    /// Operational-mode bits selecting the encoding
    pub const OPERATIONAL_MODE_MASK: u32 = 0x0000_0300;

    /// Decode the encoding from operational-mode bits
    pub fn from_operational_modes(modes: u32) -> Self {
        match modes & Self::OPERATIONAL_MODE_MASK {
            0x0000_0100 => TextEncoding::BigEndianUnicode,
            0x0000_0200 => TextEncoding::Utf8,
            0x0000_0300 => TextEncoding::Ansi,
            _ => TextEncoding::Unicode,
        }
    }

    /// Operational-mode bits for this encoding
    pub fn operational_mode_bits(&self) -> u32 {
        match self {
            TextEncoding::Unicode => 0x0000_0000,
            TextEncoding::BigEndianUnicode => 0x0000_0100,
            TextEncoding::Utf8 => 0x0000_0200,
            TextEncoding::Ansi => 0x0000_0300,
        }
    }

    /// Number of bytes `text` occupies in this encoding
    pub fn encoded_len(&self, text: &str) -> usize {
        match self {
            TextEncoding::Unicode | TextEncoding::BigEndianUnicode => {
                text.encode_utf16().count() * 2
            }
            TextEncoding::Utf8 => text.len(),
            TextEncoding::Ansi => text.chars().count(),
        }
    }

    /// Append the encoded form of `text` to `buf`
    pub fn encode_into(&self, text: &str, buf: &mut Vec<u8>) {
        match self {
            TextEncoding::Unicode => {
                for unit in text.encode_utf16() {
                    buf.extend_from_slice(&unit.to_le_bytes());
                }
            }
            TextEncoding::BigEndianUnicode => {
                for unit in text.encode_utf16() {
                    buf.extend_from_slice(&unit.to_be_bytes());
                }
            }
            TextEncoding::Utf8 => buf.extend_from_slice(text.as_bytes()),
            TextEncoding::Ansi => {
                buf.extend(text.chars().map(|c| u8::try_from(c).unwrap_or(b'?')));
            }
        }
    }

    /// Encode `text` into a new buffer
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len(text));
        self.encode_into(text, &mut buf);
        buf
    }

    /// Decode bytes in this encoding
    pub fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        match self {
            TextEncoding::Unicode | TextEncoding::BigEndianUnicode => {
                if bytes.len() % 2 != 0 {
                    return Err(DecodeError::MalformedMessage {
                        offset: bytes.len(),
                        reason: "odd byte count in UTF-16 text".to_string(),
                    });
                }
                let big_endian = *self == TextEncoding::BigEndianUnicode;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| {
                        if big_endian {
                            u16::from_be_bytes([pair[0], pair[1]])
                        } else {
                            u16::from_le_bytes([pair[0], pair[1]])
                        }
                    })
                    .collect();
                String::from_utf16(&units).map_err(|_| DecodeError::MalformedMessage {
                    offset: 0,
                    reason: "invalid UTF-16 text".to_string(),
                })
            }
            TextEncoding::Utf8 => {
                String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::MalformedMessage {
                    offset: e.utf8_error().valid_up_to(),
                    reason: "invalid UTF-8 text".to_string(),
                })
            }
            TextEncoding::Ansi => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextEncoding::Unicode => write!(f, "UTF-16LE"),
            TextEncoding::BigEndianUnicode => write!(f, "UTF-16BE"),
            TextEncoding::Utf8 => write!(f, "UTF-8"),
            TextEncoding::Ansi => write!(f, "ANSI"),
        }
    }
}
