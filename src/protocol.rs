// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Protocol definitions for GEP
//!
//! This module defines the control-plane types:
//! - Server commands and responses
//! - Response framing
//! - Base time offsets and their update message
//! - Data start time message

use crate::error::{DecodeError, GepError, Result};
use crate::measurement::{Ticks, TICKS_PER_MILLISECOND};
use crate::wire::WireReader;
use std::fmt;

/// Largest data packet a publisher emits by default
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize / 2;

/// Commands a subscriber sends to the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerCommand {
    Authenticate = 0x00,
    MetaDataRefresh = 0x01,
    Subscribe = 0x02,
    Unsubscribe = 0x03,
    RotateCipherKeys = 0x04,
    UpdateProcessingInterval = 0x05,
    DefineOperationalModes = 0x06,
    ConfirmNotification = 0x07,
    ConfirmBufferBlock = 0x08,
}

impl ServerCommand {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(ServerCommand::Authenticate),
            0x01 => Some(ServerCommand::MetaDataRefresh),
            0x02 => Some(ServerCommand::Subscribe),
            0x03 => Some(ServerCommand::Unsubscribe),
            0x04 => Some(ServerCommand::RotateCipherKeys),
            0x05 => Some(ServerCommand::UpdateProcessingInterval),
            0x06 => Some(ServerCommand::DefineOperationalModes),
            0x07 => Some(ServerCommand::ConfirmNotification),
            0x08 => Some(ServerCommand::ConfirmBufferBlock),
            _ => None,
        }
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Responses the publisher sends to a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerResponse {
    Succeeded = 0x80,
    Failed = 0x81,
    DataPacket = 0x82,
    UpdateSignalIndexCache = 0x83,
    UpdateBaseTimes = 0x84,
    UpdateCipherKeys = 0x85,
    DataStartTime = 0x86,
    ProcessingComplete = 0x87,
    BufferBlock = 0x88,
    Notify = 0x89,
    ConfigurationChanged = 0x8A,
    NoOp = 0xFF,
}

impl ServerResponse {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x80 => Some(ServerResponse::Succeeded),
            0x81 => Some(ServerResponse::Failed),
            0x82 => Some(ServerResponse::DataPacket),
            0x83 => Some(ServerResponse::UpdateSignalIndexCache),
            0x84 => Some(ServerResponse::UpdateBaseTimes),
            0x85 => Some(ServerResponse::UpdateCipherKeys),
            0x86 => Some(ServerResponse::DataStartTime),
            0x87 => Some(ServerResponse::ProcessingComplete),
            0x88 => Some(ServerResponse::BufferBlock),
            0x89 => Some(ServerResponse::Notify),
            0x8A => Some(ServerResponse::ConfigurationChanged),
            0xFF => Some(ServerResponse::NoOp),
            _ => None,
        }
    }
}

impl fmt::Display for ServerResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Header preceding every publisher response
///
/// ```text
/// [response: 1] [command: 1] [payload_len: 4]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Response code
    pub response: ServerResponse,
    /// Command this response answers
    pub command: ServerCommand,
    /// Payload length in bytes
    pub length: usize,
}

impl ResponseHeader {
    /// Header size in bytes
    pub const SIZE: usize = 6;

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Result<[u8; Self::SIZE]> {
        let length = i32::try_from(self.length).map_err(|_| {
            GepError::Protocol(format!("response payload of {} bytes too large", self.length))
        })?;
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.response as u8;
        bytes[1] = self.command as u8;
        bytes[2..6].copy_from_slice(&length.to_be_bytes());
        Ok(bytes)
    }

    /// Parse header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(bytes);
        let response = reader.read_u8()?;
        let response = ServerResponse::from_u8(response).ok_or(DecodeError::UnknownResponse(response))?;
        let command = reader.read_u8()?;
        let command = ServerCommand::from_u8(command).ok_or(DecodeError::UnknownCommand(command))?;
        let length = reader.read_length()?;
        Ok(Self {
            response,
            command,
            length,
        })
    }
}

/// Frame a response for transmission
pub fn frame_response(response: ServerResponse, command: ServerCommand, payload: &[u8]) -> Result<Vec<u8>> {
    let header = ResponseHeader {
        response,
        command,
        length: payload.len(),
    };
    let mut buf = Vec::with_capacity(ResponseHeader::SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes()?);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Split a framed response into header and payload
pub fn parse_response(bytes: &[u8]) -> Result<(ResponseHeader, &[u8])> {
    let header = ResponseHeader::from_bytes(bytes)?;
    let end = ResponseHeader::SIZE + header.length;
    if bytes.len() < end {
        return Err(DecodeError::BufferTooShort {
            needed: end,
            available: bytes.len(),
        }
        .into());
    }
    Ok((header, &bytes[ResponseHeader::SIZE..end]))
}

/// Payload of a `DataStartTime` response
pub fn data_start_time_payload(timestamp: Ticks) -> Vec<u8> {
    timestamp.to_be_bytes().to_vec()
}

/// Parse a `DataStartTime` payload
pub fn parse_data_start_time(payload: &[u8]) -> Result<Ticks> {
    Ok(WireReader::new(payload).read_i64()?)
}

/// Two base times for offset-encoded timestamps
///
/// Rotating flips the active slot and moves the retired slot ahead, so
/// packets encoded against either slot stay decodable while the
/// subscriber catches up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BaseTimeOffsets {
    /// Active slot (0 or 1)
    pub time_index: usize,
    /// Base times in ticks
    pub offsets: [Ticks; 2],
}

impl BaseTimeOffsets {
    /// Payload size in bytes
    pub const SIZE: usize = 20;

    /// Rotation interval for 2-byte millisecond offsets (one minute)
    pub const MILLISECOND_ROTATION_INTERVAL: Ticks = 60_000 * TICKS_PER_MILLISECOND;

    /// Rotation interval for 4-byte tick offsets (seven minutes)
    pub const TICK_ROTATION_INTERVAL: Ticks = 420_000 * TICKS_PER_MILLISECOND;

    /// Rotation interval that keeps offsets within the field width
    pub fn rotation_interval(use_millisecond_resolution: bool) -> Ticks {
        if use_millisecond_resolution {
            Self::MILLISECOND_ROTATION_INTERVAL
        } else {
            Self::TICK_ROTATION_INTERVAL
        }
    }

    /// Check if base times have been established
    pub fn is_initialized(&self) -> bool {
        self.offsets[0] > 0
    }

    /// Active base time
    pub fn active(&self) -> Ticks {
        self.offsets[self.time_index & 1]
    }

    /// Base time the next rotation activates
    pub fn next(&self) -> Ticks {
        self.offsets[(self.time_index & 1) ^ 1]
    }

    /// Check if `timestamp` has reached the next base time
    pub fn is_due(&self, timestamp: Ticks) -> bool {
        !self.is_initialized() || timestamp >= self.next()
    }

    /// Advance the base times at `now`
    pub fn rotate(&mut self, now: Ticks, interval: Ticks) {
        if !self.is_initialized() {
            self.time_index = 0;
            self.offsets = [now, now + interval];
        } else {
            let retired = self.time_index & 1;
            self.time_index = retired ^ 1;
            self.offsets[retired] = now + interval;
        }
    }

    /// Serialize as an `UpdateBaseTimes` payload
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&(self.time_index as i32).to_be_bytes());
        bytes[4..12].copy_from_slice(&self.offsets[0].to_be_bytes());
        bytes[12..20].copy_from_slice(&self.offsets[1].to_be_bytes());
        bytes
    }

    /// Parse an `UpdateBaseTimes` payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(bytes);
        let time_index = reader.read_i32()?;
        if !(0..=1).contains(&time_index) {
            return Err(DecodeError::MalformedMessage {
                offset: 0,
                reason: format!("time index {} out of range", time_index),
            }
            .into());
        }
        Ok(Self {
            time_index: time_index as usize,
            offsets: [reader.read_i64()?, reader.read_i64()?],
        })
    }
}
