// GEP Publisher - Per-client subscription pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for GEP Publisher
//!
//! - [`SubscriptionConfig`]: publisher-side limits for one subscription
//! - [`SubscriptionSettings`]: what the client asked for, parsed from its
//!   connection string

use crate::error::{PublisherError, Result};
use crate::temporal::TemporalConstraint;
use gep::compact::MAX_LENGTH;
use gep::{MAX_PACKET_SIZE, SYNCHRONIZED_HEADER_SIZE};
use std::collections::HashMap;

/// Publisher-side subscription configuration
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Maximum data packet size in bytes (default: 32767)
    pub max_packet_size: usize,

    /// Honour client requests to drop NaN values
    pub allow_nan_value_filter: bool,

    /// Encode unsynchronized times as offsets from rotating base times
    pub use_base_time_offsets: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            allow_nan_value_filter: true,
            use_base_time_offsets: false,
        }
    }
}

impl SubscriptionConfig {
    /// Smallest packet that still holds one compact measurement
    pub const MIN_PACKET_SIZE: usize = SYNCHRONIZED_HEADER_SIZE + MAX_LENGTH;

    /// Create a new configuration with custom max packet size
    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            max_packet_size,
            ..Default::default()
        }
    }

    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_packet_size < Self::MIN_PACKET_SIZE {
            return Err(PublisherError::InvalidConfig(format!(
                "max_packet_size {} is below the minimum of {}",
                self.max_packet_size,
                Self::MIN_PACKET_SIZE
            )));
        }
        Ok(())
    }
}

/// Client-requested subscription settings
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSettings {
    /// Filter expression selecting the subscribed signals
    pub input_measurement_keys: Option<String>,

    /// Use the compact measurement form
    pub use_compact_format: bool,

    /// Publish time-aligned frames rather than measurements as they arrive
    pub synchronized: bool,

    /// Send a time with each unsynchronized measurement
    pub include_time: bool,

    /// Prefer 2-byte millisecond offsets over 4-byte tick offsets
    pub use_millisecond_resolution: bool,

    /// Drop NaN values before they are queued
    pub request_nan_value_filter: bool,

    /// Historical replay window
    pub temporal_constraint: TemporalConstraint,

    /// Replay processing interval in milliseconds
    pub processing_interval: Option<i32>,

    /// Settings not recognized by the subscription
    pub other: HashMap<String, String>,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            input_measurement_keys: None,
            use_compact_format: true,
            synchronized: true,
            include_time: true,
            use_millisecond_resolution: false,
            request_nan_value_filter: false,
            temporal_constraint: TemporalConstraint::default(),
            processing_interval: None,
            other: HashMap::new(),
        }
    }
}

impl SubscriptionSettings {
    /// Parse settings from a connection string
    ///
    /// Keys are case-insensitive.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut settings = Self::default();

        for (key, value) in parse_key_value_pairs(connection_string)? {
            match key.as_str() {
                "inputmeasurementkeys" => {
                    if !value.is_empty() {
                        settings.input_measurement_keys = Some(value);
                    }
                }
                "usecompactmeasurementformat" | "compactformat" => {
                    settings.use_compact_format = parse_bool(&key, &value)?;
                }
                "synchronized" => {
                    settings.synchronized = parse_bool(&key, &value)?;
                }
                "includetime" => {
                    settings.include_time = parse_bool(&key, &value)?;
                }
                "usemillisecondresolution" => {
                    settings.use_millisecond_resolution = parse_bool(&key, &value)?;
                }
                "requestnanvaluefilter" => {
                    settings.request_nan_value_filter = parse_bool(&key, &value)?;
                }
                "starttimeconstraint" => {
                    settings.temporal_constraint.start_time = non_empty(value);
                }
                "stoptimeconstraint" => {
                    settings.temporal_constraint.stop_time = non_empty(value);
                }
                "processinginterval" => {
                    let interval = value.parse::<i32>().map_err(|_| {
                        PublisherError::InvalidConfig(format!("processingInterval: '{}' is not an integer", value))
                    })?;
                    settings.processing_interval = Some(interval);
                }
                _ => {
                    settings.other.insert(key, value);
                }
            }
        }

        Ok(settings)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "t" => Ok(true),
        "false" | "0" | "no" | "n" | "f" => Ok(false),
        _ => Err(PublisherError::InvalidConfig(format!(
            "{}: '{}' is not a boolean",
            key, value
        ))),
    }
}

/// Split `key=value; key={nested; value}` into lowercase keys and values
///
/// Values wrapped in braces may contain `;` and `=`; the outer braces are
/// removed.
pub fn parse_key_value_pairs(connection_string: &str) -> Result<HashMap<String, String>> {
    let mut pairs = HashMap::new();
    let mut segment = String::new();
    let mut depth = 0usize;

    let mut segments = Vec::new();
    for c in connection_string.chars() {
        match c {
            '{' => {
                depth += 1;
                segment.push(c);
            }
            '}' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    PublisherError::InvalidConfig("unbalanced '}' in connection string".to_string())
                })?;
                segment.push(c);
            }
            ';' if depth == 0 => segments.push(std::mem::take(&mut segment)),
            _ => segment.push(c),
        }
    }
    if depth != 0 {
        return Err(PublisherError::InvalidConfig(
            "unbalanced '{' in connection string".to_string(),
        ));
    }
    segments.push(segment);

    for segment in segments {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let (key, value) = segment.split_once('=').ok_or_else(|| {
            PublisherError::InvalidConfig(format!("'{}' is not a key=value pair", segment))
        })?;

        let key = key.trim().to_ascii_lowercase();
        let mut value = value.trim();
        if value.starts_with('{') && value.ends_with('}') {
            value = value[1..value.len() - 1].trim();
        }

        pairs.insert(key, value.to_string());
    }

    Ok(pairs)
}
