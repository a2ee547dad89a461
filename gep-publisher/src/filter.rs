// GEP Publisher - Per-client subscription pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Filter expression resolution
//!
//! A subscription's input filter arrives as text and is turned into an
//! explicit key list by a [`FilterResolver`]. [`MetadataResolver`] handles
//! the plain list form over a table of known signals:
//!
//! ```text
//! 7aaf0a8f-3a4e-4b7e-a8de-0c4ac6b3c6c0; PPA:12, {2f0b...}; SHELBY
//! ```
//!
//! Each token is a signal ID (braces optional), a `SOURCE:ID` point, or a
//! bare source selecting every point it owns.

use crate::error::Result;
use gep::MeasurementKey;
use log::warn;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Resolves filter expressions against signal metadata
pub trait FilterResolver: Send + Sync {
    /// Explicit keys selected by `expression`, in expression order
    fn resolve(&self, expression: &str) -> Result<Vec<MeasurementKey>>;
}

/// Expression listing signal IDs, as sent back after a cache rebuild
pub fn signal_id_expression(signal_ids: &[Uuid]) -> String {
    signal_ids
        .iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(";")
}

/// Resolver over an in-memory table of known keys
#[derive(Debug, Clone, Default)]
pub struct MetadataResolver {
    by_signal: HashMap<Uuid, MeasurementKey>,
    by_point: HashMap<(String, u32), Uuid>,
    by_source: HashMap<String, Vec<Uuid>>,
}

impl MetadataResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver knowing `keys`
    pub fn from_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = MeasurementKey>,
    {
        let mut resolver = Self::new();
        for key in keys {
            resolver.insert(key);
        }
        resolver
    }

    /// Register a key
    pub fn insert(&mut self, key: MeasurementKey) {
        let source = key.source.to_ascii_uppercase();
        self.by_point.insert((source.clone(), key.id), key.signal_id);
        self.by_source.entry(source).or_default().push(key.signal_id);
        self.by_signal.insert(key.signal_id, key);
    }

    /// Number of known keys
    pub fn len(&self) -> usize {
        self.by_signal.len()
    }

    /// Check if no key is known
    pub fn is_empty(&self) -> bool {
        self.by_signal.is_empty()
    }

    fn lookup_token(&self, token: &str) -> Vec<Uuid> {
        let unbraced = token.trim_start_matches('{').trim_end_matches('}');
        if let Ok(signal_id) = Uuid::parse_str(unbraced) {
            return if self.by_signal.contains_key(&signal_id) {
                vec![signal_id]
            } else {
                Vec::new()
            };
        }

        if let Some((source, id)) = token.rsplit_once(':') {
            if let Ok(id) = id.trim().parse::<u32>() {
                return self
                    .by_point
                    .get(&(source.trim().to_ascii_uppercase(), id))
                    .copied()
                    .into_iter()
                    .collect();
            }
        }

        self.by_source
            .get(&token.to_ascii_uppercase())
            .cloned()
            .unwrap_or_default()
    }
}

impl FilterResolver for MetadataResolver {
    fn resolve(&self, expression: &str) -> Result<Vec<MeasurementKey>> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        for token in expression.split(|c| c == ';' || c == ',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            let matches = self.lookup_token(token);
            if matches.is_empty() {
                warn!("Filter token '{}' matched no known signal", token);
                continue;
            }

            for signal_id in matches {
                if seen.insert(signal_id) {
                    if let Some(key) = self.by_signal.get(&signal_id) {
                        keys.push(key.clone());
                    }
                }
            }
        }

        Ok(keys)
    }
}
