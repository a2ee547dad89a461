// GEP - Gateway Exchange Protocol
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Per-client signal index cache
//!
//! Maps each authorized signal to a 16-bit runtime ID so that compact
//! measurements can carry two bytes instead of a full signal identity.
//!
//! A [`SignalIndexCache`] is immutable once built. Rebuilds produce a new
//! table that is published through [`SharedSignalIndexCache`], so encoders
//! running concurrently always read one complete generation.
//!
//! # Wire Format
//!
//! ```text
//! [total_len: 4] [subscriber_id: 16] [count: 4] [entry...]
//! [unauthorized_count: 4] [signal_id: 16]...
//!
//! entry:
//! [runtime_id: 2] [signal_id: 16] [source_len: 4] [source: N] [id: 4]
//! ```

use crate::error::{CacheError, DecodeError, EncodeError, GepError, Result};
use crate::measurement::MeasurementKey;
use crate::text::TextEncoding;
use crate::wire::WireReader;
use arc_swap::ArcSwap;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;
use xxhash_rust::xxh64::xxh64;

/// Number of distinct runtime IDs
pub const MAX_RUNTIME_IDS: usize = u16::MAX as usize + 1;

/// Bidirectional map between signal identities and runtime IDs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalIndexCache {
    subscriber_id: Uuid,
    reference: BTreeMap<u16, MeasurementKey>,
    lookup: HashMap<Uuid, u16>,
    unauthorized: Vec<Uuid>,
}

impl SignalIndexCache {
    /// Create an empty cache for a subscriber
    pub fn new(subscriber_id: Uuid) -> Self {
        Self {
            subscriber_id,
            ..Default::default()
        }
    }

    /// Build a cache from a requested key list
    ///
    /// Keys are walked in order. Each key whose signal ID is not nil and
    /// for which `has_rights` holds receives the next runtime ID, starting
    /// at 0. Repeated signals keep their first runtime ID. Everything else
    /// is recorded as unauthorized.
    pub fn build<F>(subscriber_id: Uuid, requested: &[MeasurementKey], has_rights: F) -> Result<Self>
    where
        F: Fn(&Uuid) -> bool,
    {
        let mut cache = Self::new(subscriber_id);

        for key in requested {
            if cache.lookup.contains_key(&key.signal_id) {
                continue;
            }

            if key.signal_id.is_nil() || !has_rights(&key.signal_id) {
                if !cache.unauthorized.contains(&key.signal_id) {
                    cache.unauthorized.push(key.signal_id);
                }
                continue;
            }

            let next = cache.reference.len();
            let runtime_id = u16::try_from(next).map_err(|_| CacheError::TooManySignals {
                count: next + 1,
                max: MAX_RUNTIME_IDS,
            })?;
            cache.insert(runtime_id, key.clone());
        }

        debug!(
            "Built signal index cache for {}: {} authorized, {} unauthorized",
            subscriber_id,
            cache.len(),
            cache.unauthorized.len()
        );

        Ok(cache)
    }

    fn insert(&mut self, runtime_id: u16, key: MeasurementKey) {
        if let Some(previous) = self.reference.insert(runtime_id, key.clone()) {
            self.lookup.remove(&previous.signal_id);
        }
        self.lookup.insert(key.signal_id, runtime_id);
    }

    /// Subscriber this cache belongs to
    pub fn subscriber_id(&self) -> Uuid {
        self.subscriber_id
    }

    /// Number of indexed signals
    pub fn len(&self) -> usize {
        self.reference.len()
    }

    /// Check if no signal is indexed
    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    /// Check if a signal has a runtime ID
    pub fn contains(&self, signal_id: &Uuid) -> bool {
        self.lookup.contains_key(signal_id)
    }

    /// Runtime ID of a signal, if indexed
    pub fn signal_index(&self, signal_id: &Uuid) -> Option<u16> {
        self.lookup.get(signal_id).copied()
    }

    /// Runtime ID of a signal
    ///
    /// A miss means the cache is stale or the caller is encoding a signal
    /// the client never subscribed to.
    pub fn lookup(&self, signal_id: &Uuid) -> Result<u16> {
        self.signal_index(signal_id).ok_or_else(|| {
            GepError::from(EncodeError::UnknownSignal {
                signal_id: *signal_id,
            })
        })
    }

    /// Key assigned to a runtime ID
    pub fn resolve(&self, runtime_id: u16) -> Result<&MeasurementKey> {
        self.reference
            .get(&runtime_id)
            .ok_or_else(|| GepError::from(DecodeError::UnknownSignalId { runtime_id }))
    }

    /// Indexed entries in runtime ID order
    pub fn entries(&self) -> impl Iterator<Item = (u16, &MeasurementKey)> {
        self.reference.iter().map(|(id, key)| (*id, key))
    }

    /// Authorized signal IDs in runtime ID order
    pub fn authorized_signal_ids(&self) -> Vec<Uuid> {
        self.reference.values().map(|key| key.signal_id).collect()
    }

    /// Authorized keys in runtime ID order
    pub fn authorized_keys(&self) -> Vec<MeasurementKey> {
        self.reference.values().cloned().collect()
    }

    /// Requested signals that were not indexed
    pub fn unauthorized_signal_ids(&self) -> &[Uuid] {
        &self.unauthorized
    }

    /// Digest of the indexed entries
    ///
    /// Two caches with equal fingerprints assign the same runtime IDs to
    /// the same keys.
    pub fn fingerprint(&self) -> u64 {
        let mut data = Vec::with_capacity(self.reference.len() * 32);
        for (runtime_id, key) in &self.reference {
            data.extend_from_slice(&runtime_id.to_be_bytes());
            data.extend_from_slice(key.signal_id.as_bytes());
            data.extend_from_slice(key.source.as_bytes());
            data.extend_from_slice(&key.id.to_be_bytes());
        }
        xxh64(&data, 0)
    }

    /// Serialize the cache for transmission to its client
    pub fn to_bytes(&self, encoding: TextEncoding) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(28 + self.reference.len() * 40 + self.unauthorized.len() * 16);

        // Total length, patched below
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(self.subscriber_id.as_bytes());
        buf.extend_from_slice(&wire_count(self.reference.len())?.to_be_bytes());

        for (runtime_id, key) in &self.reference {
            let source = encoding.encode(&key.source);
            buf.extend_from_slice(&runtime_id.to_be_bytes());
            buf.extend_from_slice(key.signal_id.as_bytes());
            buf.extend_from_slice(&wire_count(source.len())?.to_be_bytes());
            buf.extend_from_slice(&source);
            buf.extend_from_slice(&key.id.to_be_bytes());
        }

        buf.extend_from_slice(&wire_count(self.unauthorized.len())?.to_be_bytes());
        for signal_id in &self.unauthorized {
            buf.extend_from_slice(signal_id.as_bytes());
        }

        let total = wire_count(buf.len())?;
        buf[..4].copy_from_slice(&total.to_be_bytes());
        Ok(buf)
    }

    /// Parse a cache received from the publisher
    pub fn from_bytes(bytes: &[u8], encoding: TextEncoding) -> Result<Self> {
        let mut reader = WireReader::new(bytes);

        let total = reader.read_length()?;
        if total > bytes.len() {
            return Err(DecodeError::BufferTooShort {
                needed: total,
                available: bytes.len(),
            }
            .into());
        }
        let mut reader = WireReader::new(&bytes[..total]);
        reader.take(4)?;

        let mut cache = Self::new(reader.read_uuid()?);
        let count = reader.read_length()?;

        for _ in 0..count {
            let runtime_id = reader.read_u16()?;
            let signal_id = reader.read_uuid()?;
            let source_len = reader.read_length()?;
            let source = encoding.decode(reader.take(source_len)?)?;
            let id = reader.read_u32()?;
            cache.insert(runtime_id, MeasurementKey::new(signal_id, source, id));
        }

        // Older publishers stop after the entries
        if reader.remaining() >= 4 {
            let unauthorized = reader.read_length()?;
            for _ in 0..unauthorized {
                cache.unauthorized.push(reader.read_uuid()?);
            }
        }

        Ok(cache)
    }
}

fn wire_count(count: usize) -> Result<i32> {
    i32::try_from(count).map_err(|_| {
        GepError::from(EncodeError::FieldTooLong {
            size: count,
            max: i32::MAX as usize,
        })
    })
}

/// Atomically swappable handle to a client's current cache
///
/// Readers take a snapshot with [`load`](Self::load) and use it for a
/// whole frame; a concurrent [`store`](Self::store) never tears it.
#[derive(Debug)]
pub struct SharedSignalIndexCache {
    current: ArcSwap<SignalIndexCache>,
    generation: AtomicU64,
}

impl SharedSignalIndexCache {
    /// Create a handle holding `cache` as generation 0
    pub fn new(cache: SignalIndexCache) -> Self {
        Self {
            current: ArcSwap::from_pointee(cache),
            generation: AtomicU64::new(0),
        }
    }

    /// Create a handle holding an empty cache
    pub fn empty(subscriber_id: Uuid) -> Self {
        Self::new(SignalIndexCache::new(subscriber_id))
    }

    /// Snapshot of the current cache
    pub fn load(&self) -> Arc<SignalIndexCache> {
        self.current.load_full()
    }

    /// Publish a rebuilt cache, returning its generation
    pub fn store(&self, cache: SignalIndexCache) -> u64 {
        self.current.store(Arc::new(cache));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Published signal index cache generation {}", generation);
        generation
    }

    /// Number of rebuilds published so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
