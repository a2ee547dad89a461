// GEP Publisher - Per-client subscription pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Publisher abstraction
//!
//! The [`Publisher`] owns client connections and sockets. Subscriptions
//! only hand it finished responses; `send` is expected to queue and
//! return without blocking on I/O.

use crate::error::{PublisherError, Result};
use crate::temporal::{TemporalConstraint, TemporalSession};
use gep::protocol::{data_start_time_payload, frame_response};
use gep::{
    MeasurementKey, ServerCommand, ServerResponse, SharedSignalIndexCache, SignalIndexCache,
    TextEncoding, Ticks,
};
use log::info;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Services a subscription needs from its publisher
pub trait Publisher: Send + Sync {
    /// Rebuild `cache` for the keys a client requested
    ///
    /// The publisher decides which keys the client may receive and
    /// publishes the new table through `cache`.
    fn rebuild_signal_index_cache(
        &self,
        client_id: Uuid,
        cache: &SharedSignalIndexCache,
        requested: &[MeasurementKey],
    ) -> Result<()>;

    /// Queue a response for a client
    fn send(
        &self,
        client_id: Uuid,
        response: ServerResponse,
        command: ServerCommand,
        payload: Vec<u8>,
    ) -> Result<()>;

    /// Tell a client the timestamp of the first data it will receive
    fn announce_data_start_time(&self, client_id: Uuid, timestamp: Ticks) -> Result<()> {
        self.send(
            client_id,
            ServerResponse::DataStartTime,
            ServerCommand::Subscribe,
            data_start_time_payload(timestamp),
        )
    }

    /// Text encoding negotiated by a client
    fn client_encoding(&self, _client_id: Uuid) -> TextEncoding {
        TextEncoding::Unicode
    }

    /// Start a historical replay session for a client
    fn create_temporal_session(
        &self,
        _client_id: Uuid,
        _constraint: &TemporalConstraint,
    ) -> Result<Arc<dyn TemporalSession>> {
        Err(PublisherError::TemporalUnsupported)
    }
}

/// A response queued through [`MemoryPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentResponse {
    /// Destination client
    pub client_id: Uuid,
    /// Response code
    pub response: ServerResponse,
    /// Command answered
    pub command: ServerCommand,
    /// Response payload
    pub payload: Vec<u8>,
}

impl SentResponse {
    /// Response as it would appear on the wire
    pub fn framed(&self) -> Result<Vec<u8>> {
        Ok(frame_response(self.response, self.command, &self.payload)?)
    }
}

/// In-process publisher that records every response
///
/// Useful for loopback setups and for testing. Every key is authorized
/// unless an allow-list is set. Sends to a client marked disconnected fail
/// with [`PublisherError::ClientNotFound`].
#[derive(Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<SentResponse>>,
    authorized: RwLock<Option<HashSet<Uuid>>>,
    encodings: RwLock<HashMap<Uuid, TextEncoding>>,
    disconnected: RwLock<HashSet<Uuid>>,
    rebuilds: AtomicUsize,
}

impl MemoryPublisher {
    /// Create a publisher authorizing every signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher authorizing only `signal_ids`
    pub fn with_authorized<I>(signal_ids: I) -> Self
    where
        I: IntoIterator<Item = Uuid>,
    {
        let publisher = Self::new();
        publisher.set_authorized(signal_ids);
        publisher
    }

    /// Replace the allow-list
    pub fn set_authorized<I>(&self, signal_ids: I)
    where
        I: IntoIterator<Item = Uuid>,
    {
        *self.authorized.write() = Some(signal_ids.into_iter().collect());
    }

    /// Set the text encoding a client negotiated
    pub fn set_client_encoding(&self, client_id: Uuid, encoding: TextEncoding) {
        self.encodings.write().insert(client_id, encoding);
    }

    /// Mark a client as gone; later sends to it fail
    pub fn disconnect(&self, client_id: Uuid) {
        info!("Client {} disconnected", client_id);
        self.disconnected.write().insert(client_id);
    }

    /// Whether a client is still accepting responses
    pub fn is_connected(&self, client_id: Uuid) -> bool {
        !self.disconnected.read().contains(&client_id)
    }

    /// All responses sent so far
    pub fn sent(&self) -> Vec<SentResponse> {
        self.sent.lock().clone()
    }

    /// Drain the recorded responses
    pub fn take_sent(&self) -> Vec<SentResponse> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Payloads of one response kind sent to a client
    pub fn payloads(&self, client_id: Uuid, response: ServerResponse) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .iter()
            .filter(|r| r.client_id == client_id && r.response == response)
            .map(|r| r.payload.clone())
            .collect()
    }

    /// Number of cache rebuilds performed
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds.load(Ordering::Acquire)
    }
}

impl Publisher for MemoryPublisher {
    fn rebuild_signal_index_cache(
        &self,
        client_id: Uuid,
        cache: &SharedSignalIndexCache,
        requested: &[MeasurementKey],
    ) -> Result<()> {
        let rebuilt = {
            let authorized = self.authorized.read();
            SignalIndexCache::build(cache.load().subscriber_id(), requested, |signal_id| {
                authorized
                    .as_ref()
                    .map_or(true, |allowed| allowed.contains(signal_id))
            })?
        };

        let payload = rebuilt.to_bytes(self.client_encoding(client_id))?;
        let authorized = rebuilt.len();
        let generation = cache.store(rebuilt);
        self.rebuilds.fetch_add(1, Ordering::AcqRel);

        info!(
            "Rebuilt signal index cache for client {}: {} signals, generation {}",
            client_id, authorized, generation
        );

        self.send(
            client_id,
            ServerResponse::UpdateSignalIndexCache,
            ServerCommand::Subscribe,
            payload,
        )
    }

    fn send(
        &self,
        client_id: Uuid,
        response: ServerResponse,
        command: ServerCommand,
        payload: Vec<u8>,
    ) -> Result<()> {
        if !self.is_connected(client_id) {
            return Err(PublisherError::ClientNotFound(client_id));
        }
        self.sent.lock().push(SentResponse {
            client_id,
            response,
            command,
            payload,
        });
        Ok(())
    }

    fn client_encoding(&self, client_id: Uuid) -> TextEncoding {
        self.encodings
            .read()
            .get(&client_id)
            .copied()
            .unwrap_or_default()
    }
}
