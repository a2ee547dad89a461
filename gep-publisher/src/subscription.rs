// GEP Publisher - Per-client subscription pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Client subscription
//!
//! A [`ClientSubscription`] owns one client's view of the measurement
//! stream:
//! - the input filter (which signals the client receives)
//! - the client's signal index cache
//! - the negotiated measurement form
//! - packing measurements into size-bounded data packets
//!
//! # Publish modes
//!
//! A synchronized subscription hands filtered measurements to the
//! concentrator and publishes the frames it calls back with; every packet
//! carries one frame timestamp. An unsynchronized subscription publishes
//! each queued batch directly, with a time per measurement. When the
//! publisher enables base time offsets those times are sent as offsets from
//! a pair of base times that rotate as data time advances; each rotation is
//! announced with an `UpdateBaseTimes` response before the packets that
//! use it.
//!
//! # Lifecycle
//!
//! ```text
//! Created -> Initialized -> Running <-> Stopped -> Disposed
//! ```
//!
//! `queue_measurements` and `set_input_keys` may race freely: both take the
//! input lock, so every queued batch is filtered by exactly one key set.
//! `publish_frame` is driven sequentially by the concentrator and reads the
//! cache through a single snapshot per frame. Unsynchronized batches are
//! packed under the base time lock so rotations and packets stay ordered.

use crate::config::{SubscriptionConfig, SubscriptionSettings};
use crate::error::{PublisherError, Result};
use crate::filter::{signal_id_expression, FilterResolver};
use crate::frame::{Concentrator, Frame};
use crate::publisher::Publisher;
use crate::temporal::TemporalSession;
use gep::{
    BaseTimeOffsets, CompactCodec, CompactConfig, DataPacketFlags, MeasurementFormat, MeasurementKey,
    MeasurementRecord, PacketBuilder, ServerCommand, ServerResponse, SharedSignalIndexCache,
    SignalIndexCache, Ticks, TransportMetrics,
};
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Subscription lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Created,
    Initialized,
    Running,
    Stopped,
    Disposed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Created => write!(f, "created"),
            SubscriptionState::Initialized => write!(f, "initialized"),
            SubscriptionState::Running => write!(f, "running"),
            SubscriptionState::Stopped => write!(f, "stopped"),
            SubscriptionState::Disposed => write!(f, "disposed"),
        }
    }
}

/// How measurements reach the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Frames from the concentrator, one timestamp per packet
    Synchronized,
    /// Queued measurements published directly, each with its own time
    Unsynchronized {
        include_time: bool,
        use_millisecond_resolution: bool,
    },
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishMode::Synchronized => write!(f, "synchronized"),
            PublishMode::Unsynchronized { .. } => write!(f, "unsynchronized"),
        }
    }
}

/// Fields guarded together against concurrent enqueue
#[derive(Debug, Default)]
struct InputState {
    keys: Vec<MeasurementKey>,
    filter: HashSet<Uuid>,
    start_time_sent: bool,
}

impl InputState {
    fn replace_keys(&mut self, keys: Vec<MeasurementKey>) {
        self.filter = keys
            .iter()
            .filter(|key| !key.is_undefined())
            .map(|key| key.signal_id)
            .collect();
        self.keys = keys;
    }
}

struct Lifecycle {
    state: SubscriptionState,
    format: MeasurementFormat,
    mode: PublishMode,
    nan_filter: bool,
    temporal: Option<Arc<dyn TemporalSession>>,
}

/// One client's subscription
pub struct ClientSubscription {
    client_id: Uuid,
    subscriber_id: Uuid,
    config: SubscriptionConfig,
    publisher: RwLock<Option<Arc<dyn Publisher>>>,
    concentrator: Arc<dyn Concentrator>,
    resolver: Option<Arc<dyn FilterResolver>>,
    cache: Arc<SharedSignalIndexCache>,
    input: Mutex<InputState>,
    lifecycle: Mutex<Lifecycle>,
    base_times: Mutex<Option<BaseTimeOffsets>>,
    disposed: AtomicBool,
    metrics: Mutex<TransportMetrics>,
}

impl ClientSubscription {
    /// Create a new subscription for a connected client
    pub fn new(
        client_id: Uuid,
        subscriber_id: Uuid,
        publisher: Arc<dyn Publisher>,
        concentrator: Arc<dyn Concentrator>,
        config: SubscriptionConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            client_id,
            subscriber_id,
            config,
            publisher: RwLock::new(Some(publisher)),
            concentrator,
            resolver: None,
            cache: Arc::new(SharedSignalIndexCache::empty(subscriber_id)),
            input: Mutex::new(InputState::default()),
            lifecycle: Mutex::new(Lifecycle {
                state: SubscriptionState::Created,
                format: MeasurementFormat::compact(),
                mode: PublishMode::Synchronized,
                nan_filter: false,
                temporal: None,
            }),
            base_times: Mutex::new(None),
            disposed: AtomicBool::new(false),
            metrics: Mutex::new(TransportMetrics::new()),
        })
    }

    /// Attach a resolver for filter expressions
    pub fn with_resolver(mut self, resolver: Arc<dyn FilterResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Connection this subscription serves
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Subscriber identity sent with the signal index cache
    pub fn subscriber_id(&self) -> Uuid {
        self.subscriber_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SubscriptionState {
        self.lifecycle.lock().state
    }

    /// Check if the subscription was disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Check if measurements are sent in compact form
    pub fn is_compact(&self) -> bool {
        self.lifecycle.lock().format.is_compact()
    }

    /// Negotiated publish mode
    pub fn mode(&self) -> PublishMode {
        self.lifecycle.lock().mode
    }

    /// Base times in use, if offsets are enabled and established
    pub fn base_time_offsets(&self) -> Option<BaseTimeOffsets> {
        self.base_times
            .lock()
            .filter(BaseTimeOffsets::is_initialized)
    }

    /// The client's signal index cache
    pub fn signal_index_cache(&self) -> Arc<SharedSignalIndexCache> {
        Arc::clone(&self.cache)
    }

    /// Currently subscribed keys
    pub fn input_keys(&self) -> Vec<MeasurementKey> {
        self.input.lock().keys.clone()
    }

    /// Snapshot of the transport metrics
    pub fn metrics(&self) -> TransportMetrics {
        self.metrics.lock().clone()
    }

    fn parent(&self) -> Option<Arc<dyn Publisher>> {
        self.publisher.read().clone()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(PublisherError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Apply the client's connection string
    ///
    /// Picks the measurement form and resolves the initial input filter. A
    /// temporal session is attached only when a replay window was requested.
    pub fn initialize(&self, connection_string: &str) -> Result<()> {
        self.ensure_live()?;
        let settings = SubscriptionSettings::parse(connection_string)?;
        let publisher = self.parent().ok_or(PublisherError::Disposed)?;

        {
            let lifecycle = self.lifecycle.lock();
            if lifecycle.state != SubscriptionState::Created {
                return Err(PublisherError::InvalidState {
                    operation: "initialize",
                    state: lifecycle.state,
                });
            }
        }

        let format = if settings.use_compact_format {
            MeasurementFormat::compact()
        } else {
            MeasurementFormat::verbose(publisher.client_encoding(self.client_id))
        };
        let nan_filter = settings.request_nan_value_filter && self.config.allow_nan_value_filter;
        let mode = if settings.synchronized {
            PublishMode::Synchronized
        } else {
            PublishMode::Unsynchronized {
                include_time: settings.include_time,
                use_millisecond_resolution: settings.use_millisecond_resolution,
            }
        };
        let rotates_base_times = self.config.use_base_time_offsets
            && matches!(mode, PublishMode::Unsynchronized { include_time: true, .. });

        let temporal = if settings.temporal_constraint.is_defined() {
            let session = publisher.create_temporal_session(self.client_id, &settings.temporal_constraint)?;
            if let Some(interval) = settings.processing_interval {
                session.set_processing_interval(interval);
            }
            Some(session)
        } else {
            None
        };

        if let Some(expression) = settings.input_measurement_keys.as_deref() {
            let keys = match self.resolver.as_ref() {
                Some(resolver) => resolver.resolve(expression)?,
                None => {
                    if let Some(session) = temporal.as_ref() {
                        session.dispose();
                    }
                    return Err(PublisherError::InvalidConfig(
                        "input filter given but no filter resolver is attached".to_string(),
                    ));
                }
            };
            if let Err(err) = self.set_input_keys(Some(keys)) {
                if let Some(session) = temporal.as_ref() {
                    session.dispose();
                }
                return Err(err);
            }
        }

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.format = format;
        lifecycle.mode = mode;
        lifecycle.nan_filter = nan_filter;
        lifecycle.temporal = temporal;
        lifecycle.state = SubscriptionState::Initialized;
        *self.base_times.lock() = rotates_base_times.then(BaseTimeOffsets::default);

        info!(
            "Client {} subscription initialized: {}, {} form, {} keys{}",
            self.client_id,
            mode,
            if lifecycle.format.is_compact() { "compact" } else { "verbose" },
            self.input.lock().keys.len(),
            if lifecycle.temporal.is_some() { ", temporal" } else { "" }
        );

        Ok(())
    }

    /// Begin delivering data
    ///
    /// The next non-empty batch re-announces the data start time.
    pub fn start(&self) -> Result<()> {
        self.ensure_live()?;
        let mut lifecycle = self.lifecycle.lock();

        match lifecycle.state {
            SubscriptionState::Initialized | SubscriptionState::Stopped => {
                self.input.lock().start_time_sent = false;
                lifecycle.state = SubscriptionState::Running;
                info!("Client {} subscription started", self.client_id);
                Ok(())
            }
            SubscriptionState::Running => Ok(()),
            state => Err(PublisherError::InvalidState {
                operation: "start",
                state,
            }),
        }
    }

    /// Stop delivering data and release any temporal session
    ///
    /// Base times are forgotten; the next unsynchronized batch after a
    /// restart establishes new ones.
    pub fn stop(&self) -> Result<()> {
        self.ensure_live()?;
        let mut lifecycle = self.lifecycle.lock();

        if let Some(session) = lifecycle.temporal.take() {
            session.dispose();
        }
        if let Some(base) = self.base_times.lock().as_mut() {
            *base = BaseTimeOffsets::default();
        }
        if lifecycle.state == SubscriptionState::Running {
            lifecycle.state = SubscriptionState::Stopped;
            info!("Client {} subscription stopped", self.client_id);
        }
        Ok(())
    }

    /// Tear down the subscription
    ///
    /// Releases the temporal session and detaches from the publisher.
    /// Later publishes and enqueues do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let temporal = {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.state = SubscriptionState::Disposed;
            lifecycle.temporal.take()
        };
        if let Some(session) = temporal {
            session.dispose();
        }
        self.publisher.write().take();

        info!("Client {} subscription disposed", self.client_id);
    }

    /// Replace the subscribed signal set
    ///
    /// `None`, or a list holding only the undefined key, detaches the
    /// subscription without touching the cache. Any other list makes the
    /// publisher rebuild the cache; the subscribed keys are then re-derived
    /// from the signals the rebuilt cache authorized.
    pub fn set_input_keys(&self, keys: Option<Vec<MeasurementKey>>) -> Result<()> {
        self.ensure_live()?;
        let mut input = self.input.lock();

        let keys = match keys {
            Some(keys) if !(keys.len() == 1 && keys[0].is_undefined()) => keys,
            detach => {
                input.replace_keys(detach.unwrap_or_default());
                debug!("Client {} input detached", self.client_id);
                return Ok(());
            }
        };

        let publisher = self.parent().ok_or(PublisherError::Disposed)?;
        publisher.rebuild_signal_index_cache(self.client_id, &self.cache, &keys)?;

        let snapshot = self.cache.load();
        let authorized = match self.resolver.as_ref() {
            Some(resolver) => resolver.resolve(&signal_id_expression(&snapshot.authorized_signal_ids()))?,
            None => snapshot.authorized_keys(),
        };

        debug!(
            "Client {} input keys updated: {} requested, {} authorized",
            self.client_id,
            keys.len(),
            authorized.len()
        );
        input.replace_keys(authorized);
        Ok(())
    }

    /// Filter raw measurements and pass them on
    ///
    /// Synchronized subscriptions forward the accepted measurements to the
    /// concentrator; unsynchronized ones publish them immediately. Nothing
    /// is passed on unless the subscription is running. The first such
    /// batch after `start` announces its earliest timestamp to the client.
    /// Returns the number of measurements passed on.
    pub fn queue_measurements(&self, measurements: Vec<MeasurementRecord>) -> usize {
        if self.is_disposed() || measurements.is_empty() {
            return 0;
        }

        let (nan_filter, running, mode) = {
            let lifecycle = self.lifecycle.lock();
            (
                lifecycle.nan_filter,
                lifecycle.state == SubscriptionState::Running,
                lifecycle.mode,
            )
        };

        let total = measurements.len();
        let accepted: Vec<MeasurementRecord> = {
            let mut input = self.input.lock();

            let accepted: Vec<MeasurementRecord> = measurements
                .into_iter()
                .filter(|m| !(nan_filter && m.value.is_nan()))
                .filter(|m| input.filter.contains(&m.signal_id()))
                .collect();

            if running && !input.start_time_sent {
                if let Some(earliest) = accepted.iter().map(|m| m.timestamp).min() {
                    input.start_time_sent = true;
                    if let Some(publisher) = self.parent() {
                        match publisher.announce_data_start_time(self.client_id, earliest) {
                            Ok(()) => info!("Client {} data start time: {}", self.client_id, earliest),
                            Err(err) => warn!("Client {} data start time not sent: {}", self.client_id, err),
                        }
                    }
                }
            }

            accepted
        };

        self.metrics.lock().record_filtered(total - accepted.len());

        if !running || accepted.is_empty() {
            return 0;
        }

        let forwarded = accepted.len();
        match mode {
            PublishMode::Synchronized => {
                self.concentrator.sort_measurements(accepted);
                forwarded
            }
            PublishMode::Unsynchronized {
                include_time,
                use_millisecond_resolution,
            } => match self.publish_measurements(&accepted, include_time, use_millisecond_resolution) {
                Ok(_) => forwarded,
                Err(_) => 0,
            },
        }
    }

    /// Move the base times forward at `now`
    ///
    /// For publishers that rotate on a timer rather than on data time.
    /// Returns `false` when this subscription does not use base time
    /// offsets.
    pub fn rotate_base_times(&self, now: Ticks) -> Result<bool> {
        self.ensure_live()?;
        let publisher = self.parent().ok_or(PublisherError::Disposed)?;
        let use_millisecond_resolution = match self.mode() {
            PublishMode::Unsynchronized {
                use_millisecond_resolution,
                ..
            } => use_millisecond_resolution,
            PublishMode::Synchronized => return Ok(false),
        };

        let mut base_times = self.base_times.lock();
        match base_times.as_mut() {
            Some(base) => {
                self.send_base_times(publisher.as_ref(), base, now, use_millisecond_resolution)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn send_base_times(
        &self,
        publisher: &dyn Publisher,
        base: &mut BaseTimeOffsets,
        now: Ticks,
        use_millisecond_resolution: bool,
    ) -> Result<()> {
        let mut rotated = *base;
        rotated.rotate(now, BaseTimeOffsets::rotation_interval(use_millisecond_resolution));

        publisher.send(
            self.client_id,
            ServerResponse::UpdateBaseTimes,
            ServerCommand::Subscribe,
            rotated.to_bytes().to_vec(),
        )?;
        *base = rotated;

        debug!(
            "Client {} base times rotated: slot {} active, offsets {:?}",
            self.client_id, rotated.time_index, rotated.offsets
        );
        Ok(())
    }

    fn publish_measurements(
        &self,
        measurements: &[MeasurementRecord],
        include_time: bool,
        use_millisecond_resolution: bool,
    ) -> Result<usize> {
        if self.is_disposed() {
            return Ok(0);
        }
        let publisher = match self.parent() {
            Some(publisher) => publisher,
            None => return Ok(0),
        };

        let form = self.lifecycle.lock().format.clone();
        let cache = self.cache.load();
        let mut base_times = self.base_times.lock();

        let result = self.pack_batch(
            publisher.as_ref(),
            &form,
            &cache,
            measurements,
            &mut base_times,
            include_time,
            use_millisecond_resolution,
        );

        match result {
            Ok(packets) => {
                trace!(
                    "Client {}: {} measurements in {} unsynchronized packets",
                    self.client_id,
                    measurements.len(),
                    packets
                );
                Ok(packets)
            }
            Err(err) => {
                warn!(
                    "Client {}: {} measurements not published: {}",
                    self.client_id,
                    measurements.len(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Rotate base times if the batch has reached the next slot, then pack
    /// the batch against whichever base is active
    #[allow(clippy::too_many_arguments)]
    fn pack_batch(
        &self,
        publisher: &dyn Publisher,
        form: &MeasurementFormat,
        cache: &SignalIndexCache,
        measurements: &[MeasurementRecord],
        base_times: &mut Option<BaseTimeOffsets>,
        include_time: bool,
        use_millisecond_resolution: bool,
    ) -> Result<usize> {
        if let Some(base) = base_times.as_mut() {
            let earliest = measurements.iter().map(|m| m.timestamp).min();
            let latest = measurements.iter().map(|m| m.timestamp).max();
            if let (Some(earliest), Some(latest)) = (earliest, latest) {
                if base.is_due(latest) {
                    let now = if base.is_initialized() { latest } else { earliest };
                    if let Err(err) = self.send_base_times(publisher, base, now, use_millisecond_resolution) {
                        self.metrics.lock().record_frame(false);
                        return Err(err);
                    }
                }
            }
        }

        let mut config = match base_times.filter(BaseTimeOffsets::is_initialized) {
            Some(base) => CompactConfig::with_base_time_offsets(
                base.offsets,
                base.time_index,
                use_millisecond_resolution,
            ),
            None => CompactConfig {
                use_millisecond_resolution,
                ..Default::default()
            },
        };
        config.include_time = include_time;

        let format = if form.is_compact() {
            MeasurementFormat::Compact(CompactCodec::new(config))
        } else {
            form.clone()
        };
        let builder = PacketBuilder::new(format.packet_flags(), 0, self.config.max_packet_size);

        let mut metrics = self.metrics.lock();
        let packed = self.pack(publisher, &format, cache, measurements, builder, &mut metrics);
        metrics.record_frame(packed.is_ok());
        packed
    }

    /// Serialize one frame into data packets and send them
    ///
    /// Packets never exceed the configured maximum size, and at least one
    /// packet (possibly empty) is sent per call. A codec error abandons the
    /// packet being built and is returned; packets already sent for the
    /// frame stay sent. Returns the number of packets sent.
    pub fn publish_frame(&self, frame: &Frame, index: usize) -> Result<usize> {
        if self.is_disposed() {
            return Ok(0);
        }
        let publisher = match self.parent() {
            Some(publisher) => publisher,
            None => return Ok(0),
        };

        let format = self.lifecycle.lock().format.clone();
        let cache = self.cache.load();
        let mut metrics = self.metrics.lock();

        let builder = PacketBuilder::synchronized(format.packet_flags(), frame.timestamp, self.config.max_packet_size);
        let result = self.pack(publisher.as_ref(), &format, &cache, &frame.measurements, builder, &mut metrics);
        metrics.record_frame(result.is_ok());

        match result {
            Ok(packets) => {
                trace!(
                    "Client {} frame {} at {}: {} measurements in {} packets",
                    self.client_id,
                    index,
                    frame.timestamp,
                    frame.len(),
                    packets
                );
                Ok(packets)
            }
            Err(err) => {
                warn!(
                    "Client {} frame {} at {} not published: {}",
                    self.client_id, index, frame.timestamp, err
                );
                Err(err)
            }
        }
    }

    /// Pack measurements into packets, flushing whenever one is full
    ///
    /// A synchronized builder always sends a final packet, even an empty
    /// one; an unsynchronized builder only sends packets that hold data.
    fn pack(
        &self,
        publisher: &dyn Publisher,
        format: &MeasurementFormat,
        cache: &SignalIndexCache,
        measurements: &[MeasurementRecord],
        mut builder: PacketBuilder,
        metrics: &mut TransportMetrics,
    ) -> Result<usize> {
        let max = self.config.max_packet_size;
        let timed = !builder.flags().contains(DataPacketFlags::SYNCHRONIZED);
        let mut packets = 0;

        for measurement in measurements {
            let prepared = format.prepare(measurement, cache)?;
            let length = prepared.binary_length();

            if !builder.fits_empty(length) {
                return Err(PublisherError::MeasurementTooLarge {
                    size: builder.header_size() + length,
                    max,
                });
            }

            if !builder.try_add(&prepared) {
                self.send_packet(publisher, &mut builder, metrics)?;
                packets += 1;
                builder.try_add(&prepared);
            }

            if timed {
                if let Some(time) = prepared.time_encoding() {
                    metrics.record_time_encoding(time.kind());
                }
            }
        }

        if !timed || !builder.is_empty() {
            self.send_packet(publisher, &mut builder, metrics)?;
            packets += 1;
        }
        Ok(packets)
    }

    fn send_packet(
        &self,
        publisher: &dyn Publisher,
        builder: &mut PacketBuilder,
        metrics: &mut TransportMetrics,
    ) -> Result<()> {
        let count = builder.count();
        let packet = builder.take();
        let size = packet.len();

        publisher.send(
            self.client_id,
            ServerResponse::DataPacket,
            ServerCommand::Subscribe,
            packet,
        )?;
        metrics.record_packet(size, count, self.config.max_packet_size);
        Ok(())
    }

    /// Human-readable status
    pub fn status(&self) -> String {
        let (state, mode, compact, temporal) = {
            let lifecycle = self.lifecycle.lock();
            (
                lifecycle.state,
                lifecycle.mode,
                lifecycle.format.is_compact(),
                lifecycle.temporal.as_ref().map(|session| session.status()),
            )
        };
        let keys = self.input.lock().keys.len();
        let metrics = self.metrics.lock().clone();

        let mut status = format!(
            "Client {} ({}, {}): {} keys, {} form, cache generation {}\n{}",
            self.client_id,
            state,
            mode,
            keys,
            if compact { "compact" } else { "verbose" },
            self.cache.generation(),
            metrics.summary()
        );
        if let Some(temporal) = temporal {
            status.push_str("\nTemporal session: ");
            status.push_str(&temporal);
        }
        status
    }
}

impl Drop for ClientSubscription {
    fn drop(&mut self) {
        self.dispose();
    }
}
