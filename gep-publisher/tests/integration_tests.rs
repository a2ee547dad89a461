// GEP Publisher - Integration Tests
//
// These tests drive ClientSubscription end to end through MemoryPublisher.
// The tests are organized into categories:
// 1. Packet packing
// 2. Error handling
// 3. Data start time
// 4. Input filtering
// 5. Client decoding
// 6. Unsynchronized publishing

use gep::{
    BaseTimeOffsets, CompactConfig, DataPacket, MeasurementFormat, MeasurementKey,
    MeasurementRecord, MeasurementStateFlags, ServerResponse, TextEncoding, Ticks,
    TimeEncodingKind, SYNCHRONIZED_HEADER_SIZE, TICKS_PER_MILLISECOND, TICKS_PER_SECOND,
};
use gep_publisher::{
    ClientSubscription, Concentrator, Frame, MemoryPublisher, MetadataResolver, PublisherError,
    SubscriptionConfig, SubscriptionState,
};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

#[derive(Default)]
struct Collector {
    batches: Mutex<Vec<Vec<MeasurementRecord>>>,
}

impl Concentrator for Collector {
    fn sort_measurements(&self, measurements: Vec<MeasurementRecord>) {
        self.batches.lock().push(measurements);
    }
}

struct Harness {
    subscription: Arc<ClientSubscription>,
    publisher: Arc<MemoryPublisher>,
    collector: Arc<Collector>,
    keys: Vec<MeasurementKey>,
}

impl Harness {
    fn new(signals: u32, config: SubscriptionConfig, connection_string: &str) -> Self {
        let keys: Vec<MeasurementKey> = (0..signals)
            .map(|i| MeasurementKey::new(Uuid::new_v4(), "SHELBY", i + 1))
            .collect();
        Self::with_keys(keys, config, connection_string)
    }

    fn with_keys(keys: Vec<MeasurementKey>, config: SubscriptionConfig, connection_string: &str) -> Self {
        let publisher = Arc::new(MemoryPublisher::new());
        let collector = Arc::new(Collector::default());
        let subscription = ClientSubscription::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            publisher.clone(),
            collector.clone(),
            config,
        )
        .unwrap()
        .with_resolver(Arc::new(MetadataResolver::from_keys(keys.clone())));

        subscription.initialize(connection_string).unwrap();
        subscription.set_input_keys(Some(keys.clone())).unwrap();
        subscription.start().unwrap();

        Self {
            subscription: Arc::new(subscription),
            publisher,
            collector,
            keys,
        }
    }

    fn frame(&self, timestamp: i64) -> Frame {
        let mut rng = rand::thread_rng();
        Frame::with_measurements(
            timestamp,
            self.keys
                .iter()
                .map(|key| MeasurementRecord::new(key.clone(), rng.gen_range(-1000.0..1000.0), timestamp))
                .collect(),
        )
    }

    fn data_packets(&self) -> Vec<Vec<u8>> {
        self.publisher
            .payloads(self.subscription.client_id(), ServerResponse::DataPacket)
    }
}

// ============================================================================
// Packet Packing Tests
// ============================================================================

#[test]
fn test_packets_respect_max_size() {
    for max in [28, 64, 100, 257, 1000] {
        let harness = Harness::new(120, SubscriptionConfig::with_max_packet_size(max), "");
        let packets = harness.subscription.publish_frame(&harness.frame(1_000), 0).unwrap();

        let sent = harness.data_packets();
        assert_eq!(sent.len(), packets);
        assert!(sent.iter().all(|p| p.len() <= max), "packet over {} bytes", max);
        assert!(sent.iter().all(|p| p.len() > SYNCHRONIZED_HEADER_SIZE));
    }
}

#[test]
fn test_packet_bodies_concatenate_to_frame() {
    let harness = Harness::new(50, SubscriptionConfig::with_max_packet_size(100), "");
    let frame = harness.frame(5_000);
    harness.subscription.publish_frame(&frame, 0).unwrap();

    let cache = harness.subscription.signal_index_cache().load();
    let format = MeasurementFormat::compact();
    let mut expected = Vec::new();
    for measurement in &frame.measurements {
        format.prepare(measurement, &cache).unwrap().write_to(&mut expected);
    }

    let mut bodies = Vec::new();
    let mut counted = 0u32;
    for packet in harness.data_packets() {
        assert_eq!(packet[0], 0x03);
        assert_eq!(i64::from_be_bytes(packet[1..9].try_into().unwrap()), 5_000);
        counted += u32::from_be_bytes(packet[9..13].try_into().unwrap());
        bodies.extend_from_slice(&packet[SYNCHRONIZED_HEADER_SIZE..]);
    }

    assert_eq!(counted, 50);
    assert_eq!(bodies, expected);
}

#[test]
fn test_verbose_packets_with_random_sources() {
    let mut rng = rand::thread_rng();

    for max in [160, 200, 300, 1000] {
        let keys: Vec<MeasurementKey> = (0..80)
            .map(|i| {
                let length = rng.gen_range(0..=40);
                let source: String = (0..length).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect();
                MeasurementKey::new(Uuid::new_v4(), source, i + 1)
            })
            .collect();
        let harness = Harness::with_keys(
            keys,
            SubscriptionConfig::with_max_packet_size(max),
            "useCompactMeasurementFormat=false",
        );
        let frame = harness.frame(rng.gen_range(1..1_000_000));
        harness.subscription.publish_frame(&frame, 0).unwrap();

        let cache = harness.subscription.signal_index_cache().load();
        let format = MeasurementFormat::verbose(TextEncoding::Unicode);
        let mut expected = Vec::new();
        for measurement in &frame.measurements {
            format.prepare(measurement, &cache).unwrap().write_to(&mut expected);
        }

        let mut bodies = Vec::new();
        let mut counted = 0u32;
        for packet in harness.data_packets() {
            assert!(packet.len() <= max, "{} byte packet over {}", packet.len(), max);
            assert_eq!(packet[0], 0x01);
            counted += u32::from_be_bytes(packet[9..13].try_into().unwrap());
            bodies.extend_from_slice(&packet[SYNCHRONIZED_HEADER_SIZE..]);
        }

        assert_eq!(counted, 80);
        assert_eq!(bodies, expected);
    }
}

#[test]
fn test_empty_frame_sends_one_packet() {
    let harness = Harness::new(4, SubscriptionConfig::default(), "");
    assert_eq!(harness.subscription.publish_frame(&Frame::new(77), 9).unwrap(), 1);

    let sent = harness.data_packets();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].len(), SYNCHRONIZED_HEADER_SIZE);
    assert_eq!(&sent[0][9..13], &[0, 0, 0, 0]);
}

#[test]
fn test_metrics_follow_packets() {
    let harness = Harness::new(30, SubscriptionConfig::with_max_packet_size(60), "");
    for i in 0..4 {
        harness.subscription.publish_frame(&harness.frame(i), i as usize).unwrap();
    }

    let metrics = harness.subscription.metrics();
    let sent = harness.data_packets();
    assert_eq!(metrics.frames_published, 4);
    assert_eq!(metrics.packets_sent, sent.len() as u64);
    assert_eq!(metrics.measurements_sent, 120);
    assert_eq!(metrics.bytes_sent, sent.iter().map(|p| p.len() as u64).sum::<u64>());
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[test]
fn test_unknown_signal_sends_no_partial_packet() {
    let harness = Harness::new(3, SubscriptionConfig::default(), "");
    let mut frame = harness.frame(10);
    frame.push(MeasurementRecord::new(MeasurementKey::new(Uuid::new_v4(), "ELSEWHERE", 1), 1.0, 10));

    let result = harness.subscription.publish_frame(&frame, 0);
    assert!(matches!(result, Err(PublisherError::Codec(_))));
    assert!(harness.data_packets().is_empty());
    assert_eq!(harness.subscription.metrics().failed_frames, 1);
}

#[test]
fn test_disposed_subscription_is_silent() {
    let harness = Harness::new(3, SubscriptionConfig::default(), "");
    harness.subscription.dispose();
    harness.publisher.take_sent();

    assert_eq!(harness.subscription.state(), SubscriptionState::Disposed);
    assert_eq!(harness.subscription.publish_frame(&harness.frame(1), 0).unwrap(), 0);
    assert_eq!(harness.subscription.queue_measurements(harness.frame(1).measurements), 0);
    assert!(harness.publisher.sent().is_empty());
    assert!(harness.collector.batches.lock().is_empty());
}

// ============================================================================
// Data Start Time Tests
// ============================================================================

#[test]
fn test_start_time_announced_before_data() {
    let harness = Harness::new(5, SubscriptionConfig::default(), "");
    let mut batch = harness.frame(2_000).measurements;
    batch[3].timestamp = 1_500;

    harness.subscription.queue_measurements(batch);
    harness.subscription.queue_measurements(harness.frame(3_000).measurements);
    harness.subscription.publish_frame(&harness.frame(2_000), 0).unwrap();

    let sent = harness.publisher.sent();
    let announcements: Vec<_> = sent
        .iter()
        .enumerate()
        .filter(|(_, r)| r.response == ServerResponse::DataStartTime)
        .collect();
    assert_eq!(announcements.len(), 1);
    assert_eq!(announcements[0].1.payload, 1_500i64.to_be_bytes().to_vec());

    let first_data = sent
        .iter()
        .position(|r| r.response == ServerResponse::DataPacket)
        .unwrap();
    assert!(announcements[0].0 < first_data);
}

#[test]
fn test_start_time_waits_for_start() {
    let keys: Vec<MeasurementKey> = (1..=3)
        .map(|i| MeasurementKey::new(Uuid::new_v4(), "SHELBY", i))
        .collect();
    let publisher = Arc::new(MemoryPublisher::new());
    let collector = Arc::new(Collector::default());
    let subscription = ClientSubscription::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        publisher.clone(),
        collector.clone(),
        SubscriptionConfig::default(),
    )
    .unwrap();
    subscription.initialize("").unwrap();
    subscription.set_input_keys(Some(keys.clone())).unwrap();

    let batch = |t| keys.iter().map(|k| MeasurementRecord::new(k.clone(), 1.0, t)).collect();
    assert_eq!(subscription.queue_measurements(batch(100)), 0);
    assert!(publisher
        .payloads(subscription.client_id(), ServerResponse::DataStartTime)
        .is_empty());

    subscription.start().unwrap();
    assert_eq!(subscription.queue_measurements(batch(200)), 3);
    assert_eq!(
        publisher.payloads(subscription.client_id(), ServerResponse::DataStartTime),
        vec![200i64.to_be_bytes().to_vec()]
    );
    assert_eq!(collector.batches.lock().len(), 1);
}

// ============================================================================
// Input Filtering Tests
// ============================================================================

#[test]
fn test_filter_expression_selects_keys() {
    let keys: Vec<MeasurementKey> = (1..=4)
        .map(|i| MeasurementKey::new(Uuid::new_v4(), if i % 2 == 0 { "EVEN" } else { "ODD" }, i))
        .collect();
    let publisher = Arc::new(MemoryPublisher::new());
    let subscription = ClientSubscription::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        publisher.clone(),
        Arc::new(Collector::default()),
        SubscriptionConfig::default(),
    )
    .unwrap()
    .with_resolver(Arc::new(MetadataResolver::from_keys(keys.clone())));

    subscription
        .initialize("inputMeasurementKeys={EVEN; ODD:3}")
        .unwrap();

    assert_eq!(
        subscription.input_keys(),
        vec![keys[1].clone(), keys[3].clone(), keys[2].clone()]
    );
    assert_eq!(
        publisher
            .payloads(subscription.client_id(), ServerResponse::UpdateSignalIndexCache)
            .len(),
        1
    );
}

#[test]
fn test_unauthorized_keys_dropped() {
    let harness = Harness::new(4, SubscriptionConfig::default(), "");
    harness
        .publisher
        .set_authorized([harness.keys[0].signal_id, harness.keys[1].signal_id]);
    harness
        .subscription
        .set_input_keys(Some(harness.keys.clone()))
        .unwrap();

    assert_eq!(harness.subscription.input_keys(), harness.keys[..2].to_vec());
    assert_eq!(
        harness.subscription.queue_measurements(harness.frame(1).measurements),
        2
    );
}

#[test]
fn test_filter_swap_is_atomic_per_batch() {
    let harness = Harness::new(8, SubscriptionConfig::default(), "");
    let (left, right) = harness.keys.split_at(4);
    let left = left.to_vec();
    let right = right.to_vec();

    let subscription = harness.subscription.clone();
    let swapper = {
        let left = left.clone();
        let right = right.clone();
        thread::spawn(move || {
            for i in 0..200 {
                let keys = if i % 2 == 0 { left.clone() } else { right.clone() };
                subscription.set_input_keys(Some(keys)).unwrap();
            }
        })
    };

    let subscription = harness.subscription.clone();
    let all = harness.keys.clone();
    let producer = thread::spawn(move || {
        for t in 0..500 {
            let batch = all
                .iter()
                .map(|key| MeasurementRecord::new(key.clone(), 1.0, t))
                .collect();
            subscription.queue_measurements(batch);
        }
    });

    swapper.join().unwrap();
    producer.join().unwrap();

    let left_ids: Vec<Uuid> = left.iter().map(|k| k.signal_id).collect();
    let right_ids: Vec<Uuid> = right.iter().map(|k| k.signal_id).collect();
    for batch in harness.collector.batches.lock().iter() {
        let ids: Vec<Uuid> = batch.iter().map(|m| m.signal_id()).collect();
        assert!(
            ids == left_ids || ids == right_ids || ids == [left_ids.clone(), right_ids.clone()].concat(),
            "batch mixed two key sets: {:?}",
            ids
        );
    }
}

// ============================================================================
// Client Decoding Tests
// ============================================================================

#[test]
fn test_client_decodes_compact_frame() {
    let harness = Harness::new(40, SubscriptionConfig::with_max_packet_size(128), "");
    let frame = harness.frame(638_000_000_000_000_000);
    harness.subscription.publish_frame(&frame, 0).unwrap();

    let cache = harness.subscription.signal_index_cache().load();
    let mut decoded = Vec::new();
    for packet in harness.data_packets() {
        let parsed = DataPacket::parse(&packet, &CompactConfig::default(), TextEncoding::Unicode, &cache).unwrap();
        decoded.extend(parsed.measurements);
    }

    assert_eq!(decoded.len(), frame.len());
    for (original, received) in frame.measurements.iter().zip(&decoded) {
        assert_eq!(received.key, original.key);
        assert_eq!(received.timestamp, frame.timestamp);
        approx::assert_relative_eq!(received.value, original.value as f32 as f64);
    }
}

#[test]
fn test_client_decodes_verbose_frame() {
    let harness = Harness::new(6, SubscriptionConfig::with_max_packet_size(300), "useCompactMeasurementFormat=false");
    harness
        .publisher
        .set_client_encoding(harness.subscription.client_id(), TextEncoding::Unicode);

    let mut frame = harness.frame(123_456);
    frame.measurements[2] = frame.measurements[2]
        .clone()
        .with_scaling(10.0, 2.0)
        .with_state_flags(MeasurementStateFlags::BAD_DATA);
    harness.subscription.publish_frame(&frame, 0).unwrap();

    let cache = harness.subscription.signal_index_cache().load();
    let mut decoded = Vec::new();
    for packet in harness.data_packets() {
        assert!(packet.len() <= 300);
        let parsed = DataPacket::parse(&packet, &CompactConfig::default(), TextEncoding::Unicode, &cache).unwrap();
        decoded.extend(parsed.measurements);
    }

    assert_eq!(decoded, frame.measurements);
}

// ============================================================================
// Unsynchronized Publishing Tests
// ============================================================================

const EPOCH: Ticks = 638_000_000_000_000_000;

/// Replays everything the publisher sent, the way a subscriber would:
/// base time updates change the decoding configuration for the packets
/// that follow them.
fn decode_unsynchronized(
    harness: &Harness,
    use_millisecond_resolution: bool,
    include_time: bool,
) -> (Vec<MeasurementRecord>, Vec<Vec<u8>>, usize) {
    let cache = harness.subscription.signal_index_cache().load();
    let client = harness.subscription.client_id();
    let mut config = CompactConfig {
        include_time,
        use_millisecond_resolution,
        ..Default::default()
    };
    let mut decoded = Vec::new();
    let mut packets = Vec::new();
    let mut rotations = 0;

    for response in harness.publisher.sent() {
        assert_eq!(response.client_id, client);
        match response.response {
            ServerResponse::UpdateBaseTimes => {
                let base = BaseTimeOffsets::from_bytes(&response.payload).unwrap();
                config = CompactConfig::with_base_time_offsets(
                    base.offsets,
                    base.time_index,
                    use_millisecond_resolution,
                );
                rotations += 1;
            }
            ServerResponse::DataPacket => {
                let parsed = DataPacket::parse(&response.payload, &config, TextEncoding::Unicode, &cache).unwrap();
                assert_eq!(parsed.timestamp, None);
                decoded.extend(parsed.measurements);
                packets.push(response.payload);
            }
            _ => {}
        }
    }

    (decoded, packets, rotations)
}

fn timed_batch(harness: &Harness, timestamp: Ticks, step: Ticks) -> Vec<MeasurementRecord> {
    harness
        .keys
        .iter()
        .enumerate()
        .map(|(i, key)| MeasurementRecord::new(key.clone(), i as f64 * 0.5, timestamp + i as i64 * step))
        .collect()
}

#[test]
fn test_client_decodes_across_base_time_rotation() {
    let config = SubscriptionConfig {
        use_base_time_offsets: true,
        max_packet_size: 64,
        ..Default::default()
    };
    let harness = Harness::new(10, config, "synchronized=false; useMillisecondResolution=true");
    harness.publisher.take_sent();

    let mut queued = Vec::new();
    for k in 0..16 {
        let batch = timed_batch(&harness, EPOCH + k * 20 * TICKS_PER_SECOND, TICKS_PER_MILLISECOND);
        queued.extend(batch.clone());
        assert_eq!(harness.subscription.queue_measurements(batch), 10);
    }

    assert!(harness.collector.batches.lock().is_empty());

    let (decoded, packets, rotations) = decode_unsynchronized(&harness, true, true);
    assert!(rotations >= 4, "only {} base time updates", rotations);
    assert_eq!(decoded.len(), queued.len());
    for (original, received) in queued.iter().zip(&decoded) {
        assert_eq!(received.key, original.key);
        assert_eq!(received.timestamp, original.timestamp);
        approx::assert_relative_eq!(received.value, original.value);
    }

    for packet in &packets {
        assert!(packet.len() <= 64);
        assert_eq!(packet[0], 0x02);
        let count = u32::from_be_bytes(packet[1..5].try_into().unwrap()) as usize;
        assert!(count > 0);
    }
    let body: usize = packets.iter().map(|p| p.len() - 5).sum();
    assert!(body < queued.len() * 15, "no measurement used a base offset");

    let metrics = harness.subscription.metrics();
    assert_eq!(metrics.frames_published, 16);
    assert!(!metrics.time_encoding_distribution.is_empty());
}

#[test]
fn test_client_decodes_tick_offsets() {
    let config = SubscriptionConfig {
        use_base_time_offsets: true,
        ..Default::default()
    };
    let harness = Harness::new(6, config, "synchronized=false");
    harness.publisher.take_sent();

    let mut queued = Vec::new();
    for k in 0..5 {
        let batch = timed_batch(&harness, EPOCH + k * 200 * TICKS_PER_SECOND, 7);
        queued.extend(batch.clone());
        harness.subscription.queue_measurements(batch);
    }

    let (decoded, packets, rotations) = decode_unsynchronized(&harness, false, true);
    assert!(rotations >= 2);
    assert_eq!(
        decoded.iter().map(|m| m.timestamp).collect::<Vec<_>>(),
        queued.iter().map(|m| m.timestamp).collect::<Vec<_>>()
    );
    let body: usize = packets.iter().map(|p| p.len() - 5).sum();
    assert!(body < queued.len() * 15);
}

#[test]
fn test_unsynchronized_without_base_times_sends_full_times() {
    let harness = Harness::new(4, SubscriptionConfig::default(), "synchronized=false");
    harness.publisher.take_sent();

    let batch = timed_batch(&harness, EPOCH, TICKS_PER_MILLISECOND);
    harness.subscription.queue_measurements(batch.clone());

    let (decoded, packets, rotations) = decode_unsynchronized(&harness, false, true);
    assert_eq!(rotations, 0);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].len(), 5 + 4 * 15);
    assert_eq!(decoded.iter().map(|m| m.timestamp).collect::<Vec<_>>(), batch.iter().map(|m| m.timestamp).collect::<Vec<_>>());
}

#[test]
fn test_unsynchronized_without_time() {
    let config = SubscriptionConfig {
        use_base_time_offsets: true,
        ..Default::default()
    };
    let harness = Harness::new(4, config, "synchronized=false; includeTime=false");
    harness.publisher.take_sent();

    harness
        .subscription
        .queue_measurements(timed_batch(&harness, EPOCH, TICKS_PER_MILLISECOND));

    let (decoded, packets, rotations) = decode_unsynchronized(&harness, false, false);
    assert_eq!(rotations, 0);
    assert_eq!(packets[0].len(), 5 + 4 * 7);
    assert!(decoded.iter().all(|m| m.timestamp == 0));
    assert_eq!(
        harness.subscription.metrics().time_encoding_distribution[&TimeEncodingKind::Omitted],
        4
    );
}
