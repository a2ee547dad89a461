//! Codec tests over randomized measurements
//!
//! Every record is encoded, its length checked against the length query and
//! then decoded back.

use gep::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

const BASE: Ticks = 638_000_000_000_000_000;

fn random_keys(rng: &mut StdRng, count: usize) -> Vec<MeasurementKey> {
    let sources = ["PPA", "SHELBY", "ÄLMHULT", "变电站"];
    (0..count)
        .map(|i| {
            MeasurementKey::new(
                Uuid::from_u128(rng.gen()),
                sources[rng.gen_range(0..sources.len())],
                i as u32 + 1,
            )
        })
        .collect()
}

fn random_record(rng: &mut StdRng, keys: &[MeasurementKey], base: Ticks) -> MeasurementRecord {
    let key = keys[rng.gen_range(0..keys.len())].clone();
    let timestamp = match rng.gen_range(0..4) {
        0 => base - rng.gen_range(0..TICKS_PER_SECOND),
        1 => base + rng.gen_range(1..TICKS_PER_SECOND),
        2 => base + rng.gen_range(0..(1i64 << 33)),
        _ => base + rng.gen_range(0..120 * TICKS_PER_SECOND),
    };
    MeasurementRecord::new(key, rng.gen_range(-1.0e6..1.0e6), timestamp)
        .with_state_flags(MeasurementStateFlags(rng.gen()))
}

#[test]
fn test_compact_random_round_trip() {
    let mut rng = StdRng::seed_from_u64(0x6e70);
    let keys = random_keys(&mut rng, 64);
    let cache = SignalIndexCache::build(Uuid::new_v4(), &keys, |_| true).unwrap();

    for _ in 0..200 {
        let time_index = rng.gen_range(0..2);
        let use_ms = rng.gen_bool(0.5);
        let config = CompactConfig::with_base_time_offsets([BASE, BASE + 60 * TICKS_PER_SECOND], time_index, use_ms);
        let codec = CompactCodec::new(config.clone());
        let base = config.active_base_time();

        for _ in 0..50 {
            let record = random_record(&mut rng, &keys, base);

            let mut buf = Vec::new();
            let written = codec.encode(&record, &cache, &mut buf).unwrap();
            assert_eq!(written, codec.binary_length(&record));
            assert!((compact::FIXED_LENGTH..=compact::MAX_LENGTH).contains(&written));

            let (decoded, used) = codec.decode(&buf, &cache).unwrap();
            assert_eq!(used, written);
            assert_eq!(decoded.key, record.key);
            assert_eq!(decoded.value, record.value as f32 as f64);
            assert_eq!(
                decoded.state_flags,
                record.state_flags.to_compact().to_full()
            );

            match codec.plan(record.timestamp) {
                TimeEncoding::MillisecondOffset(_) => {
                    assert!(decoded.timestamp <= record.timestamp);
                    assert!(record.timestamp - decoded.timestamp < TICKS_PER_MILLISECOND);
                }
                _ => assert_eq!(decoded.timestamp, record.timestamp),
            }
        }
    }
}

#[test]
fn test_compact_slice_encoding_matches_vec() {
    let mut rng = StdRng::seed_from_u64(7);
    let keys = random_keys(&mut rng, 8);
    let cache = SignalIndexCache::build(Uuid::new_v4(), &keys, |_| true).unwrap();
    let codec = CompactCodec::new(CompactConfig::with_base_time_offsets([BASE, 0], 0, false));

    for _ in 0..100 {
        let record = random_record(&mut rng, &keys, BASE);
        let mut expected = Vec::new();
        let length = codec.encode(&record, &cache, &mut expected).unwrap();

        let mut buffer = vec![0xAAu8; 3 + length];
        assert_eq!(codec.encode_to_slice(&record, &cache, &mut buffer, 3).unwrap(), length);
        assert_eq!(&buffer[3..], &expected[..]);
        assert_eq!(&buffer[..3], &[0xAA; 3]);

        assert!(codec.encode_to_slice(&record, &cache, &mut buffer, 4).is_err());

        let (decoded, used) = codec.decode_at(&buffer, 3, length, &cache).unwrap();
        assert_eq!(used, length);
        assert_eq!(decoded.key, record.key);
    }
}

#[test]
fn test_verbose_random_round_trip() {
    let mut rng = StdRng::seed_from_u64(42);
    let keys = random_keys(&mut rng, 16);
    let cache = SignalIndexCache::default();

    for encoding in [
        TextEncoding::Unicode,
        TextEncoding::BigEndianUnicode,
        TextEncoding::Utf8,
    ] {
        let codec = VerboseCodec::new(encoding);
        for _ in 0..200 {
            let record = random_record(&mut rng, &keys, BASE).with_scaling(rng.gen(), rng.gen());

            let mut buf = Vec::new();
            let written = codec.encode(&record, &cache, &mut buf).unwrap();
            assert_eq!(written, codec.binary_length(&record));

            let (decoded, used) = codec.decode(&buf, &cache).unwrap();
            assert_eq!(used, written);
            assert_eq!(decoded, record);
        }
    }
}

#[test]
fn test_cache_serialization_random() {
    let mut rng = StdRng::seed_from_u64(99);

    for count in [0usize, 1, 17, 300] {
        let keys = random_keys(&mut rng, count);
        let denied: Vec<Uuid> = keys
            .iter()
            .filter(|_| rng.gen_bool(0.2))
            .map(|k| k.signal_id)
            .collect();
        let cache = SignalIndexCache::build(Uuid::new_v4(), &keys, |id| !denied.contains(id)).unwrap();
        assert_eq!(cache.len() + cache.unauthorized_signal_ids().len(), count);

        for encoding in [TextEncoding::Unicode, TextEncoding::Utf8] {
            let bytes = cache.to_bytes(encoding).unwrap();
            let parsed = SignalIndexCache::from_bytes(&bytes, encoding).unwrap();
            assert_eq!(parsed, cache);
        }
    }
}

#[test]
fn test_unsynchronized_packet_carries_times() {
    let mut rng = StdRng::seed_from_u64(5);
    let keys = random_keys(&mut rng, 10);
    let cache = SignalIndexCache::build(Uuid::new_v4(), &keys, |_| true).unwrap();
    let format = MeasurementFormat::Compact(CompactCodec::new(CompactConfig::default()));

    let records: Vec<MeasurementRecord> = (0..20).map(|_| random_record(&mut rng, &keys, BASE)).collect();
    let mut builder = PacketBuilder::new(format.packet_flags(), 0, MAX_PACKET_SIZE);
    for record in &records {
        assert!(builder.try_add(&format.prepare(record, &cache).unwrap()));
    }
    let packet = builder.take();
    assert!(builder.is_empty());

    let parsed = DataPacket::parse(&packet, &CompactConfig::default(), TextEncoding::Unicode, &cache).unwrap();
    assert_eq!(parsed.timestamp, None);
    let times: Vec<Ticks> = parsed.measurements.iter().map(|m| m.timestamp).collect();
    let expected: Vec<Ticks> = records.iter().map(|m| m.timestamp).collect();
    assert_eq!(times, expected);
}

#[test]
fn test_truncated_packet_rejected() {
    let mut rng = StdRng::seed_from_u64(11);
    let keys = random_keys(&mut rng, 4);
    let cache = SignalIndexCache::build(Uuid::new_v4(), &keys, |_| true).unwrap();
    let format = MeasurementFormat::compact();

    let mut builder = PacketBuilder::synchronized(format.packet_flags(), BASE, MAX_PACKET_SIZE);
    for key in &keys {
        let record = MeasurementRecord::new(key.clone(), 1.0, BASE);
        assert!(builder.try_add(&format.prepare(&record, &cache).unwrap()));
    }
    let packet = builder.take();

    for cut in [1, 5, packet.len() - 1] {
        let result = DataPacket::parse(&packet[..cut], &CompactConfig::default(), TextEncoding::Unicode, &cache);
        assert!(matches!(result, Err(GepError::Decode(_))), "cut at {}", cut);
    }
}
