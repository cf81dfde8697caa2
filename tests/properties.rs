//! Property-based tests for codec round trips and invariants.

use bitspec::*;
use proptest::prelude::*;
use serde_json::json;

fn integer_case() -> impl Strategy<Value = (usize, u64)> {
    (1usize..=32).prop_flat_map(|bits| {
        let max = (1u64 << bits) - 1;
        (Just(bits), 0..=max)
    })
}

proptest! {
    #[test]
    fn integer_roundtrip_is_exact((bits, value) in integer_case()) {
        let spec = json!({"key": "n", "type": "integer", "bits": bits});
        let encoded = encode_block(&json!(value), &spec).unwrap();
        prop_assert_eq!(encoded.len(), bits);
        prop_assert_eq!(decode_block(&encoded, &spec).unwrap(), json!(value));
    }

    #[test]
    fn integer_offset_roundtrip(offset in -1000i64..1000, delta in 0u64..500) {
        let spec = json!({"key": "n", "type": "integer", "bits": 9, "offset": offset});
        let value = offset + delta as i64;
        let encoded = encode_block(&json!(value), &spec).unwrap();
        prop_assert_eq!(decode_block(&encoded, &spec).unwrap(), json!(value));
    }

    #[test]
    fn float_roundtrip_within_one_step(bits in 2usize..=16, value in -50.0f64..50.0) {
        let spec = json!({
            "key": "x", "type": "float", "bits": bits,
            "lower": -50, "upper": 50
        });
        let step = 100.0 / ((1u64 << bits) - 1) as f64;
        let encoded = encode_block(&json!(value), &spec).unwrap();
        let decoded = decode_block(&encoded, &spec).unwrap().as_f64().unwrap();
        prop_assert!((decoded - value).abs() <= step);
    }

    #[test]
    fn string_roundtrip_pads_left(text in "[A-Za-z0-9+/]{0,8}") {
        let spec = json!({"key": "s", "type": "string", "length": 8});
        let encoded = encode_block(&json!(text), &spec).unwrap();
        prop_assert_eq!(encoded.len(), 48);
        let decoded = decode_block(&encoded, &spec).unwrap();
        let expected = format!("{}{}", "+".repeat(8 - text.len()), text);
        prop_assert_eq!(decoded, json!(expected));
    }

    #[test]
    fn truncate_is_idempotent(bits in proptest::collection::vec(any::<bool>(), 0..64), width in 0usize..80) {
        let mut input = BitString::new();
        for bit in bits {
            input.push(bit);
        }
        let once = bits::truncate_bits(&input, width);
        let twice = bits::truncate_bits(&once, width);
        prop_assert_eq!(once.len(), width);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn variable_array_roundtrip(values in proptest::collection::vec(0u64..256, 0..6)) {
        let spec = json!({
            "key": "a", "type": "array", "length": 6,
            "blocks": {"key": "item", "type": "integer", "bits": 8}
        });
        let encoded = encode_block(&json!(values), &spec).unwrap();
        prop_assert_eq!(decode_block(&encoded, &spec).unwrap(), json!(values));
    }

    #[test]
    fn width_report_matches_encoded_length(values in proptest::collection::vec(0u64..16, 0..5)) {
        let spec = json!({
            "key": "a", "type": "array", "length": 5,
            "blocks": {"key": "item", "type": "integer", "bits": 4}
        });
        let block = Block::from_spec(&spec).unwrap();
        let encoded = block.encode(&json!(values)).unwrap();
        prop_assert_eq!(block.bit_width(&encoded).unwrap(), encoded.len());
    }

    #[test]
    fn envelope_roundtrip_with_crc(count in 0u64..128, flag in any::<bool>()) {
        let spec = json!({
            "name": "probe",
            "version": 3,
            "meta": {"encode_version": true, "version_bits": 6, "crc8": true},
            "body": [
                {"key": "count", "type": "integer", "bits": 7},
                {"key": "flag", "type": "boolean"}
            ]
        });
        let payload = json!({"count": count, "flag": flag});
        let message = encode(&payload, &spec).unwrap();
        prop_assert_eq!(message.len_bits() % 8, 0);
        let decoded = decode(&message, &spec).unwrap();
        prop_assert_eq!(decoded.meta.crc8, Some(true));
        prop_assert_eq!(decoded.body, payload);
    }
}
