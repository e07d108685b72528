use blockidx_primitives::encoding::{DecodeError, Decoder, Encoder};
use blockidx_primitives::outpoint::{InoutPointer, RawOutputPointer};

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state
    }
}

#[test]
fn varints_decode_to_what_was_written() {
    let mut rng = Lcg::new(0x5eed);
    for _ in 0..2_000 {
        let shift = rng.next_u64() % 64;
        let value = rng.next_u64() >> shift;
        let mut encoder = Encoder::new();
        encoder.write_varint(value);
        let bytes = encoder.into_inner();
        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.read_varint().expect("varint"), value);
        assert!(decoder.is_empty());
    }
}

#[test]
fn non_canonical_varints_are_rejected() {
    for bytes in [
        vec![0xfd, 0xfc, 0x00],
        vec![0xfe, 0xff, 0xff, 0x00, 0x00],
        vec![0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00],
    ] {
        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.read_varint(), Err(DecodeError::NonCanonicalVarInt));
    }
}

#[test]
fn oversized_length_prefix_is_rejected() {
    let mut encoder = Encoder::new();
    encoder.write_varint(u64::from(u32::MAX));
    let bytes = encoder.into_inner();
    let mut decoder = Decoder::new(&bytes);
    assert!(matches!(
        decoder.read_var_slice(),
        Err(DecodeError::SizeTooLarge(_))
    ));
}

#[test]
fn truncated_input_reports_offset() {
    let bytes = [1u8, 2, 3];
    let mut decoder = Decoder::new(&bytes);
    decoder.read_u8().expect("first byte");
    assert_eq!(
        decoder.read_u32_le(),
        Err(DecodeError::UnexpectedEof { wanted: 4, at: 1 })
    );
}

#[test]
fn pointer_keys_sort_numerically() {
    let mut rng = Lcg::new(42);
    let mut pointers: Vec<InoutPointer> = (0..500)
        .map(|_| InoutPointer::new(rng.next_u64() as u32, rng.next_u64() as u16))
        .collect();
    let mut keys: Vec<[u8; 6]> = pointers.iter().map(InoutPointer::to_key).collect();
    pointers.sort();
    keys.sort();
    for (pointer, key) in pointers.iter().zip(keys.iter()) {
        assert_eq!(InoutPointer::from_key(key), Some(*pointer));
    }

    let raw = RawOutputPointer {
        hash: [9u8; 32],
        output_num: 513,
    };
    assert_eq!(RawOutputPointer::from_bytes(&raw.to_bytes()), raw);
}
