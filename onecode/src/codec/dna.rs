//! The special, always-on DNA codec: 4 bases packed per byte. Grounded on
//! `Compress_DNA`/`Uncompress_DNA` in `ONElib.c` — any non-ACGT input byte
//! is treated as `A`, matching unconditionally, and decoding always yields
//! lowercase letters regardless of the input's case.

const BASE: [u8; 4] = [b'a', b'c', b'g', b't'];

fn base_code(b: u8) -> u8 {
    match b {
        b'A' | b'a' => 0,
        b'C' | b'c' => 1,
        b'G' | b'g' => 2,
        b'T' | b't' => 3,
        _ => 0,
    }
}

/// Packs `bases` 4-to-a-byte. The output is `ceil(bases.len() / 4)` bytes.
pub fn encode(bases: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bases.len().div_ceil(4));
    for chunk in bases.chunks(4) {
        let mut byte = 0u8;
        for (i, &b) in chunk.iter().enumerate() {
            byte |= base_code(b) << (6 - 2 * i);
        }
        out.push(byte);
    }
    out
}

/// Unpacks `len` bases (4-to-a-byte) from `packed`. `len` must be supplied
/// by the caller since the packed form does not retain the exact count.
pub fn decode(packed: &[u8], len: usize) -> anyhow::Result<Vec<u8>> {
    let needed = len.div_ceil(4);
    if packed.len() < needed {
        anyhow::bail!(
            "DNA codec: packed input too short ({} bytes for {} bases)",
            packed.len(),
            len
        );
    }
    let mut out = Vec::with_capacity(len);
    let mut remaining = len;
    for &byte in &packed[..needed] {
        let n = remaining.min(4);
        for i in 0..n {
            out.push(BASE[((byte >> (6 - 2 * i)) & 0x3) as usize]);
        }
        remaining -= n;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_lowercases_and_folds_non_acgt() {
        let input = b"AcGtNNnx";
        let packed = encode(input);
        let decoded = decode(&packed, input.len()).unwrap();
        assert_eq!(decoded, b"acgtaaaa");
    }

    #[test]
    fn roundtrip_non_multiple_of_four() {
        for len in 0..20 {
            let input: Vec<u8> = (0..len)
                .map(|i| [b'a', b'c', b'g', b't'][i % 4])
                .collect();
            let packed = encode(&input);
            let decoded = decode(&packed, input.len()).unwrap();
            assert_eq!(decoded, input);
        }
    }
}
