//! Length-limited canonical Huffman codec (max code length 12 bits), ported
//! from `examples/original_source/Core/ONElib.c`'s `vcCreateCodec`/
//! `vcEncode`/`vcDecode`/`vcSerialize`/`vcDeserialize`. The package-merge
//! (coin collector) length construction is the Larmore-Hirschberg algorithm
//! referenced in spec.md §4.4; bit packing is re-expressed with `bitvec`
//! rather than the original's manual 64-bit accumulator, since the
//! round-trip law this crate must satisfy (spec.md §8.2) does not require
//! byte-identical wire output with the C tool.

use anyhow::{bail, Result};
use bitvec::prelude::*;

/// Codes strictly longer than this are never produced.
const HUFF_CUTOFF: usize = 12;
/// Size of the prefix lookup table used to decode: `2^HUFF_CUTOFF` entries.
const LOOKUP_SIZE: usize = 1 << HUFF_CUTOFF;

/// The four lifecycle states a codec can be in (spec.md §3).
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub enum CodecState {
    Empty,
    Filled,
    CodedWithHistogram,
    CodedRead,
}

/// A length-limited Huffman encoder/decoder with an optional escape code
/// for bytes absent from training data.
#[derive(Clone)]
pub struct HuffmanCodec {
    state: CodecState,
    hist: [u64; 256],
    code_len: [u8; 256],
    code_bits: [u16; 256],
    esc_code: Option<u8>,
    esc_len: u8,
    lookup: Vec<u8>,
}

impl Default for HuffmanCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HuffmanCodec {
    pub fn new() -> Self {
        HuffmanCodec {
            state: CodecState::Empty,
            hist: [0; 256],
            code_len: [0; 256],
            code_bits: [0; 256],
            esc_code: None,
            esc_len: 0,
            lookup: Vec::new(),
        }
    }

    pub fn state(&self) -> CodecState {
        self.state
    }

    pub fn total_bytes_seen(&self) -> u64 {
        self.hist.iter().sum()
    }

    /// Adds the frequencies of `bytes` to the histogram. State becomes
    /// `Filled` (unless it already is beyond that).
    pub fn accumulate(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.hist[b as usize] += 1;
        }
        if self.state < CodecState::Filled {
            self.state = CodecState::Filled;
        }
    }

    /// Merges another codec's histogram into this one (the parallel
    /// training merge of spec.md §4.7). `other` must still own its
    /// histogram (not itself `CodedRead`), and `self` must not yet have a
    /// codec built.
    pub fn merge_histogram(&mut self, other: &HuffmanCodec) -> Result<()> {
        if self.state >= CodecState::CodedWithHistogram {
            bail!("merge_histogram: compressor already has a codec");
        }
        if other.state == CodecState::CodedRead {
            bail!("merge_histogram: source compressor has no histogram");
        }
        for i in 0..256 {
            self.hist[i] += other.hist[i];
        }
        self.state = CodecState::Filled;
        Ok(())
    }

    /// Builds the length-limited canonical Huffman tables from the
    /// accumulated histogram. If `partial` is true and at least one byte
    /// has a zero count, that byte becomes the escape code.
    pub fn build(&mut self, partial: bool) -> Result<()> {
        if self.state >= CodecState::CodedWithHistogram {
            bail!("build: compressor already has a codec");
        }
        if self.state == CodecState::Empty {
            bail!("build: compressor has no byte distribution data");
        }

        let mut code = [0usize; 256];
        let mut ncode = 0usize;
        let mut ecode: Option<usize> = None;
        for i in 0..256 {
            if self.hist[i] > 0 {
                code[ncode] = i;
                ncode += 1;
            } else if partial && ecode.is_none() {
                ecode = Some(i);
                code[ncode] = i;
                ncode += 1;
            }
        }
        let partial = partial && ecode.is_some();

        let hist = self.hist;
        code[..ncode].sort_by_key(|&c| hist[c]);

        let leng = coin_collector_lengths(&code[..ncode], &hist);
        let bits = canonical_codes(&leng);

        self.code_len = [0; 256];
        self.code_bits = [0; 256];
        for i in 0..ncode {
            self.code_len[code[i]] = leng[i];
            self.code_bits[code[i]] = bits[i];
        }

        self.build_lookup();

        if partial {
            let ec = ecode.unwrap();
            self.esc_code = Some(ec as u8);
            self.esc_len = self.code_len[ec];
            self.code_len[ec] = 0;
        } else {
            self.esc_code = None;
            self.esc_len = 0;
        }
        self.state = CodecState::CodedWithHistogram;
        Ok(())
    }

    fn build_lookup(&mut self) {
        let mut lookup = vec![0u8; LOOKUP_SIZE];
        for i in 0..256 {
            let len = self.code_len[i] as usize;
            if len == 0 {
                continue;
            }
            let base = (self.code_bits[i] as usize) << (HUFF_CUTOFF - len);
            let span = 1usize << (HUFF_CUTOFF - len);
            for slot in lookup.iter_mut().skip(base).take(span) {
                *slot = i as u8;
            }
        }
        self.lookup = lookup;
    }

    /// Encodes `input`, returning `(packed_bytes, bit_len)`. Falls back to
    /// a literal marker byte (`0xff`) followed by the raw input when the
    /// coded form would not be smaller.
    pub fn encode(&self, input: &[u8]) -> Result<(Vec<u8>, u64)> {
        if self.state < CodecState::CodedWithHistogram {
            bail!("encode: compressor does not have a codec");
        }

        let orig_bits = (input.len() as u64) * 8;
        let mut coded_bits: u64 = 0;
        for &b in input {
            let len = self.code_len[b as usize];
            if len > 0 {
                coded_bits += len as u64;
            } else if let Some(_esc) = self.esc_code {
                coded_bits += self.esc_len as u64 + 8;
            } else {
                bail!("encode: no code for byte {b:#x} and no escape code");
            }
            if coded_bits >= orig_bits {
                break;
            }
        }

        if coded_bits >= orig_bits {
            let mut out = Vec::with_capacity(1 + input.len());
            out.push(0xffu8);
            out.extend_from_slice(input);
            return Ok((out, 8 + orig_bits));
        }

        let mut bits: BitVec<u8, Msb0> = BitVec::with_capacity(coded_bits as usize);
        for &b in input {
            let len = self.code_len[b as usize];
            if len > 0 {
                push_code(&mut bits, self.code_bits[b as usize], len);
            } else {
                let esc = self.esc_code.expect("checked above");
                push_code(&mut bits, self.code_bits[esc as usize], self.esc_len);
                push_code(&mut bits, b as u16, 8);
            }
        }
        let bit_len = bits.len() as u64;
        Ok((bits.into_vec(), bit_len))
    }

    /// Decodes `out_len` bytes from `packed`, which carries `bit_len` valid
    /// bits (padding beyond that is ignored).
    pub fn decode(&self, packed: &[u8], bit_len: u64, out_len: usize) -> Result<Vec<u8>> {
        if self.state < CodecState::CodedWithHistogram {
            bail!("decode: compressor does not have a codec");
        }
        if !packed.is_empty() && packed[0] == 0xff && bit_len == 8 + 8 * out_len as u64 {
            if packed.len() < 1 + out_len {
                bail!("decode: literal block too short");
            }
            return Ok(packed[1..1 + out_len].to_vec());
        }

        let bits = BitSlice::<u8, Msb0>::from_slice(packed);
        let mut pos: usize = 0;
        let mut out = Vec::with_capacity(out_len);
        while out.len() < out_len {
            let prefix = peek_bits(bits, pos, HUFF_CUTOFF) as usize;
            let sym = self.lookup[prefix];
            if Some(sym) == self.esc_code {
                pos += self.esc_len as usize;
                let byte = peek_bits(bits, pos, 8) as u8;
                pos += 8;
                out.push(byte);
            } else {
                let len = self.code_len[sym as usize] as usize;
                if len == 0 {
                    bail!("decode: Huffman block decoded to an uncoded byte (corrupt or missing escape)");
                }
                pos += len;
                out.push(sym);
            }
        }
        Ok(out)
    }

    /// Maximum number of bytes a serialized codec can occupy.
    pub fn max_serial_size() -> usize {
        257 + 2 * std::mem::size_of::<i32>() + 256 * std::mem::size_of::<u16>()
    }

    /// Serializes the codec: endian marker, escape code, escape length,
    /// then one length byte (and, if nonzero or the escape, a 2-byte code)
    /// per symbol.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.state < CodecState::CodedWithHistogram {
            bail!("serialize: compressor does not have a codec");
        }
        let mut out = Vec::with_capacity(Self::max_serial_size());
        out.push(cfg!(target_endian = "big") as u8);
        let esc_code_i32: i32 = self.esc_code.map(|c| c as i32).unwrap_or(-1);
        out.extend_from_slice(&esc_code_i32.to_ne_bytes());
        out.extend_from_slice(&(self.esc_len as i32).to_ne_bytes());
        for i in 0..256 {
            out.push(self.code_len[i]);
            if self.code_len[i] > 0 || Some(i as u8) == self.esc_code {
                out.extend_from_slice(&self.code_bits[i].to_ne_bytes());
            }
        }
        Ok(out)
    }

    /// Reconstructs a codec from [`serialize`]'s output. The codec has no
    /// histogram (state becomes `CodedRead`). Multi-byte fields are
    /// byte-flipped if the serializing machine's endianness differs from
    /// this one's.
    pub fn deserialize(data: &[u8]) -> Result<HuffmanCodec> {
        if data.is_empty() {
            bail!("deserialize: empty codec blob");
        }
        let creator_is_big = data[0] != 0;
        let flip = creator_is_big != cfg!(target_endian = "big");

        let mut pos = 1usize;
        let read_i32 = |buf: &[u8], flip: bool| -> i32 {
            let mut b = [buf[0], buf[1], buf[2], buf[3]];
            if flip {
                b.reverse();
            }
            i32::from_ne_bytes(b)
        };

        if data.len() < pos + 8 {
            bail!("deserialize: truncated codec blob");
        }
        let esc_code_i32 = read_i32(&data[pos..pos + 4], flip);
        pos += 4;
        let esc_len_i32 = read_i32(&data[pos..pos + 4], flip);
        pos += 4;

        let mut codec = HuffmanCodec::new();
        codec.esc_code = if esc_code_i32 >= 0 {
            Some(esc_code_i32 as u8)
        } else {
            None
        };
        codec.esc_len = esc_len_i32.max(0) as u8;

        for i in 0..256 {
            if pos >= data.len() {
                bail!("deserialize: truncated codec blob");
            }
            let len = data[pos];
            pos += 1;
            codec.code_len[i] = len;
            if len > 0 || Some(i as u8) == codec.esc_code {
                if pos + 2 > data.len() {
                    bail!("deserialize: truncated codec blob");
                }
                let mut b = [data[pos], data[pos + 1]];
                if flip {
                    b.reverse();
                }
                codec.code_bits[i] = u16::from_ne_bytes(b);
                pos += 2;
            }
        }

        if let Some(ec) = codec.esc_code {
            codec.code_len[ec as usize] = codec.esc_len;
        }
        codec.build_lookup();
        if let Some(ec) = codec.esc_code {
            codec.code_len[ec as usize] = 0;
        }
        codec.state = CodecState::CodedRead;
        Ok(codec)
    }
}

fn push_code(bits: &mut BitVec<u8, Msb0>, code: u16, len: u8) {
    for i in (0..len).rev() {
        bits.push((code >> i) & 1 == 1);
    }
}

fn peek_bits(bits: &BitSlice<u8, Msb0>, pos: usize, n: usize) -> u16 {
    let mut v: u16 = 0;
    for i in 0..n {
        let bit = bits.get(pos + i).map(|b| *b).unwrap_or(false);
        v = (v << 1) | (bit as u16);
    }
    v
}

/// Larmore-Hirschberg package-merge: returns, for each of `codes.len()`
/// symbols (already sorted ascending by weight), the length of its
/// length-limited Huffman code.
fn coin_collector_lengths(codes: &[usize], hist: &[u64; 256]) -> Vec<u8> {
    let ncode = codes.len();
    if ncode == 1 {
        return vec![1];
    }
    let dcode = 2 * ncode;
    let countb: Vec<u64> = codes.iter().map(|&c| hist[c]).collect();

    let mut matrix: Vec<Vec<bool>> = vec![vec![false; dcode]; HUFF_CUTOFF];
    let mut lcnt: Vec<u64> = countb.clone();
    let mut llen = ncode - 1;

    for l in (1..HUFF_CUTOFF).rev() {
        let mut ccnt: Vec<u64> = Vec::with_capacity(dcode);
        let mut row = vec![false; dcode];
        let (mut j, mut k) = (0usize, 0usize);
        let mut n = 0usize;
        while j < ncode || k < llen {
            let take_singleton = k >= llen || (j < ncode && countb[j] <= lcnt[k] + lcnt[k + 1]);
            if take_singleton {
                ccnt.push(countb[j]);
                row[n] = true;
                j += 1;
            } else {
                ccnt.push(lcnt[k] + lcnt[k + 1]);
                row[n] = false;
                k += 2;
            }
            n += 1;
        }
        llen = n - 1;
        matrix[l] = row;
        lcnt = ccnt;
    }

    let mut leng = vec![0u8; ncode];
    let mut span = 2 * (ncode - 1);
    for l in 1..HUFF_CUTOFF {
        let mut j = 0usize;
        for n in 0..span {
            if matrix[l][n] {
                leng[j] += 1;
                j += 1;
            }
        }
        span = 2 * (span - j);
    }
    for item in leng.iter_mut().take(span) {
        *item += 1;
    }
    leng
}

/// Canonical-Huffman code assignment from a non-decreasing length array.
fn canonical_codes(leng: &[u8]) -> Vec<u16> {
    let ncode = leng.len();
    let mut bits = vec![0u16; ncode];
    if ncode == 0 {
        return bits;
    }
    let mut llen = leng[0] as i32;
    let mut lbits: u16 = (1u16 << llen) - 1;
    bits[0] = lbits;
    for n in 1..ncode {
        while lbits & 1 == 0 {
            lbits >>= 1;
            llen -= 1;
        }
        lbits -= 1;
        while llen < leng[n] as i32 {
            lbits = (lbits << 1) | 1;
            llen += 1;
        }
        bits[n] = lbits;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train(bytes: &[u8], partial: bool) -> HuffmanCodec {
        let mut c = HuffmanCodec::new();
        c.accumulate(bytes);
        c.build(partial).unwrap();
        c
    }

    #[test]
    fn roundtrip_simple_alphabet() {
        let data = b"ACGTACGTACGTACGTGGGGCCCCAAAATTTT".repeat(50);
        let codec = train(&data, false);
        let (packed, bit_len) = codec.encode(&data).unwrap();
        let decoded = codec.decode(&packed, bit_len, data.len()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn escape_code_spells_unseen_byte() {
        let mut training = Vec::new();
        for _ in 0..1000 {
            training.extend_from_slice(b"ACGT");
        }
        training.push(b'N');
        let codec = train(&training, true);

        let input = b"ACGTN";
        let (packed, bit_len) = codec.encode(input).unwrap();
        let decoded = codec.decode(&packed, bit_len, input.len()).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn serialize_roundtrip_preserves_encoding() {
        let mut training = Vec::new();
        for _ in 0..1000 {
            training.extend_from_slice(b"ACGT");
        }
        training.push(b'N');
        let codec = train(&training, true);

        let blob = codec.serialize().unwrap();
        assert!(blob.len() <= HuffmanCodec::max_serial_size());
        let codec2 = HuffmanCodec::deserialize(&blob).unwrap();

        let input = b"ACGTN";
        let (packed1, bl1) = codec.encode(input).unwrap();
        let (packed2, bl2) = codec2.encode(input).unwrap();
        assert_eq!(bl1, bl2);
        assert_eq!(packed1, packed2);

        let decoded = codec2.decode(&packed2, bl2, input.len()).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn fails_without_escape_on_unseen_byte() {
        let codec = train(b"AAAA", false);
        assert!(codec.encode(b"B").is_err());
    }
}
