//! Packed binary line codec (spec.md §4.3): the packed tag byte, the
//! optionally-Huffman-compressed field tuple, and the list-payload block
//! (raw / Huffman / DNA / ASCII-fallback for `STRING_LIST`).

use crate::codec::{dna, intlist, Codec};
use crate::error::OneError;
use crate::field::{FieldType, FieldValue};
use crate::line_info::LineInfo;
use crate::schema::LineTypeSpec;
use zerocopy::byteorder::{I64, U64};
use zerocopy::{AsBytes, FromBytes, BE, LE};

/// Byte order a binary file was written in; read back from the `$` line
/// and used for every multi-byte primitive in the data region and footer
/// (spec.md §4.3 "Endianness").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    fn write_i64(self, v: i64, out: &mut Vec<u8>) {
        match self {
            Endian::Little => out.extend_from_slice(I64::<LE>::new(v).as_bytes()),
            Endian::Big => out.extend_from_slice(I64::<BE>::new(v).as_bytes()),
        }
    }

    fn read_i64(self, bytes: &[u8]) -> i64 {
        match self {
            Endian::Little => I64::<LE>::read_from(bytes).expect("8 bytes").get(),
            Endian::Big => I64::<BE>::read_from(bytes).expect("8 bytes").get(),
        }
    }

    fn write_u64(self, v: u64, out: &mut Vec<u8>) {
        match self {
            Endian::Little => out.extend_from_slice(U64::<LE>::new(v).as_bytes()),
            Endian::Big => out.extend_from_slice(U64::<BE>::new(v).as_bytes()),
        }
    }

    fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            Endian::Little => U64::<LE>::read_from(bytes).expect("8 bytes").get(),
            Endian::Big => U64::<BE>::read_from(bytes).expect("8 bytes").get(),
        }
    }

    fn write_f64(self, v: f64, out: &mut Vec<u8>) {
        self.write_u64(v.to_bits(), out)
    }

    fn read_f64(self, bytes: &[u8]) -> f64 {
        f64::from_bits(self.read_u64(bytes))
    }
}

/// The 5-bit symbol space packed into a binary tag byte (spec.md §4.3):
/// `[A-Z]` map to `0..25`, the file's `groupType` maps to `26`, and the
/// reserved footer/index symbols take the rest.
#[derive(Clone, Copy)]
pub struct BinarySymbols {
    group_type: Option<char>,
}

impl BinarySymbols {
    pub fn new(group_type: Option<char>) -> Self {
        BinarySymbols { group_type }
    }

    pub fn code_for(&self, symbol: char) -> anyhow::Result<u8> {
        if symbol.is_ascii_uppercase() {
            return Ok(symbol as u8 - b'A');
        }
        if Some(symbol) == self.group_type {
            return Ok(26);
        }
        Ok(match symbol {
            ';' => 27,
            ':' => 28,
            '&' => 29,
            '*' => 30,
            '/' | '.' => 31,
            _ => anyhow::bail!(OneError::Binary(format!(
                "line-type '{symbol}' has no binary symbol encoding"
            ))),
        })
    }

    pub fn symbol_for(&self, code: u8, field_bit: bool) -> anyhow::Result<char> {
        Ok(match code {
            0..=25 => (b'A' + code) as char,
            26 => self
                .group_type
                .ok_or_else(|| OneError::Binary("binary symbol 26 used but no groupType set".into()))?,
            27 => ';',
            28 => ':',
            29 => '&',
            30 => '*',
            31 => {
                if field_bit {
                    '.'
                } else {
                    '/'
                }
            }
            _ => anyhow::bail!(OneError::Binary(format!("binary symbol {code} out of range"))),
        })
    }
}

/// Packs a tag byte: high bit marks "this is a binary line", bits `[6:2]`
/// carry the 5-bit symbol, bit 1 is the list-compressed flag, bit 0 is the
/// field-compressed flag.
pub fn pack_tag(code: u8, list_compressed: bool, field_compressed: bool) -> u8 {
    0x80 | (code << 2) | ((list_compressed as u8) << 1) | (field_compressed as u8)
}

pub fn is_binary_tag(byte: u8) -> bool {
    byte & 0x80 != 0
}

/// Unpacks a tag byte into `(symbol code, list-compressed, field-compressed)`.
pub fn unpack_tag(byte: u8) -> (u8, bool, bool) {
    let code = (byte >> 2) & 0x1f;
    (code, byte & 0x02 != 0, byte & 0x01 != 0)
}

/// Encodes every non-list scalar field (`Int`/`Real`/`Char` — the only
/// types a line-type may declare besides its single list field) into a
/// fixed-width byte tuple.
fn encode_scalar_fields(fields: &[FieldValue], spec: &LineTypeSpec, endian: Endian) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if Some(i) == spec.list_field {
            continue;
        }
        match field {
            FieldValue::Int(v) => endian.write_i64(*v, &mut out),
            FieldValue::Real(v) => endian.write_f64(*v, &mut out),
            FieldValue::Char(v) => out.push(*v),
            other => unreachable!("non-list field slot holds a list value: {other:?}"),
        }
    }
    out
}

fn decode_scalar_fields(
    bytes: &[u8],
    spec: &LineTypeSpec,
    endian: Endian,
) -> anyhow::Result<Vec<FieldValue>> {
    let mut out = Vec::with_capacity(spec.fields.len());
    let mut pos = 0;
    for (i, &ty) in spec.fields.iter().enumerate() {
        if Some(i) == spec.list_field {
            out.push(placeholder_for(ty));
            continue;
        }
        match ty {
            FieldType::Int => {
                let v = endian.read_i64(slice_checked(bytes, pos, 8)?);
                out.push(FieldValue::Int(v));
                pos += 8;
            }
            FieldType::Real => {
                let v = endian.read_f64(slice_checked(bytes, pos, 8)?);
                out.push(FieldValue::Real(v));
                pos += 8;
            }
            FieldType::Char => {
                let v = *slice_checked(bytes, pos, 1)?.first().unwrap();
                out.push(FieldValue::Char(v));
                pos += 1;
            }
            _ => unreachable!("non-list schema slot declared a list type"),
        }
    }
    Ok(out)
}

fn placeholder_for(ty: FieldType) -> FieldValue {
    match ty {
        FieldType::Int => FieldValue::Int(0),
        FieldType::Real => FieldValue::Real(0.0),
        FieldType::Char => FieldValue::Char(0),
        FieldType::String => FieldValue::Str(Vec::new()),
        FieldType::IntList => FieldValue::IntList(Vec::new()),
        FieldType::RealList => FieldValue::RealList(Vec::new()),
        FieldType::StringList => FieldValue::StringList(Vec::new()),
        FieldType::Dna => FieldValue::Dna(Vec::new()),
    }
}

fn slice_checked(bytes: &[u8], pos: usize, n: usize) -> anyhow::Result<&[u8]> {
    bytes
        .get(pos..pos + n)
        .ok_or_else(|| OneError::Binary("field tuple shorter than schema requires".into()).into())
}

/// The raw (pre-compression) scalar-field byte tuple, exposed so
/// `file_state.rs` can feed it to a line-type's training accumulator
/// before a codec is built.
pub(crate) fn raw_scalar_bytes(fields: &[FieldValue], spec: &LineTypeSpec, endian: Endian) -> Vec<u8> {
    encode_scalar_fields(fields, spec, endian)
}

/// The raw (pre-compression, post-compaction) list-payload bytes, for the
/// list types that ever train a Huffman codec (`STRING_LIST` always falls
/// back to ASCII and `DNA` always uses the dedicated DNA codec, so neither
/// ever needs a training accumulator).
pub(crate) fn raw_list_bytes(fields: &[FieldValue], spec: &LineTypeSpec, endian: Endian) -> Option<Vec<u8>> {
    let idx = spec.list_field?;
    match (&fields[idx], spec.fields[idx]) {
        (FieldValue::IntList(v), FieldType::IntList) => Some(intlist::compact(v).0),
        (FieldValue::RealList(v), FieldType::RealList) => {
            let mut raw = Vec::with_capacity(v.len() * 8);
            for x in v {
                endian.write_f64(*x, &mut raw);
            }
            Some(raw)
        }
        (FieldValue::Str(v), FieldType::String) => Some(v.clone()),
        _ => None,
    }
}

fn encode_string_list_ascii(v: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(v.len().to_string().as_bytes());
    for s in v {
        out.push(b' ');
        out.extend_from_slice(s.len().to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(s);
    }
    out
}

fn decode_string_list_ascii(bytes: &[u8]) -> anyhow::Result<(Vec<Vec<u8>>, usize)> {
    let mut pos = 0;
    let count = read_ascii_uint(bytes, &mut pos)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        if bytes.get(pos) != Some(&b' ') {
            anyhow::bail!(OneError::Binary("malformed inline STRING_LIST".into()));
        }
        pos += 1;
        let len = read_ascii_uint(bytes, &mut pos)?;
        if bytes.get(pos) != Some(&b' ') {
            anyhow::bail!(OneError::Binary("malformed inline STRING_LIST".into()));
        }
        pos += 1;
        let s = bytes
            .get(pos..pos + len)
            .ok_or_else(|| OneError::Binary("inline STRING_LIST element truncated".into()))?
            .to_vec();
        pos += len;
        out.push(s);
    }
    Ok((out, pos))
}

fn read_ascii_uint(bytes: &[u8], pos: &mut usize) -> anyhow::Result<usize> {
    let start = *pos;
    while bytes.get(*pos).is_some_and(u8::is_ascii_digit) {
        *pos += 1;
    }
    std::str::from_utf8(&bytes[start..*pos])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| OneError::Binary("expected a decimal length prefix".into()).into())
}

/// Writes one binary line for `fields` against `li`'s schema/codec state,
/// using `symbols` for the tag-byte mapping. Returns the encoded bytes; the
/// caller is responsible for the `w.write_all` (kept byte-buffer-based so
/// callers can also use it for training-size bookkeeping before flushing).
pub fn encode_line(
    symbols: &BinarySymbols,
    li: &mut LineInfo,
    fields: &[FieldValue],
    endian: Endian,
) -> anyhow::Result<Vec<u8>> {
    let code = symbols.code_for(li.symbol())?;
    let scalar_bytes = encode_scalar_fields(fields, &li.spec, endian);

    let (field_compressed, field_block) = if li.is_use_field_codec && !scalar_bytes.is_empty() {
        let codec = li
            .field_codec
            .as_ref()
            .and_then(Codec::as_huffman)
            .ok_or_else(|| OneError::Protocol("field codec flagged in-use but absent".into()))?;
        let (bits, bit_len) = codec.encode(&scalar_bytes)?;
        if bit_len < 256 {
            let mut block = Vec::with_capacity(1 + bits.len());
            block.push(bit_len as u8);
            block.extend_from_slice(&bits);
            (true, block)
        } else {
            (false, scalar_bytes.clone())
        }
    } else {
        (false, scalar_bytes.clone())
    };

    let list_idx = li.spec.list_field;
    let mut list_compressed = false;
    let mut list_block = Vec::new();
    if let Some(idx) = list_idx {
        let elt_ty = li.spec.fields[idx];
        match (&fields[idx], elt_ty) {
            (FieldValue::StringList(v), FieldType::StringList) => {
                // Always ASCII fallback: no length-field/compression path.
                list_block = encode_string_list_ascii(v);
            }
            (FieldValue::Dna(v), FieldType::Dna) => {
                list_compressed = true;
                endian.write_u64(v.len() as u64, &mut list_block);
                list_block.extend_from_slice(&dna::encode(v));
            }
            (FieldValue::IntList(v), FieldType::IntList) => {
                let (compacted, used_bytes) = intlist::compact(v);
                let stripped = 8 - used_bytes as u64;
                let length_field = (v.len() as u64) | (stripped << 56);
                endian.write_u64(length_field, &mut list_block);
                append_list_payload(&mut list_block, li, &compacted, endian, &mut list_compressed)?;
            }
            (FieldValue::RealList(v), FieldType::RealList) => {
                let mut raw = Vec::with_capacity(v.len() * 8);
                for x in v {
                    endian.write_f64(*x, &mut raw);
                }
                endian.write_u64(v.len() as u64, &mut list_block);
                append_list_payload(&mut list_block, li, &raw, endian, &mut list_compressed)?;
            }
            (FieldValue::Str(v), FieldType::String) => {
                endian.write_u64(v.len() as u64, &mut list_block);
                append_list_payload(&mut list_block, li, v, endian, &mut list_compressed)?;
            }
            (other, _) => anyhow::bail!(OneError::Binary(format!(
                "field value {other:?} does not match declared list type {elt_ty:?}"
            ))),
        }
    }

    let tag = pack_tag(code, list_compressed, field_compressed);
    let mut out = Vec::with_capacity(1 + field_block.len() + list_block.len());
    out.push(tag);
    out.extend_from_slice(&field_block);
    out.extend_from_slice(&list_block);

    li.record_line(fields.get(list_idx.unwrap_or(usize::MAX)).and_then(FieldValue::list_len));
    Ok(out)
}

/// Appends a raw-or-Huffman-coded payload to `out`, setting `*compressed`
/// if the line-type's list codec is trained and in use.
fn append_list_payload(
    out: &mut Vec<u8>,
    li: &LineInfo,
    raw: &[u8],
    endian: Endian,
    compressed: &mut bool,
) -> anyhow::Result<()> {
    if li.is_use_list_codec {
        let codec = li
            .list_codec
            .as_ref()
            .and_then(Codec::as_huffman)
            .ok_or_else(|| OneError::Protocol("list codec flagged in-use but absent".into()))?;
        let (bits, bit_len) = codec.encode(raw)?;
        *compressed = true;
        endian.write_u64(bit_len, out);
        out.extend_from_slice(&bits);
    } else {
        *compressed = false;
        out.extend_from_slice(raw);
    }
    Ok(())
}

/// The result of decoding one binary line: the symbol, its field tuple
/// (list field populated), and how many bytes of `input` were consumed.
pub struct DecodedLine {
    pub symbol: char,
    pub fields: Vec<FieldValue>,
    pub consumed: usize,
}

/// Decodes one binary line starting at `input[0]` (which must have the
/// high bit set — callers peek that first to distinguish binary from
/// interleaved ASCII lines, per spec.md §4.3).
pub fn decode_line(
    symbols: &BinarySymbols,
    li: &mut LineInfo,
    input: &[u8],
    endian: Endian,
) -> anyhow::Result<DecodedLine> {
    let tag = *input
        .first()
        .ok_or_else(|| OneError::Binary("empty input for binary line".into()))?;
    if !is_binary_tag(tag) {
        anyhow::bail!(OneError::Binary("decode_line called on a non-binary tag".into()));
    }
    // The list-compressed bit is redundant with `li.is_use_list_codec`
    // (and, for DNA lists, the list codec is never plain Huffman) so the
    // per-field decode below consults `li` directly rather than this bit.
    let (code, _list_compressed, field_compressed) = unpack_tag(tag);
    let symbol = symbols.symbol_for(code, field_compressed)?;
    let mut pos = 1;

    let raw_scalar_width = scalar_fields_width(li);

    let scalar_bytes = if field_compressed {
        let bit_len = *input
            .get(pos)
            .ok_or_else(|| OneError::Binary("truncated field bit-length".into()))? as u64;
        pos += 1;
        let codec = li
            .field_codec
            .as_ref()
            .and_then(Codec::as_huffman)
            .ok_or_else(|| OneError::Protocol("field codec flagged in-use but absent".into()))?;
        let nbytes = bit_len.div_ceil(8) as usize;
        let packed = input
            .get(pos..pos + nbytes)
            .ok_or_else(|| OneError::Binary("truncated compressed field block".into()))?;
        pos += nbytes;
        codec.decode(packed, bit_len, raw_scalar_width)?
    } else {
        let bytes = input
            .get(pos..pos + raw_scalar_width)
            .ok_or_else(|| OneError::Binary("truncated raw field block".into()))?
            .to_vec();
        pos += raw_scalar_width;
        bytes
    };
    let mut fields = decode_scalar_fields(&scalar_bytes, &li.spec, endian)?;

    let mut list_len_for_counts = None;
    if let Some(idx) = li.spec.list_field {
        let elt_ty = li.spec.fields[idx];
        match elt_ty {
            FieldType::StringList => {
                let (v, used) = decode_string_list_ascii(&input[pos..])?;
                pos += used;
                list_len_for_counts = Some(v.len() as i64);
                fields[idx] = FieldValue::StringList(v);
            }
            FieldType::Dna => {
                let len = endian.read_u64(slice_checked(input, pos, 8)?) as usize;
                pos += 8;
                let needed = len.div_ceil(4);
                let packed = slice_checked(input, pos, needed)?;
                pos += needed;
                let bases = dna::decode(packed, len)?;
                list_len_for_counts = Some(len as i64);
                fields[idx] = FieldValue::Dna(bases);
            }
            FieldType::IntList => {
                let length_field = endian.read_u64(slice_checked(input, pos, 8)?);
                pos += 8;
                let len = (length_field & 0x00ff_ffff_ffff_ffff) as usize;
                let stripped = (length_field >> 56) as usize;
                let used_bytes = 8 - stripped;
                let (payload, consumed) = read_payload(input, pos, li, endian, len * used_bytes)?;
                pos += consumed;
                let xs = intlist::decompact(&payload, len, used_bytes as u8)?;
                list_len_for_counts = Some(len as i64);
                fields[idx] = FieldValue::IntList(xs);
            }
            FieldType::RealList => {
                let len = endian.read_u64(slice_checked(input, pos, 8)?) as usize;
                pos += 8;
                let (payload, consumed) = read_payload(input, pos, li, endian, len * 8)?;
                pos += consumed;
                let mut xs = Vec::with_capacity(len);
                for chunk in payload.chunks_exact(8) {
                    xs.push(endian.read_f64(chunk));
                }
                list_len_for_counts = Some(len as i64);
                fields[idx] = FieldValue::RealList(xs);
            }
            FieldType::String => {
                let len = endian.read_u64(slice_checked(input, pos, 8)?) as usize;
                pos += 8;
                let (payload, consumed) = read_payload(input, pos, li, endian, len)?;
                pos += consumed;
                list_len_for_counts = Some(len as i64);
                fields[idx] = FieldValue::Str(payload);
            }
            FieldType::Int | FieldType::Real | FieldType::Char => {
                unreachable!("list_field index points at a scalar type")
            }
        }
    }

    li.record_line(list_len_for_counts);
    Ok(DecodedLine {
        symbol,
        fields,
        consumed: pos,
    })
}

/// The byte width of the non-list field tuple: each such field is `INT`/
/// `REAL` (8 bytes) or `CHAR` (1 byte).
fn scalar_fields_width(li: &LineInfo) -> usize {
    li.spec
        .fields
        .iter()
        .enumerate()
        .filter(|&(i, _)| Some(i) != li.spec.list_field)
        .map(|(_, &ty)| match ty {
            FieldType::Char => 1,
            _ => 8,
        })
        .sum()
}

/// Reads a list payload of `raw_width` decompacted bytes, either straight
/// off the wire or via the line-type's trained list codec (prefixed by a
/// 64-bit bit-length, per spec.md §4.3).
fn read_payload(
    input: &[u8],
    pos: usize,
    li: &LineInfo,
    endian: Endian,
    raw_width: usize,
) -> anyhow::Result<(Vec<u8>, usize)> {
    if li.is_use_list_codec {
        let bit_len = endian.read_u64(slice_checked(input, pos, 8)?);
        let nbytes = (bit_len as usize).div_ceil(8);
        let packed = slice_checked(input, pos + 8, nbytes)?;
        let codec = li
            .list_codec
            .as_ref()
            .and_then(Codec::as_huffman)
            .ok_or_else(|| OneError::Protocol("list codec flagged in-use but absent".into()))?;
        let decoded = codec.decode(packed, bit_len, raw_width)?;
        Ok((decoded, 8 + nbytes))
    } else {
        let bytes = slice_checked(input, pos, raw_width)?.to_vec();
        Ok((bytes, raw_width))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use crate::schema::LineTypeSpec;

    fn spec(symbol: char, fields: Vec<FieldType>) -> LineTypeSpec {
        let list_field = fields.iter().position(|f| f.is_list());
        LineTypeSpec {
            symbol,
            fields,
            list_field,
            comment: None,
            compressed: false,
        }
    }

    #[test]
    fn tag_byte_roundtrips() {
        let tag = pack_tag(5, true, false);
        assert!(is_binary_tag(tag));
        assert_eq!(unpack_tag(tag), (5, true, false));
    }

    #[test]
    fn binary_symbol_table_handles_dot_overload() {
        let symbols = BinarySymbols::new(Some('g'));
        assert_eq!(symbols.code_for('g').unwrap(), 26);
        assert_eq!(symbols.code_for('/').unwrap(), 31);
        assert_eq!(symbols.code_for('.').unwrap(), 31);
        assert_eq!(symbols.symbol_for(31, false).unwrap(), '/');
        assert_eq!(symbols.symbol_for(31, true).unwrap(), '.');
    }

    #[test]
    fn dna_line_roundtrips_uncompressed() {
        let symbols = BinarySymbols::new(None);
        let mut li = LineInfo::new(spec('S', vec![FieldType::Dna]));
        let fields = vec![FieldValue::Dna(b"acgt".to_vec())];
        let encoded = encode_line(&symbols, &mut li, &fields, Endian::Little).unwrap();

        let mut li2 = LineInfo::new(spec('S', vec![FieldType::Dna]));
        let decoded = decode_line(&symbols, &mut li2, &encoded, Endian::Little).unwrap();
        assert_eq!(decoded.symbol, 'S');
        assert_eq!(decoded.fields[0], FieldValue::Dna(b"acgt".to_vec()));
        assert_eq!(decoded.consumed, encoded.len());
    }

    #[test]
    fn int_list_line_roundtrips_scenario_c() {
        let symbols = BinarySymbols::new(None);
        let mut li = LineInfo::new(spec('X', vec![FieldType::IntList]));
        let xs = vec![1000i64, 1002, 1005, 999];
        let fields = vec![FieldValue::IntList(xs.clone())];
        let encoded = encode_line(&symbols, &mut li, &fields, Endian::Little).unwrap();

        let mut li2 = LineInfo::new(spec('X', vec![FieldType::IntList]));
        let decoded = decode_line(&symbols, &mut li2, &encoded, Endian::Little).unwrap();
        assert_eq!(decoded.fields[0], FieldValue::IntList(xs));
        assert_eq!(li.accum.count, 1);
        assert_eq!(li.accum.total, 4);
        assert_eq!(li.accum.max, 4);
    }

    #[test]
    fn string_list_line_falls_back_to_ascii() {
        let symbols = BinarySymbols::new(None);
        let mut li = LineInfo::new(spec('W', vec![FieldType::StringList]));
        let items = vec![b"prog".to_vec(), b"1.0".to_vec(), b"cmd".to_vec(), b"date".to_vec()];
        let fields = vec![FieldValue::StringList(items.clone())];
        let encoded = encode_line(&symbols, &mut li, &fields, Endian::Little).unwrap();

        let mut li2 = LineInfo::new(spec('W', vec![FieldType::StringList]));
        let decoded = decode_line(&symbols, &mut li2, &encoded, Endian::Little).unwrap();
        assert_eq!(decoded.fields[0], FieldValue::StringList(items));
    }

    #[test]
    fn mixed_scalar_and_list_fields_roundtrip() {
        let symbols = BinarySymbols::new(None);
        let line_spec = spec('G', vec![FieldType::Char, FieldType::Char, FieldType::Char, FieldType::Int]);
        let mut li = LineInfo::new(line_spec.clone());
        let fields = vec![
            FieldValue::Char(b'g'),
            FieldValue::Char(b'#'),
            FieldValue::Char(b'S'),
            FieldValue::Int(42),
        ];
        let encoded = encode_line(&symbols, &mut li, &fields, Endian::Little).unwrap();
        let mut li2 = LineInfo::new(line_spec);
        let decoded = decode_line(&symbols, &mut li2, &encoded, Endian::Little).unwrap();
        assert_eq!(decoded.fields, fields);
    }
}
