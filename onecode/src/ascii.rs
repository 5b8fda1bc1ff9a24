//! ASCII line parser/emitter (spec.md §4.2).
//!
//! One line is a tag character, a space, space-separated fields, an
//! optional trailing ` <comment>`, and a terminating `\n`. List-bearing
//! lines emit the list length, a space, then the payload: raw bytes for
//! `STRING`/`DNA`, space-separated values for `INT_LIST`/`REAL_LIST`,
//! repeated `<len> <bytes>` pairs for `STRING_LIST`.

use crate::error::{parse_error, OneError};
use crate::field::{FieldType, FieldValue};
use crate::schema::LineTypeSpec;

/// One parsed ASCII line: its tag symbol, its field tuple (including the
/// list field, if any), and a trailing comment if one followed the fields.
pub struct ParsedLine {
    pub symbol: char,
    pub fields: Vec<FieldValue>,
    pub comment: Option<Vec<u8>>,
}

/// A cursor over one line's bytes (no trailing `\n`), used by both the
/// scalar-field and list-payload readers.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    line_no: u64,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], line_no: u64) -> Self {
        Cursor { bytes, pos: 0, line_no }
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(self.bytes).into_owned()
    }

    fn err(&self, message: impl Into<String>) -> OneError {
        parse_error(self.line_no, self.text(), message)
    }

    fn eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect_space(&mut self) -> anyhow::Result<()> {
        if self.peek() != Some(b' ') {
            anyhow::bail!(self.err("expected a field separator space"));
        }
        self.pos += 1;
        Ok(())
    }

    /// Reads a maximal run of non-space bytes (a token).
    fn read_token(&mut self) -> &'a [u8] {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b' ' {
                break;
            }
            self.pos += 1;
        }
        &self.bytes[start..self.pos]
    }

    fn read_exact(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            anyhow::bail!(self.err(format!(
                "expected {n} more bytes but only {} remain",
                self.bytes.len() - self.pos
            )));
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

fn parse_strict_int(cur: &mut Cursor) -> anyhow::Result<i64> {
    let tok = cur.read_token();
    if tok.is_empty() {
        anyhow::bail!(cur.err("empty integer field"));
    }
    let s = std::str::from_utf8(tok).map_err(|_| cur.err("integer field is not UTF-8"))?;
    s.parse::<i64>()
        .map_err(|_| cur.err(format!("'{s}' is not a valid integer")))
}

fn parse_strict_real(cur: &mut Cursor) -> anyhow::Result<f64> {
    let tok = cur.read_token();
    if tok.is_empty() {
        anyhow::bail!(cur.err("empty real field"));
    }
    let s = std::str::from_utf8(tok).map_err(|_| cur.err("real field is not UTF-8"))?;
    s.parse::<f64>()
        .map_err(|_| cur.err(format!("'{s}' is not a valid real number")))
}

fn parse_strict_char(cur: &mut Cursor) -> anyhow::Result<u8> {
    let b = cur
        .peek()
        .ok_or_else(|| cur.err("expected a character field but found end of line"))?;
    cur.pos += 1;
    Ok(b)
}

/// Reads a length-prefixed string: `<len>` then a space then either
/// `checked` (byte-by-byte, stopping short only on premature end of line)
/// or `unchecked` (a single exact-length block read) bytes.
fn parse_length_prefixed(cur: &mut Cursor, checked: bool) -> anyhow::Result<Vec<u8>> {
    let len = parse_strict_int(cur)? as usize;
    cur.expect_space()?;
    if checked {
        let start = cur.pos;
        for _ in 0..len {
            if cur.eof() {
                anyhow::bail!(cur.err(format!(
                    "string declared length {len} but line ended after {} bytes",
                    cur.pos - start
                )));
            }
            cur.pos += 1;
        }
        Ok(cur.bytes[start..cur.pos].to_vec())
    } else {
        Ok(cur.read_exact(len)?.to_vec())
    }
}

fn parse_field(cur: &mut Cursor, ty: FieldType, checked_strings: bool) -> anyhow::Result<FieldValue> {
    Ok(match ty {
        FieldType::Int => FieldValue::Int(parse_strict_int(cur)?),
        FieldType::Real => FieldValue::Real(parse_strict_real(cur)?),
        FieldType::Char => FieldValue::Char(parse_strict_char(cur)?),
        FieldType::String => FieldValue::Str(parse_length_prefixed(cur, checked_strings)?),
        FieldType::Dna => FieldValue::Dna(parse_length_prefixed(cur, checked_strings)?),
        FieldType::IntList => {
            let len = parse_strict_int(cur)? as usize;
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                cur.expect_space()?;
                v.push(parse_strict_int(cur)?);
            }
            FieldValue::IntList(v)
        }
        FieldType::RealList => {
            let len = parse_strict_int(cur)? as usize;
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                cur.expect_space()?;
                v.push(parse_strict_real(cur)?);
            }
            FieldValue::RealList(v)
        }
        FieldType::StringList => {
            let len = parse_strict_int(cur)? as usize;
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                cur.expect_space()?;
                v.push(parse_length_prefixed(cur, checked_strings)?);
            }
            FieldValue::StringList(v)
        }
    })
}

/// Parses one already-newline-stripped ASCII line against its schema-
/// declared field-type tuple. `checked_strings` must be `true` while
/// parsing the header (spec.md §4.2) and may be relaxed thereafter.
pub fn parse_line(
    line_no: u64,
    line: &[u8],
    spec: &LineTypeSpec,
    checked_strings: bool,
) -> anyhow::Result<ParsedLine> {
    if line.is_empty() {
        anyhow::bail!(parse_error(line_no, "", "empty line, expected a tag"));
    }
    let symbol = line[0] as char;
    if symbol != spec.symbol {
        anyhow::bail!(parse_error(
            line_no,
            String::from_utf8_lossy(line),
            format!("line-type mismatch: expected '{}', found '{symbol}'", spec.symbol)
        ));
    }
    let mut cur = Cursor::new(&line[1..], line_no);
    let mut fields = Vec::with_capacity(spec.fields.len());
    for &ty in &spec.fields {
        cur.expect_space()?;
        fields.push(parse_field(&mut cur, ty, checked_strings)?);
    }
    let comment = if !cur.eof() {
        if cur.peek() == Some(b' ') {
            cur.pos += 1;
        }
        let rest = cur.rest();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_vec())
        }
    } else {
        None
    };
    Ok(ParsedLine {
        symbol,
        fields,
        comment,
    })
}

fn emit_length_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(bytes);
}

fn emit_field(out: &mut Vec<u8>, value: &FieldValue) {
    match value {
        FieldValue::Int(v) => out.extend_from_slice(v.to_string().as_bytes()),
        FieldValue::Real(v) => out.extend_from_slice(format!("{v}").as_bytes()),
        FieldValue::Char(v) => out.push(*v),
        FieldValue::Str(v) | FieldValue::Dna(v) => emit_length_prefixed(out, v),
        FieldValue::IntList(v) => {
            out.extend_from_slice(v.len().to_string().as_bytes());
            for x in v {
                out.push(b' ');
                out.extend_from_slice(x.to_string().as_bytes());
            }
        }
        FieldValue::RealList(v) => {
            out.extend_from_slice(v.len().to_string().as_bytes());
            for x in v {
                out.push(b' ');
                out.extend_from_slice(format!("{x}").as_bytes());
            }
        }
        FieldValue::StringList(v) => {
            out.extend_from_slice(v.len().to_string().as_bytes());
            for s in v {
                out.push(b' ');
                emit_length_prefixed(out, s);
            }
        }
    }
}

/// Emits one ASCII line for `symbol`/`fields`/optional trailing `comment`.
/// The library convention is to *prepend* `\n` rather than append it, so a
/// caller can add a trailing comment with a separate call before the next
/// line is emitted (spec.md §4.2).
pub fn emit_line(symbol: char, fields: &[FieldValue], comment: Option<&[u8]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.push(b'\n');
    out.push(symbol as u8);
    for field in fields {
        out.push(b' ');
        emit_field(&mut out, field);
    }
    if let Some(c) = comment {
        out.push(b' ');
        out.extend_from_slice(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn scenario_a_roundtrip() {
        let s_spec = spec('S', vec![FieldType::Dna]);
        let q_spec = spec('Q', vec![FieldType::String]);

        let line1 = emit_line('S', &[FieldValue::Dna(b"acgt".to_vec())], None);
        // Drop the leading '\n' the emitter prepends before re-parsing.
        let parsed = parse_line(1, &line1[1..], &s_spec, true).unwrap();
        assert_eq!(parsed.symbol, 'S');
        assert_eq!(parsed.fields[0], FieldValue::Dna(b"acgt".to_vec()));

        let line2 = emit_line('S', &[FieldValue::Dna(b"ggt".to_vec())], None);
        let parsed2 = parse_line(2, &line2[1..], &s_spec, true).unwrap();
        assert_eq!(parsed2.fields[0], FieldValue::Dna(b"ggt".to_vec()));

        let line3 = emit_line('Q', &[FieldValue::Str(b"!!!".to_vec())], None);
        let parsed3 = parse_line(3, &line3[1..], &q_spec, true).unwrap();
        assert_eq!(parsed3.fields[0], FieldValue::Str(b"!!!".to_vec()));
    }

    #[test]
    fn trailing_comment_is_captured() {
        let spec = spec('X', vec![FieldType::Int]);
        let line = emit_line('X', &[FieldValue::Int(7)], Some(b"a note"));
        let parsed = parse_line(1, &line[1..], &spec, true).unwrap();
        assert_eq!(parsed.comment.as_deref(), Some(&b"a note"[..]));
    }

    #[test]
    fn rejects_non_numeric_integer() {
        let spec = spec('X', vec![FieldType::Int]);
        let err = parse_line(1, b"X abc", &spec, true).unwrap_err();
        assert!(err.to_string().contains("not a valid integer"));
    }

    #[test]
    fn checked_string_rejects_premature_eol() {
        let spec = spec('X', vec![FieldType::String]);
        let err = parse_line(1, b"X 10 short", &spec, true).unwrap_err();
        assert!(err.to_string().contains("declared length"));
    }

    #[test]
    fn int_list_roundtrip() {
        let spec = spec('X', vec![FieldType::IntList]);
        let line = emit_line('X', &[FieldValue::IntList(vec![1000, 1002, 1005, 999])], None);
        let parsed = parse_line(1, &line[1..], &spec, true).unwrap();
        assert_eq!(
            parsed.fields[0],
            FieldValue::IntList(vec![1000, 1002, 1005, 999])
        );
    }
}
