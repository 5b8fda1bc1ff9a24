//! Schema parsing and representation (spec.md §4.1).
//!
//! A [`Schema`] is a linked list of file-type nodes in spirit (a `Vec` in
//! this port): the built-in header types, plus zero or more user file-type
//! nodes, each with a three-letter primary name, zero or more secondary
//! aliases, and up to 128 [`LineTypeSpec`] templates keyed by symbol.

use crate::error::OneError;
use crate::field::FieldType;
use std::collections::HashMap;

/// The widest field-tuple a line-type may declare.
pub const MAX_FIELD: usize = 16;
static_assertions::const_assert!(MAX_FIELD < 128);

/// Format major version this build implements. A file whose `1` line
/// declares a different major version is rejected outright — major
/// version bumps are understood to change wire semantics, not just add
/// fields.
pub const FORMAT_MAJOR: i64 = 1;

/// Format minor version this build implements. A file may declare a
/// lower minor version (accepted, with a warning, as forward-compatible);
/// a higher one is rejected since it may use encoding this build doesn't
/// understand yet.
pub const FORMAT_MINOR: i64 = 1;

/// One line-type's static shape: its fields, at most one list field, an
/// optional trailing comment, and whether its field tuple is trained for
/// Huffman compression.
#[derive(Clone, Debug)]
pub struct LineTypeSpec {
    pub symbol: char,
    pub fields: Vec<FieldType>,
    pub list_field: Option<usize>,
    pub comment: Option<String>,
    pub compressed: bool,
}

impl LineTypeSpec {
    fn new(symbol: char, fields: Vec<FieldType>, compressed: bool, comment: Option<String>) -> Self {
        let list_field = fields.iter().position(|f| f.is_list());
        LineTypeSpec {
            symbol,
            fields,
            list_field,
            comment,
            compressed,
        }
    }
}

/// One primary (plus secondary aliases) file-type node.
#[derive(Clone, Debug, Default)]
pub struct FileTypeNode {
    pub primary: String,
    pub secondary: Vec<String>,
    pub line_types: HashMap<char, LineTypeSpec>,
    pub max_fields: usize,
    pub object_type: Option<char>,
    pub group_type: Option<char>,
}

impl FileTypeNode {
    fn new(primary: String) -> Self {
        FileTypeNode {
            primary,
            ..Default::default()
        }
    }

    fn add_line_type(&mut self, spec: LineTypeSpec) -> anyhow::Result<()> {
        if self.line_types.contains_key(&spec.symbol) {
            anyhow::bail!(OneError::Schema(format!(
                "duplicate line-type definition '{}' in file-type '{}'",
                spec.symbol, self.primary
            )));
        }
        self.max_fields = self.max_fields.max(spec.fields.len());
        self.line_types.insert(spec.symbol, spec);
        Ok(())
    }
}

/// A full schema: the built-in header node plus any number of user
/// file-type nodes.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    pub header: FileTypeNode,
    pub types: Vec<FileTypeNode>,
}

impl Schema {
    /// The fixed set of reserved header/footer line-types (spec.md §4.1
    /// table). Never user-definable.
    pub fn builtin_header() -> FileTypeNode {
        use FieldType::*;
        let mut header = FileTypeNode::new("___".to_string());
        let defs: &[(char, &[FieldType])] = &[
            ('1', &[String, Int, Int]),
            ('2', &[String]),
            ('#', &[Char, Int]),
            ('@', &[Char, Int]),
            ('+', &[Char, Int]),
            ('%', &[Char, Char, Char, Int]),
            ('!', &[StringList]),
            ('<', &[String, Int]),
            ('>', &[String]),
            ('~', &[Char, Char, StringList]),
            ('.', &[]),
            ('$', &[Int]),
            ('^', &[]),
            ('-', &[Int]),
            ('&', &[IntList]),
            ('*', &[IntList]),
            (':', &[String]),
            (';', &[String]),
            ('/', &[String]),
        ];
        for &(sym, fields) in defs {
            header
                .add_line_type(LineTypeSpec::new(sym, fields.to_vec(), false, None))
                .expect("builtin header has no duplicate symbols");
        }
        header
    }

    /// Parses a schema description from DSL text (§6): `P`/`S` open file
    /// type nodes and aliases, `O`/`G` declare the object/group line-types
    /// for the current primary, `D`/`C` define ordinary line-types.
    pub fn from_text(text: &str) -> anyhow::Result<Schema> {
        let text = text.replace("\\n", "\n");
        let mut schema = Schema {
            header: Schema::builtin_header(),
            types: Vec::new(),
        };

        let mut current: Option<FileTypeNode> = None;
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim_end();
            if line.is_empty() || line.starts_with('.') {
                continue;
            }
            let mut tok = Tokenizer::new(line);
            let verb = tok
                .next_word()
                .ok_or_else(|| OneError::Schema(format!("line {}: empty verb", lineno + 1)))?;

            match verb {
                "P" => {
                    if let Some(node) = current.take() {
                        schema.types.push(node);
                    }
                    let name = tok.next_length_prefixed_string()?;
                    if name.len() != 3 {
                        anyhow::bail!(OneError::Schema(format!(
                            "line {}: primary type name '{}' must be three letters",
                            lineno + 1,
                            name
                        )));
                    }
                    current = Some(FileTypeNode::new(name));
                }
                "S" => {
                    let name = tok.next_length_prefixed_string()?;
                    if name.len() != 3 {
                        anyhow::bail!(OneError::Schema(format!(
                            "line {}: secondary type name '{}' must be three letters",
                            lineno + 1,
                            name
                        )));
                    }
                    let node = current.as_mut().ok_or_else(|| {
                        OneError::Schema(format!("line {}: 'S' before any 'P'", lineno + 1))
                    })?;
                    node.secondary.push(name);
                }
                "D" | "C" | "O" | "G" => {
                    let node = current.as_mut().ok_or_else(|| {
                        OneError::Schema(format!(
                            "line {}: '{}' before any 'P'",
                            lineno + 1,
                            verb
                        ))
                    })?;
                    let symbol_str = tok
                        .next_word()
                        .ok_or_else(|| OneError::Schema(format!("line {}: missing symbol", lineno + 1)))?;
                    let symbol = parse_symbol(symbol_str, lineno + 1)?;
                    if verb == "G" && !symbol.is_ascii_lowercase() {
                        anyhow::bail!(OneError::Schema(format!(
                            "line {}: group line-type '{}' must be lowercase",
                            lineno + 1,
                            symbol
                        )));
                    }
                    if (verb == "D" || verb == "C" || verb == "O") && !symbol.is_ascii_alphabetic()
                    {
                        anyhow::bail!(OneError::Schema(format!(
                            "line {}: user line-type '{}' must be alphabetic",
                            lineno + 1,
                            symbol
                        )));
                    }
                    let nfields: usize = tok
                        .next_word()
                        .ok_or_else(|| OneError::Schema(format!("line {}: missing field count", lineno + 1)))?
                        .parse()
                        .map_err(|_| OneError::Schema(format!("line {}: bad field count", lineno + 1)))?;
                    if nfields > MAX_FIELD {
                        anyhow::bail!(OneError::Schema(format!(
                            "line {}: {} fields exceeds the {} field limit",
                            lineno + 1,
                            nfields,
                            MAX_FIELD
                        )));
                    }
                    let mut fields = Vec::with_capacity(nfields);
                    for _ in 0..nfields {
                        let type_name = tok.next_length_prefixed_string()?;
                        let ft = FieldType::from_dsl_name(&type_name).ok_or_else(|| {
                            OneError::Schema(format!(
                                "line {}: unknown field type '{}'",
                                lineno + 1,
                                type_name
                            ))
                        })?;
                        fields.push(ft);
                    }
                    if fields.iter().filter(|f| f.is_list()).count() > 1 {
                        anyhow::bail!(OneError::Schema(format!(
                            "line {}: line-type '{}' declares more than one list field",
                            lineno + 1,
                            symbol
                        )));
                    }
                    let comment = tok.rest_as_comment();
                    let spec = LineTypeSpec::new(symbol, fields, verb == "C", comment);
                    node.add_line_type(spec)?;
                    if verb == "O" {
                        node.object_type = Some(symbol);
                    } else if verb == "G" {
                        node.group_type = Some(symbol);
                    }
                }
                other => {
                    anyhow::bail!(OneError::Schema(format!(
                        "line {}: unknown schema verb '{}'",
                        lineno + 1,
                        other
                    )));
                }
            }
        }
        if let Some(node) = current.take() {
            schema.types.push(node);
        }
        Ok(schema)
    }

    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Schema> {
        let text = std::fs::read_to_string(path)?;
        Schema::from_text(&text)
    }

    /// Builds a schema containing only the primary/secondary names, for
    /// the dynamic-open path; line-type definitions are added later from
    /// `~` lines as they're read out of a binary file's header.
    pub fn dynamic(primary: &str) -> Schema {
        Schema {
            header: Schema::builtin_header(),
            types: vec![FileTypeNode::new(primary.to_string())],
        }
    }

    /// Finds the file-type node matching a primary or secondary name.
    pub fn find_type(&self, name: &str) -> Option<&FileTypeNode> {
        self.types
            .iter()
            .find(|n| n.primary == name || n.secondary.iter().any(|s| s == name))
    }

    pub fn find_type_mut(&mut self, name: &str) -> Option<&mut FileTypeNode> {
        self.types
            .iter_mut()
            .find(|n| n.primary == name || n.secondary.iter().any(|s| s == name))
    }
}

/// One line-type's mismatch between two schemas, as reported by
/// [`FileTypeNode::diff`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineTypeMismatch {
    Missing { symbol: char },
    FieldsDiffer { symbol: char, ours: Vec<FieldType>, theirs: Vec<FieldType> },
    TypeMissing,
}

/// The result of `checkSchema` (`vgpCheckSchema` in the original): every
/// line-type mismatch between two file-type nodes, not just the first one
/// (spec.md §6 returns a single bool; this is strictly additive).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    pub mismatches: Vec<LineTypeMismatch>,
}

impl SchemaDiff {
    pub fn is_compatible(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl FileTypeNode {
    /// Compares this node's line-types against `other`'s, reporting every
    /// line-type `self` declares that `other` is missing or defines with a
    /// different field tuple. Extra line-types in `other` are not a
    /// mismatch: a reader schema may be a superset of what a given file uses.
    pub fn diff(&self, other: &FileTypeNode) -> SchemaDiff {
        let mut mismatches = Vec::new();
        let mut symbols: Vec<&char> = self.line_types.keys().collect();
        symbols.sort();
        for &symbol in symbols {
            let ours = &self.line_types[&symbol];
            match other.line_types.get(&symbol) {
                None => mismatches.push(LineTypeMismatch::Missing { symbol }),
                Some(theirs) if theirs.fields != ours.fields => {
                    mismatches.push(LineTypeMismatch::FieldsDiffer {
                        symbol,
                        ours: ours.fields.clone(),
                        theirs: theirs.fields.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        SchemaDiff { mismatches }
    }
}

fn parse_symbol(word: &str, lineno: usize) -> anyhow::Result<char> {
    let mut chars = word.chars();
    let c = chars
        .next()
        .ok_or_else(|| OneError::Schema(format!("line {lineno}: empty symbol")))?;
    if chars.next().is_some() {
        anyhow::bail!(OneError::Schema(format!(
            "line {lineno}: symbol '{word}' must be a single character"
        )));
    }
    Ok(c)
}

/// A minimal whitespace tokenizer for the schema DSL's
/// `<len> <text>` length-prefixed string convention.
struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(line: &'a str) -> Self {
        Tokenizer { rest: line }
    }

    fn next_word(&mut self) -> Option<&'a str> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        let end = self.rest.find(char::is_whitespace).unwrap_or(self.rest.len());
        let word = &self.rest[..end];
        self.rest = &self.rest[end..];
        Some(word)
    }

    fn next_length_prefixed_string(&mut self) -> anyhow::Result<String> {
        let len_word = self
            .next_word()
            .ok_or_else(|| OneError::Schema("expected a length-prefixed string".to_string()))?;
        let len: usize = len_word
            .parse()
            .map_err(|_| OneError::Schema(format!("bad length prefix '{len_word}'")))?;
        self.rest = self.rest.trim_start();
        if self.rest.len() < len {
            anyhow::bail!(OneError::Schema(format!(
                "length-prefixed string shorter than declared length {len}"
            )));
        }
        let s = self.rest[..len].to_string();
        self.rest = &self.rest[len..];
        Ok(s)
    }

    fn rest_as_comment(&mut self) -> Option<String> {
        let trimmed = self.rest.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEQ_SCHEMA: &str = "\
P 3 seq SEQUENCE
O S 1 3 DNA                sequence: the DNA string
D Q 1 6 STRING              quality values
";

    #[test]
    fn parses_primary_object_and_line_types() {
        let schema = Schema::from_text(SEQ_SCHEMA).unwrap();
        let seq = schema.find_type("seq").unwrap();
        assert_eq!(seq.object_type, Some('S'));
        assert!(seq.line_types.contains_key(&'S'));
        assert!(seq.line_types.contains_key(&'Q'));
        assert_eq!(seq.line_types[&'S'].fields, vec![FieldType::Dna]);
    }

    #[test]
    fn rejects_non_three_letter_primary() {
        let err = Schema::from_text("P 2 ab\n").unwrap_err();
        assert!(err.to_string().contains("three letters"));
    }

    #[test]
    fn rejects_uppercase_group_symbol() {
        let err = Schema::from_text("P 3 aln\nG G 1 3 INT\n").unwrap_err();
        assert!(err.to_string().contains("lowercase"));
    }

    #[test]
    fn rejects_two_list_fields() {
        let err = Schema::from_text("P 3 aln\nD X 2 8 INT_LIST 8 INT_LIST\n").unwrap_err();
        assert!(err.to_string().contains("more than one list field"));
    }
}
