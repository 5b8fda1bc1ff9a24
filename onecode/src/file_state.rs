//! `FileState`: the public open/read-line/write-line/close surface
//! (spec.md §3 "FileState", §6 "External interfaces").
//!
//! Every read and write goes through [`sync_file::ReadAt`]/[`WriteAt`]
//! against an explicit byte cursor this struct tracks itself, rather than
//! through `Seek` — the same reason the teacher crate's `Msf<F: ReadAt>`
//! avoids the OS file position: multiple peers (see `thread.rs`) must be
//! able to address one file without fighting over a shared cursor.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::Context;
use sync_file::{RandomAccessFile, ReadAt, WriteAt};
use tracing::{trace, trace_span, warn};

use crate::ascii;
use crate::binary::{self, BinarySymbols, Endian};
use crate::codec::Codec;
use crate::error::OneError;
use crate::field::{FieldType, FieldValue};
use crate::index::Index;
use crate::line_info::LineInfo;
use crate::schema::{FileTypeNode, LineTypeSpec, Schema, FORMAT_MAJOR, FORMAT_MINOR};

/// Default per-line-type byte threshold before a codec is trained and put
/// into use (spec.md §4.4).
pub const DEFAULT_CODEC_TRAINING_SIZE: u64 = 100_000;

/// `{program, version, command, date}` (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provenance {
    pub program: String,
    pub version: String,
    pub command: String,
    pub date: String,
}

/// `{filename, count}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub filename: String,
    pub count: i64,
}

/// `{filename}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deferred {
    pub filename: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Binary,
}

/// Which peer role this `FileState` plays in a parallel write/read group
/// (spec.md §4.7). `thread.rs` builds groups of peers; a serial caller
/// just gets a lone `Serial` peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerRole {
    Serial,
    Master { peer_count: usize },
    Slave { index: usize },
}

/// Open-for-read options.
#[derive(Clone, Debug)]
pub struct FileOpenOptions {
    pub thread_count: usize,
    pub codec_training_size: u64,
    /// Whether ASCII string fields use checked (character-by-character,
    /// bounds-verified) parsing after the header. The header itself is
    /// always parsed in checked mode (spec.md §4.2).
    pub checked_strings: bool,
    /// An expected primary or secondary type name to validate against.
    pub expected_type: Option<String>,
}

impl Default for FileOpenOptions {
    fn default() -> Self {
        FileOpenOptions {
            thread_count: 1,
            codec_training_size: DEFAULT_CODEC_TRAINING_SIZE,
            checked_strings: true,
            expected_type: None,
        }
    }
}

/// Open-for-write options.
#[derive(Clone, Debug)]
pub struct FileWriteOptions {
    pub thread_count: usize,
    pub binary: bool,
    pub codec_training_size: u64,
}

impl Default for FileWriteOptions {
    fn default() -> Self {
        FileWriteOptions {
            thread_count: 1,
            binary: true,
            codec_training_size: DEFAULT_CODEC_TRAINING_SIZE,
        }
    }
}

/// The primary runtime entity (spec.md §3): open mode, encoding, schema,
/// per-line-type state, header metadata, and the current read/write cursor.
pub struct FileState<F> {
    file: F,
    pos: u64,

    mode: OpenMode,
    encoding: Encoding,
    role: PeerRole,

    schema: Schema,
    type_name: String,
    major: i64,
    minor: i64,
    subtype: Option<String>,

    line_infos: HashMap<char, LineInfo>,
    object_type: Option<char>,
    group_type: Option<char>,
    symbols: BinarySymbols,
    endian: Endian,

    provenance: Vec<Provenance>,
    reference: Vec<Reference>,
    deferred: Vec<Deferred>,
    header_written: bool,

    line_no: u64,
    object: i64,
    group: i64,
    in_group: bool,

    index: Index,
    codec_training_size: u64,
    checked_strings: bool,
    finalized: bool,
}

impl FileState<RandomAccessFile> {
    /// Opens an existing file for reading, given its path.
    pub fn open_read(path: &Path, schema: Schema, options: FileOpenOptions) -> anyhow::Result<Self> {
        let span = trace_span!("FileState::open_read", path = %path.display());
        let _enter = span.enter();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        FileState::open_read_with_file(RandomAccessFile::from(file), schema, options)
    }

    /// Opens a file for reading without a pre-registered schema: the
    /// schema is synthesized from the file's own `~` header lines
    /// (spec.md §4.1 "Create dynamic").
    pub fn open_dynamic(path: &Path, primary_hint: &str, options: FileOpenOptions) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        FileState::open_read_with_file(
            RandomAccessFile::from(file),
            Schema::dynamic(primary_hint),
            options,
        )
    }

    /// Creates a new file for writing.
    pub fn open_write_new(
        path: &Path,
        schema: Schema,
        type_name: &str,
        options: FileWriteOptions,
    ) -> anyhow::Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        FileState::open_write_with_file(RandomAccessFile::from(file), schema, type_name, options)
    }

    /// Creates a new file for writing, inheriting schema and provenance
    /// from an already-open `FileState` (spec.md §6 "Open for write from").
    pub fn open_write_from<G>(
        path: &Path,
        reference: &FileState<G>,
        options: FileWriteOptions,
    ) -> anyhow::Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut fs = FileState::open_write_with_file(
            RandomAccessFile::from(file),
            reference.schema.clone(),
            &reference.type_name,
            options,
        )?;
        fs.provenance = reference.provenance.clone();
        Ok(fs)
    }
}

impl<F: ReadAt + WriteAt> FileState<F> {
    fn open_read_with_file(file: F, schema: Schema, options: FileOpenOptions) -> anyhow::Result<Self> {
        let mut fs = FileState::new_shell(file, schema, OpenMode::Read, &options);
        fs.read_header()?;
        if let Some(expected) = &options.expected_type {
            if !fs.matches_type(expected) {
                anyhow::bail!(OneError::Protocol(format!(
                    "file type '{}' does not match expected type '{expected}'",
                    fs.type_name
                )));
            }
        }
        Ok(fs)
    }

    fn open_write_with_file(
        file: F,
        schema: Schema,
        type_name: &str,
        options: FileWriteOptions,
    ) -> anyhow::Result<Self> {
        let open_opts = FileOpenOptions {
            thread_count: options.thread_count,
            codec_training_size: options.codec_training_size,
            checked_strings: true,
            expected_type: None,
        };
        let mut fs = FileState::new_shell(file, schema, OpenMode::Write, &open_opts);
        fs.encoding = if options.binary { Encoding::Binary } else { Encoding::Ascii };
        fs.type_name = type_name.to_string();
        let node = fs
            .schema
            .find_type(type_name)
            .ok_or_else(|| OneError::Schema(format!("unknown file type '{type_name}'")))?
            .clone();
        fs.install_type_node(&node);
        Ok(fs)
    }

    fn new_shell(file: F, schema: Schema, mode: OpenMode, options: &FileOpenOptions) -> Self {
        FileState {
            file,
            pos: 0,
            mode,
            encoding: Encoding::Ascii,
            role: PeerRole::Serial,
            schema,
            type_name: String::new(),
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR,
            subtype: None,
            line_infos: HashMap::new(),
            object_type: None,
            group_type: None,
            symbols: BinarySymbols::new(None),
            endian: Endian::native(),
            provenance: Vec::new(),
            reference: Vec::new(),
            deferred: Vec::new(),
            header_written: false,
            line_no: 0,
            object: 0,
            group: 0,
            in_group: false,
            index: Index::new(),
            codec_training_size: options.codec_training_size,
            checked_strings: options.checked_strings,
            finalized: false,
        }
    }

    fn install_type_node(&mut self, node: &FileTypeNode) {
        self.object_type = node.object_type;
        self.group_type = node.group_type;
        self.symbols = BinarySymbols::new(self.group_type);
        self.line_infos.clear();
        for (&sym, spec) in &node.line_types {
            self.line_infos.insert(sym, LineInfo::new(spec.clone()));
        }
        // Reserved line-types are always addressable, even in binary mode.
        for (&sym, spec) in &self.schema.header.line_types {
            self.line_infos.entry(sym).or_insert_with(|| LineInfo::new(spec.clone()));
        }
    }

    fn matches_type(&self, name: &str) -> bool {
        self.type_name == name
    }

    /// `checkSchema` (spec.md §6): compares `other`'s definition of this
    /// file's type against the schema this `FileState` actually opened
    /// with. Non-fatal — the caller decides what to do with the diff.
    pub fn check_schema(&self, other: &Schema) -> crate::schema::SchemaDiff {
        let ours = self.schema.find_type(&self.type_name);
        let theirs = other.find_type(&self.type_name);
        match (ours, theirs) {
            (Some(ours), Some(theirs)) => ours.diff(theirs),
            (Some(_), None) => crate::schema::SchemaDiff {
                mismatches: vec![crate::schema::LineTypeMismatch::TypeMissing],
            },
            _ => crate::schema::SchemaDiff::default(),
        }
    }

    // ---- Header ------------------------------------------------------

    /// Adds a provenance record; only legal before the header is written.
    pub fn add_provenance(&mut self, p: Provenance) -> anyhow::Result<()> {
        self.require_pre_header()?;
        self.provenance.push(p);
        Ok(())
    }

    pub fn add_reference(&mut self, r: Reference) -> anyhow::Result<()> {
        self.require_pre_header()?;
        self.reference.push(r);
        Ok(())
    }

    pub fn add_deferred(&mut self, d: Deferred) -> anyhow::Result<()> {
        self.require_pre_header()?;
        self.deferred.push(d);
        Ok(())
    }

    fn require_pre_header(&self) -> anyhow::Result<()> {
        if self.header_written {
            anyhow::bail!(OneError::Protocol(
                "cannot add provenance/reference/deferred after the header was written".into()
            ));
        }
        Ok(())
    }

    /// Writes the header. Idempotent within one write session; mandatory
    /// before the first data line (spec.md §6).
    pub fn write_header(&mut self) -> anyhow::Result<()> {
        if self.header_written {
            return Ok(());
        }
        if self.mode != OpenMode::Write {
            anyhow::bail!(OneError::Protocol("write_header called on a read-mode file".into()));
        }
        if matches!(self.role, PeerRole::Slave { .. }) {
            // Only the master writes provenance/header (spec.md §4.7).
            self.header_written = true;
            return Ok(());
        }

        let mut out = Vec::new();
        out.extend_from_slice(&ascii::emit_line(
            '1',
            &[
                FieldValue::Str(self.type_name.clone().into_bytes()),
                FieldValue::Int(self.major),
                FieldValue::Int(self.minor),
            ],
            None,
        )[1..]);
        if let Some(sub) = self.subtype.clone() {
            out.push(b'\n');
            out.extend_from_slice(&ascii::emit_line('2', &[FieldValue::Str(sub.into_bytes())], None)[1..]);
        }
        for p in self.provenance.clone() {
            out.push(b'\n');
            out.extend_from_slice(
                &ascii::emit_line(
                    '!',
                    &[FieldValue::StringList(vec![
                        p.program.into_bytes(),
                        p.version.into_bytes(),
                        p.command.into_bytes(),
                        p.date.into_bytes(),
                    ])],
                    None,
                )[1..],
            );
        }
        for r in self.reference.clone() {
            out.push(b'\n');
            out.extend_from_slice(
                &ascii::emit_line('<', &[FieldValue::Str(r.filename.into_bytes()), FieldValue::Int(r.count)], None)[1..],
            );
        }
        for d in self.deferred.clone() {
            out.push(b'\n');
            out.extend_from_slice(&ascii::emit_line('>', &[FieldValue::Str(d.filename.into_bytes())], None)[1..]);
        }
        for (verb, sym, parts) in self.embed_schema_lines() {
            out.push(b'\n');
            out.extend_from_slice(
                &ascii::emit_line(
                    '~',
                    &[
                        FieldValue::Char(verb as u8),
                        FieldValue::Char(sym as u8),
                        FieldValue::StringList(parts),
                    ],
                    None,
                )[1..],
            );
        }
        if self.encoding == Encoding::Binary {
            let endian_flag = if self.endian == Endian::Big { 1 } else { 0 };
            out.push(b'\n');
            out.extend_from_slice(&ascii::emit_line('$', &[FieldValue::Int(endian_flag)], None)[1..]);
        }

        self.write_bytes(&out)?;
        self.header_written = true;
        trace!(type_name = %self.type_name, "wrote header");
        Ok(())
    }

    fn embed_schema_lines(&self) -> Vec<(char, char, Vec<Vec<u8>>)> {
        let node = match self.schema.find_type(&self.type_name) {
            Some(n) => n,
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        let mut symbols: Vec<&char> = node.line_types.keys().collect();
        symbols.sort();
        for sym in symbols {
            let spec = &node.line_types[sym];
            let verb = if spec.compressed { 'C' } else { 'D' };
            let mut parts = vec![spec.fields.len().to_string().into_bytes()];
            for &ty in &spec.fields {
                parts.push(ty.to_dsl_name().as_bytes().to_vec());
            }
            out.push((verb, *sym, parts));
        }
        out
    }

    fn read_header(&mut self) -> anyhow::Result<()> {
        loop {
            let line = match self.read_ascii_line_for_header()? {
                Some(l) => l,
                None => break,
            };
            if line.is_empty() {
                continue;
            }
            match line[0] as char {
                '1' => {
                    let spec = self.schema.header.line_types[&'1'].clone();
                    let parsed = ascii::parse_line(self.line_no, &line, &spec, true)?;
                    self.type_name = String::from_utf8_lossy(parsed.fields[0].as_str_bytes().unwrap()).into_owned();
                    self.major = parsed.fields[1].as_int().unwrap();
                    self.minor = parsed.fields[2].as_int().unwrap();
                    if self.major != FORMAT_MAJOR {
                        anyhow::bail!(OneError::Protocol(format!(
                            "file major version {} does not match format major version {FORMAT_MAJOR}",
                            self.major
                        )));
                    }
                    if self.minor > FORMAT_MINOR {
                        anyhow::bail!(OneError::Protocol(format!(
                            "file minor version {} is newer than this build's format minor version {FORMAT_MINOR}",
                            self.minor
                        )));
                    } else if self.minor < FORMAT_MINOR {
                        warn!(
                            file_minor = self.minor,
                            format_minor = FORMAT_MINOR,
                            "file declares an older minor version; reading as forward-compatible"
                        );
                    }
                    let node = self
                        .schema
                        .find_type(&self.type_name)
                        .cloned()
                        .unwrap_or_else(|| FileTypeNode {
                            primary: self.type_name.clone(),
                            ..Default::default()
                        });
                    self.install_type_node(&node);
                }
                '2' => {
                    let spec = self.schema.header.line_types[&'2'].clone();
                    let parsed = ascii::parse_line(self.line_no, &line, &spec, true)?;
                    self.subtype = Some(String::from_utf8_lossy(parsed.fields[0].as_str_bytes().unwrap()).into_owned());
                }
                '!' => {
                    let spec = self.schema.header.line_types[&'!'].clone();
                    let parsed = ascii::parse_line(self.line_no, &line, &spec, true)?;
                    if let FieldValue::StringList(v) = &parsed.fields[0] {
                        self.provenance.push(Provenance {
                            program: String::from_utf8_lossy(&v[0]).into_owned(),
                            version: String::from_utf8_lossy(&v[1]).into_owned(),
                            command: String::from_utf8_lossy(&v[2]).into_owned(),
                            date: String::from_utf8_lossy(&v[3]).into_owned(),
                        });
                    }
                }
                '<' => {
                    let spec = self.schema.header.line_types[&'<'].clone();
                    let parsed = ascii::parse_line(self.line_no, &line, &spec, true)?;
                    self.reference.push(Reference {
                        filename: String::from_utf8_lossy(parsed.fields[0].as_str_bytes().unwrap()).into_owned(),
                        count: parsed.fields[1].as_int().unwrap(),
                    });
                }
                '>' => {
                    let spec = self.schema.header.line_types[&'>'].clone();
                    let parsed = ascii::parse_line(self.line_no, &line, &spec, true)?;
                    self.deferred.push(Deferred {
                        filename: String::from_utf8_lossy(parsed.fields[0].as_str_bytes().unwrap()).into_owned(),
                    });
                }
                '~' => self.fold_embedded_schema_line(&line)?,
                '#' | '@' | '+' | '%' => {
                    self.fold_count_line(&line)?;
                }
                '.' => {}
                '$' => {
                    let spec = self.schema.header.line_types[&'$'].clone();
                    let parsed = ascii::parse_line(self.line_no, &line, &spec, true)?;
                    let flag = parsed.fields[0].as_int().unwrap();
                    let creator_big = flag != 0;
                    self.endian = if creator_big == (cfg!(target_endian = "big")) {
                        Endian::native()
                    } else if creator_big {
                        Endian::Big
                    } else {
                        Endian::Little
                    };
                    self.encoding = Encoding::Binary;
                    self.load_footer()?;
                    break;
                }
                other => anyhow::bail!(OneError::Parse {
                    line: self.line_no,
                    text: String::from_utf8_lossy(&line).into_owned(),
                    message: format!("unexpected header line-type '{other}'"),
                }),
            }
        }
        Ok(())
    }

    fn fold_embedded_schema_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
        let spec = self.schema.header.line_types[&'~'].clone();
        let parsed = ascii::parse_line(self.line_no, line, &spec, true)?;
        let verb = parsed.fields[0].as_char().unwrap() as char;
        let sym = parsed.fields[1].as_char().unwrap() as char;
        let parts = match &parsed.fields[2] {
            FieldValue::StringList(v) => v,
            _ => unreachable!(),
        };
        let nfields: usize = String::from_utf8_lossy(&parts[0])
            .parse()
            .map_err(|_| OneError::Schema("malformed embedded schema field count".into()))?;
        let mut fields = Vec::with_capacity(nfields);
        for raw in &parts[1..1 + nfields] {
            let name = String::from_utf8_lossy(raw);
            fields.push(
                FieldType::from_dsl_name(&name)
                    .ok_or_else(|| OneError::Schema(format!("unknown embedded field type '{name}'")))?,
            );
        }
        let list_field = fields.iter().position(|f| f.is_list());
        let line_spec = LineTypeSpec {
            symbol: sym,
            fields,
            list_field,
            comment: None,
            compressed: verb == 'C',
        };
        self.line_infos.entry(sym).or_insert_with(|| LineInfo::new(line_spec.clone()));
        if let Some(node) = self.schema.find_type_mut(&self.type_name.clone()) {
            node.line_types.entry(sym).or_insert(line_spec);
        }
        Ok(())
    }

    fn fold_count_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
        let tag = line[0] as char;
        let spec = self.schema.header.line_types[&tag].clone();
        let parsed = ascii::parse_line(self.line_no, line, &spec, true)?;
        match tag {
            '#' => {
                let sym = parsed.fields[0].as_char().unwrap() as char;
                if let Some(li) = self.line_infos.get_mut(&sym) {
                    li.given.count = parsed.fields[1].as_int().unwrap();
                }
            }
            '@' => {
                let sym = parsed.fields[0].as_char().unwrap() as char;
                if let Some(li) = self.line_infos.get_mut(&sym) {
                    li.given.max = parsed.fields[1].as_int().unwrap();
                }
            }
            '+' => {
                let sym = parsed.fields[0].as_char().unwrap() as char;
                if let Some(li) = self.line_infos.get_mut(&sym) {
                    li.given.total = parsed.fields[1].as_int().unwrap();
                }
            }
            '%' => {
                // CHAR, CHAR, CHAR, INT: group-type, '#'|'+', line-type, value.
                let kind = parsed.fields[1].as_char().unwrap() as char;
                let sym = parsed.fields[2].as_char().unwrap() as char;
                let value = parsed.fields[3].as_int().unwrap();
                if let Some(li) = self.line_infos.get_mut(&sym) {
                    match kind {
                        '#' => li.given.group_count = value,
                        '+' => li.given.group_total = value,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn load_footer(&mut self) -> anyhow::Result<()> {
        // `self.pos` on entry is the start of the data region (right after
        // the header's `$` line); every footer line-type jump below must
        // restore it rather than rewind to byte 0 of the file.
        let data_start = self.pos;
        let len = self.stream_len()?;
        if len < 8 {
            return Ok(());
        }
        let offset_bytes = crate::index::read_at_exact(&self.file, len - 8, 8)?;
        let footer_start = self.endian_read_u64(&offset_bytes);
        self.pos = footer_start;
        loop {
            let line = match self.read_ascii_line_for_header()? {
                Some(l) => l,
                None => break,
            };
            if line.is_empty() {
                continue;
            }
            match line[0] as char {
                '#' | '@' | '+' | '%' => self.fold_count_line(&line)?,
                ':' => self.fold_codec_line(&line, false)?,
                ';' => self.fold_codec_line(&line, true)?,
                '&' => {
                    let spec = self.schema.header.line_types[&'&'].clone();
                    let parsed = ascii::parse_line(self.line_no, &line, &spec, true)?;
                    if let FieldValue::IntList(v) = &parsed.fields[0] {
                        self.index = Index::from_parts(v.clone(), self.index.group_index_with_sentinel());
                    }
                }
                '*' => {
                    let spec = self.schema.header.line_types[&'*'].clone();
                    let parsed = ascii::parse_line(self.line_no, &line, &spec, true)?;
                    if let FieldValue::IntList(v) = &parsed.fields[0] {
                        self.index = Index::from_parts(self.index.object_offsets().to_vec(), v.clone());
                    }
                }
                '^' => break,
                '.' => {}
                other => anyhow::bail!(OneError::Binary(format!("unexpected footer line-type '{other}'"))),
            }
        }
        self.pos = data_start;
        Ok(())
    }

    fn fold_codec_line(&mut self, line: &[u8], is_list: bool) -> anyhow::Result<()> {
        let spec_sym = if is_list { ';' } else { ':' };
        let spec = self.schema.header.line_types[&spec_sym].clone();
        let parsed = ascii::parse_line(self.line_no, line, &spec, true)?;
        let serialized = parsed.fields[0].as_str_bytes().unwrap();
        // Wire format embeds the owning symbol as the first byte, the
        // codec's serialized bytes following.
        let sym = serialized[0] as char;
        let codec = crate::codec::HuffmanCodec::deserialize(&serialized[1..])?;
        if let Some(li) = self.line_infos.get_mut(&sym) {
            if is_list {
                li.list_codec = Some(Codec::Huffman(codec));
                li.is_use_list_codec = true;
            } else {
                li.field_codec = Some(Codec::Huffman(codec));
                li.is_use_field_codec = true;
            }
        }
        Ok(())
    }

    // ---- Line I/O ------------------------------------------------------

    /// Writes one line. `fields` must match the line-type's declared
    /// arity/types exactly.
    pub fn write_line(&mut self, symbol: char, fields: &[FieldValue]) -> anyhow::Result<()> {
        self.pre_train(symbol, fields)?;
        self.write_line_trained(symbol, fields)
    }

    /// The rest of [`write_line`], minus the local codec-training step —
    /// used by a threaded writer peer whose training was already merged
    /// into (and synced back from) the master's shared trainer, so it must
    /// not also train its own, separately-diverging, copy of the codec
    /// (spec.md §4.7).
    pub(crate) fn write_line_trained(&mut self, symbol: char, fields: &[FieldValue]) -> anyhow::Result<()> {
        if self.mode != OpenMode::Write {
            anyhow::bail!(OneError::Protocol("write_line called on a read-mode file".into()));
        }
        if !self.header_written {
            self.write_header()?;
        }

        let bytes = {
            let li = self
                .line_infos
                .get_mut(&symbol)
                .ok_or_else(|| OneError::Schema(format!("line-type '{symbol}' is not declared")))?;
            match self.encoding {
                Encoding::Ascii => {
                    let b = ascii::emit_line(symbol, fields, None);
                    li.record_line(fields.first().and_then(FieldValue::list_len));
                    b
                }
                Encoding::Binary => binary::encode_line(&self.symbols, li, fields, self.endian)?,
            }
        };
        let offset = self.pos;
        self.write_bytes(&bytes)?;

        self.track_object_and_group(symbol, offset)?;
        self.line_no += 1;
        Ok(())
    }

    fn pre_train(&mut self, symbol: char, fields: &[FieldValue]) -> anyhow::Result<()> {
        self.train_field(symbol, fields)?;
        self.train_list(symbol, fields)?;
        Ok(())
    }

    /// Accumulates `fields`' scalar bytes toward this line-type's field
    /// codec and trains it once `codec_training_size` bytes have queued
    /// up (spec.md §4.4). Split out from list training so a threaded
    /// writer can guard each under its own mutex (spec.md §4.7/§5).
    pub(crate) fn train_field(&mut self, symbol: char, fields: &[FieldValue]) -> anyhow::Result<()> {
        let threshold = self.codec_training_size;
        if let Some(bytes) = self.local_field_bytes(symbol, fields, threshold) {
            self.merge_field_bytes(symbol, bytes)?;
        }
        Ok(())
    }

    /// Accumulates `fields`' list payload bytes toward this line-type's
    /// list codec, training it once enough bytes have queued up.
    pub(crate) fn train_list(&mut self, symbol: char, fields: &[FieldValue]) -> anyhow::Result<()> {
        let threshold = self.codec_training_size;
        if let Some(bytes) = self.local_list_bytes(symbol, fields, threshold) {
            self.merge_list_bytes(symbol, bytes)?;
        }
        Ok(())
    }

    /// Queues `fields`' scalar bytes onto this peer's own field tack,
    /// draining and returning them once `threshold` bytes have
    /// accumulated. A threaded writer's slave peers call this with a
    /// threshold scaled to their share of `codec_training_size` (spec.md
    /// §4.4's `codec_training_size / (3 * NTHREADS)`) so each thread's
    /// local histogram is only handed to the master's trainer
    /// periodically, not on every write.
    pub(crate) fn local_field_bytes(
        &mut self,
        symbol: char,
        fields: &[FieldValue],
        threshold: u64,
    ) -> Option<Vec<u8>> {
        if self.encoding != Encoding::Binary {
            return None;
        }
        let spec = self.line_infos.get(&symbol)?.spec.clone();
        let li = self.line_infos.get_mut(&symbol)?;
        if li.field_codec.is_none() || li.is_use_field_codec {
            return None;
        }
        let raw = binary::raw_scalar_bytes(fields, &spec, self.endian);
        li.push_field_tack(&raw);
        if li.field_tack_len() as u64 >= threshold {
            Some(li.take_field_tack())
        } else {
            None
        }
    }

    /// List-payload counterpart of [`local_field_bytes`](Self::local_field_bytes).
    pub(crate) fn local_list_bytes(
        &mut self,
        symbol: char,
        fields: &[FieldValue],
        threshold: u64,
    ) -> Option<Vec<u8>> {
        if self.encoding != Encoding::Binary {
            return None;
        }
        let spec = self.line_infos.get(&symbol)?.spec.clone();
        let li = self.line_infos.get_mut(&symbol)?;
        if !matches!(li.list_codec, Some(Codec::Huffman(_))) || li.is_use_list_codec {
            return None;
        }
        let raw = binary::raw_list_bytes(fields, &spec, self.endian)?;
        li.push_list_tack(&raw);
        if li.list_tack_len() as u64 >= threshold {
            Some(li.take_list_tack())
        } else {
            None
        }
    }

    /// Folds bytes handed up by a peer (itself, or another thread's local
    /// tack) into this line-type's field trainer, training the codec once
    /// `codec_training_size` is reached.
    pub(crate) fn merge_field_bytes(&mut self, symbol: char, bytes: Vec<u8>) -> anyhow::Result<()> {
        let threshold = self.codec_training_size;
        if let Some(li) = self.line_infos.get_mut(&symbol) {
            if li.field_codec.is_some() && !li.is_use_field_codec {
                li.push_field_tack(&bytes);
                if li.field_tack_len() as u64 >= threshold {
                    let queued = li.take_field_tack();
                    if let Some(codec) = li.field_codec.as_mut().and_then(Codec::as_huffman_mut) {
                        codec.accumulate(&queued);
                        codec.build(true)?;
                    }
                    li.is_use_field_codec = true;
                }
            }
        }
        Ok(())
    }

    /// List-payload counterpart of [`merge_field_bytes`](Self::merge_field_bytes).
    pub(crate) fn merge_list_bytes(&mut self, symbol: char, bytes: Vec<u8>) -> anyhow::Result<()> {
        let threshold = self.codec_training_size;
        if let Some(li) = self.line_infos.get_mut(&symbol) {
            if let Some(Codec::Huffman(_)) = &li.list_codec {
                if !li.is_use_list_codec {
                    li.push_list_tack(&bytes);
                    if li.list_tack_len() as u64 >= threshold {
                        let queued = li.take_list_tack();
                        if let Some(codec) = li.list_codec.as_mut().and_then(Codec::as_huffman_mut) {
                            codec.accumulate(&queued);
                            codec.build(true)?;
                        }
                        li.is_use_list_codec = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// The trained-codec slice of a line-type's state, copied onto a
    /// writer peer so its encoding matches what the master has trained
    /// (spec.md §4.7: peers share the master's codecs).
    pub(crate) fn codec_snapshot(&self, symbol: char) -> Option<CodecSnapshot> {
        self.line_infos.get(&symbol).map(|li| CodecSnapshot {
            field_codec: li.field_codec.clone(),
            is_use_field_codec: li.is_use_field_codec,
            list_codec: li.list_codec.clone(),
            is_use_list_codec: li.is_use_list_codec,
        })
    }

    pub(crate) fn apply_codec_snapshot(&mut self, symbol: char, snap: &CodecSnapshot) {
        if let Some(li) = self.line_infos.get_mut(&symbol) {
            li.field_codec = snap.field_codec.clone();
            li.is_use_field_codec = snap.is_use_field_codec;
            li.list_codec = snap.list_codec.clone();
            li.is_use_list_codec = snap.is_use_list_codec;
        }
    }

    fn track_object_and_group(&mut self, symbol: char, offset: u64) -> anyhow::Result<()> {
        // Reading an already-written file must not re-populate `self.index`:
        // it was already loaded whole from the footer in `load_footer`. Only
        // the running object/group counters are maintained on the read path.
        let is_write = self.mode == OpenMode::Write;
        if Some(symbol) == self.group_type {
            self.on_group_line();
            if is_write {
                self.index.record_group_start(self.object);
            }
            self.group += 1;
        }
        if Some(symbol) == self.object_type {
            if is_write {
                self.index.record_object(offset as i64);
            }
            self.object += 1;
        }
        Ok(())
    }

    fn on_group_line(&mut self) {
        let was_in_group = self.in_group;
        for li in self.line_infos.values_mut() {
            li.on_group_boundary(was_in_group);
        }
        self.in_group = true;
    }

    /// Reads the next line; returns `None` at EOF. Populates the field
    /// tuple (including the list field, if any).
    pub fn read_line(&mut self) -> anyhow::Result<Option<(char, Vec<FieldValue>)>> {
        if self.mode != OpenMode::Read {
            anyhow::bail!(OneError::Protocol("read_line called on a write-mode file".into()));
        }
        let first = match self.peek_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };
        let (symbol, fields) = if binary::is_binary_tag(first) {
            let (code, _, field_bit) = binary::unpack_tag(first);
            let symbol = self.symbols.symbol_for(code, field_bit)?;
            if !self.line_infos.contains_key(&symbol) {
                anyhow::bail!(OneError::Binary(format!("unknown binary symbol for '{symbol}'")));
            }
            self.read_binary_line_growing(symbol)?
        } else {
            let line = self
                .read_ascii_line_for_header()?
                .ok_or_else(|| OneError::Binary("truncated ASCII line".into()))?;
            if line.is_empty() {
                return self.read_line();
            }
            let symbol = line[0] as char;
            let spec = self
                .line_infos
                .get(&symbol)
                .map(|li| li.spec.clone())
                .ok_or_else(|| OneError::Schema(format!("line-type '{symbol}' is not declared")))?;
            let parsed = ascii::parse_line(self.line_no, &line, &spec, self.checked_strings)?;
            let li = self.line_infos.get_mut(&symbol).unwrap();
            li.record_line(parsed.fields.first().and_then(FieldValue::list_len));
            (parsed.symbol, parsed.fields)
        };

        let offset_of_line = self.pos; // approximate; exact start tracked by caller via goto
        self.track_object_and_group(symbol, offset_of_line)?;
        self.line_no += 1;
        Ok(Some((symbol, fields)))
    }

    /// Decodes one binary line, growing the read window until it succeeds
    /// or the remaining file is exhausted. A binary line's encoded length
    /// isn't known up front (a compressed list payload can run to many
    /// kilobytes), so a fixed-size read risks truncating it; `decode_line`
    /// never mutates `li` before it has every byte it needs, so retrying
    /// with a larger window on failure is safe.
    fn read_binary_line_growing(&mut self, symbol: char) -> anyhow::Result<(char, Vec<FieldValue>)> {
        let available = (self.stream_len()? - self.pos) as usize;
        let mut want = 256usize.min(available);
        loop {
            let chunk = crate::index::read_at_exact(&self.file, self.pos, want)?;
            let li = self.line_infos.get_mut(&symbol).unwrap();
            match binary::decode_line(&self.symbols, li, &chunk, self.endian) {
                Ok(decoded) => {
                    self.pos += decoded.consumed as u64;
                    return Ok((decoded.symbol, decoded.fields));
                }
                Err(e) => {
                    if want >= available {
                        return Err(e);
                    }
                    want = (want * 2).min(available);
                }
            }
        }
    }

    /// Reads a trailing comment on the line just read, if one follows.
    pub fn read_trailing_comment(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        match self.peek_byte()? {
            Some(b) if !binary::is_binary_tag(b) && b as char == '/' => {
                let line = self
                    .read_ascii_line_for_header()?
                    .ok_or_else(|| OneError::Binary("truncated comment line".into()))?;
                let spec = self.schema.header.line_types[&'/'].clone();
                let parsed = ascii::parse_line(self.line_no, &line, &spec, true)?;
                Ok(parsed.fields[0].as_str_bytes().map(|b| b.to_vec()))
            }
            _ => Ok(None),
        }
    }

    /// Writes a trailing comment attached to the line just written.
    pub fn write_trailing_comment(&mut self, comment: &[u8]) -> anyhow::Result<()> {
        let bytes = ascii::emit_line('/', &[FieldValue::Str(comment.to_vec())], None);
        self.write_bytes(&bytes)
    }

    // ---- Object/group access -------------------------------------------

    pub fn goto_object(&mut self, i: i64) -> anyhow::Result<()> {
        let offset = self.index.goto_object(i)?;
        self.pos = offset as u64;
        self.object = i;
        Ok(())
    }

    pub fn goto_group(&mut self, i: i64) -> anyhow::Result<i64> {
        let (offset, size) = self.index.goto_group(i)?;
        self.pos = offset as u64;
        self.group = i;
        Ok(size)
    }

    // ---- Buffers ---------------------------------------------------

    pub fn set_user_buffer(&mut self, symbol: char, buf: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        let li = self
            .line_infos
            .get_mut(&symbol)
            .ok_or_else(|| OneError::Schema(format!("line-type '{symbol}' is not declared")))?;
        Ok(li.set_user_buffer(buf))
    }

    pub fn release_user_buffer(&mut self, symbol: char) -> anyhow::Result<Option<Vec<u8>>> {
        let li = self
            .line_infos
            .get_mut(&symbol)
            .ok_or_else(|| OneError::Schema(format!("line-type '{symbol}' is not declared")))?;
        Ok(li.release_user_buffer())
    }

    // ---- Finalize / close ----------------------------------------------

    /// Checks `accum == given` for every line-type the header declared
    /// (idempotent).
    pub fn finalize(&mut self) -> anyhow::Result<()> {
        if self.finalized {
            return Ok(());
        }
        if self.in_group {
            self.on_group_line_for_finalize();
        }
        for (sym, li) in &self.line_infos {
            if li.given.count != 0 && !li.matches_given() {
                warn!(symbol = %sym, "accum/given count mismatch at finalize");
            }
        }
        self.finalized = true;
        Ok(())
    }

    fn on_group_line_for_finalize(&mut self) {
        for li in self.line_infos.values_mut() {
            li.on_group_boundary(true);
        }
    }

    /// Finalizes, merges thread peers (handled by `thread.rs` for real
    /// parallel groups), writes the binary footer if applicable, and
    /// releases the file handle.
    pub fn close(&mut self) -> anyhow::Result<()> {
        self.finalize()?;
        if self.mode == OpenMode::Write && self.encoding == Encoding::Binary && !matches!(self.role, PeerRole::Slave { .. })
        {
            self.write_footer()?;
        }
        Ok(())
    }

    fn write_footer(&mut self) -> anyhow::Result<()> {
        let footer_start = self.pos;
        let mut out = Vec::new();

        let mut symbols: Vec<char> = self.line_infos.keys().copied().collect();
        symbols.sort();
        for sym in &symbols {
            if !sym.is_ascii_alphabetic() {
                continue;
            }
            let li = &self.line_infos[sym];
            if li.accum.count == 0 {
                continue;
            }
            out.extend(ascii::emit_line('#', &[FieldValue::Char(*sym as u8), FieldValue::Int(li.accum.count)], None));
            if li.has_list() {
                out.extend(ascii::emit_line('@', &[FieldValue::Char(*sym as u8), FieldValue::Int(li.accum.max)], None));
                out.extend(ascii::emit_line('+', &[FieldValue::Char(*sym as u8), FieldValue::Int(li.accum.total)], None));
            }
            if let Some(g) = self.group_type {
                out.extend(ascii::emit_line(
                    '%',
                    &[
                        FieldValue::Char(g as u8),
                        FieldValue::Char(b'#'),
                        FieldValue::Char(*sym as u8),
                        FieldValue::Int(li.accum.group_count),
                    ],
                    None,
                ));
                out.extend(ascii::emit_line(
                    '%',
                    &[
                        FieldValue::Char(g as u8),
                        FieldValue::Char(b'+'),
                        FieldValue::Char(*sym as u8),
                        FieldValue::Int(li.accum.group_total),
                    ],
                    None,
                ));
            }
        }

        for sym in &symbols {
            let li = &self.line_infos[sym];
            if let Some(Codec::Huffman(h)) = &li.field_codec {
                if li.is_use_field_codec {
                    let mut blob = vec![*sym as u8];
                    blob.extend_from_slice(&h.serialize()?);
                    out.extend(ascii::emit_line(':', &[FieldValue::Str(blob)], None));
                }
            }
            if let Some(Codec::Huffman(h)) = &li.list_codec {
                if li.is_use_list_codec {
                    let mut blob = vec![*sym as u8];
                    blob.extend_from_slice(&h.serialize()?);
                    out.extend(ascii::emit_line(';', &[FieldValue::Str(blob)], None));
                }
            }
        }

        out.extend(ascii::emit_line('&', &[FieldValue::IntList(self.index.object_offsets().to_vec())], None));
        out.extend(ascii::emit_line('*', &[FieldValue::IntList(self.index.group_index_with_sentinel())], None));
        out.extend(ascii::emit_line('^', &[], None));

        self.write_bytes(&out)?;
        let offset_bytes = self.endian_write_u64(footer_start);
        self.write_bytes(&offset_bytes)?;
        Ok(())
    }

    fn endian_write_u64(&self, v: u64) -> [u8; 8] {
        use zerocopy::AsBytes;
        match self.endian {
            Endian::Little => zerocopy::byteorder::U64::<zerocopy::LE>::new(v).as_bytes().try_into().unwrap(),
            Endian::Big => zerocopy::byteorder::U64::<zerocopy::BE>::new(v).as_bytes().try_into().unwrap(),
        }
    }

    // ---- Low-level I/O ---------------------------------------------

    fn write_bytes(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            let n = self.file.write_at(&bytes[written..], self.pos + written as u64)?;
            if n == 0 {
                anyhow::bail!(OneError::Resource(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write_at returned 0"
                )));
            }
            written += n;
        }
        self.pos += bytes.len() as u64;
        Ok(())
    }

    /// Finds the file's current length by probing with `read_at`, since
    /// `ReadAt` alone exposes no `metadata`/`Seek::stream_len` equivalent.
    /// Doubles outward to bracket the end, then binary-searches it.
    fn stream_len(&self) -> anyhow::Result<u64> {
        let mut buf = [0u8; 1];
        if self.file.read_at(&mut buf, 0)? == 0 {
            return Ok(0);
        }
        let (mut lo, mut hi) = (1u64, 2u64);
        while self.file.read_at(&mut buf, hi - 1)? != 0 {
            lo = hi;
            hi = hi.saturating_mul(2);
        }
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            if self.file.read_at(&mut buf, mid - 1)? == 0 {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        Ok(lo)
    }

    fn peek_byte(&self) -> anyhow::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        let n = self.file.read_at(&mut buf, self.pos)?;
        Ok(if n == 0 { None } else { Some(buf[0]) })
    }

    /// Reads one `\n`-terminated line (the `\n` is consumed but not
    /// returned) starting at `self.pos`, advancing `self.pos` past it.
    /// Used for every ASCII line, including header/footer lines embedded
    /// in an otherwise-binary file.
    fn read_ascii_line_for_header(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let mut buf = [0u8; 1];
        loop {
            let n = self.file.read_at(&mut buf, self.pos)?;
            if n == 0 {
                if line.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(line));
            }
            self.pos += 1;
            if buf[0] == b'\n' {
                if line.is_empty() {
                    continue;
                }
                return Ok(Some(line));
            }
            line.push(buf[0]);
        }
    }

    fn endian_read_u64(&self, bytes: &[u8]) -> u64 {
        use zerocopy::FromBytes;
        match self.endian {
            Endian::Little => zerocopy::byteorder::U64::<zerocopy::LE>::read_from(bytes).expect("8 bytes").get(),
            Endian::Big => zerocopy::byteorder::U64::<zerocopy::BE>::read_from(bytes).expect("8 bytes").get(),
        }
    }

    // ---- Accessors ---------------------------------------------------

    pub fn line_info(&self, symbol: char) -> Option<&LineInfo> {
        self.line_infos.get(&symbol)
    }

    pub fn object_count(&self) -> i64 {
        self.object
    }

    pub fn group_count(&self) -> i64 {
        self.group
    }

    pub fn peer_role(&self) -> PeerRole {
        self.role
    }

    pub(crate) fn set_peer_role(&mut self, role: PeerRole) {
        self.role = role;
    }

    pub(crate) fn type_name(&self) -> &str {
        &self.type_name
    }

    pub(crate) fn len_bytes(&self) -> anyhow::Result<u64> {
        self.stream_len()
    }

    /// Reads this peer's entire underlying file, start to end — used only
    /// to splice a slave writer peer's temp-file bytes onto the master's
    /// output at close (spec.md §4.7).
    pub(crate) fn read_all_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let len = self.stream_len()?;
        crate::index::read_at_exact(&self.file, 0, len as usize)
    }

    pub(crate) fn append_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.write_bytes(bytes)
    }

    pub(crate) fn accum_snapshot(&self) -> HashMap<char, crate::line_info::Counts> {
        self.line_infos.iter().map(|(&s, li)| (s, li.accum)).collect()
    }

    pub(crate) fn index_snapshot(&self) -> Index {
        self.index.clone()
    }

    /// Merges a slave peer's accumulated counts and index entries into
    /// this (master) peer. `byte_delta` is the length of the master's own
    /// output before the slave's bytes are appended — every object offset
    /// the slave recorded against its own temp file must shift by that
    /// much to remain valid once concatenated (spec.md §4.7).
    pub(crate) fn merge_peer_counts_and_index(
        &mut self,
        accum: &HashMap<char, crate::line_info::Counts>,
        index: &Index,
        byte_delta: i64,
    ) {
        for (sym, counts) in accum {
            if let Some(li) = self.line_infos.get_mut(sym) {
                li.merge_accum_from(counts);
            }
        }
        self.index.merge_shifted(index, byte_delta);
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Everything a reader peer must adopt from this (master) `FileState`
    /// instead of re-deriving independently: schema, trained codecs, and
    /// index (spec.md §4.7 "shares the master's index and codecs").
    pub(crate) fn snapshot_for_peers(&self) -> SharedReadState {
        SharedReadState {
            schema: self.schema.clone(),
            type_name: self.type_name.clone(),
            major: self.major,
            minor: self.minor,
            subtype: self.subtype.clone(),
            line_infos: self.line_infos.clone(),
            object_type: self.object_type,
            group_type: self.group_type,
            symbols: self.symbols,
            endian: self.endian,
            index: self.index.clone(),
            data_start: self.pos,
        }
    }

    /// Builds a reader peer on an independent file handle that shares the
    /// master's schema/codecs/index rather than re-reading the header and
    /// footer itself.
    pub(crate) fn open_read_peer(file: F, shared: &SharedReadState, options: &FileOpenOptions) -> Self {
        let mut fs = FileState::new_shell(file, shared.schema.clone(), OpenMode::Read, options);
        fs.type_name = shared.type_name.clone();
        fs.major = shared.major;
        fs.minor = shared.minor;
        fs.subtype = shared.subtype.clone();
        fs.line_infos = shared.line_infos.clone();
        fs.object_type = shared.object_type;
        fs.group_type = shared.group_type;
        fs.symbols = shared.symbols;
        fs.endian = shared.endian;
        fs.index = shared.index.clone();
        fs.encoding = Encoding::Binary;
        fs.header_written = true;
        fs.pos = shared.data_start;
        fs
    }
}

/// A line-type's trained-codec state, shared between writer peers so every
/// peer encodes against the same trained codec instead of each training
/// (and diverging) independently.
#[derive(Clone)]
pub(crate) struct CodecSnapshot {
    field_codec: Option<Codec>,
    is_use_field_codec: bool,
    list_codec: Option<Codec>,
    is_use_list_codec: bool,
}

/// Snapshot of the master peer's derived state, handed to each reader peer
/// so it can skip re-parsing the header/footer (spec.md §4.7).
pub(crate) struct SharedReadState {
    schema: Schema,
    type_name: String,
    major: i64,
    minor: i64,
    subtype: Option<String>,
    line_infos: HashMap<char, LineInfo>,
    object_type: Option<char>,
    group_type: Option<char>,
    symbols: BinarySymbols,
    endian: Endian,
    index: Index,
    data_start: u64,
}
