//! Reads and writes files in the ONE format: a self-describing record
//! container built around a small schema DSL, with a plain-ASCII encoding
//! for interchange and a packed binary encoding (optionally Huffman- or
//! DNA-compressed per line-type) for working storage.
//!
//! A schema ([`Schema`]) declares one or more three-letter file types, each
//! with up to [`MAX_FIELD`] fields per line-type and an optional object/
//! group line-type pair that a binary file indexes for random access
//! ([`FileState::goto_object`], [`FileState::goto_group`]). [`FileState`]
//! is the read/write handle for one peer on one file; [`thread::ThreadedWriter`]
//! and [`thread::ThreadedReader`] coordinate groups of peers sharing one
//! underlying path.
//!
//! Most callers only need [`Schema::from_text`] to load a schema and
//! [`FileState::open_read`]/[`FileState::open_write_new`] to get a handle;
//! the `codec`/`ascii`/`binary`/`index` modules are the encoding internals
//! those build on.
//!
//! # References
//! * <https://github.com/VGP/vgp-tools/blob/master/VGP-tools-doc.pdf>
//! * <https://github.com/thegenemyers/ONEcode>

#![forbid(unused_must_use)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::needless_late_init)]
#![allow(clippy::needless_lifetimes)]

pub mod ascii;
pub mod binary;
pub mod codec;
pub mod error;
pub mod field;
pub mod file_state;
pub mod index;
pub mod line_info;
pub mod schema;
pub mod thread;

pub use codec::{Codec, HuffmanCodec};
pub use error::OneError;
pub use field::{FieldType, FieldValue};
pub use file_state::{
    Deferred, Encoding, FileOpenOptions, FileState, FileWriteOptions, OpenMode, PeerRole,
    Provenance, Reference, DEFAULT_CODEC_TRAINING_SIZE,
};
pub use index::Index;
pub use line_info::{Counts, LineInfo};
pub use schema::{
    FileTypeNode, LineTypeMismatch, LineTypeSpec, Schema, SchemaDiff, FORMAT_MAJOR, FORMAT_MINOR, MAX_FIELD,
};
pub use thread::{ThreadedReader, ThreadedWriter};
