//! The error taxonomy for the ONE format library.
//!
//! Every fallible public operation returns `anyhow::Result<T>`, matching the
//! convention the rest of this crate's ancestor uses throughout. The leaf
//! error is always an [`OneError`], so a caller that needs the structured
//! `{kind, line, message}` shape can recover it with
//! `err.downcast_ref::<OneError>()`.

use std::fmt;

/// The leaf error type for all `onecode` operations.
#[derive(Debug)]
pub enum OneError {
    /// Duplicate line-type definition, unknown field type, a primary name
    /// that isn't three letters, a non-alphabetic user line-type, and so on.
    Schema(String),

    /// A malformed ASCII line: bad integer/real/char, overlong token,
    /// missing separator, short string, premature EOF, unknown line-type,
    /// or a field-count/length mismatch against the schema.
    Parse {
        /// 1-based line number within the file, if known.
        line: u64,
        /// The offending line text (or prefix of it), if known.
        text: String,
        message: String,
    },

    /// Unrecognized packed tag, a Huffman block that decodes to an unknown
    /// byte (no escape defined), a bad footer offset, or an endianness
    /// mismatch on a file that would need re-conversion through ASCII.
    Binary(String),

    /// Adding provenance after the header was written, writing before the
    /// header, calling a finalize-dependent operation on a slave peer,
    /// reading from a write-mode file or vice versa.
    Protocol(String),

    /// Could not open a file, could not create a temp file, or an
    /// allocation-shaped failure from an underlying I/O call.
    Resource(std::io::Error),
}

impl fmt::Display for OneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OneError::Schema(msg) => write!(f, "schema error: {msg}"),
            OneError::Parse {
                line,
                text,
                message,
            } => {
                if text.is_empty() {
                    write!(f, "parse error at line {line}: {message}")
                } else {
                    write!(f, "parse error at line {line} ({text:?}): {message}")
                }
            }
            OneError::Binary(msg) => write!(f, "binary format error: {msg}"),
            OneError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            OneError::Resource(err) => write!(f, "resource error: {err}"),
        }
    }
}

impl std::error::Error for OneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OneError::Resource(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OneError {
    fn from(err: std::io::Error) -> Self {
        OneError::Resource(err)
    }
}

/// Convenience constructor for a parse error with no line-number context yet.
pub fn parse_error(line: u64, text: impl Into<String>, message: impl Into<String>) -> OneError {
    OneError::Parse {
        line,
        text: text.into(),
        message: message.into(),
    }
}
