//! The closed set of primitive field types and the tagged values that carry
//! them, replacing the C union in `VGPlib.h`'s `Field` with a safe enum.

/// The eight primitive field types a line-type's fields may be drawn from.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum FieldType {
    Int,
    Real,
    Char,
    String,
    IntList,
    RealList,
    StringList,
    Dna,
}

impl FieldType {
    /// Parses one of the DSL's type-name tokens (`INT`, `REAL`, ...).
    pub fn from_dsl_name(name: &str) -> Option<Self> {
        Some(match name {
            "INT" => FieldType::Int,
            "REAL" => FieldType::Real,
            "CHAR" => FieldType::Char,
            "STRING" => FieldType::String,
            "INT_LIST" => FieldType::IntList,
            "REAL_LIST" => FieldType::RealList,
            "STRING_LIST" => FieldType::StringList,
            "DNA" => FieldType::Dna,
            _ => return None,
        })
    }

    /// True for the four list-shaped field types (one per line-type, at most).
    pub fn is_list(self) -> bool {
        matches!(
            self,
            FieldType::IntList | FieldType::RealList | FieldType::StringList | FieldType::Dna
        ) || self == FieldType::String
    }

    /// The size in bytes of one list element, for the fixed-width list types.
    /// `String`/`StringList`/`Dna` elements are variable width and return `1`.
    pub fn list_elt_size(self) -> usize {
        match self {
            FieldType::IntList => 8,
            FieldType::RealList => 8,
            _ => 1,
        }
    }

    /// The DSL type-name token for this type; the inverse of
    /// [`FieldType::from_dsl_name`], used when embedding a schema into a
    /// binary file's `~` header lines.
    pub fn to_dsl_name(self) -> &'static str {
        match self {
            FieldType::Int => "INT",
            FieldType::Real => "REAL",
            FieldType::Char => "CHAR",
            FieldType::String => "STRING",
            FieldType::IntList => "INT_LIST",
            FieldType::RealList => "REAL_LIST",
            FieldType::StringList => "STRING_LIST",
            FieldType::Dna => "DNA",
        }
    }
}

/// A single field value as parsed from (or to be emitted as) one line.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Real(f64),
    Char(u8),
    Str(Vec<u8>),
    IntList(Vec<i64>),
    RealList(Vec<f64>),
    StringList(Vec<Vec<u8>>),
    Dna(Vec<u8>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Real(_) => FieldType::Real,
            FieldValue::Char(_) => FieldType::Char,
            FieldValue::Str(_) => FieldType::String,
            FieldValue::IntList(_) => FieldType::IntList,
            FieldValue::RealList(_) => FieldType::RealList,
            FieldValue::StringList(_) => FieldType::StringList,
            FieldValue::Dna(_) => FieldType::Dna,
        }
    }

    /// The list length, for any of the list-shaped variants; `None` otherwise.
    pub fn list_len(&self) -> Option<i64> {
        Some(match self {
            FieldValue::Str(v) => v.len() as i64,
            FieldValue::IntList(v) => v.len() as i64,
            FieldValue::RealList(v) => v.len() as i64,
            FieldValue::StringList(v) => v.len() as i64,
            FieldValue::Dna(v) => v.len() as i64,
            _ => return None,
        })
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<u8> {
        match self {
            FieldValue::Char(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }
}
