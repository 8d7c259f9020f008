//! Scalar kinds, byte order and type-string parsing.
//!
//! Type strings name a scalar kind and optionally one or two array
//! dimensions:
//!
//! ```text
//! u16         scalar
//! f32[3]      vector of three floats
//! f64[3][3]   3x3 matrix, row-major on the wire
//! str         variable-length UTF-8 (never an array)
//! ```

use crate::error::FieldError;
use serde::{Deserialize, Serialize};

/// Maximum number of array dimensions.
pub const MAX_DIMENSIONS: usize = 2;

/// Scalar kind of a field element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    /// Seconds since the OBC epoch, 4 bytes.
    DateTime,
    /// Raw bytes, variable length.
    Bytes,
    /// UTF-8 text, variable length.
    Str,
}

impl FieldKind {
    /// Size of one element in bytes; 0 for variable-length kinds.
    pub const fn element_size(self) -> usize {
        match self {
            FieldKind::U8 | FieldKind::I8 | FieldKind::Bool => 1,
            FieldKind::U16 | FieldKind::I16 => 2,
            FieldKind::U32 | FieldKind::I32 | FieldKind::F32 | FieldKind::DateTime => 4,
            FieldKind::U64 | FieldKind::I64 | FieldKind::F64 => 8,
            FieldKind::Bytes | FieldKind::Str => 0,
        }
    }

    /// Whether the encoded length depends on the value.
    pub const fn is_variable(self) -> bool {
        matches!(self, FieldKind::Bytes | FieldKind::Str)
    }

    /// Whether this is an unsigned integer kind.
    pub const fn is_unsigned(self) -> bool {
        matches!(self, FieldKind::U8 | FieldKind::U16 | FieldKind::U32 | FieldKind::U64)
    }

    /// Whether this is a signed integer kind.
    pub const fn is_signed(self) -> bool {
        matches!(self, FieldKind::I8 | FieldKind::I16 | FieldKind::I32 | FieldKind::I64)
    }

    /// Whether this is a floating point kind.
    pub const fn is_float(self) -> bool {
        matches!(self, FieldKind::F32 | FieldKind::F64)
    }

    /// Canonical tag, as written in type strings.
    pub const fn as_str(self) -> &'static str {
        match self {
            FieldKind::U8 => "u8",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::I8 => "i8",
            FieldKind::I16 => "i16",
            FieldKind::I32 => "i32",
            FieldKind::I64 => "i64",
            FieldKind::F32 => "f32",
            FieldKind::F64 => "f64",
            FieldKind::Bool => "bool",
            FieldKind::DateTime => "datetime",
            FieldKind::Bytes => "bytes",
            FieldKind::Str => "str",
        }
    }

    /// Look up a kind by tag. Accepts the canonical tags and common aliases.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag.trim().to_ascii_lowercase().as_str() {
            "u8" | "uint8" | "byte" => FieldKind::U8,
            "u16" | "uint16" => FieldKind::U16,
            "u32" | "uint32" => FieldKind::U32,
            "u64" | "uint64" => FieldKind::U64,
            "i8" | "int8" => FieldKind::I8,
            "i16" | "int16" => FieldKind::I16,
            "i32" | "int32" => FieldKind::I32,
            "i64" | "int64" => FieldKind::I64,
            "f32" | "float" => FieldKind::F32,
            "f64" | "double" => FieldKind::F64,
            "bool" => FieldKind::Bool,
            "datetime" | "time" => FieldKind::DateTime,
            "bytes" | "raw" => FieldKind::Bytes,
            "str" | "string" => FieldKind::Str,
            _ => return None,
        };
        Some(kind)
    }

    /// Inclusive integer range representable by this kind, as i128.
    pub(crate) fn int_range(self) -> Option<(i128, i128)> {
        let range = match self {
            FieldKind::U8 => (0, u8::MAX as i128),
            FieldKind::U16 => (0, u16::MAX as i128),
            FieldKind::U32 => (0, u32::MAX as i128),
            FieldKind::U64 => (0, u64::MAX as i128),
            FieldKind::I8 => (i8::MIN as i128, i8::MAX as i128),
            FieldKind::I16 => (i16::MIN as i128, i16::MAX as i128),
            FieldKind::I32 => (i32::MIN as i128, i32::MAX as i128),
            FieldKind::I64 => (i64::MIN as i128, i64::MAX as i128),
            _ => return None,
        };
        Some(range)
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte order of multi-byte numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Network order, used by the serial-frame ecosystem.
    #[default]
    Big,
    Little,
}

/// A parsed type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    /// Element kind.
    pub kind: FieldKind,
    /// Array dimensions; empty for scalars.
    pub shape: Vec<usize>,
}

impl TypeSpec {
    /// Parse a type string such as `u16`, `f32[3]` or `f64[3][3]`.
    pub fn parse(type_str: &str) -> Result<Self, FieldError> {
        let trimmed = type_str.trim();
        let (tag, mut rest) = match trimmed.find('[') {
            Some(pos) => (&trimmed[..pos], &trimmed[pos..]),
            None => (trimmed, ""),
        };

        let kind = FieldKind::from_tag(tag)
            .ok_or_else(|| FieldError::invalid_type(type_str, format!("unknown kind '{}'", tag.trim())))?;

        let mut shape = Vec::new();
        while !rest.is_empty() {
            let rest_trimmed = rest.trim_start();
            let Some(inner) = rest_trimmed.strip_prefix('[') else {
                return Err(FieldError::invalid_type(type_str, "expected '['"));
            };
            let Some(close) = inner.find(']') else {
                return Err(FieldError::invalid_type(type_str, "unclosed '['"));
            };
            let dim = inner[..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| FieldError::invalid_type(type_str, format!("bad dimension '{}'", &inner[..close])))?;
            shape.push(dim);
            rest = inner[close + 1..].trim_end();
        }

        if shape.len() > MAX_DIMENSIONS {
            return Err(FieldError::invalid_type(
                type_str,
                format!("at most {} dimensions supported", MAX_DIMENSIONS),
            ));
        }

        Ok(TypeSpec { kind, shape })
    }
}

impl std::fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        for dim in &self.shape {
            write!(f, "[{}]", dim)?;
        }
        Ok(())
    }
}
