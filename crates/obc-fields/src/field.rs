//! A single typed wire field.
//!
//! Fixed-size fields encode to exactly [`Field::byte_size`] bytes. Arrays and
//! matrices are laid out element-major (row-major for matrices); their
//! dimensions are part of the field definition and never appear on the wire.

use crate::datetime::ObcDateTime;
use crate::error::{DecodeError, EncodeError, FieldError};
use crate::kind::{ByteOrder, FieldKind, TypeSpec, MAX_DIMENSIONS};
use crate::value::FieldValue;

/// One named, typed value in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    kind: FieldKind,
    shape: Vec<usize>,
    byte_order: ByteOrder,
}

impl Field {
    /// Create a scalar field.
    pub fn scalar(name: impl Into<String>, kind: FieldKind) -> Self {
        Field {
            name: name.into(),
            kind,
            shape: Vec::new(),
            byte_order: ByteOrder::default(),
        }
    }

    /// Create a field with the given array shape (empty for a scalar).
    pub fn new(name: impl Into<String>, kind: FieldKind, shape: Vec<usize>) -> Result<Self, FieldError> {
        let name = name.into();
        if shape.len() > MAX_DIMENSIONS {
            return Err(FieldError::TooManyDimensions {
                field: name,
                dims: shape.len(),
            });
        }
        if shape.contains(&0) {
            return Err(FieldError::EmptyShape { field: name, shape });
        }
        if kind.is_variable() && !shape.is_empty() {
            return Err(FieldError::VariableArray { field: name });
        }
        Ok(Field {
            name,
            kind,
            shape,
            byte_order: ByteOrder::default(),
        })
    }

    /// Create a field from a type string such as `u16` or `f32[3][3]`.
    pub fn from_type_str(
        name: impl Into<String>,
        type_str: &str,
        byte_order: ByteOrder,
    ) -> Result<Self, FieldError> {
        let spec = TypeSpec::parse(type_str)?;
        Ok(Field::new(name, spec.kind, spec.shape)?.with_byte_order(byte_order))
    }

    /// Set the byte order of multi-byte elements.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element kind.
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Array dimensions; empty for scalars.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Byte order of multi-byte elements.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Number of elements (product of the shape).
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Encoded size in bytes; 0 for variable-length fields.
    pub fn byte_size(&self) -> usize {
        self.kind.element_size() * self.element_count()
    }

    /// Whether the encoded length depends on the value.
    pub fn is_variable(&self) -> bool {
        self.kind.is_variable()
    }

    /// Whether the field has array dimensions.
    pub fn is_array(&self) -> bool {
        !self.shape.is_empty()
    }

    /// Type string describing this field.
    pub fn type_string(&self) -> String {
        TypeSpec {
            kind: self.kind,
            shape: self.shape.clone(),
        }
        .to_string()
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode a value into wire bytes.
    pub fn encode(&self, value: &FieldValue) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::with_capacity(self.byte_size());
        self.encode_into(value, &mut out)?;
        Ok(out)
    }

    /// Encode a value, appending to `out`.
    pub fn encode_into(&self, value: &FieldValue, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.encode_dims(value, &self.shape, out)
    }

    fn encode_dims(&self, value: &FieldValue, dims: &[usize], out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let Some((&len, rest)) = dims.split_first() else {
            return self.encode_element(value, out);
        };
        let items = value.as_array().ok_or_else(|| EncodeError::ShapeMismatch {
            field: self.name.clone(),
            expected: self.shape.clone(),
            detail: format!("got {}", value.type_name()),
        })?;
        if items.len() != len {
            return Err(EncodeError::ShapeMismatch {
                field: self.name.clone(),
                expected: self.shape.clone(),
                detail: format!("dimension of length {} got {} elements", len, items.len()),
            });
        }
        for item in items {
            self.encode_dims(item, rest, out)?;
        }
        Ok(())
    }

    fn encode_element(&self, value: &FieldValue, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let size = self.kind.element_size();
        match self.kind {
            kind if kind.is_unsigned() || kind.is_signed() => {
                let v = value.as_i128().ok_or_else(|| self.mismatch(value))?;
                let (min, max) = kind.int_range().unwrap_or((0, 0));
                if v < min || v > max {
                    return Err(EncodeError::OutOfRange {
                        field: self.name.clone(),
                        value: v.to_string(),
                        kind: kind.to_string(),
                    });
                }
                // In-range values keep their two's complement low bytes.
                self.put_uint(out, v as u64, size);
            }
            FieldKind::F32 => {
                let v = value.as_f64().ok_or_else(|| self.mismatch(value))?;
                self.put_uint(out, u64::from((v as f32).to_bits()), size);
            }
            FieldKind::F64 => {
                let v = value.as_f64().ok_or_else(|| self.mismatch(value))?;
                self.put_uint(out, v.to_bits(), size);
            }
            FieldKind::Bool => {
                let v = value.as_bool().ok_or_else(|| self.mismatch(value))?;
                out.push(u8::from(v));
            }
            FieldKind::DateTime => {
                let seconds = match value {
                    FieldValue::DateTime(dt) => dt.seconds(),
                    other => {
                        let raw = other.as_i128().ok_or_else(|| self.mismatch(other))?;
                        u32::try_from(raw).map_err(|_| EncodeError::OutOfRange {
                            field: self.name.clone(),
                            value: raw.to_string(),
                            kind: self.kind.to_string(),
                        })?
                    }
                };
                self.put_uint(out, u64::from(seconds), size);
            }
            FieldKind::Bytes => {
                let v = value.as_bytes().ok_or_else(|| self.mismatch(value))?;
                out.extend_from_slice(v);
            }
            FieldKind::Str => {
                let v = value.as_str().ok_or_else(|| self.mismatch(value))?;
                out.extend_from_slice(v.as_bytes());
            }
            _ => return Err(self.mismatch(value)),
        }
        Ok(())
    }

    fn put_uint(&self, out: &mut Vec<u8>, value: u64, size: usize) {
        let be = value.to_be_bytes();
        let low = &be[8 - size..];
        match self.byte_order {
            ByteOrder::Big => out.extend_from_slice(low),
            ByteOrder::Little => out.extend(low.iter().rev()),
        }
    }

    fn mismatch(&self, value: &FieldValue) -> EncodeError {
        EncodeError::TypeMismatch {
            field: self.name.clone(),
            expected: self.type_string(),
            actual: value.type_name().to_string(),
        }
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    /// Decode wire bytes into a value.
    ///
    /// Fixed-size fields require exactly [`byte_size`](Self::byte_size) bytes;
    /// variable-length fields take the whole slice.
    pub fn decode(&self, bytes: &[u8]) -> Result<FieldValue, DecodeError> {
        match self.kind {
            FieldKind::Bytes => return Ok(FieldValue::Bytes(bytes.to_vec())),
            FieldKind::Str => {
                let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                let text = std::str::from_utf8(&bytes[..end]).map_err(|_| DecodeError::InvalidUtf8 {
                    field: self.name.clone(),
                })?;
                return Ok(FieldValue::Str(text.to_string()));
            }
            _ => {}
        }

        if bytes.len() != self.byte_size() {
            return Err(DecodeError::Length {
                field: self.name.clone(),
                expected: self.byte_size(),
                actual: bytes.len(),
            });
        }
        Ok(self.decode_dims(bytes, &self.shape))
    }

    fn decode_dims(&self, bytes: &[u8], dims: &[usize]) -> FieldValue {
        let Some((&len, rest)) = dims.split_first() else {
            return self.decode_element(bytes);
        };
        let chunk = bytes.len() / len;
        FieldValue::Array(bytes.chunks(chunk).map(|c| self.decode_dims(c, rest)).collect())
    }

    fn decode_element(&self, bytes: &[u8]) -> FieldValue {
        let raw = self.get_uint(bytes);
        let size = bytes.len();
        match self.kind {
            kind if kind.is_unsigned() => FieldValue::Unsigned(raw),
            kind if kind.is_signed() => {
                let shift = 64 - 8 * size as u32;
                FieldValue::Signed(((raw << shift) as i64) >> shift)
            }
            FieldKind::F32 => FieldValue::Float(f64::from(f32::from_bits(raw as u32))),
            FieldKind::F64 => FieldValue::Float(f64::from_bits(raw)),
            FieldKind::Bool => FieldValue::Bool(raw != 0),
            FieldKind::DateTime => FieldValue::DateTime(ObcDateTime::from_seconds(raw as u32)),
            _ => FieldValue::Bytes(bytes.to_vec()),
        }
    }

    fn get_uint(&self, bytes: &[u8]) -> u64 {
        match self.byte_order {
            ByteOrder::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
            ByteOrder::Little => bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
        }
    }

    // ========================================================================
    // Textual input
    // ========================================================================

    /// Parse user-supplied text into a value for this field.
    ///
    /// Array fields take JSON arrays (`[1, 2, 3]`, `[[1, 0], [0, 1]]`).
    /// Integers accept a `0x` prefix, datetimes accept `now` or RFC 3339,
    /// bytes are hex.
    pub fn parse_value(&self, text: &str) -> Result<FieldValue, EncodeError> {
        if self.is_array() {
            let json: serde_json::Value = serde_json::from_str(text).map_err(|e| self.parse_error(text, e))?;
            return self.value_from_json(&json);
        }
        self.parse_scalar(text.trim())
    }

    /// Convert a JSON value into a value for this field.
    pub fn value_from_json(&self, json: &serde_json::Value) -> Result<FieldValue, EncodeError> {
        use serde_json::Value;
        match json {
            Value::Array(items) => Ok(FieldValue::Array(
                items.iter().map(|item| self.value_from_json(item)).collect::<Result<_, _>>()?,
            )),
            Value::Bool(b) => Ok(FieldValue::Bool(*b)),
            Value::Number(n) if self.kind.is_float() => n
                .as_f64()
                .map(FieldValue::Float)
                .ok_or_else(|| self.parse_error(&n.to_string(), "not a number")),
            Value::Number(n) => {
                if let Some(v) = n.as_u64() {
                    Ok(FieldValue::Unsigned(v))
                } else if let Some(v) = n.as_i64() {
                    Ok(FieldValue::Signed(v))
                } else {
                    Ok(FieldValue::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            Value::String(s) => self.parse_scalar(s),
            Value::Null | Value::Object(_) => Err(self.parse_error(&json.to_string(), "unsupported JSON value")),
        }
    }

    fn parse_scalar(&self, text: &str) -> Result<FieldValue, EncodeError> {
        match self.kind {
            kind if kind.is_unsigned() || kind.is_signed() => {
                let (negative, digits) = match text.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, text),
                };
                let magnitude = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
                    Some(hex_digits) => i128::from_str_radix(hex_digits, 16),
                    None => digits.parse::<i128>(),
                }
                .map_err(|e| self.parse_error(text, e))?;
                let v = if negative { -magnitude } else { magnitude };
                if let Ok(u) = u64::try_from(v) {
                    Ok(FieldValue::Unsigned(u))
                } else if let Ok(s) = i64::try_from(v) {
                    Ok(FieldValue::Signed(s))
                } else {
                    Err(EncodeError::OutOfRange {
                        field: self.name.clone(),
                        value: text.to_string(),
                        kind: self.kind.to_string(),
                    })
                }
            }
            FieldKind::F32 | FieldKind::F64 => {
                text.parse::<f64>().map(FieldValue::Float).map_err(|e| self.parse_error(text, e))
            }
            FieldKind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(FieldValue::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(FieldValue::Bool(false)),
                _ => Err(self.parse_error(text, "expected true or false")),
            },
            FieldKind::DateTime => ObcDateTime::parse(text)
                .map(FieldValue::DateTime)
                .map_err(|e| self.parse_error(text, e)),
            FieldKind::Bytes => {
                let digits = text.strip_prefix("0x").unwrap_or(text);
                hex::decode(digits).map(FieldValue::Bytes).map_err(|e| self.parse_error(text, e))
            }
            _ => Ok(FieldValue::Str(text.to_string())),
        }
    }

    fn parse_error(&self, input: &str, reason: impl std::fmt::Display) -> EncodeError {
        EncodeError::Parse {
            field: self.name.clone(),
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.type_string())
    }
}
