//! Decoded field values.

use crate::datetime::ObcDateTime;
use serde::Serialize;

/// The semantic value of one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Unsigned integer of any width.
    Unsigned(u64),
    /// Signed integer of any width.
    Signed(i64),
    /// Floating point value (f32 fields widen to f64).
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Epoch-relative timestamp.
    DateTime(ObcDateTime),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Str(String),
    /// Array elements, nested once per dimension.
    Array(Vec<FieldValue>),
}

impl FieldValue {
    /// Short description of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Unsigned(_) => "unsigned integer",
            FieldValue::Signed(_) => "signed integer",
            FieldValue::Float(_) => "float",
            FieldValue::Bool(_) => "bool",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Str(_) => "string",
            FieldValue::Array(_) => "array",
        }
    }

    /// Integer view of the value, if it is an integer.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            FieldValue::Unsigned(v) => Some(i128::from(*v)),
            FieldValue::Signed(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    /// Convert to u64 if possible.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i128().and_then(|v| u64::try_from(v).ok())
    }

    /// Convert to f64 if the value is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Unsigned(v) => Some(*v as f64),
            FieldValue::Signed(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to bool if possible.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the bytes, if this is a bytes value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Build an array value from anything convertible to field values.
    pub fn array<T: Into<FieldValue>>(items: impl IntoIterator<Item = T>) -> Self {
        FieldValue::Array(items.into_iter().map(Into::into).collect())
    }

    /// Borrow the elements, if this is an array value.
    pub fn as_array(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Array(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Unsigned(v) => write!(f, "{}", v),
            FieldValue::Signed(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::DateTime(v) => write!(f, "{}", v),
            FieldValue::Bytes(v) => write!(f, "0x{}", hex::encode(v)),
            FieldValue::Str(v) => write!(f, "{:?}", v),
            FieldValue::Array(items) => {
                let strs: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", strs.join(", "))
            }
        }
    }
}

macro_rules! impl_from {
    ($variant:ident, $conv:ty, $($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(v: $t) -> Self {
                    FieldValue::$variant(<$conv>::from(v))
                }
            }
        )*
    };
}

impl_from!(Unsigned, u64, u8, u16, u32, u64);
impl_from!(Signed, i64, i8, i16, i32, i64);
impl_from!(Float, f64, f32, f64);
impl_from!(Bool, bool, bool);
impl_from!(DateTime, ObcDateTime, ObcDateTime);
impl_from!(Bytes, Vec<u8>, Vec<u8>);
impl_from!(Str, String, String);

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

/// Ordered name → value map produced by decoding a field list.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Record {
    entries: Vec<(String, FieldValue)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Callers guarantee unique names.
    pub(crate) fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.entries.push((name.into(), value));
    }

    /// Look up a value by field name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the record has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Values in field order.
    pub fn values(&self) -> Vec<FieldValue> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(FieldValue::from(42u16), FieldValue::Unsigned(42));
        assert_eq!(FieldValue::from(-3i8), FieldValue::Signed(-3));
        assert_eq!(FieldValue::from(vec![1u8, 2]), FieldValue::Bytes(vec![1, 2]));
        assert_eq!(
            FieldValue::array([1u16, 2]),
            FieldValue::Array(vec![FieldValue::Unsigned(1), FieldValue::Unsigned(2)])
        );
        assert_eq!(FieldValue::Signed(7).as_u64(), Some(7));
        assert_eq!(FieldValue::Signed(-7).as_u64(), None);
    }

    #[test]
    fn test_record_lookup_and_display() {
        let mut record = Record::new();
        record.push("a", FieldValue::Unsigned(1));
        record.push("b", FieldValue::Str("hi".to_string()));
        assert_eq!(record.get("b"), Some(&FieldValue::Str("hi".to_string())));
        assert_eq!(record.get("c"), None);
        assert_eq!(record.to_string(), "{a: 1, b: \"hi\"}");
    }
}
