//! Ordered field lists describing one message body.

use crate::error::{DecodeError, EncodeError, FieldError};
use crate::field::Field;
use crate::kind::ByteOrder;
use crate::value::{FieldValue, Record};

/// An ordered, immutable sequence of fields.
///
/// At most one field may be variable-length, and it must be the last one,
/// so every other field can be located by a fixed offset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldList {
    fields: Vec<Field>,
    fixed_size: usize,
}

impl FieldList {
    /// Validate and build a field list.
    pub fn new(fields: Vec<Field>) -> Result<Self, FieldError> {
        let mut variable: Option<&Field> = None;
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name() == field.name()) {
                return Err(FieldError::DuplicateName(field.name().to_string()));
            }
            if !field.is_variable() {
                continue;
            }
            if let Some(first) = variable {
                return Err(FieldError::MultipleVariable {
                    first: first.name().to_string(),
                    second: field.name().to_string(),
                });
            }
            variable = Some(field);
        }
        if let Some(var) = variable {
            let last = fields.last().map(Field::name);
            if last != Some(var.name()) {
                return Err(FieldError::VariableNotLast {
                    field: var.name().to_string(),
                });
            }
        }

        let fixed_size = fields.iter().map(Field::byte_size).sum();
        Ok(FieldList { fields, fixed_size })
    }

    /// An empty field list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `(name, type string)` pairs.
    pub fn from_type_strs<'a>(
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
        byte_order: ByteOrder,
    ) -> Result<Self, FieldError> {
        let fields = entries
            .into_iter()
            .map(|(name, ty)| Field::from_type_str(name, ty, byte_order))
            .collect::<Result<Vec<_>, _>>()?;
        FieldList::new(fields)
    }

    /// Fields in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the list has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sum of the sizes of all fixed-size fields.
    pub fn fixed_size(&self) -> usize {
        self.fixed_size
    }

    /// Whether the last field is variable-length.
    pub fn has_variable_field(&self) -> bool {
        self.fields.last().is_some_and(Field::is_variable)
    }

    /// Encode one value per field, in order.
    pub fn encode(&self, values: &[FieldValue]) -> Result<Vec<u8>, EncodeError> {
        if values.len() != self.fields.len() {
            return Err(EncodeError::ValueCount {
                expected: self.fields.len(),
                actual: values.len(),
            });
        }
        let mut out = Vec::with_capacity(self.fixed_size);
        for (field, value) in self.fields.iter().zip(values) {
            field.encode_into(value, &mut out)?;
        }
        Ok(out)
    }

    /// Decode a message body into a record.
    pub fn decode(&self, bytes: &[u8]) -> Result<Record, DecodeError> {
        if bytes.len() < self.fixed_size {
            return Err(DecodeError::TooShort {
                expected: self.fixed_size,
                actual: bytes.len(),
            });
        }
        if !self.has_variable_field() && bytes.len() != self.fixed_size {
            return Err(DecodeError::LengthMismatch {
                expected: self.fixed_size,
                actual: bytes.len(),
            });
        }

        let mut record = Record::new();
        let mut offset = 0;
        for field in &self.fields {
            let end = if field.is_variable() {
                bytes.len()
            } else {
                offset + field.byte_size()
            };
            record.push(field.name(), field.decode(&bytes[offset..end])?);
            offset = end;
        }
        Ok(record)
    }
}

impl std::fmt::Display for FieldList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strs: Vec<String> = self.fields.iter().map(|field| field.to_string()).collect();
        write!(f, "({})", strs.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(&str, &str)]) -> Result<FieldList, FieldError> {
        FieldList::from_type_strs(entries.iter().copied(), ByteOrder::Big)
    }

    #[test]
    fn test_round_trip_mixed() {
        let fl = list(&[("mode", "u8"), ("gain", "f32[3]"), ("when", "datetime"), ("label", "str")]).unwrap();
        assert_eq!(fl.fixed_size(), 1 + 12 + 4);
        assert!(fl.has_variable_field());

        let values = vec![
            FieldValue::Unsigned(2),
            FieldValue::array([0.5f32, 1.0, -2.0]),
            FieldValue::DateTime(crate::ObcDateTime::from_seconds(1234)),
            FieldValue::from("sun-pointing"),
        ];
        let bytes = fl.encode(&values).unwrap();
        assert_eq!(bytes.len(), 17 + "sun-pointing".len());

        let record = fl.decode(&bytes).unwrap();
        assert_eq!(record.values(), values);
        assert_eq!(record.get("mode"), Some(&FieldValue::Unsigned(2)));
    }

    #[test]
    fn test_variable_rules() {
        assert!(matches!(
            list(&[("a", "str"), ("b", "bytes")]),
            Err(FieldError::MultipleVariable { .. })
        ));
        assert!(matches!(
            list(&[("a", "bytes"), ("b", "u8")]),
            Err(FieldError::VariableNotLast { .. })
        ));
        assert!(matches!(list(&[("a", "u8"), ("a", "u8")]), Err(FieldError::DuplicateName(_))));
    }

    #[test]
    fn test_value_count() {
        let fl = list(&[("x", "u16")]).unwrap();
        assert!(matches!(
            fl.encode(&[]),
            Err(EncodeError::ValueCount { expected: 1, actual: 0 })
        ));
    }

    #[test]
    fn test_decode_lengths() {
        let fl = list(&[("x", "u16"), ("y", "u8")]).unwrap();
        assert!(matches!(fl.decode(&[0, 1]), Err(DecodeError::TooShort { .. })));
        assert!(matches!(fl.decode(&[0, 1, 2, 3]), Err(DecodeError::LengthMismatch { .. })));

        let fl = list(&[("x", "u16"), ("tail", "bytes")]).unwrap();
        let record = fl.decode(&[0, 1]).unwrap();
        assert_eq!(record.get("tail"), Some(&FieldValue::Bytes(vec![])));
    }

    #[test]
    fn test_empty_list() {
        let fl = FieldList::empty();
        assert_eq!(fl.encode(&[]).unwrap(), Vec::<u8>::new());
        assert!(fl.decode(&[]).unwrap().is_empty());
        assert!(fl.decode(&[0]).is_err());
    }
}
