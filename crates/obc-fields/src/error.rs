//! Field error types.

use thiserror::Error;

/// Errors raised while building a [`Field`](crate::Field) or
/// [`FieldList`](crate::FieldList).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// An array dimension is zero, so the field would hold no elements.
    #[error("field '{field}': array shape {shape:?} has no elements")]
    EmptyShape {
        /// Field name.
        field: String,
        /// Offending shape.
        shape: Vec<usize>,
    },

    /// More than two array dimensions were requested.
    #[error("field '{field}': at most two array dimensions are supported, got {dims}")]
    TooManyDimensions {
        /// Field name.
        field: String,
        /// Number of dimensions requested.
        dims: usize,
    },

    /// A variable-length kind was given an array shape.
    #[error("field '{field}': variable-length field cannot be an array")]
    VariableArray {
        /// Field name.
        field: String,
    },

    /// Two variable-length fields in one list.
    #[error("fields '{first}' and '{second}' are both variable-length")]
    MultipleVariable {
        /// First variable-length field.
        first: String,
        /// Second variable-length field.
        second: String,
    },

    /// The variable-length field is followed by other fields.
    #[error("variable-length field '{field}' must be the last field")]
    VariableNotLast {
        /// Field name.
        field: String,
    },

    /// Two fields of the same list share a name.
    #[error("duplicate field name '{0}'")]
    DuplicateName(String),

    /// The type string could not be parsed.
    #[error("invalid type string '{type_str}': {reason}")]
    InvalidType {
        /// The type string as written.
        type_str: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl FieldError {
    /// Create an invalid type string error.
    pub fn invalid_type(type_str: impl Into<String>, reason: impl Into<String>) -> Self {
        FieldError::InvalidType {
            type_str: type_str.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while encoding values into wire bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The value's type does not fit the field's kind.
    #[error("field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Expected kind description.
        expected: String,
        /// Description of the value supplied.
        actual: String,
    },

    /// Integer value does not fit the field width.
    #[error("field '{field}': value {value} out of range for {kind}")]
    OutOfRange {
        /// Field name.
        field: String,
        /// The offending value, rendered.
        value: String,
        /// Field kind.
        kind: String,
    },

    /// Array value does not match the field shape.
    #[error("field '{field}': expected array shape {expected:?}, {detail}")]
    ShapeMismatch {
        /// Field name.
        field: String,
        /// Declared shape.
        expected: Vec<usize>,
        /// What did not match.
        detail: String,
    },

    /// Wrong number of values for a field list.
    #[error("expected {expected} values, got {actual}")]
    ValueCount {
        /// Number of fields.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// Textual input could not be parsed into a value.
    #[error("field '{field}': cannot parse '{input}': {reason}")]
    Parse {
        /// Field name.
        field: String,
        /// The input text.
        input: String,
        /// Why parsing failed.
        reason: String,
    },
}

/// Errors raised while decoding wire bytes into values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The slice handed to a fixed-size field has the wrong length.
    #[error("field '{field}': expected {expected} bytes, got {actual}")]
    Length {
        /// Field name.
        field: String,
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },

    /// Message shorter than the fixed part of the field list.
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },

    /// Message length differs from a fully fixed-size field list.
    #[error("message length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Exact byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },

    /// String field is not valid UTF-8.
    #[error("field '{field}': invalid UTF-8")]
    InvalidUtf8 {
        /// Field name.
        field: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_field() {
        let err = EncodeError::OutOfRange {
            field: "x".to_string(),
            value: "70000".to_string(),
            kind: "u16".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'x'"));
        assert!(msg.contains("70000"));

        let err = DecodeError::Length {
            field: "temp".to_string(),
            expected: 4,
            actual: 2,
        };
        assert!(err.to_string().contains("'temp'"));
    }
}
