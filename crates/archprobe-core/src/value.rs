//! Typed values stored in configuration and report documents.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Ordered mapping from field name to value.
pub type Document = BTreeMap<String, Value>;

/// Tagged union for every value a persisted document can hold.
///
/// Integers and floats are kept apart so that `64` and `64.0` survive a
/// round trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Explicit `null`, usually the result of a manual edit.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Signed integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// UTF-8 string scalar.
    Str(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Nested document.
    Doc(Document),
}

impl Value {
    /// Returns the boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the integer payload. Floats are not converted here; see
    /// [`FieldValue`] for the narrowing rules.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns any numeric payload widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the string payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the list payload.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    /// Returns the nested document payload.
    pub fn as_doc(&self) -> Option<&Document> {
        match self {
            Value::Doc(doc) => Some(doc),
            _ => None,
        }
    }

    /// Returns the nested document payload mutably.
    pub fn as_doc_mut(&mut self) -> Option<&mut Document> {
        match self {
            Value::Doc(doc) => Some(doc),
            _ => None,
        }
    }

    /// True for integer and float values.
    pub fn is_num(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Short name of the stored kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Doc(_) => "document",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value}"),
            Value::List(_) | Value::Doc(_) => {
                let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                write!(f, "{text}")
            }
        }
    }
}

/// Conversion contract between Rust types and [`Value`].
///
/// Integer targets accept integers within range and floats that are finite,
/// integral and within range. Float targets accept any number. Every other
/// combination yields `None`.
pub trait FieldValue: Sized {
    /// Converts a stored value, returning `None` when the kind or range does
    /// not fit.
    fn from_value(value: &Value) -> Option<Self>;

    /// Converts into a storable value.
    fn into_value(self) -> Value;
}

/// Marker for the numeric types accepted by `cfg_num`.
pub trait NumericField: FieldValue + Copy + Display {}

fn integral_float(value: f64) -> Option<i128> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1.0e36 {
        Some(value as i128)
    } else {
        None
    }
}

macro_rules! impl_int_field {
    ($($ty:ty),*) => {
        $(
            impl FieldValue for $ty {
                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::Int(raw) => <$ty>::try_from(*raw).ok(),
                        Value::Float(raw) => {
                            integral_float(*raw).and_then(|wide| <$ty>::try_from(wide).ok())
                        }
                        _ => None,
                    }
                }

                fn into_value(self) -> Value {
                    match i64::try_from(self) {
                        Ok(raw) => Value::Int(raw),
                        Err(_) => Value::Float(self as f64),
                    }
                }
            }

            impl NumericField for $ty {}

            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    value.into_value()
                }
            }
        )*
    };
}

impl_int_field!(i32, i64, u8, u16, u32, u64, usize);

impl FieldValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl NumericField for f64 {}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl FieldValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        let raw = value.as_f64()?;
        let narrow = raw as f32;
        // Finite values beyond the f32 range would otherwise become infinite.
        (narrow.is_finite() || !raw.is_finite()).then_some(narrow)
    }

    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }
}

impl NumericField for f32 {}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value as f64)
    }
}

impl FieldValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl FieldValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_list()?.iter().map(T::from_value).collect()
    }

    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(FieldValue::into_value).collect())
    }
}

impl FieldValue for Document {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_doc().cloned()
    }

    fn into_value(self) -> Value {
        Value::Doc(self)
    }
}

impl FieldValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }

    fn into_value(self) -> Value {
        self
    }
}
