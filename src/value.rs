//! Canonical value representation for SOAP call arguments and return values.
//!
//! Operation arguments arrive as [`SoapValue`]s and return values are
//! premarshalled into them before serialization. Plain values keep their
//! kind: strings stay strings, integers stay integers. Nothing is flattened
//! to text until the type code writes it out.

use crate::error::SoapError;
use serde::Serialize;

/// A value carried in a SOAP body.
#[derive(Debug, Clone, PartialEq)]
pub enum SoapValue {
    /// `xsi:nil`
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    /// Ordered items (SOAP-ENC array)
    List(Vec<SoapValue>),
    /// Named members in document order
    Struct(Vec<(String, SoapValue)>),
}

impl SoapValue {
    /// Short kind name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Struct(_) => "struct",
        }
    }

    /// Look up a struct member by name.
    pub fn member(&self, name: &str) -> Option<&SoapValue> {
        match self {
            Self::Struct(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<bool> for SoapValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for SoapValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SoapValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for SoapValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for SoapValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for SoapValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl<T: Into<SoapValue>> From<Vec<T>> for SoapValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<SoapValue>> From<Option<T>> for SoapValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for SoapValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;

        match v {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                // u64 above i64::MAX and all non-integral numbers
                None => Self::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Struct(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Normalize any serializable value into its canonical [`SoapValue`] form.
///
/// Structs and maps become [`SoapValue::Struct`], sequences become
/// [`SoapValue::List`], `Option::None` and unit become [`SoapValue::Null`].
pub fn premarshal<T: Serialize + ?Sized>(value: &T) -> Result<SoapValue, SoapError> {
    let json = serde_json::to_value(value)
        .map_err(|e| SoapError::Serialization(format!("cannot premarshal value: {}", e)))?;
    Ok(SoapValue::from(json))
}
