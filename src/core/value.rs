use serde::{Deserialize, Serialize};
use std::fmt;

/// A scalar field value of a stored record or an incoming attribute set.
///
/// Serialized untagged, so JSON `null`, booleans, numbers and strings map
/// directly onto the variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
        }
    }

    /// Blank means "the user left this input empty": null or whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Form-style truthiness used for removal and keep flags.
    ///
    /// Checkbox inputs arrive as `"1"`/`"0"`, `"on"`, `"true"` and so on,
    /// so text is matched case-insensitively against the usual spellings.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Integer(i) => *i == 1,
            Self::Float(f) => *f == 1.0,
            Self::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "t" | "true" | "on" | "yes"
            ),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) => whole_float(*f),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                if a.is_nan() && b.is_nan() {
                    return true;
                }
                (a - b).abs() < f64::EPSILON
            }
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(i), Self::Float(f)) | (Self::Float(f), Self::Integer(i)) => {
                whole_float(*f) == Some(*i)
            }
            _ => false,
        }
    }
}

/// `f` as an integer, if it is a whole number inside the i64 range.
fn whole_float(f: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            _ => false,
        }
    }

    /// Reads text input (form fields arrive as strings) as this type.
    ///
    /// Blank text becomes NULL for non-text columns. Text that does not parse
    /// is returned unchanged so validation can report the mismatch.
    pub fn cast(&self, value: &Value) -> Value {
        let Value::Text(text) = value else {
            return value.clone();
        };
        if *self != Self::Text && value.is_blank() {
            return Value::Null;
        }
        let trimmed = text.trim();
        let cast = match self {
            Self::Text => None,
            Self::Integer => trimmed.parse().ok().map(Value::Integer),
            Self::Float => trimmed.parse().ok().map(Value::Float),
            Self::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "1" | "t" | "true" | "on" | "yes" => Some(Value::Boolean(true)),
                "0" | "f" | "false" | "off" | "no" => Some(Value::Boolean(false)),
                _ => None,
            },
        };
        cast.unwrap_or_else(|| value.clone())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_equality() {
        assert_eq!(Value::Integer(42), Value::Integer(42));
        assert_eq!(Value::Integer(3), Value::Float(3.0));
        assert_ne!(Value::Text("1".into()), Value::Integer(1));
    }

    #[test]
    fn test_large_integer_against_float() {
        // 2^53 + 1 has no exact f64 form
        let big = 9_007_199_254_740_993i64;
        assert_ne!(Value::Integer(big), Value::Float(9_007_199_254_740_992.0));
        assert_ne!(Value::Integer(3), Value::Float(3.5));
        assert_ne!(Value::Integer(i64::MAX), Value::Float(i64::MAX as f64));
        assert_eq!(Value::Float(9_007_199_254_740_992.0).as_i64(), Some(9_007_199_254_740_992));
        assert_eq!(Value::Float(i64::MAX as f64).as_i64(), None);
    }

    #[test]
    fn test_cast_form_text() {
        assert_eq!(DataType::Integer.cast(&Value::from(" 3 ")), Value::Integer(3));
        assert_eq!(DataType::Float.cast(&Value::from("2.5")), Value::Float(2.5));
        assert_eq!(DataType::Boolean.cast(&Value::from("0")), Value::Boolean(false));
        assert_eq!(DataType::Boolean.cast(&Value::from("on")), Value::Boolean(true));
        assert_eq!(DataType::Integer.cast(&Value::from("")), Value::Null);
        assert_eq!(DataType::Text.cast(&Value::from("")), Value::from(""));
        assert_eq!(DataType::Integer.cast(&Value::from("three")), Value::from("three"));
        assert_eq!(DataType::Integer.cast(&Value::Integer(4)), Value::Integer(4));
    }

    #[test]
    fn test_blank_values() {
        assert!(Value::Null.is_blank());
        assert!(Value::Text("   ".into()).is_blank());
        assert!(!Value::Text("x".into()).is_blank());
        assert!(!Value::Boolean(false).is_blank());
        assert!(!Value::Integer(0).is_blank());
    }

    #[test]
    fn test_checkbox_truthiness() {
        for truthy in ["1", "true", "on", "YES", " t "] {
            assert!(Value::from(truthy).is_truthy(), "{truthy}");
        }
        for falsy in ["0", "false", "off", ""] {
            assert!(!Value::from(falsy).is_truthy(), "{falsy}");
        }
        assert!(Value::Integer(1).is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(!Value::Null.is_truthy());
    }

    #[test]
    fn test_untagged_json_mapping() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 7, 1.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Boolean(true),
                Value::Integer(7),
                Value::Float(1.5),
                Value::Text("x".into())
            ]
        );
    }

    #[test]
    fn test_type_compatibility() {
        assert!(DataType::Integer.is_compatible(&Value::Integer(42)));
        assert!(DataType::Integer.is_compatible(&Value::Null));
        assert!(DataType::Float.is_compatible(&Value::Integer(1)));
        assert!(!DataType::Integer.is_compatible(&Value::Text("hello".into())));
    }
}
