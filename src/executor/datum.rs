//! Datum type - one value in a result row

use serde_json::Value;

/// A single value in a row
#[derive(Debug, Clone, Default)]
pub enum Datum {
    /// NULL value
    #[default]
    Null,
    Bool(bool),
    /// Integer value (int2, int4, int8)
    Int(i64),
    /// Floating point value (float4, float8, numeric results)
    Float(f64),
    /// Text and every type rendered as text (timestamps, uuids, ...)
    String(String),
    /// json, jsonb and array values
    Json(Value),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert to i64, returns None if NULL or not convertible
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Datum::Int(i) => Some(*i),
            Datum::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Convert to f64, returns None if NULL or not convertible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Datum::Float(f) => Some(*f),
            Datum::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    /// JSON rendering, as used for row output
    pub fn to_json(&self) -> Value {
        match self {
            Datum::Null => Value::Null,
            Datum::Bool(b) => Value::Bool(*b),
            Datum::Int(i) => Value::from(*i),
            Datum::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            Datum::String(s) => Value::String(s.clone()),
            Datum::Json(v) => v.clone(),
        }
    }
}

impl From<Value> for Datum {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Datum::Null,
            Value::Bool(b) => Datum::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Datum::Int(i),
                None => n.as_f64().map(Datum::Float).unwrap_or(Datum::Null),
            },
            Value::String(s) => Datum::String(s),
            other => Datum::Json(other),
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Null, Datum::Null) => true,
            (Datum::Bool(a), Datum::Bool(b)) => a == b,
            (Datum::Int(a), Datum::Int(b)) => a == b,
            (Datum::Float(a), Datum::Float(b)) => a.to_bits() == b.to_bits(),
            (Datum::String(a), Datum::String(b)) => a == b,
            (Datum::Json(a), Datum::Json(b)) => a == b,
            // Cross-type numeric comparisons
            (Datum::Int(a), Datum::Float(b)) | (Datum::Float(b), Datum::Int(a)) => {
                (*a as f64).to_bits() == b.to_bits()
            }
            _ => false,
        }
    }
}

impl Eq for Datum {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_datum_from_json() {
        assert!(Datum::from(Value::Null).is_null());
        assert_eq!(Datum::from(json!(42)), Datum::Int(42));
        assert_eq!(Datum::from(json!(2.5)), Datum::Float(2.5));
        assert!(matches!(Datum::from(json!([1, 2])), Datum::Json(_)));
        assert_eq!(Datum::from(json!("x")).as_str(), Some("x"));
    }

    #[test]
    fn test_datum_conversions() {
        assert_eq!(Datum::Int(3).as_float(), Some(3.0));
        assert_eq!(Datum::Float(4.0).as_int(), Some(4));
        assert_eq!(Datum::Float(4.5).as_int(), None);
        assert_eq!(Datum::Bool(true).as_bool(), Some(true));
        assert_eq!(Datum::Float(f64::NAN).to_json(), json!("NaN"));
    }

    #[test]
    fn test_datum_equality() {
        assert_eq!(Datum::Int(1), Datum::Float(1.0));
        assert_ne!(Datum::Int(1), Datum::String("1".into()));
        assert_eq!(Datum::Null, Datum::Null);
    }
}
