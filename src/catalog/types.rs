//! Column types and literal encoding
//!
//! Types are immutable once parsed. Every literal that reaches generated SQL
//! goes through [`Type::sql_literal`], which either emits a validated numeric
//! token or a single-quoted, cast string.

use std::fmt;

use serde_json::Value;

use crate::error::{ErmError, ErmResult};
use crate::sql::quote_literal;

const INT_TYPES: &[&str] = &["int2", "int4", "int8", "serial2", "serial4", "serial8"];
const FLOAT_TYPES: &[&str] = &["float4", "float8"];
const TEXT_TYPES: &[&str] = &["text", "varchar", "bpchar", "char", "citext", "markdown", "longtext"];
const TEMPORAL_TYPES: &[&str] = &["timestamptz", "timestamp", "date", "time", "timetz", "interval"];

/// A column type: scalar, array of scalar, or named domain over a base
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Built-in scalar, e.g. `int8` or `text`
    Scalar(String),
    /// One-dimensional array of a scalar or domain
    Array(Box<Type>),
    /// Named domain with its base type
    Domain { name: String, base: Box<Type> },
}

impl Type {
    /// Create a scalar type
    pub fn scalar(name: impl Into<String>) -> Self {
        Type::Scalar(name.into())
    }

    /// Create an array type
    pub fn array(base: Type) -> Self {
        Type::Array(Box::new(base))
    }

    /// Create a domain type
    pub fn domain(name: impl Into<String>, base: Type) -> Self {
        Type::Domain {
            name: name.into(),
            base: Box::new(base),
        }
    }

    /// Parse a type name such as `int4` or `text[]`
    pub fn parse(name: &str) -> ErmResult<Self> {
        let name = name.trim();
        if let Some(base) = name.strip_suffix("[]") {
            if base.ends_with("[]") {
                return Err(ErmError::BadData(format!(
                    "multi-dimensional array type {} not supported",
                    name
                )));
            }
            return Ok(Type::array(Type::parse(base)?));
        }
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
        {
            return Err(ErmError::BadData(format!("invalid type name \"{}\"", name)));
        }
        Ok(Type::Scalar(name.to_string()))
    }

    /// Whether this is an array type
    pub fn is_array(&self) -> bool {
        match self {
            Type::Array(_) => true,
            Type::Domain { base, .. } => base.is_array(),
            Type::Scalar(_) => false,
        }
    }

    /// Whether this is a domain type
    pub fn is_domain(&self) -> bool {
        matches!(self, Type::Domain { .. })
    }

    /// Element type for arrays, domain base for domains
    pub fn base_type(&self) -> Option<&Type> {
        match self {
            Type::Array(b) | Type::Domain { base: b, .. } => Some(b),
            Type::Scalar(_) => None,
        }
    }

    /// Innermost scalar name, looking through arrays and domains
    pub fn scalar_name(&self) -> &str {
        match self {
            Type::Scalar(n) => n,
            Type::Array(b) | Type::Domain { base: b, .. } => b.scalar_name(),
        }
    }

    /// Type used for storage: domains resolve to their base, serials to ints
    pub fn storage_type(&self) -> Type {
        match self {
            Type::Scalar(n) => Type::Scalar(storage_scalar(n).to_string()),
            Type::Array(b) => Type::Array(Box::new(b.storage_type())),
            Type::Domain { base, .. } => base.storage_type(),
        }
    }

    /// SQL text for the type name
    pub fn sql(&self) -> String {
        match self {
            Type::Scalar(n) => n.clone(),
            Type::Array(b) => format!("{}[]", b.sql()),
            Type::Domain { name, .. } => name.clone(),
        }
    }

    /// SQL text for the storage type, usable in casts and temp-table DDL
    pub fn sql_storage(&self) -> String {
        self.storage_type().sql()
    }

    /// Whether values are text (looking through domains, not arrays)
    pub fn is_text(&self) -> bool {
        match self {
            Type::Scalar(n) => TEXT_TYPES.contains(&n.as_str()),
            Type::Domain { base, .. } => base.is_text(),
            Type::Array(_) => false,
        }
    }

    /// Whether values are integral or floating numbers
    pub fn is_numeric(&self) -> bool {
        match self {
            Type::Scalar(n) => {
                let n = storage_scalar(n);
                INT_TYPES.contains(&n) || FLOAT_TYPES.contains(&n) || n == "numeric"
            }
            Type::Domain { base, .. } => base.is_numeric(),
            Type::Array(_) => false,
        }
    }

    /// Whether values are dates, times or intervals
    pub fn is_temporal(&self) -> bool {
        match self {
            Type::Scalar(n) => TEMPORAL_TYPES.contains(&n.as_str()),
            Type::Domain { base, .. } => base.is_temporal(),
            Type::Array(_) => false,
        }
    }

    /// Element type of an array (looking through domains), else the type itself
    pub fn element_type(&self) -> &Type {
        element_type(self)
    }

    /// Whether values are JSON documents
    pub fn is_json(&self) -> bool {
        !self.is_array() && matches!(self.scalar_name(), "json" | "jsonb")
    }

    fn is_integer(&self) -> bool {
        !self.is_array() && INT_TYPES.contains(&self.scalar_name())
    }

    fn is_float(&self) -> bool {
        !self.is_array() && FLOAT_TYPES.contains(&self.scalar_name())
    }

    fn is_boolean(&self) -> bool {
        !self.is_array() && self.scalar_name() == "boolean"
    }

    /// Encode a value as an injection-safe SQL literal of this type
    pub fn sql_literal(&self, value: &Value) -> ErmResult<String> {
        if value.is_null() {
            return Ok(format!("NULL::{}", self.sql_storage()));
        }
        if self.is_json() {
            return Ok(format!(
                "{}::{}",
                quote_literal(&value.to_string())?,
                self.sql_storage()
            ));
        }
        if self.is_array() {
            return match value {
                Value::Array(items) => {
                    let elem = element_type(self);
                    let encoded = items
                        .iter()
                        .map(|v| elem.sql_literal(v))
                        .collect::<ErmResult<Vec<_>>>()?;
                    Ok(format!(
                        "ARRAY[{}]::{}",
                        encoded.join(", "),
                        self.sql_storage()
                    ))
                }
                Value::String(s) => Ok(format!("{}::{}", quote_literal(s)?, self.sql_storage())),
                other => Err(ErmError::BadData(format!(
                    "value {} is not valid for array type {}",
                    other,
                    self.sql()
                ))),
            };
        }
        if self.is_integer() {
            return match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(|i| i.to_string())
                    .map_err(|_| self.bad_value(value)),
                _ => Err(self.bad_value(value)),
            };
        }
        if self.is_float() {
            let f = match value {
                Value::Number(n) => n.as_f64().ok_or_else(|| self.bad_value(value))?,
                Value::String(s) => s.trim().parse::<f64>().map_err(|_| self.bad_value(value))?,
                _ => return Err(self.bad_value(value)),
            };
            if !f.is_finite() {
                return Ok(format!("'{}'::{}", f, self.sql_storage()));
            }
            return Ok(format!("{:?}", f));
        }
        if self.is_boolean() {
            let b = match value {
                Value::Bool(b) => *b,
                Value::String(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "t" | "yes" | "y" | "1" => true,
                    "false" | "f" | "no" | "n" | "0" => false,
                    _ => return Err(self.bad_value(value)),
                },
                _ => return Err(self.bad_value(value)),
            };
            return Ok(if b { "True".into() } else { "False".into() });
        }
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => return Err(self.bad_value(other)),
        };
        Ok(format!("{}::{}", quote_literal(&text)?, self.sql_storage()))
    }

    /// Parse a textual value (as from a URL or CSV cell) into a JSON value
    ///
    /// Empty text is treated as NULL for non-text types.
    pub fn parse_value(&self, text: &str) -> ErmResult<Value> {
        if text.is_empty() && !self.is_text() {
            return Ok(Value::Null);
        }
        if self.is_integer() {
            return text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| self.bad_value(&Value::String(text.to_string())));
        }
        if self.is_float() {
            return text
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| self.bad_value(&Value::String(text.to_string())));
        }
        if self.is_json() {
            return Ok(serde_json::from_str(text)?);
        }
        Ok(Value::String(text.to_string()))
    }

    fn bad_value(&self, value: &Value) -> ErmError {
        ErmError::BadData(format!(
            "value {} is not valid for type {}",
            value,
            self.sql()
        ))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

fn storage_scalar(name: &str) -> &str {
    match name {
        "serial2" => "int2",
        "serial4" => "int4",
        "serial8" => "int8",
        other => other,
    }
}

fn element_type(t: &Type) -> &Type {
    match t {
        Type::Array(b) => b,
        Type::Domain { base, .. } => element_type(base),
        Type::Scalar(_) => t,
    }
}
