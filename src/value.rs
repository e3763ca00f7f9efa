//! Runtime value algebra.
//!
//! Every field an event carries, and every constant a query mentions, is a
//! [`Value`]. Comparison operators return `Value::Bool` wrapped in `Result`:
//! cross-variant comparisons other than Int/Float widening are a
//! [`StreamQlError::TypeMismatch`], which the filter and join stages treat as
//! a per-event failure rather than a pipeline fault.

use crate::error::StreamQlError;
use std::fmt;

/// A dynamically typed runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Value {
    /// Convert a decoded JSON value. Integral JSON numbers become `Int`,
    /// other numbers `Float`. Arrays and objects have no field-level
    /// representation and map to `Null`.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Value::Null,
        }
    }

    /// Render back to JSON (non-finite floats become `null`).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::from(s.clone()),
            Value::Bool(b) => serde_json::Value::from(*b),
            Value::Null => serde_json::Value::Null,
        }
    }

    /// Variant name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Str(_) => "String",
            Value::Bool(_) => "Bool",
            Value::Null => "Null",
        }
    }

    fn mismatch(&self, op: &str, other: &Value) -> StreamQlError {
        StreamQlError::TypeMismatch(format!(
            "{} not defined between {} and {}",
            op,
            self.type_name(),
            other.type_name()
        ))
    }

    /// Equality. Int widens to Float when compared against Float. `Null`
    /// equals only `Null`; comparing `Null` against anything else is `false`,
    /// not an error. All other cross-variant pairs are a type mismatch.
    pub fn eq(&self, other: &Value) -> Result<Value, StreamQlError> {
        let result = match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => return Err(self.mismatch("=", other)),
        };
        Ok(Value::Bool(result))
    }

    /// Logical negation of [`Value::eq`].
    pub fn neq(&self, other: &Value) -> Result<Value, StreamQlError> {
        match self.eq(other)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => unreachable!("eq always yields Bool"),
        }
    }

    fn ordering(&self, op: &str, other: &Value) -> Result<std::cmp::Ordering, StreamQlError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => {
                a.partial_cmp(b).ok_or_else(|| self.mismatch(op, other))
            }
            (Value::Int(a), Value::Float(b)) => (*a as f64)
                .partial_cmp(b)
                .ok_or_else(|| self.mismatch(op, other)),
            (Value::Float(a), Value::Int(b)) => a
                .partial_cmp(&(*b as f64))
                .ok_or_else(|| self.mismatch(op, other)),
            _ => Err(self.mismatch(op, other)),
        }
    }

    pub fn lt(&self, other: &Value) -> Result<Value, StreamQlError> {
        Ok(Value::Bool(self.ordering("<", other)?.is_lt()))
    }

    pub fn lte(&self, other: &Value) -> Result<Value, StreamQlError> {
        Ok(Value::Bool(self.ordering("<=", other)?.is_le()))
    }

    pub fn gt(&self, other: &Value) -> Result<Value, StreamQlError> {
        Ok(Value::Bool(self.ordering(">", other)?.is_gt()))
    }

    pub fn gte(&self, other: &Value) -> Result<Value, StreamQlError> {
        Ok(Value::Bool(self.ordering(">=", other)?.is_ge()))
    }

    /// Logical AND. Both operands must be `Bool`.
    pub fn and(&self, other: &Value) -> Result<Value, StreamQlError> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
            _ => Err(self.mismatch("AND", other)),
        }
    }

    /// Logical OR. Both operands must be `Bool`.
    pub fn or(&self, other: &Value) -> Result<Value, StreamQlError> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
            _ => Err(self.mismatch("OR", other)),
        }
    }

    /// Logical NOT. The operand must be `Bool`.
    pub fn not(&self) -> Result<Value, StreamQlError> {
        match self {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => Err(StreamQlError::TypeMismatch(format!(
                "NOT not defined for {}",
                self.type_name()
            ))),
        }
    }

    /// Interpret as a predicate result. Non-`Bool` is a type mismatch.
    pub fn into_bool(self) -> Result<bool, StreamQlError> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(StreamQlError::TypeMismatch(format!(
                "expected Bool predicate result, got {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_bool(v: Result<Value, StreamQlError>) -> bool {
        v.unwrap().into_bool().unwrap()
    }

    #[test]
    fn int_widens_to_float() {
        for i in [-4_i64, 0, 7, i32::MAX as i64] {
            assert!(as_bool(Value::Int(i).eq(&Value::Float(i as f64))));
            assert!(as_bool(Value::Float(i as f64).eq(&Value::Int(i))));
        }
        assert!(as_bool(Value::Int(1).lt(&Value::Float(1.5))));
        assert!(as_bool(Value::Float(2.5).gt(&Value::Int(2))));
    }

    #[test]
    fn double_negation_is_identity() {
        for b in [true, false] {
            let twice = Value::Bool(b).not().unwrap().not().unwrap();
            assert_eq!(twice, Value::Bool(b));
        }
    }

    #[test]
    fn string_ordering_is_lexicographic() {
        assert!(as_bool(Value::Str("a".into()).lt(&Value::Str("b".into()))));
        assert!(!as_bool(Value::Str("b".into()).lt(&Value::Str("a".into()))));
        assert!(as_bool(
            Value::Str("abc".into()).lte(&Value::Str("abc".into()))
        ));
    }

    #[test]
    fn null_equals_only_null() {
        assert!(as_bool(Value::Null.eq(&Value::Null)));
        assert!(!as_bool(Value::Null.eq(&Value::Int(0))));
        assert!(as_bool(Value::Str("x".into()).neq(&Value::Null)));
    }

    #[test]
    fn cross_type_comparison_fails() {
        assert!(Value::Bool(true).lt(&Value::Int(1)).is_err());
        assert!(Value::Str("1".into()).eq(&Value::Int(1)).is_err());
        assert!(Value::Null.gte(&Value::Null).is_err());
        assert!(Value::Int(1).and(&Value::Int(2)).is_err());
    }

    #[test]
    fn json_number_promotion() {
        let v: serde_json::Value = serde_json::json!({"i": 3, "f": 3.5, "s": "x"});
        assert_eq!(Value::from_json(&v["i"]), Value::Int(3));
        assert_eq!(Value::from_json(&v["f"]), Value::Float(3.5));
        assert_eq!(Value::from_json(&v["s"]), Value::Str("x".into()));
    }
}
