//! The value envelope: a tagged union carrying any configuration value
//! between the frontend and a driver without the framework knowing the
//! shape any particular key expects.
//!
//! Construction of the compound shapes (`Rational`, the tuples, the
//! arrays) validates their invariants up front so that once a `Value`
//! exists, every consumer can trust its shape.

use serde::{Deserialize, Serialize};

/// A numerator/denominator pair. Used for timebase and vdiv settings,
/// which instruments express as exact fractions rather than floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: u64,
    pub den: u64,
}

impl Rational {
    pub fn new(num: u64, den: u64) -> crate::Result<Self> {
        if den == 0 {
            return Err(crate::Error::InvalidArg(String::from(
                "rational denominator must be nonzero",
            )));
        }
        Ok(Rational { num, den })
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

/// A low/high pair where `low <= high` is enforced at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tuple2F64 {
    pub low: f64,
    pub high: f64,
}

impl Tuple2F64 {
    pub fn new(low: f64, high: f64) -> crate::Result<Self> {
        if low > high {
            return Err(crate::Error::InvalidArg(String::from(
                "tuple2-f64 requires low <= high",
            )));
        }
        Ok(Tuple2F64 { low, high })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple2U64 {
    pub low: u64,
    pub high: u64,
}

impl Tuple2U64 {
    pub fn new(low: u64, high: u64) -> crate::Result<Self> {
        if low > high {
            return Err(crate::Error::InvalidArg(String::from(
                "tuple2-u64 requires low <= high",
            )));
        }
        Ok(Tuple2U64 { low, high })
    }
}

/// The tagged union itself. Every key in the registry names exactly one
/// of these shapes; a driver that returns the wrong shape for a key is a
/// programming error in the driver, not a recoverable condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", content = "payload", rename_all = "kebab-case")]
pub enum Value {
    Bool(bool),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F64(f64),
    String(String),
    Rational(Rational),
    Tuple2F64(Tuple2F64),
    Tuple2U64(Tuple2U64),
    ArrayU32(Vec<u32>),
    ArrayU64(Vec<u64>),
    ArrayI32(Vec<i32>),
    ArrayString(Vec<String>),
    ArrayRational(Vec<Rational>),
}

impl Value {
    pub fn rational(num: u64, den: u64) -> crate::Result<Self> {
        Rational::new(num, den).map(Value::Rational)
    }

    pub fn tuple2_f64(low: f64, high: f64) -> crate::Result<Self> {
        Tuple2F64::new(low, high).map(Value::Tuple2F64)
    }

    pub fn tuple2_u64(low: u64, high: u64) -> crate::Result<Self> {
        Tuple2U64::new(low, high).map(Value::Tuple2U64)
    }

    /// Shape name as used in the registry and in diagnostics. Matches the
    /// `serde` tag so logs and the wire form agree.
    pub fn shape_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::U32(_) => "u32",
            Value::I32(_) => "i32",
            Value::U64(_) => "u64",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Rational(_) => "rational",
            Value::Tuple2F64(_) => "tuple2-f64",
            Value::Tuple2U64(_) => "tuple2-u64",
            Value::ArrayU32(_) => "array-u32",
            Value::ArrayU64(_) => "array-u64",
            Value::ArrayI32(_) => "array-i32",
            Value::ArrayString(_) => "array-string",
            Value::ArrayRational(_) => "array-rational",
        }
    }

    pub fn as_bool(&self) -> crate::Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(shape_mismatch("bool", other)),
        }
    }

    pub fn as_u64(&self) -> crate::Result<u64> {
        match self {
            Value::U64(v) => Ok(*v),
            other => Err(shape_mismatch("u64", other)),
        }
    }

    pub fn as_i32(&self) -> crate::Result<i32> {
        match self {
            Value::I32(v) => Ok(*v),
            other => Err(shape_mismatch("i32", other)),
        }
    }

    pub fn as_f64(&self) -> crate::Result<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(shape_mismatch("f64", other)),
        }
    }

    pub fn as_str(&self) -> crate::Result<&str> {
        match self {
            Value::String(s) => Ok(s.as_str()),
            other => Err(shape_mismatch("string", other)),
        }
    }

    pub fn as_rational(&self) -> crate::Result<Rational> {
        match self {
            Value::Rational(r) => Ok(*r),
            other => Err(shape_mismatch("rational", other)),
        }
    }

    pub fn as_tuple2_f64(&self) -> crate::Result<Tuple2F64> {
        match self {
            Value::Tuple2F64(t) => Ok(*t),
            other => Err(shape_mismatch("tuple2-f64", other)),
        }
    }
}

fn shape_mismatch(expected: &str, got: &Value) -> crate::Error {
    crate::Error::InvalidArg(format!(
        "expected shape {expected}, found {}",
        got.shape_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_rejects_zero_denominator() {
        assert!(Rational::new(1, 0).is_err());
        assert!(Rational::new(0, 1).is_ok());
    }

    #[test]
    fn tuple2_f64_rejects_low_greater_than_high() {
        assert!(Tuple2F64::new(2.0, 1.0).is_err());
        assert!(Tuple2F64::new(1.0, 1.0).is_ok());
    }

    #[test]
    fn tuple2_u64_rejects_low_greater_than_high() {
        assert!(Tuple2U64::new(5, 4).is_err());
    }

    #[test]
    fn array_rational_round_trips_through_serde_json() {
        let v = Value::ArrayRational(vec![
            Rational::new(2, 1_000_000_000).unwrap(),
            Rational::new(5, 1_000_000_000).unwrap(),
            Rational::new(1, 1_000).unwrap(),
        ]);
        let encoded = serde_json::to_string(&v).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn shape_mismatch_reports_invalid_arg() {
        let v = Value::Bool(true);
        assert!(matches!(v.as_u64(), Err(crate::Error::InvalidArg(_))));
    }
}
