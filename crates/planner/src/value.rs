//! Scalar values and rows.

use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use quarry_common::{QuarryError, Result};

use crate::types::DataType;

/// A wrapper around f32 providing `Eq`, `Ord`, and `Hash`.
pub type F32 = OrderedFloat<f32>;
/// A wrapper around f64 providing `Eq`, `Ord`, and `Hash`.
pub type F64 = OrderedFloat<f64>;

/// Primitive SQL value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    // NOTE: Null comes first => NULL sorts before any non-NULL value.
    /// Null.
    Null,
    /// Boolean.
    Boolean(bool),
    /// 8-bit signed integer.
    Int8(i8),
    /// 16-bit signed integer.
    Int16(i16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit float.
    Float32(F32),
    /// 64-bit float.
    Float64(F64),
    /// Decimal.
    Decimal(Decimal),
    /// UTF-8 string.
    Utf8(String),
    /// Byte array.
    Binary(Vec<u8>),
    /// List of values.
    List(Vec<Value>),
}

/// In-memory row: one typed cell per output attribute.
pub type Row = Vec<Value>;

impl Value {
    /// Returns `true` if the value is null.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The lattice type of the value. Lists infer their element type from the
    /// first element.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Float32(_) => DataType::Float32,
            Value::Float64(_) => DataType::Float64,
            Value::Decimal(_) => DataType::Decimal,
            Value::Utf8(_) => DataType::Utf8,
            Value::Binary(_) => DataType::Binary,
            Value::List(items) => DataType::List {
                element: Box::new(
                    items
                        .first()
                        .map(Value::data_type)
                        .unwrap_or(DataType::Null),
                ),
                element_nullable: items.iter().any(Value::is_null),
            },
        }
    }

    /// The boolean payload, or an error for anything else.
    pub fn as_bool(&self) -> Result<Option<bool>> {
        match self {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(*b)),
            other => Err(QuarryError::Execution(format!(
                "expected boolean, got {other}"
            ))),
        }
    }

    /// The value as i64 where a lossless integral reading exists.
    pub fn as_i64(&self) -> Result<Option<i64>> {
        Ok(Some(match self {
            Value::Null => return Ok(None),
            Value::Int8(v) => *v as i64,
            Value::Int16(v) => *v as i64,
            Value::Int32(v) => *v as i64,
            Value::Int64(v) => *v,
            other => {
                return Err(QuarryError::Execution(format!(
                    "expected integer, got {other}"
                )))
            }
        }))
    }

    /// The value as f64 for any numeric variant.
    pub fn as_f64(&self) -> Result<Option<f64>> {
        Ok(Some(match self {
            Value::Null => return Ok(None),
            Value::Int8(v) => *v as f64,
            Value::Int16(v) => *v as f64,
            Value::Int32(v) => *v as f64,
            Value::Int64(v) => *v as f64,
            Value::Float32(v) => v.0 as f64,
            Value::Float64(v) => v.0,
            Value::Decimal(d) => d.to_f64().ok_or_else(|| {
                QuarryError::CastFailed {
                    value: d.to_string(),
                    target: DataType::Float64.to_string(),
                }
            })?,
            other => {
                return Err(QuarryError::Execution(format!(
                    "expected numeric, got {other}"
                )))
            }
        }))
    }

    /// Fails with [`QuarryError::NullDereference`] when the value is null.
    /// Intended for function implementations that are not null-aware.
    pub fn expect_not_null(&self, context: &str) -> Result<&Value> {
        if self.is_null() {
            Err(QuarryError::NullDereference(context.to_string()))
        } else {
            Ok(self)
        }
    }

    /// Cast the value to another lattice type.
    ///
    /// Null casts to null in any type. Casts to string use the decimal
    /// representation without trailing zeros. String-to-numeric parses the
    /// trimmed text and fails with [`QuarryError::CastFailed`] on malformed
    /// input. Narrowing numeric casts truncate toward zero.
    pub fn cast(&self, target: &DataType) -> Result<Value> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        if self.data_type() == *target {
            return Ok(self.clone());
        }
        let fail = || QuarryError::CastFailed {
            value: self.to_string(),
            target: target.to_string(),
        };
        Ok(match target {
            DataType::Utf8 => Value::Utf8(self.cast_to_string()),
            DataType::Boolean => match self {
                Value::Utf8(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Value::Boolean(true),
                    "false" => Value::Boolean(false),
                    _ => return Err(fail()),
                },
                other => Value::Boolean(!is_numeric_zero(other).ok_or_else(fail)?),
            },
            DataType::Int8 => Value::Int8(self.integral(fail)? as i8),
            DataType::Int16 => Value::Int16(self.integral(fail)? as i16),
            DataType::Int32 => Value::Int32(self.integral(fail)? as i32),
            DataType::Int64 => Value::Int64(self.integral(fail)?),
            DataType::Float32 => Value::Float32(F32::from(self.fractional(fail)? as f32)),
            DataType::Float64 => Value::Float64(F64::from(self.fractional(fail)?)),
            DataType::Decimal => match self {
                Value::Utf8(s) => Value::Decimal(Decimal::from_str(s.trim()).map_err(|_| fail())?),
                Value::Boolean(b) => Value::Decimal(Decimal::from(*b as i8)),
                Value::Float32(v) => {
                    Value::Decimal(Decimal::from_f32_retain(v.0).ok_or_else(fail)?)
                }
                Value::Float64(v) => {
                    Value::Decimal(Decimal::from_f64_retain(v.0).ok_or_else(fail)?)
                }
                other => Value::Decimal(Decimal::from(other.as_i64()?.ok_or_else(fail)?)),
            },
            _ => return Err(fail()),
        })
    }

    /// Integral reading for casts: truncates fractional values toward zero.
    fn integral(&self, fail: impl Fn() -> QuarryError) -> Result<i64> {
        Ok(match self {
            Value::Boolean(b) => *b as i64,
            Value::Int8(v) => *v as i64,
            Value::Int16(v) => *v as i64,
            Value::Int32(v) => *v as i64,
            Value::Int64(v) => *v,
            Value::Float32(v) => v.0.trunc() as i64,
            Value::Float64(v) => v.0.trunc() as i64,
            Value::Decimal(d) => d.trunc().to_i64().ok_or_else(&fail)?,
            Value::Utf8(s) => {
                let s = s.trim();
                s.parse::<i64>().map_err(|_| fail())?
            }
            _ => return Err(fail()),
        })
    }

    /// Fractional reading for casts.
    fn fractional(&self, fail: impl Fn() -> QuarryError) -> Result<f64> {
        Ok(match self {
            Value::Boolean(b) => *b as i64 as f64,
            Value::Utf8(s) => s.trim().parse::<f64>().map_err(|_| fail())?,
            other => other.as_f64()?.ok_or_else(&fail)?,
        })
    }

    /// String rendering used by casts: no trailing zeros, no quoting.
    fn cast_to_string(&self) -> String {
        match self {
            Value::Decimal(d) => d.normalize().to_string(),
            Value::Utf8(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn is_numeric_zero(v: &Value) -> Option<bool> {
    Some(match v {
        Value::Int8(x) => *x == 0,
        Value::Int16(x) => *x == 0,
        Value::Int32(x) => *x == 0,
        Value::Int64(x) => *x == 0,
        Value::Float32(x) => x.0 == 0.0,
        Value::Float64(x) => x.0 == 0.0,
        Value::Decimal(x) => x.is_zero(),
        _ => return None,
    })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{}", v.0),
            Value::Float64(v) => write!(f, "{}", v.0),
            Value::Decimal(v) => write!(f, "{}", v.normalize()),
            Value::Utf8(v) => write!(f, "'{v}'"),
            Value::Binary(v) => write!(f, "x'{}'", hex(v)),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_casts_drop_trailing_zeros() {
        let v = Value::Decimal(Decimal::from_str("1.2300").unwrap());
        assert_eq!(v.cast(&DataType::Utf8).unwrap(), Value::Utf8("1.23".into()));
        let v = Value::Float64(2.5.into());
        assert_eq!(v.cast(&DataType::Utf8).unwrap(), Value::Utf8("2.5".into()));
    }

    #[test]
    fn string_to_numeric_parses_or_fails() {
        let v = Value::Utf8(" 42 ".into());
        assert_eq!(v.cast(&DataType::Int32).unwrap(), Value::Int32(42));
        let err = Value::Utf8("4x".into()).cast(&DataType::Int64).unwrap_err();
        assert!(matches!(err, QuarryError::CastFailed { .. }));
    }

    #[test]
    fn narrowing_truncates_toward_zero() {
        assert_eq!(
            Value::Float64((-2.9).into()).cast(&DataType::Int64).unwrap(),
            Value::Int64(-2)
        );
        assert_eq!(
            Value::Float64(2.9.into()).cast(&DataType::Int8).unwrap(),
            Value::Int8(2)
        );
    }

    #[test]
    fn null_casts_to_null_in_any_type() {
        assert_eq!(Value::Null.cast(&DataType::Utf8).unwrap(), Value::Null);
        assert_eq!(Value::Null.cast(&DataType::Int8).unwrap(), Value::Null);
    }

    #[test]
    fn null_sorts_first() {
        let mut vals = vec![Value::Int32(1), Value::Null, Value::Int32(-5)];
        vals.sort();
        assert_eq!(vals[0], Value::Null);
    }
}
