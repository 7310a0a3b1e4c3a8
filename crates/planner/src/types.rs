//! Closed data-type lattice with numeric promotion rules.

use std::fmt;

use serde::{Deserialize, Serialize};

use quarry_common::{QuarryError, Result};

use crate::value::Value;

/// Named, typed field of a struct or relation schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    /// Field name.
    pub name: String,
    /// Field type.
    pub data_type: DataType,
    /// Whether the field may hold nulls.
    pub nullable: bool,
}

impl StructField {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Closed data-type lattice.
///
/// Numeric promotion order:
/// `Int8 < Int16 < Int32 < Int64 < Float32 < Float64 < Decimal`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// The type of the untyped null literal. Widens to any other type.
    Null,
    /// Boolean.
    Boolean,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit IEEE float.
    Float32,
    /// 64-bit IEEE float.
    Float64,
    /// Arbitrary-precision decimal.
    Decimal,
    /// UTF-8 string.
    Utf8,
    /// Byte array.
    Binary,
    /// Variable-length list.
    List {
        /// Element type.
        element: Box<DataType>,
        /// Whether elements may be null.
        element_nullable: bool,
    },
    /// Key/value mapping.
    Map {
        /// Key type.
        key: Box<DataType>,
        /// Value type.
        value: Box<DataType>,
        /// Whether values may be null.
        value_nullable: bool,
    },
    /// Ordered collection of named fields.
    Struct(Vec<StructField>),
}

impl DataType {
    /// Whether the type participates in numeric promotion.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
                | DataType::Decimal
        )
    }

    /// Whether values of the type admit ordering comparisons.
    pub fn is_comparable(&self) -> bool {
        !matches!(
            self,
            DataType::List { .. } | DataType::Map { .. } | DataType::Struct(_)
        )
    }

    /// Position in the numeric promotion order, `None` for non-numerics.
    pub fn numeric_rank(&self) -> Option<u8> {
        Some(match self {
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 => 3,
            DataType::Int64 => 4,
            DataType::Float32 => 5,
            DataType::Float64 => 6,
            DataType::Decimal => 7,
            _ => return None,
        })
    }

    /// Least upper bound of two types under the promotion lattice.
    ///
    /// `Null` widens to the other side; equal types are their own bound;
    /// numerics promote by rank. Anything else fails with
    /// [`QuarryError::IncompatibleTypes`].
    pub fn widen(left: &DataType, right: &DataType) -> Result<DataType> {
        if left == right {
            return Ok(left.clone());
        }
        match (left, right) {
            (DataType::Null, other) | (other, DataType::Null) => Ok(other.clone()),
            (l, r) if l.is_numeric() && r.is_numeric() => {
                let (lr, rr) = (l.numeric_rank().unwrap(), r.numeric_rank().unwrap());
                Ok(if lr >= rr { l.clone() } else { r.clone() })
            }
            _ => Err(QuarryError::IncompatibleTypes {
                left: left.to_string(),
                right: right.to_string(),
            }),
        }
    }

    /// Zero/empty value of the type, used for aggregate buffer
    /// initialization.
    pub fn default_value(&self) -> Value {
        match self {
            DataType::Null => Value::Null,
            DataType::Boolean => Value::Boolean(false),
            DataType::Int8 => Value::Int8(0),
            DataType::Int16 => Value::Int16(0),
            DataType::Int32 => Value::Int32(0),
            DataType::Int64 => Value::Int64(0),
            DataType::Float32 => Value::Float32(0.0.into()),
            DataType::Float64 => Value::Float64(0.0.into()),
            DataType::Decimal => Value::Decimal(rust_decimal::Decimal::ZERO),
            DataType::Utf8 => Value::Utf8(String::new()),
            DataType::Binary => Value::Binary(Vec::new()),
            DataType::List { .. } => Value::List(Vec::new()),
            DataType::Map { .. } | DataType::Struct(_) => Value::Null,
        }
    }
}

/// Nullability of a joined column: nullable when either side may produce
/// nulls (outer joins additionally force the non-preserving side nullable).
pub fn nullable_join(left_nullable: bool, right_nullable: bool) -> bool {
    left_nullable || right_nullable
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Null => write!(f, "null"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Int8 => write!(f, "int8"),
            DataType::Int16 => write!(f, "int16"),
            DataType::Int32 => write!(f, "int32"),
            DataType::Int64 => write!(f, "int64"),
            DataType::Float32 => write!(f, "float32"),
            DataType::Float64 => write!(f, "float64"),
            DataType::Decimal => write!(f, "decimal"),
            DataType::Utf8 => write!(f, "utf8"),
            DataType::Binary => write!(f, "binary"),
            DataType::List { element, .. } => write!(f, "list<{element}>"),
            DataType::Map { key, value, .. } => write!(f, "map<{key}, {value}>"),
            DataType::Struct(fields) => {
                write!(f, "struct<")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.data_type)?;
                }
                write!(f, ">")
            }
        }
    }
}
