//! Row-level interpreter for bound expression trees.
//!
//! Input is a sequence of tuples, one per joined input; `BoundReference`
//! selects `input[tuple][field]`. Attribute references must be replaced via
//! [`bind_references`] before evaluation.

use std::cmp::Ordering;
use std::mem::discriminant;

use quarry_common::{QuarryError, Result};

use crate::expr::{AttributeRef, BinaryOp, Expr};
use crate::functions;
use crate::tree::TreeNode;
use crate::value::{Row, Value};

/// Replace every resolved attribute in `expr` with a `BoundReference` into
/// `schemas` (one attribute list per input tuple, looked up by id).
pub fn bind_references(expr: &Expr, schemas: &[Vec<AttributeRef>]) -> Result<Expr> {
    expr.transform_up(&|node| {
        let Expr::Attribute(attr) = node else {
            return Ok(None);
        };
        for (tuple, schema) in schemas.iter().enumerate() {
            if let Some(field) = schema.iter().position(|a| a.id == attr.id) {
                return Ok(Some(Expr::BoundReference {
                    tuple,
                    field,
                    data_type: attr.data_type.clone(),
                    nullable: attr.nullable,
                }));
            }
        }
        Err(QuarryError::Planning(format!(
            "attribute {attr} not found in any input schema"
        )))
    })
}

/// Evaluate a bound expression over `input` tuples.
pub fn evaluate(expr: &Expr, input: &[&Row]) -> Result<Value> {
    match expr {
        Expr::Literal { value, .. } => Ok(value.clone()),
        Expr::BoundReference { tuple, field, .. } => {
            let row = input.get(*tuple).ok_or(QuarryError::IndexOutOfBounds {
                index: *tuple,
                len: input.len(),
            })?;
            row.get(*field)
                .cloned()
                .ok_or(QuarryError::IndexOutOfBounds {
                    index: *field,
                    len: row.len(),
                })
        }
        Expr::Alias { child, .. } => evaluate(child, input),
        Expr::Binary { left, op, right } => {
            let l = evaluate(left, input)?;
            let r = evaluate(right, input)?;
            binary_op(*op, &l, &r)
        }
        Expr::Negate(child) => negate(&evaluate(child, input)?),
        Expr::And(a, b) => {
            // Kleene: false dominates null.
            let l = evaluate(a, input)?.as_bool()?;
            if l == Some(false) {
                return Ok(Value::Boolean(false));
            }
            let r = evaluate(b, input)?.as_bool()?;
            Ok(match (l, r) {
                (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            })
        }
        Expr::Or(a, b) => {
            // Kleene: true dominates null.
            let l = evaluate(a, input)?.as_bool()?;
            if l == Some(true) {
                return Ok(Value::Boolean(true));
            }
            let r = evaluate(b, input)?.as_bool()?;
            Ok(match (l, r) {
                (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            })
        }
        Expr::Not(child) => Ok(match evaluate(child, input)?.as_bool()? {
            Some(b) => Value::Boolean(!b),
            None => Value::Null,
        }),
        Expr::Cast { child, to } => evaluate(child, input)?.cast(to),
        Expr::IsNull(child) => Ok(Value::Boolean(evaluate(child, input)?.is_null())),
        Expr::IsNotNull(child) => Ok(Value::Boolean(!evaluate(child, input)?.is_null())),
        Expr::Coalesce(args) => {
            for arg in args {
                let v = evaluate(arg, input)?;
                if !v.is_null() {
                    return Ok(v);
                }
            }
            Ok(Value::Null)
        }
        Expr::If {
            condition,
            then_expr,
            else_expr,
        } => {
            if evaluate(condition, input)?.as_bool()? == Some(true) {
                evaluate(then_expr, input)
            } else {
                evaluate(else_expr, input)
            }
        }
        Expr::Rand => Ok(Value::Float64(rand::random::<f64>().into())),
        Expr::ScalarUdf { name, args, .. } => {
            let func = functions::get_scalar_function(name)
                .ok_or_else(|| QuarryError::FunctionNotFound(name.clone()))?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, input)?);
            }
            if func.strict() && values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            func.invoke(&values)
        }
        Expr::Aggregate { .. } => Err(QuarryError::Unsupported(format!(
            "aggregate evaluated outside an aggregation: {expr}"
        ))),
        Expr::Attribute(attr) => Err(QuarryError::Planning(format!(
            "unbound attribute in evaluation: {attr}"
        ))),
        Expr::UnresolvedAttribute { .. }
        | Expr::UnresolvedFunction { .. }
        | Expr::Star { .. } => Err(QuarryError::Planning(format!(
            "unresolved expression in evaluation: {expr}"
        ))),
    }
}

/// Apply a binary operator to two values with three-valued null semantics.
///
/// Comparisons return null when either operand is null; `null = null` is
/// null, never true. Arithmetic dispatches an integral or fractional kernel
/// by the (analysis-unified) operand type: integral division by zero fails
/// with [`QuarryError::DivisionByZero`], fractional follows IEEE.
pub fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if op.is_comparison() {
        let ord = compare(left, right)?;
        let out = match op {
            BinaryOp::Eq => ord == Ordering::Equal,
            BinaryOp::NotEq => ord != Ordering::Equal,
            BinaryOp::Lt => ord == Ordering::Less,
            BinaryOp::LtEq => ord != Ordering::Greater,
            BinaryOp::Gt => ord == Ordering::Greater,
            BinaryOp::GtEq => ord != Ordering::Less,
            _ => unreachable!(),
        };
        return Ok(Value::Boolean(out));
    }
    arith(op, left, right)
}

fn compare(left: &Value, right: &Value) -> Result<Ordering> {
    if discriminant(left) != discriminant(right) {
        return Err(QuarryError::Execution(format!(
            "cannot compare {left} with {right}; operand types were not unified"
        )));
    }
    Ok(left.cmp(right))
}

macro_rules! integral_arith {
    ($ctor:ident, $a:expr, $b:expr, $op:expr) => {{
        let (a, b) = ($a, $b);
        match $op {
            BinaryOp::Plus => Value::$ctor(a.wrapping_add(b)),
            BinaryOp::Minus => Value::$ctor(a.wrapping_sub(b)),
            BinaryOp::Multiply => Value::$ctor(a.wrapping_mul(b)),
            BinaryOp::Divide => {
                if b == 0 {
                    return Err(QuarryError::DivisionByZero);
                }
                Value::$ctor(a.wrapping_div(b))
            }
            BinaryOp::Remainder => {
                if b == 0 {
                    return Err(QuarryError::DivisionByZero);
                }
                Value::$ctor(a.wrapping_rem(b))
            }
            _ => unreachable!(),
        }
    }};
}

macro_rules! fractional_arith {
    ($ctor:ident, $a:expr, $b:expr, $op:expr) => {{
        let (a, b) = ($a, $b);
        Value::$ctor(
            match $op {
                BinaryOp::Plus => a + b,
                BinaryOp::Minus => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => a / b,
                BinaryOp::Remainder => a % b,
                _ => unreachable!(),
            }
            .into(),
        )
    }};
}

fn arith(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    use Value::*;
    Ok(match (left, right) {
        (Int8(a), Int8(b)) => integral_arith!(Int8, *a, *b, op),
        (Int16(a), Int16(b)) => integral_arith!(Int16, *a, *b, op),
        (Int32(a), Int32(b)) => integral_arith!(Int32, *a, *b, op),
        (Int64(a), Int64(b)) => integral_arith!(Int64, *a, *b, op),
        (Float32(a), Float32(b)) => fractional_arith!(Float32, a.0, b.0, op),
        (Float64(a), Float64(b)) => fractional_arith!(Float64, a.0, b.0, op),
        (Decimal(a), Decimal(b)) => Decimal(match op {
            BinaryOp::Plus => a + b,
            BinaryOp::Minus => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a
                .checked_div(*b)
                .ok_or(QuarryError::DivisionByZero)?,
            BinaryOp::Remainder => a
                .checked_rem(*b)
                .ok_or(QuarryError::DivisionByZero)?,
            _ => unreachable!(),
        }),
        (l, r) => {
            return Err(QuarryError::Execution(format!(
                "invalid operands for {}: {l} vs {r}",
                op.symbol()
            )))
        }
    })
}

fn negate(v: &Value) -> Result<Value> {
    use Value::*;
    Ok(match v {
        Null => Null,
        Int8(x) => Int8(x.wrapping_neg()),
        Int16(x) => Int16(x.wrapping_neg()),
        Int32(x) => Int32(x.wrapping_neg()),
        Int64(x) => Int64(x.wrapping_neg()),
        Float32(x) => Float32((-x.0).into()),
        Float64(x) => Float64((-x.0).into()),
        Decimal(x) => Decimal(-x),
        other => {
            return Err(QuarryError::Execution(format!(
                "cannot negate {other}"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn eval(e: &Expr) -> Value {
        evaluate(e, &[]).unwrap()
    }

    #[test]
    fn comparisons_with_null_are_null() {
        let e = Expr::binary(Expr::null(DataType::Int32), BinaryOp::Eq, Expr::null(DataType::Int32));
        assert_eq!(eval(&e), Value::Null);
        let e = Expr::binary(
            Expr::lit(Value::Int32(1)),
            BinaryOp::Gt,
            Expr::null(DataType::Int32),
        );
        assert_eq!(eval(&e), Value::Null);
    }

    #[test]
    fn kleene_and_or() {
        let t = Expr::lit(Value::Boolean(true));
        let f = Expr::lit(Value::Boolean(false));
        let n = Expr::null(DataType::Boolean);
        assert_eq!(eval(&Expr::and(f.clone(), n.clone())), Value::Boolean(false));
        assert_eq!(eval(&Expr::and(n.clone(), f.clone())), Value::Boolean(false));
        assert_eq!(eval(&Expr::and(t.clone(), n.clone())), Value::Null);
        assert_eq!(eval(&Expr::or(t.clone(), n.clone())), Value::Boolean(true));
        assert_eq!(eval(&Expr::or(n.clone(), t.clone())), Value::Boolean(true));
        assert_eq!(eval(&Expr::or(f, n)), Value::Null);
    }

    #[test]
    fn null_tests_are_never_null() {
        let n = Expr::null(DataType::Int32);
        assert_eq!(
            eval(&Expr::IsNull(std::sync::Arc::new(n.clone()))),
            Value::Boolean(true)
        );
        assert_eq!(
            eval(&Expr::IsNotNull(std::sync::Arc::new(n))),
            Value::Boolean(false)
        );
    }

    #[test]
    fn integral_division_by_zero_fails() {
        let e = Expr::binary(
            Expr::lit(Value::Int64(1)),
            BinaryOp::Divide,
            Expr::lit(Value::Int64(0)),
        );
        assert!(matches!(
            evaluate(&e, &[]),
            Err(QuarryError::DivisionByZero)
        ));
    }

    #[test]
    fn fractional_division_by_zero_is_infinite() {
        let e = Expr::binary(
            Expr::lit(Value::Float64(1.0.into())),
            BinaryOp::Divide,
            Expr::lit(Value::Float64(0.0.into())),
        );
        assert_eq!(eval(&e), Value::Float64(f64::INFINITY.into()));
    }

    #[test]
    fn bound_reference_reads_the_right_tuple() {
        let e = Expr::BoundReference {
            tuple: 1,
            field: 0,
            data_type: DataType::Int32,
            nullable: false,
        };
        let left = vec![Value::Int32(1)];
        let right = vec![Value::Int32(2)];
        assert_eq!(evaluate(&e, &[&left, &right]).unwrap(), Value::Int32(2));
    }

    #[test]
    fn out_of_range_ordinals_fail() {
        let e = Expr::BoundReference {
            tuple: 0,
            field: 3,
            data_type: DataType::Int32,
            nullable: false,
        };
        let row = vec![Value::Int32(1)];
        assert!(matches!(
            evaluate(&e, &[&row]),
            Err(QuarryError::IndexOutOfBounds { index: 3, len: 1 })
        ));
    }

    #[test]
    fn coalesce_picks_first_non_null() {
        let e = Expr::Coalesce(vec![
            std::sync::Arc::new(Expr::null(DataType::Int32)),
            std::sync::Arc::new(Expr::lit(Value::Int32(7))),
        ]);
        assert_eq!(eval(&e), Value::Int32(7));
    }
}
