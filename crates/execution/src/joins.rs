//! Join operators: hash equi-join, broadcast nested-loop join, cartesian
//! product.

use std::collections::HashMap;
use std::sync::Arc;

use quarry_common::{QuarryError, Result};

use quarry_planner::{
    bind_references, evaluate, BroadcastNestedLoopJoinExec, BuildSide, CartesianProductExec,
    Expr, HashEquiJoinExec, JoinType, Row, Value,
};

use crate::exec::{execute, lazy, rows_iter, ExecContext, RowsIter};

/// Hash join over pairwise-aligned partitions. Rows with a null in any join
/// key never match; outer variants emit them (and other unmatched rows)
/// padded with nulls on the opposite side.
pub(crate) fn execute_hash_equi_join(
    x: &HashEquiJoinExec,
    ctx: &ExecContext,
) -> Result<Vec<RowsIter>> {
    let left_schema = x.left.output();
    let right_schema = x.right.output();
    let left_keys: Vec<Expr> = x
        .left_keys
        .iter()
        .map(|k| bind_references(k, &[left_schema.clone()]))
        .collect::<Result<_>>()?;
    let right_keys: Vec<Expr> = x
        .right_keys
        .iter()
        .map(|k| bind_references(k, &[right_schema.clone()]))
        .collect::<Result<_>>()?;
    let (left_arity, right_arity) = (left_schema.len(), right_schema.len());
    let join_type = x.join_type;

    let left_parts = execute(&x.left, ctx)?;
    let right_parts = execute(&x.right, ctx)?;
    if left_parts.len() != right_parts.len() {
        return Err(QuarryError::Execution(format!(
            "equi-join partition mismatch: {} left vs {} right",
            left_parts.len(),
            right_parts.len()
        )));
    }

    Ok(left_parts
        .into_iter()
        .zip(right_parts)
        .map(|(left_part, right_part)| {
            let left_keys = left_keys.clone();
            let right_keys = right_keys.clone();
            lazy(move || {
                let mut build_rows: Vec<Row> = Vec::new();
                let mut matched: Vec<bool> = Vec::new();
                let mut table: HashMap<Row, Vec<usize>> = HashMap::new();
                for row in right_part {
                    let row = row?;
                    let key: Row = right_keys
                        .iter()
                        .map(|k| evaluate(k, &[&row]))
                        .collect::<Result<_>>()?;
                    if !key.iter().any(Value::is_null) {
                        table.entry(key).or_default().push(build_rows.len());
                    }
                    build_rows.push(row);
                    matched.push(false);
                }

                let mut out: Vec<Row> = Vec::new();
                for row in left_part {
                    let left_row = row?;
                    let key: Row = left_keys
                        .iter()
                        .map(|k| evaluate(k, &[&left_row]))
                        .collect::<Result<_>>()?;
                    let mut any_match = false;
                    if !key.iter().any(Value::is_null) {
                        if let Some(indices) = table.get(&key) {
                            for &i in indices {
                                any_match = true;
                                matched[i] = true;
                                out.push(concat(&left_row, &build_rows[i]));
                            }
                        }
                    }
                    if !any_match
                        && matches!(join_type, JoinType::LeftOuter | JoinType::FullOuter)
                    {
                        out.push(concat(&left_row, &nulls(right_arity)));
                    }
                }
                if matches!(join_type, JoinType::RightOuter | JoinType::FullOuter) {
                    for (i, right_row) in build_rows.iter().enumerate() {
                        if !matched[i] {
                            out.push(concat(&nulls(left_arity), right_row));
                        }
                    }
                }
                Ok(rows_iter(out))
            })
        })
        .collect())
}

/// Nested-loop join: the build side is materialized once and probed for
/// every streamed row. A full outer join produces exactly one row for each
/// unmatched streamed tuple plus one row for each unmatched build tuple.
pub(crate) fn execute_nested_loop_join(
    x: &BroadcastNestedLoopJoinExec,
    ctx: &ExecContext,
) -> Result<Vec<RowsIter>> {
    let left_schema = x.left.output();
    let right_schema = x.right.output();
    let condition = x
        .condition
        .as_ref()
        .map(|c| bind_references(c, &[left_schema.clone(), right_schema.clone()]))
        .transpose()?;
    let (left_arity, right_arity) = (left_schema.len(), right_schema.len());

    let (build_plan, streamed_plan, stream_is_left) = match x.build_side {
        BuildSide::Right => (&x.right, &x.left, true),
        BuildSide::Left => (&x.left, &x.right, false),
    };
    let preserve_streamed = match (stream_is_left, x.join_type) {
        (true, JoinType::LeftOuter | JoinType::FullOuter) => true,
        (false, JoinType::RightOuter | JoinType::FullOuter) => true,
        _ => false,
    };
    let preserve_build = match (stream_is_left, x.join_type) {
        (true, JoinType::RightOuter | JoinType::FullOuter) => true,
        (false, JoinType::LeftOuter | JoinType::FullOuter) => true,
        _ => false,
    };

    // Broadcast: materialized once, then read-only in every partition.
    let build: Arc<Vec<Row>> = Arc::new(drain_all(execute(build_plan, ctx)?)?);
    let streamed_parts = execute(streamed_plan, ctx)?;
    if preserve_build && streamed_parts.len() > 1 {
        return Err(QuarryError::Execution(
            "outer nested-loop join over multiple streamed partitions".to_string(),
        ));
    }

    Ok(streamed_parts
        .into_iter()
        .map(|part| {
            let build = Arc::clone(&build);
            let condition = condition.clone();
            lazy(move || {
                let mut matched = vec![false; build.len()];
                let mut out: Vec<Row> = Vec::new();
                for row in part {
                    let streamed_row = row?;
                    let mut any_match = false;
                    for (i, build_row) in build.iter().enumerate() {
                        let (left_row, right_row) = if stream_is_left {
                            (&streamed_row, build_row)
                        } else {
                            (build_row, &streamed_row)
                        };
                        let keep = match &condition {
                            None => true,
                            Some(c) => {
                                evaluate(c, &[left_row, right_row])? == Value::Boolean(true)
                            }
                        };
                        if keep {
                            any_match = true;
                            matched[i] = true;
                            out.push(concat(left_row, right_row));
                        }
                    }
                    if !any_match && preserve_streamed {
                        if stream_is_left {
                            out.push(concat(&streamed_row, &nulls(right_arity)));
                        } else {
                            out.push(concat(&nulls(left_arity), &streamed_row));
                        }
                    }
                }
                if preserve_build {
                    for (i, build_row) in build.iter().enumerate() {
                        if !matched[i] {
                            if stream_is_left {
                                out.push(concat(&nulls(left_arity), build_row));
                            } else {
                                out.push(concat(build_row, &nulls(right_arity)));
                            }
                        }
                    }
                }
                Ok(rows_iter(out))
            })
        })
        .collect())
}

/// Unconditional cross product; the right side is materialized once.
pub(crate) fn execute_cartesian(
    x: &CartesianProductExec,
    ctx: &ExecContext,
) -> Result<Vec<RowsIter>> {
    let right: Arc<Vec<Row>> = Arc::new(drain_all(execute(&x.right, ctx)?)?);
    let left_parts = execute(&x.left, ctx)?;
    Ok(left_parts
        .into_iter()
        .map(|part| {
            let right = Arc::clone(&right);
            Box::new(part.flat_map(move |row| -> Vec<Result<Row>> {
                match row {
                    Err(e) => vec![Err(e)],
                    Ok(left_row) => right
                        .iter()
                        .map(|right_row| Ok(concat(&left_row, right_row)))
                        .collect(),
                }
            })) as RowsIter
        })
        .collect())
}

fn drain_all(parts: Vec<RowsIter>) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    for part in parts {
        for row in part {
            out.push(row?);
        }
    }
    Ok(out)
}

fn concat(left: &Row, right: &Row) -> Row {
    left.iter().cloned().chain(right.iter().cloned()).collect()
}

fn nulls(arity: usize) -> Row {
    vec![Value::Null; arity]
}
