//! Hash-based grouped aggregation.
//!
//! State layout: the grouping map is keyed by the evaluated grouping-value
//! row; each group owns one accumulator per distinct aggregate call. Output
//! expressions are evaluated over two tuples: tuple 0 is the group key row,
//! tuple 1 is the row of accumulator results. Partial mode emits the raw
//! layout `group keys ++ flattened states` for the final aggregate to merge
//! after redistribution.

use std::collections::{HashMap, HashSet};

use quarry_common::{QuarryError, Result};

use quarry_planner::{
    bind_references, binary_op, evaluate, AggregateFunction, AggregateMode, BinaryOp, DataType,
    Expr, HashAggregateExec, Row, TreeNode, Value,
};

use crate::exec::{execute, lazy, rows_iter, ExecContext, RowsIter};

pub(crate) fn execute_hash_aggregate(
    x: &HashAggregateExec,
    ctx: &ExecContext,
) -> Result<Vec<RowsIter>> {
    let (calls, result_exprs) = slot_aggregate_calls(&x.aggregate_exprs)?;
    match x.mode {
        AggregateMode::Partial => {
            let bound = bind_calls(&calls, x)?;
            let group_exprs = bind_group_exprs(x)?;
            let parts = execute(&x.input, ctx)?;
            Ok(parts
                .into_iter()
                .map(|part| {
                    let bound = bound.clone();
                    let group_exprs = group_exprs.clone();
                    lazy(move || {
                        let groups = accumulate(part, &group_exprs, &bound)?;
                        let rows = groups
                            .into_iter()
                            .map(|(key, accumulators)| {
                                let mut row = key;
                                for acc in &accumulators {
                                    row.extend(acc.partial_state());
                                }
                                row
                            })
                            .collect();
                        Ok(rows_iter(rows))
                    })
                })
                .collect())
        }
        AggregateMode::Final => {
            let group_len = x.group_exprs.len();
            let arities: Vec<usize> = calls
                .iter()
                .map(|c| c.func.partial_state_arity())
                .collect();
            let funcs: Vec<AggregateFunction> = calls.iter().map(|c| c.func).collect();
            let parts = execute(&x.input, ctx)?;
            Ok(parts
                .into_iter()
                .map(|part| {
                    let arities = arities.clone();
                    let funcs = funcs.clone();
                    let result_exprs = result_exprs.clone();
                    lazy(move || {
                        let state_len = group_len + arities.iter().sum::<usize>();
                        let mut groups: HashMap<Row, Vec<Accumulator>> = HashMap::new();
                        for row in part {
                            let row = row?;
                            if row.len() != state_len {
                                return Err(QuarryError::Execution(format!(
                                    "partial aggregate row has {} cells, expected {state_len}",
                                    row.len()
                                )));
                            }
                            let key: Row = row[..group_len].to_vec();
                            let accumulators = groups
                                .entry(key)
                                .or_insert_with(|| new_accumulators(&funcs));
                            let mut offset = group_len;
                            for (acc, arity) in
                                accumulators.iter_mut().zip(arities.iter().copied())
                            {
                                acc.merge(&row[offset..offset + arity])?;
                                offset += arity;
                            }
                        }
                        if groups.is_empty() && group_len == 0 {
                            groups.insert(vec![], new_accumulators(&funcs));
                        }
                        emit_results(groups, &result_exprs)
                    })
                })
                .collect())
        }
        AggregateMode::Complete => {
            let bound = bind_calls(&calls, x)?;
            let group_exprs = bind_group_exprs(x)?;
            let no_grouping = x.group_exprs.is_empty();
            let parts = execute(&x.input, ctx)?;
            Ok(parts
                .into_iter()
                .map(|part| {
                    let bound = bound.clone();
                    let group_exprs = group_exprs.clone();
                    let result_exprs = result_exprs.clone();
                    lazy(move || {
                        let mut groups = accumulate(part, &group_exprs, &bound)?;
                        if groups.is_empty() && no_grouping {
                            let funcs: Vec<_> = bound.iter().map(|c| c.func).collect();
                            groups.insert(vec![], new_accumulators(&funcs));
                        }
                        emit_results(groups, &result_exprs)
                    })
                })
                .collect())
        }
    }
}

/// One distinct aggregate call within an aggregate's output expressions.
#[derive(Debug, Clone, PartialEq)]
struct AggCall {
    func: AggregateFunction,
    arg: Expr,
}

/// Collect the distinct aggregate calls and rewrite the output expressions
/// to read each call's result from tuple 1.
fn slot_aggregate_calls(aggregate_exprs: &[Expr]) -> Result<(Vec<AggCall>, Vec<Expr>)> {
    let mut calls: Vec<AggCall> = Vec::new();
    let result_exprs = aggregate_exprs
        .iter()
        .map(|e| slot_expr(e, &mut calls))
        .collect::<Result<Vec<_>>>()?;
    Ok((calls, result_exprs))
}

fn slot_expr(expr: &Expr, calls: &mut Vec<AggCall>) -> Result<Expr> {
    if let Expr::Aggregate { func, arg } = expr {
        let call = AggCall {
            func: *func,
            arg: arg.as_ref().clone(),
        };
        let slot = match calls.iter().position(|c| *c == call) {
            Some(slot) => slot,
            None => {
                calls.push(call);
                calls.len() - 1
            }
        };
        let input_type = arg.data_type()?;
        return Ok(Expr::BoundReference {
            tuple: 1,
            field: slot,
            data_type: func.result_type(&input_type),
            nullable: func.result_nullable(),
        });
    }
    expr.map_children(|child| slot_expr(&child, calls))
}

fn bind_calls(calls: &[AggCall], x: &HashAggregateExec) -> Result<Vec<AggCall>> {
    let schema = x.input.output();
    calls
        .iter()
        .map(|c| {
            Ok(AggCall {
                func: c.func,
                arg: bind_references(&c.arg, &[schema.clone()])?,
            })
        })
        .collect()
}

fn bind_group_exprs(x: &HashAggregateExec) -> Result<Vec<Expr>> {
    let schema = x.input.output();
    x.group_exprs
        .iter()
        .map(|g| bind_references(g, &[schema.clone()]))
        .collect()
}

/// Stream a partition into the grouping map.
fn accumulate(
    part: RowsIter,
    group_exprs: &[Expr],
    calls: &[AggCall],
) -> Result<HashMap<Row, Vec<Accumulator>>> {
    let funcs: Vec<_> = calls.iter().map(|c| c.func).collect();
    let mut groups: HashMap<Row, Vec<Accumulator>> = HashMap::new();
    for row in part {
        let row = row?;
        let key: Row = group_exprs
            .iter()
            .map(|g| evaluate(g, &[&row]))
            .collect::<Result<_>>()?;
        let accumulators = groups
            .entry(key)
            .or_insert_with(|| new_accumulators(&funcs));
        for (acc, call) in accumulators.iter_mut().zip(calls) {
            let value = evaluate(&call.arg, &[&row])?;
            acc.update(&value)?;
        }
    }
    Ok(groups)
}

/// Drain the grouping map, evaluating the output expressions over
/// `[key row, results row]`. Drain order is insertion-undefined.
fn emit_results(
    groups: HashMap<Row, Vec<Accumulator>>,
    result_exprs: &[Expr],
) -> Result<RowsIter> {
    let mut out = Vec::with_capacity(groups.len());
    for (key, accumulators) in groups {
        let results: Row = accumulators
            .iter()
            .map(Accumulator::result)
            .collect::<Result<_>>()?;
        let row: Row = result_exprs
            .iter()
            .map(|e| evaluate(e, &[&key, &results]))
            .collect::<Result<_>>()?;
        out.push(row);
    }
    Ok(rows_iter(out))
}

fn new_accumulators(funcs: &[AggregateFunction]) -> Vec<Accumulator> {
    funcs.iter().map(|f| Accumulator::new(*f)).collect()
}

/// Per-group mutable aggregate state.
#[derive(Debug)]
enum Accumulator {
    Count { count: i64 },
    CountDistinct { seen: HashSet<Value> },
    Sum { sum: Value },
    Average { count: i64, sum: Value },
}

impl Accumulator {
    fn new(func: AggregateFunction) -> Self {
        match func {
            AggregateFunction::Count => Accumulator::Count { count: 0 },
            AggregateFunction::CountDistinct => Accumulator::CountDistinct {
                seen: HashSet::new(),
            },
            AggregateFunction::Sum => Accumulator::Sum { sum: Value::Null },
            AggregateFunction::Average => Accumulator::Average {
                count: 0,
                sum: Value::Null,
            },
        }
    }

    /// Fold one input value; nulls never contribute.
    fn update(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count { count } => *count += 1,
            Accumulator::CountDistinct { seen } => {
                seen.insert(value.clone());
            }
            Accumulator::Sum { sum } => add_to(sum, value)?,
            Accumulator::Average { count, sum } => {
                *count += 1;
                add_to(sum, value)?;
            }
        }
        Ok(())
    }

    /// Combinable partial state row.
    fn partial_state(&self) -> Row {
        match self {
            Accumulator::Count { count } => vec![Value::Int64(*count)],
            Accumulator::Sum { sum } => vec![sum.clone()],
            Accumulator::Average { count, sum } => {
                vec![Value::Int64(*count), sum.clone()]
            }
            Accumulator::CountDistinct { .. } => vec![],
        }
    }

    /// Fold one partial state row produced by [`Accumulator::partial_state`].
    fn merge(&mut self, state: &[Value]) -> Result<()> {
        match self {
            Accumulator::Count { count } => {
                *count += state_i64(state, 0)?;
            }
            Accumulator::Sum { sum } => {
                if !state[0].is_null() {
                    add_to(sum, &state[0])?;
                }
            }
            Accumulator::Average { count, sum } => {
                *count += state_i64(state, 0)?;
                if !state[1].is_null() {
                    add_to(sum, &state[1])?;
                }
            }
            Accumulator::CountDistinct { .. } => {
                return Err(QuarryError::Unsupported(
                    "count_distinct has no partial decomposition".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// Final value; the empty-group results are count 0 and null sums.
    fn result(&self) -> Result<Value> {
        Ok(match self {
            Accumulator::Count { count } => Value::Int64(*count),
            Accumulator::CountDistinct { seen } => Value::Int64(seen.len() as i64),
            Accumulator::Sum { sum } => sum.clone(),
            Accumulator::Average { count, sum } => {
                if *count == 0 {
                    Value::Null
                } else {
                    let total = sum
                        .cast(&DataType::Float64)?
                        .as_f64()?
                        .unwrap_or_default();
                    Value::Float64((total / *count as f64).into())
                }
            }
        })
    }
}

fn add_to(sum: &mut Value, value: &Value) -> Result<()> {
    *sum = if sum.is_null() {
        value.clone()
    } else {
        binary_op(BinaryOp::Plus, sum, value)?
    };
    Ok(())
}

fn state_i64(state: &[Value], index: usize) -> Result<i64> {
    state
        .get(index)
        .ok_or(QuarryError::IndexOutOfBounds {
            index,
            len: state.len(),
        })?
        .as_i64()?
        .ok_or_else(|| QuarryError::Execution("null aggregate count state".to_string()))
}
