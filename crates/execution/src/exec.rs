//! Recursive physical-plan driver producing lazy per-partition row streams.
//!
//! Contracts with the planner:
//! - `execute` returns one lazy iterator per partition; operators assume
//!   per-partition single-reader access;
//! - exchanges are the only operators that move rows across partition
//!   boundaries, and they materialize to do so;
//! - expression trees are bound against child output schemas here, before
//!   any row is evaluated.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use quarry_common::{QuarryError, Result};
use tracing::debug;

use quarry_planner::{
    bind_references, evaluate, get_table_function, Analyzer, Catalog, ExchangeExec, Expr,
    FilterExec, GenerateExec, Generator, InsertExec, LimitExec, LogicalPlan, Optimizer,
    Partitioning, PhysicalPlan, ProjectExec, QueryPlanner, Row, ScanExec, SortDirection,
    SortExec, TableFunction, Value,
};

use crate::catalog::MemoryCatalog;

/// Lazy stream of rows for one partition.
pub type RowsIter = Box<dyn Iterator<Item = Result<Row>>>;

/// Everything an operator needs from the session.
#[derive(Clone)]
pub struct ExecContext {
    /// Table storage and metadata.
    pub catalog: Arc<MemoryCatalog>,
}

impl ExecContext {
    /// Context over a catalog.
    pub fn new(catalog: Arc<MemoryCatalog>) -> Self {
        Self { catalog }
    }
}

/// Analyze, optimize, plan, and run a logical plan, collecting all output
/// rows.
pub fn run(plan: &LogicalPlan, ctx: &ExecContext) -> Result<Vec<Row>> {
    let catalog: Arc<dyn Catalog> = ctx.catalog.clone();
    let analyzed = Analyzer::new(catalog).analyze(plan.clone())?;
    let optimized = Optimizer::new().optimize(analyzed)?;
    let physical = QueryPlanner::default().plan_query(&optimized)?;
    debug!(plan = %physical, "executing physical plan");
    collect(&physical, ctx)
}

/// Execute a physical plan, returning one lazy row stream per partition.
pub fn execute(plan: &PhysicalPlan, ctx: &ExecContext) -> Result<Vec<RowsIter>> {
    match plan {
        PhysicalPlan::Scan(x) => execute_scan(x, ctx),
        PhysicalPlan::LocalScan(x) => Ok(vec![rows_iter(x.rows.clone())]),
        PhysicalPlan::OneRow => Ok(vec![rows_iter(vec![vec![]])]),
        PhysicalPlan::Filter(x) => execute_filter(x, ctx),
        PhysicalPlan::Project(x) => execute_project(x, ctx),
        PhysicalPlan::HashAggregate(x) => crate::aggregate::execute_hash_aggregate(x, ctx),
        PhysicalPlan::HashEquiJoin(x) => crate::joins::execute_hash_equi_join(x, ctx),
        PhysicalPlan::BroadcastNestedLoopJoin(x) => {
            crate::joins::execute_nested_loop_join(x, ctx)
        }
        PhysicalPlan::CartesianProduct(x) => crate::joins::execute_cartesian(x, ctx),
        PhysicalPlan::Sort(x) => execute_sort(x, ctx),
        PhysicalPlan::Limit(x) => execute_limit(x, ctx),
        PhysicalPlan::Union(x) => {
            let mut parts = Vec::new();
            for child in &x.children {
                parts.extend(execute(child, ctx)?);
            }
            Ok(parts)
        }
        PhysicalPlan::Generate(x) => execute_generate(x, ctx),
        PhysicalPlan::Exchange(x) => execute_exchange(x, ctx),
        PhysicalPlan::Insert(x) => execute_insert(x, ctx),
        PhysicalPlan::PlanLater(_) => Err(QuarryError::Execution(
            "plan contains an unresolved placeholder".to_string(),
        )),
    }
}

/// Execute and drain every partition into one row vector.
pub fn collect(plan: &PhysicalPlan, ctx: &ExecContext) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    for part in execute(plan, ctx)? {
        for row in part {
            out.push(row?);
        }
    }
    Ok(out)
}

// -------------------------
// Stream helpers
// -------------------------

struct LazyIter {
    init: Option<Box<dyn FnOnce() -> Result<RowsIter>>>,
    inner: Option<RowsIter>,
    failed: bool,
}

impl Iterator for LazyIter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.inner.is_none() {
            let init = self.init.take()?;
            match init() {
                Ok(iter) => self.inner = Some(iter),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        self.inner.as_mut().expect("initialized above").next()
    }
}

/// Defer partition setup (hash builds, sorts) to the first `next()` call.
pub(crate) fn lazy(init: impl FnOnce() -> Result<RowsIter> + 'static) -> RowsIter {
    Box::new(LazyIter {
        init: Some(Box::new(init)),
        inner: None,
        failed: false,
    })
}

/// Stream over owned rows.
pub(crate) fn rows_iter(rows: Vec<Row>) -> RowsIter {
    Box::new(rows.into_iter().map(Ok))
}

// -------------------------
// Operators
// -------------------------

fn execute_scan(x: &ScanExec, ctx: &ExecContext) -> Result<Vec<RowsIter>> {
    let table = ctx.catalog.table(&x.table)?;
    let column_idx: Vec<usize> = x
        .attributes
        .iter()
        .map(|a| table.field_index(&a.name))
        .collect::<Result<_>>()?;

    // Pruning predicates reference partition keys only; they are evaluated
    // once per partition against its static key values.
    let pruning: Vec<Expr> = if x.pruning_filters.is_empty() {
        vec![]
    } else {
        let key_schema: Vec<_> = table
            .partition_cols()
            .iter()
            .map(|col| {
                x.attributes
                    .iter()
                    .find(|a| a.name == *col)
                    .cloned()
                    .ok_or_else(|| {
                        QuarryError::Execution(format!(
                            "partition column '{col}' missing from scan schema"
                        ))
                    })
            })
            .collect::<Result<_>>()?;
        x.pruning_filters
            .iter()
            .map(|f| bind_references(f, &[key_schema.clone()]))
            .collect::<Result<_>>()?
    };

    let mut parts: Vec<RowsIter> = Vec::new();
    for partition in table.snapshot() {
        let mut keep = true;
        for filter in &pruning {
            if evaluate(filter, &[&partition.key_values])? != Value::Boolean(true) {
                keep = false;
                break;
            }
        }
        if !keep {
            continue;
        }
        let idx = column_idx.clone();
        parts.push(Box::new(partition.rows.into_iter().map(
            move |row| -> Result<Row> {
                idx.iter()
                    .map(|i| {
                        row.get(*i).cloned().ok_or(QuarryError::IndexOutOfBounds {
                            index: *i,
                            len: row.len(),
                        })
                    })
                    .collect()
            },
        )) as RowsIter);
    }
    // Parents always see at least one (possibly empty) partition.
    if parts.is_empty() {
        parts.push(rows_iter(vec![]));
    }
    Ok(parts)
}

fn execute_filter(x: &FilterExec, ctx: &ExecContext) -> Result<Vec<RowsIter>> {
    let predicate = bind_references(&x.predicate, &[x.input.output()])?;
    let parts = execute(&x.input, ctx)?;
    Ok(parts
        .into_iter()
        .map(|part| {
            let predicate = predicate.clone();
            // Rows where the predicate is false or null are dropped.
            Box::new(part.filter_map(move |row| match row {
                Err(e) => Some(Err(e)),
                Ok(row) => match evaluate(&predicate, &[&row]) {
                    Ok(Value::Boolean(true)) => Some(Ok(row)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                },
            })) as RowsIter
        })
        .collect())
}

fn execute_project(x: &ProjectExec, ctx: &ExecContext) -> Result<Vec<RowsIter>> {
    let exprs: Vec<Expr> = x
        .exprs
        .iter()
        .map(|e| bind_references(e, &[x.input.output()]))
        .collect::<Result<_>>()?;
    let parts = execute(&x.input, ctx)?;
    Ok(parts
        .into_iter()
        .map(|part| {
            let exprs = exprs.clone();
            Box::new(part.map(move |row| {
                let row = row?;
                exprs.iter().map(|e| evaluate(e, &[&row])).collect()
            })) as RowsIter
        })
        .collect())
}

fn execute_sort(x: &SortExec, ctx: &ExecContext) -> Result<Vec<RowsIter>> {
    let orders: Vec<(Expr, SortDirection)> = x
        .orders
        .iter()
        .map(|o| Ok((bind_references(&o.expr, &[x.input.output()])?, o.direction)))
        .collect::<Result<_>>()?;
    let parts = execute(&x.input, ctx)?;
    Ok(parts
        .into_iter()
        .map(|part| {
            let orders = orders.clone();
            lazy(move || {
                let mut keyed: Vec<(Vec<Value>, Row)> = Vec::new();
                for row in part {
                    let row = row?;
                    let key = orders
                        .iter()
                        .map(|(e, _)| evaluate(e, &[&row]))
                        .collect::<Result<Vec<_>>>()?;
                    keyed.push((key, row));
                }
                keyed.sort_by(|(a, _), (b, _)| {
                    for ((x, y), (_, direction)) in a.iter().zip(b).zip(&orders) {
                        let ord = match direction {
                            SortDirection::Ascending => x.cmp(y),
                            SortDirection::Descending => x.cmp(y).reverse(),
                        };
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                    std::cmp::Ordering::Equal
                });
                Ok(rows_iter(keyed.into_iter().map(|(_, row)| row).collect()))
            })
        })
        .collect())
}

fn execute_limit(x: &LimitExec, ctx: &ExecContext) -> Result<Vec<RowsIter>> {
    let parts = execute(&x.input, ctx)?;
    let chained = parts.into_iter().flatten();
    Ok(vec![Box::new(chained.take(x.n))])
}

fn execute_exchange(x: &ExchangeExec, ctx: &ExecContext) -> Result<Vec<RowsIter>> {
    let parts = execute(&x.input, ctx)?;
    match &x.partitioning {
        Partitioning::Single | Partitioning::Unknown => {
            Ok(vec![Box::new(parts.into_iter().flatten())])
        }
        Partitioning::Hash { exprs, partitions } => {
            // The one place rows cross partition boundaries; materialized.
            let n = (*partitions).max(1);
            let mut buckets: Vec<Vec<Row>> = vec![Vec::new(); n];
            let mut total = 0usize;
            for part in parts {
                for row in part {
                    let row = row?;
                    let key: Row = exprs
                        .iter()
                        .map(|e| evaluate(e, &[&row]))
                        .collect::<Result<_>>()?;
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    buckets[(hasher.finish() as usize) % n].push(row);
                    total += 1;
                }
            }
            debug!(rows = total, partitions = n, "exchange repartitioned");
            Ok(buckets.into_iter().map(rows_iter).collect())
        }
    }
}

fn execute_generate(x: &GenerateExec, ctx: &ExecContext) -> Result<Vec<RowsIter>> {
    let input_schema = x.input.output();
    let args: Vec<Expr> = x
        .generator
        .args()
        .iter()
        .map(|a| bind_references(a, &[input_schema.clone()]))
        .collect::<Result<_>>()?;
    let arity = x.generator_output.len();
    let runtime = match &x.generator {
        Generator::Explode(_) => GeneratorRuntime::Explode,
        Generator::TableUdf { name, .. } => GeneratorRuntime::Udtf(
            get_table_function(name)
                .ok_or_else(|| QuarryError::FunctionNotFound(name.clone()))?,
        ),
    };
    let (join, outer) = (x.join, x.outer);
    let parts = execute(&x.input, ctx)?;
    Ok(parts
        .into_iter()
        .map(|part| {
            let args = args.clone();
            let runtime = runtime.clone();
            Box::new(part.flat_map(move |row| -> Vec<Result<Row>> {
                let row = match row {
                    Ok(row) => row,
                    Err(e) => return vec![Err(e)],
                };
                match generate_rows(&runtime, &args, &row, arity, join, outer) {
                    Ok(rows) => rows.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                }
            })) as RowsIter
        })
        .collect())
}

#[derive(Clone)]
enum GeneratorRuntime {
    Explode,
    Udtf(Arc<dyn TableFunction>),
}

fn generate_rows(
    runtime: &GeneratorRuntime,
    args: &[Expr],
    row: &Row,
    arity: usize,
    join: bool,
    outer: bool,
) -> Result<Vec<Row>> {
    let values: Vec<Value> = args
        .iter()
        .map(|a| evaluate(a, &[row]))
        .collect::<Result<_>>()?;
    let mut produced: Vec<Row> = match runtime {
        GeneratorRuntime::Explode => match &values[0] {
            Value::Null => vec![],
            Value::List(items) => items.iter().map(|v| vec![v.clone()]).collect(),
            other => {
                return Err(QuarryError::Execution(format!(
                    "explode over non-list value {other}"
                )))
            }
        },
        GeneratorRuntime::Udtf(func) => func.invoke(&values)?,
    };
    for generated in &produced {
        if generated.len() != arity {
            return Err(QuarryError::Execution(format!(
                "generator produced a row of {} cells, expected {arity}",
                generated.len()
            )));
        }
    }
    if produced.is_empty() && outer {
        produced.push(vec![Value::Null; arity]);
    }
    Ok(produced
        .into_iter()
        .map(|generated| {
            if join {
                row.iter().cloned().chain(generated).collect()
            } else {
                generated
            }
        })
        .collect())
}

fn execute_insert(x: &InsertExec, ctx: &ExecContext) -> Result<Vec<RowsIter>> {
    let table = ctx.catalog.table(&x.table)?;
    let mut key = Vec::with_capacity(table.partition_cols().len());
    for col in table.partition_cols().to_vec() {
        match x.partition_spec.iter().find(|(name, _)| *name == col) {
            Some((_, Some(value))) => {
                let idx = table.field_index(&col)?;
                let target = table.fields()[idx].data_type.clone();
                key.push(Value::Utf8(value.clone()).cast(&target)?);
            }
            _ => {
                return Err(QuarryError::Unsupported(format!(
                    "dynamic partition value for column '{col}'"
                )))
            }
        }
    }
    let rows = collect(&x.input, ctx)?;
    table.append(key, rows)?;
    Ok(vec![])
}
