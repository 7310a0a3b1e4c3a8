//! Name resolution, star expansion, type coercion, and aggregate checking.
//!
//! The analyzer is a rule executor over logical plans. It turns a parsed plan
//! containing `Unresolved*` and `Star` nodes into a fully resolved plan where
//! every attribute carries a globally unique id and every expression has a
//! determined data type.

use std::collections::HashSet;
use std::sync::Arc;

use itertools::Itertools;

use quarry_common::{AttrId, QuarryError, Result};

use crate::expr::{split_qualified, AggregateFunction, AttributeRef, Expr, Generator};
use crate::functions;
use crate::logical_plan::LogicalPlan;
use crate::rules::{Batch, Rule, RuleExecutor, Strategy};
use crate::tree::TreeNode;
use crate::types::{DataType, StructField};

/// Catalog collaborator: resolves relation names to schemas. Returns only
/// metadata; opening the underlying storage is an execution concern.
pub trait Catalog: Send + Sync {
    /// Schema for a table by name, or [`QuarryError::RelationNotFound`].
    fn lookup_relation(&self, name: &str) -> Result<TableSchema>;
}

/// Relation metadata handed out by the catalog.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Column definitions, in output order.
    pub fields: Vec<StructField>,
    /// Names of partition-key columns, if the table is partitioned.
    pub partition_cols: Vec<String>,
}

impl TableSchema {
    /// Schema with no partitioning.
    pub fn new(fields: Vec<StructField>) -> Self {
        Self {
            fields,
            partition_cols: vec![],
        }
    }
}

/// Logical plan analyzer.
pub struct Analyzer {
    catalog: Arc<dyn Catalog>,
    max_iterations: usize,
}

impl Analyzer {
    /// Analyzer over the given catalog with the default iteration budget.
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            max_iterations: quarry_common::EngineConfig::default().max_rule_iterations,
        }
    }

    /// Override the fixpoint iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Analyze a logical plan.
    ///
    /// Guarantees on success:
    /// - no `Unresolved*` or `Star` node remains;
    /// - every attribute reference carries the id of the column it binds to;
    /// - binary operands share a type, with casts inserted where widening
    ///   applies;
    /// - aggregate outputs only combine aggregate calls, grouping-bound
    ///   references, and literals.
    pub fn analyze(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        let fixpoint = Strategy::FixedPoint {
            max_iterations: self.max_iterations,
        };
        let executor = RuleExecutor::new(vec![
            Batch::new(
                "resolution",
                fixpoint,
                vec![
                    Box::new(ResolveRelations {
                        catalog: Arc::clone(&self.catalog),
                    }),
                    Box::new(SubstituteSubqueries),
                    Box::new(ResolveReferences),
                    Box::new(ExpandStars),
                    Box::new(ResolveFunctions),
                    Box::new(ResolveGenerators),
                    Box::new(NameOutputs),
                ],
            ),
            Batch::new("type-coercion", fixpoint, vec![Box::new(CoerceTypes)]),
            Batch::new(
                "aggregate-rewrite",
                Strategy::Once,
                vec![Box::new(BindGroupingReferences)],
            )
            .with_invariant(no_duplicate_output_ids),
        ]);
        let analyzed = executor.execute(plan)?;
        check_resolved(&analyzed)?;
        Ok(analyzed)
    }
}

/// Post-batch invariant: the root output carries no duplicate attribute ids.
fn no_duplicate_output_ids(plan: &LogicalPlan) -> std::result::Result<(), String> {
    let mut seen: HashSet<AttrId> = HashSet::new();
    for attr in plan.output() {
        if !seen.insert(attr.id) {
            return Err(format!("duplicate attribute id in output: {attr}"));
        }
    }
    Ok(())
}

/// Surface the first dangling name with its enclosing operator attached.
/// Unresolved attributes win over functions and stars: an unknown column is
/// usually the root cause of both.
fn check_resolved(plan: &LogicalPlan) -> Result<()> {
    let mut attribute: Option<QuarryError> = None;
    let mut other: Option<QuarryError> = None;
    plan.foreach(&mut |node| {
        if attribute.is_some() {
            return;
        }
        for expr in node.expressions() {
            expr.foreach(&mut |e| match e {
                Expr::UnresolvedAttribute { name } if attribute.is_none() => {
                    attribute = Some(QuarryError::UnresolvedAttribute {
                        name: name.clone(),
                        plan: node.to_string(),
                    });
                }
                Expr::Star { .. } if other.is_none() => {
                    other = Some(QuarryError::Planning(format!(
                        "unexpanded star in:\n{node}"
                    )));
                }
                Expr::UnresolvedFunction { name, .. } if other.is_none() => {
                    other = Some(QuarryError::FunctionNotFound(name.clone()));
                }
                _ => {}
            });
        }
        if other.is_none() && !node.resolved() && node.children().iter().all(|c| c.resolved()) {
            other = Some(QuarryError::Planning(format!(
                "operator is not resolved:\n{node}"
            )));
        }
    });
    match attribute.or(other) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// -------------------------
// Resolution rules
// -------------------------

struct ResolveRelations {
    catalog: Arc<dyn Catalog>,
}

impl Rule<LogicalPlan> for ResolveRelations {
    fn name(&self) -> &'static str {
        "resolve-relations"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let LogicalPlan::UnresolvedRelation { name, alias } = p else {
                return Ok(None);
            };
            let schema = self.catalog.lookup_relation(name)?;
            // Fresh ids per instantiation, so self-joins stay distinguishable.
            let attributes = schema
                .fields
                .iter()
                .map(|f| AttributeRef::new(&f.name, f.data_type.clone(), f.nullable))
                .collect();
            let relation = LogicalPlan::Relation {
                name: name.clone(),
                attributes,
                partition_cols: schema.partition_cols,
            };
            Ok(Some(match alias {
                Some(alias) => LogicalPlan::Subquery {
                    alias: alias.clone(),
                    child: Arc::new(relation),
                },
                None => relation,
            }))
        })
    }
}

struct SubstituteSubqueries;

impl Rule<LogicalPlan> for SubstituteSubqueries {
    fn name(&self) -> &'static str {
        "substitute-subqueries"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let LogicalPlan::Subquery { alias, child } = p else {
                return Ok(None);
            };
            if !child.resolved() {
                return Ok(None);
            }
            let ids: HashSet<AttrId> = child.output().iter().map(|a| a.id).collect();
            Ok(Some(requalify(child, &ids, alias)?))
        })
    }
}

/// Rewrite every occurrence of the given attribute ids under `alias`.
/// Identity is carried by the id, so re-qualification is cosmetic and
/// semantics-preserving.
fn requalify(plan: &LogicalPlan, ids: &HashSet<AttrId>, alias: &str) -> Result<LogicalPlan> {
    plan.transform_down(&|p| {
        let requalify_attr = |a: &AttributeRef| {
            if ids.contains(&a.id) {
                a.with_qualifier(alias)
            } else {
                a.clone()
            }
        };
        let node = match p {
            LogicalPlan::Relation {
                name,
                attributes,
                partition_cols,
            } => LogicalPlan::Relation {
                name: name.clone(),
                attributes: attributes.iter().map(requalify_attr).collect(),
                partition_cols: partition_cols.clone(),
            },
            LogicalPlan::LocalRelation { attributes, rows } => LogicalPlan::LocalRelation {
                attributes: attributes.iter().map(requalify_attr).collect(),
                rows: rows.clone(),
            },
            LogicalPlan::Generate {
                generator,
                join,
                outer,
                generator_output,
                child,
            } => LogicalPlan::Generate {
                generator: generator.clone(),
                join: *join,
                outer: *outer,
                generator_output: generator_output.iter().map(requalify_attr).collect(),
                child: child.clone(),
            },
            other => other.clone(),
        };
        let node = node.map_expressions(&mut |e| {
            e.transform_up(&|x| match x {
                Expr::Attribute(a) if ids.contains(&a.id) => {
                    Ok(Some(Expr::Attribute(a.with_qualifier(alias))))
                }
                _ => Ok(None),
            })
        })?;
        Ok(if node == *p { None } else { Some(node) })
    })
}

struct ResolveReferences;

impl Rule<LogicalPlan> for ResolveReferences {
    fn name(&self) -> &'static str {
        "resolve-references"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let children = p.children();
            if children.is_empty() || !children.iter().all(LogicalPlan::resolved) {
                return Ok(None);
            }
            let scope: Vec<AttributeRef> = children.iter().flat_map(|c| c.output()).collect();
            let resolved = p.map_expressions(&mut |e| resolve_against(e, &scope))?;
            Ok(if resolved == *p { None } else { Some(resolved) })
        })
    }
}

fn resolve_against(expr: &Expr, scope: &[AttributeRef]) -> Result<Expr> {
    expr.transform_up(&|e| {
        let Expr::UnresolvedAttribute { name } = e else {
            return Ok(None);
        };
        let (qualifier, column) = split_qualified(name);
        let candidates: Vec<&AttributeRef> = scope
            .iter()
            .filter(|a| a.matches(qualifier, column))
            .collect();
        match candidates.len() {
            // Left for a later pass; the final check reports leftovers.
            0 => Ok(None),
            1 => Ok(Some(Expr::Attribute(candidates[0].clone()))),
            _ => Err(QuarryError::AmbiguousReference {
                name: name.clone(),
                candidates: candidates.iter().map(|a| a.to_string()).join(", "),
            }),
        }
    })
}

struct ExpandStars;

impl Rule<LogicalPlan> for ExpandStars {
    fn name(&self) -> &'static str {
        "expand-stars"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let LogicalPlan::Project { exprs, child } = p else {
                return Ok(None);
            };
            if !child.resolved() || !exprs.iter().any(|e| matches!(e, Expr::Star { .. })) {
                return Ok(None);
            }
            let scope = child.output();
            let mut expanded = Vec::with_capacity(exprs.len());
            for e in exprs {
                match e {
                    Expr::Star { qualifier: None } => {
                        expanded.extend(scope.iter().cloned().map(Expr::Attribute));
                    }
                    Expr::Star {
                        qualifier: Some(q),
                    } => {
                        let matched: Vec<_> = scope
                            .iter()
                            .filter(|a| a.qualifier.as_deref() == Some(q.as_str()))
                            .cloned()
                            .map(Expr::Attribute)
                            .collect();
                        if matched.is_empty() {
                            return Err(QuarryError::Planning(format!(
                                "no attributes match {q}.*"
                            )));
                        }
                        expanded.extend(matched);
                    }
                    other => expanded.push(other.clone()),
                }
            }
            Ok(Some(LogicalPlan::Project {
                exprs: expanded,
                child: child.clone(),
            }))
        })
    }
}

struct ResolveFunctions;

impl Rule<LogicalPlan> for ResolveFunctions {
    fn name(&self) -> &'static str {
        "resolve-functions"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let resolved = p.map_expressions(&mut |e| {
                e.transform_up(&|x| {
                    let Expr::UnresolvedFunction { name, args } = x else {
                        return Ok(None);
                    };
                    if !args.iter().all(|a| a.resolved()) {
                        return Ok(None);
                    }
                    resolve_function(name, args).map(Some)
                })
            })?;
            Ok(if resolved == *p { None } else { Some(resolved) })
        })
    }
}

fn resolve_function(name: &str, args: &[Arc<Expr>]) -> Result<Expr> {
    let lowered = name.to_ascii_lowercase();
    let builtin = match lowered.as_str() {
        "count" => Some(AggregateFunction::Count),
        "count_distinct" => Some(AggregateFunction::CountDistinct),
        "sum" => Some(AggregateFunction::Sum),
        "avg" | "average" => Some(AggregateFunction::Average),
        _ => None,
    };
    if let Some(func) = builtin {
        if args.len() != 1 {
            return Err(QuarryError::Planning(format!(
                "{lowered} takes exactly one argument, got {}",
                args.len()
            )));
        }
        return Ok(Expr::Aggregate {
            func,
            arg: args[0].clone(),
        });
    }
    let Some(func) = functions::get_scalar_function(&lowered) else {
        return Err(QuarryError::FunctionNotFound(name.to_string()));
    };
    let arg_types = args
        .iter()
        .map(|a| a.data_type())
        .collect::<Result<Vec<_>>>()?;
    Ok(Expr::ScalarUdf {
        name: lowered,
        args: args.to_vec(),
        return_type: func.return_type(&arg_types)?,
    })
}

struct ResolveGenerators;

impl Rule<LogicalPlan> for ResolveGenerators {
    fn name(&self) -> &'static str {
        "resolve-generators"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let LogicalPlan::Generate {
                generator,
                join,
                outer,
                generator_output,
                child,
            } = p
            else {
                return Ok(None);
            };
            let mut generator = generator.clone();
            if let Generator::TableUdf {
                name,
                args,
                fields: None,
            } = &generator
            {
                if args.iter().all(|a| a.resolved()) {
                    let func = functions::get_table_function(name)
                        .ok_or_else(|| QuarryError::FunctionNotFound(name.clone()))?;
                    let arg_types = args
                        .iter()
                        .map(|a| a.data_type())
                        .collect::<Result<Vec<_>>>()?;
                    generator = Generator::TableUdf {
                        name: name.clone(),
                        args: args.clone(),
                        fields: Some(func.output_fields(&arg_types)?),
                    };
                }
            }
            let mut output = generator_output.clone();
            if generator.resolved() && output.is_empty() {
                output = generator
                    .output_fields()?
                    .iter()
                    .map(|f| AttributeRef::new(&f.name, f.data_type.clone(), f.nullable))
                    .collect();
            }
            let rebuilt = LogicalPlan::Generate {
                generator,
                join: *join,
                outer: *outer,
                generator_output: output,
                child: child.clone(),
            };
            Ok(if rebuilt == *p { None } else { Some(rebuilt) })
        })
    }
}

/// Give resolved but unnamed projection/aggregation outputs a stable name,
/// so downstream operators can reference them by attribute.
struct NameOutputs;

impl Rule<LogicalPlan> for NameOutputs {
    fn name(&self) -> &'static str {
        "name-outputs"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let rebuilt = match p {
                LogicalPlan::Project { exprs, child } => LogicalPlan::Project {
                    exprs: exprs.iter().map(name_output).collect(),
                    child: child.clone(),
                },
                LogicalPlan::Aggregate {
                    group_exprs,
                    aggregate_exprs,
                    child,
                } => LogicalPlan::Aggregate {
                    group_exprs: group_exprs.clone(),
                    aggregate_exprs: aggregate_exprs.iter().map(name_output).collect(),
                    child: child.clone(),
                },
                _ => return Ok(None),
            };
            Ok(if rebuilt == *p { None } else { Some(rebuilt) })
        })
    }
}

fn name_output(expr: &Expr) -> Expr {
    match expr {
        Expr::Attribute(_) | Expr::Alias { .. } => expr.clone(),
        other if other.resolved() => other.clone().alias(other.to_string()),
        other => other.clone(),
    }
}

// -------------------------
// Type coercion
// -------------------------

struct CoerceTypes;

impl Rule<LogicalPlan> for CoerceTypes {
    fn name(&self) -> &'static str {
        "coerce-types"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let coerced = p.map_expressions(&mut coerce_expr)?;
            Ok(if coerced == *p { None } else { Some(coerced) })
        })
    }
}

fn coerce_expr(expr: &Expr) -> Result<Expr> {
    expr.transform_up(&|e| {
        match e {
            Expr::Binary { left, op, right } if left.resolved() && right.resolved() => {
                let (lt, rt) = (left.data_type()?, right.data_type()?);
                if op.is_arithmetic() {
                    ensure_numeric_operand(e, &lt)?;
                    ensure_numeric_operand(e, &rt)?;
                } else if !lt.is_comparable() || !rt.is_comparable() {
                    return Err(QuarryError::IncompatibleTypes {
                        left: lt.to_string(),
                        right: rt.to_string(),
                    });
                }
                if lt == rt {
                    return Ok(None);
                }
                let target = DataType::widen(&lt, &rt)?;
                Ok(Some(Expr::Binary {
                    left: Arc::new(cast_to(left.as_ref(), &lt, &target)),
                    op: *op,
                    right: Arc::new(cast_to(right.as_ref(), &rt, &target)),
                }))
            }
            Expr::If {
                condition,
                then_expr,
                else_expr,
            } if condition.resolved() && then_expr.resolved() && else_expr.resolved() => {
                let cond_type = condition.data_type()?;
                if !matches!(cond_type, DataType::Boolean | DataType::Null) {
                    return Err(QuarryError::Planning(format!(
                        "if condition must be boolean, got {cond_type}"
                    )));
                }
                let (tt, et) = (then_expr.data_type()?, else_expr.data_type()?);
                if tt == et {
                    return Ok(None);
                }
                let target = DataType::widen(&tt, &et)?;
                Ok(Some(Expr::If {
                    condition: condition.clone(),
                    then_expr: Arc::new(cast_to(then_expr.as_ref(), &tt, &target)),
                    else_expr: Arc::new(cast_to(else_expr.as_ref(), &et, &target)),
                }))
            }
            Expr::Coalesce(args) if args.iter().all(|a| a.resolved()) => {
                let mut target = DataType::Null;
                for arg in args {
                    target = DataType::widen(&target, &arg.data_type()?)?;
                }
                let coerced: Vec<Arc<Expr>> = args
                    .iter()
                    .map(|a| Ok(Arc::new(cast_to(a.as_ref(), &a.data_type()?, &target))))
                    .collect::<Result<_>>()?;
                if coerced == *args {
                    return Ok(None);
                }
                Ok(Some(Expr::Coalesce(coerced)))
            }
            Expr::Aggregate { func, arg }
                if arg.resolved()
                    && matches!(
                        func,
                        AggregateFunction::Sum | AggregateFunction::Average
                    ) =>
            {
                let at = arg.data_type()?;
                if !at.is_numeric() && at != DataType::Null {
                    return Err(QuarryError::Planning(format!(
                        "{}() requires a numeric argument, got {at}",
                        func.name()
                    )));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    })
}

fn ensure_numeric_operand(parent: &Expr, dt: &DataType) -> Result<()> {
    if dt.is_numeric() || *dt == DataType::Null {
        Ok(())
    } else {
        Err(QuarryError::Planning(format!(
            "arithmetic requires numeric operands: {parent} has operand of type {dt}"
        )))
    }
}

fn cast_to(expr: &Expr, from: &DataType, to: &DataType) -> Expr {
    if from == to {
        expr.clone()
    } else {
        expr.clone().cast(to.clone())
    }
}

// -------------------------
// Aggregate rewrite
// -------------------------

/// Non-aggregate subexpressions of aggregate outputs must match a grouping
/// expression exactly; they are rewritten to indexed references into the
/// grouping tuple (tuple 0). Aggregate calls are left in place and slotted
/// into tuple 1 by the physical aggregate.
struct BindGroupingReferences;

impl Rule<LogicalPlan> for BindGroupingReferences {
    fn name(&self) -> &'static str {
        "bind-grouping-references"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let LogicalPlan::Aggregate {
                group_exprs,
                aggregate_exprs,
                child,
            } = p
            else {
                return Ok(None);
            };
            if !p.resolved() {
                return Ok(None);
            }
            let rewritten: Vec<Expr> = aggregate_exprs
                .iter()
                .map(|e| bind_output_expr(e, group_exprs))
                .collect::<Result<_>>()?;
            if rewritten == *aggregate_exprs {
                return Ok(None);
            }
            Ok(Some(LogicalPlan::Aggregate {
                group_exprs: group_exprs.clone(),
                aggregate_exprs: rewritten,
                child: child.clone(),
            }))
        })
    }
}

fn bind_output_expr(expr: &Expr, groupings: &[Expr]) -> Result<Expr> {
    match expr {
        Expr::Alias { child, name, id } => Ok(Expr::Alias {
            child: Arc::new(bind_grouping(child, groupings)?),
            name: name.clone(),
            id: *id,
        }),
        // Keep the output id when the whole expression is a grouping column.
        Expr::Attribute(attr) => {
            let bound = bind_grouping(expr, groupings)?;
            Ok(Expr::Alias {
                child: Arc::new(bound),
                name: attr.name.clone(),
                id: attr.id,
            })
        }
        other => bind_grouping(other, groupings),
    }
}

fn bind_grouping(expr: &Expr, groupings: &[Expr]) -> Result<Expr> {
    if let Some(slot) = groupings
        .iter()
        .position(|g| strip_qualifiers(g) == strip_qualifiers(expr))
    {
        let g = &groupings[slot];
        return Ok(Expr::BoundReference {
            tuple: 0,
            field: slot,
            data_type: g.data_type()?,
            nullable: g.nullable(),
        });
    }
    match expr {
        Expr::Aggregate { .. } => Ok(expr.clone()),
        Expr::Attribute(_) => Err(QuarryError::NonGroupingReference {
            expr: expr.to_string(),
            grouping: groupings.iter().map(|g| g.to_string()).join(", "),
        }),
        other => other.map_children(|c| bind_grouping(&c, groupings)),
    }
}

/// Qualifier-insensitive comparison form: the same column may appear with and
/// without its relation alias.
fn strip_qualifiers(expr: &Expr) -> Expr {
    expr.transform_up(&|e| match e {
        Expr::Attribute(a) if a.qualifier.is_some() => {
            let mut stripped = a.clone();
            stripped.qualifier = None;
            Ok(Some(Expr::Attribute(stripped)))
        }
        _ => Ok(None),
    })
    .expect("qualifier stripping is infallible")
}
