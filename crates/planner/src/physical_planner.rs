//! Strategy-based lowering of logical plans to physical operators.
//!
//! A strategy is a partial function from a logical node to a sequence of
//! physical candidates; children it does not care about are emitted as
//! `PlanLater` placeholders and lowered recursively. After lowering, an
//! ensure-requirements pass inserts exchange operators wherever a child's
//! output partitioning does not satisfy its parent's required distribution.

use std::sync::Arc;

use quarry_common::{EngineConfig, QuarryError, Result};
use tracing::debug;

use crate::eval::bind_references;
use crate::expr::{AttributeRef, BinaryOp, Expr};
use crate::logical_plan::{JoinType, LogicalPlan};
use crate::physical_plan::{
    AggregateMode, BroadcastNestedLoopJoinExec, BuildSide, CartesianProductExec, Distribution,
    ExchangeExec, FilterExec, GenerateExec, HashAggregateExec, HashEquiJoinExec, InsertExec,
    LimitExec, LocalScanExec, Partitioning, PhysicalPlan, ProjectExec, ScanExec, SortExec,
    UnionExec,
};
use crate::tree::TreeNode;

/// Physical planning knobs.
#[derive(Debug, Clone)]
pub struct PhysicalPlannerConfig {
    /// Hash partition count used by inserted exchanges.
    pub shuffle_partitions: usize,
}

impl Default for PhysicalPlannerConfig {
    fn default() -> Self {
        Self {
            shuffle_partitions: EngineConfig::default().shuffle_partitions,
        }
    }
}

/// A partial lowering of one logical node into physical candidates, best
/// first. An empty sequence means the strategy does not apply.
pub trait PlanStrategy {
    /// Strategy name for diagnostics.
    fn name(&self) -> &'static str;
    /// Produce candidates for `plan`, or an empty sequence.
    fn apply(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>>;
}

/// Lowers logical plans by iterating strategies in priority order.
pub struct QueryPlanner {
    config: PhysicalPlannerConfig,
    strategies: Vec<Box<dyn PlanStrategy>>,
}

impl Default for QueryPlanner {
    fn default() -> Self {
        Self::new(PhysicalPlannerConfig::default())
    }
}

impl QueryPlanner {
    /// Planner with the default strategy set.
    pub fn new(config: PhysicalPlannerConfig) -> Self {
        Self {
            config,
            strategies: vec![
                Box::new(DataSink),
                Box::new(TableScan),
                Box::new(PartitionPruning),
                Box::new(EquiJoin),
                Box::new(Aggregation),
                Box::new(BroadcastNestedLoop),
                Box::new(CartesianProduct),
                Box::new(BasicOperators),
            ],
        }
    }

    /// Lower a logical plan and satisfy distribution requirements with
    /// exchanges. This is the entry point for callers.
    pub fn plan_query(&self, logical: &LogicalPlan) -> Result<PhysicalPlan> {
        let plan = self.plan(logical)?;
        self.ensure_requirements(plan)
    }

    /// Lower a logical plan, leaving distribution requirements unsatisfied.
    pub fn plan(&self, logical: &LogicalPlan) -> Result<PhysicalPlan> {
        for strategy in &self.strategies {
            let mut candidates = strategy.apply(logical)?;
            if candidates.is_empty() {
                continue;
            }
            debug!(strategy = strategy.name(), "strategy selected");
            let chosen = candidates.remove(0);
            return chosen.transform_up(&|p| match p {
                PhysicalPlan::PlanLater(inner) => Ok(Some(self.plan(inner)?)),
                _ => Ok(None),
            });
        }
        Err(QuarryError::Unsupported(format!(
            "no planning strategy applies to:\n{logical}"
        )))
    }

    /// Insert exchanges wherever a child's partitioning does not satisfy the
    /// parent's requirement.
    fn ensure_requirements(&self, plan: PhysicalPlan) -> Result<PhysicalPlan> {
        plan.transform_up(&|p| {
            let required = p.required_child_distribution();
            let children = p.children();
            let mut changed = false;
            let mut new_children = Vec::with_capacity(children.len());
            for (child, requirement) in children.into_iter().zip(required) {
                if child.output_partitioning().satisfies(&requirement) {
                    new_children.push(child);
                } else {
                    changed = true;
                    new_children.push(self.exchange_for(child, &requirement)?);
                }
            }
            Ok(if changed {
                Some(p.with_new_children(new_children)?)
            } else {
                None
            })
        })
    }

    fn exchange_for(
        &self,
        child: PhysicalPlan,
        requirement: &Distribution,
    ) -> Result<PhysicalPlan> {
        let partitioning = match requirement {
            Distribution::Unspecified => unreachable!("unspecified is always satisfied"),
            Distribution::AllTuples | Distribution::Ordered(_) => Partitioning::Single,
            Distribution::Clustered(keys) => {
                let schema = child.output();
                let exprs = keys
                    .iter()
                    .map(|k| bind_references(k, &[schema.clone()]))
                    .collect::<Result<Vec<_>>>()?;
                Partitioning::Hash {
                    exprs,
                    partitions: self.config.shuffle_partitions,
                }
            }
        };
        Ok(PhysicalPlan::Exchange(ExchangeExec {
            partitioning,
            input: Arc::new(child),
        }))
    }
}

fn plan_later(child: &Arc<LogicalPlan>) -> Arc<PhysicalPlan> {
    Arc::new(PhysicalPlan::PlanLater(Arc::clone(child)))
}

// -------------------------
// Strategies
// -------------------------

/// Write operators.
struct DataSink;

impl PlanStrategy for DataSink {
    fn name(&self) -> &'static str {
        "data-sink"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>> {
        let LogicalPlan::InsertInto {
            table,
            partition_spec,
            child,
        } = plan
        else {
            return Ok(vec![]);
        };
        Ok(vec![PhysicalPlan::Insert(InsertExec {
            table: table.clone(),
            partition_spec: partition_spec.clone(),
            input: plan_later(child),
        })])
    }
}

/// Relation scans, with projection push-through when the project above is
/// simple (bare attributes only).
struct TableScan;

impl PlanStrategy for TableScan {
    fn name(&self) -> &'static str {
        "table-scan"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>> {
        match plan {
            LogicalPlan::Project { exprs, child } => {
                let LogicalPlan::Relation {
                    name,
                    attributes,
                    partition_cols,
                } = child.as_ref()
                else {
                    return Ok(vec![]);
                };
                let mut narrowed = Vec::with_capacity(exprs.len());
                for e in exprs {
                    let Expr::Attribute(attr) = e else {
                        return Ok(vec![]);
                    };
                    if !attributes.iter().any(|a| a.id == attr.id) {
                        return Ok(vec![]);
                    }
                    narrowed.push(attr.clone());
                }
                Ok(vec![PhysicalPlan::Scan(ScanExec {
                    table: name.clone(),
                    attributes: narrowed,
                    pruning_filters: vec![],
                    partition_cols: partition_cols.clone(),
                })])
            }
            LogicalPlan::Relation {
                name,
                attributes,
                partition_cols,
            } => Ok(vec![PhysicalPlan::Scan(ScanExec {
                table: name.clone(),
                attributes: attributes.clone(),
                pruning_filters: vec![],
                partition_cols: partition_cols.clone(),
            })]),
            _ => Ok(vec![]),
        }
    }
}

/// Split a filter over a partitioned relation: predicates referencing only
/// partition keys prune partitions at the scan; the residual stays a filter.
struct PartitionPruning;

impl PlanStrategy for PartitionPruning {
    fn name(&self) -> &'static str {
        "partition-pruning"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>> {
        let LogicalPlan::Filter { predicate, child } = plan else {
            return Ok(vec![]);
        };
        let LogicalPlan::Relation {
            name,
            attributes,
            partition_cols,
        } = child.as_ref()
        else {
            return Ok(vec![]);
        };
        if partition_cols.is_empty() {
            return Ok(vec![]);
        }
        let mut pruning = Vec::new();
        let mut residual = Vec::new();
        for conjunct in predicate.split_conjuncts() {
            let refs = conjunct.references();
            let only_partition_keys =
                !refs.is_empty() && refs.iter().all(|a| partition_cols.contains(&a.name));
            if only_partition_keys {
                pruning.push(conjunct);
            } else {
                residual.push(conjunct);
            }
        }
        if pruning.is_empty() {
            return Ok(vec![]);
        }
        let scan = PhysicalPlan::Scan(ScanExec {
            table: name.clone(),
            attributes: attributes.clone(),
            pruning_filters: pruning,
            partition_cols: partition_cols.clone(),
        });
        Ok(vec![if residual.is_empty() {
            scan
        } else {
            PhysicalPlan::Filter(FilterExec {
                predicate: Expr::combine_conjuncts(residual),
                input: Arc::new(scan),
            })
        }])
    }
}

/// Hash join on extracted `left = right` predicates; the remaining
/// conjuncts guard the join in a wrapping filter.
struct EquiJoin;

impl PlanStrategy for EquiJoin {
    fn name(&self) -> &'static str {
        "equi-join"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>> {
        let LogicalPlan::Join {
            left,
            right,
            join_type,
            condition: Some(condition),
        } = plan
        else {
            return Ok(vec![]);
        };
        let left_ids: Vec<_> = left.output().iter().map(|a| a.id).collect();
        let right_ids: Vec<_> = right.output().iter().map(|a| a.id).collect();
        let evaluable = |e: &Expr, ids: &[quarry_common::AttrId]| {
            let refs = e.references();
            !refs.is_empty() && refs.iter().all(|a| ids.contains(&a.id))
        };

        let mut left_keys = Vec::new();
        let mut right_keys = Vec::new();
        let mut residual = Vec::new();
        for conjunct in condition.split_conjuncts() {
            match &conjunct {
                Expr::Binary {
                    left: l,
                    op: BinaryOp::Eq,
                    right: r,
                } => {
                    if evaluable(l, &left_ids) && evaluable(r, &right_ids) {
                        left_keys.push(l.as_ref().clone());
                        right_keys.push(r.as_ref().clone());
                    } else if evaluable(r, &left_ids) && evaluable(l, &right_ids) {
                        left_keys.push(r.as_ref().clone());
                        right_keys.push(l.as_ref().clone());
                    } else {
                        residual.push(conjunct);
                    }
                }
                _ => residual.push(conjunct),
            }
        }
        if left_keys.is_empty() {
            return Ok(vec![]);
        }
        let join = PhysicalPlan::HashEquiJoin(HashEquiJoinExec {
            join_type: *join_type,
            left_keys,
            right_keys,
            left: plan_later(left),
            right: plan_later(right),
        });
        Ok(vec![if residual.is_empty() {
            join
        } else {
            PhysicalPlan::Filter(FilterExec {
                predicate: Expr::combine_conjuncts(residual),
                input: Arc::new(join),
            })
        }])
    }
}

/// Two-level aggregation when every aggregate decomposes into a partial
/// state; otherwise a single aggregate over clustered input.
struct Aggregation;

impl PlanStrategy for Aggregation {
    fn name(&self) -> &'static str {
        "aggregation"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>> {
        let LogicalPlan::Aggregate {
            group_exprs,
            aggregate_exprs,
            child,
        } = plan
        else {
            return Ok(vec![]);
        };
        let mut calls = Vec::new();
        for e in aggregate_exprs {
            calls.extend(e.collect(&|x| match x {
                Expr::Aggregate { func, .. } => Some(*func),
                _ => None,
            }));
        }
        let all_partial = calls.iter().all(|f| f.supports_partial());
        if all_partial {
            let partial = PhysicalPlan::HashAggregate(HashAggregateExec {
                mode: AggregateMode::Partial,
                group_exprs: group_exprs.clone(),
                aggregate_exprs: aggregate_exprs.clone(),
                input: plan_later(child),
            });
            Ok(vec![PhysicalPlan::HashAggregate(HashAggregateExec {
                mode: AggregateMode::Final,
                group_exprs: group_exprs.clone(),
                aggregate_exprs: aggregate_exprs.clone(),
                input: Arc::new(partial),
            })])
        } else {
            Ok(vec![PhysicalPlan::HashAggregate(HashAggregateExec {
                mode: AggregateMode::Complete,
                group_exprs: group_exprs.clone(),
                aggregate_exprs: aggregate_exprs.clone(),
                input: plan_later(child),
            })])
        }
    }
}

/// Joins with a condition but no extractable equi-predicate, and outer joins
/// without a condition. One side is materialized and probed per streamed
/// row.
struct BroadcastNestedLoop;

impl PlanStrategy for BroadcastNestedLoop {
    fn name(&self) -> &'static str {
        "broadcast-nested-loop-join"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>> {
        let LogicalPlan::Join {
            left,
            right,
            join_type,
            condition,
        } = plan
        else {
            return Ok(vec![]);
        };
        if condition.is_none() && *join_type == JoinType::Inner {
            return Ok(vec![]);
        }
        Ok(vec![PhysicalPlan::BroadcastNestedLoopJoin(
            BroadcastNestedLoopJoinExec {
                join_type: *join_type,
                condition: condition.clone(),
                build_side: BuildSide::Right,
                left: plan_later(left),
                right: plan_later(right),
            },
        )])
    }
}

/// Inner join with no condition at all.
struct CartesianProduct;

impl PlanStrategy for CartesianProduct {
    fn name(&self) -> &'static str {
        "cartesian-product"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>> {
        let LogicalPlan::Join {
            left,
            right,
            join_type: JoinType::Inner,
            condition: None,
        } = plan
        else {
            return Ok(vec![]);
        };
        Ok(vec![PhysicalPlan::CartesianProduct(CartesianProductExec {
            left: plan_later(left),
            right: plan_later(right),
        })])
    }
}

/// Pass-through lowering for the remaining operators.
struct BasicOperators;

impl PlanStrategy for BasicOperators {
    fn name(&self) -> &'static str {
        "basic-operators"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<Vec<PhysicalPlan>> {
        Ok(match plan {
            LogicalPlan::Project { exprs, child } => vec![PhysicalPlan::Project(ProjectExec {
                exprs: exprs.clone(),
                input: plan_later(child),
            })],
            LogicalPlan::Filter { predicate, child } => vec![PhysicalPlan::Filter(FilterExec {
                predicate: predicate.clone(),
                input: plan_later(child),
            })],
            LogicalPlan::Sort {
                orders,
                global,
                child,
            } => vec![PhysicalPlan::Sort(SortExec {
                orders: orders.clone(),
                global: *global,
                input: plan_later(child),
            })],
            LogicalPlan::Limit { n, child } => vec![PhysicalPlan::Limit(LimitExec {
                n: *n,
                input: plan_later(child),
            })],
            LogicalPlan::Union { children } => vec![PhysicalPlan::Union(UnionExec {
                children: children.iter().map(plan_later).collect(),
            })],
            LogicalPlan::Distinct { child } => vec![distinct_as_aggregate(child)],
            LogicalPlan::Generate {
                generator,
                join,
                outer,
                generator_output,
                child,
            } => vec![PhysicalPlan::Generate(GenerateExec {
                generator: generator.clone(),
                join: *join,
                outer: *outer,
                generator_output: generator_output.clone(),
                input: plan_later(child),
            })],
            LogicalPlan::LocalRelation { attributes, rows } => {
                vec![PhysicalPlan::LocalScan(LocalScanExec {
                    attributes: attributes.clone(),
                    rows: rows.clone(),
                })]
            }
            LogicalPlan::NoRelation => vec![PhysicalPlan::OneRow],
            LogicalPlan::Subquery { child, .. } => vec![PhysicalPlan::PlanLater(child.clone())],
            _ => vec![],
        })
    }
}

/// `Distinct` is an aggregate grouping by the full output with the grouping
/// columns passed through.
fn distinct_as_aggregate(child: &Arc<LogicalPlan>) -> PhysicalPlan {
    let output = child.output();
    let group_exprs: Vec<Expr> = output.iter().cloned().map(Expr::Attribute).collect();
    let aggregate_exprs: Vec<Expr> = output
        .iter()
        .enumerate()
        .map(|(i, attr)| bound_passthrough(i, attr))
        .collect();
    PhysicalPlan::HashAggregate(HashAggregateExec {
        mode: AggregateMode::Complete,
        group_exprs,
        aggregate_exprs,
        input: plan_later(child),
    })
}

/// Grouping column passed through to the aggregate output, keeping its id.
fn bound_passthrough(slot: usize, attr: &AttributeRef) -> Expr {
    Expr::Alias {
        child: Arc::new(Expr::BoundReference {
            tuple: 0,
            field: slot,
            data_type: attr.data_type.clone(),
            nullable: attr.nullable,
        }),
        name: attr.name.clone(),
        id: attr.id,
    }
}
