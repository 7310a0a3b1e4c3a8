//! The physical operator graph.
//!
//! Physical plans are the only trees whose leaves reference external
//! resources: scans name catalog tables that the execution substrate opens.
//! `PlanLater` is a planning-time placeholder resolved by the query planner.

use std::sync::Arc;

use quarry_common::Result;

use crate::expr::{AttributeRef, Expr, Generator, SortOrder};
use crate::logical_plan::{JoinType, LogicalPlan};
use crate::tree::{expect_arity, TreeNode};
use crate::value::Row;

/// Requirement an operator places on the partitioning of a child's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Distribution {
    /// No requirement.
    Unspecified,
    /// All rows in a single partition.
    AllTuples,
    /// Rows sharing a key tuple are colocated. Keys are expressions bound
    /// against the child's output.
    Clustered(Vec<Expr>),
    /// Rows totally ordered across partitions.
    Ordered(Vec<SortOrder>),
}

/// How an operator's output rows are spread over partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partitioning {
    /// Unknown layout.
    Unknown,
    /// Everything in one partition.
    Single,
    /// Hash partitioned by key expressions.
    Hash {
        /// Key expressions, bound against the operator's output.
        exprs: Vec<Expr>,
        /// Partition count.
        partitions: usize,
    },
}

impl Partitioning {
    /// Whether rows laid out this way satisfy a required distribution.
    pub fn satisfies(&self, required: &Distribution) -> bool {
        match required {
            Distribution::Unspecified => true,
            Distribution::AllTuples => matches!(self, Partitioning::Single),
            // Clustered inputs are zipped pairwise with their siblings, so a
            // matching hash layout is required; a single partition does not
            // line up against a hashed sibling.
            Distribution::Clustered(keys) => match self {
                Partitioning::Hash { exprs, .. } => exprs == keys,
                Partitioning::Single | Partitioning::Unknown => false,
            },
            Distribution::Ordered(_) => matches!(self, Partitioning::Single),
        }
    }
}

/// Which side of a nested-loop join is materialized and re-read per streamed
/// row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSide {
    /// Materialize the left input.
    Left,
    /// Materialize the right input.
    Right,
}

/// Aggregation phase of a hash aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateMode {
    /// Per-partition partial states; output is `group keys ++ states`.
    Partial,
    /// Merge partial states after redistribution and emit final results.
    Final,
    /// Single-phase aggregation over correctly distributed input.
    Complete,
}

/// Physical query plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalPlan {
    /// Catalog table scan.
    Scan(ScanExec),
    /// In-memory row scan.
    LocalScan(LocalScanExec),
    /// Leaf producing a single empty tuple.
    OneRow,
    /// Row filter.
    Filter(FilterExec),
    /// Projection.
    Project(ProjectExec),
    /// Hash-based grouped aggregation.
    HashAggregate(HashAggregateExec),
    /// Hash join on extracted equi-keys.
    HashEquiJoin(HashEquiJoinExec),
    /// Nested-loop join probing a fully materialized side.
    BroadcastNestedLoopJoin(BroadcastNestedLoopJoinExec),
    /// Unconditional cross product.
    CartesianProduct(CartesianProductExec),
    /// Row ordering.
    Sort(SortExec),
    /// Row count cap.
    Limit(LimitExec),
    /// Bag union.
    Union(UnionExec),
    /// Generator application.
    Generate(GenerateExec),
    /// Partition boundary: repartitions or gathers child rows.
    Exchange(ExchangeExec),
    /// Write into a catalog table.
    Insert(InsertExec),
    /// Placeholder for a child the planner has not lowered yet.
    PlanLater(Arc<LogicalPlan>),
}

/// Catalog table scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanExec {
    /// Table name resolved by the execution substrate.
    pub table: String,
    /// Output columns, possibly narrowed by projection push-through.
    pub attributes: Vec<AttributeRef>,
    /// Predicates over partition keys only, applied per partition before any
    /// row is read.
    pub pruning_filters: Vec<Expr>,
    /// Partition-key column names.
    pub partition_cols: Vec<String>,
}

/// In-memory row scan.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalScanExec {
    /// Output columns.
    pub attributes: Vec<AttributeRef>,
    /// Row data.
    pub rows: Vec<Row>,
}

/// Row filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExec {
    /// Boolean predicate; rows evaluating to non-true are dropped.
    pub predicate: Expr,
    /// Input plan.
    pub input: Arc<PhysicalPlan>,
}

/// Projection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectExec {
    /// Named output expressions.
    pub exprs: Vec<Expr>,
    /// Input plan.
    pub input: Arc<PhysicalPlan>,
}

/// Hash-based grouped aggregation.
///
/// The grouping map is keyed by the evaluated grouping-value row and built
/// lazily per input partition; after input exhaustion it is drained in
/// insertion-undefined order.
#[derive(Debug, Clone, PartialEq)]
pub struct HashAggregateExec {
    /// Aggregation phase.
    pub mode: AggregateMode,
    /// Grouping expressions over the child's output.
    pub group_exprs: Vec<Expr>,
    /// Output expressions combining aggregate calls and grouping-bound
    /// references.
    pub aggregate_exprs: Vec<Expr>,
    /// Input plan.
    pub input: Arc<PhysicalPlan>,
}

/// Hash join on extracted equi-keys. Null keys never match.
#[derive(Debug, Clone, PartialEq)]
pub struct HashEquiJoinExec {
    /// Join variant.
    pub join_type: JoinType,
    /// Keys evaluated against the left input.
    pub left_keys: Vec<Expr>,
    /// Keys evaluated against the right input.
    pub right_keys: Vec<Expr>,
    /// Left input.
    pub left: Arc<PhysicalPlan>,
    /// Right input.
    pub right: Arc<PhysicalPlan>,
}

/// Nested-loop join probing a fully materialized (broadcast) side.
///
/// Outer variants emit unmatched tuples on the preserving side(s) padded
/// with nulls; a full outer join emits each unmatched tuple of either side
/// exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastNestedLoopJoinExec {
    /// Join variant.
    pub join_type: JoinType,
    /// Join condition over `[left, right]` tuples.
    pub condition: Option<Expr>,
    /// Materialized side.
    pub build_side: BuildSide,
    /// Left input.
    pub left: Arc<PhysicalPlan>,
    /// Right input.
    pub right: Arc<PhysicalPlan>,
}

/// Unconditional cross product.
#[derive(Debug, Clone, PartialEq)]
pub struct CartesianProductExec {
    /// Left input.
    pub left: Arc<PhysicalPlan>,
    /// Right input.
    pub right: Arc<PhysicalPlan>,
}

/// Row ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct SortExec {
    /// Sort keys.
    pub orders: Vec<SortOrder>,
    /// Whether a total order across all partitions is required.
    pub global: bool,
    /// Input plan.
    pub input: Arc<PhysicalPlan>,
}

/// Row count cap.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitExec {
    /// Maximum number of rows.
    pub n: usize,
    /// Input plan.
    pub input: Arc<PhysicalPlan>,
}

/// Bag union.
#[derive(Debug, Clone, PartialEq)]
pub struct UnionExec {
    /// Input plans.
    pub children: Vec<Arc<PhysicalPlan>>,
}

/// Generator application.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateExec {
    /// The generator.
    pub generator: Generator,
    /// Whether input columns are retained alongside generated columns.
    pub join: bool,
    /// Whether input rows with no generated rows are still emitted.
    pub outer: bool,
    /// Generator output columns.
    pub generator_output: Vec<AttributeRef>,
    /// Input plan.
    pub input: Arc<PhysicalPlan>,
}

/// Partition boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeExec {
    /// Target layout.
    pub partitioning: Partitioning,
    /// Input plan.
    pub input: Arc<PhysicalPlan>,
}

/// Write into a catalog table.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertExec {
    /// Target table name.
    pub table: String,
    /// Static partition key values for the write.
    pub partition_spec: Vec<(String, Option<String>)>,
    /// Input plan.
    pub input: Arc<PhysicalPlan>,
}

impl PhysicalPlan {
    /// Output attributes.
    ///
    /// Partial aggregates produce an internal positional layout
    /// (`group keys ++ states`) consumed only by exchanges and the final
    /// aggregate; their attribute list is empty.
    pub fn output(&self) -> Vec<AttributeRef> {
        match self {
            PhysicalPlan::Scan(x) => x.attributes.clone(),
            PhysicalPlan::LocalScan(x) => x.attributes.clone(),
            PhysicalPlan::OneRow => vec![],
            PhysicalPlan::Filter(x) => x.input.output(),
            PhysicalPlan::Project(x) => x
                .exprs
                .iter()
                .filter_map(|e| e.to_attribute().ok())
                .collect(),
            PhysicalPlan::HashAggregate(x) => match x.mode {
                AggregateMode::Partial => vec![],
                AggregateMode::Final | AggregateMode::Complete => x
                    .aggregate_exprs
                    .iter()
                    .filter_map(|e| e.to_attribute().ok())
                    .collect(),
            },
            PhysicalPlan::HashEquiJoin(x) => {
                joined_output(&x.left, &x.right, x.join_type)
            }
            PhysicalPlan::BroadcastNestedLoopJoin(x) => {
                joined_output(&x.left, &x.right, x.join_type)
            }
            PhysicalPlan::CartesianProduct(x) => {
                joined_output(&x.left, &x.right, JoinType::Inner)
            }
            PhysicalPlan::Sort(x) => x.input.output(),
            PhysicalPlan::Limit(x) => x.input.output(),
            PhysicalPlan::Union(x) => x
                .children
                .first()
                .map(|c| c.output())
                .unwrap_or_default(),
            PhysicalPlan::Generate(x) => {
                if x.join {
                    let mut out = x.input.output();
                    out.extend(x.generator_output.iter().cloned());
                    out
                } else {
                    x.generator_output.clone()
                }
            }
            PhysicalPlan::Exchange(x) => x.input.output(),
            PhysicalPlan::Insert(_) => vec![],
            PhysicalPlan::PlanLater(logical) => logical.output(),
        }
    }

    /// Distribution each child's rows must satisfy before this operator
    /// runs. Parallel to `children()`.
    pub fn required_child_distribution(&self) -> Vec<Distribution> {
        match self {
            PhysicalPlan::HashAggregate(x) => match x.mode {
                AggregateMode::Partial => vec![Distribution::Unspecified],
                AggregateMode::Final => {
                    if x.group_exprs.is_empty() {
                        vec![Distribution::AllTuples]
                    } else {
                        // Partial output is positional: keys come first.
                        vec![Distribution::Clustered(partial_key_refs(x))]
                    }
                }
                AggregateMode::Complete => {
                    if x.group_exprs.is_empty() {
                        vec![Distribution::AllTuples]
                    } else {
                        vec![Distribution::Clustered(x.group_exprs.clone())]
                    }
                }
            },
            PhysicalPlan::HashEquiJoin(x) => vec![
                Distribution::Clustered(x.left_keys.clone()),
                Distribution::Clustered(x.right_keys.clone()),
            ],
            PhysicalPlan::BroadcastNestedLoopJoin(x) => {
                // Unmatched-broadcast emission needs a single streamed
                // partition for the outer variants that preserve the build
                // side.
                let streamed_all = match (x.build_side, x.join_type) {
                    (BuildSide::Right, JoinType::RightOuter | JoinType::FullOuter) => true,
                    (BuildSide::Left, JoinType::LeftOuter | JoinType::FullOuter) => true,
                    _ => false,
                };
                let streamed = if streamed_all {
                    Distribution::AllTuples
                } else {
                    Distribution::Unspecified
                };
                match x.build_side {
                    BuildSide::Right => vec![streamed, Distribution::Unspecified],
                    BuildSide::Left => vec![Distribution::Unspecified, streamed],
                }
            }
            PhysicalPlan::Sort(x) if x.global => vec![Distribution::Ordered(x.orders.clone())],
            PhysicalPlan::Limit(_) => vec![Distribution::AllTuples],
            other => other
                .children()
                .iter()
                .map(|_| Distribution::Unspecified)
                .collect(),
        }
    }

    /// Layout of this operator's output rows.
    pub fn output_partitioning(&self) -> Partitioning {
        match self {
            PhysicalPlan::Exchange(x) => x.partitioning.clone(),
            PhysicalPlan::OneRow | PhysicalPlan::LocalScan(_) => Partitioning::Single,
            PhysicalPlan::Filter(x) => x.input.output_partitioning(),
            PhysicalPlan::Limit(x) => x.input.output_partitioning(),
            PhysicalPlan::Sort(x) => {
                if x.global {
                    Partitioning::Single
                } else {
                    x.input.output_partitioning()
                }
            }
            PhysicalPlan::HashAggregate(x) if x.mode != AggregateMode::Partial => {
                x.input.output_partitioning()
            }
            _ => Partitioning::Unknown,
        }
    }
}

/// Key references into a partial aggregate's positional output.
pub fn partial_key_refs(agg: &HashAggregateExec) -> Vec<Expr> {
    agg.group_exprs
        .iter()
        .enumerate()
        .map(|(i, g)| Expr::BoundReference {
            tuple: 0,
            field: i,
            data_type: g.data_type().unwrap_or(crate::types::DataType::Null),
            nullable: g.nullable(),
        })
        .collect()
}

fn joined_output(
    left: &PhysicalPlan,
    right: &PhysicalPlan,
    join_type: JoinType,
) -> Vec<AttributeRef> {
    let left_forced = matches!(join_type, JoinType::RightOuter | JoinType::FullOuter);
    let right_forced = matches!(join_type, JoinType::LeftOuter | JoinType::FullOuter);
    let mut out: Vec<AttributeRef> = left
        .output()
        .iter()
        .map(|a| a.with_nullable(a.nullable || left_forced))
        .collect();
    out.extend(
        right
            .output()
            .iter()
            .map(|a| a.with_nullable(a.nullable || right_forced)),
    );
    out
}

impl TreeNode for PhysicalPlan {
    fn children(&self) -> Vec<Self> {
        match self {
            PhysicalPlan::Scan(_)
            | PhysicalPlan::LocalScan(_)
            | PhysicalPlan::OneRow
            | PhysicalPlan::PlanLater(_) => vec![],
            PhysicalPlan::Filter(x) => vec![x.input.as_ref().clone()],
            PhysicalPlan::Project(x) => vec![x.input.as_ref().clone()],
            PhysicalPlan::HashAggregate(x) => vec![x.input.as_ref().clone()],
            PhysicalPlan::HashEquiJoin(x) => {
                vec![x.left.as_ref().clone(), x.right.as_ref().clone()]
            }
            PhysicalPlan::BroadcastNestedLoopJoin(x) => {
                vec![x.left.as_ref().clone(), x.right.as_ref().clone()]
            }
            PhysicalPlan::CartesianProduct(x) => {
                vec![x.left.as_ref().clone(), x.right.as_ref().clone()]
            }
            PhysicalPlan::Sort(x) => vec![x.input.as_ref().clone()],
            PhysicalPlan::Limit(x) => vec![x.input.as_ref().clone()],
            PhysicalPlan::Union(x) => x.children.iter().map(|c| c.as_ref().clone()).collect(),
            PhysicalPlan::Generate(x) => vec![x.input.as_ref().clone()],
            PhysicalPlan::Exchange(x) => vec![x.input.as_ref().clone()],
            PhysicalPlan::Insert(x) => vec![x.input.as_ref().clone()],
        }
    }

    fn with_new_children(&self, mut children: Vec<Self>) -> Result<Self> {
        let one = |children: &mut Vec<PhysicalPlan>| -> Result<Arc<PhysicalPlan>> {
            expect_arity(1, children.len())?;
            Ok(Arc::new(children.pop().unwrap()))
        };
        let two =
            |children: &mut Vec<PhysicalPlan>| -> Result<(Arc<PhysicalPlan>, Arc<PhysicalPlan>)> {
                expect_arity(2, children.len())?;
                let right = Arc::new(children.pop().unwrap());
                let left = Arc::new(children.pop().unwrap());
                Ok((left, right))
            };
        Ok(match self {
            PhysicalPlan::Scan(_)
            | PhysicalPlan::LocalScan(_)
            | PhysicalPlan::OneRow
            | PhysicalPlan::PlanLater(_) => {
                expect_arity(0, children.len())?;
                self.clone()
            }
            PhysicalPlan::Filter(x) => PhysicalPlan::Filter(FilterExec {
                predicate: x.predicate.clone(),
                input: one(&mut children)?,
            }),
            PhysicalPlan::Project(x) => PhysicalPlan::Project(ProjectExec {
                exprs: x.exprs.clone(),
                input: one(&mut children)?,
            }),
            PhysicalPlan::HashAggregate(x) => PhysicalPlan::HashAggregate(HashAggregateExec {
                mode: x.mode,
                group_exprs: x.group_exprs.clone(),
                aggregate_exprs: x.aggregate_exprs.clone(),
                input: one(&mut children)?,
            }),
            PhysicalPlan::HashEquiJoin(x) => {
                let (left, right) = two(&mut children)?;
                PhysicalPlan::HashEquiJoin(HashEquiJoinExec {
                    join_type: x.join_type,
                    left_keys: x.left_keys.clone(),
                    right_keys: x.right_keys.clone(),
                    left,
                    right,
                })
            }
            PhysicalPlan::BroadcastNestedLoopJoin(x) => {
                let (left, right) = two(&mut children)?;
                PhysicalPlan::BroadcastNestedLoopJoin(BroadcastNestedLoopJoinExec {
                    join_type: x.join_type,
                    condition: x.condition.clone(),
                    build_side: x.build_side,
                    left,
                    right,
                })
            }
            PhysicalPlan::CartesianProduct(_) => {
                let (left, right) = two(&mut children)?;
                PhysicalPlan::CartesianProduct(CartesianProductExec { left, right })
            }
            PhysicalPlan::Sort(x) => PhysicalPlan::Sort(SortExec {
                orders: x.orders.clone(),
                global: x.global,
                input: one(&mut children)?,
            }),
            PhysicalPlan::Limit(x) => PhysicalPlan::Limit(LimitExec {
                n: x.n,
                input: one(&mut children)?,
            }),
            PhysicalPlan::Union(x) => {
                expect_arity(x.children.len(), children.len())?;
                PhysicalPlan::Union(UnionExec {
                    children: children.into_iter().map(Arc::new).collect(),
                })
            }
            PhysicalPlan::Generate(x) => PhysicalPlan::Generate(GenerateExec {
                generator: x.generator.clone(),
                join: x.join,
                outer: x.outer,
                generator_output: x.generator_output.clone(),
                input: one(&mut children)?,
            }),
            PhysicalPlan::Exchange(x) => PhysicalPlan::Exchange(ExchangeExec {
                partitioning: x.partitioning.clone(),
                input: one(&mut children)?,
            }),
            PhysicalPlan::Insert(x) => PhysicalPlan::Insert(InsertExec {
                table: x.table.clone(),
                partition_spec: x.partition_spec.clone(),
                input: one(&mut children)?,
            }),
        })
    }
}
