//! Logical relational operators.

use std::fmt;
use std::sync::Arc;

use quarry_common::Result;

use crate::expr::{AttributeRef, Expr, Generator, SortOrder};
use crate::tree::{expect_arity, TreeNode};
use crate::types::nullable_join;
use crate::value::Row;

/// Join variants. Outer sides preserve unmatched tuples, padding the other
/// side with nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// Matched pairs only.
    Inner,
    /// Preserve left tuples.
    LeftOuter,
    /// Preserve right tuples.
    RightOuter,
    /// Preserve both sides.
    FullOuter,
}

/// Logical query plan. Immutable; rewrites produce new plans sharing
/// unchanged subtrees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalPlan {
    /// Table reference pending catalog lookup.
    UnresolvedRelation {
        /// Table name.
        name: String,
        /// Optional alias qualifying the relation's columns.
        alias: Option<String>,
    },
    /// Resolved base relation; output columns carry this instantiation's ids.
    Relation {
        /// Table name.
        name: String,
        /// Output schema.
        attributes: Vec<AttributeRef>,
        /// Names of partition-key columns, if the table is partitioned.
        partition_cols: Vec<String>,
    },
    /// In-memory relation with inline rows.
    LocalRelation {
        /// Output schema.
        attributes: Vec<AttributeRef>,
        /// Row data.
        rows: Vec<Row>,
    },
    /// Leaf producing exactly one empty tuple.
    NoRelation,
    /// Named sub-plan; passes the child output re-qualified by the alias.
    Subquery {
        /// Alias qualifying the child's columns.
        alias: String,
        /// Sub-plan.
        child: Arc<LogicalPlan>,
    },
    /// Column-level computation.
    Project {
        /// Output expressions (named after analysis).
        exprs: Vec<Expr>,
        /// Input plan.
        child: Arc<LogicalPlan>,
    },
    /// Row filter; rows where the predicate is not true are dropped.
    Filter {
        /// Boolean predicate.
        predicate: Expr,
        /// Input plan.
        child: Arc<LogicalPlan>,
    },
    /// Relational join.
    Join {
        /// Left input.
        left: Arc<LogicalPlan>,
        /// Right input.
        right: Arc<LogicalPlan>,
        /// Join variant.
        join_type: JoinType,
        /// Optional join condition.
        condition: Option<Expr>,
    },
    /// Grouped aggregation.
    Aggregate {
        /// Grouping expressions.
        group_exprs: Vec<Expr>,
        /// Output expressions; aggregate calls plus grouping references.
        aggregate_exprs: Vec<Expr>,
        /// Input plan.
        child: Arc<LogicalPlan>,
    },
    /// Row ordering.
    Sort {
        /// Sort keys.
        orders: Vec<SortOrder>,
        /// Whether a total ordering across all partitions is required, as
        /// opposed to a partition-local one.
        global: bool,
        /// Input plan.
        child: Arc<LogicalPlan>,
    },
    /// Row count cap.
    Limit {
        /// Maximum number of rows.
        n: usize,
        /// Input plan.
        child: Arc<LogicalPlan>,
    },
    /// Bag union of same-schema inputs.
    Union {
        /// Input plans.
        children: Vec<Arc<LogicalPlan>>,
    },
    /// Duplicate elimination.
    Distinct {
        /// Input plan.
        child: Arc<LogicalPlan>,
    },
    /// Apply a row-producing generator to each input row.
    Generate {
        /// The generator.
        generator: Generator,
        /// Whether input columns are retained alongside generated columns.
        join: bool,
        /// Whether an input row producing no generator rows is still emitted
        /// with nulls in the generated columns.
        outer: bool,
        /// Output columns of the generator, assigned ids by the analyzer.
        generator_output: Vec<AttributeRef>,
        /// Input plan.
        child: Arc<LogicalPlan>,
    },
    /// Write the child's rows into a catalog table.
    InsertInto {
        /// Target table name.
        table: String,
        /// Static partition key values for the write.
        partition_spec: Vec<(String, Option<String>)>,
        /// Input plan.
        child: Arc<LogicalPlan>,
    },
}

impl LogicalPlan {
    /// Output attributes, computable from children.
    ///
    /// Unresolved leaves and not-yet-named projection expressions contribute
    /// nothing; after analysis the list is complete and duplicate-free.
    pub fn output(&self) -> Vec<AttributeRef> {
        match self {
            LogicalPlan::UnresolvedRelation { .. } | LogicalPlan::NoRelation => vec![],
            LogicalPlan::Relation { attributes, .. }
            | LogicalPlan::LocalRelation { attributes, .. } => attributes.clone(),
            LogicalPlan::Subquery { alias, child } => child
                .output()
                .iter()
                .map(|a| a.with_qualifier(alias.clone()))
                .collect(),
            LogicalPlan::Project { exprs, .. } => {
                exprs.iter().filter_map(|e| e.to_attribute().ok()).collect()
            }
            LogicalPlan::Filter { child, .. }
            | LogicalPlan::Sort { child, .. }
            | LogicalPlan::Limit { child, .. }
            | LogicalPlan::Distinct { child } => child.output(),
            LogicalPlan::Join {
                left,
                right,
                join_type,
                ..
            } => join_output(&left.output(), &right.output(), *join_type),
            LogicalPlan::Aggregate {
                aggregate_exprs, ..
            } => aggregate_exprs
                .iter()
                .filter_map(|e| e.to_attribute().ok())
                .collect(),
            LogicalPlan::Union { children } => children
                .first()
                .map(|c| c.output())
                .unwrap_or_default(),
            LogicalPlan::Generate {
                join,
                generator_output,
                child,
                ..
            } => {
                if *join {
                    let mut out = child.output();
                    out.extend(generator_output.iter().cloned());
                    out
                } else {
                    generator_output.clone()
                }
            }
            LogicalPlan::InsertInto { .. } => vec![],
        }
    }

    /// All expressions carried by this node's own parameters, in order.
    /// Children plans are not visited.
    pub fn expressions(&self) -> Vec<Expr> {
        match self {
            LogicalPlan::Project { exprs, .. } => exprs.clone(),
            LogicalPlan::Filter { predicate, .. } => vec![predicate.clone()],
            LogicalPlan::Join { condition, .. } => condition.iter().cloned().collect(),
            LogicalPlan::Aggregate {
                group_exprs,
                aggregate_exprs,
                ..
            } => {
                let mut out = group_exprs.clone();
                out.extend(aggregate_exprs.iter().cloned());
                out
            }
            LogicalPlan::Sort { orders, .. } => {
                orders.iter().map(|o| o.expr.as_ref().clone()).collect()
            }
            LogicalPlan::Generate { generator, .. } => generator.args(),
            _ => vec![],
        }
    }

    /// Rebuild this node with each of its own expressions mapped through
    /// `f`. Children plans are untouched.
    pub fn map_expressions(
        &self,
        f: &mut dyn FnMut(&Expr) -> Result<Expr>,
    ) -> Result<LogicalPlan> {
        Ok(match self {
            LogicalPlan::Project { exprs, child } => LogicalPlan::Project {
                exprs: exprs.iter().map(&mut *f).collect::<Result<_>>()?,
                child: child.clone(),
            },
            LogicalPlan::Filter { predicate, child } => LogicalPlan::Filter {
                predicate: f(predicate)?,
                child: child.clone(),
            },
            LogicalPlan::Join {
                left,
                right,
                join_type,
                condition,
            } => LogicalPlan::Join {
                left: left.clone(),
                right: right.clone(),
                join_type: *join_type,
                condition: condition.as_ref().map(&mut *f).transpose()?,
            },
            LogicalPlan::Aggregate {
                group_exprs,
                aggregate_exprs,
                child,
            } => LogicalPlan::Aggregate {
                group_exprs: group_exprs.iter().map(&mut *f).collect::<Result<_>>()?,
                aggregate_exprs: aggregate_exprs
                    .iter()
                    .map(&mut *f)
                    .collect::<Result<_>>()?,
                child: child.clone(),
            },
            LogicalPlan::Sort {
                orders,
                global,
                child,
            } => LogicalPlan::Sort {
                orders: orders
                    .iter()
                    .map(|o| {
                        Ok(SortOrder {
                            expr: Arc::new(f(&o.expr)?),
                            direction: o.direction,
                        })
                    })
                    .collect::<Result<_>>()?,
                global: *global,
                child: child.clone(),
            },
            LogicalPlan::Generate {
                generator,
                join,
                outer,
                generator_output,
                child,
            } => {
                let args = generator
                    .args()
                    .iter()
                    .map(&mut *f)
                    .collect::<Result<Vec<_>>>()?;
                LogicalPlan::Generate {
                    generator: generator.with_args(args)?,
                    join: *join,
                    outer: *outer,
                    generator_output: generator_output.clone(),
                    child: child.clone(),
                }
            }
            other => other.clone(),
        })
    }

    /// Whether this operator and everything below it is fully resolved.
    pub fn resolved(&self) -> bool {
        let own = match self {
            LogicalPlan::UnresolvedRelation { .. } => false,
            LogicalPlan::Generate {
                generator,
                generator_output,
                ..
            } => generator.resolved() && !generator_output.is_empty(),
            _ => true,
        };
        own && self.expressions().iter().all(Expr::resolved)
            && self.children().iter().all(LogicalPlan::resolved)
    }

    /// Rendered output schema, for diagnostics.
    pub fn schema_string(&self) -> String {
        self.output()
            .iter()
            .map(|a| format!("{a}: {}", a.data_type))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Convenience: wrap in a filter.
    pub fn filter(self, predicate: Expr) -> LogicalPlan {
        LogicalPlan::Filter {
            predicate,
            child: Arc::new(self),
        }
    }

    /// Convenience: wrap in a projection.
    pub fn project(self, exprs: Vec<Expr>) -> LogicalPlan {
        LogicalPlan::Project {
            exprs,
            child: Arc::new(self),
        }
    }
}

/// Join output schema: left then right, with the null-supplying side(s) made
/// nullable.
fn join_output(
    left: &[AttributeRef],
    right: &[AttributeRef],
    join_type: JoinType,
) -> Vec<AttributeRef> {
    let left_forced = matches!(join_type, JoinType::RightOuter | JoinType::FullOuter);
    let right_forced = matches!(join_type, JoinType::LeftOuter | JoinType::FullOuter);
    let mut out = Vec::with_capacity(left.len() + right.len());
    out.extend(
        left.iter()
            .map(|a| a.with_nullable(nullable_join(a.nullable, left_forced))),
    );
    out.extend(
        right
            .iter()
            .map(|a| a.with_nullable(nullable_join(a.nullable, right_forced))),
    );
    out
}

impl TreeNode for LogicalPlan {
    fn children(&self) -> Vec<Self> {
        match self {
            LogicalPlan::UnresolvedRelation { .. }
            | LogicalPlan::Relation { .. }
            | LogicalPlan::LocalRelation { .. }
            | LogicalPlan::NoRelation => vec![],
            LogicalPlan::Subquery { child, .. }
            | LogicalPlan::Project { child, .. }
            | LogicalPlan::Filter { child, .. }
            | LogicalPlan::Aggregate { child, .. }
            | LogicalPlan::Sort { child, .. }
            | LogicalPlan::Limit { child, .. }
            | LogicalPlan::Distinct { child }
            | LogicalPlan::Generate { child, .. }
            | LogicalPlan::InsertInto { child, .. } => vec![child.as_ref().clone()],
            LogicalPlan::Join { left, right, .. } => {
                vec![left.as_ref().clone(), right.as_ref().clone()]
            }
            LogicalPlan::Union { children } => {
                children.iter().map(|c| c.as_ref().clone()).collect()
            }
        }
    }

    fn with_new_children(&self, mut children: Vec<Self>) -> Result<Self> {
        let one = |children: &mut Vec<LogicalPlan>| -> Result<Arc<LogicalPlan>> {
            expect_arity(1, children.len())?;
            Ok(Arc::new(children.pop().unwrap()))
        };
        Ok(match self {
            LogicalPlan::UnresolvedRelation { .. }
            | LogicalPlan::Relation { .. }
            | LogicalPlan::LocalRelation { .. }
            | LogicalPlan::NoRelation => {
                expect_arity(0, children.len())?;
                self.clone()
            }
            LogicalPlan::Subquery { alias, .. } => LogicalPlan::Subquery {
                alias: alias.clone(),
                child: one(&mut children)?,
            },
            LogicalPlan::Project { exprs, .. } => LogicalPlan::Project {
                exprs: exprs.clone(),
                child: one(&mut children)?,
            },
            LogicalPlan::Filter { predicate, .. } => LogicalPlan::Filter {
                predicate: predicate.clone(),
                child: one(&mut children)?,
            },
            LogicalPlan::Join {
                join_type,
                condition,
                ..
            } => {
                expect_arity(2, children.len())?;
                let right = Arc::new(children.pop().unwrap());
                let left = Arc::new(children.pop().unwrap());
                LogicalPlan::Join {
                    left,
                    right,
                    join_type: *join_type,
                    condition: condition.clone(),
                }
            }
            LogicalPlan::Aggregate {
                group_exprs,
                aggregate_exprs,
                ..
            } => LogicalPlan::Aggregate {
                group_exprs: group_exprs.clone(),
                aggregate_exprs: aggregate_exprs.clone(),
                child: one(&mut children)?,
            },
            LogicalPlan::Sort { orders, global, .. } => LogicalPlan::Sort {
                orders: orders.clone(),
                global: *global,
                child: one(&mut children)?,
            },
            LogicalPlan::Limit { n, .. } => LogicalPlan::Limit {
                n: *n,
                child: one(&mut children)?,
            },
            LogicalPlan::Union { children: old } => {
                expect_arity(old.len(), children.len())?;
                LogicalPlan::Union {
                    children: children.into_iter().map(Arc::new).collect(),
                }
            }
            LogicalPlan::Distinct { .. } => LogicalPlan::Distinct {
                child: one(&mut children)?,
            },
            LogicalPlan::Generate {
                generator,
                join,
                outer,
                generator_output,
                ..
            } => LogicalPlan::Generate {
                generator: generator.clone(),
                join: *join,
                outer: *outer,
                generator_output: generator_output.clone(),
                child: one(&mut children)?,
            },
            LogicalPlan::InsertInto {
                table,
                partition_spec,
                ..
            } => LogicalPlan::InsertInto {
                table: table.clone(),
                partition_spec: partition_spec.clone(),
                child: one(&mut children)?,
            },
        })
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinType::Inner => "inner",
            JoinType::LeftOuter => "left_outer",
            JoinType::RightOuter => "right_outer",
            JoinType::FullOuter => "full_outer",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn attr(name: &str, nullable: bool) -> AttributeRef {
        AttributeRef::new(name, DataType::Int32, nullable)
    }

    fn relation(name: &str, attrs: Vec<AttributeRef>) -> LogicalPlan {
        LogicalPlan::Relation {
            name: name.to_string(),
            attributes: attrs,
            partition_cols: vec![],
        }
    }

    #[test]
    fn left_outer_join_makes_right_side_nullable() {
        let l = relation("l", vec![attr("a", false)]);
        let r = relation("r", vec![attr("b", false)]);
        let join = LogicalPlan::Join {
            left: Arc::new(l),
            right: Arc::new(r),
            join_type: JoinType::LeftOuter,
            condition: None,
        };
        let out = join.output();
        assert!(!out[0].nullable);
        assert!(out[1].nullable);
    }

    #[test]
    fn full_outer_join_makes_both_sides_nullable() {
        let l = relation("l", vec![attr("a", false)]);
        let r = relation("r", vec![attr("b", false)]);
        let join = LogicalPlan::Join {
            left: Arc::new(l),
            right: Arc::new(r),
            join_type: JoinType::FullOuter,
            condition: None,
        };
        assert!(join.output().iter().all(|a| a.nullable));
    }

    #[test]
    fn subquery_requalifies_child_output_without_changing_ids() {
        let a = attr("a", false);
        let id = a.id;
        let sub = LogicalPlan::Subquery {
            alias: "t".to_string(),
            child: Arc::new(relation("base", vec![a])),
        };
        let out = sub.output();
        assert_eq!(out[0].qualifier.as_deref(), Some("t"));
        assert_eq!(out[0].id, id);
    }

    #[test]
    fn transform_identity_preserves_plan() {
        let plan = relation("t", vec![attr("a", false)])
            .filter(Expr::binary(
                Expr::col("a"),
                crate::expr::BinaryOp::Gt,
                Expr::lit(crate::value::Value::Int32(1)),
            ))
            .project(vec![Expr::col("a")]);
        let same = plan.transform_down(&|_| Ok(None)).unwrap();
        assert_eq!(same, plan);
    }
}
