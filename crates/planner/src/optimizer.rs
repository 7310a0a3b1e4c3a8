//! Semantics-preserving logical rewrites.
//!
//! Every rule either strictly reduces a well-founded measure (subtree size
//! for elimination, non-literal node count for folding) or leaves the tree
//! unchanged, so the fixpoint batch always converges.

use std::sync::Arc;

use quarry_common::Result;

use crate::eval::evaluate;
use crate::expr::Expr;
use crate::logical_plan::LogicalPlan;
use crate::rules::{Batch, Rule, RuleExecutor, Strategy};
use crate::tree::TreeNode;
use crate::value::Value;

/// Logical plan optimizer.
pub struct Optimizer {
    max_iterations: usize,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer {
    /// Optimizer with the default iteration budget.
    pub fn new() -> Self {
        Self {
            max_iterations: quarry_common::EngineConfig::default().max_rule_iterations,
        }
    }

    /// Override the fixpoint iteration budget.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Optimize an analyzed logical plan. Idempotent:
    /// `optimize(optimize(p)) == optimize(p)`.
    pub fn optimize(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        let executor = RuleExecutor::new(vec![
            Batch::new(
                "eliminate-subqueries",
                Strategy::Once,
                vec![Box::new(EliminateSubqueries)],
            ),
            Batch::new(
                "simplification",
                Strategy::FixedPoint {
                    max_iterations: self.max_iterations,
                },
                vec![
                    Box::new(ConstantFolding),
                    Box::new(SimplifyBooleans),
                    Box::new(SimplifyCasts),
                    Box::new(CombineFilters),
                ],
            ),
        ]);
        executor.execute(plan)
    }
}

/// `Subquery(_, c) -> c`. Attribute identity lives in ids, so dropping the
/// alias wrapper preserves semantics.
struct EliminateSubqueries;

impl Rule<LogicalPlan> for EliminateSubqueries {
    fn name(&self) -> &'static str {
        "eliminate-subqueries"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| match p {
            LogicalPlan::Subquery { child, .. } => Ok(Some(child.as_ref().clone())),
            _ => Ok(None),
        })
    }
}

/// Evaluate foldable subtrees at plan time and replace them with literals.
/// Evaluation failures (for example a literal division by zero) leave the
/// node in place for runtime reporting.
struct ConstantFolding;

impl Rule<LogicalPlan> for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let folded = p.map_expressions(&mut fold_expr)?;
            Ok(if folded == *p { None } else { Some(folded) })
        })
    }
}

fn fold_expr(expr: &Expr) -> Result<Expr> {
    expr.transform_up(&|e| {
        // Aliases keep their output name; their children fold underneath.
        if matches!(e, Expr::Literal { .. } | Expr::Alias { .. }) || !e.foldable() {
            return Ok(None);
        }
        match evaluate(e, &[]) {
            Ok(value) => Ok(Some(Expr::Literal {
                value,
                data_type: e.data_type()?,
            })),
            Err(_) => Ok(None),
        }
    })
}

/// Boolean identities that are sound under three-valued logic:
/// `true and x -> x`, `false and x -> false`, and the duals for `or`.
struct SimplifyBooleans;

impl Rule<LogicalPlan> for SimplifyBooleans {
    fn name(&self) -> &'static str {
        "simplify-booleans"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let simplified = p.map_expressions(&mut |e| {
                e.transform_up(&|x| Ok(simplify_boolean(x)))
            })?;
            Ok(if simplified == *p { None } else { Some(simplified) })
        })
    }
}

fn simplify_boolean(expr: &Expr) -> Option<Expr> {
    let as_bool_lit = |e: &Expr| match e {
        Expr::Literal {
            value: Value::Boolean(b),
            ..
        } => Some(*b),
        _ => None,
    };
    match expr {
        Expr::And(a, b) => match (as_bool_lit(a), as_bool_lit(b)) {
            (Some(false), _) | (_, Some(false)) => Some(Expr::lit(Value::Boolean(false))),
            (Some(true), _) => Some(b.as_ref().clone()),
            (_, Some(true)) => Some(a.as_ref().clone()),
            _ => None,
        },
        Expr::Or(a, b) => match (as_bool_lit(a), as_bool_lit(b)) {
            (Some(true), _) | (_, Some(true)) => Some(Expr::lit(Value::Boolean(true))),
            (Some(false), _) => Some(b.as_ref().clone()),
            (_, Some(false)) => Some(a.as_ref().clone()),
            _ => None,
        },
        _ => None,
    }
}

/// `cast(x as T)` where `x` already has type `T` -> `x`.
struct SimplifyCasts;

impl Rule<LogicalPlan> for SimplifyCasts {
    fn name(&self) -> &'static str {
        "simplify-casts"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let simplified = p.map_expressions(&mut |e| {
                e.transform_up(&|x| {
                    let Expr::Cast { child, to } = x else {
                        return Ok(None);
                    };
                    if child.data_type().ok().as_ref() == Some(to) {
                        Ok(Some(child.as_ref().clone()))
                    } else {
                        Ok(None)
                    }
                })
            })?;
            Ok(if simplified == *p { None } else { Some(simplified) })
        })
    }
}

/// Adjacent filters merge their predicates with `and`.
struct CombineFilters;

impl Rule<LogicalPlan> for CombineFilters {
    fn name(&self) -> &'static str {
        "combine-filters"
    }

    fn apply(&self, plan: &LogicalPlan) -> Result<LogicalPlan> {
        plan.transform_up(&|p| {
            let LogicalPlan::Filter { predicate, child } = p else {
                return Ok(None);
            };
            let LogicalPlan::Filter {
                predicate: inner,
                child: grandchild,
            } = child.as_ref()
            else {
                return Ok(None);
            };
            Ok(Some(LogicalPlan::Filter {
                predicate: Expr::and(inner.clone(), predicate.clone()),
                child: Arc::new(grandchild.as_ref().clone()),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;
    use crate::types::DataType;

    #[test]
    fn true_and_x_simplifies_to_x() {
        let x = Expr::binary(Expr::col("a"), BinaryOp::Gt, Expr::lit(Value::Int32(1)));
        let e = Expr::and(Expr::lit(Value::Boolean(true)), x.clone());
        assert_eq!(simplify_boolean(&e), Some(x));
    }

    #[test]
    fn false_and_x_simplifies_to_false() {
        let x = Expr::binary(Expr::col("a"), BinaryOp::Gt, Expr::lit(Value::Int32(1)));
        let e = Expr::and(x.clone(), Expr::lit(Value::Boolean(false)));
        assert_eq!(simplify_boolean(&e), Some(Expr::lit(Value::Boolean(false))));
        let e = Expr::or(x.clone(), Expr::lit(Value::Boolean(false)));
        assert_eq!(simplify_boolean(&e), Some(x));
    }

    #[test]
    fn folding_keeps_failing_expressions_for_runtime() {
        let e = Expr::binary(
            Expr::lit(Value::Int64(1)),
            BinaryOp::Divide,
            Expr::lit(Value::Int64(0)),
        );
        assert_eq!(fold_expr(&e).unwrap(), e);
    }

    #[test]
    fn folding_types_null_results() {
        let e = Expr::null(DataType::Int32).cast(DataType::Int64);
        let folded = fold_expr(&e).unwrap();
        assert_eq!(
            folded,
            Expr::Literal {
                value: Value::Null,
                data_type: DataType::Int64
            }
        );
    }
}
