//! Composable rewrite rules, batches, and the fixpoint executor.

use std::fmt;

use quarry_common::{QuarryError, Result};
use tracing::debug;

use crate::tree::TreeNode;

/// A named transformation over a whole tree. Implementations usually descend
/// with [`TreeNode::transform_down`]/[`TreeNode::transform_up`] and return
/// the input unchanged where they do not apply.
pub trait Rule<P: TreeNode> {
    /// Rule name for diagnostics.
    fn name(&self) -> &'static str;
    /// Apply the rule, returning the (possibly unchanged) tree.
    fn apply(&self, plan: &P) -> Result<P>;
}

/// How often a batch is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// A single pass over the rules.
    Once,
    /// Re-run the batch until a pass leaves the tree structurally unchanged.
    /// Exceeding the iteration budget is a rule bug and fails the run.
    FixedPoint {
        /// Maximum number of passes.
        max_iterations: usize,
    },
}

/// Invariant checked after a batch completes; returns a description of the
/// violation on failure.
pub type Invariant<P> = fn(&P) -> std::result::Result<(), String>;

/// A bundle of rules sharing an application strategy.
pub struct Batch<P: TreeNode> {
    /// Batch name for diagnostics.
    pub name: &'static str,
    /// Application strategy.
    pub strategy: Strategy,
    /// Rules, applied sequentially within each pass.
    pub rules: Vec<Box<dyn Rule<P>>>,
    /// Optional post-batch invariant.
    pub invariant: Option<Invariant<P>>,
}

impl<P: TreeNode> Batch<P> {
    /// Batch without a post-condition.
    pub fn new(name: &'static str, strategy: Strategy, rules: Vec<Box<dyn Rule<P>>>) -> Self {
        Self {
            name,
            strategy,
            rules,
            invariant: None,
        }
    }

    /// Attach a post-batch invariant.
    pub fn with_invariant(mut self, invariant: Invariant<P>) -> Self {
        self.invariant = Some(invariant);
        self
    }
}

/// Runs batches in order, each to its strategy, asserting declared
/// invariants in between.
pub struct RuleExecutor<P: TreeNode> {
    batches: Vec<Batch<P>>,
}

impl<P: TreeNode + fmt::Display> RuleExecutor<P> {
    /// Executor over the given batches.
    pub fn new(batches: Vec<Batch<P>>) -> Self {
        Self { batches }
    }

    /// Run every batch over `plan`.
    pub fn execute(&self, plan: P) -> Result<P> {
        let mut plan = plan;
        for batch in &self.batches {
            plan = run_batch(batch, plan)?;
            if let Some(invariant) = batch.invariant {
                invariant(&plan).map_err(|description| QuarryError::InvariantViolated {
                    batch: batch.name.to_string(),
                    description,
                    plan: plan.to_string(),
                })?;
            }
        }
        Ok(plan)
    }
}

fn run_batch<P: TreeNode + fmt::Display>(batch: &Batch<P>, plan: P) -> Result<P> {
    match batch.strategy {
        Strategy::Once => run_pass(batch, &plan),
        Strategy::FixedPoint { max_iterations } => {
            let mut current = plan;
            for iteration in 1..=max_iterations {
                let next = run_pass(batch, &current)?;
                if next == current {
                    debug!(
                        batch = batch.name,
                        iterations = iteration,
                        "batch reached fixpoint"
                    );
                    return Ok(current);
                }
                current = next;
            }
            Err(QuarryError::RuleFixpointExceeded {
                batch: batch.name.to_string(),
                max_iterations,
            })
        }
    }
}

fn run_pass<P: TreeNode + fmt::Display>(batch: &Batch<P>, plan: &P) -> Result<P> {
    let mut current = plan.clone();
    for rule in &batch.rules {
        let applied = rule.apply(&current)?;
        if applied != current {
            debug!(batch = batch.name, rule = rule.name(), "rule changed plan");
            current = applied;
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::value::Value;

    struct Decrement;

    impl Rule<Expr> for Decrement {
        fn name(&self) -> &'static str {
            "decrement"
        }

        fn apply(&self, plan: &Expr) -> Result<Expr> {
            plan.transform_up(&|e| match e {
                Expr::Literal {
                    value: Value::Int32(n),
                    ..
                } if *n > 0 => Ok(Some(Expr::lit(Value::Int32(n - 1)))),
                _ => Ok(None),
            })
        }
    }

    fn fixpoint(max_iterations: usize) -> RuleExecutor<Expr> {
        RuleExecutor::new(vec![Batch::new(
            "countdown",
            Strategy::FixedPoint { max_iterations },
            vec![Box::new(Decrement)],
        )])
    }

    #[test]
    fn fixpoint_converges() {
        let out = fixpoint(10).execute(Expr::lit(Value::Int32(3))).unwrap();
        assert_eq!(out, Expr::lit(Value::Int32(0)));
    }

    #[test]
    fn fixpoint_budget_is_enforced() {
        let err = fixpoint(3).execute(Expr::lit(Value::Int32(10))).unwrap_err();
        assert!(matches!(
            err,
            QuarryError::RuleFixpointExceeded { max_iterations: 3, .. }
        ));
    }

    #[test]
    fn once_runs_a_single_pass() {
        let executor = RuleExecutor::new(vec![Batch::new(
            "one-shot",
            Strategy::Once,
            vec![Box::new(Decrement)],
        )]);
        let out = executor.execute(Expr::lit(Value::Int32(3))).unwrap();
        assert_eq!(out, Expr::lit(Value::Int32(2)));
    }

    #[test]
    fn violated_invariants_fail_with_the_batch_name() {
        let executor = RuleExecutor::new(vec![Batch::new(
            "countdown",
            Strategy::FixedPoint { max_iterations: 10 },
            vec![Box::new(Decrement)],
        )
        .with_invariant(|_| Err("always wrong".to_string()))]);
        let err = executor.execute(Expr::lit(Value::Int32(1))).unwrap_err();
        match err {
            QuarryError::InvariantViolated { batch, description, .. } => {
                assert_eq!(batch, "countdown");
                assert_eq!(description, "always wrong");
            }
            other => panic!("expected InvariantViolated, got {other:?}"),
        }
    }
}
