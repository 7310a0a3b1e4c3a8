//! Logical plans, analysis, optimization, and physical planning for quarry.
//!
//! Architecture role:
//! - a generic immutable tree kernel shared by expressions and plans
//! - the closed data-type lattice and scalar value model
//! - the expression algebra with a row-level evaluator
//! - the rule engine driving the analyzer and optimizer to fixpoint
//! - strategy-based lowering into the physical operator graph
//!
//! Data flow: parsed plan -> [`analyzer`] -> [`optimizer`] ->
//! [`physical_planner`] -> physical plan, which the execution substrate runs
//! with [`eval`] for expression evaluation.
//!
//! Key modules:
//! - [`tree`]
//! - [`types`] / [`value`]
//! - [`expr`] / [`eval`] / [`functions`]
//! - [`logical_plan`] / [`rules`] / [`analyzer`] / [`optimizer`]
//! - [`physical_plan`] / [`physical_planner`] / [`explain`]

pub mod analyzer;
pub mod eval;
pub mod explain;
pub mod expr;
pub mod functions;
pub mod logical_plan;
pub mod optimizer;
pub mod physical_plan;
pub mod physical_planner;
pub mod rules;
pub mod tree;
pub mod types;
pub mod value;

pub use analyzer::{Analyzer, Catalog, TableSchema};
pub use eval::{bind_references, binary_op, evaluate};
pub use explain::{explain_logical, explain_physical};
pub use expr::{
    split_qualified, AggregateFunction, AttributeRef, BinaryOp, Expr, Generator, SortDirection,
    SortOrder,
};
pub use functions::{
    get_scalar_function, get_table_function, register_scalar_function, register_table_function,
    ScalarFunction, TableFunction,
};
pub use logical_plan::{JoinType, LogicalPlan};
pub use optimizer::Optimizer;
pub use physical_plan::{
    AggregateMode, BroadcastNestedLoopJoinExec, BuildSide, CartesianProductExec, Distribution,
    ExchangeExec, FilterExec, GenerateExec, HashAggregateExec, HashEquiJoinExec, InsertExec,
    LimitExec, LocalScanExec, Partitioning, PhysicalPlan, ProjectExec, ScanExec, SortExec,
    UnionExec,
};
pub use physical_planner::{PhysicalPlannerConfig, PlanStrategy, QueryPlanner};
pub use rules::{Batch, Invariant, Rule, RuleExecutor, Strategy};
pub use tree::TreeNode;
pub use types::{nullable_join, DataType, StructField};
pub use value::{Row, Value, F32, F64};
