use thiserror::Error;

/// Canonical quarry error taxonomy used across crates.
///
/// Classification guidance:
/// - name/relation/function resolution failures surface as the dedicated
///   `*NotFound` / `AmbiguousReference` / `NonGroupingReference` variants so
///   callers can report the offending plan fragment
/// - [`QuarryError::IncompatibleTypes`] and [`QuarryError::CastFailed`] cover
///   static and runtime type failures respectively
/// - [`QuarryError::InvariantViolated`], [`QuarryError::RuleFixpointExceeded`]
///   and [`QuarryError::TreeShapeMismatch`] indicate bugs in rewrite rules and
///   are not recoverable
/// - [`QuarryError::Planning`] / [`QuarryError::Execution`] are coarse
///   fallbacks for failures with no dedicated variant
#[derive(Debug, Error)]
pub enum QuarryError {
    /// Relation name could not be found in the catalog.
    #[error("relation not found: {0}")]
    RelationNotFound(String),

    /// Attribute name matched more than one column in scope.
    #[error("ambiguous reference: {name} (candidates: {candidates})")]
    AmbiguousReference {
        /// The name as written in the query.
        name: String,
        /// Rendered list of matching attributes.
        candidates: String,
    },

    /// Attribute name matched nothing after all resolution passes.
    #[error("unresolved attribute: {name}\nin plan:\n{plan}")]
    UnresolvedAttribute {
        /// The name as written in the query.
        name: String,
        /// Tree-string of the plan the name was resolved against.
        plan: String,
    },

    /// Function name is not registered.
    #[error("function not found: {0}")]
    FunctionNotFound(String),

    /// Non-aggregate subexpression of an aggregate output does not appear in
    /// the grouping expressions.
    #[error("expression {expr} is neither an aggregate nor part of the grouping expressions [{grouping}]")]
    NonGroupingReference {
        /// Rendered offending expression.
        expr: String,
        /// Rendered grouping expression list.
        grouping: String,
    },

    /// No widening exists between two data types.
    #[error("incompatible types: {left} vs {right}")]
    IncompatibleTypes {
        /// Rendered left type.
        left: String,
        /// Rendered right type.
        right: String,
    },

    /// Runtime cast could not convert a value to the target type.
    #[error("cannot cast {value} to {target}")]
    CastFailed {
        /// Rendered source value.
        value: String,
        /// Rendered target type.
        target: String,
    },

    /// Integral or decimal division by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Tuple or field ordinal out of range during evaluation.
    #[error("index out of bounds: {index} (len {len})")]
    IndexOutOfBounds {
        /// Offending ordinal.
        index: usize,
        /// Container length.
        len: usize,
    },

    /// A null value reached a context that requires a non-null input.
    #[error("null value in non-null context: {0}")]
    NullDereference(String),

    /// Valid request for behavior intentionally outside the engine's scope.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A declared plan invariant failed after a rule batch.
    #[error("invariant violated after batch '{batch}': {description}\nin plan:\n{plan}")]
    InvariantViolated {
        /// Batch whose invariant failed.
        batch: String,
        /// What the invariant requires.
        description: String,
        /// Tree-string of the failing plan.
        plan: String,
    },

    /// A fixpoint batch did not converge within its iteration budget.
    #[error("batch '{batch}' did not reach fixpoint in {max_iterations} iterations")]
    RuleFixpointExceeded {
        /// Batch that failed to converge.
        batch: String,
        /// Configured iteration budget.
        max_iterations: usize,
    },

    /// A node was rebuilt with the wrong number of children.
    #[error("tree shape mismatch: expected {expected} children, got {actual}")]
    TreeShapeMismatch {
        /// Arity of the node being rebuilt.
        expected: usize,
        /// Number of replacement children supplied.
        actual: usize,
    },

    /// Planning/analysis failure with no dedicated variant.
    #[error("planning error: {0}")]
    Planning(String),

    /// Runtime evaluation failure with no dedicated variant.
    #[error("execution error: {0}")]
    Execution(String),
}

/// Standard quarry result alias.
pub type Result<T> = std::result::Result<T, QuarryError>;
