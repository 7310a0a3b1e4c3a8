//! Expression algebra: the tree of scalar expressions carried by plan nodes.
//!
//! Expressions are immutable value trees with reference-counted children, so
//! clones are shallow and rewrites share unchanged subtrees. Unresolved
//! variants (`UnresolvedAttribute`, `UnresolvedFunction`, `Star`) are placed
//! by the parser collaborator and must be replaced by the analyzer before
//! planning.

use std::fmt;
use std::sync::Arc;

use quarry_common::{AttrId, QuarryError, Result};

use crate::tree::{expect_arity, TreeNode};
use crate::types::{DataType, StructField};
use crate::value::Value;

/// Binary operator kind shared by arithmetic and comparison expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Remainder,
}

impl BinaryOp {
    /// Whether the operator yields a boolean.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    /// Whether the operator yields a numeric result.
    pub fn is_arithmetic(self) -> bool {
        !self.is_comparison()
    }

    /// SQL-ish rendering of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
        }
    }
}

/// Built-in aggregate function kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    /// Row count over non-null inputs.
    Count,
    /// Distinct non-null input count.
    CountDistinct,
    /// Sum of non-null inputs, null over empty input.
    Sum,
    /// Arithmetic mean as float64, null over empty input.
    Average,
}

impl AggregateFunction {
    /// Lowercase SQL name.
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::CountDistinct => "count_distinct",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Average => "avg",
        }
    }

    /// Result type given the input type.
    pub fn result_type(self, input: &DataType) -> DataType {
        match self {
            AggregateFunction::Count | AggregateFunction::CountDistinct => DataType::Int64,
            AggregateFunction::Sum => input.clone(),
            AggregateFunction::Average => DataType::Float64,
        }
    }

    /// Whether the result may be null even over non-empty input groups.
    pub fn result_nullable(self) -> bool {
        !matches!(self, AggregateFunction::Count | AggregateFunction::CountDistinct)
    }

    /// Whether the aggregate decomposes into a combinable partial state plus
    /// a final merge (two-level execution).
    pub fn supports_partial(self) -> bool {
        !matches!(self, AggregateFunction::CountDistinct)
    }

    /// Number of cells in the partial state row.
    pub fn partial_state_arity(self) -> usize {
        match self {
            AggregateFunction::Count | AggregateFunction::Sum => 1,
            AggregateFunction::Average => 2,
            // No partial decomposition; the value set is not a fixed-arity row.
            AggregateFunction::CountDistinct => 0,
        }
    }
}

/// A resolved column reference: name, type, nullability, and a globally
/// unique id. Two references denote the same column iff their ids match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeRef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub data_type: DataType,
    /// Whether the column may hold nulls.
    pub nullable: bool,
    /// Globally unique identity.
    pub id: AttrId,
    /// Optional relation alias qualifying the name.
    pub qualifier: Option<String>,
}

impl AttributeRef {
    /// New attribute with a freshly issued id.
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            id: AttrId::next(),
            qualifier: None,
        }
    }

    /// Same column under a relation alias.
    pub fn with_qualifier(&self, qualifier: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            ..self.clone()
        }
    }

    /// Same column with adjusted nullability (outer join sides).
    pub fn with_nullable(&self, nullable: bool) -> Self {
        Self {
            nullable,
            ..self.clone()
        }
    }

    /// Whether `qualifier`/`name` (as written in a query) names this column.
    pub fn matches(&self, qualifier: Option<&str>, name: &str) -> bool {
        if self.name != name {
            return false;
        }
        match qualifier {
            None => true,
            Some(q) => self.qualifier.as_deref() == Some(q),
        }
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(q) = &self.qualifier {
            write!(f, "{q}.")?;
        }
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Sort direction of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Smallest first; nulls first.
    Ascending,
    /// Largest first; nulls last.
    Descending,
}

/// One sort key: expression plus direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortOrder {
    /// Key expression.
    pub expr: Arc<Expr>,
    /// Direction.
    pub direction: SortDirection,
}

impl SortOrder {
    /// Ascending sort on `expr`.
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr: Arc::new(expr),
            direction: SortDirection::Ascending,
        }
    }

    /// Descending sort on `expr`.
    pub fn desc(expr: Expr) -> Self {
        Self {
            expr: Arc::new(expr),
            direction: SortDirection::Descending,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        };
        write!(f, "{} {dir}", self.expr)
    }
}

/// Row-producing expression consumed by the `Generate` operator.
///
/// Generators are stateless across input rows; implementations must not rely
/// on any per-query lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Generator {
    /// One output row per element of a list-valued expression.
    Explode(Arc<Expr>),
    /// Table function resolved through the function registry by name.
    TableUdf {
        /// Registered lowercase function name.
        name: String,
        /// Argument expressions.
        args: Vec<Arc<Expr>>,
        /// Output schema, filled in by the analyzer from the registry.
        fields: Option<Vec<StructField>>,
    },
}

impl Generator {
    /// Argument expressions of the generator.
    pub fn args(&self) -> Vec<Expr> {
        match self {
            Generator::Explode(child) => vec![child.as_ref().clone()],
            Generator::TableUdf { args, .. } => {
                args.iter().map(|a| a.as_ref().clone()).collect()
            }
        }
    }

    /// Rebuild the generator with new argument expressions.
    pub fn with_args(&self, mut args: Vec<Expr>) -> Result<Generator> {
        match self {
            Generator::Explode(_) => {
                expect_arity(1, args.len())?;
                Ok(Generator::Explode(Arc::new(args.pop().unwrap())))
            }
            Generator::TableUdf { name, fields, args: old } => {
                expect_arity(old.len(), args.len())?;
                Ok(Generator::TableUdf {
                    name: name.clone(),
                    args: args.into_iter().map(Arc::new).collect(),
                    fields: fields.clone(),
                })
            }
        }
    }

    /// The produced output fields, once known.
    pub fn output_fields(&self) -> Result<Vec<StructField>> {
        match self {
            Generator::Explode(child) => {
                let (element, element_nullable) = match child.data_type()? {
                    DataType::List {
                        element,
                        element_nullable,
                    } => (*element, element_nullable),
                    other => {
                        return Err(QuarryError::Planning(format!(
                            "explode requires a list input, got {other}"
                        )))
                    }
                };
                Ok(vec![StructField::new("col", element, element_nullable)])
            }
            Generator::TableUdf { name, fields, .. } => fields.clone().ok_or_else(|| {
                QuarryError::Planning(format!("table function '{name}' is not resolved"))
            }),
        }
    }

    /// Whether the generator and its arguments are fully resolved.
    pub fn resolved(&self) -> bool {
        let args_ok = self.args().iter().all(Expr::resolved);
        match self {
            Generator::Explode(_) => args_ok,
            Generator::TableUdf { fields, .. } => args_ok && fields.is_some(),
        }
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generator::Explode(child) => write!(f, "explode({child})"),
            Generator::TableUdf { name, args, .. } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Constant of a known type.
    Literal {
        /// The value.
        value: Value,
        /// The value's type (authoritative for typed nulls).
        data_type: DataType,
    },
    /// Name-only reference, replaced by the analyzer. May be dotted
    /// (`alias.column`).
    UnresolvedAttribute {
        /// The name as written.
        name: String,
    },
    /// Resolved column reference.
    Attribute(AttributeRef),
    /// Direct indexed access into an input tuple, produced by reference
    /// binding.
    BoundReference {
        /// Input tuple ordinal.
        tuple: usize,
        /// Field ordinal within the tuple.
        field: usize,
        /// Field type.
        data_type: DataType,
        /// Field nullability.
        nullable: bool,
    },
    /// Named expression; the id identifies the output column it produces.
    Alias {
        /// The named expression.
        child: Arc<Expr>,
        /// Output column name.
        name: String,
        /// Output column identity.
        id: AttrId,
    },
    /// Unresolved wildcard, expanded by the analyzer.
    Star {
        /// Optional relation alias restriction.
        qualifier: Option<String>,
    },
    /// Function call pending registry lookup.
    UnresolvedFunction {
        /// Function name as written.
        name: String,
        /// Argument expressions.
        args: Vec<Arc<Expr>>,
    },
    /// Scalar function resolved through the registry; the implementation is
    /// looked up by name at evaluation time.
    ScalarUdf {
        /// Registered lowercase function name.
        name: String,
        /// Argument expressions.
        args: Vec<Arc<Expr>>,
        /// Return type fixed at resolution.
        return_type: DataType,
    },
    /// Binary arithmetic or comparison.
    Binary {
        /// Left operand.
        left: Arc<Expr>,
        /// Operator.
        op: BinaryOp,
        /// Right operand.
        right: Arc<Expr>,
    },
    /// Numeric negation.
    Negate(Arc<Expr>),
    /// Three-valued conjunction.
    And(Arc<Expr>, Arc<Expr>),
    /// Three-valued disjunction.
    Or(Arc<Expr>, Arc<Expr>),
    /// Three-valued negation.
    Not(Arc<Expr>),
    /// Type conversion.
    Cast {
        /// Input expression.
        child: Arc<Expr>,
        /// Target type.
        to: DataType,
    },
    /// Null test; never returns null itself.
    IsNull(Arc<Expr>),
    /// Complement null test; never returns null itself.
    IsNotNull(Arc<Expr>),
    /// First non-null argument.
    Coalesce(Vec<Arc<Expr>>),
    /// Conditional; a null condition selects the else branch.
    If {
        /// Boolean condition.
        condition: Arc<Expr>,
        /// Result when the condition is true.
        then_expr: Arc<Expr>,
        /// Result otherwise.
        else_expr: Arc<Expr>,
    },
    /// Uniform random float64 in `[0, 1)`. The only non-deterministic
    /// built-in.
    Rand,
    /// Aggregate call; evaluated by aggregation operators, never row-wise.
    Aggregate {
        /// Aggregate kind.
        func: AggregateFunction,
        /// Input expression evaluated per input row.
        arg: Arc<Expr>,
    },
}

impl Expr {
    /// Literal from a value, inferring the type.
    pub fn lit(value: Value) -> Expr {
        let data_type = value.data_type();
        Expr::Literal { value, data_type }
    }

    /// Typed null literal.
    pub fn null(data_type: DataType) -> Expr {
        Expr::Literal {
            value: Value::Null,
            data_type,
        }
    }

    /// Name-only column reference.
    pub fn col(name: impl Into<String>) -> Expr {
        Expr::UnresolvedAttribute { name: name.into() }
    }

    /// Binary expression.
    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            left: Arc::new(left),
            op,
            right: Arc::new(right),
        }
    }

    /// Conjunction.
    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::And(Arc::new(left), Arc::new(right))
    }

    /// Disjunction.
    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::Or(Arc::new(left), Arc::new(right))
    }

    /// Name this expression, issuing a fresh output column id.
    pub fn alias(self, name: impl Into<String>) -> Expr {
        Expr::Alias {
            child: Arc::new(self),
            name: name.into(),
            id: AttrId::next(),
        }
    }

    /// Cast this expression.
    pub fn cast(self, to: DataType) -> Expr {
        Expr::Cast {
            child: Arc::new(self),
            to,
        }
    }

    /// Aggregate call.
    pub fn aggregate(func: AggregateFunction, arg: Expr) -> Expr {
        Expr::Aggregate {
            func,
            arg: Arc::new(arg),
        }
    }

    /// Split a conjunction into its conjuncts.
    pub fn split_conjuncts(&self) -> Vec<Expr> {
        match self {
            Expr::And(a, b) => {
                let mut out = a.split_conjuncts();
                out.extend(b.split_conjuncts());
                out
            }
            other => vec![other.clone()],
        }
    }

    /// Combine conjuncts with `And`; empty input yields `true`.
    pub fn combine_conjuncts(mut conjuncts: Vec<Expr>) -> Expr {
        if conjuncts.is_empty() {
            return Expr::lit(Value::Boolean(true));
        }
        let first = conjuncts.remove(0);
        conjuncts.into_iter().fold(first, Expr::and)
    }

    /// Result type, derived from children. Fails on unresolved nodes.
    pub fn data_type(&self) -> Result<DataType> {
        Ok(match self {
            Expr::Literal { data_type, .. } => data_type.clone(),
            Expr::Attribute(attr) => attr.data_type.clone(),
            Expr::BoundReference { data_type, .. } => data_type.clone(),
            Expr::Alias { child, .. } => child.data_type()?,
            Expr::ScalarUdf { return_type, .. } => return_type.clone(),
            Expr::Binary { left, op, right } => {
                if op.is_comparison() {
                    DataType::Boolean
                } else {
                    DataType::widen(&left.data_type()?, &right.data_type()?)?
                }
            }
            Expr::Negate(child) => child.data_type()?,
            Expr::And(..) | Expr::Or(..) | Expr::Not(_) => DataType::Boolean,
            Expr::Cast { to, .. } => to.clone(),
            Expr::IsNull(_) | Expr::IsNotNull(_) => DataType::Boolean,
            Expr::Coalesce(args) => {
                let mut out = DataType::Null;
                for arg in args {
                    out = DataType::widen(&out, &arg.data_type()?)?;
                }
                out
            }
            Expr::If { then_expr, else_expr, .. } => {
                DataType::widen(&then_expr.data_type()?, &else_expr.data_type()?)?
            }
            Expr::Rand => DataType::Float64,
            Expr::Aggregate { func, arg } => func.result_type(&arg.data_type()?),
            Expr::UnresolvedAttribute { .. }
            | Expr::UnresolvedFunction { .. }
            | Expr::Star { .. } => {
                return Err(QuarryError::Planning(format!(
                    "unresolved expression has no type: {self}"
                )))
            }
        })
    }

    /// Conservative nullability: any nullable input, or arithmetic that can
    /// divide by zero, yields nullable. Null tests are never null.
    pub fn nullable(&self) -> bool {
        match self {
            Expr::Literal { value, .. } => value.is_null(),
            Expr::Attribute(attr) => attr.nullable,
            Expr::BoundReference { nullable, .. } => *nullable,
            Expr::Alias { child, .. } => child.nullable(),
            Expr::Binary { left, op, right } => {
                matches!(op, BinaryOp::Divide | BinaryOp::Remainder)
                    || left.nullable()
                    || right.nullable()
            }
            Expr::Negate(child) | Expr::Not(child) | Expr::Cast { child, .. } => child.nullable(),
            Expr::And(a, b) | Expr::Or(a, b) => a.nullable() || b.nullable(),
            Expr::IsNull(_) | Expr::IsNotNull(_) => false,
            Expr::Coalesce(args) => args.iter().all(|a| a.nullable()),
            Expr::If {
                then_expr,
                else_expr,
                ..
            } => then_expr.nullable() || else_expr.nullable(),
            Expr::Rand => false,
            Expr::Aggregate { func, arg } => func.result_nullable() || arg.nullable(),
            Expr::ScalarUdf { args, .. } => args.iter().any(|a| a.nullable()),
            Expr::UnresolvedAttribute { .. }
            | Expr::UnresolvedFunction { .. }
            | Expr::Star { .. } => true,
        }
    }

    /// The set of resolved attributes appearing in the subtree, deduplicated
    /// by id, in first-occurrence order.
    pub fn references(&self) -> Vec<AttributeRef> {
        let mut out: Vec<AttributeRef> = Vec::new();
        self.foreach(&mut |node| {
            if let Expr::Attribute(attr) = node {
                if !out.iter().any(|a| a.id == attr.id) {
                    out.push(attr.clone());
                }
            }
        });
        out
    }

    /// Whether the subtree contains only literals and pure operators, so it
    /// can be evaluated at plan time.
    pub fn foldable(&self) -> bool {
        match self {
            Expr::Literal { .. } => true,
            Expr::Binary { left, right, .. } => left.foldable() && right.foldable(),
            Expr::Negate(c) | Expr::Not(c) | Expr::Cast { child: c, .. } => c.foldable(),
            Expr::And(a, b) | Expr::Or(a, b) => a.foldable() && b.foldable(),
            Expr::IsNull(c) | Expr::IsNotNull(c) => c.foldable(),
            Expr::Coalesce(args) => args.iter().all(|a| a.foldable()),
            Expr::If {
                condition,
                then_expr,
                else_expr,
            } => condition.foldable() && then_expr.foldable() && else_expr.foldable(),
            Expr::Alias { child, .. } => child.foldable(),
            // Purity of registered functions is unknown.
            _ => false,
        }
    }

    /// Whether the subtree contains no unresolved nodes.
    pub fn resolved(&self) -> bool {
        !self.exists(&|node| {
            matches!(
                node,
                Expr::UnresolvedAttribute { .. }
                    | Expr::UnresolvedFunction { .. }
                    | Expr::Star { .. }
            )
        })
    }

    /// The output column this expression produces, for named expressions.
    pub fn to_attribute(&self) -> Result<AttributeRef> {
        match self {
            Expr::Attribute(attr) => Ok(attr.clone()),
            Expr::Alias { child, name, id } => Ok(AttributeRef {
                name: name.clone(),
                data_type: child.data_type()?,
                nullable: child.nullable(),
                id: *id,
                qualifier: None,
            }),
            other => Err(QuarryError::Planning(format!(
                "expression {other} has no output name; alias it first"
            ))),
        }
    }
}

impl TreeNode for Expr {
    fn children(&self) -> Vec<Self> {
        match self {
            Expr::Literal { .. }
            | Expr::UnresolvedAttribute { .. }
            | Expr::Attribute(_)
            | Expr::BoundReference { .. }
            | Expr::Star { .. }
            | Expr::Rand => vec![],
            Expr::Alias { child, .. }
            | Expr::Negate(child)
            | Expr::Not(child)
            | Expr::Cast { child, .. }
            | Expr::IsNull(child)
            | Expr::IsNotNull(child) => vec![child.as_ref().clone()],
            Expr::Binary { left, right, .. } => {
                vec![left.as_ref().clone(), right.as_ref().clone()]
            }
            Expr::And(a, b) | Expr::Or(a, b) => vec![a.as_ref().clone(), b.as_ref().clone()],
            Expr::Coalesce(args) => args.iter().map(|a| a.as_ref().clone()).collect(),
            Expr::UnresolvedFunction { args, .. } | Expr::ScalarUdf { args, .. } => {
                args.iter().map(|a| a.as_ref().clone()).collect()
            }
            Expr::If {
                condition,
                then_expr,
                else_expr,
            } => vec![
                condition.as_ref().clone(),
                then_expr.as_ref().clone(),
                else_expr.as_ref().clone(),
            ],
            Expr::Aggregate { arg, .. } => vec![arg.as_ref().clone()],
        }
    }

    fn with_new_children(&self, mut children: Vec<Self>) -> Result<Self> {
        let one = |children: &mut Vec<Expr>| -> Result<Arc<Expr>> {
            expect_arity(1, children.len())?;
            Ok(Arc::new(children.pop().unwrap()))
        };
        let two = |children: &mut Vec<Expr>| -> Result<(Arc<Expr>, Arc<Expr>)> {
            expect_arity(2, children.len())?;
            let b = Arc::new(children.pop().unwrap());
            let a = Arc::new(children.pop().unwrap());
            Ok((a, b))
        };
        Ok(match self {
            Expr::Literal { .. }
            | Expr::UnresolvedAttribute { .. }
            | Expr::Attribute(_)
            | Expr::BoundReference { .. }
            | Expr::Star { .. }
            | Expr::Rand => {
                expect_arity(0, children.len())?;
                self.clone()
            }
            Expr::Alias { name, id, .. } => Expr::Alias {
                child: one(&mut children)?,
                name: name.clone(),
                id: *id,
            },
            Expr::Negate(_) => Expr::Negate(one(&mut children)?),
            Expr::Not(_) => Expr::Not(one(&mut children)?),
            Expr::Cast { to, .. } => Expr::Cast {
                child: one(&mut children)?,
                to: to.clone(),
            },
            Expr::IsNull(_) => Expr::IsNull(one(&mut children)?),
            Expr::IsNotNull(_) => Expr::IsNotNull(one(&mut children)?),
            Expr::Binary { op, .. } => {
                let (left, right) = two(&mut children)?;
                Expr::Binary {
                    left,
                    op: *op,
                    right,
                }
            }
            Expr::And(..) => {
                let (a, b) = two(&mut children)?;
                Expr::And(a, b)
            }
            Expr::Or(..) => {
                let (a, b) = two(&mut children)?;
                Expr::Or(a, b)
            }
            Expr::Coalesce(args) => {
                expect_arity(args.len(), children.len())?;
                Expr::Coalesce(children.into_iter().map(Arc::new).collect())
            }
            Expr::UnresolvedFunction { name, args } => {
                expect_arity(args.len(), children.len())?;
                Expr::UnresolvedFunction {
                    name: name.clone(),
                    args: children.into_iter().map(Arc::new).collect(),
                }
            }
            Expr::ScalarUdf {
                name,
                args,
                return_type,
            } => {
                expect_arity(args.len(), children.len())?;
                Expr::ScalarUdf {
                    name: name.clone(),
                    args: children.into_iter().map(Arc::new).collect(),
                    return_type: return_type.clone(),
                }
            }
            Expr::If { .. } => {
                expect_arity(3, children.len())?;
                let else_expr = Arc::new(children.pop().unwrap());
                let then_expr = Arc::new(children.pop().unwrap());
                let condition = Arc::new(children.pop().unwrap());
                Expr::If {
                    condition,
                    then_expr,
                    else_expr,
                }
            }
            Expr::Aggregate { func, .. } => Expr::Aggregate {
                func: *func,
                arg: one(&mut children)?,
            },
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value, .. } => write!(f, "{value}"),
            Expr::UnresolvedAttribute { name } => write!(f, "'{name}"),
            Expr::Attribute(attr) => write!(f, "{attr}"),
            Expr::BoundReference { tuple, field, .. } => write!(f, "input[{tuple}][{field}]"),
            Expr::Alias { child, name, id } => write!(f, "{child} as {name}#{id}"),
            Expr::Star { qualifier: None } => write!(f, "*"),
            Expr::Star {
                qualifier: Some(q),
            } => write!(f, "{q}.*"),
            Expr::UnresolvedFunction { name, args } => {
                write!(f, "'{name}(")?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
            Expr::ScalarUdf { name, args, .. } => {
                write!(f, "{name}(")?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
            Expr::Binary { left, op, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::Negate(child) => write!(f, "(-{child})"),
            Expr::And(a, b) => write!(f, "({a} and {b})"),
            Expr::Or(a, b) => write!(f, "({a} or {b})"),
            Expr::Not(child) => write!(f, "(not {child})"),
            Expr::Cast { child, to } => write!(f, "cast({child} as {to})"),
            Expr::IsNull(child) => write!(f, "({child} is null)"),
            Expr::IsNotNull(child) => write!(f, "({child} is not null)"),
            Expr::Coalesce(args) => {
                write!(f, "coalesce(")?;
                fmt_args(f, args)?;
                write!(f, ")")
            }
            Expr::If {
                condition,
                then_expr,
                else_expr,
            } => write!(f, "if({condition}, {then_expr}, {else_expr})"),
            Expr::Rand => write!(f, "rand()"),
            Expr::Aggregate { func, arg } => write!(f, "{}({arg})", func.name()),
        }
    }
}

fn fmt_args(f: &mut fmt::Formatter<'_>, args: &[Arc<Expr>]) -> fmt::Result {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    Ok(())
}

/// Split a possibly dotted name into `(qualifier, column)`.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((q, c)) => (Some(q), c),
        None => (None, name),
    }
}
