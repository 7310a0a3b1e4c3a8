use std::collections::HashMap;
use std::sync::Arc;

use quarry_common::QuarryError;
use quarry_planner::{
    AggregateFunction, Analyzer, Catalog, DataType, Expr, JoinType, LogicalPlan, StructField,
    TableSchema, TreeNode, Value,
};

struct TestCatalog {
    tables: HashMap<String, TableSchema>,
}

impl TestCatalog {
    fn with_table(mut self, name: &str, schema: TableSchema) -> Self {
        self.tables.insert(name.to_string(), schema);
        self
    }
}

impl Default for TestCatalog {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }
}

impl Catalog for TestCatalog {
    fn lookup_relation(&self, name: &str) -> quarry_common::Result<TableSchema> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| QuarryError::RelationNotFound(name.to_string()))
    }
}

fn analyzer(catalog: TestCatalog) -> Analyzer {
    Analyzer::new(Arc::new(catalog))
}

fn t_catalog() -> TestCatalog {
    TestCatalog::default().with_table(
        "t",
        TableSchema::new(vec![
            StructField::new("a", DataType::Int32, false),
            StructField::new("b", DataType::Int64, true),
            StructField::new("name", DataType::Utf8, true),
        ]),
    )
}

fn scan(name: &str) -> LogicalPlan {
    LogicalPlan::UnresolvedRelation {
        name: name.to_string(),
        alias: None,
    }
}

fn scan_as(name: &str, alias: &str) -> LogicalPlan {
    LogicalPlan::UnresolvedRelation {
        name: name.to_string(),
        alias: Some(alias.to_string()),
    }
}

#[test]
fn resolves_columns_against_the_catalog() {
    let plan = scan("t").project(vec![Expr::col("a"), Expr::col("b")]);
    let analyzed = analyzer(t_catalog()).analyze(plan).expect("analyze");
    assert!(analyzed.resolved());

    let LogicalPlan::Project { exprs, child } = &analyzed else {
        panic!("expected project, got {analyzed}");
    };
    let child_out = child.output();
    let Expr::Attribute(a) = &exprs[0] else {
        panic!("expected attribute, got {}", exprs[0]);
    };
    assert_eq!(a.id, child_out[0].id);
    assert_eq!(a.data_type, DataType::Int32);
    assert!(analyzed.schema_string().contains(": int32"));
}

#[test]
fn unknown_relation_fails() {
    let err = analyzer(t_catalog())
        .analyze(scan("missing").project(vec![Expr::col("a")]))
        .unwrap_err();
    assert!(matches!(err, QuarryError::RelationNotFound(name) if name == "missing"));
}

#[test]
fn unknown_column_reports_the_enclosing_operator() {
    let err = analyzer(t_catalog())
        .analyze(scan("t").project(vec![Expr::col("nope")]))
        .unwrap_err();
    match err {
        QuarryError::UnresolvedAttribute { name, plan } => {
            assert_eq!(name, "nope");
            assert!(plan.contains("Project"), "plan fragment: {plan}");
        }
        other => panic!("expected UnresolvedAttribute, got {other:?}"),
    }
}

#[test]
fn alias_qualifies_columns_and_drops_the_subquery() {
    let plan = scan_as("t", "x").project(vec![Expr::col("x.a")]);
    let analyzed = analyzer(t_catalog()).analyze(plan).expect("analyze");
    assert!(!analyzed.exists(&|p| matches!(p, LogicalPlan::Subquery { .. })));

    let LogicalPlan::Project { exprs, .. } = &analyzed else {
        panic!("expected project");
    };
    let Expr::Attribute(a) = &exprs[0] else {
        panic!("expected attribute");
    };
    assert_eq!(a.qualifier.as_deref(), Some("x"));
    assert_eq!(a.name, "a");
}

#[test]
fn ambiguous_reference_fails() {
    let catalog = t_catalog().with_table(
        "u",
        TableSchema::new(vec![StructField::new("a", DataType::Int32, false)]),
    );
    let join = LogicalPlan::Join {
        left: Arc::new(scan("t")),
        right: Arc::new(scan("u")),
        join_type: JoinType::Inner,
        condition: None,
    };
    let err = analyzer(catalog)
        .analyze(join.project(vec![Expr::col("a")]))
        .unwrap_err();
    assert!(matches!(err, QuarryError::AmbiguousReference { name, .. } if name == "a"));
}

#[test]
fn self_join_instantiations_get_distinct_ids() {
    let join = LogicalPlan::Join {
        left: Arc::new(scan("t")),
        right: Arc::new(scan_as("t", "u")),
        join_type: JoinType::Inner,
        condition: None,
    };
    let analyzed = analyzer(t_catalog()).analyze(join).expect("analyze");
    let out = analyzed.output();
    assert_eq!(out.len(), 6);
    let mut ids: Vec<_> = out.iter().map(|a| a.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 6, "self-join columns must stay distinguishable");
}

#[test]
fn bare_star_expands_to_the_full_child_output() {
    let plan = scan("t").project(vec![Expr::Star { qualifier: None }]);
    let analyzed = analyzer(t_catalog()).analyze(plan).expect("analyze");
    let LogicalPlan::Project { exprs, child } = &analyzed else {
        panic!("expected project");
    };
    assert_eq!(exprs.len(), 3);
    let child_ids: Vec<_> = child.output().iter().map(|a| a.id).collect();
    for (expr, id) in exprs.iter().zip(child_ids) {
        let Expr::Attribute(a) = expr else {
            panic!("expected attribute, got {expr}");
        };
        assert_eq!(a.id, id);
    }
}

#[test]
fn qualified_star_restricts_to_the_alias() {
    let catalog = t_catalog().with_table(
        "u",
        TableSchema::new(vec![StructField::new("k", DataType::Int32, false)]),
    );
    let join = LogicalPlan::Join {
        left: Arc::new(scan_as("t", "l")),
        right: Arc::new(scan_as("u", "r")),
        join_type: JoinType::Inner,
        condition: None,
    };
    let plan = join.project(vec![Expr::Star {
        qualifier: Some("r".to_string()),
    }]);
    let analyzed = analyzer(catalog).analyze(plan).expect("analyze");
    let out = analyzed.output();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].name, "k");
}

#[test]
fn comparison_operands_are_widened_with_casts() {
    use quarry_planner::BinaryOp;
    let plan = scan("t").filter(Expr::binary(
        Expr::col("a"),
        BinaryOp::Gt,
        Expr::lit(Value::Int64(1)),
    ));
    let analyzed = analyzer(t_catalog()).analyze(plan).expect("analyze");
    let LogicalPlan::Filter { predicate, .. } = &analyzed else {
        panic!("expected filter");
    };
    let Expr::Binary { left, right, .. } = predicate else {
        panic!("expected binary, got {predicate}");
    };
    assert_eq!(left.data_type().unwrap(), DataType::Int64);
    assert!(matches!(left.as_ref(), Expr::Cast { .. }));
    assert!(matches!(right.as_ref(), Expr::Literal { .. }));
}

#[test]
fn comparing_unrelated_types_fails() {
    use quarry_planner::BinaryOp;
    let plan = scan("t").filter(Expr::binary(
        Expr::col("a"),
        BinaryOp::Eq,
        Expr::col("name"),
    ));
    let err = analyzer(t_catalog()).analyze(plan).unwrap_err();
    assert!(matches!(err, QuarryError::IncompatibleTypes { .. }));
}

#[test]
fn builtin_aggregate_names_resolve() {
    let agg = LogicalPlan::Aggregate {
        group_exprs: vec![],
        aggregate_exprs: vec![Expr::UnresolvedFunction {
            name: "count".to_string(),
            args: vec![Arc::new(Expr::col("a"))],
        }
        .alias("n")],
        child: Arc::new(scan("t")),
    };
    let analyzed = analyzer(t_catalog()).analyze(agg).expect("analyze");
    let LogicalPlan::Aggregate {
        aggregate_exprs, ..
    } = &analyzed
    else {
        panic!("expected aggregate");
    };
    let Expr::Alias { child, .. } = &aggregate_exprs[0] else {
        panic!("expected alias");
    };
    assert!(matches!(
        child.as_ref(),
        Expr::Aggregate {
            func: AggregateFunction::Count,
            ..
        }
    ));
}

#[test]
fn unknown_function_fails() {
    let plan = scan("t").project(vec![Expr::UnresolvedFunction {
        name: "no_such_function_anywhere".to_string(),
        args: vec![Arc::new(Expr::col("a"))],
    }]);
    let err = analyzer(t_catalog()).analyze(plan).unwrap_err();
    assert!(
        matches!(err, QuarryError::FunctionNotFound(name) if name == "no_such_function_anywhere")
    );
}

#[test]
fn grouping_columns_in_aggregate_outputs_bind_to_the_grouping_tuple() {
    let agg = LogicalPlan::Aggregate {
        group_exprs: vec![Expr::col("name")],
        aggregate_exprs: vec![
            Expr::col("name"),
            Expr::UnresolvedFunction {
                name: "sum".to_string(),
                args: vec![Arc::new(Expr::col("a"))],
            }
            .alias("total"),
        ],
        child: Arc::new(scan("t")),
    };
    let analyzed = analyzer(t_catalog()).analyze(agg).expect("analyze");
    let LogicalPlan::Aggregate {
        aggregate_exprs, ..
    } = &analyzed
    else {
        panic!("expected aggregate");
    };
    // The grouping column keeps its name and id but reads tuple 0 slot 0.
    let Expr::Alias { child, name, .. } = &aggregate_exprs[0] else {
        panic!("expected alias, got {}", aggregate_exprs[0]);
    };
    assert_eq!(name, "name");
    assert!(matches!(
        child.as_ref(),
        Expr::BoundReference {
            tuple: 0,
            field: 0,
            ..
        }
    ));
}

#[test]
fn non_grouping_reference_fails() {
    let agg = LogicalPlan::Aggregate {
        group_exprs: vec![Expr::col("name")],
        aggregate_exprs: vec![Expr::col("a")],
        child: Arc::new(scan("t")),
    };
    let err = analyzer(t_catalog()).analyze(agg).unwrap_err();
    assert!(matches!(err, QuarryError::NonGroupingReference { .. }));
}

#[test]
fn analyzed_output_ids_are_duplicate_free() {
    let plan = scan("t").project(vec![
        Expr::Star { qualifier: None },
        Expr::lit(Value::Int32(1)).alias("one"),
    ]);
    let analyzed = analyzer(t_catalog()).analyze(plan).expect("analyze");
    let out = analyzed.output();
    let mut ids: Vec<_> = out.iter().map(|a| a.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), out.len());
}

#[test]
fn analysis_is_stable_up_to_id_shift() {
    // Two runs mint different ids; normalizing by the minimum id must yield
    // the same shape.
    let plan = || scan("t").project(vec![Expr::col("a"), Expr::col("b")]);
    let a = analyzer(t_catalog()).analyze(plan()).expect("analyze");
    let b = analyzer(t_catalog()).analyze(plan()).expect("analyze");
    let normalize = |p: &LogicalPlan| {
        let ids: Vec<u64> = p.output().iter().map(|a| a.id.0).collect();
        let min = ids.iter().copied().min().unwrap();
        ids.into_iter().map(|i| i - min).collect::<Vec<_>>()
    };
    assert_eq!(normalize(&a), normalize(&b));
}
