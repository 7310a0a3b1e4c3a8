use std::sync::Arc;

use quarry_common::Result;
use quarry_execution::{run, ExecContext, MemTable, MemoryCatalog};
use quarry_planner::{
    register_scalar_function, register_table_function, AggregateFunction, BinaryOp, DataType,
    Expr, Generator, JoinType, LogicalPlan, Row, ScalarFunction, SortOrder, StructField,
    TableFunction, Value,
};

fn ctx() -> ExecContext {
    ExecContext::new(Arc::new(MemoryCatalog::new()))
}

fn scan(name: &str) -> LogicalPlan {
    LogicalPlan::UnresolvedRelation {
        name: name.to_string(),
        alias: None,
    }
}

fn utf8(s: &str) -> Value {
    Value::Utf8(s.to_string())
}

fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort();
    rows
}

#[test]
fn count_over_an_empty_relation_is_a_single_zero_row() {
    let ctx = ctx();
    ctx.catalog.register_table(
        "t",
        MemTable::with_rows(
            vec![StructField::new("a", DataType::Int32, true)],
            vec![],
            2,
        ),
    );
    let plan = LogicalPlan::Aggregate {
        group_exprs: vec![],
        aggregate_exprs: vec![
            Expr::aggregate(AggregateFunction::Count, Expr::col("a")).alias("n")
        ],
        child: Arc::new(scan("t")),
    };
    let rows = run(&plan, &ctx).expect("run");
    assert_eq!(rows, vec![vec![Value::Int64(0)]]);
}

struct Bio;

impl TableFunction for Bio {
    fn name(&self) -> &str {
        "bio"
    }

    fn output_fields(&self, _arg_types: &[DataType]) -> Result<Vec<StructField>> {
        Ok(vec![StructField::new("line", DataType::Utf8, false)])
    }

    fn invoke(&self, args: &[Value]) -> Result<Vec<Row>> {
        let (Value::Utf8(name), Some(age)) = (&args[0], args[1].as_i64()?) else {
            return Ok(vec![]);
        };
        Ok(vec![
            vec![Value::Utf8(format!("{name} is {age} years old"))],
            vec![Value::Utf8(format!(
                "Next year, {name} will be {} years old",
                age + 1
            ))],
        ])
    }
}

#[test]
fn table_functions_emit_their_rows_per_input_row() {
    register_table_function(Arc::new(Bio));
    let ctx = ctx();
    ctx.catalog.register_table(
        "people",
        MemTable::with_rows(
            vec![
                StructField::new("name", DataType::Utf8, false),
                StructField::new("age", DataType::Int32, false),
            ],
            vec![vec![utf8("michael"), Value::Int32(29)]],
            1,
        ),
    );
    let plan = LogicalPlan::Generate {
        generator: Generator::TableUdf {
            name: "bio".to_string(),
            args: vec![Arc::new(Expr::col("name")), Arc::new(Expr::col("age"))],
            fields: None,
        },
        join: false,
        outer: false,
        generator_output: vec![],
        child: Arc::new(scan("people")),
    };
    let rows = run(&plan, &ctx).expect("run");
    assert_eq!(
        rows,
        vec![
            vec![utf8("michael is 29 years old")],
            vec![utf8("Next year, michael will be 30 years old")],
        ]
    );
}

#[test]
fn null_comparisons_drop_rows_but_null_tests_keep_them() {
    let ctx = ctx();
    ctx.catalog.register_table(
        "r",
        MemTable::with_rows(
            vec![
                StructField::new("a", DataType::Int32, true),
                StructField::new("b", DataType::Int32, true),
            ],
            vec![vec![Value::Null, Value::Int32(2)]],
            1,
        ),
    );

    let dropped = scan("r").filter(Expr::and(
        Expr::binary(Expr::col("a"), BinaryOp::Gt, Expr::lit(Value::Int32(1))),
        Expr::binary(Expr::col("b"), BinaryOp::Gt, Expr::lit(Value::Int32(1))),
    ));
    assert!(run(&dropped, &ctx).expect("run").is_empty());

    let kept = scan("r").filter(Expr::IsNull(Arc::new(Expr::col("a"))));
    assert_eq!(
        run(&kept, &ctx).expect("run"),
        vec![vec![Value::Null, Value::Int32(2)]]
    );
}

fn join_tables(ctx: &ExecContext) {
    ctx.catalog.register_table(
        "l",
        MemTable::with_rows(
            vec![
                StructField::new("k", DataType::Int32, false),
                StructField::new("v", DataType::Int32, false),
            ],
            vec![
                vec![Value::Int32(1), Value::Int32(10)],
                vec![Value::Int32(2), Value::Int32(20)],
                vec![Value::Int32(3), Value::Int32(30)],
            ],
            2,
        ),
    );
    ctx.catalog.register_table(
        "r",
        MemTable::with_rows(
            vec![
                StructField::new("rk", DataType::Int32, false),
                StructField::new("rv", DataType::Int32, false),
            ],
            vec![
                vec![Value::Int32(1), Value::Int32(5)],
                vec![Value::Int32(2), Value::Int32(25)],
                vec![Value::Int32(4), Value::Int32(40)],
            ],
            2,
        ),
    );
}

#[test]
fn equi_join_applies_the_residual_predicate() {
    let ctx = ctx();
    join_tables(&ctx);
    let join = LogicalPlan::Join {
        left: Arc::new(scan("l")),
        right: Arc::new(scan("r")),
        join_type: JoinType::Inner,
        condition: Some(Expr::and(
            Expr::binary(Expr::col("k"), BinaryOp::Eq, Expr::col("rk")),
            Expr::binary(Expr::col("v"), BinaryOp::Gt, Expr::col("rv")),
        )),
    };
    let rows = run(&join, &ctx).expect("run");
    assert_eq!(
        rows,
        vec![vec![
            Value::Int32(1),
            Value::Int32(10),
            Value::Int32(1),
            Value::Int32(5)
        ]]
    );
}

#[test]
fn left_outer_join_pads_unmatched_rows_with_nulls() {
    let ctx = ctx();
    join_tables(&ctx);
    let join = LogicalPlan::Join {
        left: Arc::new(scan("l")),
        right: Arc::new(scan("r")),
        join_type: JoinType::LeftOuter,
        condition: Some(Expr::binary(
            Expr::col("k"),
            BinaryOp::Eq,
            Expr::col("rk"),
        )),
    };
    let rows = sorted(run(&join, &ctx).expect("run"));
    assert_eq!(
        rows,
        vec![
            vec![
                Value::Int32(1),
                Value::Int32(10),
                Value::Int32(1),
                Value::Int32(5)
            ],
            vec![
                Value::Int32(2),
                Value::Int32(20),
                Value::Int32(2),
                Value::Int32(25)
            ],
            vec![Value::Int32(3), Value::Int32(30), Value::Null, Value::Null],
        ]
    );
}

#[test]
fn full_outer_nested_loop_join_emits_each_unmatched_tuple_once() {
    let ctx = ctx();
    ctx.catalog.register_table(
        "small_l",
        MemTable::with_rows(
            vec![StructField::new("v", DataType::Int32, false)],
            vec![vec![Value::Int32(1)]],
            1,
        ),
    );
    ctx.catalog.register_table(
        "small_r",
        MemTable::with_rows(
            vec![StructField::new("w", DataType::Int32, false)],
            vec![vec![Value::Int32(5)]],
            1,
        ),
    );
    let join = LogicalPlan::Join {
        left: Arc::new(scan("small_l")),
        right: Arc::new(scan("small_r")),
        join_type: JoinType::FullOuter,
        condition: Some(Expr::binary(
            Expr::col("v"),
            BinaryOp::Gt,
            Expr::col("w"),
        )),
    };
    let rows = sorted(run(&join, &ctx).expect("run"));
    assert_eq!(
        rows,
        vec![
            vec![Value::Null, Value::Int32(5)],
            vec![Value::Int32(1), Value::Null],
        ]
    );
}

#[test]
fn grouped_aggregation_counts_per_key() {
    let ctx = ctx();
    ctx.catalog.register_table(
        "sales",
        MemTable::with_rows(
            vec![
                StructField::new("region", DataType::Utf8, false),
                StructField::new("amount", DataType::Int32, true),
            ],
            vec![
                vec![utf8("eu"), Value::Int32(10)],
                vec![utf8("us"), Value::Int32(7)],
                vec![utf8("eu"), Value::Int32(5)],
                vec![utf8("eu"), Value::Null],
            ],
            2,
        ),
    );
    let plan = LogicalPlan::Aggregate {
        group_exprs: vec![Expr::col("region")],
        aggregate_exprs: vec![
            Expr::col("region"),
            Expr::aggregate(AggregateFunction::Count, Expr::col("amount")).alias("n"),
            Expr::aggregate(AggregateFunction::Sum, Expr::col("amount")).alias("total"),
        ],
        child: Arc::new(scan("sales")),
    };
    let rows = sorted(run(&plan, &ctx).expect("run"));
    assert_eq!(
        rows,
        vec![
            vec![utf8("eu"), Value::Int64(2), Value::Int32(15)],
            vec![utf8("us"), Value::Int64(1), Value::Int32(7)],
        ]
    );
}

#[test]
fn average_ignores_nulls_and_is_null_over_empty_input() {
    let ctx = ctx();
    ctx.catalog.register_table(
        "vals",
        MemTable::with_rows(
            vec![StructField::new("v", DataType::Int32, true)],
            vec![
                vec![Value::Int32(1)],
                vec![Value::Int32(2)],
                vec![Value::Int32(3)],
                vec![Value::Null],
            ],
            2,
        ),
    );
    ctx.catalog.register_table(
        "empty_vals",
        MemTable::with_rows(vec![StructField::new("v", DataType::Int32, true)], vec![], 1),
    );

    let avg = |table: &str| LogicalPlan::Aggregate {
        group_exprs: vec![],
        aggregate_exprs: vec![
            Expr::aggregate(AggregateFunction::Average, Expr::col("v")).alias("m"),
            Expr::aggregate(AggregateFunction::Sum, Expr::col("v")).alias("s"),
        ],
        child: Arc::new(scan(table)),
    };
    assert_eq!(
        run(&avg("vals"), &ctx).expect("run"),
        vec![vec![Value::Float64(2.0.into()), Value::Int32(6)]]
    );
    assert_eq!(
        run(&avg("empty_vals"), &ctx).expect("run"),
        vec![vec![Value::Null, Value::Null]]
    );
}

#[test]
fn count_distinct_runs_single_phase() {
    let ctx = ctx();
    ctx.catalog.register_table(
        "dups",
        MemTable::with_rows(
            vec![StructField::new("v", DataType::Int32, true)],
            vec![
                vec![Value::Int32(1)],
                vec![Value::Int32(1)],
                vec![Value::Int32(2)],
                vec![Value::Null],
            ],
            2,
        ),
    );
    let plan = LogicalPlan::Aggregate {
        group_exprs: vec![],
        aggregate_exprs: vec![
            Expr::aggregate(AggregateFunction::CountDistinct, Expr::col("v")).alias("n")
        ],
        child: Arc::new(scan("dups")),
    };
    assert_eq!(run(&plan, &ctx).expect("run"), vec![vec![Value::Int64(2)]]);
}

#[test]
fn distinct_removes_duplicate_rows() {
    let ctx = ctx();
    ctx.catalog.register_table(
        "d",
        MemTable::with_rows(
            vec![StructField::new("v", DataType::Int32, false)],
            vec![
                vec![Value::Int32(2)],
                vec![Value::Int32(1)],
                vec![Value::Int32(2)],
            ],
            2,
        ),
    );
    let plan = LogicalPlan::Distinct {
        child: Arc::new(scan("d")),
    };
    let rows = sorted(run(&plan, &ctx).expect("run"));
    assert_eq!(rows, vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]);
}

#[test]
fn explode_flattens_list_cells() {
    let ctx = ctx();
    let tags = quarry_planner::AttributeRef::new(
        "tags",
        DataType::List {
            element: Box::new(DataType::Utf8),
            element_nullable: false,
        },
        false,
    );
    let local = LogicalPlan::LocalRelation {
        attributes: vec![tags],
        rows: vec![
            vec![Value::List(vec![utf8("a"), utf8("b")])],
            vec![Value::List(vec![])],
        ],
    };
    let plan = LogicalPlan::Generate {
        generator: Generator::Explode(Arc::new(Expr::col("tags"))),
        join: false,
        outer: false,
        generator_output: vec![],
        child: Arc::new(local),
    };
    let rows = run(&plan, &ctx).expect("run");
    assert_eq!(rows, vec![vec![utf8("a")], vec![utf8("b")]]);
}

#[test]
fn outer_generate_keeps_rows_with_empty_expansions() {
    let ctx = ctx();
    let tags = quarry_planner::AttributeRef::new(
        "tags",
        DataType::List {
            element: Box::new(DataType::Utf8),
            element_nullable: false,
        },
        false,
    );
    let local = LogicalPlan::LocalRelation {
        attributes: vec![tags],
        rows: vec![vec![Value::List(vec![])]],
    };
    let plan = LogicalPlan::Generate {
        generator: Generator::Explode(Arc::new(Expr::col("tags"))),
        join: true,
        outer: true,
        generator_output: vec![],
        child: Arc::new(local),
    };
    let rows = run(&plan, &ctx).expect("run");
    assert_eq!(rows, vec![vec![Value::List(vec![]), Value::Null]]);
}

#[test]
fn sort_and_limit_apply_a_total_order() {
    let ctx = ctx();
    ctx.catalog.register_table(
        "nums",
        MemTable::with_rows(
            vec![StructField::new("v", DataType::Int32, false)],
            (1..=6).map(|i| vec![Value::Int32(i)]).collect(),
            3,
        ),
    );
    let plan = LogicalPlan::Limit {
        n: 2,
        child: Arc::new(LogicalPlan::Sort {
            orders: vec![SortOrder::desc(Expr::col("v"))],
            global: true,
            child: Arc::new(scan("nums")),
        }),
    };
    let rows = run(&plan, &ctx).expect("run");
    assert_eq!(rows, vec![vec![Value::Int32(6)], vec![Value::Int32(5)]]);
}

#[test]
fn union_concatenates_inputs() {
    let ctx = ctx();
    let local = |v: i32| {
        Arc::new(LogicalPlan::LocalRelation {
            attributes: vec![quarry_planner::AttributeRef::new(
                "v",
                DataType::Int32,
                false,
            )],
            rows: vec![vec![Value::Int32(v)]],
        })
    };
    let plan = LogicalPlan::Union {
        children: vec![local(1), local(2)],
    };
    let rows = sorted(run(&plan, &ctx).expect("run"));
    assert_eq!(rows, vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]);
}

#[test]
fn insert_appends_rows_visible_to_later_scans() {
    let ctx = ctx();
    ctx.catalog.register_table(
        "dst",
        MemTable::new(vec![StructField::new("a", DataType::Int32, false)], vec![]),
    );
    let source = LogicalPlan::LocalRelation {
        attributes: vec![quarry_planner::AttributeRef::new(
            "a",
            DataType::Int32,
            false,
        )],
        rows: vec![vec![Value::Int32(1)], vec![Value::Int32(2)]],
    };
    let insert = LogicalPlan::InsertInto {
        table: "dst".to_string(),
        partition_spec: vec![],
        child: Arc::new(source),
    };
    assert!(run(&insert, &ctx).expect("run").is_empty());
    let rows = sorted(run(&scan("dst"), &ctx).expect("run"));
    assert_eq!(rows, vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]);
}

#[test]
fn partition_key_filters_prune_partitions() {
    let ctx = ctx();
    let table = MemTable::new(
        vec![
            StructField::new("region", DataType::Utf8, false),
            StructField::new("v", DataType::Int32, false),
        ],
        vec!["region".to_string()],
    );
    table
        .append(
            vec![utf8("eu")],
            vec![
                vec![utf8("eu"), Value::Int32(1)],
                vec![utf8("eu"), Value::Int32(2)],
            ],
        )
        .expect("append");
    table
        .append(vec![utf8("us")], vec![vec![utf8("us"), Value::Int32(9)]])
        .expect("append");
    ctx.catalog.register_table("events", table);

    let plan = scan("events").filter(Expr::binary(
        Expr::col("region"),
        BinaryOp::Eq,
        Expr::lit(utf8("eu")),
    ));
    let rows = sorted(run(&plan, &ctx).expect("run"));
    assert_eq!(
        rows,
        vec![
            vec![utf8("eu"), Value::Int32(1)],
            vec![utf8("eu"), Value::Int32(2)],
        ]
    );
}

struct Upper;

impl ScalarFunction for Upper {
    fn name(&self) -> &str {
        "upper"
    }

    fn return_type(&self, _arg_types: &[DataType]) -> Result<DataType> {
        Ok(DataType::Utf8)
    }

    fn invoke(&self, args: &[Value]) -> Result<Value> {
        match &args[0] {
            Value::Utf8(s) => Ok(Value::Utf8(s.to_uppercase())),
            other => Ok(other.clone()),
        }
    }
}

#[test]
fn scalar_functions_resolve_and_evaluate() {
    register_scalar_function(Arc::new(Upper));
    let ctx = ctx();
    ctx.catalog.register_table(
        "names",
        MemTable::with_rows(
            vec![StructField::new("name", DataType::Utf8, true)],
            vec![vec![utf8("ada")], vec![Value::Null]],
            1,
        ),
    );
    let plan = scan("names").project(vec![Expr::UnresolvedFunction {
        name: "upper".to_string(),
        args: vec![Arc::new(Expr::col("name"))],
    }
    .alias("u")]);
    let rows = run(&plan, &ctx).expect("run");
    // Strict functions are never invoked on nulls.
    assert_eq!(rows, vec![vec![utf8("ADA")], vec![Value::Null]]);
}
