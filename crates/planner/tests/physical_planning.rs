use std::sync::Arc;

use quarry_planner::{
    AggregateFunction, AggregateMode, AttributeRef, BinaryOp, DataType, Expr, JoinType,
    LogicalPlan, Partitioning, PhysicalPlan, QueryPlanner, Value,
};

fn attr(name: &str, data_type: DataType) -> AttributeRef {
    AttributeRef::new(name, data_type, false)
}

fn relation(name: &str, attrs: &[AttributeRef]) -> LogicalPlan {
    LogicalPlan::Relation {
        name: name.to_string(),
        attributes: attrs.to_vec(),
        partition_cols: vec![],
    }
}

fn plan(logical: &LogicalPlan) -> PhysicalPlan {
    QueryPlanner::default().plan_query(logical).expect("plan")
}

#[test]
fn equi_join_extracts_keys_and_keeps_the_residual_filter() {
    let lk = attr("k", DataType::Int32);
    let lv = attr("v", DataType::Int32);
    let rk = attr("k", DataType::Int32);
    let rv = attr("v", DataType::Int32);
    let condition = Expr::and(
        Expr::binary(
            Expr::Attribute(lk.clone()),
            BinaryOp::Eq,
            Expr::Attribute(rk.clone()),
        ),
        Expr::binary(
            Expr::Attribute(lv.clone()),
            BinaryOp::Gt,
            Expr::Attribute(rv.clone()),
        ),
    );
    let join = LogicalPlan::Join {
        left: Arc::new(relation("l", &[lk.clone(), lv])),
        right: Arc::new(relation("r", &[rk.clone(), rv])),
        join_type: JoinType::Inner,
        condition: Some(condition),
    };

    let physical = plan(&join);
    let PhysicalPlan::Filter(filter) = &physical else {
        panic!("expected residual filter on top, got:\n{physical}");
    };
    let PhysicalPlan::HashEquiJoin(join) = filter.input.as_ref() else {
        panic!("expected hash equi-join, got:\n{}", filter.input);
    };
    assert_eq!(join.left_keys, vec![Expr::Attribute(lk)]);
    assert_eq!(join.right_keys, vec![Expr::Attribute(rk)]);
    // Both sides are redistributed on their keys.
    assert!(matches!(join.left.as_ref(), PhysicalPlan::Exchange(e)
        if matches!(e.partitioning, Partitioning::Hash { .. })));
    assert!(matches!(join.right.as_ref(), PhysicalPlan::Exchange(e)
        if matches!(e.partitioning, Partitioning::Hash { .. })));
}

#[test]
fn join_without_equi_predicate_uses_nested_loops() {
    let lv = attr("v", DataType::Int32);
    let rv = attr("w", DataType::Int32);
    let join = LogicalPlan::Join {
        left: Arc::new(relation("l", &[lv.clone()])),
        right: Arc::new(relation("r", &[rv.clone()])),
        join_type: JoinType::Inner,
        condition: Some(Expr::binary(
            Expr::Attribute(lv),
            BinaryOp::Gt,
            Expr::Attribute(rv),
        )),
    };
    assert!(matches!(
        plan(&join),
        PhysicalPlan::BroadcastNestedLoopJoin(_)
    ));
}

#[test]
fn join_without_condition_is_a_cartesian_product() {
    let join = LogicalPlan::Join {
        left: Arc::new(relation("l", &[attr("a", DataType::Int32)])),
        right: Arc::new(relation("r", &[attr("b", DataType::Int32)])),
        join_type: JoinType::Inner,
        condition: None,
    };
    assert!(matches!(plan(&join), PhysicalPlan::CartesianProduct(_)));
}

#[test]
fn outer_join_without_condition_still_pads_unmatched_rows() {
    let join = LogicalPlan::Join {
        left: Arc::new(relation("l", &[attr("a", DataType::Int32)])),
        right: Arc::new(relation("r", &[attr("b", DataType::Int32)])),
        join_type: JoinType::LeftOuter,
        condition: None,
    };
    assert!(matches!(
        plan(&join),
        PhysicalPlan::BroadcastNestedLoopJoin(_)
    ));
}

fn count_aggregate(group: Vec<Expr>, arg: AttributeRef, distinct: bool) -> LogicalPlan {
    let func = if distinct {
        AggregateFunction::CountDistinct
    } else {
        AggregateFunction::Count
    };
    LogicalPlan::Aggregate {
        group_exprs: group,
        aggregate_exprs: vec![
            Expr::aggregate(func, Expr::Attribute(arg.clone())).alias("n")
        ],
        child: Arc::new(relation("t", &[attr("g", DataType::Utf8), arg])),
    }
}

#[test]
fn decomposable_aggregates_plan_as_two_levels() {
    let g = attr("g", DataType::Utf8);
    let v = attr("v", DataType::Int64);
    let agg = LogicalPlan::Aggregate {
        group_exprs: vec![Expr::Attribute(g.clone())],
        aggregate_exprs: vec![
            Expr::aggregate(AggregateFunction::Count, Expr::Attribute(v.clone())).alias("n")
        ],
        child: Arc::new(relation("t", &[g, v])),
    };
    let physical = plan(&agg);
    let PhysicalPlan::HashAggregate(top) = &physical else {
        panic!("expected final aggregate, got:\n{physical}");
    };
    assert_eq!(top.mode, AggregateMode::Final);
    let PhysicalPlan::Exchange(exchange) = top.input.as_ref() else {
        panic!("expected exchange below final aggregate, got:\n{}", top.input);
    };
    assert!(matches!(
        exchange.partitioning,
        Partitioning::Hash { .. }
    ));
    let PhysicalPlan::HashAggregate(partial) = exchange.input.as_ref() else {
        panic!("expected partial aggregate, got:\n{}", exchange.input);
    };
    assert_eq!(partial.mode, AggregateMode::Partial);
}

#[test]
fn count_distinct_falls_back_to_a_single_aggregate() {
    let v = attr("v", DataType::Int64);
    let agg = count_aggregate(vec![], v, true);
    let physical = plan(&agg);
    let PhysicalPlan::HashAggregate(top) = &physical else {
        panic!("expected aggregate, got:\n{physical}");
    };
    assert_eq!(top.mode, AggregateMode::Complete);
    // No grouping keys: everything must be gathered to one partition.
    assert!(matches!(top.input.as_ref(), PhysicalPlan::Exchange(e)
        if e.partitioning == Partitioning::Single));
}

#[test]
fn global_aggregate_gathers_partials_into_one_partition() {
    let v = attr("v", DataType::Int64);
    let agg = count_aggregate(vec![], v, false);
    let physical = plan(&agg);
    let PhysicalPlan::HashAggregate(top) = &physical else {
        panic!("expected aggregate");
    };
    assert_eq!(top.mode, AggregateMode::Final);
    assert!(matches!(top.input.as_ref(), PhysicalPlan::Exchange(e)
        if e.partitioning == Partitioning::Single));
}

#[test]
fn distinct_plans_as_a_self_grouping_aggregate() {
    let a = attr("a", DataType::Int32);
    let distinct = LogicalPlan::Distinct {
        child: Arc::new(relation("t", &[a.clone()])),
    };
    let physical = plan(&distinct);
    let PhysicalPlan::HashAggregate(agg) = &physical else {
        panic!("expected aggregate, got:\n{physical}");
    };
    assert_eq!(agg.mode, AggregateMode::Complete);
    assert_eq!(agg.group_exprs, vec![Expr::Attribute(a.clone())]);
    let out = physical.output();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, a.id);
}

#[test]
fn simple_projections_narrow_the_scan() {
    let a = attr("a", DataType::Int32);
    let b = attr("b", DataType::Int32);
    let project = relation("t", &[a.clone(), b]).project(vec![Expr::Attribute(a.clone())]);
    let physical = plan(&project);
    let PhysicalPlan::Scan(scan) = &physical else {
        panic!("expected narrowed scan, got:\n{physical}");
    };
    assert_eq!(scan.attributes, vec![a]);
}

#[test]
fn computed_projections_do_not_narrow_the_scan() {
    let a = attr("a", DataType::Int32);
    let project = relation("t", &[a.clone()]).project(vec![Expr::binary(
        Expr::Attribute(a),
        BinaryOp::Plus,
        Expr::lit(Value::Int32(1)),
    )
    .alias("a1")]);
    assert!(matches!(plan(&project), PhysicalPlan::Project(_)));
}

#[test]
fn partition_key_predicates_move_into_the_scan() {
    let region = attr("region", DataType::Utf8);
    let v = attr("v", DataType::Int32);
    let rel = LogicalPlan::Relation {
        name: "t".to_string(),
        attributes: vec![region.clone(), v.clone()],
        partition_cols: vec!["region".to_string()],
    };
    let predicate = Expr::and(
        Expr::binary(
            Expr::Attribute(region),
            BinaryOp::Eq,
            Expr::lit(Value::Utf8("eu".into())),
        ),
        Expr::binary(Expr::Attribute(v), BinaryOp::Gt, Expr::lit(Value::Int32(1))),
    );
    let physical = plan(&rel.filter(predicate));
    let PhysicalPlan::Filter(residual) = &physical else {
        panic!("expected residual filter, got:\n{physical}");
    };
    let PhysicalPlan::Scan(scan) = residual.input.as_ref() else {
        panic!("expected scan, got:\n{}", residual.input);
    };
    assert_eq!(scan.pruning_filters.len(), 1);
    assert!(scan.pruning_filters[0].to_string().contains("region"));
}

#[test]
fn global_sorts_and_limits_gather_their_input() {
    use quarry_planner::SortOrder;
    let a = attr("a", DataType::Int32);
    let sorted = LogicalPlan::Sort {
        orders: vec![SortOrder::asc(Expr::Attribute(a.clone()))],
        global: true,
        child: Arc::new(relation("t", &[a])),
    };
    let physical = plan(&LogicalPlan::Limit {
        n: 3,
        child: Arc::new(sorted),
    });
    let PhysicalPlan::Limit(limit) = &physical else {
        panic!("expected limit, got:\n{physical}");
    };
    let PhysicalPlan::Sort(sort) = limit.input.as_ref() else {
        panic!("expected sort under limit, got:\n{}", limit.input);
    };
    assert!(sort.global);
    assert!(matches!(sort.input.as_ref(), PhysicalPlan::Exchange(e)
        if e.partitioning == Partitioning::Single));
}
