//! Human-readable multiline tree rendering for logical and physical plans.
//!
//! The rendered form is also what error variants attach as the offending
//! plan fragment.

use std::fmt;

use itertools::Itertools;

use crate::expr::AttributeRef;
use crate::logical_plan::LogicalPlan;
use crate::physical_plan::{AggregateMode, Partitioning, PhysicalPlan};

/// Render a logical plan as indented multiline text.
pub fn explain_logical(plan: &LogicalPlan) -> String {
    let mut out = String::new();
    fmt_logical(plan, 0, &mut out);
    out
}

/// Render a physical plan as indented multiline text.
pub fn explain_physical(plan: &PhysicalPlan) -> String {
    let mut out = String::new();
    fmt_physical(plan, 0, &mut out);
    out
}

fn attrs(list: &[AttributeRef]) -> String {
    list.iter().map(|a| a.to_string()).join(", ")
}

fn fmt_logical(plan: &LogicalPlan, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match plan {
        LogicalPlan::UnresolvedRelation { name, alias } => {
            out.push_str(&format!("{pad}UnresolvedRelation {name}"));
            if let Some(alias) = alias {
                out.push_str(&format!(" as {alias}"));
            }
            out.push('\n');
        }
        LogicalPlan::Relation {
            name,
            attributes,
            partition_cols,
        } => {
            out.push_str(&format!("{pad}Relation {name} [{}]", attrs(attributes)));
            if !partition_cols.is_empty() {
                out.push_str(&format!(" partitioned_by=[{}]", partition_cols.join(", ")));
            }
            out.push('\n');
        }
        LogicalPlan::LocalRelation { attributes, rows } => {
            out.push_str(&format!(
                "{pad}LocalRelation [{}] rows={}\n",
                attrs(attributes),
                rows.len()
            ));
        }
        LogicalPlan::NoRelation => out.push_str(&format!("{pad}NoRelation\n")),
        LogicalPlan::Subquery { alias, child } => {
            out.push_str(&format!("{pad}Subquery {alias}\n"));
            fmt_logical(child, indent + 1, out);
        }
        LogicalPlan::Project { exprs, child } => {
            out.push_str(&format!(
                "{pad}Project [{}]\n",
                exprs.iter().map(|e| e.to_string()).join(", ")
            ));
            fmt_logical(child, indent + 1, out);
        }
        LogicalPlan::Filter { predicate, child } => {
            out.push_str(&format!("{pad}Filter {predicate}\n"));
            fmt_logical(child, indent + 1, out);
        }
        LogicalPlan::Join {
            left,
            right,
            join_type,
            condition,
        } => {
            out.push_str(&format!("{pad}Join {join_type}"));
            if let Some(condition) = condition {
                out.push_str(&format!(" on {condition}"));
            }
            out.push('\n');
            fmt_logical(left, indent + 1, out);
            fmt_logical(right, indent + 1, out);
        }
        LogicalPlan::Aggregate {
            group_exprs,
            aggregate_exprs,
            child,
        } => {
            out.push_str(&format!(
                "{pad}Aggregate group=[{}] output=[{}]\n",
                group_exprs.iter().map(|e| e.to_string()).join(", "),
                aggregate_exprs.iter().map(|e| e.to_string()).join(", ")
            ));
            fmt_logical(child, indent + 1, out);
        }
        LogicalPlan::Sort {
            orders,
            global,
            child,
        } => {
            out.push_str(&format!(
                "{pad}Sort [{}] global={global}\n",
                orders.iter().map(|o| o.to_string()).join(", ")
            ));
            fmt_logical(child, indent + 1, out);
        }
        LogicalPlan::Limit { n, child } => {
            out.push_str(&format!("{pad}Limit {n}\n"));
            fmt_logical(child, indent + 1, out);
        }
        LogicalPlan::Union { children } => {
            out.push_str(&format!("{pad}Union\n"));
            for child in children {
                fmt_logical(child, indent + 1, out);
            }
        }
        LogicalPlan::Distinct { child } => {
            out.push_str(&format!("{pad}Distinct\n"));
            fmt_logical(child, indent + 1, out);
        }
        LogicalPlan::Generate {
            generator,
            join,
            outer,
            generator_output,
            child,
        } => {
            out.push_str(&format!(
                "{pad}Generate {generator} join={join} outer={outer} output=[{}]\n",
                attrs(generator_output)
            ));
            fmt_logical(child, indent + 1, out);
        }
        LogicalPlan::InsertInto {
            table,
            partition_spec,
            child,
        } => {
            out.push_str(&format!("{pad}InsertInto {table}"));
            if !partition_spec.is_empty() {
                let spec = partition_spec
                    .iter()
                    .map(|(k, v)| match v {
                        Some(v) => format!("{k}={v}"),
                        None => k.clone(),
                    })
                    .join(", ");
                out.push_str(&format!(" partition=[{spec}]"));
            }
            out.push('\n');
            fmt_logical(child, indent + 1, out);
        }
    }
}

fn fmt_physical(plan: &PhysicalPlan, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match plan {
        PhysicalPlan::Scan(x) => {
            out.push_str(&format!("{pad}Scan {} [{}]", x.table, attrs(&x.attributes)));
            if !x.pruning_filters.is_empty() {
                out.push_str(&format!(
                    " pruning=[{}]",
                    x.pruning_filters.iter().map(|e| e.to_string()).join(", ")
                ));
            }
            out.push('\n');
        }
        PhysicalPlan::LocalScan(x) => {
            out.push_str(&format!(
                "{pad}LocalScan [{}] rows={}\n",
                attrs(&x.attributes),
                x.rows.len()
            ));
        }
        PhysicalPlan::OneRow => out.push_str(&format!("{pad}OneRow\n")),
        PhysicalPlan::Filter(x) => {
            out.push_str(&format!("{pad}Filter {}\n", x.predicate));
            fmt_physical(&x.input, indent + 1, out);
        }
        PhysicalPlan::Project(x) => {
            out.push_str(&format!(
                "{pad}Project [{}]\n",
                x.exprs.iter().map(|e| e.to_string()).join(", ")
            ));
            fmt_physical(&x.input, indent + 1, out);
        }
        PhysicalPlan::HashAggregate(x) => {
            let mode = match x.mode {
                AggregateMode::Partial => "partial",
                AggregateMode::Final => "final",
                AggregateMode::Complete => "complete",
            };
            out.push_str(&format!(
                "{pad}HashAggregate mode={mode} group=[{}] output=[{}]\n",
                x.group_exprs.iter().map(|e| e.to_string()).join(", "),
                x.aggregate_exprs.iter().map(|e| e.to_string()).join(", ")
            ));
            fmt_physical(&x.input, indent + 1, out);
        }
        PhysicalPlan::HashEquiJoin(x) => {
            out.push_str(&format!(
                "{pad}HashEquiJoin {} left_keys=[{}] right_keys=[{}]\n",
                x.join_type,
                x.left_keys.iter().map(|e| e.to_string()).join(", "),
                x.right_keys.iter().map(|e| e.to_string()).join(", ")
            ));
            fmt_physical(&x.left, indent + 1, out);
            fmt_physical(&x.right, indent + 1, out);
        }
        PhysicalPlan::BroadcastNestedLoopJoin(x) => {
            out.push_str(&format!("{pad}BroadcastNestedLoopJoin {}", x.join_type));
            if let Some(condition) = &x.condition {
                out.push_str(&format!(" on {condition}"));
            }
            out.push('\n');
            fmt_physical(&x.left, indent + 1, out);
            fmt_physical(&x.right, indent + 1, out);
        }
        PhysicalPlan::CartesianProduct(x) => {
            out.push_str(&format!("{pad}CartesianProduct\n"));
            fmt_physical(&x.left, indent + 1, out);
            fmt_physical(&x.right, indent + 1, out);
        }
        PhysicalPlan::Sort(x) => {
            out.push_str(&format!(
                "{pad}Sort [{}] global={}\n",
                x.orders.iter().map(|o| o.to_string()).join(", "),
                x.global
            ));
            fmt_physical(&x.input, indent + 1, out);
        }
        PhysicalPlan::Limit(x) => {
            out.push_str(&format!("{pad}Limit {}\n", x.n));
            fmt_physical(&x.input, indent + 1, out);
        }
        PhysicalPlan::Union(x) => {
            out.push_str(&format!("{pad}Union\n"));
            for child in &x.children {
                fmt_physical(child, indent + 1, out);
            }
        }
        PhysicalPlan::Generate(x) => {
            out.push_str(&format!(
                "{pad}Generate {} join={} outer={} output=[{}]\n",
                x.generator,
                x.join,
                x.outer,
                attrs(&x.generator_output)
            ));
            fmt_physical(&x.input, indent + 1, out);
        }
        PhysicalPlan::Exchange(x) => {
            let spec = match &x.partitioning {
                Partitioning::Unknown => "unknown".to_string(),
                Partitioning::Single => "single".to_string(),
                Partitioning::Hash { exprs, partitions } => format!(
                    "hash([{}], {partitions})",
                    exprs.iter().map(|e| e.to_string()).join(", ")
                ),
            };
            out.push_str(&format!("{pad}Exchange {spec}\n"));
            fmt_physical(&x.input, indent + 1, out);
        }
        PhysicalPlan::Insert(x) => {
            out.push_str(&format!("{pad}Insert {}\n", x.table));
            fmt_physical(&x.input, indent + 1, out);
        }
        PhysicalPlan::PlanLater(logical) => {
            out.push_str(&format!("{pad}PlanLater\n"));
            fmt_logical(logical, indent + 1, out);
        }
    }
}

impl fmt::Display for LogicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(explain_logical(self).trim_end())
    }
}

impl fmt::Display for PhysicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(explain_physical(self).trim_end())
    }
}
