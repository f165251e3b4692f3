//! Human-readable rendering of a resolved path

use std::fmt::Write;

use crate::catalog::Model;
use crate::path::ast::{Operand, Quantifier};
use crate::path::{ColumnTarget, Direction, EntityPath, Link, Predicate};

/// Render `path` as an indented text tree
///
/// ```text
/// t0 "S"."T" [a]
///   filter t0."cat_id" = 10
/// t1 "S"."Cat" JOIN t0 via S:T_cat_fkey (outbound)  <- context
/// ```
pub fn explain(model: &Model, path: &EntityPath) -> String {
    let mut out = String::new();
    for e in path.elements() {
        let _ = write!(out, "{} {}", e.sql_alias(), model.table_sql_name(e.table));
        if let Some(alias) = &e.alias {
            let _ = write!(out, " [{}]", alias);
        }
        if let (Some(link), Some(ctx)) = (&e.link, e.context_pos) {
            let join = e.outer.map(|o| o.sql()).unwrap_or("JOIN");
            let _ = write!(out, " {} t{} via {}", join, ctx, describe_link(model, link));
        }
        if e.pos == path.current() {
            out.push_str("  <- context");
        }
        out.push('\n');
        for f in &e.filters {
            let _ = writeln!(out, "  filter {}", describe_predicate(model, path, f));
        }
    }
    out
}

fn describe_link(model: &Model, link: &Link) -> String {
    match link {
        Link::Edges(edges) => edges
            .iter()
            .map(|edge| {
                let kr = model.keyref(edge.keyref);
                let name = kr
                    .constraint_name()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| format!("keyref {}", edge.keyref.0));
                let dir = match edge.direction {
                    Direction::Outbound => "outbound",
                    Direction::Inbound => "inbound",
                };
                format!("{} ({})", name, dir)
            })
            .collect::<Vec<_>>()
            .join(" or "),
        Link::Explicit(pairs) => {
            let cols = pairs
                .iter()
                .map(|(l, r)| format!("{}={}", model.column(*l).name, model.column(*r).name))
                .collect::<Vec<_>>();
            format!("columns ({})", cols.join(", "))
        }
    }
}

fn describe_predicate(model: &Model, path: &EntityPath, p: &Predicate) -> String {
    match p {
        Predicate::Compare { target, op, operand } => {
            let lhs = match target {
                ColumnTarget::Column(c) => format!(
                    "{}.{}",
                    path.element(c.element).sql_alias(),
                    model.column(c.column).sql_name()
                ),
                ColumnTarget::FreeText(e) => format!("{}.*", path.element(*e).sql_alias()),
            };
            match operand {
                Operand::None => format!("{} {}", lhs, op.sql()),
                Operand::Value(v) => format!("{} {} {}", lhs, op.to_str(), v),
                Operand::Set { quantifier, values } => {
                    let q = match quantifier {
                        Quantifier::Any => "any",
                        Quantifier::All => "all",
                    };
                    format!("{} {} {}({})", lhs, op.to_str(), q, values.join(","))
                }
            }
        }
        Predicate::Not(inner) => format!("!({})", describe_predicate(model, path, inner)),
        Predicate::And(items) => items
            .iter()
            .map(|i| format!("({})", describe_predicate(model, path, i)))
            .collect::<Vec<_>>()
            .join(" & "),
        Predicate::Or(items) => items
            .iter()
            .map(|i| format!("({})", describe_predicate(model, path, i)))
            .collect::<Vec<_>>()
            .join(" ; "),
    }
}
