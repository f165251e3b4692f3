//! Sort and keyset paging
//!
//! The normal order is `ASC NULLS LAST` or `DESC NULLS FIRST` per key. A
//! page boundary selects rows strictly after (or before) the boundary tuple
//! in that order, comparing key by key with `IS NOT DISTINCT FROM` equality
//! so NULL boundary values work.

use crate::compiler::OutputColumn;
use crate::error::{ErmError, ErmResult};
use crate::path::ast::{PageBound, PageDirection, SortKey};
use crate::sql::quote_ident;

/// Wrap `inner` with ordering, paging and limit
pub fn wrap_sorted(
    inner: &str,
    outputs: &[OutputColumn],
    sort: &[SortKey],
    page: Option<&PageBound>,
    limit: Option<u64>,
) -> ErmResult<String> {
    let keys = sort
        .iter()
        .map(|k| {
            outputs
                .iter()
                .find(|o| o.name == k.column)
                .map(|o| (k, o))
                .ok_or_else(|| {
                    ErmError::BadData(format!("sort column \"{}\" is not an output column", k.column))
                })
        })
        .collect::<ErmResult<Vec<_>>>()?;

    let limit_sql = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let page = match page {
        None if keys.is_empty() => return Ok(format!("{}{}", inner, limit_sql)),
        None => None,
        Some(bound) => {
            if bound.values.len() != keys.len() {
                return Err(ErmError::BadSyntax(format!(
                    "page boundary has {} values but sort has {} keys",
                    bound.values.len(),
                    keys.len()
                )));
            }
            if bound.direction == PageDirection::Before && limit.is_none() {
                return Err(ErmError::BadSyntax("before paging requires a limit".to_string()));
            }
            Some(bound)
        }
    };

    let order = |reverse: bool| -> String {
        keys.iter()
            .map(|(k, _)| {
                let desc = k.descending != reverse;
                format!(
                    "s.{} {}",
                    quote_ident(&k.column),
                    if desc { "DESC NULLS FIRST" } else { "ASC NULLS LAST" }
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let filter = match page {
        Some(bound) => {
            let before = bound.direction == PageDirection::Before;
            let terms = keys
                .iter()
                .zip(bound.values.iter())
                .map(|((k, o), v)| {
                    let lit = match v {
                        Some(text) => o.ctype.sql_literal(&o.ctype.parse_value(text)?)?,
                        None => format!("NULL::{}", o.ctype.sql_storage()),
                    };
                    Ok(KeyBound {
                        expr: format!("s.{}", quote_ident(&k.column)),
                        literal: lit,
                        null_bound: v.is_none(),
                        descending: k.descending,
                    })
                })
                .collect::<ErmResult<Vec<_>>>()?;
            format!(" WHERE {}", page_predicate(&terms, before))
        }
        None => String::new(),
    };

    let before = page.map(|b| b.direction == PageDirection::Before).unwrap_or(false);
    if before {
        Ok(format!(
            "SELECT * FROM (SELECT * FROM ({}) s{} ORDER BY {}{}) s ORDER BY {}",
            inner,
            filter,
            order(true),
            limit_sql,
            order(false)
        ))
    } else {
        Ok(format!(
            "SELECT * FROM ({}) s{} ORDER BY {}{}",
            inner,
            filter,
            order(false),
            limit_sql
        ))
    }
}

/// One sort key with its boundary value
pub struct KeyBound {
    pub expr: String,
    pub literal: String,
    pub null_bound: bool,
    pub descending: bool,
}

/// Strictly-after (or before) predicate over a key tuple
pub fn page_predicate(keys: &[KeyBound], before: bool) -> String {
    match keys.split_first() {
        None => "True".to_string(),
        Some((first, [])) => key_term(first, before),
        Some((first, rest)) => format!(
            "({}) OR ({} IS NOT DISTINCT FROM {} AND ({}))",
            key_term(first, before),
            first.expr,
            first.literal,
            page_predicate(rest, before)
        ),
    }
}

fn key_term(k: &KeyBound, before: bool) -> String {
    match (k.null_bound, k.descending, before) {
        // NULLs sort first when descending, last when ascending
        (true, true, false) | (true, false, true) => format!("{} IS NOT NULL", k.expr),
        (true, _, _) => "False".to_string(),
        (false, desc, before) => {
            let op = if desc == before { ">" } else { "<" };
            let nulls_beyond = desc == before;
            if nulls_beyond {
                format!("{} {} {} OR {} IS NULL", k.expr, op, k.literal, k.expr)
            } else {
                format!("{} {} {}", k.expr, op, k.literal)
            }
        }
    }
}
