//! Filter predicate SQL

use crate::catalog::{AccessContext, Type};
use crate::compiler::authz::column_selectable;
use crate::error::ErmResult;
use crate::path::ast::{Operand, Operator, Quantifier};
use crate::path::{ColumnTarget, EntityPath, Predicate};
use crate::sql::{and_all, or_any, quote_literal};

/// SQL for a resolved predicate over the path's `t0..tn` aliases
pub fn predicate_sql(access: &AccessContext<'_>, path: &EntityPath, p: &Predicate) -> ErmResult<String> {
    let model = access.model();
    match p {
        Predicate::Compare {
            target: ColumnTarget::Column(c),
            op,
            operand,
        } => {
            let col = model.column(c.column);
            let expr = format!("{}.{}", path.element(c.element).sql_alias(), col.sql_name());
            compare_sql(&expr, &col.ctype, *op, operand)
        }
        Predicate::Compare {
            target: ColumnTarget::FreeText(e),
            op,
            operand,
        } => {
            let elem = path.element(*e);
            let text = Type::scalar("text");
            let clauses = model
                .columns_of(elem.table)
                .filter(|c| c.ctype.is_text() || c.ctype.element_type().is_text())
                .filter(|c| column_selectable(access, c.id))
                .map(|c| {
                    let expr = format!("{}.{}::text", elem.sql_alias(), c.sql_name());
                    compare_sql(&expr, &text, *op, operand)
                })
                .collect::<ErmResult<Vec<_>>>()?;
            Ok(or_any(&clauses))
        }
        Predicate::Not(inner) => Ok(format!("NOT ({})", predicate_sql(access, path, inner)?)),
        Predicate::And(items) => Ok(and_all(
            &items
                .iter()
                .map(|i| predicate_sql(access, path, i))
                .collect::<ErmResult<Vec<_>>>()?,
        )),
        Predicate::Or(items) => Ok(or_any(
            &items
                .iter()
                .map(|i| predicate_sql(access, path, i))
                .collect::<ErmResult<Vec<_>>>()?,
        )),
    }
}

/// Compare one column expression of type `ctype` against an operand
pub fn compare_sql(expr: &str, ctype: &Type, op: Operator, operand: &Operand) -> ErmResult<String> {
    match operand {
        Operand::None => Ok(format!("{} IS NULL", expr)),
        Operand::Value(v) => value_sql(expr, ctype, op, v),
        Operand::Set { quantifier, values } => {
            if ctype.is_array() && op == Operator::Eq {
                let elem = ctype.element_type();
                let lits = values
                    .iter()
                    .map(|v| literal(elem, v))
                    .collect::<ErmResult<Vec<_>>>()?;
                let array = format!("ARRAY[{}]::{}", lits.join(","), ctype.sql_storage());
                return Ok(match quantifier {
                    Quantifier::Any => format!("{} && {}", expr, array),
                    Quantifier::All => format!("{} @> {}", expr, array),
                });
            }
            let parts = values
                .iter()
                .map(|v| value_sql(expr, ctype, op, v))
                .collect::<ErmResult<Vec<_>>>()?;
            Ok(match quantifier {
                Quantifier::Any => or_any(&parts),
                Quantifier::All => and_all(&parts),
            })
        }
    }
}

fn literal(ctype: &Type, text: &str) -> ErmResult<String> {
    ctype.sql_literal(&ctype.parse_value(text)?)
}

fn value_sql(expr: &str, ctype: &Type, op: Operator, value: &str) -> ErmResult<String> {
    if op == Operator::Ts {
        let query = quote_literal(value)?;
        return Ok(format!(
            "to_tsvector('english'::regconfig, {}::text) @@ to_tsquery('english'::regconfig, {})",
            expr, query
        ));
    }
    if op.is_text_op() {
        let pattern = quote_literal(value)?;
        if ctype.is_array() {
            return Ok(format!(
                "(SELECT bool_or(v::text {} {}) FROM unnest({}) x (v))",
                op.sql(),
                pattern,
                expr
            ));
        }
        if ctype.is_text() {
            return Ok(format!("{} {} {}", expr, op.sql(), pattern));
        }
        return Ok(format!("{}::text {} {}", expr, op.sql(), pattern));
    }
    let lit = literal(ctype.element_type(), value)?;
    if ctype.is_array() {
        return Ok(format!(
            "(SELECT bool_or(v {} {}) FROM unnest({}) x (v))",
            op.sql(),
            lit,
            expr
        ));
    }
    Ok(format!("{} {} {}", expr, op.sql(), lit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_compare() {
        let t = Type::scalar("int8");
        assert_eq!(
            compare_sql("t0.\"a\"", &t, Operator::Geq, &Operand::Value("10".into())).unwrap(),
            "t0.\"a\" >= 10"
        );
        assert!(compare_sql("t0.\"a\"", &t, Operator::Eq, &Operand::Value("x".into())).is_err());
        assert_eq!(
            compare_sql("t0.\"a\"", &t, Operator::Null, &Operand::None).unwrap(),
            "t0.\"a\" IS NULL"
        );
    }

    #[test]
    fn test_text_ops() {
        let t = Type::scalar("text");
        assert_eq!(
            compare_sql("t0.\"n\"", &t, Operator::CiRegexp, &Operand::Value("o'k".into())).unwrap(),
            "t0.\"n\" ~* 'o''k'"
        );
        assert_eq!(
            compare_sql("t0.\"n\"", &t, Operator::Eq, &Operand::Value("x".into())).unwrap(),
            "t0.\"n\" = 'x'::text"
        );
        let i = Type::scalar("int4");
        assert_eq!(
            compare_sql("t0.\"i\"", &i, Operator::Regexp, &Operand::Value("^1".into())).unwrap(),
            "t0.\"i\"::text ~ '^1'"
        );
    }

    #[test]
    fn test_array_compare() {
        let t = Type::parse("text[]").unwrap();
        assert_eq!(
            compare_sql("t0.\"tags\"", &t, Operator::Eq, &Operand::Value("a".into())).unwrap(),
            "(SELECT bool_or(v = 'a'::text) FROM unnest(t0.\"tags\") x (v))"
        );
        let set = Operand::Set {
            quantifier: Quantifier::All,
            values: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            compare_sql("t0.\"tags\"", &t, Operator::Eq, &set).unwrap(),
            "t0.\"tags\" @> ARRAY['a'::text,'b'::text]::text[]"
        );
    }

    #[test]
    fn test_set_expansion() {
        let t = Type::scalar("int8");
        let set = Operand::Set {
            quantifier: Quantifier::Any,
            values: vec!["1".into(), "2".into()],
        };
        assert_eq!(
            compare_sql("t0.\"a\"", &t, Operator::Eq, &set).unwrap(),
            "(t0.\"a\" = 1) OR (t0.\"a\" = 2)"
        );
    }
}
