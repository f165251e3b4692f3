//! SQL text helpers
//!
//! All identifiers in generated statements are double-quoted and all
//! literals are single-quoted with embedded quotes doubled. Nothing else in
//! the crate concatenates client-supplied text into SQL.

use crate::error::{ErmError, ErmResult};

/// Quote an identifier, doubling embedded double quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote text as a SQL string literal, doubling embedded quotes
pub fn quote_literal(text: &str) -> ErmResult<String> {
    if text.contains('\0') {
        return Err(ErmError::BadData(
            "NUL characters are not allowed in values".to_string(),
        ));
    }
    Ok(format!("'{}'", text.replace('\'', "''")))
}

/// Schema-qualified, quoted table name
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Join clauses with `AND`, parenthesizing each
///
/// An empty list yields `True`.
pub fn and_all<S: AsRef<str>>(clauses: &[S]) -> String {
    join_clauses(clauses, "AND", "True")
}

/// Join clauses with `OR`, parenthesizing each
///
/// An empty list yields `False`.
pub fn or_any<S: AsRef<str>>(clauses: &[S]) -> String {
    join_clauses(clauses, "OR", "False")
}

fn join_clauses<S: AsRef<str>>(clauses: &[S], op: &str, empty: &str) -> String {
    match clauses.len() {
        0 => empty.to_string(),
        1 => clauses[0].as_ref().to_string(),
        _ => clauses
            .iter()
            .map(|c| format!("({})", c.as_ref()))
            .collect::<Vec<_>>()
            .join(&format!(" {} ", op)),
    }
}

/// Array literal of client attribute strings, cast to `text[]`
pub fn text_array(values: &[String]) -> ErmResult<String> {
    let items = values
        .iter()
        .map(|v| quote_literal(v))
        .collect::<ErmResult<Vec<_>>>()?;
    Ok(format!("ARRAY[{}]::text[]", items.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(qualified("s", "t"), "\"s\".\"t\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's").unwrap(), "'it''s'");
        assert!(quote_literal("\0").is_err());
    }

    #[test]
    fn test_clause_joining() {
        let none: Vec<String> = vec![];
        assert_eq!(and_all(&none), "True");
        assert_eq!(or_any(&none), "False");
        assert_eq!(and_all(&["a = 1"]), "a = 1");
        assert_eq!(or_any(&["a", "b"]), "(a) OR (b)");
    }

    #[test]
    fn test_text_array() {
        let roles = vec!["u1".to_string(), "*".to_string()];
        assert_eq!(text_array(&roles).unwrap(), "ARRAY['u1','*']::text[]");
    }
}
