//! Input batches and staging
//!
//! A batch is a header plus rows of JSON values. CSV cells arrive as text
//! and are typed while staging, with an unquoted empty cell read as NULL;
//! JSON input keeps its native values.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::catalog::{ColumnId, Model, TableId};
use crate::error::{ErmError, ErmResult};
use crate::sql::quote_ident;
use crate::write::Statement;

/// Rows per `INSERT ... VALUES` statement while staging
const STAGE_CHUNK: usize = 500;

/// In-process input record
pub type Record = Map<String, Value>;

/// Declared input encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// `text/csv` with a header row
    Csv,
    /// `application/json` array of objects
    JsonArray,
    /// `application/x-json-stream`, one object per line
    JsonStream,
}

impl InputFormat {
    /// Format for a content type, ignoring parameters like `charset`
    pub fn from_content_type(content_type: &str) -> ErmResult<Self> {
        let base = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match base.as_str() {
            "text/csv" => Ok(InputFormat::Csv),
            "application/json" => Ok(InputFormat::JsonArray),
            "application/x-json-stream" => Ok(InputFormat::JsonStream),
            _ => Err(ErmError::UnsupportedMediaType(format!(
                "input content type {} not supported",
                content_type
            ))),
        }
    }
}

/// Parsed input rows
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Cells are untyped text needing per-column parsing
    textual: bool,
}

impl Batch {
    /// Parse raw input in the given format
    pub fn parse(format: InputFormat, data: &[u8]) -> ErmResult<Self> {
        match format {
            InputFormat::Csv => Self::from_csv(data),
            InputFormat::JsonArray => {
                let doc: Value = serde_json::from_slice(data)?;
                match doc {
                    Value::Array(items) => Self::from_objects(items),
                    _ => Err(ErmError::BadData("JSON input must be an array of objects".to_string())),
                }
            }
            InputFormat::JsonStream => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| ErmError::BadData(format!("input is not UTF-8: {}", e)))?;
                let items = text
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(serde_json::from_str::<Value>)
                    .collect::<Result<Vec<_>, _>>()?;
                Self::from_objects(items)
            }
        }
    }

    /// Batch from in-process records
    pub fn from_records(records: Vec<Record>) -> ErmResult<Self> {
        Self::from_objects(records.into_iter().map(Value::Object).collect())
    }

    fn from_csv(data: &[u8]) -> ErmResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data);
        let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        check_header(&columns)?;
        let records = reader.records().collect::<Result<Vec<_>, _>>()?;
        let mut rows = Vec::with_capacity(records.len());
        for (n, record) in records.iter().enumerate() {
            if record.len() != columns.len() {
                return Err(ErmError::BadData(format!(
                    "CSV row {} has {} fields but the header has {}",
                    n + 1,
                    record.len(),
                    columns.len()
                )));
            }
            let start = record.position().map_or(0, |p| p.byte() as usize);
            let end = records
                .get(n + 1)
                .and_then(|r| r.position())
                .map_or(data.len(), |p| p.byte() as usize);
            let quoted = quoted_fields(data.get(start..end).unwrap_or_default());
            rows.push(
                record
                    .iter()
                    .enumerate()
                    .map(|(i, s)| {
                        // an unquoted empty cell is NULL, `""` is the empty string
                        if s.is_empty() && !quoted.get(i).copied().unwrap_or(false) {
                            Value::Null
                        } else {
                            Value::String(s.to_string())
                        }
                    })
                    .collect(),
            );
        }
        Ok(Batch {
            columns,
            rows,
            textual: true,
        })
    }

    fn from_objects(items: Vec<Value>) -> ErmResult<Self> {
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::with_capacity(items.len());
        for (n, item) in items.into_iter().enumerate() {
            let obj = match item {
                Value::Object(obj) => obj,
                other => {
                    return Err(ErmError::BadData(format!(
                        "input row {} must be an object, got {}",
                        n + 1,
                        other
                    )))
                }
            };
            if n == 0 {
                columns = obj.keys().cloned().collect();
            } else if obj.len() != columns.len() || !columns.iter().all(|c| obj.contains_key(c)) {
                return Err(ErmError::BadData(format!(
                    "input row {} fields do not match the first row",
                    n + 1
                )));
            }
            let mut obj = obj;
            rows.push(
                columns
                    .iter()
                    .map(|c| obj.remove(c).unwrap_or(Value::Null))
                    .collect(),
            );
        }
        Ok(Batch {
            columns,
            rows,
            textual: false,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Map header names to table columns
    pub fn resolve_columns(&self, model: &Model, table: TableId) -> ErmResult<Vec<ColumnId>> {
        self.columns
            .iter()
            .map(|name| {
                model.table(table).column_id(name).ok_or_else(|| {
                    ErmError::ConflictModel(format!(
                        "input column \"{}\" not in table {}",
                        name,
                        model.table_display(table)
                    ))
                })
            })
            .collect()
    }

    /// Statements creating and filling the staged relation `name`
    pub fn stage(&self, model: &Model, table: TableId, name: &str) -> ErmResult<Vec<Statement>> {
        let cols = self.resolve_columns(model, table)?;
        let defs = cols
            .iter()
            .map(|c| {
                let col = model.column(*c);
                format!("{} {}", col.sql_name(), col.ctype.sql_storage())
            })
            .collect::<Vec<_>>();
        let mut out = vec![Statement::Exec(format!(
            "CREATE TEMPORARY TABLE {} ({})",
            quote_ident(name),
            defs.join(", ")
        ))];
        if defs.is_empty() {
            return Ok(out);
        }
        let names = cols
            .iter()
            .map(|c| model.column(*c).sql_name())
            .collect::<Vec<_>>()
            .join(", ");
        for chunk in self.rows.chunks(STAGE_CHUNK) {
            let tuples = chunk
                .iter()
                .map(|row| {
                    let cells = row
                        .iter()
                        .zip(&cols)
                        .map(|(v, c)| self.encode(model, *c, v))
                        .collect::<ErmResult<Vec<_>>>()?;
                    Ok(format!("({})", cells.join(", ")))
                })
                .collect::<ErmResult<Vec<_>>>()?;
            out.push(Statement::Exec(format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(name),
                names,
                tuples.join(", ")
            )));
        }
        Ok(out)
    }

    fn encode(&self, model: &Model, col: ColumnId, value: &Value) -> ErmResult<String> {
        let ctype = &model.column(col).ctype;
        match value {
            Value::String(s) if self.textual => ctype.sql_literal(&ctype.parse_value(s)?),
            other => ctype.sql_literal(other),
        }
    }
}

/// Which fields of one raw CSV record open with a quote
fn quoted_fields(raw: &[u8]) -> Vec<bool> {
    let mut out = Vec::new();
    let mut at_start = true;
    let mut in_quotes = false;
    for &b in raw {
        if at_start {
            out.push(b == b'"');
            at_start = false;
            if b == b'"' {
                in_quotes = true;
                continue;
            }
        }
        match b {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => at_start = true,
            b'\n' | b'\r' if !in_quotes => break,
            _ => {}
        }
    }
    if at_start {
        out.push(false);
    }
    out
}

fn check_header(columns: &[String]) -> ErmResult<()> {
    let mut seen = BTreeSet::new();
    for c in columns {
        if !seen.insert(c.as_str()) {
            return Err(ErmError::BadData(format!("input column \"{}\" appears more than once", c)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::introspect::{ColumnRow, Introspection, KeyRow, TableRow};
    use serde_json::json;

    fn model() -> Model {
        Introspection::new("1", 1)
            .schema("S")
            .table(TableRow::new("S", "T"))
            .column(ColumnRow::new("S", "T", "id", "int8").nullable(false))
            .column(ColumnRow::new("S", "T", "name", "text"))
            .key(KeyRow::new("S", "T_pkey", "S", "T", ["id"]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_content_types() {
        assert_eq!(InputFormat::from_content_type("text/csv; charset=utf-8").unwrap(), InputFormat::Csv);
        assert!(matches!(
            InputFormat::from_content_type("application/xml"),
            Err(ErmError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn test_csv_parse_and_stage() {
        let m = model();
        let t = m.table_by_name("S", "T").unwrap().id;
        let batch = Batch::parse(InputFormat::Csv, b"id,name\n1,O'Neil\n2,\n3,\"\"\n").unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.rows[1][1], Value::Null);
        let stmts = batch.stage(&m, t, "_in").unwrap();
        assert_eq!(
            stmts[0],
            Statement::Exec("CREATE TEMPORARY TABLE \"_in\" (\"id\" int8, \"name\" text)".into())
        );
        assert_eq!(
            stmts[1].sql(),
            "INSERT INTO \"_in\" (\"id\", \"name\") VALUES (1, 'O''Neil'::text), (2, NULL::text), (3, ''::text)"
        );
    }

    #[test]
    fn test_quoted_fields() {
        assert_eq!(quoted_fields(b"1,\"x,y\",\n"), vec![false, true, false]);
        assert_eq!(quoted_fields(b"\"\"\r\n"), vec![true]);
        assert_eq!(quoted_fields(b"\"a\nb\",c"), vec![true, false]);
    }

    #[test]
    fn test_csv_errors() {
        assert!(matches!(
            Batch::parse(InputFormat::Csv, b"id,id\n1,2\n"),
            Err(ErmError::BadData(_))
        ));
        assert!(matches!(
            Batch::parse(InputFormat::Csv, b"id,name\n1\n"),
            Err(ErmError::BadData(_))
        ));
        let m = model();
        let t = m.table_by_name("S", "T").unwrap().id;
        let batch = Batch::parse(InputFormat::Csv, b"id,color\n1,red\n").unwrap();
        assert!(matches!(batch.stage(&m, t, "_in"), Err(ErmError::ConflictModel(_))));
        let batch = Batch::parse(InputFormat::Csv, b"id\nabc\n").unwrap();
        assert!(matches!(batch.stage(&m, t, "_in"), Err(ErmError::BadData(_))));
    }

    #[test]
    fn test_json_inputs() {
        let a = Batch::parse(InputFormat::JsonArray, br#"[{"id": 1, "name": null}]"#).unwrap();
        let s = Batch::parse(InputFormat::JsonStream, b"{\"id\": 1, \"name\": null}\n\n").unwrap();
        assert_eq!(a, s);
        assert!(matches!(
            Batch::parse(InputFormat::JsonArray, br#"[{"id": 1}, {"name": "x"}]"#),
            Err(ErmError::BadData(_))
        ));
        let r = Batch::from_records(vec![json!({"id": 3}).as_object().cloned().unwrap()]).unwrap();
        assert_eq!(r.columns, vec!["id".to_string()]);
        let m = model();
        let t = m.table_by_name("S", "T").unwrap().id;
        assert_eq!(
            a.stage(&m, t, "_in").unwrap()[1].sql(),
            "INSERT INTO \"_in\" (\"id\", \"name\") VALUES (1, NULL::text)"
        );
    }
}
