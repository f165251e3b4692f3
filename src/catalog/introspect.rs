//! Model construction from introspection row-sets
//!
//! The backend describes one catalog snapshot as flat row-sets: schemas,
//! tables, columns, keys and foreign keys, each carrying its own ACL,
//! dynamic ACL binding and annotation documents. [`Introspection::build`]
//! validates them and assembles an immutable [`Model`].
//!
//! The same row types double as a builder for tests and tools:
//!
//! ```text
//! Introspection::new("1", 1)
//!     .schema("S")
//!     .table(TableRow::new("S", "T"))
//!     .column(ColumnRow::new("S", "T", "id", "int8").nullable(false))
//!     .key(KeyRow::new("S", "T_pkey", "S", "T", ["id"]))
//!     .build()?
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::{json, Value};

use super::acl::{Acl, Annotations, Rightful};
use super::dynacl::{AclBinding, Dynacls, KEYREF_DYNACL_TYPES, TABLE_DYNACL_TYPES};
use super::model::{
    Column, ColumnId, ColumnSet, ConstraintName, ForeignKey, ForeignKeyId, KeyRefId, KeyReference,
    Model, RefAction, Schema, SchemaId, Table, TableId, TableKind, Unique, UniqueId,
};
use super::system::{enforce_identifier, system_column_types, RID};
use super::types::Type;
use crate::error::{ErmError, ErmResult};

/// Schema row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchemaRow {
    pub name: String,
    pub comment: Option<String>,
    pub acls: Value,
    pub annotations: Annotations,
}

/// Table row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TableRow {
    pub schema: String,
    pub name: String,
    pub kind: Option<String>,
    pub comment: Option<String>,
    pub acls: Value,
    pub acl_bindings: Value,
    pub annotations: Annotations,
    /// Prepend the managed system columns and a key on `RID`
    pub system_columns: bool,
}

impl TableRow {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        TableRow {
            schema: schema.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set relation kind code (`r`, `v`, `m`, `f`)
    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn acls(mut self, acls: Value) -> Self {
        self.acls = acls;
        self
    }

    #[must_use]
    pub fn acl_bindings(mut self, bindings: Value) -> Self {
        self.acl_bindings = bindings;
        self
    }

    #[must_use]
    pub fn annotation(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_system_columns(mut self) -> Self {
        self.system_columns = true;
        self
    }
}

/// Column row
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnRow {
    pub schema: String,
    pub table: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Base type when `type_name` names a domain
    pub domain_base: Option<String>,
    pub position: Option<usize>,
    pub nullok: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
    pub acls: Value,
    pub acl_bindings: Value,
    pub annotations: Annotations,
}

impl Default for ColumnRow {
    fn default() -> Self {
        ColumnRow {
            schema: String::new(),
            table: String::new(),
            name: String::new(),
            type_name: String::new(),
            domain_base: None,
            position: None,
            nullok: true,
            default: None,
            comment: None,
            acls: Value::Null,
            acl_bindings: Value::Null,
            annotations: Annotations::new(),
        }
    }
}

impl ColumnRow {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        ColumnRow {
            schema: schema.into(),
            table: table.into(),
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn nullable(mut self, nullok: bool) -> Self {
        self.nullok = nullok;
        self
    }

    #[must_use]
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Treat the type name as a domain over `base`
    #[must_use]
    pub fn domain(mut self, base: impl Into<String>) -> Self {
        self.domain_base = Some(base.into());
        self
    }

    #[must_use]
    pub fn acls(mut self, acls: Value) -> Self {
        self.acls = acls;
        self
    }

    #[must_use]
    pub fn acl_bindings(mut self, bindings: Value) -> Self {
        self.acl_bindings = bindings;
        self
    }
}

/// Unique key row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeyRow {
    /// Constraint schema
    pub schema: String,
    /// Constraint name
    pub name: String,
    pub table_schema: String,
    pub table: String,
    pub columns: Vec<String>,
    pub comment: Option<String>,
    pub annotations: Annotations,
}

impl KeyRow {
    pub fn new<I, S>(
        schema: impl Into<String>,
        name: impl Into<String>,
        table_schema: impl Into<String>,
        table: impl Into<String>,
        columns: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyRow {
            schema: schema.into(),
            name: name.into(),
            table_schema: table_schema.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Foreign key reference row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForeignKeyRow {
    pub schema: String,
    pub name: String,
    pub table_schema: String,
    pub table: String,
    pub columns: Vec<String>,
    pub ref_schema: String,
    pub ref_table: String,
    /// Referenced columns, paired positionally with `columns`
    pub ref_columns: Vec<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
    pub comment: Option<String>,
    pub acls: Value,
    pub acl_bindings: Value,
    pub annotations: Annotations,
}

impl ForeignKeyRow {
    #[allow(clippy::too_many_arguments)]
    pub fn new<I, S, J, T>(
        schema: impl Into<String>,
        name: impl Into<String>,
        table_schema: impl Into<String>,
        table: impl Into<String>,
        columns: I,
        ref_schema: impl Into<String>,
        ref_table: impl Into<String>,
        ref_columns: J,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = T>,
        T: Into<String>,
    {
        ForeignKeyRow {
            schema: schema.into(),
            name: name.into(),
            table_schema: table_schema.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            ref_schema: ref_schema.into(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn on_delete(mut self, action: impl Into<String>) -> Self {
        self.on_delete = Some(action.into());
        self
    }

    #[must_use]
    pub fn on_update(mut self, action: impl Into<String>) -> Self {
        self.on_update = Some(action.into());
        self
    }

    #[must_use]
    pub fn acls(mut self, acls: Value) -> Self {
        self.acls = acls;
        self
    }

    #[must_use]
    pub fn acl_bindings(mut self, bindings: Value) -> Self {
        self.acl_bindings = bindings;
        self
    }
}

/// Complete row-set for one catalog snapshot
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Introspection {
    pub catalog_id: String,
    pub snapshot: u64,
    pub acls: Value,
    pub annotations: Annotations,
    pub schemas: Vec<SchemaRow>,
    pub tables: Vec<TableRow>,
    pub columns: Vec<ColumnRow>,
    pub keys: Vec<KeyRow>,
    pub fkeys: Vec<ForeignKeyRow>,
}

impl Introspection {
    pub fn new(catalog_id: impl Into<String>, snapshot: u64) -> Self {
        Introspection {
            catalog_id: catalog_id.into(),
            snapshot,
            ..Default::default()
        }
    }

    /// Set the catalog-level ACL document
    #[must_use]
    pub fn acls(mut self, acls: Value) -> Self {
        self.acls = acls;
        self
    }

    #[must_use]
    pub fn schema(self, name: impl Into<String>) -> Self {
        self.schema_row(SchemaRow {
            name: name.into(),
            ..Default::default()
        })
    }

    #[must_use]
    pub fn schema_row(mut self, row: SchemaRow) -> Self {
        self.schemas.push(row);
        self
    }

    #[must_use]
    pub fn table(mut self, row: TableRow) -> Self {
        self.tables.push(row);
        self
    }

    #[must_use]
    pub fn column(mut self, row: ColumnRow) -> Self {
        self.columns.push(row);
        self
    }

    #[must_use]
    pub fn key(mut self, row: KeyRow) -> Self {
        self.keys.push(row);
        self
    }

    #[must_use]
    pub fn fkey(mut self, row: ForeignKeyRow) -> Self {
        self.fkeys.push(row);
        self
    }

    /// Validate the row-sets and assemble a model
    pub fn build(&self) -> ErmResult<Model> {
        let mut model = Model::new(self.catalog_id.clone(), self.snapshot);
        model.acls = parse_acl(&self.acls, model.supported_rights())?;
        model.annotations = self.annotations.clone();

        for row in &self.schemas {
            add_schema(&mut model, row)?;
        }
        for row in &self.tables {
            add_table(&mut model, row)?;
        }
        for row in &self.columns {
            add_column(&mut model, row)?;
        }
        check_positions(&model)?;
        for row in &self.keys {
            let table = lookup_table(&model, &row.table_schema, &row.table)?;
            let cols = lookup_columns(&model, table, &row.columns)?;
            let u = add_unique(&mut model, table, cols, ConstraintName::new(&row.schema, &row.name))?;
            let unique = &mut model.uniques[u.0];
            if row.comment.is_some() {
                unique.comment = row.comment.clone();
            }
            unique.annotations.extend(row.annotations.clone());
        }
        let mut keyref_rows = Vec::new();
        for row in &self.fkeys {
            keyref_rows.push((add_keyref(&mut model, row)?, row));
        }

        // bindings may traverse any key reference, so they come last
        let mut table_bindings = Vec::new();
        for row in &self.tables {
            let t = lookup_table(&model, &row.schema, &row.name)?;
            table_bindings.push((t, parse_dynacls(&model, t, TABLE_DYNACL_TYPES, &row.acl_bindings)?));
        }
        let mut column_bindings = Vec::new();
        for row in &self.columns {
            let t = lookup_table(&model, &row.schema, &row.table)?;
            let c = model.column_by_name(t, &row.name)?.id;
            column_bindings.push((c, parse_dynacls(&model, t, TABLE_DYNACL_TYPES, &row.acl_bindings)?));
        }
        let mut keyref_bindings = Vec::new();
        for (k, row) in keyref_rows {
            let base = model.keyref_to_table(k);
            keyref_bindings.push((k, parse_dynacls(&model, base, KEYREF_DYNACL_TYPES, &row.acl_bindings)?));
        }
        for (t, d) in table_bindings {
            model.tables[t.0].dynacls = d;
        }
        for (c, d) in column_bindings {
            model.columns[c.0].dynacls = d;
        }
        for (k, d) in keyref_bindings {
            model.keyrefs[k.0].dynacls.extend(d);
        }

        tracing::debug!(
            catalog = %model.catalog_id,
            version = model.version,
            schemas = model.schemas.len(),
            tables = model.tables.len(),
            keyrefs = model.keyrefs.len(),
            "built catalog model"
        );
        Ok(model)
    }
}

fn parse_acl(doc: &Value, supported: &[super::acl::Right]) -> ErmResult<Acl> {
    if doc.is_null() {
        Ok(Acl::new())
    } else {
        Acl::from_json(doc, supported)
    }
}

fn parse_dynacls(
    model: &Model,
    base: TableId,
    supported: &[super::acl::Right],
    doc: &Value,
) -> ErmResult<Dynacls> {
    let mut out = Dynacls::new();
    match doc {
        Value::Null => {}
        Value::Object(map) => {
            for (name, binding) in map {
                out.insert(
                    name.clone(),
                    AclBinding::from_json(model, base, supported, name, binding)?,
                );
            }
        }
        other => {
            return Err(ErmError::BadData(format!(
                "ACL bindings {} must be an object",
                other
            )))
        }
    }
    Ok(out)
}

fn add_schema(model: &mut Model, row: &SchemaRow) -> ErmResult<SchemaId> {
    enforce_identifier(&row.name)?;
    if model.schema_index.contains_key(&row.name) {
        return Err(ErmError::ConflictModel(format!(
            "Schema \"{}\" already exists",
            row.name
        )));
    }
    let id = SchemaId(model.schemas.len());
    let mut schema = Schema {
        id,
        name: row.name.clone(),
        comment: row.comment.clone(),
        acls: Acl::new(),
        annotations: row.annotations.clone(),
        tables: BTreeMap::new(),
    };
    schema.acls = parse_acl(&row.acls, schema.supported_rights())?;
    model.schema_index.insert(row.name.clone(), id);
    model.schemas.push(schema);
    Ok(id)
}

fn lookup_table(model: &Model, schema: &str, table: &str) -> ErmResult<TableId> {
    model
        .schema_index
        .get(schema)
        .and_then(|s| model.schema(*s).tables.get(table))
        .copied()
        .ok_or_else(|| {
            ErmError::ConflictModel(format!("Table \"{}:{}\" does not exist", schema, table))
        })
}

fn lookup_columns(model: &Model, table: TableId, names: &[String]) -> ErmResult<Vec<ColumnId>> {
    if names.is_empty() {
        return Err(ErmError::BadData(format!(
            "key on table {} must have at least one column",
            model.table_display(table)
        )));
    }
    let mut seen = BTreeSet::new();
    names
        .iter()
        .map(|n| {
            if !seen.insert(n.as_str()) {
                return Err(ErmError::BadData(format!("column \"{}\" repeated in key", n)));
            }
            model.column_by_name(table, n).map(|c| c.id)
        })
        .collect()
}

fn add_table(model: &mut Model, row: &TableRow) -> ErmResult<TableId> {
    enforce_identifier(&row.name)?;
    let schema = *model.schema_index.get(&row.schema).ok_or_else(|| {
        ErmError::ConflictModel(format!("Schema \"{}\" does not exist", row.schema))
    })?;
    if model.schema(schema).tables.contains_key(&row.name) {
        return Err(ErmError::ConflictModel(format!(
            "Table \"{}:{}\" already exists",
            row.schema, row.name
        )));
    }
    let id = TableId(model.tables.len());
    let mut table = Table {
        id,
        schema,
        name: row.name.clone(),
        kind: TableKind::parse(row.kind.as_deref().unwrap_or("r"))?,
        comment: row.comment.clone(),
        acls: Acl::new(),
        dynacls: Dynacls::new(),
        annotations: row.annotations.clone(),
        columns: Vec::new(),
        column_index: BTreeMap::new(),
        uniques: BTreeMap::new(),
        fkeys: BTreeMap::new(),
        outbound: Vec::new(),
        inbound: Vec::new(),
    };
    table.acls = parse_acl(&row.acls, table.supported_rights())?;
    model.schemas[schema.0].tables.insert(row.name.clone(), id);
    model.tables.push(table);

    if row.system_columns {
        for (name, type_name, nullok) in system_column_types() {
            push_column(model, id, name, Type::scalar(type_name), nullok)?;
        }
        let rid = model.column_by_name(id, RID)?.id;
        add_unique(
            model,
            id,
            vec![rid],
            ConstraintName::new(&row.schema, format!("{}_RIDkey1", row.name)),
        )?;
    }
    Ok(id)
}

fn push_column(model: &mut Model, table: TableId, name: &str, ctype: Type, nullok: bool) -> ErmResult<ColumnId> {
    enforce_identifier(name)?;
    if model.table(table).column_id(name).is_some() {
        return Err(ErmError::BadData(format!(
            "column \"{}\" defined more than once in table {}",
            name,
            model.table_display(table)
        )));
    }
    let id = ColumnId(model.columns.len());
    let position = model.table(table).columns.len();
    model.columns.push(Column {
        id,
        table,
        name: name.to_string(),
        position,
        ctype,
        nullok,
        default: None,
        comment: None,
        acls: Acl::new(),
        dynacls: Dynacls::new(),
        annotations: Annotations::new(),
    });
    let t = &mut model.tables[table.0];
    t.columns.push(id);
    t.column_index.insert(name.to_string(), id);
    Ok(id)
}

fn add_column(model: &mut Model, row: &ColumnRow) -> ErmResult<ColumnId> {
    let table = lookup_table(model, &row.schema, &row.table)?;
    let ctype = match &row.domain_base {
        Some(base) => Type::domain(row.type_name.clone(), Type::parse(base)?),
        None => Type::parse(&row.type_name)?,
    };
    let id = push_column(model, table, &row.name, ctype, row.nullok)?;
    let acls = parse_acl(&row.acls, model.column(id).supported_rights())?;
    let col = &mut model.columns[id.0];
    if let Some(pos) = row.position {
        col.position = pos;
    }
    col.default = row.default.clone();
    col.comment = row.comment.clone();
    col.annotations = row.annotations.clone();
    col.acls = acls;
    Ok(id)
}

fn check_positions(model: &Model) -> ErmResult<()> {
    for table in &model.tables {
        let mut positions: Vec<usize> = table
            .columns
            .iter()
            .map(|c| model.column(*c).position)
            .collect();
        positions.sort_unstable();
        if positions.iter().enumerate().any(|(i, p)| i != *p) {
            return Err(ErmError::BadData(format!(
                "column positions of table {} must be unique and contiguous from 0",
                model.table_display(table.id)
            )));
        }
    }
    Ok(())
}

fn add_unique(
    model: &mut Model,
    table: TableId,
    cols: Vec<ColumnId>,
    constraint: ConstraintName,
) -> ErmResult<UniqueId> {
    enforce_identifier(&constraint.name)?;
    let set: ColumnSet = cols.into_iter().collect();
    if let Some(existing) = model.table(table).uniques.get(&set).copied() {
        // another constraint over the same column set is the same key
        model.uniques[existing.0].constraints.insert(constraint);
        return Ok(existing);
    }
    let id = UniqueId(model.uniques.len());
    model.uniques.push(Unique {
        id,
        table,
        columns: set.clone(),
        constraints: BTreeSet::from([constraint]),
        comment: None,
        annotations: Annotations::new(),
        table_references: BTreeMap::new(),
    });
    model.tables[table.0].uniques.insert(set, id);
    Ok(id)
}

fn add_keyref(model: &mut Model, row: &ForeignKeyRow) -> ErmResult<KeyRefId> {
    enforce_identifier(&row.name)?;
    let on_delete = RefAction::parse(row.on_delete.as_deref().unwrap_or("NO ACTION"))?;
    let on_update = RefAction::parse(row.on_update.as_deref().unwrap_or("NO ACTION"))?;
    let table = lookup_table(model, &row.table_schema, &row.table)?;
    let ref_table = lookup_table(model, &row.ref_schema, &row.ref_table)?;
    if row.columns.len() != row.ref_columns.len() {
        return Err(ErmError::BadData(format!(
            "foreign key {} pairs {} columns with {} referenced columns",
            row.name,
            row.columns.len(),
            row.ref_columns.len()
        )));
    }
    let fk_cols = lookup_columns(model, table, &row.columns)?;
    let pk_cols = lookup_columns(model, ref_table, &row.ref_columns)?;

    let pk_set: ColumnSet = pk_cols.iter().copied().collect();
    let unique = model.table(ref_table).uniques.get(&pk_set).copied().ok_or_else(|| {
        ErmError::ConflictModel(format!(
            "referenced columns of foreign key {} are not a unique key of {}",
            row.name,
            model.table_display(ref_table)
        ))
    })?;

    let mut pairs: Vec<(ColumnId, ColumnId)> = fk_cols.iter().copied().zip(pk_cols.iter().copied()).collect();
    for (f, p) in &pairs {
        let (fc, pc) = (model.column(*f), model.column(*p));
        if fc.ctype.storage_type() != pc.ctype.storage_type() {
            return Err(ErmError::ConflictModel(format!(
                "foreign key {} column {} type {} does not match referenced column {} type {}",
                row.name, fc.name, fc.ctype, pc.name, pc.ctype
            )));
        }
    }
    pairs.sort();

    let fk_set: ColumnSet = fk_cols.iter().copied().collect();
    let fkey = match model.table(table).fkeys.get(&fk_set).copied() {
        Some(f) => f,
        None => {
            let id = ForeignKeyId(model.fkeys.len());
            model.fkeys.push(ForeignKey {
                id,
                table,
                columns: fk_set.clone(),
                references: BTreeMap::new(),
                table_references: BTreeMap::new(),
            });
            model.tables[table.0].fkeys.insert(fk_set, id);
            id
        }
    };

    let constraint = ConstraintName::new(&row.schema, &row.name);
    let existing = model.foreign_key(fkey)
        .references
        .get(&unique)
        .into_iter()
        .flatten()
        .copied()
        .find(|k| model.keyref(*k).pairs == pairs);
    if let Some(k) = existing {
        // same pairing under another constraint name
        model.keyrefs[k.0].constraints.insert(constraint);
        return Ok(k);
    }

    let id = KeyRefId(model.keyrefs.len());
    let mut keyref = KeyReference {
        id,
        foreign_key: fkey,
        unique,
        pairs,
        constraints: BTreeSet::from([constraint]),
        on_delete,
        on_update,
        comment: row.comment.clone(),
        acls: Acl::new(),
        dynacls: Dynacls::new(),
        annotations: row.annotations.clone(),
    };
    let mut acl_doc = json!({"insert": ["*"], "update": ["*"]});
    if let (Some(dst), Some(src)) = (acl_doc.as_object_mut(), row.acls.as_object()) {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
    keyref.acls = parse_acl(&acl_doc, keyref.supported_rights())?;
    model.keyrefs.push(keyref);

    model.fkeys[fkey.0]
        .references
        .entry(unique)
        .or_default()
        .insert(id);
    model.fkeys[fkey.0]
        .table_references
        .entry(ref_table)
        .or_default()
        .insert(id);
    model.uniques[unique.0]
        .table_references
        .entry(table)
        .or_default()
        .insert(id);
    model.tables[table.0].outbound.push(id);
    model.tables[ref_table.0].inbound.push(id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::acl::Right;

    fn base() -> Introspection {
        Introspection::new("1", 7)
            .schema("S")
            .table(TableRow::new("S", "Category"))
            .column(ColumnRow::new("S", "Category", "id", "int8").nullable(false))
            .key(KeyRow::new("S", "Category_pkey", "S", "Category", ["id"]))
            .table(TableRow::new("S", "T"))
            .column(ColumnRow::new("S", "T", "id", "int8").nullable(false))
            .column(ColumnRow::new("S", "T", "name", "text"))
            .column(ColumnRow::new("S", "T", "cat_id", "int8"))
            .key(KeyRow::new("S", "T_pkey", "S", "T", ["id"]))
            .fkey(ForeignKeyRow::new("S", "T_cat_fkey", "S", "T", ["cat_id"], "S", "Category", ["id"]))
    }

    #[test]
    fn test_build_basic() {
        let m = base().build().unwrap();
        assert_eq!(m.version(), 7);
        let t = m.table_by_name("S", "T").unwrap();
        assert_eq!(t.columns.len(), 3);
        assert_eq!(t.outbound.len(), 1);
        let k = m.keyref(t.outbound[0]);
        assert_eq!(m.keyref_to_table(k.id), m.table_by_name("S", "Category").unwrap().id);
        assert_eq!(k.on_delete, RefAction::NoAction);
        assert!(k.acls.contains(Right::Insert));
        let cat = m.table_by_name("S", "Category").unwrap();
        let u = m.unique(*cat.uniques.values().next().unwrap());
        assert_eq!(u.table_references.get(&t.id).map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_duplicate_constraints_reconciled() {
        let m = base()
            .key(KeyRow::new("S", "T_id_key", "S", "T", ["id"]))
            .fkey(ForeignKeyRow::new("S", "T_cat_fkey2", "S", "T", ["cat_id"], "S", "Category", ["id"]))
            .build()
            .unwrap();
        let t = m.table_by_name("S", "T").unwrap();
        assert_eq!(t.uniques.len(), 1);
        let u = m.unique(*t.uniques.values().next().unwrap());
        assert_eq!(u.constraints.len(), 2);
        assert_eq!(t.outbound.len(), 1);
        assert_eq!(m.keyref(t.outbound[0]).constraints.len(), 2);
    }

    #[test]
    fn test_fkey_requires_unique_target() {
        let r = base()
            .column(ColumnRow::new("S", "Category", "label", "text"))
            .fkey(ForeignKeyRow::new("S", "bad", "S", "T", ["name"], "S", "Category", ["label"]))
            .build();
        assert!(matches!(r, Err(ErmError::ConflictModel(_))));
    }

    #[test]
    fn test_fkey_type_mismatch() {
        let r = base()
            .key(KeyRow::new("S", "T_name_key", "S", "T", ["name"]))
            .fkey(ForeignKeyRow::new("S", "bad", "S", "T", ["cat_id"], "S", "T", ["name"]))
            .build();
        assert!(matches!(r, Err(ErmError::ConflictModel(_))));
    }

    #[test]
    fn test_bad_rows() {
        assert!(matches!(
            base().column(ColumnRow::new("S", "T", "name", "text")).build(),
            Err(ErmError::BadData(_))
        ));
        assert!(matches!(
            base().table(TableRow::new("S", "x".repeat(64))).build(),
            Err(ErmError::BadData(_))
        ));
        assert!(matches!(
            base()
                .fkey(ForeignKeyRow::new("S", "f", "S", "T", ["cat_id"], "S", "Category", ["id"]).on_delete("EXPLODE"))
                .build(),
            Err(ErmError::BadData(_))
        ));
        assert!(matches!(
            base().table(TableRow::new("Nope", "X")).build(),
            Err(ErmError::ConflictModel(_))
        ));
        let mut bad_pos = ColumnRow::new("S", "Category", "label", "text");
        bad_pos.position = Some(5);
        assert!(matches!(base().column(bad_pos).build(), Err(ErmError::BadData(_))));
    }

    #[test]
    fn test_system_columns() {
        let m = Introspection::new("1", 1)
            .schema("S")
            .table(TableRow::new("S", "X").with_system_columns())
            .column(ColumnRow::new("S", "X", "v", "text"))
            .build()
            .unwrap();
        let t = m.table_by_name("S", "X").unwrap();
        assert_eq!(t.columns.len(), 6);
        assert_eq!(m.column(t.columns[5]).position, 5);
        assert_eq!(m.primary_keys(t.id).len(), 1);
    }

    #[test]
    fn test_deserialize_rows() {
        let doc = serde_json::json!({
            "catalog_id": "9",
            "snapshot": 3,
            "schemas": [{"name": "S"}],
            "tables": [{"schema": "S", "name": "T", "kind": "v"}],
            "columns": [{"schema": "S", "table": "T", "name": "a", "type": "text"}]
        });
        let rows: Introspection = serde_json::from_value(doc).unwrap();
        let m = rows.build().unwrap();
        let t = m.table_by_name("S", "T").unwrap();
        assert!(!t.is_writable());
        assert!(m.column(t.columns[0]).nullok);
    }
}
