//! Catalog model arena
//!
//! Every entity lives in a per-kind `Vec` owned by [`Model`] and refers to
//! its relatives through typed handles. Back-references (column to table,
//! table to schema, key to referencing tables) are handles too, so the
//! model has no ownership cycles and can be shared as `Arc<Model>`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::acl::{Acl, Annotatable, Annotations, Right, Rightful};
use super::dynacl::Dynacls;
use super::system::{is_private_schema, SYSTEM_COLUMNS};
use super::types::Type;
use crate::error::{ErmError, ErmResult};
use crate::sql::{qualified, quote_ident};

/// Schema handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(pub usize);

/// Table handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub usize);

/// Column handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub usize);

/// Unique key handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueId(pub usize);

/// Foreign key handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForeignKeyId(pub usize);

/// Key reference handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyRefId(pub usize);

/// Any resource that can carry ACLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    Model,
    Schema(SchemaId),
    Table(TableId),
    Column(ColumnId),
    Unique(UniqueId),
    ForeignKey(ForeignKeyId),
    KeyRef(KeyRefId),
}

impl From<SchemaId> for ResourceId {
    fn from(id: SchemaId) -> Self {
        ResourceId::Schema(id)
    }
}

impl From<TableId> for ResourceId {
    fn from(id: TableId) -> Self {
        ResourceId::Table(id)
    }
}

impl From<ColumnId> for ResourceId {
    fn from(id: ColumnId) -> Self {
        ResourceId::Column(id)
    }
}

impl From<UniqueId> for ResourceId {
    fn from(id: UniqueId) -> Self {
        ResourceId::Unique(id)
    }
}

impl From<ForeignKeyId> for ResourceId {
    fn from(id: ForeignKeyId) -> Self {
        ResourceId::ForeignKey(id)
    }
}

impl From<KeyRefId> for ResourceId {
    fn from(id: KeyRefId) -> Self {
        ResourceId::KeyRef(id)
    }
}

/// Frozen, order-independent column set used to key uniques and foreign keys
pub type ColumnSet = BTreeSet<ColumnId>;

/// Constraint identity: (schema name, constraint name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintName {
    pub schema: String,
    pub name: String,
}

impl ConstraintName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        ConstraintName {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ConstraintName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.name)
    }
}

/// Relation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Ordinary base table, the only writable kind
    Table,
    View,
    MaterializedView,
    Foreign,
}

impl TableKind {
    /// Parse the single-letter relkind code
    pub fn parse(code: &str) -> ErmResult<Self> {
        match code {
            "r" | "table" => Ok(TableKind::Table),
            "v" | "view" => Ok(TableKind::View),
            "m" => Ok(TableKind::MaterializedView),
            "f" => Ok(TableKind::Foreign),
            other => Err(ErmError::BadData(format!("unknown table kind \"{}\"", other))),
        }
    }
}

/// Referential action for delete/update of a referenced key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl RefAction {
    pub fn parse(s: &str) -> ErmResult<Self> {
        match s.to_uppercase().as_str() {
            "NO ACTION" => Ok(RefAction::NoAction),
            "RESTRICT" => Ok(RefAction::Restrict),
            "CASCADE" => Ok(RefAction::Cascade),
            "SET NULL" => Ok(RefAction::SetNull),
            "SET DEFAULT" => Ok(RefAction::SetDefault),
            _ => Err(ErmError::BadData(format!(
                "referential action \"{}\" not supported",
                s
            ))),
        }
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            RefAction::NoAction => "NO ACTION",
            RefAction::Restrict => "RESTRICT",
            RefAction::Cascade => "CASCADE",
            RefAction::SetNull => "SET NULL",
            RefAction::SetDefault => "SET DEFAULT",
        }
    }
}

/// Named namespace of tables
#[derive(Debug, Clone)]
pub struct Schema {
    pub id: SchemaId,
    pub name: String,
    pub comment: Option<String>,
    pub acls: Acl,
    pub annotations: Annotations,
    pub tables: BTreeMap<String, TableId>,
}

/// Table, view or other relation
#[derive(Debug, Clone)]
pub struct Table {
    pub id: TableId,
    pub schema: SchemaId,
    pub name: String,
    pub kind: TableKind,
    pub comment: Option<String>,
    pub acls: Acl,
    pub dynacls: Dynacls,
    pub annotations: Annotations,
    /// Columns in position order
    pub columns: Vec<ColumnId>,
    pub(crate) column_index: BTreeMap<String, ColumnId>,
    pub uniques: BTreeMap<ColumnSet, UniqueId>,
    pub fkeys: BTreeMap<ColumnSet, ForeignKeyId>,
    /// Key references where this table is the referencing side
    pub outbound: Vec<KeyRefId>,
    /// Key references where this table is the referenced side
    pub inbound: Vec<KeyRefId>,
}

impl Table {
    /// Column handle by name
    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.column_index.get(name).copied()
    }

    /// Whether rows may be written
    pub fn is_writable(&self) -> bool {
        self.kind == TableKind::Table
    }
}

/// Table column
#[derive(Debug, Clone)]
pub struct Column {
    pub id: ColumnId,
    pub table: TableId,
    pub name: String,
    pub position: usize,
    pub ctype: Type,
    pub nullok: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
    pub acls: Acl,
    pub dynacls: Dynacls,
    pub annotations: Annotations,
}

impl Column {
    /// Whether this is one of the managed system columns
    pub fn is_system(&self) -> bool {
        SYSTEM_COLUMNS.contains(&self.name.as_str())
    }

    /// Quoted column name
    pub fn sql_name(&self) -> String {
        quote_ident(&self.name)
    }
}

/// Unique key over a column set
#[derive(Debug, Clone)]
pub struct Unique {
    pub id: UniqueId,
    pub table: TableId,
    pub columns: ColumnSet,
    pub constraints: BTreeSet<ConstraintName>,
    pub comment: Option<String>,
    pub annotations: Annotations,
    /// Referencing table to the key references pointing at this key
    pub table_references: BTreeMap<TableId, BTreeSet<KeyRefId>>,
}

/// Referencing column set
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub id: ForeignKeyId,
    pub table: TableId,
    pub columns: ColumnSet,
    /// Referenced key to the key references using this column set
    pub references: BTreeMap<UniqueId, BTreeSet<KeyRefId>>,
    /// Referenced table to key references
    pub table_references: BTreeMap<TableId, BTreeSet<KeyRefId>>,
}

/// Directed reference from a foreign key to a unique key
#[derive(Debug, Clone)]
pub struct KeyReference {
    pub id: KeyRefId,
    pub foreign_key: ForeignKeyId,
    pub unique: UniqueId,
    /// (referencing column, referenced column), ordered by referencing column
    pub pairs: Vec<(ColumnId, ColumnId)>,
    pub constraints: BTreeSet<ConstraintName>,
    pub on_delete: RefAction,
    pub on_update: RefAction,
    pub comment: Option<String>,
    pub acls: Acl,
    pub dynacls: Dynacls,
    pub annotations: Annotations,
}

impl KeyReference {
    /// First constraint name, used in messages
    pub fn constraint_name(&self) -> Option<&ConstraintName> {
        self.constraints.iter().next()
    }

    /// Whether the reference carries the given constraint name
    pub fn has_constraint(&self, name: &ConstraintName) -> bool {
        self.constraints.contains(name)
    }
}

/// One catalog snapshot
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) catalog_id: String,
    pub(crate) version: u64,
    pub(crate) acls: Acl,
    pub(crate) annotations: Annotations,
    pub(crate) schemas: Vec<Schema>,
    pub(crate) schema_index: BTreeMap<String, SchemaId>,
    pub(crate) tables: Vec<Table>,
    pub(crate) columns: Vec<Column>,
    pub(crate) uniques: Vec<Unique>,
    pub(crate) fkeys: Vec<ForeignKey>,
    pub(crate) keyrefs: Vec<KeyReference>,
}

impl Model {
    /// Empty model for the given catalog and snapshot version
    pub fn new(catalog_id: impl Into<String>, version: u64) -> Self {
        Model {
            catalog_id: catalog_id.into(),
            version,
            acls: Acl::new(),
            annotations: Annotations::new(),
            schemas: Vec::new(),
            schema_index: BTreeMap::new(),
            tables: Vec::new(),
            columns: Vec::new(),
            uniques: Vec::new(),
            fkeys: Vec::new(),
            keyrefs: Vec::new(),
        }
    }

    pub fn catalog_id(&self) -> &str {
        &self.catalog_id
    }

    /// Structural snapshot version
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Entity tag for HTTP caching of model-derived responses
    pub fn etag(&self) -> String {
        format!("{}-{}", self.catalog_id, self.version)
    }

    pub fn acls(&self) -> &Acl {
        &self.acls
    }

    pub fn schema(&self, id: SchemaId) -> &Schema {
        &self.schemas[id.0]
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0]
    }

    pub fn column(&self, id: ColumnId) -> &Column {
        &self.columns[id.0]
    }

    pub fn unique(&self, id: UniqueId) -> &Unique {
        &self.uniques[id.0]
    }

    pub fn foreign_key(&self, id: ForeignKeyId) -> &ForeignKey {
        &self.fkeys[id.0]
    }

    pub fn keyref(&self, id: KeyRefId) -> &KeyReference {
        &self.keyrefs[id.0]
    }

    /// All schemas in name order
    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schema_index.values().map(move |id| self.schema(*id))
    }

    /// Schema by name; private schemas are not exposed
    pub fn schema_by_name(&self, name: &str) -> ErmResult<&Schema> {
        self.schema_index
            .get(name)
            .filter(|_| !is_private_schema(name))
            .map(|id| self.schema(*id))
            .ok_or_else(|| ErmError::ConflictModel(format!("Schema \"{}\" does not exist", name)))
    }

    /// Table by schema and table name
    pub fn table_by_name(&self, schema: &str, table: &str) -> ErmResult<&Table> {
        let s = self.schema_by_name(schema)?;
        s.tables
            .get(table)
            .map(|id| self.table(*id))
            .ok_or_else(|| {
                ErmError::ConflictModel(format!(
                    "Table \"{}\" does not exist in schema \"{}\"",
                    table, schema
                ))
            })
    }

    /// Column of a table by name
    pub fn column_by_name(&self, table: TableId, name: &str) -> ErmResult<&Column> {
        let t = self.table(table);
        t.column_id(name).map(|c| self.column(c)).ok_or_else(|| {
            ErmError::ConflictModel(format!(
                "Column \"{}\" does not exist in table \"{}\"",
                name, t.name
            ))
        })
    }

    /// Columns of a table in position order
    pub fn columns_of(&self, table: TableId) -> impl Iterator<Item = &Column> {
        self.table(table).columns.iter().map(move |c| self.column(*c))
    }

    /// Schema-qualified, quoted table name
    pub fn table_sql_name(&self, table: TableId) -> String {
        let t = self.table(table);
        qualified(&self.schema(t.schema).name, &t.name)
    }

    /// Human-readable `schema:table` name
    pub fn table_display(&self, table: TableId) -> String {
        let t = self.table(table);
        format!("{}:{}", self.schema(t.schema).name, t.name)
    }

    /// Human-readable name of any resource, for error messages
    pub fn resource_display(&self, res: ResourceId) -> String {
        match res {
            ResourceId::Model => "catalog".to_string(),
            ResourceId::Schema(s) => format!("schema {}", self.schema(s).name),
            ResourceId::Table(t) => format!("table {}", self.table_display(t)),
            ResourceId::Column(c) => {
                let col = self.column(c);
                format!("column {}:{}", self.table_display(col.table), col.name)
            }
            ResourceId::Unique(u) => format!("key on {}", self.table_display(self.unique(u).table)),
            ResourceId::ForeignKey(f) => {
                format!("foreign key on {}", self.table_display(self.foreign_key(f).table))
            }
            ResourceId::KeyRef(k) => match self.keyref(k).constraint_name() {
                Some(n) => format!("foreign key constraint {}", n),
                None => "foreign key constraint".to_string(),
            },
        }
    }

    /// Table on the referencing side of a key reference
    pub fn keyref_from_table(&self, k: KeyRefId) -> TableId {
        self.foreign_key(self.keyref(k).foreign_key).table
    }

    /// Table on the referenced side of a key reference
    pub fn keyref_to_table(&self, k: KeyRefId) -> TableId {
        self.unique(self.keyref(k).unique).table
    }

    /// Uniques of a table whose columns are all not-null, shortest first
    pub fn primary_keys(&self, table: TableId) -> Vec<UniqueId> {
        let mut keys: Vec<UniqueId> = self
            .table(table)
            .uniques
            .values()
            .copied()
            .filter(|u| self.is_primary_key(*u))
            .collect();
        keys.sort_by_key(|u| (self.unique(*u).columns.len(), *u));
        keys
    }

    /// Whether every column of the key is not-null
    pub fn is_primary_key(&self, u: UniqueId) -> bool {
        self.unique(u)
            .columns
            .iter()
            .all(|c| !self.column(*c).nullok)
    }

    /// Uniform access to resource ACL data
    pub fn rightful(&self, res: ResourceId) -> &dyn Rightful {
        match res {
            ResourceId::Model => self,
            ResourceId::Schema(s) => self.schema(s),
            ResourceId::Table(t) => self.table(t),
            ResourceId::Column(c) => self.column(c),
            ResourceId::Unique(u) => self.unique(u),
            ResourceId::ForeignKey(f) => self.foreign_key(f),
            ResourceId::KeyRef(k) => self.keyref(k),
        }
    }
}

const CATALOG_RIGHTS: &[Right] = &[
    Right::Owner,
    Right::Create,
    Right::Enumerate,
    Right::Write,
    Right::Insert,
    Right::Update,
    Right::Delete,
    Right::Select,
];
const TABLE_RIGHTS: &[Right] = &[
    Right::Owner,
    Right::Enumerate,
    Right::Write,
    Right::Insert,
    Right::Update,
    Right::Delete,
    Right::Select,
];
const COLUMN_RIGHTS: &[Right] = &[
    Right::Enumerate,
    Right::Write,
    Right::Insert,
    Right::Update,
    Right::Select,
];
const KEYREF_RIGHTS: &[Right] = &[Right::Write, Right::Insert, Right::Update, Right::Enumerate];
static NO_ACL: Acl = Acl::empty();

impl Rightful for Model {
    fn resource_id(&self) -> ResourceId {
        ResourceId::Model
    }
    fn acls(&self) -> &Acl {
        &self.acls
    }
    fn acl_parent(&self, _model: &Model) -> Option<ResourceId> {
        None
    }
    fn supported_rights(&self) -> &'static [Right] {
        CATALOG_RIGHTS
    }
    fn summary_rights(&self) -> &'static [Right] {
        &[Right::Owner, Right::Create]
    }
}

impl Rightful for Schema {
    fn resource_id(&self) -> ResourceId {
        ResourceId::Schema(self.id)
    }
    fn acls(&self) -> &Acl {
        &self.acls
    }
    fn acl_parent(&self, _model: &Model) -> Option<ResourceId> {
        Some(ResourceId::Model)
    }
    fn supported_rights(&self) -> &'static [Right] {
        CATALOG_RIGHTS
    }
    fn summary_rights(&self) -> &'static [Right] {
        &[Right::Owner, Right::Create]
    }
}

impl Rightful for Table {
    fn resource_id(&self) -> ResourceId {
        ResourceId::Table(self.id)
    }
    fn acls(&self) -> &Acl {
        &self.acls
    }
    fn dynacls(&self) -> Option<&Dynacls> {
        Some(&self.dynacls)
    }
    fn acl_parent(&self, _model: &Model) -> Option<ResourceId> {
        Some(ResourceId::Schema(self.schema))
    }
    fn supported_rights(&self) -> &'static [Right] {
        TABLE_RIGHTS
    }
    fn summary_rights(&self) -> &'static [Right] {
        &[Right::Owner, Right::Insert, Right::Update, Right::Delete, Right::Select]
    }
}

impl Rightful for Column {
    fn resource_id(&self) -> ResourceId {
        ResourceId::Column(self.id)
    }
    fn acls(&self) -> &Acl {
        &self.acls
    }
    fn dynacls(&self) -> Option<&Dynacls> {
        Some(&self.dynacls)
    }
    fn acl_parent(&self, _model: &Model) -> Option<ResourceId> {
        Some(ResourceId::Table(self.table))
    }
    fn supported_rights(&self) -> &'static [Right] {
        COLUMN_RIGHTS
    }
    fn summary_rights(&self) -> &'static [Right] {
        &[Right::Insert, Right::Update, Right::Select, Right::Delete]
    }
}

impl Rightful for Unique {
    fn resource_id(&self) -> ResourceId {
        ResourceId::Unique(self.id)
    }
    fn acls(&self) -> &Acl {
        &NO_ACL
    }
    fn acl_parent(&self, _model: &Model) -> Option<ResourceId> {
        Some(ResourceId::Table(self.table))
    }
    fn supported_rights(&self) -> &'static [Right] {
        &[]
    }
    fn summary_rights(&self) -> &'static [Right] {
        &[]
    }
}

impl Rightful for ForeignKey {
    fn resource_id(&self) -> ResourceId {
        ResourceId::ForeignKey(self.id)
    }
    fn acls(&self) -> &Acl {
        &NO_ACL
    }
    fn acl_parent(&self, _model: &Model) -> Option<ResourceId> {
        Some(ResourceId::Table(self.table))
    }
    fn supported_rights(&self) -> &'static [Right] {
        &[]
    }
    fn summary_rights(&self) -> &'static [Right] {
        &[]
    }
}

impl Rightful for KeyReference {
    fn resource_id(&self) -> ResourceId {
        ResourceId::KeyRef(self.id)
    }
    fn acls(&self) -> &Acl {
        &self.acls
    }
    fn dynacls(&self) -> Option<&Dynacls> {
        Some(&self.dynacls)
    }
    fn acl_parent(&self, model: &Model) -> Option<ResourceId> {
        Some(ResourceId::Table(model.foreign_key(self.foreign_key).table))
    }
    fn anon_mutation_ok(&self) -> bool {
        true
    }
    fn supported_rights(&self) -> &'static [Right] {
        KEYREF_RIGHTS
    }
    fn summary_rights(&self) -> &'static [Right] {
        &[Right::Insert, Right::Update]
    }
}

impl Annotatable for Model {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }
}

impl Annotatable for Schema {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }
}

impl Annotatable for Table {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }
}

impl Annotatable for Column {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }
}

impl Annotatable for Unique {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }
}

impl Annotatable for KeyReference {
    fn annotations(&self) -> &Annotations {
        &self.annotations
    }
}
