//! Runtime table metadata: columns, foreign-key descriptors, relations.
//!
//! Tables are defined at runtime, so the registry is data, not types.
//! Many-to-many relations are resolved once at registration time into
//! explicit [`Relation`] descriptors instead of being re-derived by
//! string concatenation on every call; the generated names still follow
//! the `{subject}_{subject}_id_has_{object}_{object}_id` convention so
//! existing datasets keep working.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::caps::AuthPermission;

pub const ID_COLUMN: &str = "id";
pub const REFERENCE_ID_COLUMN: &str = "reference_id";
pub const PERMISSION_COLUMN: &str = "permission";
pub const DEFAULT_PERMISSION_COLUMN: &str = "default_permission";
/// Synthetic column stamped onto materialized rows with their type name.
pub const TYPE_COLUMN: &str = "__type";

pub const USER_ACCOUNT_TABLE: &str = "user_account";
pub const USER_ACCOUNT_ID_COLUMN: &str = "user_account_id";
pub const USERGROUP_TABLE: &str = "usergroup";
pub const ADMINISTRATORS_GROUP: &str = "administrators";

/// Table holding one metadata row per registered table.
pub const TABLE_INFO_TABLE: &str = "table_info";
pub const TABLE_NAME_COLUMN: &str = "table_name";
/// Table holding one metadata row per declared action.
pub const ACTION_TABLE: &str = "action";
pub const ACTION_NAME_COLUMN: &str = "action_name";
pub const TABLE_INFO_ID_COLUMN: &str = "table_info_id";
pub const SIGNIN_ACTION: &str = "signin";

/// Infix marker of generated association tables.
pub const JOIN_TABLE_INFIX: &str = "_has_";
pub const AUDIT_SUFFIX: &str = "_audit";

/// Is this type name a generated association table?
#[inline]
pub fn is_join_table(type_name: &str) -> bool {
    type_name.contains(JOIN_TABLE_INFIX)
}

/// Resolution strategy for a foreign-key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// The column references a row in another registered table.
    #[serde(rename = "self")]
    SelfReferenced,
    /// The column holds a JSON list of file descriptors backed by a
    /// synced store.
    CloudStore,
    /// Anything else; resolvers skip the column instead of failing.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyData {
    pub data_source: DataSource,
    /// Target table or store name.
    pub namespace: String,
    pub key_name: String,
}

/// Semantic column type. Timestamp columns get coerced during
/// materialization; everything else passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    DateTime,
    Json,
    Blob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub column_type: ColumnType,
    pub is_foreign_key: bool,
    pub foreign_key: Option<ForeignKeyData>,
}

impl ColumnInfo {
    pub fn new(column_name: &str, column_type: ColumnType) -> Self {
        Self {
            column_name: column_name.to_string(),
            column_type,
            is_foreign_key: false,
            foreign_key: None,
        }
    }

    /// Mark the column as referencing a row in another table.
    pub fn references(mut self, namespace: &str, key_name: &str) -> Self {
        self.is_foreign_key = true;
        self.foreign_key = Some(ForeignKeyData {
            data_source: DataSource::SelfReferenced,
            namespace: namespace.to_string(),
            key_name: key_name.to_string(),
        });
        self
    }

    /// Mark the column as holding file descriptors in a cloud store.
    pub fn stored_in(mut self, namespace: &str, key_name: &str) -> Self {
        self.is_foreign_key = true;
        self.foreign_key = Some(ForeignKeyData {
            data_source: DataSource::CloudStore,
            namespace: namespace.to_string(),
            key_name: key_name.to_string(),
        });
        self
    }

    pub fn with_foreign_key(mut self, data: ForeignKeyData) -> Self {
        self.is_foreign_key = true;
        self.foreign_key = Some(data);
        self
    }
}

/// Explicit many-to-many relation descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub subject: String,
    pub object: String,
    pub join_table: String,
    pub subject_column: String,
    pub object_column: String,
}

impl Relation {
    /// Build the conventional descriptor for `subject has-many object`.
    pub fn many_to_many(subject: &str, object: &str) -> Self {
        Self {
            subject: subject.to_string(),
            object: object.to_string(),
            join_table: format!("{subject}_{subject}_id{JOIN_TABLE_INFIX}{object}_{object}_id"),
            subject_column: format!("{subject}_id"),
            object_column: format!("{object}_id"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub default_permission: AuthPermission,
    pub relations: Vec<Relation>,
}

impl TableInfo {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            columns: Vec::new(),
            default_permission: AuthPermission::NONE,
            relations: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    /// Add the id, reference id, permission and owner columns every
    /// user-facing table carries.
    pub fn with_standard_columns(self) -> Self {
        self.column(ColumnInfo::new(ID_COLUMN, ColumnType::Integer))
            .column(ColumnInfo::new(REFERENCE_ID_COLUMN, ColumnType::Text))
            .column(ColumnInfo::new(PERMISSION_COLUMN, ColumnType::Integer))
            .column(
                ColumnInfo::new(USER_ACCOUNT_ID_COLUMN, ColumnType::Integer)
                    .references(USER_ACCOUNT_TABLE, ID_COLUMN),
            )
    }

    pub fn with_default_permission(mut self, permission: AuthPermission) -> Self {
        self.default_permission = permission;
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Register the conventional `has-many usergroup` relation.
    pub fn with_usergroup_relation(self) -> Self {
        let rel = Relation::many_to_many(&self.table_name, USERGROUP_TABLE);
        self.relation(rel)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.column_name == name)
    }

    pub fn column_info(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.column_name == name)
    }

    /// Does a named has-many relation to `object` exist?
    pub fn has_many(&self, object: &str) -> bool {
        self.relation_to(object).is_some()
    }

    pub fn relation_to(&self, object: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.object == object)
    }

    pub fn is_audit(&self) -> bool {
        self.table_name.ends_with(AUDIT_SUFFIX)
    }

    pub fn is_join_table(&self) -> bool {
        is_join_table(&self.table_name)
    }
}

/// Per-table model registry.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableInfo>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, replacing any previous definition of the
    /// same name. Registering an association table for a relation is
    /// the caller's responsibility; [`join_tables_for`] helps.
    pub fn register(&mut self, table: TableInfo) {
        self.tables.insert(table.table_name.clone(), table);
    }

    pub fn get(&self, table_name: &str) -> Option<&TableInfo> {
        self.tables.get(table_name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    /// The relation linking `object_type` to usergroup, if registered.
    pub fn group_relation(&self, object_type: &str) -> Option<&Relation> {
        self.tables
            .get(object_type)
            .and_then(|t| t.relation_to(USERGROUP_TABLE))
    }
}

/// Build the bare [`TableInfo`] for every join table a table's
/// relations imply, so backends can create them.
pub fn join_tables_for(table: &TableInfo) -> Vec<TableInfo> {
    table
        .relations
        .iter()
        .map(|rel| {
            TableInfo::new(&rel.join_table)
                .column(ColumnInfo::new(ID_COLUMN, ColumnType::Integer))
                .column(ColumnInfo::new(REFERENCE_ID_COLUMN, ColumnType::Text))
                .column(ColumnInfo::new(PERMISSION_COLUMN, ColumnType::Integer))
                .column(ColumnInfo::new(&rel.subject_column, ColumnType::Integer))
                .column(ColumnInfo::new(&rel.object_column, ColumnType::Integer))
        })
        .collect()
}
