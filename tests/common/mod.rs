//! Shared fixture: an in-memory deployment with a user table, groups,
//! a `book` content table with its audit and group-join tables, and
//! the table/action metadata registry.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use rowgate::{
    join_tables_for, AuthPermission, ColumnInfo, ColumnType, DataResource, GroupPermission, Insert,
    MemoryStore, ReferenceId, Relation, Row, SchemaRegistry, Storage, TableInfo,
    ACTION_NAME_COLUMN, ACTION_TABLE, DEFAULT_PERMISSION_COLUMN, PERMISSION_COLUMN,
    REFERENCE_ID_COLUMN, TABLE_INFO_ID_COLUMN, TABLE_INFO_TABLE, TABLE_NAME_COLUMN,
    USERGROUP_TABLE, USER_ACCOUNT_TABLE,
};

pub fn registry() -> SchemaRegistry {
    let mut schema = SchemaRegistry::new();
    schema.register(
        TableInfo::new(USER_ACCOUNT_TABLE)
            .with_standard_columns()
            .column(ColumnInfo::new("email", ColumnType::Text))
            .column(ColumnInfo::new("password", ColumnType::Text))
            .with_usergroup_relation(),
    );
    schema.register(
        TableInfo::new(USERGROUP_TABLE)
            .with_standard_columns()
            .column(ColumnInfo::new("name", ColumnType::Text))
            .with_default_permission(AuthPermission::DEFAULT_PERMISSION),
    );
    schema.register(
        TableInfo::new("book")
            .with_standard_columns()
            .column(ColumnInfo::new("title", ColumnType::Text))
            .column(ColumnInfo::new("published_at", ColumnType::DateTime))
            .column(ColumnInfo::new("cover", ColumnType::Json).stored_in("localstore", "cover"))
            .with_usergroup_relation(),
    );
    schema.register(TableInfo::new("book_audit").with_standard_columns());
    schema.register(
        TableInfo::new(TABLE_INFO_TABLE)
            .with_standard_columns()
            .column(ColumnInfo::new(TABLE_NAME_COLUMN, ColumnType::Text))
            .column(ColumnInfo::new(DEFAULT_PERMISSION_COLUMN, ColumnType::Integer))
            .with_usergroup_relation(),
    );
    schema.register(
        TableInfo::new(ACTION_TABLE)
            .with_standard_columns()
            .column(ColumnInfo::new(ACTION_NAME_COLUMN, ColumnType::Text))
            .column(ColumnInfo::new("label", ColumnType::Text))
            .column(ColumnInfo::new("instance_optional", ColumnType::Integer))
            .column(ColumnInfo::new("action_schema", ColumnType::Text))
            .column(ColumnInfo::new(TABLE_INFO_ID_COLUMN, ColumnType::Integer))
            .with_usergroup_relation(),
    );
    schema
}

pub fn resource() -> DataResource {
    resource_with(registry())
}

pub fn resource_with(schema: SchemaRegistry) -> DataResource {
    let store = Arc::new(MemoryStore::new());
    let schema = Arc::new(schema);
    for table in schema.tables() {
        store.create_table(table).unwrap();
        for join in join_tables_for(table) {
            store.create_table(&join).unwrap();
        }
    }
    DataResource::new(store, schema)
}

pub fn insert_user(resource: &DataResource, email: &str) -> (i64, ReferenceId) {
    let refid = ReferenceId::new();
    let mut row = Row::new();
    row.insert("email".into(), json!(email));
    row.insert(REFERENCE_ID_COLUMN.into(), json!(refid.as_str()));
    row.insert(
        PERMISSION_COLUMN.into(),
        Value::from(AuthPermission::DEFAULT_PERMISSION.0),
    );
    let id = resource.direct_insert(USER_ACCOUNT_TABLE, row).unwrap();
    (id, refid)
}

pub fn insert_group(resource: &DataResource, name: &str) -> (i64, ReferenceId) {
    let refid = ReferenceId::new();
    let mut row = Row::new();
    row.insert("name".into(), json!(name));
    row.insert(REFERENCE_ID_COLUMN.into(), json!(refid.as_str()));
    row.insert(
        PERMISSION_COLUMN.into(),
        Value::from(AuthPermission::DEFAULT_PERMISSION.0),
    );
    let id = resource.direct_insert(USERGROUP_TABLE, row).unwrap();
    (id, refid)
}

/// Link a subject row into a group by writing the association row.
pub fn link_to_group(
    resource: &DataResource,
    subject_table: &str,
    subject_id: i64,
    group_id: i64,
    mask: AuthPermission,
) -> ReferenceId {
    let relation = Relation::many_to_many(subject_table, USERGROUP_TABLE);
    let refid = ReferenceId::new();
    let mut row = Row::new();
    row.insert(relation.subject_column.clone(), Value::from(subject_id));
    row.insert(relation.object_column.clone(), Value::from(group_id));
    row.insert(REFERENCE_ID_COLUMN.into(), json!(refid.as_str()));
    row.insert(PERMISSION_COLUMN.into(), Value::from(mask.0));
    resource
        .store()
        .insert(&Insert::new(&relation.join_table, row))
        .unwrap();
    refid
}

pub fn insert_book(
    resource: &DataResource,
    title: &str,
    owner: Option<i64>,
    mask: AuthPermission,
) -> (i64, ReferenceId) {
    let refid = ReferenceId::new();
    let mut row = Row::new();
    row.insert("title".into(), json!(title));
    row.insert(REFERENCE_ID_COLUMN.into(), json!(refid.as_str()));
    row.insert(PERMISSION_COLUMN.into(), Value::from(mask.0));
    if let Some(owner) = owner {
        row.insert("user_account_id".into(), Value::from(owner));
    }
    let id = resource.direct_insert("book", row).unwrap();
    (id, refid)
}

/// The caller's own memberships, as the permission check consumes them.
pub fn memberships(resource: &DataResource, user_id: i64) -> Vec<GroupPermission> {
    resource
        .groups_for_object(USER_ACCOUNT_TABLE, user_id)
        .unwrap()
}

pub fn insert_table_metadata(resource: &DataResource, table_name: &str) -> i64 {
    let mut row = Row::new();
    row.insert(TABLE_NAME_COLUMN.into(), json!(table_name));
    row.insert(REFERENCE_ID_COLUMN.into(), json!(ReferenceId::new().as_str()));
    row.insert(
        PERMISSION_COLUMN.into(),
        Value::from(AuthPermission::GUEST_ALL.0),
    );
    row.insert(
        DEFAULT_PERMISSION_COLUMN.into(),
        Value::from(AuthPermission::GUEST_ALL.0),
    );
    resource.direct_insert(TABLE_INFO_TABLE, row).unwrap()
}

pub fn insert_action(
    resource: &DataResource,
    table_info_id: i64,
    name: &str,
    label: &str,
    mask: AuthPermission,
) -> ReferenceId {
    let refid = ReferenceId::new();
    let mut row = Row::new();
    row.insert(ACTION_NAME_COLUMN.into(), json!(name));
    row.insert("label".into(), json!(label));
    row.insert(REFERENCE_ID_COLUMN.into(), json!(refid.as_str()));
    row.insert(PERMISSION_COLUMN.into(), Value::from(mask.0));
    row.insert(TABLE_INFO_ID_COLUMN.into(), Value::from(table_info_id));
    resource.direct_insert(ACTION_TABLE, row).unwrap();
    refid
}
