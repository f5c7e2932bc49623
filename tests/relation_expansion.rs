//! Relation expansion: reference id rewriting, included objects,
//! timestamp normalization, and cloud-store hydration.

mod common;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use common::{insert_book, insert_user, resource, resource_with};
use rowgate::{
    AssetFolder, AuthPermission, ColumnInfo, ColumnType, DataSource, Filter, ForeignKeyData,
    IncludeSet, Row, TableInfo, TYPE_COLUMN, USER_ACCOUNT_TABLE,
};

#[test]
fn owner_column_is_rewritten_to_a_reference_id() {
    let resource = resource();
    let (owner_id, owner_ref) = insert_user(&resource, "owner@example.com");
    let (book_id, _) = insert_book(&resource, "dune", Some(owner_id), AuthPermission::GUEST_READ);

    let (rows, includes) = resource
        .get_rows_where("book", vec![Filter::eq("id", Value::from(book_id))])
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["user_account_id"], json!(owner_ref.as_str()));

    // The owner row rides along, stamped with its type.
    let attached = includes[0]
        .iter()
        .find(|r| r.get(TYPE_COLUMN) == Some(&json!(USER_ACCOUNT_TABLE)))
        .unwrap();
    assert_eq!(attached["email"], json!("owner@example.com"));
}

#[test]
fn include_none_still_rewrites_but_attaches_nothing() {
    let resource = resource();
    let (owner_id, owner_ref) = insert_user(&resource, "owner@example.com");
    insert_book(&resource, "dune", Some(owner_id), AuthPermission::GUEST_READ);

    let info = resource.schema().get("book").cloned().unwrap();
    let rows = resource.get_all_objects("book").unwrap();
    let (rows, includes) = resource
        .expand_rows(rows, &info, &IncludeSet::None)
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["user_account_id"], json!(owner_ref.as_str()));
    assert!(includes[0].is_empty());
}

#[test]
fn dangling_foreign_key_keeps_the_row_and_drops_the_include() {
    let resource = resource();
    insert_user(&resource, "owner@example.com");
    let (book_id, _) = insert_book(&resource, "orphaned", Some(404), AuthPermission::GUEST_READ);

    let (rows, includes) = resource
        .get_rows_where("book", vec![Filter::eq("id", Value::from(book_id))])
        .unwrap();

    // The batch keeps its shape; the untranslatable value is left as is.
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["user_account_id"], json!(404));
    assert!(includes[0].is_empty());
}

#[test]
fn timestamps_are_normalized_and_garbage_is_nulled() {
    let resource = resource();
    let (owner_id, _) = insert_user(&resource, "owner@example.com");

    let mut row = Row::new();
    row.insert("title".into(), json!("dated"));
    row.insert("user_account_id".into(), Value::from(owner_id));
    row.insert("published_at".into(), json!("2024-03-01 10:30:00"));
    let id = resource.direct_insert("book", row).unwrap();

    let (rows, _) = resource
        .get_rows_where("book", vec![Filter::eq("id", Value::from(id))])
        .unwrap();
    assert_eq!(rows[0]["published_at"], json!("2024-03-01T10:30:00+00:00"));

    // Write garbage past the insert-time coercion, straight to storage.
    let info = resource.schema().get("book").cloned().unwrap();
    let mut raw = resource.get_all_raw_objects("book").unwrap();
    raw[0].insert("published_at".into(), json!("not a date"));
    let (rows, _) = resource
        .expand_rows(raw, &info, &IncludeSet::None)
        .unwrap();
    assert_eq!(rows[0]["published_at"], Value::Null);
}

#[test]
fn cloud_store_descriptors_decode_without_a_synced_folder() {
    let resource = resource();
    let (owner_id, _) = insert_user(&resource, "owner@example.com");

    let descriptors = json!([{"name": "cover.png", "type": "image/png"}]).to_string();
    let mut row = Row::new();
    row.insert("title".into(), json!("illustrated"));
    row.insert("user_account_id".into(), Value::from(owner_id));
    row.insert("cover".into(), json!(descriptors));
    let id = resource.direct_insert("book", row).unwrap();

    let (rows, includes) = resource
        .get_rows_where("book", vec![Filter::eq("id", Value::from(id))])
        .unwrap();

    let cover = rows[0]["cover"].as_array().unwrap();
    assert_eq!(cover.len(), 1);
    assert_eq!(cover[0]["src"], json!("cover.png"));
    assert!(cover[0].get("contents").is_none());
    // Without a registered folder nothing is hydrated into the includes.
    assert!(includes[0]
        .iter()
        .all(|r| r.get(TYPE_COLUMN) != Some(&json!("localstore"))));
}

#[test]
fn cloud_store_hydration_reads_the_synced_folder() {
    let mut resource = resource();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("cover.png"), b"fake-png-bytes").unwrap();
    resource.register_asset_folder(
        "book",
        "cover",
        AssetFolder {
            local_sync_path: dir.path().to_path_buf(),
        },
    );

    let (owner_id, _) = insert_user(&resource, "owner@example.com");
    let descriptors =
        json!([{"name": "cover.png"}, {"name": "missing.png"}]).to_string();
    let mut row = Row::new();
    row.insert("title".into(), json!("illustrated"));
    row.insert("user_account_id".into(), Value::from(owner_id));
    row.insert("cover".into(), json!(descriptors));
    let id = resource.direct_insert("book", row).unwrap();

    let (rows, includes) = resource
        .get_rows_where("book", vec![Filter::eq("id", Value::from(id))])
        .unwrap();

    // The unreadable descriptor is dropped; the readable one carries
    // its contents and is typed with the store namespace.
    let cover = rows[0]["cover"].as_array().unwrap();
    assert_eq!(cover.len(), 1);
    assert_eq!(cover[0]["reference_id"], json!("cover.png"));
    assert_eq!(cover[0]["contents"], json!(BASE64.encode(b"fake-png-bytes")));
    assert_eq!(cover[0][TYPE_COLUMN], json!("localstore"));

    assert!(includes[0]
        .iter()
        .any(|r| r.get(TYPE_COLUMN) == Some(&json!("localstore"))));
}

#[test]
fn unrecognized_data_source_leaves_the_column_alone() {
    let mut schema = common::registry();
    schema.register(
        TableInfo::new("widget").with_standard_columns().column(
            ColumnInfo::new("widget_id", ColumnType::Integer).with_foreign_key(ForeignKeyData {
                data_source: DataSource::Unknown,
                namespace: "widget".into(),
                key_name: "id".into(),
            }),
        ),
    );
    let resource = resource_with(schema);

    let mut row = Row::new();
    row.insert("widget_id".into(), Value::from(17));
    let id = resource.direct_insert("widget", row).unwrap();

    let info = resource.schema().get("widget").cloned().unwrap();
    let rows = resource.get_all_objects("widget").unwrap();
    let (rows, includes) = resource.expand_rows(rows, &info, &IncludeSet::All).unwrap();

    // The resolver has no strategy for the column, so the row passes
    // through with the raw value and nothing attached.
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], Value::from(id));
    assert_eq!(rows[0]["widget_id"], Value::from(17));
    assert!(includes[0].is_empty());
}

#[test]
fn single_row_lookup_returns_the_expanded_row_with_its_includes() {
    let resource = resource();
    let (owner_id, owner_ref) = insert_user(&resource, "owner@example.com");
    let (_, book_ref) = insert_book(&resource, "dune", Some(owner_id), AuthPermission::GUEST_READ);

    let (row, includes) = resource
        .get_single_row_by_reference_id("book", &book_ref)
        .unwrap();
    assert_eq!(row["user_account_id"], json!(owner_ref.as_str()));
    assert!(!includes.is_empty());

    let err = resource
        .get_single_row_by_reference_id("book", &rowgate::ReferenceId::from("nope"))
        .unwrap_err();
    assert!(err.is_not_found());
}
