//! Relation expansion for materialized row batches.
//!
//! Foreign-key-shaped columns are resolved after the permission
//! decision: internal ids are rewritten to reference ids, included
//! related rows are attached per row, and `cloud_store` columns are
//! decoded and optionally hydrated from the local sync folder. A
//! column that fails to resolve is logged and skipped; the batch's
//! row count never changes.

use std::collections::{HashMap, HashSet};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::refid::{value_as_internal_id, RefIdCache};
use crate::resource::DataResource;
use crate::schema::{ColumnInfo, ColumnType, DataSource, ForeignKeyData, TableInfo, TYPE_COLUMN};
use crate::store::Row;

/// Primary storage layout for timestamp columns.
const DATE_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Which relation namespaces to embed during expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeSet {
    None,
    All,
    Named(HashSet<String>),
}

impl IncludeSet {
    pub fn named(names: &[&str]) -> Self {
        IncludeSet::Named(names.iter().map(|s| s.to_string()).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            IncludeSet::None => false,
            IncludeSet::All => true,
            IncludeSet::Named(set) => set.contains(name),
        }
    }
}

/// Parse a stored timestamp, trying the primary layout first and
/// RFC 3339 second. Returns the normalized RFC 3339 form.
pub(crate) fn coerce_datetime(raw: &str) -> Option<String> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, DATE_LAYOUT) {
        let utc: DateTime<Utc> = DateTime::from_naive_utc_and_offset(naive, Utc);
        return Some(utc.to_rfc3339());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.to_rfc3339())
}

fn rows_to_value(rows: &[Row]) -> Value {
    Value::Array(
        rows.iter()
            .map(|r| Value::Object(r.clone().into_iter().collect()))
            .collect(),
    )
}

/// Request-scoped cache of already-fetched related objects, keyed by
/// (namespace, internal id). Many rows sharing one related object
/// fetch it once.
type RelationCache = HashMap<(String, i64), Row>;

impl DataResource {
    /// Expand a batch of rows.
    ///
    /// Returns the same number of rows it was given, each paired with
    /// the related objects embedded for it. Column-level failures are
    /// logged and skipped; only a storage failure aborts.
    pub fn expand_rows(
        &self,
        mut rows: Vec<Row>,
        table: &TableInfo,
        include: &IncludeSet,
    ) -> Result<(Vec<Row>, Vec<Vec<Row>>)> {
        let mut refids = RefIdCache::new();
        let mut objects = RelationCache::new();
        let mut includes = Vec::with_capacity(rows.len());

        for row in rows.iter_mut() {
            let mut local = Vec::new();

            for column in &table.columns {
                let current = match row.get(&column.column_name) {
                    Some(v) if !v.is_null() => v.clone(),
                    _ => continue,
                };

                if column.column_type == ColumnType::DateTime {
                    coerce_datetime_column(row, column, &current);
                    continue;
                }

                if !column.is_foreign_key {
                    continue;
                }
                if matches!(&current, Value::String(s) if s.is_empty()) {
                    continue;
                }
                let Some(fk) = &column.foreign_key else {
                    continue;
                };

                match fk.data_source {
                    DataSource::SelfReferenced => self.expand_self_column(
                        row,
                        column,
                        fk,
                        &current,
                        include,
                        &mut refids,
                        &mut objects,
                        &mut local,
                    )?,
                    DataSource::CloudStore => self.expand_cloud_column(
                        row,
                        &table.table_name,
                        column,
                        fk,
                        &current,
                        include,
                        &mut local,
                    ),
                    DataSource::Unknown => {
                        warn!(
                            column = column.column_name,
                            "undefined foreign key data source, skipping column"
                        );
                    }
                }
            }

            includes.push(local);
        }

        Ok((rows, includes))
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_self_column(
        &self,
        row: &mut Row,
        column: &ColumnInfo,
        fk: &ForeignKeyData,
        current: &Value,
        include: &IncludeSet,
        refids: &mut RefIdCache,
        objects: &mut RelationCache,
        local: &mut Vec<Row>,
    ) -> Result<()> {
        let Some(target_id) = value_as_internal_id(current) else {
            warn!(
                column = column.column_name,
                value = %current,
                "foreign key value is not an internal id, skipping column"
            );
            return Ok(());
        };

        // Internal ids never leave the data layer.
        match self.reference_id_cached(refids, &fk.namespace, target_id) {
            Ok(refid) => {
                row.insert(
                    column.column_name.clone(),
                    Value::from(refid.as_str()),
                );
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    namespace = fk.namespace,
                    target_id, "foreign key target has no reference id"
                );
            }
            Err(e) => return Err(e),
        }

        if include.contains(&fk.namespace) {
            let key = (fk.namespace.clone(), target_id);
            if let Some(cached) = objects.get(&key) {
                local.push(cached.clone());
                return Ok(());
            }
            match self.get_id_to_object(&fk.namespace, target_id) {
                Ok(obj) => {
                    objects.insert(key, obj.clone());
                    local.push(obj);
                }
                Err(e) if e.is_not_found() => {
                    debug!(
                        namespace = fk.namespace,
                        target_id, "related object missing, dropped from include list"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn expand_cloud_column(
        &self,
        row: &mut Row,
        table_name: &str,
        column: &ColumnInfo,
        fk: &ForeignKeyData,
        current: &Value,
        include: &IncludeSet,
        local: &mut Vec<Row>,
    ) {
        let mut files: Vec<Row> = match current {
            Value::String(encoded) => match serde_json::from_str(encoded) {
                Ok(files) => files,
                Err(e) => {
                    warn!(
                        column = column.column_name,
                        error = %e,
                        "unparsable file descriptor list, skipping column"
                    );
                    return;
                }
            },
            Value::Array(_) => match serde_json::from_value(current.clone()) {
                Ok(files) => files,
                Err(e) => {
                    warn!(
                        column = column.column_name,
                        error = %e,
                        "file descriptor list has non-object entries, skipping column"
                    );
                    return;
                }
            },
            _ => {
                warn!(
                    column = column.column_name,
                    "unexpected file descriptor encoding, skipping column"
                );
                return;
            }
        };

        for file in files.iter_mut() {
            if let Some(name) = file.get("name").and_then(Value::as_str).map(str::to_string) {
                file.insert("src".to_string(), Value::from(name));
            }
        }
        row.insert(column.column_name.clone(), rows_to_value(&files));

        if !(include.contains(&fk.namespace) || include.contains(&column.column_name)) {
            return;
        }

        let Some(folder) = self.asset_folder(table_name, &column.column_name) else {
            warn!(
                table = table_name,
                column = column.column_name,
                "not a synced folder, returning descriptors without contents"
            );
            return;
        };

        let mut hydrated = Vec::new();
        for file in files {
            let Some(src) = file.get("src").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let path = folder.local_sync_path.join(&src);
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let mut item = file.clone();
                    if let Some(name) = file.get("name").cloned() {
                        item.insert("reference_id".to_string(), name);
                    }
                    item.insert("contents".to_string(), Value::from(BASE64.encode(bytes)));
                    item.insert(TYPE_COLUMN.to_string(), Value::from(fk.namespace.as_str()));
                    hydrated.push(item);
                }
                Err(e) => {
                    // Unreadable descriptors are dropped, not fatal.
                    warn!(path = %path.display(), error = %e, "failed to read synced file");
                }
            }
        }
        row.insert(column.column_name.clone(), rows_to_value(&hydrated));
        local.extend(hydrated);
    }
}

fn coerce_datetime_column(row: &mut Row, column: &ColumnInfo, current: &Value) {
    let Value::String(raw) = current else {
        return;
    };
    match coerce_datetime(raw) {
        Some(normalized) => {
            row.insert(column.column_name.clone(), Value::from(normalized));
        }
        None => {
            debug!(
                column = column.column_name,
                value = %raw,
                "unparsable timestamp, nulling field"
            );
            row.insert(column.column_name.clone(), Value::Null);
        }
    }
}
