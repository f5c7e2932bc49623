//! The `DataResource` handle and its row/lookup utilities.
//!
//! A `DataResource` owns nothing but handles: a storage backend and
//! the schema registry. It keeps no per-call state, so one instance
//! serves any number of concurrent requests; the only caches in the
//! engine are the explicitly request-scoped ones created inside
//! relation expansion.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::refid::ReferenceId;
use crate::resolve::coerce_datetime;
use crate::schema::{
    ColumnType, SchemaRegistry, TableInfo, ID_COLUMN, REFERENCE_ID_COLUMN, TYPE_COLUMN,
    USERGROUP_TABLE, USER_ACCOUNT_TABLE,
};
use crate::store::{Delete, Filter, Insert, Row, Select, Storage};

/// Local sync location for one `cloud_store` column.
#[derive(Debug, Clone)]
pub struct AssetFolder {
    pub local_sync_path: PathBuf,
}

/// Entry point for everything in this crate that touches storage.
pub struct DataResource {
    store: Arc<dyn Storage>,
    schema: Arc<SchemaRegistry>,
    assets: HashMap<(String, String), AssetFolder>,
    pub(crate) admin_lock: Mutex<()>,
}

impl DataResource {
    pub fn new(store: Arc<dyn Storage>, schema: Arc<SchemaRegistry>) -> Self {
        Self {
            store,
            schema,
            assets: HashMap::new(),
            admin_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &dyn Storage {
        self.store.as_ref()
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Register the local sync path backing a `cloud_store` column.
    pub fn register_asset_folder(&mut self, table: &str, column: &str, folder: AssetFolder) {
        self.assets
            .insert((table.to_string(), column.to_string()), folder);
    }

    pub(crate) fn asset_folder(&self, table: &str, column: &str) -> Option<&AssetFolder> {
        self.assets.get(&(table.to_string(), column.to_string()))
    }

    pub(crate) fn table_info(&self, table: &str) -> Result<&TableInfo> {
        self.schema
            .get(table)
            .ok_or_else(|| Error::Config(format!("unregistered table [{table}]")))
    }

    /// Run a select and stamp each row with its type name.
    pub(crate) fn fetch_rows(&self, query: &Select) -> Result<Vec<Row>> {
        let mut rows = self.store.select(query)?;
        for row in rows.iter_mut() {
            row.insert(TYPE_COLUMN.to_string(), Value::from(query.table.as_str()));
        }
        Ok(rows)
    }

    /// Load a row by internal id.
    pub fn get_id_to_object(&self, table: &str, id: i64) -> Result<Row> {
        let rows =
            self.fetch_rows(&Select::new(table).filter(Filter::eq(ID_COLUMN, Value::from(id))))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::not_found(table, id))
    }

    /// Load a row by reference id.
    pub fn get_reference_id_to_object(
        &self,
        table: &str,
        reference_id: &ReferenceId,
    ) -> Result<Row> {
        let rows = self.fetch_rows(&Select::new(table).filter(Filter::eq(
            REFERENCE_ID_COLUMN,
            Value::from(reference_id.as_str()),
        )))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::not_found(table, reference_id))
    }

    /// Load the first row matching column = value.
    pub fn get_object_where(&self, table: &str, column: &str, value: Value) -> Result<Row> {
        let rows = self.fetch_rows(
            &Select::new(table)
                .filter(Filter::eq(column, value.clone()))
                .limit(1),
        )?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::not_found(table, format!("{column}={value}")))
    }

    /// Load and fully expand all rows matching the filters.
    pub fn get_rows_where(
        &self,
        table: &str,
        filters: Vec<Filter>,
    ) -> Result<(Vec<Row>, Vec<Vec<Row>>)> {
        let info = self.table_info(table)?;
        let mut query = Select::new(table);
        query.filters = filters;
        let rows = self.fetch_rows(&query)?;
        self.expand_rows(rows, info, &crate::resolve::IncludeSet::All)
    }

    /// Load one row by reference id, expanded, with its included
    /// related objects.
    pub fn get_single_row_by_reference_id(
        &self,
        table: &str,
        reference_id: &ReferenceId,
    ) -> Result<(Row, Vec<Row>)> {
        let (rows, includes) = self.get_rows_where(
            table,
            vec![Filter::eq(
                REFERENCE_ID_COLUMN,
                Value::from(reference_id.as_str()),
            )],
        )?;
        let mut rows = rows.into_iter();
        let mut includes = includes.into_iter();
        match (rows.next(), includes.next()) {
            (Some(row), Some(include)) => Ok((row, include)),
            _ => Err(Error::not_found(table, reference_id)),
        }
    }

    /// All rows of a table, stamped but not expanded. For small tables.
    pub fn get_all_objects(&self, table: &str) -> Result<Vec<Row>> {
        self.fetch_rows(&Select::new(table))
    }

    /// All rows of a table exactly as stored, without the type stamp.
    pub fn get_all_raw_objects(&self, table: &str) -> Result<Vec<Row>> {
        self.store.select(&Select::new(table))
    }

    /// Reference ids of all rows matching the filters.
    pub fn get_reference_ids_where(
        &self,
        table: &str,
        filters: Vec<Filter>,
    ) -> Result<Vec<ReferenceId>> {
        let mut query = Select::new(table).columns(&[REFERENCE_ID_COLUMN]);
        query.filters = filters;
        let rows = self.store.select(&query)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get(REFERENCE_ID_COLUMN).and_then(Value::as_str))
            .map(ReferenceId::from)
            .collect())
    }

    /// Internal ids of all rows matching the filters.
    pub fn get_ids_where(&self, table: &str, filters: Vec<Filter>) -> Result<Vec<i64>> {
        let mut query = Select::new(table).columns(&[ID_COLUMN]);
        query.filters = filters;
        let rows = self.store.select(&query)?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get(ID_COLUMN).and_then(Value::as_i64))
            .collect())
    }

    /// Insert a row without validation or permission checks, coercing
    /// timestamp columns on the way in. Used by data import.
    pub fn direct_insert(&self, table: &str, data: Row) -> Result<i64> {
        let info = self.table_info(table)?;
        let mut values = Row::new();
        for column in &info.columns {
            let Some(value) = data.get(&column.column_name) else {
                continue;
            };
            let value = match (&column.column_type, value) {
                (ColumnType::DateTime, Value::String(s)) => match coerce_datetime(s) {
                    Some(normalized) => Value::from(normalized),
                    None => {
                        debug!(
                            column = column.column_name,
                            value = %s,
                            "skipping unparsable timestamp on insert"
                        );
                        continue;
                    }
                },
                _ => value.clone(),
            };
            values.insert(column.column_name.clone(), value);
        }
        self.store.insert(&Insert::new(table, values))
    }

    /// Delete every row of a table.
    pub fn truncate_table(&self, table: &str) -> Result<usize> {
        debug!(table, "truncating table");
        self.store.delete(&Delete::new(table))
    }

    /// Look up a user account row by email.
    pub fn get_user_account_by_email(&self, email: &str) -> Result<Row> {
        self.get_object_where(USER_ACCOUNT_TABLE, "email", Value::from(email))
    }

    /// Look up a user's stored password hash by email.
    pub fn get_user_password(&self, email: &str) -> Result<String> {
        let row = self.get_user_account_by_email(email)?;
        row.get("password")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Malformed(format!("password column for [{email}]")))
    }

    /// Convert a group name to its internal id. Group names are not
    /// guaranteed unique; the first match wins.
    pub fn usergroup_name_to_id(&self, group_name: &str) -> Result<i64> {
        let ids = self.get_ids_where(
            USERGROUP_TABLE,
            vec![Filter::eq("name", Value::from(group_name))],
        )?;
        ids.into_iter()
            .next()
            .ok_or_else(|| Error::not_found(USERGROUP_TABLE, group_name))
    }
}
