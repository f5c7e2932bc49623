//! Storage boundary: structured queries and the backends that run them.
//!
//! The engine never writes SQL; it describes statements as data
//! (equality, set-membership, negated-equality, ordering, limit) and
//! hands them to a [`Storage`] implementation. [`SqliteStore`] renders
//! them to parameterized SQL; [`MemoryStore`] evaluates them directly
//! and exists for tests and embedding.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{ColumnType, TableInfo, ID_COLUMN};

/// A materialized row: column name to dynamic value.
pub type Row = HashMap<String, Value>;

/// A single predicate. All predicates in a query are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    NotEq(String, Value),
}

impl Filter {
    pub fn eq(column: &str, value: Value) -> Self {
        Filter::Eq(column.to_string(), value)
    }

    pub fn is_in(column: &str, values: Vec<Value>) -> Self {
        Filter::In(column.to_string(), values)
    }

    pub fn not_eq(column: &str, value: Value) -> Self {
        Filter::NotEq(column.to_string(), value)
    }
}

/// A SELECT description. Empty `columns` means all columns.
#[derive(Debug, Clone)]
pub struct Select {
    pub table: String,
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
}

impl Select {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(column.to_string());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Insert {
    pub table: String,
    pub values: Row,
}

impl Insert {
    pub fn new(table: &str, values: Row) -> Self {
        Self {
            table: table.to_string(),
            values,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Update {
    pub table: String,
    pub values: Row,
    pub filters: Vec<Filter>,
}

impl Update {
    pub fn new(table: &str, values: Row) -> Self {
        Self {
            table: table.to_string(),
            values,
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Delete {
    pub table: String,
    pub filters: Vec<Filter>,
}

impl Delete {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// The relational capability the engine consumes.
///
/// Implementations must provide read-committed consistency or better;
/// the engine issues no locks of its own.
pub trait Storage: Send + Sync {
    fn select(&self, query: &Select) -> Result<Vec<Row>>;
    /// Returns the internal id of the inserted row.
    fn insert(&self, query: &Insert) -> Result<i64>;
    /// Returns the number of rows changed.
    fn update(&self, query: &Update) -> Result<usize>;
    /// Returns the number of rows deleted.
    fn delete(&self, query: &Delete) -> Result<usize>;
    fn create_table(&self, table: &TableInfo) -> Result<()>;
}

/// Equality with loose numeric comparison, matching how SQL backends
/// compare a stored INTEGER against a bound REAL.
fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn values_cmp(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn matches(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| match f {
        Filter::Eq(col, v) => row.get(col).is_some_and(|rv| values_eq(rv, v)),
        Filter::NotEq(col, v) => !row.get(col).is_some_and(|rv| values_eq(rv, v)),
        Filter::In(col, vs) => row
            .get(col)
            .is_some_and(|rv| vs.iter().any(|v| values_eq(rv, v))),
    })
}

#[derive(Debug, Default)]
struct MemTable {
    next_id: i64,
    rows: Vec<Row>,
}

/// In-memory backend. Tables live in a HashMap behind a Mutex; ids are
/// assigned from a per-table counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, MemTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemTable>> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Storage for MemoryStore {
    fn select(&self, query: &Select) -> Result<Vec<Row>> {
        let tables = self.lock();
        let table = tables
            .get(&query.table)
            .ok_or_else(|| Error::Storage(format!("no such table [{}]", query.table)))?;

        let mut rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|r| matches(r, &query.filters))
            .cloned()
            .collect();

        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| {
                values_cmp(
                    a.get(order).unwrap_or(&Value::Null),
                    b.get(order).unwrap_or(&Value::Null),
                )
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }
        if !query.columns.is_empty() {
            rows = rows
                .into_iter()
                .map(|r| {
                    query
                        .columns
                        .iter()
                        .filter_map(|c| r.get(c).map(|v| (c.clone(), v.clone())))
                        .collect()
                })
                .collect();
        }
        Ok(rows)
    }

    fn insert(&self, query: &Insert) -> Result<i64> {
        let mut tables = self.lock();
        let table = tables
            .get_mut(&query.table)
            .ok_or_else(|| Error::Storage(format!("no such table [{}]", query.table)))?;

        let mut row = query.values.clone();
        let id = match row.get(ID_COLUMN).and_then(Value::as_i64) {
            Some(explicit) => {
                table.next_id = table.next_id.max(explicit + 1);
                explicit
            }
            None => {
                let id = table.next_id;
                table.next_id += 1;
                row.insert(ID_COLUMN.to_string(), Value::from(id));
                id
            }
        };
        table.rows.push(row);
        Ok(id)
    }

    fn update(&self, query: &Update) -> Result<usize> {
        let mut tables = self.lock();
        let table = tables
            .get_mut(&query.table)
            .ok_or_else(|| Error::Storage(format!("no such table [{}]", query.table)))?;

        let mut changed = 0;
        for row in table.rows.iter_mut() {
            if matches(row, &query.filters) {
                for (k, v) in &query.values {
                    row.insert(k.clone(), v.clone());
                }
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn delete(&self, query: &Delete) -> Result<usize> {
        let mut tables = self.lock();
        let table = tables
            .get_mut(&query.table)
            .ok_or_else(|| Error::Storage(format!("no such table [{}]", query.table)))?;

        let before = table.rows.len();
        table.rows.retain(|r| !matches(r, &query.filters));
        Ok(before - table.rows.len())
    }

    fn create_table(&self, table: &TableInfo) -> Result<()> {
        let mut tables = self.lock();
        tables
            .entry(table.table_name.clone())
            .or_insert_with(|| MemTable {
                next_id: 1,
                rows: Vec::new(),
            });
        Ok(())
    }
}

/// Quote an identifier for SQL. Names come from the schema registry,
/// not from callers, but embedded quotes are stripped regardless.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', ""))
}

fn bind_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        // Arrays and objects round-trip through their JSON encoding.
        other => Sql::Text(other.to_string()),
    }
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(BASE64.encode(b)),
    }
}

fn render_filters(
    filters: &[Filter],
    sql: &mut String,
    args: &mut Vec<rusqlite::types::Value>,
) {
    for (i, filter) in filters.iter().enumerate() {
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        match filter {
            Filter::Eq(col, v) => {
                sql.push_str(&quote_ident(col));
                sql.push_str(" = ?");
                args.push(bind_value(v));
            }
            Filter::NotEq(col, v) => {
                sql.push_str(&quote_ident(col));
                sql.push_str(" <> ?");
                args.push(bind_value(v));
            }
            Filter::In(col, vs) => {
                if vs.is_empty() {
                    // IN () is invalid SQL; an empty set matches nothing.
                    sql.push_str("1 = 0");
                } else {
                    sql.push_str(&quote_ident(col));
                    sql.push_str(" IN (");
                    for (j, v) in vs.iter().enumerate() {
                        if j > 0 {
                            sql.push_str(", ");
                        }
                        sql.push('?');
                        args.push(bind_value(v));
                    }
                    sql.push(')');
                }
            }
        }
    }
}

/// SQLite-backed storage.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

impl Storage for SqliteStore {
    fn select(&self, query: &Select) -> Result<Vec<Row>> {
        let mut sql = String::from("SELECT ");
        if query.columns.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<String> = query.columns.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(&cols.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&quote_ident(&query.table));

        let mut args = Vec::new();
        render_filters(&query.filters, &mut sql, &mut args);
        if let Some(order) = &query.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(&quote_ident(order));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(args))
            .map_err(storage_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(storage_err)? {
            let mut map = Row::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                let value = row.get_ref(i).map_err(storage_err)?;
                map.insert(name.clone(), read_value(value));
            }
            out.push(map);
        }
        Ok(out)
    }

    fn insert(&self, query: &Insert) -> Result<i64> {
        let mut cols = Vec::new();
        let mut marks = Vec::new();
        let mut args = Vec::new();
        for (col, value) in &query.values {
            cols.push(quote_ident(col));
            marks.push("?");
            args.push(bind_value(value));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&query.table),
            cols.join(", "),
            marks.join(", ")
        );

        let conn = self.lock();
        conn.execute(&sql, rusqlite::params_from_iter(args))
            .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }

    fn update(&self, query: &Update) -> Result<usize> {
        let mut sql = format!("UPDATE {} SET ", quote_ident(&query.table));
        let mut args = Vec::new();
        for (i, (col, value)) in query.values.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&quote_ident(col));
            sql.push_str(" = ?");
            args.push(bind_value(value));
        }
        render_filters(&query.filters, &mut sql, &mut args);

        let conn = self.lock();
        conn.execute(&sql, rusqlite::params_from_iter(args))
            .map_err(storage_err)
    }

    fn delete(&self, query: &Delete) -> Result<usize> {
        let mut sql = format!("DELETE FROM {}", quote_ident(&query.table));
        let mut args = Vec::new();
        render_filters(&query.filters, &mut sql, &mut args);

        let conn = self.lock();
        conn.execute(&sql, rusqlite::params_from_iter(args))
            .map_err(storage_err)
    }

    fn create_table(&self, table: &TableInfo) -> Result<()> {
        let mut defs = Vec::new();
        for column in &table.columns {
            if column.column_name == ID_COLUMN {
                defs.push(format!(
                    "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                    quote_ident(ID_COLUMN)
                ));
                continue;
            }
            let sql_type = match column.column_type {
                ColumnType::Integer => "INTEGER",
                ColumnType::Real => "REAL",
                ColumnType::Blob => "BLOB",
                ColumnType::Text | ColumnType::DateTime | ColumnType::Json => "TEXT",
            };
            defs.push(format!("{} {}", quote_ident(&column.column_name), sql_type));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&table.table_name),
            defs.join(", ")
        );
        let conn = self.lock();
        conn.execute(&sql, []).map_err(storage_err)?;
        Ok(())
    }
}
