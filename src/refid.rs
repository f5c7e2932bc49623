//! Reference id translation.
//!
//! Every externally visible identifier is an opaque reference id;
//! internal numeric primary keys never leave the data layer. Both
//! translation directions are point lookups against the store and are
//! never cached across requests, because ownership and membership can
//! change between requests. A [`RefIdCache`] bounds the cost of bulk
//! expansion within one request to O(distinct ids).

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::resource::DataResource;
use crate::schema::{ID_COLUMN, REFERENCE_ID_COLUMN};
use crate::store::{Filter, Select};

/// Type-scoped opaque identifier for a row.
///
/// Freshly minted ids are v4 UUIDs, but the representation stays a
/// string: hydrated file descriptors reuse their file name as a
/// reference id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(String);

impl ReferenceId {
    /// Mint a new random reference id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ReferenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReferenceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ReferenceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Request-scoped memoization for reference id translation.
///
/// Created per request and dropped with it; never shared.
#[derive(Debug, Default)]
pub struct RefIdCache {
    forward: HashMap<(String, i64), ReferenceId>,
    reverse: HashMap<(String, ReferenceId), i64>,
}

impl RefIdCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataResource {
    /// Translate an internal numeric id to the row's reference id.
    pub fn reference_id(&self, table: &str, id: i64) -> Result<ReferenceId> {
        let query = Select::new(table)
            .columns(&[REFERENCE_ID_COLUMN])
            .filter(Filter::eq(ID_COLUMN, Value::from(id)))
            .limit(1);
        let rows = self.store().select(&query)?;
        match rows.into_iter().next() {
            Some(row) => match row.get(REFERENCE_ID_COLUMN).and_then(Value::as_str) {
                Some(s) => Ok(ReferenceId::from(s)),
                None => Err(Error::Malformed(format!(
                    "reference id column on [{table}][{id}]"
                ))),
            },
            None => Err(Error::not_found(table, id)),
        }
    }

    /// Translate a reference id back to the internal numeric id.
    pub fn internal_id(&self, table: &str, reference_id: &ReferenceId) -> Result<i64> {
        let query = Select::new(table)
            .columns(&[ID_COLUMN])
            .filter(Filter::eq(
                REFERENCE_ID_COLUMN,
                Value::from(reference_id.as_str()),
            ))
            .limit(1);
        let rows = self.store().select(&query)?;
        match rows.into_iter().next() {
            Some(row) => row
                .get(ID_COLUMN)
                .and_then(Value::as_i64)
                .ok_or_else(|| Error::Malformed(format!("id column on [{table}][{reference_id}]"))),
            None => Err(Error::not_found(table, reference_id)),
        }
    }

    /// Memoized variant of [`reference_id`](Self::reference_id) for
    /// bulk expansion within a single request.
    pub fn reference_id_cached(
        &self,
        cache: &mut RefIdCache,
        table: &str,
        id: i64,
    ) -> Result<ReferenceId> {
        let key = (table.to_string(), id);
        if let Some(hit) = cache.forward.get(&key) {
            return Ok(hit.clone());
        }
        let refid = self.reference_id(table, id)?;
        cache.forward.insert(key, refid.clone());
        Ok(refid)
    }

    /// Memoized variant of [`internal_id`](Self::internal_id).
    pub fn internal_id_cached(
        &self,
        cache: &mut RefIdCache,
        table: &str,
        reference_id: &ReferenceId,
    ) -> Result<i64> {
        let key = (table.to_string(), reference_id.clone());
        if let Some(hit) = cache.reverse.get(&key) {
            return Ok(*hit);
        }
        let id = self.internal_id(table, reference_id)?;
        cache.reverse.insert(key, id);
        Ok(id)
    }
}

/// Interpret a stored foreign-key value as an internal numeric id.
///
/// Loosely-typed backends hand these back as integers or as decimal
/// strings depending on the driver.
pub(crate) fn value_as_internal_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
