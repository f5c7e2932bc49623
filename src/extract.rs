//! Deriving a [`PermissionInstance`] from materialized rows.
//!
//! Extraction never fails and never panics: anything missing or
//! unparsable degrades toward the maximally restrictive instance, and
//! the reasons are logged.

use serde_json::Value;
use tracing::{debug, warn};

use crate::caps::AuthPermission;
use crate::error::Error;
use crate::permission::PermissionInstance;
use crate::refid::{value_as_internal_id, ReferenceId};
use crate::resource::DataResource;
use crate::schema::{
    is_join_table, ID_COLUMN, PERMISSION_COLUMN, REFERENCE_ID_COLUMN, USERGROUP_TABLE,
    USER_ACCOUNT_ID_COLUMN, USER_ACCOUNT_TABLE,
};
use crate::store::{Filter, Row, Select};

impl DataResource {
    /// Derive who owns a row, which groups apply, and the governing
    /// bitmask.
    ///
    /// The row may be a partial projection: a dropped owner column is
    /// recovered by re-fetching the row, and a missing permission
    /// column falls back to the canonical stored instance. An explicit
    /// permission of zero is authoritative (fully closed), not a
    /// trigger for the fallback.
    pub fn row_permission(&self, row: &Row, row_type: &str) -> PermissionInstance {
        let refid_value = row
            .get(REFERENCE_ID_COLUMN)
            .or_else(|| row.get(ID_COLUMN))
            .cloned()
            .unwrap_or(Value::Null);

        let mut perm = PermissionInstance::none();

        if row_type != USERGROUP_TABLE {
            perm.user_id = match row.get(USER_ACCOUNT_ID_COLUMN) {
                Some(v) if !v.is_null() => self.owner_reference(v),
                _ => self.refetch_owner(row_type, &refid_value),
            };
        }

        if is_join_table(row_type) {
            // Association rows carry their own bitmask but no second
            // layer of group memberships.
        } else if row_type == USERGROUP_TABLE {
            if let Some(refid) = self.usergroup_refid(&refid_value) {
                perm.user_group_id = vec![self.self_membership(refid)];
            }
        } else if self
            .schema()
            .get(row_type)
            .is_some_and(|t| t.has_many(USERGROUP_TABLE))
        {
            perm.user_group_id = self.row_memberships(row_type, &refid_value);
        }

        match row.get(PERMISSION_COLUMN) {
            Some(v) if !v.is_null() => {
                perm.permission = AuthPermission::decode(v).unwrap_or_else(|e| {
                    warn!(row_type, error = %e, "treating unparsable row bitmask as closed");
                    AuthPermission::NONE
                });
            }
            _ => {
                if let Some(s) = refid_value.as_str() {
                    perm.permission = self
                        .object_permission_by_reference_id(row_type, &ReferenceId::from(s))
                        .permission;
                }
            }
        }

        perm
    }

    /// Canonical permission instance of an object, loaded by reference
    /// id. Returns a fully closed instance when the object does not
    /// exist or its row cannot be read.
    pub fn object_permission_by_reference_id(
        &self,
        object_type: &str,
        reference_id: &ReferenceId,
    ) -> PermissionInstance {
        self.object_permission_with_filter(
            object_type,
            Filter::eq(REFERENCE_ID_COLUMN, Value::from(reference_id.as_str())),
        )
    }

    /// Canonical permission instance of an object, loaded by internal
    /// id.
    pub fn object_permission_by_id(&self, object_type: &str, id: i64) -> PermissionInstance {
        self.object_permission_with_filter(object_type, Filter::eq(ID_COLUMN, Value::from(id)))
    }

    /// Canonical permission instance of the first object matching
    /// column = value. Used for type-level and action-level gates,
    /// where the column is a unique name.
    pub fn object_permission_where(
        &self,
        object_type: &str,
        column: &str,
        value: Value,
    ) -> PermissionInstance {
        self.object_permission_with_filter(object_type, Filter::eq(column, value))
    }

    fn object_permission_with_filter(
        &self,
        object_type: &str,
        filter: Filter,
    ) -> PermissionInstance {
        let mut columns = vec![ID_COLUMN, PERMISSION_COLUMN];
        if object_type != USERGROUP_TABLE {
            columns.push(USER_ACCOUNT_ID_COLUMN);
        }
        let query = Select::new(object_type)
            .columns(&columns)
            .filter(filter)
            .limit(1);

        let row = match self.store().select(&query) {
            Ok(rows) => match rows.into_iter().next() {
                Some(row) => row,
                None => return PermissionInstance::none(),
            },
            Err(e) => {
                warn!(object_type, error = %e, "failed to load canonical permission");
                return PermissionInstance::none();
            }
        };

        let mut perm = PermissionInstance::none();

        if let Some(owner) = row.get(USER_ACCOUNT_ID_COLUMN) {
            if !owner.is_null() {
                perm.user_id = self.owner_reference(owner);
            }
        }

        if let Some(id) = row.get(ID_COLUMN).and_then(Value::as_i64) {
            perm.user_group_id = self.groups_for_object(object_type, id).unwrap_or_else(|e| {
                log_group_failure(object_type, &e);
                Vec::new()
            });
        }

        if let Some(value) = row.get(PERMISSION_COLUMN) {
            perm.permission = AuthPermission::decode(value).unwrap_or_else(|e| {
                warn!(object_type, error = %e, "treating unparsable canonical bitmask as closed");
                AuthPermission::NONE
            });
        }

        perm
    }

    /// An owner column holds either an already-translated reference id
    /// or the raw internal id, depending on whether the row passed
    /// through relation expansion.
    fn owner_reference(&self, value: &Value) -> Option<ReferenceId> {
        match value {
            Value::String(s) => Some(ReferenceId::from(s.as_str())),
            Value::Number(_) => {
                let id = value_as_internal_id(value)?;
                match self.reference_id(USER_ACCOUNT_TABLE, id) {
                    Ok(refid) => Some(refid),
                    Err(e) => {
                        debug!(id, error = %e, "owner id does not translate");
                        None
                    }
                }
            }
            _ => None,
        }
    }

    fn refetch_owner(&self, row_type: &str, refid_value: &Value) -> Option<ReferenceId> {
        let refstr = refid_value.as_str()?;
        match self.get_reference_id_to_object(row_type, &ReferenceId::from(refstr)) {
            Ok(full) => full
                .get(USER_ACCOUNT_ID_COLUMN)
                .filter(|v| !v.is_null())
                .and_then(|v| self.owner_reference(v)),
            Err(e) => {
                debug!(row_type, refid = refstr, error = %e, "owner refetch failed");
                None
            }
        }
    }

    fn usergroup_refid(&self, refid_value: &Value) -> Option<ReferenceId> {
        match refid_value {
            Value::String(s) => Some(ReferenceId::from(s.as_str())),
            Value::Number(_) => {
                let id = value_as_internal_id(refid_value)?;
                self.reference_id(USERGROUP_TABLE, id).ok()
            }
            _ => None,
        }
    }

    fn row_memberships(&self, row_type: &str, refid_value: &Value) -> Vec<crate::permission::GroupPermission> {
        let result = match refid_value {
            Value::String(s) => self.groups_for_objects_matching(
                row_type,
                REFERENCE_ID_COLUMN,
                &Value::from(s.as_str()),
            ),
            Value::Number(_) => match value_as_internal_id(refid_value) {
                Some(id) => self.groups_for_object(row_type, id),
                None => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        };
        result.unwrap_or_else(|e| {
            log_group_failure(row_type, &e);
            Vec::new()
        })
    }
}

fn log_group_failure(object_type: &str, e: &Error) {
    match e {
        Error::Config(_) => debug!(object_type, error = %e, "group tier skipped"),
        _ => warn!(object_type, error = %e, "group lookup failed, treating as no memberships"),
    }
}
