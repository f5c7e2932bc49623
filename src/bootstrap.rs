//! First-administrator bootstrap.
//!
//! A fresh deployment has no administrator, so every table carries its
//! permissive install-time permission. The first signed-up user may
//! claim the instance: they become owner of every existing row, join
//! the `administrators` group, and table and action permissions are
//! tightened to their post-install defaults. Once the group has any
//! member the window is closed for good.

use serde_json::Value;
use tracing::{info, warn};

use crate::caps::AuthPermission;
use crate::error::Result;
use crate::refid::ReferenceId;
use crate::resource::DataResource;
use crate::schema::{
    Relation, ADMINISTRATORS_GROUP, DEFAULT_PERMISSION_COLUMN, PERMISSION_COLUMN,
    REFERENCE_ID_COLUMN, SIGNIN_ACTION, TABLE_NAME_COLUMN, USERGROUP_TABLE, USER_ACCOUNT_ID_COLUMN,
    USER_ACCOUNT_TABLE,
};
use crate::store::{Filter, Insert, Row, Select, Update};

impl DataResource {
    /// Reference id of some member of the administrators group, if the
    /// group exists and is non-empty.
    pub fn administrator_reference_id(&self) -> Result<ReferenceId> {
        let group_id = self.usergroup_name_to_id(ADMINISTRATORS_GROUP)?;
        let member = self.first_administrator(group_id)?.ok_or_else(|| {
            crate::error::Error::not_found(USER_ACCOUNT_TABLE, ADMINISTRATORS_GROUP)
        })?;
        self.reference_id(USER_ACCOUNT_TABLE, member)
    }

    /// Internal id of the first member of the administrators group.
    fn first_administrator(&self, group_id: i64) -> Result<Option<i64>> {
        let relation = Relation::many_to_many(USER_ACCOUNT_TABLE, USERGROUP_TABLE);
        let members = self.store().select(
            &Select::new(&relation.join_table)
                .columns(&[relation.subject_column.as_str()])
                .filter(Filter::eq(&relation.object_column, Value::from(group_id)))
                .limit(1),
        )?;
        Ok(members
            .first()
            .and_then(|row| row.get(&relation.subject_column))
            .and_then(crate::refid::value_as_internal_id))
    }

    /// True while the administrators group exists and has no members.
    /// A missing group refuses the claim rather than half-applying it.
    pub fn can_become_admin(&self) -> bool {
        let group_id = match self.usergroup_name_to_id(ADMINISTRATORS_GROUP) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "administrators group is not provisioned");
                return false;
            }
        };
        match self.first_administrator(group_id) {
            Ok(member) => member.is_none(),
            Err(e) => {
                warn!(error = %e, "could not determine administrator state");
                false
            }
        }
    }

    /// Promote the user with internal id `user_id` to administrator.
    ///
    /// Best-effort across tables: a statement that fails is logged and
    /// the remaining tables are still processed. Returns whether the
    /// promotion ran at all.
    pub fn become_admin(&self, user_id: i64) -> bool {
        // Serialize claimants; the emptiness check is re-done under
        // the lock so only one of two racing callers proceeds.
        let _guard = match self.admin_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !self.can_become_admin() {
            return false;
        }

        for table in self.schema().tables() {
            if table.is_join_table() {
                continue;
            }
            if table.has_column(USER_ACCOUNT_ID_COLUMN) {
                let mut values = Row::new();
                values.insert(USER_ACCOUNT_ID_COLUMN.to_string(), Value::from(user_id));
                values.insert(
                    PERMISSION_COLUMN.to_string(),
                    Value::from(AuthPermission::DEFAULT_PERMISSION.0),
                );
                if let Err(e) = self.store().update(&Update::new(&table.table_name, values)) {
                    warn!(table = table.table_name, error = %e, "ownership update failed");
                }
            }
        }

        if let Err(e) = self.insert_administrator_membership(user_id) {
            warn!(error = %e, "could not add user to administrators group");
        }

        self.tighten_table_permissions();
        self.tighten_action_permissions();

        info!(user_id, "instance administrator established");
        true
    }

    fn insert_administrator_membership(&self, user_id: i64) -> Result<i64> {
        let group_id = self.usergroup_name_to_id(ADMINISTRATORS_GROUP)?;
        let relation = Relation::many_to_many(USER_ACCOUNT_TABLE, USERGROUP_TABLE);
        let mut values = Row::new();
        values.insert(relation.subject_column, Value::from(user_id));
        values.insert(relation.object_column, Value::from(group_id));
        values.insert(
            REFERENCE_ID_COLUMN.to_string(),
            Value::from(ReferenceId::new().as_str()),
        );
        values.insert(
            PERMISSION_COLUMN.to_string(),
            Value::from(AuthPermission::DEFAULT_PERMISSION.0),
        );
        self.store().insert(&Insert::new(&relation.join_table, values))
    }

    /// Reset every registry row to its post-install permission pair.
    /// Audit tables stay append-only for non-administrators.
    fn tighten_table_permissions(&self) {
        for table in self.schema().tables() {
            let (permission, default_permission) = if table.is_audit() {
                (
                    AuthPermission::AUDIT_PERMISSION,
                    AuthPermission::AUDIT_DEFAULT,
                )
            } else {
                (
                    AuthPermission::DEFAULT_PERMISSION,
                    AuthPermission::DEFAULT_PERMISSION,
                )
            };
            let mut values = Row::new();
            values.insert(PERMISSION_COLUMN.to_string(), Value::from(permission.0));
            values.insert(
                DEFAULT_PERMISSION_COLUMN.to_string(),
                Value::from(default_permission.0),
            );
            let update = Update::new(crate::schema::TABLE_INFO_TABLE, values).filter(Filter::eq(
                TABLE_NAME_COLUMN,
                Value::from(table.table_name.as_str()),
            ));
            if let Err(e) = self.store().update(&update) {
                warn!(table = table.table_name, error = %e, "registry permission update failed");
            }
        }
    }

    /// Actions fall back to owner/group execute; signin stays open to
    /// guests so the instance remains reachable.
    fn tighten_action_permissions(&self) {
        let mut values = Row::new();
        values.insert(
            PERMISSION_COLUMN.to_string(),
            Value::from(AuthPermission::ACTION_DEFAULT.0),
        );
        if let Err(e) = self
            .store()
            .update(&Update::new(crate::schema::ACTION_TABLE, values))
        {
            warn!(error = %e, "action permission update failed");
        }

        let mut signin = Row::new();
        signin.insert(
            PERMISSION_COLUMN.to_string(),
            Value::from(AuthPermission::SIGNIN_DEFAULT.0),
        );
        let update = Update::new(crate::schema::ACTION_TABLE, signin).filter(Filter::eq(
            crate::schema::ACTION_NAME_COLUMN,
            Value::from(SIGNIN_ACTION),
        ));
        if let Err(e) = self.store().update(&update) {
            warn!(error = %e, "signin permission update failed");
        }
    }
}
