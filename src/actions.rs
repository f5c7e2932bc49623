//! Action metadata lookup and the composite execute gate.
//!
//! Executing an action is gated twice: the caller needs Execute on the
//! target type's metadata row and Execute on the action's own row.
//! Either gate failing denies the action. Action execution itself
//! lives outside this crate; only the metadata and the gate are here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};
use crate::permission::{GroupPermission, PermissionInstance};
use crate::refid::ReferenceId;
use crate::resource::DataResource;
use crate::schema::{
    ACTION_NAME_COLUMN, ACTION_TABLE, REFERENCE_ID_COLUMN, TABLE_INFO_ID_COLUMN,
    TABLE_INFO_TABLE, TABLE_NAME_COLUMN,
};
use crate::store::Filter;

/// Declared action metadata. The schema blob is stored as JSON on the
/// action row; unknown fields are kept loose since the in/out field
/// shapes belong to the execution framework.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub on_type: String,
    #[serde(default)]
    pub instance_optional: bool,
    #[serde(default)]
    pub reference_id: Option<ReferenceId>,
    #[serde(default)]
    pub in_fields: Vec<Value>,
    #[serde(default)]
    pub out_fields: Vec<Value>,
}

impl DataResource {
    /// Load one action declared on a type.
    pub fn get_action_by_name(&self, type_name: &str, action_name: &str) -> Result<Action> {
        let table_row = self.get_object_where(
            TABLE_INFO_TABLE,
            TABLE_NAME_COLUMN,
            Value::from(type_name),
        )?;
        let table_id = table_row
            .get(crate::schema::ID_COLUMN)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Malformed(format!("table metadata id for [{type_name}]")))?;

        let rows = self.store().select(
            &crate::store::Select::new(ACTION_TABLE)
                .filter(Filter::eq(ACTION_NAME_COLUMN, Value::from(action_name)))
                .filter(Filter::eq(TABLE_INFO_ID_COLUMN, Value::from(table_id)))
                .limit(1),
        )?;
        let row = rows.into_iter().next().ok_or_else(|| {
            Error::not_found(ACTION_TABLE, format!("{type_name}:{action_name}"))
        })?;

        Ok(action_from_row(&row, type_name))
    }

    /// All actions declared on a type, skipping unlabeled rows.
    pub fn get_actions_by_type(&self, type_name: &str) -> Result<Vec<Action>> {
        let table_row = self.get_object_where(
            TABLE_INFO_TABLE,
            TABLE_NAME_COLUMN,
            Value::from(type_name),
        )?;
        let table_id = table_row
            .get(crate::schema::ID_COLUMN)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Malformed(format!("table metadata id for [{type_name}]")))?;

        let rows = self.get_all_objects(ACTION_TABLE)?;
        Ok(rows
            .iter()
            .filter(|row| {
                row.get(TABLE_INFO_ID_COLUMN).and_then(Value::as_i64) == Some(table_id)
            })
            .filter(|row| {
                row.get("label")
                    .and_then(Value::as_str)
                    .is_some_and(|l| !l.is_empty())
            })
            .map(|row| action_from_row(row, type_name))
            .collect())
    }

    /// Permission instance of an action identified by the owning
    /// table's internal id and the action name.
    pub fn action_permission(
        &self,
        table_info_id: i64,
        action_name: &str,
    ) -> Result<PermissionInstance> {
        let refids = self.get_reference_ids_where(
            ACTION_TABLE,
            vec![
                Filter::eq(ACTION_NAME_COLUMN, Value::from(action_name)),
                Filter::eq(TABLE_INFO_ID_COLUMN, Value::from(table_info_id)),
            ],
        )?;
        let refid = refids
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(ACTION_TABLE, action_name))?;
        Ok(self.object_permission_by_reference_id(ACTION_TABLE, &refid))
    }

    /// Can this caller invoke `action_name` on `type_name`?
    ///
    /// Requires Execute on the type's metadata row AND Execute on the
    /// action's own row; the two gates are independent.
    pub fn is_action_allowed(
        &self,
        caller: Option<&ReferenceId>,
        caller_groups: &[GroupPermission],
        type_name: &str,
        action_name: &str,
    ) -> bool {
        let type_permission = self.object_permission_where(
            TABLE_INFO_TABLE,
            TABLE_NAME_COLUMN,
            Value::from(type_name),
        );
        let action_permission = self.object_permission_where(
            ACTION_TABLE,
            ACTION_NAME_COLUMN,
            Value::from(action_name),
        );

        type_permission.can_execute(caller, caller_groups)
            && action_permission.can_execute(caller, caller_groups)
    }
}

fn action_from_row(row: &crate::store::Row, type_name: &str) -> Action {
    let mut action: Action = row
        .get("action_schema")
        .and_then(Value::as_str)
        .and_then(|schema| {
            serde_json::from_str(schema)
                .map_err(|e| {
                    warn!(type_name, error = %e, "unparsable action schema, using bare metadata");
                    e
                })
                .ok()
        })
        .unwrap_or_default();

    if let Some(name) = row.get(ACTION_NAME_COLUMN).and_then(Value::as_str) {
        action.name = name.to_string();
    }
    if let Some(label) = row.get("label").and_then(Value::as_str) {
        action.label = label.to_string();
    }
    if let Some(refid) = row.get(REFERENCE_ID_COLUMN).and_then(Value::as_str) {
        action.reference_id = Some(ReferenceId::from(refid));
    }
    if let Some(optional) = row.get("instance_optional").and_then(Value::as_bool) {
        action.instance_optional = optional;
    } else if let Some(flag) = row.get("instance_optional").and_then(Value::as_i64) {
        action.instance_optional = flag != 0;
    }
    action.on_type = type_name.to_string();
    action
}
