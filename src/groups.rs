//! Group membership resolution.
//!
//! Memberships live on generated association rows, and the permission
//! bitmask lives on the join row itself, not on the group: the same
//! object can grant different capabilities to different groups. A
//! group is a member of itself, carrying its table's configured
//! default permission.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::caps::AuthPermission;
use crate::error::{Error, Result};
use crate::permission::GroupPermission;
use crate::refid::{value_as_internal_id, ReferenceId};
use crate::resource::DataResource;
use crate::schema::{
    Relation, ID_COLUMN, PERMISSION_COLUMN, REFERENCE_ID_COLUMN, USERGROUP_TABLE,
};
use crate::store::{Filter, Row, Select};

impl DataResource {
    /// Every group the object belongs to, with the per-membership
    /// bitmask from the join row.
    ///
    /// Zero memberships is an empty list, not an error. A missing
    /// relation mapping is a configuration error; callers on the
    /// permission path log it and treat the group tier as absent.
    pub fn groups_for_object(&self, object_type: &str, id: i64) -> Result<Vec<GroupPermission>> {
        if object_type == USERGROUP_TABLE {
            return match self.reference_id(USERGROUP_TABLE, id) {
                Ok(refid) => Ok(vec![self.self_membership(refid)]),
                Err(e) if e.is_not_found() => {
                    debug!(id, "usergroup row missing, no self membership");
                    Ok(Vec::new())
                }
                Err(e) => Err(e),
            };
        }

        let relation = self.require_group_relation(object_type)?;

        let object_ref = match self.reference_id(object_type, id) {
            Ok(refid) => refid,
            Err(e) if e.is_not_found() => {
                debug!(object_type, id, "object missing, no memberships");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let join_rows = self.store().select(
            &Select::new(&relation.join_table)
                .filter(Filter::eq(&relation.subject_column, Value::from(id))),
        )?;

        let group_refids = self.translate_group_ids(&join_rows, &relation)?;
        Ok(join_rows
            .iter()
            .filter_map(|row| self.membership_from_join_row(row, &relation, &group_refids, &object_ref))
            .collect())
    }

    /// Memberships for every object of `object_type` matching
    /// column = value, resolved in one pass instead of per row.
    pub fn groups_for_objects_matching(
        &self,
        object_type: &str,
        column: &str,
        value: &Value,
    ) -> Result<Vec<GroupPermission>> {
        if object_type == USERGROUP_TABLE {
            let rows = self.store().select(
                &Select::new(USERGROUP_TABLE)
                    .columns(&[REFERENCE_ID_COLUMN])
                    .filter(Filter::eq(column, value.clone())),
            )?;
            return Ok(rows
                .iter()
                .filter_map(|r| r.get(REFERENCE_ID_COLUMN).and_then(Value::as_str))
                .map(|s| self.self_membership(ReferenceId::from(s)))
                .collect());
        }

        let relation = self.require_group_relation(object_type)?;

        let subjects = self.store().select(
            &Select::new(object_type)
                .columns(&[ID_COLUMN, REFERENCE_ID_COLUMN])
                .filter(Filter::eq(column, value.clone())),
        )?;
        let subject_refids: HashMap<i64, ReferenceId> = subjects
            .iter()
            .filter_map(|r| {
                let id = r.get(ID_COLUMN).and_then(Value::as_i64)?;
                let refid = r.get(REFERENCE_ID_COLUMN).and_then(Value::as_str)?;
                Some((id, ReferenceId::from(refid)))
            })
            .collect();
        if subject_refids.is_empty() {
            return Ok(Vec::new());
        }

        let join_rows = self.store().select(&Select::new(&relation.join_table).filter(
            Filter::is_in(
                &relation.subject_column,
                subject_refids.keys().map(|id| Value::from(*id)).collect(),
            ),
        ))?;

        let group_refids = self.translate_group_ids(&join_rows, &relation)?;
        Ok(join_rows
            .iter()
            .filter_map(|row| {
                let subject_id = row
                    .get(&relation.subject_column)
                    .and_then(value_as_internal_id)?;
                let object_ref = subject_refids.get(&subject_id)?;
                self.membership_from_join_row(row, &relation, &group_refids, object_ref)
            })
            .collect())
    }

    fn require_group_relation(&self, object_type: &str) -> Result<Relation> {
        self.schema()
            .group_relation(object_type)
            .cloned()
            .ok_or_else(|| {
                Error::Config(format!("no usergroup relation registered for [{object_type}]"))
            })
    }

    /// A group is a member of itself with its configured default
    /// permission.
    pub(crate) fn self_membership(&self, refid: ReferenceId) -> GroupPermission {
        let default_permission = self
            .schema()
            .get(USERGROUP_TABLE)
            .map(|t| t.default_permission)
            .unwrap_or(AuthPermission::NONE);
        GroupPermission {
            group_reference_id: refid.clone(),
            object_reference_id: refid.clone(),
            relation_reference_id: refid,
            permission: default_permission,
        }
    }

    /// One In-query translating the join rows' group ids to reference
    /// ids, instead of one lookup per row.
    fn translate_group_ids(
        &self,
        join_rows: &[Row],
        relation: &Relation,
    ) -> Result<HashMap<i64, ReferenceId>> {
        let group_ids: Vec<Value> = join_rows
            .iter()
            .filter_map(|r| r.get(&relation.object_column).and_then(value_as_internal_id))
            .map(Value::from)
            .collect();
        if group_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self.store().select(
            &Select::new(USERGROUP_TABLE)
                .columns(&[ID_COLUMN, REFERENCE_ID_COLUMN])
                .filter(Filter::is_in(ID_COLUMN, group_ids)),
        )?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                let id = r.get(ID_COLUMN).and_then(Value::as_i64)?;
                let refid = r.get(REFERENCE_ID_COLUMN).and_then(Value::as_str)?;
                Some((id, ReferenceId::from(refid)))
            })
            .collect())
    }

    fn membership_from_join_row(
        &self,
        row: &Row,
        relation: &Relation,
        group_refids: &HashMap<i64, ReferenceId>,
        object_ref: &ReferenceId,
    ) -> Option<GroupPermission> {
        let group_id = row.get(&relation.object_column).and_then(value_as_internal_id)?;
        let Some(group_ref) = group_refids.get(&group_id) else {
            warn!(
                join_table = relation.join_table,
                group_id, "membership references a missing usergroup row"
            );
            return None;
        };

        let relation_ref = row
            .get(REFERENCE_ID_COLUMN)
            .and_then(Value::as_str)
            .map(ReferenceId::from)
            .unwrap_or_else(|| {
                warn!(
                    join_table = relation.join_table,
                    group_id, "join row has no reference id"
                );
                ReferenceId::from("")
            });

        let permission = match row.get(PERMISSION_COLUMN) {
            Some(value) => AuthPermission::decode(value).unwrap_or_else(|e| {
                warn!(
                    join_table = relation.join_table,
                    group_id, error = %e, "treating unparsable membership bitmask as closed"
                );
                AuthPermission::NONE
            }),
            None => AuthPermission::NONE,
        };

        Some(GroupPermission {
            group_reference_id: group_ref.clone(),
            object_reference_id: object_ref.clone(),
            relation_reference_id: relation_ref,
            permission,
        })
    }
}
