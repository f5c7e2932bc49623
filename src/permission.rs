//! Permission evaluation.
//!
//! A [`PermissionInstance`] is built fresh for every row or query and
//! never persisted. Evaluation ORs the three tiers together: the most
//! permissive applicable tier governs, and no evidence at all means
//! deny.

use serde::{Deserialize, Serialize};

use crate::caps::{AuthPermission, Capability};
use crate::refid::ReferenceId;

/// One group membership grant, as stored on the association row.
///
/// `relation_reference_id` identifies the join row itself; it is the
/// grant, not the object or the group, and is what must be deleted to
/// revoke the membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPermission {
    pub group_reference_id: ReferenceId,
    pub object_reference_id: ReferenceId,
    pub relation_reference_id: ReferenceId,
    pub permission: AuthPermission,
}

/// Who owns a row, which groups apply to it, and the bitmask that
/// governs it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionInstance {
    /// Reference id of the owning user, if any.
    pub user_id: Option<ReferenceId>,
    /// Group grants that apply to the object, in storage order.
    pub user_group_id: Vec<GroupPermission>,
    /// The object's own bitmask.
    pub permission: AuthPermission,
}

impl PermissionInstance {
    /// Fully closed instance: denies everything to everyone.
    pub fn none() -> Self {
        Self::default()
    }

    /// Three-tier evaluation.
    ///
    /// Grants when the guest tier carries the bit, or the caller owns
    /// the object and the owner tier carries it, or the caller shares
    /// a group with the object and that group's relation mask carries
    /// it. Tiers are additive; denial requires absence everywhere.
    pub fn allows(
        &self,
        cap: Capability,
        caller: Option<&ReferenceId>,
        caller_groups: &[GroupPermission],
    ) -> bool {
        if self.permission.allows_guest(cap) {
            return true;
        }

        if let (Some(caller), Some(owner)) = (caller, self.user_id.as_ref()) {
            if caller == owner && self.permission.allows_owner(cap) {
                return true;
            }
        }

        for theirs in caller_groups {
            for ours in &self.user_group_id {
                if theirs.group_reference_id == ours.group_reference_id
                    && ours.permission.allows_group(cap)
                {
                    return true;
                }
            }
        }

        false
    }

    pub fn can_peek(&self, caller: Option<&ReferenceId>, groups: &[GroupPermission]) -> bool {
        self.allows(Capability::Peek, caller, groups)
    }

    pub fn can_read(&self, caller: Option<&ReferenceId>, groups: &[GroupPermission]) -> bool {
        self.allows(Capability::Read, caller, groups)
    }

    pub fn can_create(&self, caller: Option<&ReferenceId>, groups: &[GroupPermission]) -> bool {
        self.allows(Capability::Create, caller, groups)
    }

    pub fn can_update(&self, caller: Option<&ReferenceId>, groups: &[GroupPermission]) -> bool {
        self.allows(Capability::Update, caller, groups)
    }

    pub fn can_delete(&self, caller: Option<&ReferenceId>, groups: &[GroupPermission]) -> bool {
        self.allows(Capability::Delete, caller, groups)
    }

    pub fn can_execute(&self, caller: Option<&ReferenceId>, groups: &[GroupPermission]) -> bool {
        self.allows(Capability::Execute, caller, groups)
    }

    pub fn can_refer(&self, caller: Option<&ReferenceId>, groups: &[GroupPermission]) -> bool {
        self.allows(Capability::Refer, caller, groups)
    }
}
