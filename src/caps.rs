//! Permission bitmask and capability constants.
//!
//! An [`AuthPermission`] packs three tiers into one `u64`:
//! guest bits 0-6, owner bits 7-13, group bits 14-20. Each tier carries
//! the same seven capability bits in the order peek, read, create,
//! update, delete, execute, refer. Absence of a bit always means deny.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// One permission primitive. The discriminant is the bit position
/// within a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Capability {
    Peek = 0,
    Read = 1,
    Create = 2,
    Update = 3,
    Delete = 4,
    Execute = 5,
    Refer = 6,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Peek,
        Capability::Read,
        Capability::Create,
        Capability::Update,
        Capability::Delete,
        Capability::Execute,
        Capability::Refer,
    ];
}

const OWNER_SHIFT: u32 = 7;
const GROUP_SHIFT: u32 = 14;

/// Three-tier permission bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthPermission(pub u64);

impl AuthPermission {
    pub const NONE: Self = Self(0);

    pub const GUEST_PEEK: Self = Self(1);
    pub const GUEST_READ: Self = Self(1 << 1);
    pub const GUEST_CREATE: Self = Self(1 << 2);
    pub const GUEST_UPDATE: Self = Self(1 << 3);
    pub const GUEST_DELETE: Self = Self(1 << 4);
    pub const GUEST_EXECUTE: Self = Self(1 << 5);
    pub const GUEST_REFER: Self = Self(1 << 6);

    pub const OWNER_PEEK: Self = Self(1 << 7);
    pub const OWNER_READ: Self = Self(1 << 8);
    pub const OWNER_CREATE: Self = Self(1 << 9);
    pub const OWNER_UPDATE: Self = Self(1 << 10);
    pub const OWNER_DELETE: Self = Self(1 << 11);
    pub const OWNER_EXECUTE: Self = Self(1 << 12);
    pub const OWNER_REFER: Self = Self(1 << 13);

    pub const GROUP_PEEK: Self = Self(1 << 14);
    pub const GROUP_READ: Self = Self(1 << 15);
    pub const GROUP_CREATE: Self = Self(1 << 16);
    pub const GROUP_UPDATE: Self = Self(1 << 17);
    pub const GROUP_DELETE: Self = Self(1 << 18);
    pub const GROUP_EXECUTE: Self = Self(1 << 19);
    pub const GROUP_REFER: Self = Self(1 << 20);

    pub const GUEST_ALL: Self = Self(0x7f);
    pub const OWNER_ALL: Self = Self(0x7f << OWNER_SHIFT);
    pub const GROUP_ALL: Self = Self(0x7f << GROUP_SHIFT);

    pub const GUEST_CRUD: Self = Self(
        Self::GUEST_CREATE.0 | Self::GUEST_READ.0 | Self::GUEST_UPDATE.0 | Self::GUEST_DELETE.0,
    );
    pub const OWNER_CRUD: Self = Self(
        Self::OWNER_CREATE.0 | Self::OWNER_READ.0 | Self::OWNER_UPDATE.0 | Self::OWNER_DELETE.0,
    );
    pub const GROUP_CRUD: Self = Self(
        Self::GROUP_CREATE.0 | Self::GROUP_READ.0 | Self::GROUP_UPDATE.0 | Self::GROUP_DELETE.0,
    );

    /// Ambient permission applied system-wide once an administrator exists.
    pub const DEFAULT_PERMISSION: Self = Self(
        Self::GUEST_PEEK.0
            | Self::GUEST_EXECUTE.0
            | Self::OWNER_ALL.0
            | Self::GROUP_CRUD.0
            | Self::GROUP_EXECUTE.0
            | Self::GROUP_REFER.0,
    );

    /// Operator-level default applied to action rows during bootstrap.
    pub const ACTION_DEFAULT: Self = Self(
        Self::OWNER_READ.0
            | Self::OWNER_EXECUTE.0
            | Self::GROUP_CRUD.0
            | Self::GROUP_EXECUTE.0
            | Self::GROUP_REFER.0,
    );

    /// The sign-in action must stay reachable by guests.
    pub const SIGNIN_DEFAULT: Self = Self(
        Self::GUEST_PEEK.0
            | Self::GUEST_EXECUTE.0
            | Self::OWNER_READ.0
            | Self::OWNER_EXECUTE.0
            | Self::GROUP_READ.0
            | Self::GROUP_EXECUTE.0,
    );

    /// Audit tables accept new rows from anyone.
    pub const AUDIT_PERMISSION: Self =
        Self(Self::GUEST_CREATE.0 | Self::OWNER_CREATE.0 | Self::GROUP_CREATE.0);

    /// Audit rows themselves are read-only once written.
    pub const AUDIT_DEFAULT: Self =
        Self(Self::GUEST_READ.0 | Self::OWNER_READ.0 | Self::GROUP_READ.0);

    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Does the guest tier grant this capability?
    #[inline]
    pub fn allows_guest(self, cap: Capability) -> bool {
        self.0 & (1 << (cap as u32)) != 0
    }

    /// Does the owner tier grant this capability?
    #[inline]
    pub fn allows_owner(self, cap: Capability) -> bool {
        self.0 & (1 << (cap as u32 + OWNER_SHIFT)) != 0
    }

    /// Does the group tier grant this capability?
    #[inline]
    pub fn allows_group(self, cap: Capability) -> bool {
        self.0 & (1 << (cap as u32 + GROUP_SHIFT)) != 0
    }

    /// Decode a bitmask from its stored form.
    ///
    /// Different storage backends marshal the column as a 64-bit
    /// integer, a float, or a decimal string; this is the single
    /// place those encodings are normalized.
    pub fn decode(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self(i as u64))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self(f as u64))
                } else {
                    Err(Error::Malformed(format!("permission bitmask {n}")))
                }
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(|i| Self(i as u64))
                .map_err(|_| Error::Malformed(format!("permission bitmask [{s}]"))),
            other => Err(Error::Malformed(format!("permission bitmask {other}"))),
        }
    }
}

impl BitOr for AuthPermission {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AuthPermission {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AuthPermission {
    type Output = Self;
    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for AuthPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

const BIT_NAMES: &[(&str, u64)] = &[
    ("guest_peek", 1),
    ("guest_read", 1 << 1),
    ("guest_create", 1 << 2),
    ("guest_update", 1 << 3),
    ("guest_delete", 1 << 4),
    ("guest_execute", 1 << 5),
    ("guest_refer", 1 << 6),
    ("owner_peek", 1 << 7),
    ("owner_read", 1 << 8),
    ("owner_create", 1 << 9),
    ("owner_update", 1 << 10),
    ("owner_delete", 1 << 11),
    ("owner_execute", 1 << 12),
    ("owner_refer", 1 << 13),
    ("group_peek", 1 << 14),
    ("group_read", 1 << 15),
    ("group_create", 1 << 16),
    ("group_update", 1 << 17),
    ("group_delete", 1 << 18),
    ("group_execute", 1 << 19),
    ("group_refer", 1 << 20),
];

/// Convert a bitmask to the list of set bit names.
pub fn bits_to_names(mask: AuthPermission) -> Vec<&'static str> {
    BIT_NAMES
        .iter()
        .filter(|(_, b)| mask.0 & b == *b)
        .map(|(n, _)| *n)
        .collect()
}

/// Convert a list of bit names to a bitmask. Unknown names are ignored.
pub fn names_to_bits(names: &[&str]) -> AuthPermission {
    names
        .iter()
        .filter_map(|n| BIT_NAMES.iter().find(|(k, _)| k == n).map(|(_, v)| *v))
        .fold(AuthPermission::NONE, |acc, b| AuthPermission(acc.0 | b))
}
