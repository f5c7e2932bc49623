//! Rowgate - row-level authorization and relation resolution.
//!
//! Every row carries a permission bitmask with three tiers (guest,
//! owner, group). [`DataResource`] extracts a [`PermissionInstance`]
//! from a row, answers capability checks against a caller and their
//! group memberships, translates internal ids to opaque
//! [`ReferenceId`]s, and expands foreign-key-shaped columns after the
//! permission decision. A fresh instance is claimed through the
//! administrator bootstrap in [`bootstrap`](DataResource::become_admin).

mod actions;
mod bootstrap;
mod caps;
mod error;
mod extract;
mod groups;
mod permission;
mod refid;
mod resolve;
mod resource;
mod schema;
mod store;

pub use actions::Action;
pub use caps::{bits_to_names, names_to_bits, AuthPermission, Capability};
pub use error::{Error, Result};
pub use permission::{GroupPermission, PermissionInstance};
pub use refid::{RefIdCache, ReferenceId};
pub use resolve::IncludeSet;
pub use resource::{AssetFolder, DataResource};
pub use schema::{
    is_join_table, join_tables_for, ColumnInfo, ColumnType, DataSource, ForeignKeyData, Relation,
    SchemaRegistry, TableInfo, ACTION_NAME_COLUMN, ACTION_TABLE, ADMINISTRATORS_GROUP,
    AUDIT_SUFFIX, DEFAULT_PERMISSION_COLUMN, ID_COLUMN, JOIN_TABLE_INFIX, PERMISSION_COLUMN,
    REFERENCE_ID_COLUMN, SIGNIN_ACTION, TABLE_INFO_ID_COLUMN, TABLE_INFO_TABLE, TABLE_NAME_COLUMN,
    TYPE_COLUMN, USERGROUP_TABLE, USER_ACCOUNT_ID_COLUMN, USER_ACCOUNT_TABLE,
};
pub use store::{Delete, Filter, Insert, MemoryStore, Row, Select, SqliteStore, Storage, Update};
