//! Group membership resolution through generated association rows.

mod common;

use serde_json::json;

use common::{insert_book, insert_group, insert_user, link_to_group, resource};
use rowgate::{AuthPermission, Capability, USERGROUP_TABLE, USER_ACCOUNT_TABLE};

#[test]
fn memberships_carry_the_join_rows_mask() {
    let resource = resource();
    let (user_id, _) = insert_user(&resource, "user@example.com");
    let (g1, g1_ref) = insert_group(&resource, "editors");
    let (g2, g2_ref) = insert_group(&resource, "reviewers");
    let rel1 = link_to_group(
        &resource,
        USER_ACCOUNT_TABLE,
        user_id,
        g1,
        AuthPermission::GROUP_READ,
    );
    link_to_group(
        &resource,
        USER_ACCOUNT_TABLE,
        user_id,
        g2,
        AuthPermission::GROUP_ALL,
    );

    let groups = resource
        .groups_for_object(USER_ACCOUNT_TABLE, user_id)
        .unwrap();
    assert_eq!(groups.len(), 2);

    let m1 = groups
        .iter()
        .find(|g| g.group_reference_id == g1_ref)
        .unwrap();
    assert_eq!(m1.permission, AuthPermission::GROUP_READ);
    assert_eq!(m1.relation_reference_id, rel1);
    assert!(!m1.permission.allows_group(Capability::Update));

    let m2 = groups
        .iter()
        .find(|g| g.group_reference_id == g2_ref)
        .unwrap();
    assert!(m2.permission.allows_group(Capability::Delete));
}

#[test]
fn object_without_memberships_has_an_empty_list() {
    let resource = resource();
    let (user_id, _) = insert_user(&resource, "loner@example.com");
    let groups = resource
        .groups_for_object(USER_ACCOUNT_TABLE, user_id)
        .unwrap();
    assert!(groups.is_empty());
}

#[test]
fn missing_object_also_has_an_empty_list() {
    let resource = resource();
    let groups = resource.groups_for_object("book", 404).unwrap();
    assert!(groups.is_empty());
}

#[test]
fn a_group_is_a_member_of_itself() {
    let resource = resource();
    let (group_id, group_ref) = insert_group(&resource, "editors");
    let groups = resource
        .groups_for_object(USERGROUP_TABLE, group_id)
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].group_reference_id, group_ref);
    assert_eq!(groups[0].object_reference_id, group_ref);
    assert_eq!(groups[0].permission, AuthPermission::DEFAULT_PERMISSION);
}

#[test]
fn unregistered_relation_is_a_configuration_error() {
    let resource = resource();
    // book_audit has no usergroup relation.
    let err = resource.groups_for_object("book_audit", 1).unwrap_err();
    assert!(matches!(err, rowgate::Error::Config(_)));
}

#[test]
fn matching_resolves_memberships_for_all_hits_in_one_pass() {
    let resource = resource();
    let (owner_id, _) = insert_user(&resource, "owner@example.com");
    let (group_id, group_ref) = insert_group(&resource, "editors");
    let (b1, b1_ref) = insert_book(&resource, "dune", Some(owner_id), AuthPermission::GUEST_READ);
    let (b2, b2_ref) = insert_book(&resource, "dune", Some(owner_id), AuthPermission::GUEST_READ);
    insert_book(&resource, "other", Some(owner_id), AuthPermission::GUEST_READ);
    link_to_group(&resource, "book", b1, group_id, AuthPermission::GROUP_READ);
    link_to_group(&resource, "book", b2, group_id, AuthPermission::GROUP_UPDATE);

    let groups = resource
        .groups_for_objects_matching("book", "title", &json!("dune"))
        .unwrap();
    assert_eq!(groups.len(), 2);
    assert!(groups.iter().all(|g| g.group_reference_id == group_ref));
    let by_object = |r: &rowgate::ReferenceId| {
        groups
            .iter()
            .find(|g| &g.object_reference_id == r)
            .unwrap()
            .permission
    };
    assert_eq!(by_object(&b1_ref), AuthPermission::GROUP_READ);
    assert_eq!(by_object(&b2_ref), AuthPermission::GROUP_UPDATE);
}

#[test]
fn membership_pointing_at_a_deleted_group_is_skipped() {
    let resource = resource();
    let (user_id, _) = insert_user(&resource, "user@example.com");
    let (group_id, _) = insert_group(&resource, "ghosts");
    link_to_group(
        &resource,
        USER_ACCOUNT_TABLE,
        user_id,
        group_id,
        AuthPermission::GROUP_ALL,
    );
    resource
        .store()
        .delete(
            &rowgate::Delete::new(USERGROUP_TABLE).filter(rowgate::Filter::eq(
                "id",
                serde_json::Value::from(group_id),
            )),
        )
        .unwrap();

    let groups = resource
        .groups_for_object(USER_ACCOUNT_TABLE, user_id)
        .unwrap();
    assert!(groups.is_empty());
}
