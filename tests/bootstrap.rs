//! The administrator bootstrap: one user claims a fresh instance,
//! then the window closes.

mod common;

use serde_json::{json, Value};

use common::{
    insert_action, insert_book, insert_group, insert_table_metadata, insert_user, resource,
};
use rowgate::{
    AuthPermission, Filter, Select, ADMINISTRATORS_GROUP, DEFAULT_PERMISSION_COLUMN,
    PERMISSION_COLUMN, SIGNIN_ACTION, TABLE_NAME_COLUMN,
};

fn stored_mask(value: &Value) -> AuthPermission {
    AuthPermission::decode(value).unwrap()
}

#[test]
fn a_fresh_instance_can_be_claimed_exactly_once() {
    let resource = resource();
    let (u1, u1_ref) = insert_user(&resource, "first@example.com");
    let (u2, _) = insert_user(&resource, "second@example.com");
    insert_group(&resource, ADMINISTRATORS_GROUP);

    assert!(resource.can_become_admin());
    assert!(resource.administrator_reference_id().unwrap_err().is_not_found());

    assert!(resource.become_admin(u1));

    assert!(!resource.can_become_admin());
    assert_eq!(resource.administrator_reference_id().unwrap(), u1_ref);

    // The second claimant is turned away.
    assert!(!resource.become_admin(u2));
    assert_eq!(resource.administrator_reference_id().unwrap(), u1_ref);
}

#[test]
fn claiming_takes_ownership_of_existing_rows() {
    let resource = resource();
    let (admin, admin_ref) = insert_user(&resource, "admin@example.com");
    let (other, _) = insert_user(&resource, "other@example.com");
    insert_group(&resource, ADMINISTRATORS_GROUP);
    let (book_id, _) = insert_book(&resource, "dune", Some(other), AuthPermission::GUEST_ALL);

    assert!(resource.become_admin(admin));

    let row = resource.get_id_to_object("book", book_id).unwrap();
    assert_eq!(stored_mask(&row[PERMISSION_COLUMN]), AuthPermission::DEFAULT_PERMISSION);

    let perm = resource.row_permission(&row, "book");
    assert_eq!(perm.user_id.as_ref(), Some(&admin_ref));
}

#[test]
fn claiming_tightens_table_and_action_permissions() {
    let resource = resource();
    let (admin, _) = insert_user(&resource, "admin@example.com");
    insert_group(&resource, ADMINISTRATORS_GROUP);
    let book_meta = insert_table_metadata(&resource, "book");
    insert_table_metadata(&resource, "book_audit");
    insert_action(&resource, book_meta, "restore", "Restore", AuthPermission::GUEST_ALL);
    insert_action(&resource, book_meta, SIGNIN_ACTION, "Sign in", AuthPermission::GUEST_ALL);

    assert!(resource.become_admin(admin));

    let meta = |name: &str| {
        resource
            .store()
            .select(
                &Select::new(rowgate::TABLE_INFO_TABLE)
                    .filter(Filter::eq(TABLE_NAME_COLUMN, json!(name))),
            )
            .unwrap()
            .remove(0)
    };
    let book_row = meta("book");
    assert_eq!(
        stored_mask(&book_row[PERMISSION_COLUMN]),
        AuthPermission::DEFAULT_PERMISSION
    );
    assert_eq!(
        stored_mask(&book_row[DEFAULT_PERMISSION_COLUMN]),
        AuthPermission::DEFAULT_PERMISSION
    );

    // Audit history stays readable to its subjects but append-only.
    let audit_row = meta("book_audit");
    assert_eq!(
        stored_mask(&audit_row[PERMISSION_COLUMN]),
        AuthPermission::AUDIT_PERMISSION
    );
    assert_eq!(
        stored_mask(&audit_row[DEFAULT_PERMISSION_COLUMN]),
        AuthPermission::AUDIT_DEFAULT
    );

    let actions = resource.get_all_raw_objects(rowgate::ACTION_TABLE).unwrap();
    for action in &actions {
        let expected = if action[rowgate::ACTION_NAME_COLUMN] == json!(SIGNIN_ACTION) {
            AuthPermission::SIGNIN_DEFAULT
        } else {
            AuthPermission::ACTION_DEFAULT
        };
        assert_eq!(stored_mask(&action[PERMISSION_COLUMN]), expected);
    }
}

#[test]
fn claiming_requires_the_administrators_group_to_exist() {
    let resource = resource();
    let (u1, _) = insert_user(&resource, "first@example.com");

    // Without the group the emptiness probe errors and the claim is
    // refused rather than half-applied.
    assert!(!resource.can_become_admin());
    assert!(!resource.become_admin(u1));
}
