//! Membership merge integration tests
//!
//! The merged set always holds the desired groups, never drops a group the
//! principal cannot write, and never keeps a writable group left out of the
//! desired set.

use idcache::access_control::{DelegateGrant, DelegateType, DelegationAuthorizer};
use idcache::error::ValidationError;
use idcache::membership::{MembershipMerger, apply_department_change, merge_memberships};
use idcache::model::GroupOrg;
use rstest::rstest;
use std::collections::{BTreeMap, BTreeSet};

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Pure merge
// =============================================================================

#[rstest]
#[case(&["g1", "g2"], &["g1", "g2"], &["g1", "g2"], &["g1", "g2"])]
#[case(&["g1", "g2"], &[], &["g1"], &["g2"])]
#[case(&["g1"], &["g3"], &["g1", "g3"], &["g3"])]
#[case(&[], &["g1"], &["g1"], &["g1"])]
#[case(&["ro"], &["g1"], &["g1"], &["g1", "ro"])]
fn test_merge(
    #[case] current: &[&str],
    #[case] desired: &[&str],
    #[case] writable: &[&str],
    #[case] expected: &[&str],
) {
    let writable = set(writable);
    let merged = merge_memberships(&set(current), &set(desired), |g| writable.contains(g));
    assert_eq!(merged, set(expected));
}

#[test]
fn test_merge_properties() {
    let current = set(&["a", "b", "c", "d"]);
    let desired = set(&["a", "e"]);
    let writable = set(&["a", "b", "e"]);
    let merged = merge_memberships(&current, &desired, |g| writable.contains(g));

    // Desired groups are always present
    assert!(desired.is_subset(&merged));
    // Unwritable current groups are never dropped
    for group in current.iter().filter(|g| !writable.contains(*g)) {
        assert!(merged.contains(group));
    }
    // Writable groups outside of the desired set are dropped
    assert!(!merged.contains("b"));
    assert_eq!(merged, set(&["a", "c", "d", "e"]));

    // Merging the result again changes nothing
    assert_eq!(
        merge_memberships(&merged, &desired, |g| writable.contains(g)),
        merged
    );
}

// =============================================================================
// Validated merge
// =============================================================================

fn groups() -> BTreeMap<String, GroupOrg> {
    [
        GroupOrg::new("Sales", "cn=sales,ou=groups,o=sample"),
        GroupOrg::new("Finance", "cn=finance,ou=groups,o=sample"),
        GroupOrg::new("Secret", "cn=secret,ou=hidden,o=sample"),
    ]
    .into_iter()
    .map(|g| (g.id.clone(), g))
    .collect()
}

fn authorizer() -> DelegationAuthorizer {
    DelegationAuthorizer::new(
        "delegate",
        vec![
            DelegateGrant::to_user("delegate", DelegateType::Group, "groups", "ou=groups,o=sample"),
            DelegateGrant::to_user("delegate", DelegateType::Group, "sales", "cn=sales,ou=groups,o=sample")
                .with_write(),
        ],
    )
}

#[test]
fn test_invisible_current_group_is_kept() {
    let groups = groups();
    let authorizer = authorizer();
    let merger = MembershipMerger::new(&authorizer, &groups);

    let change = merger
        .compute(&set(&["secret"]), &set(&["sales"]))
        .unwrap();
    assert_eq!(change.merged, set(&["sales", "secret"]));
    assert_eq!(change.added, set(&["sales"]));
    assert!(change.removed.is_empty());
}

#[test]
fn test_invisible_desired_group_is_unknown() {
    let groups = groups();
    let authorizer = authorizer();
    let merger = MembershipMerger::new(&authorizer, &groups);

    let result = merger.compute(&set(&[]), &set(&["secret"]));
    assert!(matches!(result, Err(ValidationError::UnknownGroup { id }) if id == "secret"));
}

#[test]
fn test_read_only_group_change_rejected() {
    let groups = groups();
    let authorizer = authorizer();
    let merger = MembershipMerger::new(&authorizer, &groups);

    assert!(matches!(
        merger.compute(&set(&[]), &set(&["finance"])),
        Err(ValidationError::ReadOnly(_))
    ));
    assert!(matches!(
        merger.compute(&set(&["finance"]), &set(&[])),
        Err(ValidationError::ReadOnly(_))
    ));
    // Keeping it is fine
    assert!(merger.compute(&set(&["finance"]), &set(&["finance"])).unwrap().is_empty());
}

#[test]
fn test_department_change() {
    let mut groups = groups();
    groups
        .get_mut("sales")
        .unwrap()
        .departments
        .insert("D100".to_string());
    groups
        .get_mut("finance")
        .unwrap()
        .departments
        .insert("D200".to_string());

    let mut desired = set(&["sales", "secret"]);
    apply_department_change(&groups, &mut desired, Some("D100"), Some("d200"));
    assert_eq!(desired, set(&["finance", "secret"]));

    let mut unchanged = set(&["secret"]);
    apply_department_change(&groups, &mut unchanged, Some("D100"), Some("d100"));
    assert_eq!(unchanged, set(&["secret"]));
}
