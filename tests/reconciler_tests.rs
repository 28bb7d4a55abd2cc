//! Cache reconciliation integration tests
//!
//! Every test runs against a private in-memory SQLite cache. The pool holds a
//! single connection: connections acquired for assertions are dropped before
//! the next reconciliation.

use idcache::access_control::{DelegateGrant, DelegateType, ReceiverType};
use idcache::cache::rows::{CacheContainer, CacheMembership, CacheProjectGroup, CacheUser};
use idcache::cache::{CacheReconciler, delegates, memory_pool};
use idcache::error::{AppError, CacheError, SourceError};
use idcache::model::{CompanyOrg, ContainerType, DirectorySnapshot, GroupOrg, UserOrg};
use idcache::source::{ProjectGroupSource, StaticProjectGroups};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// Test Helpers
// =============================================================================

fn reconciler(pool: &SqlitePool, pairs: Vec<(i64, String)>) -> CacheReconciler {
    CacheReconciler::new(pool.clone(), Arc::new(StaticProjectGroups::new(pairs)), 1000)
}

/// Groups A and B (B sub-group of A), company c1, user u member of A
fn sample() -> DirectorySnapshot {
    let mut a = GroupOrg::new("A", "cn=a,ou=groups,o=sample");
    a.sub_groups.insert("b".to_string());
    let b = GroupOrg::new("B", "cn=b,cn=a,ou=groups,o=sample");
    DirectorySnapshot::from_parts(
        [CompanyOrg::new("c1", "ou=c1,ou=external,o=sample")],
        [a, b],
        [UserOrg::new("u").with_company("c1").with_groups(["a"])],
    )
}

/// Cached edges as (user, sub-group, group)
async fn edges(pool: &SqlitePool) -> BTreeSet<(Option<String>, Option<String>, String)> {
    let mut conn = pool.acquire().await.unwrap();
    CacheMembership::find_all(&mut conn)
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.user_id, m.sub_group_id, m.group_id))
        .collect()
}

fn user_edge(user: &str, group: &str) -> (Option<String>, Option<String>, String) {
    (Some(user.to_string()), None, group.to_string())
}

fn group_edge(sub_group: &str, group: &str) -> (Option<String>, Option<String>, String) {
    (None, Some(sub_group.to_string()), group.to_string())
}

async fn ids(pool: &SqlitePool, kind: ContainerType) -> Vec<String> {
    let mut conn = pool.acquire().await.unwrap();
    CacheContainer::find_all(&mut conn, kind)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_first_reset_fills_empty_cache() {
    let pool = memory_pool().await.unwrap();
    let stats = reconciler(&pool, vec![]).reset(&sample()).await.unwrap();

    assert_eq!(stats.companies, 1);
    assert_eq!(stats.groups, 2);
    assert_eq!(stats.users, 1);
    assert_eq!(stats.memberships, 2);
    assert_eq!(stats.rows_inserted, 6);
    assert_eq!(stats.rows_deleted, 0);

    assert_eq!(ids(&pool, ContainerType::Group).await, vec!["a", "b"]);
    assert_eq!(ids(&pool, ContainerType::Company).await, vec!["c1"]);
    assert_eq!(
        edges(&pool).await,
        BTreeSet::from([user_edge("u", "a"), group_edge("b", "a")])
    );

    let mut conn = pool.acquire().await.unwrap();
    let user = CacheUser::find(&mut conn, "u").await.unwrap().unwrap();
    assert_eq!(user.company.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_second_reset_is_noop() {
    let pool = memory_pool().await.unwrap();
    let reconciler = reconciler(&pool, vec![(1, "a".to_string())]);
    reconciler.reset(&sample()).await.unwrap();
    let before = edges(&pool).await;

    let stats = reconciler.reset(&sample()).await.unwrap();
    assert!(stats.is_noop(), "unexpected changes: {stats:?}");
    assert_eq!(stats.project_groups, 1);
    assert_eq!(edges(&pool).await, before);
    assert!(reconciler.last_refresh_millis() > 0);
}

#[tokio::test]
async fn test_removed_entities_are_deleted() {
    let pool = memory_pool().await.unwrap();
    let reconciler = reconciler(&pool, vec![(1, "b".to_string())]);
    reconciler.reset(&sample()).await.unwrap();

    // B and u vanish from the directory
    let snapshot = DirectorySnapshot::from_parts(
        [CompanyOrg::new("c1", "ou=c1,ou=external,o=sample")],
        [GroupOrg::new("A", "cn=a,ou=groups,o=sample")],
        [],
    );
    let stats = reconciler.reset(&snapshot).await.unwrap();

    assert_eq!(ids(&pool, ContainerType::Group).await, vec!["a"]);
    assert!(edges(&pool).await.is_empty());
    let mut conn = pool.acquire().await.unwrap();
    assert!(CacheUser::find_all(&mut conn).await.unwrap().is_empty());
    assert!(CacheProjectGroup::find_all(&mut conn).await.unwrap().is_empty());
    // Two edges, one user, one association, one group
    assert_eq!(stats.rows_deleted, 5);
}

#[tokio::test]
async fn test_removed_parent_group_drops_its_edges() {
    let pool = memory_pool().await.unwrap();
    let reconciler = reconciler(&pool, vec![]);
    reconciler.reset(&sample()).await.unwrap();

    // A vanishes, B and u stay and u still lists a
    let snapshot = DirectorySnapshot::from_parts(
        [CompanyOrg::new("c1", "ou=c1,ou=external,o=sample")],
        [GroupOrg::new("B", "cn=b,cn=a,ou=groups,o=sample")],
        [UserOrg::new("u").with_company("c1").with_groups(["a"])],
    );
    let stats = reconciler.reset(&snapshot).await.unwrap();

    assert_eq!(ids(&pool, ContainerType::Group).await, vec!["b"]);
    assert!(edges(&pool).await.is_empty());
    // Edges (u,a) and (b,a), then group a
    assert_eq!(stats.rows_deleted, 3);
    {
        let mut conn = pool.acquire().await.unwrap();
        assert!(CacheUser::find(&mut conn, "u").await.unwrap().is_some());
    }

    let stats = reconciler.reset(&snapshot).await.unwrap();
    assert!(stats.is_noop(), "unexpected changes: {stats:?}");
}

#[tokio::test]
async fn test_membership_changes_are_applied() {
    let pool = memory_pool().await.unwrap();
    let reconciler = reconciler(&pool, vec![]);
    reconciler.reset(&sample()).await.unwrap();

    // u moves from A to B
    let mut snapshot = sample();
    snapshot.users.insert(
        "u".to_string(),
        UserOrg::new("u").with_company("c1").with_groups(["b"]),
    );
    let stats = reconciler.reset(&snapshot).await.unwrap();

    assert_eq!(stats.rows_inserted, 1);
    assert_eq!(stats.rows_deleted, 1);
    assert_eq!(
        edges(&pool).await,
        BTreeSet::from([user_edge("u", "b"), group_edge("b", "a")])
    );
}

#[tokio::test]
async fn test_renamed_group_path_is_updated() {
    let pool = memory_pool().await.unwrap();
    let reconciler = reconciler(&pool, vec![]);
    reconciler.reset(&sample()).await.unwrap();

    let mut snapshot = sample();
    snapshot.groups.get_mut("b").unwrap().path = "cn=b,ou=groups,o=sample".to_string();
    let stats = reconciler.reset(&snapshot).await.unwrap();
    assert_eq!(stats.rows_updated, 1);

    let mut conn = pool.acquire().await.unwrap();
    let b = CacheContainer::find(&mut conn, ContainerType::Group, "b")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b.description, "cn=b,ou=groups,o=sample");
}

#[tokio::test]
async fn test_duplicate_edges_are_removed() {
    let pool = memory_pool().await.unwrap();
    let reconciler = reconciler(&pool, vec![]);
    reconciler.reset(&sample()).await.unwrap();
    {
        let mut conn = pool.acquire().await.unwrap();
        CacheMembership::insert_user(&mut conn, "u", "a").await.unwrap();
        CacheMembership::insert_sub_group(&mut conn, "b", "a").await.unwrap();
    }

    let stats = reconciler.reset(&sample()).await.unwrap();
    assert_eq!(stats.duplicates_removed, 2);
    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(CacheMembership::find_all(&mut conn).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_project_associations() {
    let pool = memory_pool().await.unwrap();
    reconciler(&pool, vec![]).reset(&sample()).await.unwrap();
    {
        let mut conn = pool.acquire().await.unwrap();
        CacheProjectGroup::insert(&mut conn, 3, "a").await.unwrap();
        CacheProjectGroup::insert(&mut conn, 1, "a").await.unwrap();
        CacheProjectGroup::insert(&mut conn, 1, "a").await.unwrap();
    }

    let pairs = vec![(1, "a".to_string()), (2, "b".to_string()), (4, "missing".to_string())];
    let stats = reconciler(&pool, pairs).reset(&sample()).await.unwrap();
    assert_eq!(stats.project_groups, 2);
    assert_eq!(stats.duplicates_removed, 1);

    let mut conn = pool.acquire().await.unwrap();
    let rows: BTreeSet<(i64, String)> = CacheProjectGroup::find_all(&mut conn)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.project_id, r.group_id))
        .collect();
    assert_eq!(rows, BTreeSet::from([(1, "a".to_string()), (2, "b".to_string())]));
}

#[tokio::test]
async fn test_unknown_company_is_not_referenced() {
    let pool = memory_pool().await.unwrap();
    let snapshot = DirectorySnapshot::from_parts(
        [],
        [GroupOrg::new("A", "cn=a,ou=groups,o=sample")],
        [UserOrg::new("u").with_company("nowhere").with_groups(["a", "ghost"])],
    );
    reconciler(&pool, vec![]).reset(&snapshot).await.unwrap();

    assert_eq!(edges(&pool).await, BTreeSet::from([user_edge("u", "a")]));
    let mut conn = pool.acquire().await.unwrap();
    let user = CacheUser::find(&mut conn, "u").await.unwrap().unwrap();
    assert!(user.company.is_none());
}

#[tokio::test]
async fn test_delegates_follow_their_containers() {
    let pool = memory_pool().await.unwrap();
    let moved = DelegateGrant::to_user("jdoe", DelegateType::Company, "c1", "ou=old,o=sample")
        .received_by(ReceiverType::Company, "c1", Some("ou=old,o=sample".to_string()));
    let orphan = DelegateGrant::to_user("jdoe", DelegateType::Company, "gone", "ou=gone,o=sample");
    let tree = DelegateGrant::to_user("jdoe", DelegateType::Tree, "o=sample", "o=sample");
    let (moved_id, tree_id) = {
        let mut conn = pool.acquire().await.unwrap();
        let moved_id = delegates::insert(&mut conn, &moved).await.unwrap();
        delegates::insert(&mut conn, &orphan).await.unwrap();
        let tree_id = delegates::insert(&mut conn, &tree).await.unwrap();
        (moved_id, tree_id)
    };

    let mut snapshot = sample();
    snapshot.companies.get_mut("c1").unwrap().path = "ou=New,o=sample".to_string();
    let stats = reconciler(&pool, vec![]).reset(&snapshot).await.unwrap();
    assert_eq!(stats.updated_delegates, 2);
    assert_eq!(stats.deleted_delegates, 1);

    let mut conn = pool.acquire().await.unwrap();
    let remaining = delegates::find_all(&mut conn).await.unwrap();
    assert_eq!(remaining.len(), 2);
    let repaired = remaining.iter().find(|g| g.id == moved_id).unwrap();
    assert_eq!(repaired.path, "ou=new,o=sample");
    assert_eq!(repaired.receiver_path.as_deref(), Some("ou=new,o=sample"));
    let untouched = remaining.iter().find(|g| g.id == tree_id).unwrap();
    assert_eq!(untouched.path, "o=sample");
}

#[tokio::test]
async fn test_repaired_delegate_paths_are_stable() {
    let pool = memory_pool().await.unwrap();
    let grant = DelegateGrant::to_user("jdoe", DelegateType::Company, "c1", "ou=old,o=sample")
        .received_by(ReceiverType::Company, "c1", Some("ou=old,o=sample".to_string()));
    let id = {
        let mut conn = pool.acquire().await.unwrap();
        delegates::insert(&mut conn, &grant).await.unwrap()
    };

    // Non-ASCII capital and trailing blank in the directory path
    let mut snapshot = sample();
    snapshot.companies.get_mut("c1").unwrap().path = "ou=École,o=sample ".to_string();
    let reconciler = reconciler(&pool, vec![]);
    let stats = reconciler.reset(&snapshot).await.unwrap();
    assert_eq!(stats.updated_delegates, 2);

    for _ in 0..2 {
        let stats = reconciler.reset(&snapshot).await.unwrap();
        assert_eq!(stats.updated_delegates, 0);
        assert!(stats.is_noop(), "unexpected changes: {stats:?}");
    }

    let mut conn = pool.acquire().await.unwrap();
    let repaired = delegates::find_all(&mut conn)
        .await
        .unwrap()
        .into_iter()
        .find(|g| g.id == id)
        .unwrap();
    assert_eq!(repaired.path, "ou=école,o=sample");
    assert_eq!(repaired.receiver_path.as_deref(), Some("ou=école,o=sample"));
}

#[tokio::test]
async fn test_failure_rolls_back_everything() {
    let pool = memory_pool().await.unwrap();
    {
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query(
            "INSERT INTO delegate_org (receiver, receiver_type, name, type, dn, can_admin, can_write) VALUES ('a', 'group', 'x', 'bogus', 'o=sample', 0, 0)",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
    }

    let result = reconciler(&pool, vec![]).reset(&sample()).await;
    assert!(matches!(
        result,
        Err(AppError::Cache(CacheError::Integrity(_)))
    ));
    assert!(ids(&pool, ContainerType::Group).await.is_empty());
    assert!(edges(&pool).await.is_empty());
}

struct FailingProjectGroups;

#[async_trait::async_trait]
impl ProjectGroupSource for FailingProjectGroups {
    async fn project_groups(&self) -> Result<Vec<(i64, String)>, SourceError> {
        Err(SourceError::Provider("subscriptions unavailable".to_string()))
    }
}

#[tokio::test]
async fn test_source_failure_leaves_cache_untouched() {
    let pool = memory_pool().await.unwrap();
    let reconciler = CacheReconciler::new(pool.clone(), Arc::new(FailingProjectGroups), 1000);

    let result = reconciler.reset(&sample()).await;
    assert!(matches!(result, Err(AppError::Source(_))));
    assert!(ids(&pool, ContainerType::Company).await.is_empty());
    assert_eq!(reconciler.last_refresh_millis(), 0);
}

#[tokio::test]
async fn test_small_batches_delete_everything() {
    let pool = memory_pool().await.unwrap();
    let users: Vec<UserOrg> = (0..25)
        .map(|i| UserOrg::new(&format!("user{i}")).with_groups(["a"]))
        .collect();
    let groups = [GroupOrg::new("A", "cn=a,ou=groups,o=sample")];
    let reconciler = CacheReconciler::new(pool.clone(), Arc::new(StaticProjectGroups::default()), 4);
    reconciler
        .reset(&DirectorySnapshot::from_parts([], groups.clone(), users))
        .await
        .unwrap();

    let stats = reconciler
        .reset(&DirectorySnapshot::from_parts([], groups, []))
        .await
        .unwrap();
    assert_eq!(stats.rows_deleted, 50);
    let mut conn = pool.acquire().await.unwrap();
    assert!(CacheUser::find_all(&mut conn).await.unwrap().is_empty());
}
