//! Cache reconciliation
//!
//! Makes the relational cache match one authoritative directory snapshot,
//! within a single transaction. Steps run in order, later ones resolving rows
//! written by earlier ones:
//! 1. upsert companies
//! 2. upsert groups
//! 3. upsert users and sync their memberships, then the sub-group edges
//! 4. sync project to group associations
//! 5. repair or delete delegates naming a moved or vanished container
//! 6. delete the groups and companies absent from the snapshot
//!
//! Any failure drops the transaction, so the cache is left as it was. Callers
//! must not run two reconciliations at once.

use crate::access_control::{DelegateType, ReceiverType, normalize_path};
use crate::cache::delegates;
use crate::cache::rows::{CacheContainer, CacheMembership, CacheProjectGroup, CacheUser};
use crate::error::{CacheResult, Result};
use crate::model::{ContainerType, DirectorySnapshot};
use crate::source::ProjectGroupSource;
use crate::util::now_millis;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Counters of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub companies: usize,
    pub groups: usize,
    pub users: usize,
    /// User and sub-group memberships in the snapshot
    pub memberships: usize,
    /// Project associations kept or created
    pub project_groups: usize,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
    /// Duplicate edges removed, included in `rows_deleted`
    pub duplicates_removed: u64,
    pub updated_delegates: u64,
    pub deleted_delegates: u64,
    pub elapsed_ms: u64,
    /// UTC milliseconds
    pub completed_at_ms: i64,
}

impl ReconcileStats {
    /// Whether the run changed any row
    pub fn is_noop(&self) -> bool {
        self.rows_inserted == 0
            && self.rows_updated == 0
            && self.rows_deleted == 0
            && self.updated_delegates == 0
            && self.deleted_delegates == 0
    }
}

/// Bulk resync of the relational cache
pub struct CacheReconciler {
    pool: SqlitePool,
    project_groups: Arc<dyn ProjectGroupSource>,
    batch_size: usize,
    last_refresh: AtomicI64,
}

impl CacheReconciler {
    pub fn new(
        pool: SqlitePool,
        project_groups: Arc<dyn ProjectGroupSource>,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            project_groups,
            batch_size: batch_size.max(1),
            last_refresh: AtomicI64::new(0),
        }
    }

    /// Completion time of the last successful reconciliation, 0 if none
    pub fn last_refresh_millis(&self) -> i64 {
        self.last_refresh.load(Ordering::Relaxed)
    }

    /// Reconcile the cache against `snapshot`
    #[instrument(skip_all)]
    pub async fn reset(&self, snapshot: &DirectorySnapshot) -> Result<ReconcileStats> {
        let start = Instant::now();
        let pairs = self.project_groups.project_groups().await?;

        info!(
            companies = snapshot.companies.len(),
            groups = snapshot.groups.len(),
            users = snapshot.users.len(),
            project_groups = pairs.len(),
            "Reconciling cache"
        );

        let mut stats = ReconcileStats {
            companies: snapshot.companies.len(),
            groups: snapshot.groups.len(),
            users: snapshot.users.len(),
            ..Default::default()
        };

        let mut tx = self.pool.begin().await?;

        let companies: Vec<CacheContainer> =
            snapshot.companies.values().map(CacheContainer::from).collect();
        let old_companies =
            upsert_containers(&mut tx, ContainerType::Company, &companies, &mut stats).await?;

        let groups: Vec<CacheContainer> = snapshot.groups.values().map(CacheContainer::from).collect();
        let old_groups = upsert_containers(&mut tx, ContainerType::Group, &groups, &mut stats).await?;

        self.persist_users_and_memberships(&mut tx, snapshot, &mut stats)
            .await?;
        persist_project_groups(&mut tx, snapshot, &pairs, self.batch_size, &mut stats).await?;

        let group_paths: BTreeMap<&str, &str> = groups
            .iter()
            .map(|g| (g.id.as_str(), g.description.as_str()))
            .collect();
        repair_delegates(&mut tx, ContainerType::Group, &group_paths, &mut stats).await?;
        let company_paths: BTreeMap<&str, &str> = companies
            .iter()
            .map(|c| (c.id.as_str(), c.description.as_str()))
            .collect();
        repair_delegates(&mut tx, ContainerType::Company, &company_paths, &mut stats).await?;

        let removed_groups: Vec<String> = old_groups
            .into_iter()
            .filter(|id| !snapshot.groups.contains_key(id))
            .collect();
        if !removed_groups.is_empty() {
            info!(count = removed_groups.len(), "Deleting removed groups");
            stats.rows_deleted +=
                CacheMembership::delete_by_groups(&mut tx, &removed_groups, self.batch_size).await?;
            stats.rows_deleted +=
                CacheProjectGroup::delete_by_groups(&mut tx, &removed_groups, self.batch_size)
                    .await?;
            stats.rows_deleted += CacheContainer::delete_all(
                &mut tx,
                ContainerType::Group,
                &removed_groups,
                self.batch_size,
            )
            .await?;
        }

        let removed_companies: Vec<String> = old_companies
            .into_iter()
            .filter(|id| !snapshot.companies.contains_key(id))
            .collect();
        if !removed_companies.is_empty() {
            info!(count = removed_companies.len(), "Deleting removed companies");
            stats.rows_deleted += CacheContainer::delete_all(
                &mut tx,
                ContainerType::Company,
                &removed_companies,
                self.batch_size,
            )
            .await?;
        }

        tx.commit().await?;

        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        stats.completed_at_ms = now_millis();
        self.last_refresh
            .store(stats.completed_at_ms, Ordering::Relaxed);

        info!(
            groups = stats.groups,
            companies = stats.companies,
            users = stats.users,
            memberships = stats.memberships,
            project_groups = stats.project_groups,
            inserted = stats.rows_inserted,
            updated = stats.rows_updated,
            deleted = stats.rows_deleted,
            updated_delegates = stats.updated_delegates,
            deleted_delegates = stats.deleted_delegates,
            elapsed_ms = stats.elapsed_ms,
            "Updated cache"
        );
        Ok(stats)
    }

    /// Step 3: users, user memberships and sub-group edges
    async fn persist_users_and_memberships(
        &self,
        conn: &mut SqliteConnection,
        snapshot: &DirectorySnapshot,
        stats: &mut ReconcileStats,
    ) -> CacheResult<()> {
        let old_users: HashMap<String, CacheUser> = CacheUser::find_all(conn)
            .await?
            .into_iter()
            .map(|u| (u.id.clone(), u))
            .collect();

        let (user_edges, group_edges): (Vec<_>, Vec<_>) = CacheMembership::find_all(conn)
            .await?
            .into_iter()
            .filter(|m| m.owner().is_some())
            .partition(|m| m.user_id.is_some());

        let mut by_user = dedupe_edges(conn, user_edges, self.batch_size, stats).await?;
        let mut by_parent = HashMap::<String, HashSet<String>>::new();
        for (sub_group, parents) in dedupe_edges(conn, group_edges, self.batch_size, stats).await? {
            for parent in parents {
                by_parent.entry(parent).or_default().insert(sub_group.clone());
            }
        }

        for user in snapshot.users.values() {
            let mut row = CacheUser::from(user);
            if let Some(company) = &row.company
                && !snapshot.companies.contains_key(company)
            {
                warn!(user = %user.id, company = %company, "User refers to an unknown company");
                row.company = None;
            }
            match old_users.get(&user.id) {
                Some(old) if *old == row => {}
                Some(_) => stats.rows_updated += row.update(conn).await?,
                None => {
                    row.insert(conn).await?;
                    stats.rows_inserted += 1;
                }
            }

            let desired = known_groups(snapshot, &user.id, &user.groups);
            let cached = by_user.remove(&user.id).unwrap_or_default();
            for group in desired.iter().filter(|g| !cached.contains(*g)) {
                CacheMembership::insert_user(conn, &user.id, group).await?;
                stats.rows_inserted += 1;
            }
            for group in cached.iter().filter(|g| !desired.contains(*g)) {
                info!(user = %user.id, group = %group, "Deleting removed cache membership");
                stats.rows_deleted += CacheMembership::delete_user(conn, &user.id, group).await?;
            }
            stats.memberships += desired.len();
        }

        for group in snapshot.groups.values() {
            let desired = known_groups(snapshot, &group.id, &group.sub_groups);
            let cached = by_parent.remove(&group.id).unwrap_or_default();
            for sub_group in desired.iter().filter(|g| !cached.contains(*g)) {
                CacheMembership::insert_sub_group(conn, sub_group, &group.id).await?;
                stats.rows_inserted += 1;
            }
            for sub_group in cached.iter().filter(|g| !desired.contains(*g)) {
                info!(group = %group.id, sub_group = %sub_group, "Deleting removed cache sub-group");
                stats.rows_deleted +=
                    CacheMembership::delete_sub_group(conn, sub_group, &group.id).await?;
            }
            stats.memberships += desired.len();
        }

        let removed_users: Vec<String> = old_users
            .into_keys()
            .filter(|id| !snapshot.users.contains_key(id))
            .collect();
        if !removed_users.is_empty() {
            info!(count = removed_users.len(), "Deleting removed users");
            stats.rows_deleted +=
                CacheMembership::delete_by_users(conn, &removed_users, self.batch_size).await?;
            stats.rows_deleted += CacheUser::delete_all(conn, &removed_users, self.batch_size).await?;
        }
        Ok(())
    }
}

/// Steps 1 and 2: insert or update containers, returning the identifiers
/// cached before the run
async fn upsert_containers(
    conn: &mut SqliteConnection,
    kind: ContainerType,
    containers: &[CacheContainer],
    stats: &mut ReconcileStats,
) -> CacheResult<BTreeSet<String>> {
    let old: HashMap<String, CacheContainer> = CacheContainer::find_all(conn, kind)
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();

    for container in containers {
        match old.get(&container.id) {
            Some(cached) if cached == container => {}
            Some(_) => stats.rows_updated += container.update(conn, kind).await?,
            None => {
                container.insert(conn, kind).await?;
                stats.rows_inserted += 1;
            }
        }
    }
    Ok(old.into_keys().collect())
}

/// Snapshot group references that resolve to a snapshot group
fn known_groups(
    snapshot: &DirectorySnapshot,
    owner: &str,
    groups: &BTreeSet<String>,
) -> BTreeSet<String> {
    groups
        .iter()
        .filter(|g| {
            let known = snapshot.groups.contains_key(*g);
            if !known {
                debug!(owner, group = %g, "Skipping membership of an unknown group");
            }
            known
        })
        .cloned()
        .collect()
}

/// Keep one edge per (owner, group), deleting the others, and index the
/// survivors by owner
async fn dedupe_edges(
    conn: &mut SqliteConnection,
    edges: Vec<CacheMembership>,
    batch_size: usize,
    stats: &mut ReconcileStats,
) -> CacheResult<HashMap<String, HashSet<String>>> {
    let mut by_owner = HashMap::<String, HashSet<String>>::new();
    let mut duplicates = Vec::new();
    for edge in edges {
        let Some(owner) = edge.owner() else {
            continue;
        };
        if !by_owner
            .entry(owner.to_string())
            .or_default()
            .insert(edge.group_id.clone())
        {
            duplicates.push(edge.id);
        }
    }
    if !duplicates.is_empty() {
        warn!(count = duplicates.len(), "Deleting duplicate cache memberships");
        let deleted = CacheMembership::delete_by_ids(conn, &duplicates, batch_size).await?;
        stats.duplicates_removed += deleted;
        stats.rows_deleted += deleted;
    }
    Ok(by_owner)
}

/// Step 4: project associations
async fn persist_project_groups(
    conn: &mut SqliteConnection,
    snapshot: &DirectorySnapshot,
    pairs: &[(i64, String)],
    batch_size: usize,
    stats: &mut ReconcileStats,
) -> CacheResult<()> {
    let mut stale = HashSet::<(i64, String)>::new();
    let mut duplicates = Vec::new();
    for row in CacheProjectGroup::find_all(conn).await? {
        if !stale.insert((row.project_id, row.group_id.clone())) {
            duplicates.push(row.id);
        }
    }
    if !duplicates.is_empty() {
        warn!(count = duplicates.len(), "Deleting duplicate project associations");
        let deleted = CacheProjectGroup::delete_by_ids(conn, &duplicates, batch_size).await?;
        stats.duplicates_removed += deleted;
        stats.rows_deleted += deleted;
    }

    let authoritative: BTreeSet<&(i64, String)> = pairs.iter().collect();
    for pair in authoritative {
        let (project, group) = pair;
        if !snapshot.groups.contains_key(group) {
            debug!(project, group = %group, "Skipping association to an unknown group");
            continue;
        }
        if !stale.remove(pair) {
            CacheProjectGroup::insert(conn, *project, group).await?;
            stats.rows_inserted += 1;
        }
        stats.project_groups += 1;
    }

    for (project, group) in stale {
        info!(project, group = %group, "Deleting removed project association");
        stats.rows_deleted += CacheProjectGroup::delete(conn, project, &group).await?;
    }
    Ok(())
}

/// Step 5: fix the cached paths of delegates naming a container of `kind`
///
/// Both the receiver side and the resource side are checked. A delegate
/// naming a container absent from `paths` is deleted, one whose normalized
/// cached path differs from the normalized container path is updated.
async fn repair_delegates(
    conn: &mut SqliteConnection,
    kind: ContainerType,
    paths: &BTreeMap<&str, &str>,
    stats: &mut ReconcileStats,
) -> CacheResult<()> {
    for grant in delegates::find_by_receiver_type(conn, ReceiverType::from(kind)).await? {
        let Some(cached) = grant.receiver_path.as_deref() else {
            continue;
        };
        match paths.get(grant.receiver.as_str()) {
            None => {
                info!(delegate = grant.id, receiver = %grant.receiver, "Deleting delegate of a removed receiver");
                stats.deleted_delegates += delegates::delete(conn, grant.id).await?;
            }
            Some(path) => {
                let path = normalize_path(path);
                if path != normalize_path(cached) {
                    debug!(delegate = grant.id, from = cached, to = %path, "Repairing receiver path");
                    stats.updated_delegates +=
                        delegates::update_receiver_path(conn, grant.id, &path).await?;
                }
            }
        }
    }

    for grant in delegates::find_by_resource_type(conn, DelegateType::from(kind)).await? {
        match paths.get(grant.name.as_str()) {
            None => {
                info!(delegate = grant.id, name = %grant.name, "Deleting delegate of a removed resource");
                stats.deleted_delegates += delegates::delete(conn, grant.id).await?;
            }
            Some(path) => {
                let path = normalize_path(path);
                if path != normalize_path(&grant.path) {
                    debug!(delegate = grant.id, from = %grant.path, to = %path, "Repairing resource path");
                    stats.updated_delegates += delegates::update_path(conn, grant.id, &path).await?;
                }
            }
        }
    }
    Ok(())
}
