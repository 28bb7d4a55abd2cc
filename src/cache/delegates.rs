//! Delegate grant store
//!
//! Grants are created by the authorization management flow. The cache only
//! reads them for authorization, and reconciliation repairs or deletes them
//! when the container they name moves or vanishes.

use crate::access_control::{DelegateGrant, DelegateType, ReceiverType, is_ancestor_or_self};
use crate::error::{CacheError, CacheResult};
use sqlx::{FromRow, SqliteConnection};

const SELECT_DELEGATE: &str = "SELECT id, receiver, receiver_type, receiver_dn, name, type, dn, can_admin, can_write FROM delegate_org";

#[derive(Debug, Clone, FromRow)]
struct DelegateRow {
    id: i64,
    receiver: String,
    receiver_type: String,
    receiver_dn: Option<String>,
    name: String,
    #[sqlx(rename = "type")]
    resource_type: String,
    dn: String,
    can_admin: bool,
    can_write: bool,
}

impl TryFrom<DelegateRow> for DelegateGrant {
    type Error = CacheError;

    fn try_from(row: DelegateRow) -> Result<Self, Self::Error> {
        let receiver_type = ReceiverType::try_parse(&row.receiver_type).ok_or_else(|| {
            CacheError::Integrity(format!(
                "delegate #{} has unknown receiver type '{}'",
                row.id, row.receiver_type
            ))
        })?;
        let resource_type = DelegateType::try_parse(&row.resource_type).ok_or_else(|| {
            CacheError::Integrity(format!(
                "delegate #{} has unknown resource type '{}'",
                row.id, row.resource_type
            ))
        })?;
        Ok(DelegateGrant {
            id: row.id,
            receiver: row.receiver,
            receiver_type,
            receiver_path: row.receiver_dn,
            name: row.name,
            resource_type,
            path: row.dn,
            can_admin: row.can_admin,
            can_write: row.can_write,
        })
    }
}

fn into_grants(rows: Vec<DelegateRow>) -> CacheResult<Vec<DelegateGrant>> {
    rows.into_iter().map(DelegateGrant::try_from).collect()
}

/// Insert a grant, returning its identifier
pub async fn insert(conn: &mut SqliteConnection, grant: &DelegateGrant) -> CacheResult<i64> {
    let result = sqlx::query(
        "INSERT INTO delegate_org (receiver, receiver_type, receiver_dn, name, type, dn, can_admin, can_write) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&grant.receiver)
    .bind(grant.receiver_type.as_str())
    .bind(&grant.receiver_path)
    .bind(&grant.name)
    .bind(grant.resource_type.as_str())
    .bind(&grant.path)
    .bind(grant.can_admin)
    .bind(grant.can_write)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn find_all(conn: &mut SqliteConnection) -> CacheResult<Vec<DelegateGrant>> {
    let rows = sqlx::query_as::<_, DelegateRow>(&format!("{SELECT_DELEGATE} ORDER BY id"))
        .fetch_all(&mut *conn)
        .await?;
    into_grants(rows)
}

/// Grants held by receivers of the given kind
pub async fn find_by_receiver_type(
    conn: &mut SqliteConnection,
    receiver_type: ReceiverType,
) -> CacheResult<Vec<DelegateGrant>> {
    let rows = sqlx::query_as::<_, DelegateRow>(&format!(
        "{SELECT_DELEGATE} WHERE receiver_type = ? ORDER BY id"
    ))
    .bind(receiver_type.as_str())
    .fetch_all(&mut *conn)
    .await?;
    into_grants(rows)
}

/// Grants covering resources of the given kind
pub async fn find_by_resource_type(
    conn: &mut SqliteConnection,
    resource_type: DelegateType,
) -> CacheResult<Vec<DelegateGrant>> {
    let rows = sqlx::query_as::<_, DelegateRow>(&format!("{SELECT_DELEGATE} WHERE type = ? ORDER BY id"))
        .bind(resource_type.as_str())
        .fetch_all(&mut *conn)
        .await?;
    into_grants(rows)
}

/// Grants applying to a user
///
/// A user receives the grants addressed to itself, to any group it belongs
/// to, and to any company whose path contains the path of its company.
pub async fn find_for_user(
    conn: &mut SqliteConnection,
    user: &str,
    groups: &[String],
    company_path: Option<&str>,
) -> CacheResult<Vec<DelegateGrant>> {
    let rows = sqlx::query_as::<_, DelegateRow>(&format!(
        "{SELECT_DELEGATE} WHERE (receiver_type = 'user' AND receiver = ?) OR receiver_type IN ('group', 'company') ORDER BY id"
    ))
    .bind(user)
    .fetch_all(&mut *conn)
    .await?;

    let grants = into_grants(rows)?
        .into_iter()
        .filter(|g| match g.receiver_type {
            ReceiverType::User => true,
            ReceiverType::Group => groups.contains(&g.receiver),
            ReceiverType::Company => {
                is_ancestor_or_self(g.receiver_path.as_deref(), company_path)
            }
        })
        .collect();
    Ok(grants)
}

/// Overwrite the cached path of the receiver
pub async fn update_receiver_path(
    conn: &mut SqliteConnection,
    id: i64,
    path: &str,
) -> CacheResult<u64> {
    let result = sqlx::query("UPDATE delegate_org SET receiver_dn = ? WHERE id = ?")
        .bind(path)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Overwrite the cached path of the covered resource
pub async fn update_path(conn: &mut SqliteConnection, id: i64, path: &str) -> CacheResult<u64> {
    let result = sqlx::query("UPDATE delegate_org SET dn = ? WHERE id = ?")
        .bind(path)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete(conn: &mut SqliteConnection, id: i64) -> CacheResult<u64> {
    let result = sqlx::query("DELETE FROM delegate_org WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
