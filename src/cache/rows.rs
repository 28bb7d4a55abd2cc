//! Cache rows
//!
//! One type per cache table with the statements reading and writing it. Every
//! statement runs on a caller supplied connection, so reconciliation can chain
//! them inside a single transaction.

use crate::error::CacheResult;
use crate::model::{CompanyOrg, ContainerType, GroupOrg, UserOrg};
use crate::util::batches;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};

/// Delete every row of `table` whose `column` is one of `ids`, in batches
pub(crate) async fn delete_in<T>(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    ids: &[T],
    batch_size: usize,
) -> CacheResult<u64>
where
    T: Clone + Send + 'static + for<'q> sqlx::Encode<'q, Sqlite> + sqlx::Type<Sqlite>,
{
    let mut deleted = 0;
    for batch in batches(ids, batch_size) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("DELETE FROM {table} WHERE {column} IN ("));
        let mut separated = builder.separated(", ");
        for id in batch {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");
        deleted += builder.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}

fn container_table(kind: ContainerType) -> &'static str {
    match kind {
        ContainerType::Group => "cache_group",
        ContainerType::Company => "cache_company",
    }
}

/// A cached group or company, `description` holding the path
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CacheContainer {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl From<&CompanyOrg> for CacheContainer {
    fn from(company: &CompanyOrg) -> Self {
        Self {
            id: company.id.clone(),
            name: company.name.clone(),
            description: company.path.clone(),
        }
    }
}

impl From<&GroupOrg> for CacheContainer {
    fn from(group: &GroupOrg) -> Self {
        Self {
            id: group.id.clone(),
            name: group.name.clone(),
            description: group.path.clone(),
        }
    }
}

impl CacheContainer {
    pub async fn find_all(conn: &mut SqliteConnection, kind: ContainerType) -> CacheResult<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(&format!(
            "SELECT id, name, description FROM {} ORDER BY id",
            container_table(kind)
        ))
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn find(
        conn: &mut SqliteConnection,
        kind: ContainerType,
        id: &str,
    ) -> CacheResult<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(&format!(
            "SELECT id, name, description FROM {} WHERE id = ?",
            container_table(kind)
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn insert(&self, conn: &mut SqliteConnection, kind: ContainerType) -> CacheResult<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (id, name, description) VALUES (?, ?, ?)",
            container_table(kind)
        ))
        .bind(&self.id)
        .bind(&self.name)
        .bind(&self.description)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn update(&self, conn: &mut SqliteConnection, kind: ContainerType) -> CacheResult<u64> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET name = ?, description = ? WHERE id = ?",
            container_table(kind)
        ))
        .bind(&self.name)
        .bind(&self.description)
        .bind(&self.id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all(
        conn: &mut SqliteConnection,
        kind: ContainerType,
        ids: &[String],
        batch_size: usize,
    ) -> CacheResult<u64> {
        delete_in(conn, container_table(kind), "id", ids, batch_size).await
    }
}

/// A cached user, only the first mail is kept
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CacheUser {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub mails: Option<String>,
    pub company: Option<String>,
    pub locked: bool,
    pub locked_by: Option<String>,
    pub isolated: Option<String>,
}

impl From<&UserOrg> for CacheUser {
    fn from(user: &UserOrg) -> Self {
        Self {
            id: user.id.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            mails: user.primary_mail().map(str::to_string),
            company: user.company.clone(),
            locked: user.locked,
            locked_by: user.locked_by.clone(),
            isolated: user.isolated.clone(),
        }
    }
}

const USER_COLUMNS: &str = "id, first_name, last_name, mails, company, locked, locked_by, isolated";

impl CacheUser {
    pub async fn find_all(conn: &mut SqliteConnection) -> CacheResult<Vec<Self>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM cache_user ORDER BY id");
        let rows = sqlx::query_as::<_, Self>(&sql).fetch_all(&mut *conn).await?;
        Ok(rows)
    }

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> CacheResult<Option<Self>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM cache_user WHERE id = ?");
        let row = sqlx::query_as::<_, Self>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn insert(&self, conn: &mut SqliteConnection) -> CacheResult<()> {
        let sql = format!("INSERT INTO cache_user ({USER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&sql)
            .bind(&self.id)
            .bind(&self.first_name)
            .bind(&self.last_name)
            .bind(&self.mails)
            .bind(&self.company)
            .bind(self.locked)
            .bind(&self.locked_by)
            .bind(&self.isolated)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn update(&self, conn: &mut SqliteConnection) -> CacheResult<u64> {
        let result = sqlx::query(
            "UPDATE cache_user SET first_name = ?, last_name = ?, mails = ?, company = ?, locked = ?, locked_by = ?, isolated = ? WHERE id = ?",
        )
        .bind(&self.first_name)
        .bind(&self.last_name)
        .bind(&self.mails)
        .bind(&self.company)
        .bind(self.locked)
        .bind(&self.locked_by)
        .bind(&self.isolated)
        .bind(&self.id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all(
        conn: &mut SqliteConnection,
        ids: &[String],
        batch_size: usize,
    ) -> CacheResult<u64> {
        delete_in(conn, "cache_user", "id", ids, batch_size).await
    }
}

/// A membership edge, owned either by a user or by a sub-group
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CacheMembership {
    pub id: i64,
    pub user_id: Option<String>,
    pub sub_group_id: Option<String>,
    pub group_id: String,
}

impl CacheMembership {
    /// Owner of the edge, the user or the sub-group
    pub fn owner(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.sub_group_id.as_deref())
    }

    pub async fn find_all(conn: &mut SqliteConnection) -> CacheResult<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            "SELECT id, user_id, sub_group_id, group_id FROM cache_membership ORDER BY id",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn insert_user(conn: &mut SqliteConnection, user: &str, group: &str) -> CacheResult<()> {
        sqlx::query("INSERT INTO cache_membership (user_id, group_id) VALUES (?, ?)")
            .bind(user)
            .bind(group)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn insert_sub_group(
        conn: &mut SqliteConnection,
        sub_group: &str,
        group: &str,
    ) -> CacheResult<()> {
        sqlx::query("INSERT INTO cache_membership (sub_group_id, group_id) VALUES (?, ?)")
            .bind(sub_group)
            .bind(group)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn exists_user(conn: &mut SqliteConnection, user: &str, group: &str) -> CacheResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM cache_membership WHERE user_id = ? AND group_id = ? LIMIT 1",
        )
        .bind(user)
        .bind(group)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.is_some())
    }

    pub async fn exists_sub_group(
        conn: &mut SqliteConnection,
        sub_group: &str,
        group: &str,
    ) -> CacheResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM cache_membership WHERE sub_group_id = ? AND group_id = ? LIMIT 1",
        )
        .bind(sub_group)
        .bind(group)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.is_some())
    }

    /// Delete the exact (user, group) edge
    pub async fn delete_user(conn: &mut SqliteConnection, user: &str, group: &str) -> CacheResult<u64> {
        let result = sqlx::query("DELETE FROM cache_membership WHERE user_id = ? AND group_id = ?")
            .bind(user)
            .bind(group)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete the exact (sub-group, group) edge
    pub async fn delete_sub_group(
        conn: &mut SqliteConnection,
        sub_group: &str,
        group: &str,
    ) -> CacheResult<u64> {
        let result =
            sqlx::query("DELETE FROM cache_membership WHERE sub_group_id = ? AND group_id = ?")
                .bind(sub_group)
                .bind(group)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected())
    }

    /// Delete the user memberships of a group, keeping its sub-groups
    pub async fn delete_group_members(conn: &mut SqliteConnection, group: &str) -> CacheResult<u64> {
        let result =
            sqlx::query("DELETE FROM cache_membership WHERE group_id = ? AND user_id IS NOT NULL")
                .bind(group)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_ids(
        conn: &mut SqliteConnection,
        ids: &[i64],
        batch_size: usize,
    ) -> CacheResult<u64> {
        delete_in(conn, "cache_membership", "id", ids, batch_size).await
    }

    /// Delete every membership of the given users
    pub async fn delete_by_users(
        conn: &mut SqliteConnection,
        users: &[String],
        batch_size: usize,
    ) -> CacheResult<u64> {
        delete_in(conn, "cache_membership", "user_id", users, batch_size).await
    }

    /// Delete every edge where one of the groups is the parent or the sub-group
    pub async fn delete_by_groups(
        conn: &mut SqliteConnection,
        groups: &[String],
        batch_size: usize,
    ) -> CacheResult<u64> {
        let as_parent = delete_in(conn, "cache_membership", "group_id", groups, batch_size).await?;
        let as_child = delete_in(conn, "cache_membership", "sub_group_id", groups, batch_size).await?;
        Ok(as_parent + as_child)
    }
}

/// Association of a project to a group
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CacheProjectGroup {
    pub id: i64,
    pub project_id: i64,
    pub group_id: String,
}

impl CacheProjectGroup {
    pub async fn find_all(conn: &mut SqliteConnection) -> CacheResult<Vec<Self>> {
        let rows = sqlx::query_as::<_, Self>(
            "SELECT id, project_id, group_id FROM cache_project_group ORDER BY id",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn insert(conn: &mut SqliteConnection, project: i64, group: &str) -> CacheResult<()> {
        sqlx::query("INSERT INTO cache_project_group (project_id, group_id) VALUES (?, ?)")
            .bind(project)
            .bind(group)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Delete the exact (project, group) association
    pub async fn delete(conn: &mut SqliteConnection, project: i64, group: &str) -> CacheResult<u64> {
        let result =
            sqlx::query("DELETE FROM cache_project_group WHERE project_id = ? AND group_id = ?")
                .bind(project)
                .bind(group)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_ids(
        conn: &mut SqliteConnection,
        ids: &[i64],
        batch_size: usize,
    ) -> CacheResult<u64> {
        delete_in(conn, "cache_project_group", "id", ids, batch_size).await
    }

    pub async fn delete_by_groups(
        conn: &mut SqliteConnection,
        groups: &[String],
        batch_size: usize,
    ) -> CacheResult<u64> {
        delete_in(conn, "cache_project_group", "group_id", groups, batch_size).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::schema::memory_pool;

    #[tokio::test]
    async fn test_container_round_trip() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let company = CompanyOrg::new("ING", "ou=ing,ou=external,o=sample");
        CacheContainer::from(&company)
            .insert(&mut conn, ContainerType::Company)
            .await
            .unwrap();

        let found = CacheContainer::find(&mut conn, ContainerType::Company, "ing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.description, "ou=ing,ou=external,o=sample");
        assert!(CacheContainer::find(&mut conn, ContainerType::Group, "ing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_batched_delete() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let ids: Vec<String> = (0..25).map(|i| format!("g{i}")).collect();
        for id in &ids {
            CacheContainer {
                id: id.clone(),
                name: id.clone(),
                description: format!("cn={id}"),
            }
            .insert(&mut conn, ContainerType::Group)
            .await
            .unwrap();
        }

        let deleted = CacheContainer::delete_all(&mut conn, ContainerType::Group, &ids[..20], 7)
            .await
            .unwrap();
        assert_eq!(deleted, 20);
        let left = CacheContainer::find_all(&mut conn, ContainerType::Group)
            .await
            .unwrap();
        assert_eq!(left.len(), 5);
    }

    #[tokio::test]
    async fn test_membership_requires_known_group() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        CacheUser::from(&UserOrg::new("jdoe")).insert(&mut conn).await.unwrap();
        let result = CacheMembership::insert_user(&mut conn, "jdoe", "missing").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_membership_edges() {
        let pool = memory_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        for id in ["a", "b"] {
            CacheContainer::from(&GroupOrg::new(id, format!("cn={id}")))
                .insert(&mut conn, ContainerType::Group)
                .await
                .unwrap();
        }
        CacheUser::from(&UserOrg::new("u")).insert(&mut conn).await.unwrap();
        CacheMembership::insert_user(&mut conn, "u", "a").await.unwrap();
        CacheMembership::insert_sub_group(&mut conn, "b", "a").await.unwrap();

        assert!(CacheMembership::exists_user(&mut conn, "u", "a").await.unwrap());
        assert!(CacheMembership::exists_sub_group(&mut conn, "b", "a").await.unwrap());
        assert_eq!(
            CacheMembership::delete_group_members(&mut conn, "a").await.unwrap(),
            1
        );
        assert_eq!(
            CacheMembership::delete_by_groups(&mut conn, &["b".to_string()], 10)
                .await
                .unwrap(),
            1
        );
        assert!(CacheMembership::find_all(&mut conn).await.unwrap().is_empty());
    }
}
