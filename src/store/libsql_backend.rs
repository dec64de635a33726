//! libSQL backend — async `RecordStore` implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use tracing::info;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{Audience, OperatorRole, UserFilter, UserRecord};
use crate::store::traits::RecordStore;

const USER_COLUMNS: &str = "id, username, first_name, last_name, phone, company, request, \
     registered_at, active, last_seen_at";

/// libSQL store backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
    /// Reporting zone for civil-date filters.
    zone: FixedOffset,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path, zone: FixedOffset) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");

        Ok(Self {
            db: Arc::new(db),
            conn,
            zone,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory(zone: FixedOffset) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            zone,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// UTC instant of local midnight on `date` in the reporting zone.
    fn local_midnight_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        let local = date.and_time(chrono::NaiveTime::MIN);
        let shifted = local - Duration::seconds(i64::from(self.zone.local_minus_utc()));
        DateTime::from_naive_utc_and_offset(shifted, Utc)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed-width so lexicographic comparison in SQL
/// matches chronological order.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_ts(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Map a libsql Row to a UserRecord. Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<UserRecord, libsql::Error> {
    let registered_str: String = row.get(7)?;
    let active: i64 = row.get(8)?;
    let last_seen_str: String = row.get(9)?;

    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        phone: row.get(4)?,
        company: row.get(5)?,
        request: row.get(6)?,
        registered_at: parse_ts(&registered_str),
        active: active != 0,
        last_seen_at: parse_ts(&last_seen_str),
    })
}

async fn count_query(
    conn: &Connection,
    sql: &str,
    args: impl libsql::params::IntoParams,
) -> Result<u64, DatabaseError> {
    let mut rows = conn.query(sql, args).await.map_err(query_err)?;
    let row = rows
        .next()
        .await
        .map_err(query_err)?
        .ok_or_else(|| DatabaseError::Query("count query returned no row".to_string()))?;
    let count: i64 = row.get(0).map_err(query_err)?;
    Ok(count as u64)
}

async fn id_list_query(
    conn: &Connection,
    sql: &str,
    args: impl libsql::params::IntoParams,
) -> Result<Vec<i64>, DatabaseError> {
    let mut rows = conn.query(sql, args).await.map_err(query_err)?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err)? {
        ids.push(row.get(0).map_err(query_err)?);
    }
    Ok(ids)
}

// ── RecordStore implementation ──────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlStore {
    async fn upsert_user(&self, record: &UserRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO users ({USER_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    record.id,
                    record.username.clone(),
                    record.first_name.clone(),
                    record.last_name.clone(),
                    record.phone.clone(),
                    record.company.clone(),
                    record.request.clone(),
                    fmt_ts(record.registered_at),
                    record.active as i64,
                    fmt_ts(record.last_seen_at),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(query_err)?;

        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_user(&row).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users ORDER BY registered_at"),
                (),
            )
            .await
            .map_err(query_err)?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            users.push(row_to_user(&row).map_err(query_err)?);
        }
        Ok(users)
    }

    async fn count_users(&self, filter: UserFilter) -> Result<u64, DatabaseError> {
        let conn = self.conn();
        match filter {
            UserFilter::All => count_query(conn, "SELECT COUNT(*) FROM users", ()).await,
            UserFilter::Active => {
                count_query(conn, "SELECT COUNT(*) FROM users WHERE active = 1", ()).await
            }
            UserFilter::Inactive => {
                count_query(conn, "SELECT COUNT(*) FROM users WHERE active = 0", ()).await
            }
            UserFilter::RegisteredOn(date) => {
                let start = self.local_midnight_utc(date);
                let end = start + Duration::days(1);
                count_query(
                    conn,
                    "SELECT COUNT(*) FROM users \
                     WHERE registered_at >= ?1 AND registered_at < ?2",
                    params![fmt_ts(start), fmt_ts(end)],
                )
                .await
            }
        }
    }

    async fn set_activity(&self, id: i64, active: bool) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE users SET active = ?2 WHERE id = ?1",
                params![id, active as i64],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn touch_user(&self, id: i64, now: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE users SET last_seen_at = ?2 WHERE id = ?1",
                params![id, fmt_ts(now)],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_user_ids(
        &self,
        audience: Audience,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, DatabaseError> {
        let conn = self.conn();
        match audience {
            Audience::AllActive => {
                id_list_query(conn, "SELECT id FROM users WHERE active = 1 ORDER BY id", ()).await
            }
            Audience::ActiveLastWeek => {
                // Inclusive sliding window, anchored at dispatch time
                let cutoff = now - Duration::days(7);
                id_list_query(
                    conn,
                    "SELECT id FROM users \
                     WHERE active = 1 AND registered_at >= ?1 ORDER BY id",
                    params![fmt_ts(cutoff)],
                )
                .await
            }
        }
    }

    async fn is_operator(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = count_query(
            self.conn(),
            "SELECT COUNT(*) FROM operators WHERE id = ?1",
            params![id],
        )
        .await?;
        Ok(count > 0)
    }

    async fn is_super_operator(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = count_query(
            self.conn(),
            "SELECT COUNT(*) FROM operators WHERE id = ?1 AND role = ?2",
            params![id, OperatorRole::Super.as_str()],
        )
        .await?;
        Ok(count > 0)
    }

    async fn grant_operator(&self, id: i64, name: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO operators (id, name, role, granted_at) \
                 VALUES (?1, ?2, ?3, datetime('now'))",
                params![id, name, OperatorRole::Regular.as_str()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn grant_super_operator(&self, id: i64, name: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO operators (id, name, role, granted_at) \
                 VALUES (?1, ?2, ?3, datetime('now'))",
                params![id, name, OperatorRole::Super.as_str()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_operator_ids(&self, exclude_super: bool) -> Result<Vec<i64>, DatabaseError> {
        let conn = self.conn();
        if exclude_super {
            id_list_query(
                conn,
                "SELECT id FROM operators WHERE role != ?1 ORDER BY id",
                params![OperatorRole::Super.as_str()],
            )
            .await
        } else {
            id_list_query(conn, "SELECT id FROM operators ORDER BY id", ()).await
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_zone() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    async fn test_store() -> LibSqlStore {
        LibSqlStore::new_memory(test_zone()).await.unwrap()
    }

    fn lead(id: i64, registered_at: DateTime<Utc>) -> UserRecord {
        UserRecord {
            id,
            username: Some(format!("user{id}")),
            first_name: Some("Lead".into()),
            last_name: None,
            phone: Some("+100200300".into()),
            company: Some("Acme".into()),
            request: Some("Need a consultation".into()),
            registered_at,
            active: true,
            last_seen_at: registered_at,
        }
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let store = test_store().await;
        let now = Utc::now();
        let record = lead(7, now);

        store.upsert_user(&record).await.unwrap();
        let fetched = store.get_user(7).await.unwrap().unwrap();
        assert_eq!(fetched.id, 7);
        assert_eq!(fetched.phone.as_deref(), Some("+100200300"));
        assert_eq!(fetched.company.as_deref(), Some("Acme"));
        assert!(fetched.active);
        // Micros precision survives the round trip
        assert_eq!(
            fetched.registered_at.timestamp_micros(),
            now.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn get_unknown_user_is_none() {
        let store = test_store().await;
        assert!(store.get_user(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_without_duplicating() {
        let store = test_store().await;
        let now = Utc::now();

        store.upsert_user(&lead(7, now)).await.unwrap();
        let mut replacement = lead(7, now);
        replacement.company = Some("NewCo".into());
        store.upsert_user(&replacement).await.unwrap();

        assert_eq!(store.count_users(UserFilter::All).await.unwrap(), 1);
        let fetched = store.get_user(7).await.unwrap().unwrap();
        assert_eq!(fetched.company.as_deref(), Some("NewCo"));
    }

    #[tokio::test]
    async fn activity_flag_filters() {
        let store = test_store().await;
        let now = Utc::now();
        store.upsert_user(&lead(1, now)).await.unwrap();
        store.upsert_user(&lead(2, now)).await.unwrap();

        store.set_activity(2, false).await.unwrap();

        assert_eq!(store.count_users(UserFilter::Active).await.unwrap(), 1);
        assert_eq!(store.count_users(UserFilter::Inactive).await.unwrap(), 1);
        assert!(!store.get_user(2).await.unwrap().unwrap().active);
    }

    #[tokio::test]
    async fn set_activity_unknown_user_is_noop() {
        let store = test_store().await;
        store.set_activity(999, false).await.unwrap();
        assert_eq!(store.count_users(UserFilter::All).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn touch_user_updates_last_seen() {
        let store = test_store().await;
        let registered = Utc::now() - Duration::hours(5);
        store.upsert_user(&lead(1, registered)).await.unwrap();

        let seen = Utc::now();
        store.touch_user(1, seen).await.unwrap();

        let fetched = store.get_user(1).await.unwrap().unwrap();
        assert_eq!(
            fetched.last_seen_at.timestamp_micros(),
            seen.timestamp_micros()
        );
        assert_eq!(
            fetched.registered_at.timestamp_micros(),
            registered.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn registered_on_counts_by_local_date() {
        let store = test_store().await;
        let now = Utc::now();
        store.upsert_user(&lead(1, now)).await.unwrap();
        store
            .upsert_user(&lead(2, now - Duration::days(30)))
            .await
            .unwrap();

        let today = now.with_timezone(&test_zone()).date_naive();
        assert_eq!(
            store
                .count_users(UserFilter::RegisteredOn(today))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn audience_all_active_excludes_deactivated() {
        let store = test_store().await;
        let now = Utc::now();
        store.upsert_user(&lead(1, now)).await.unwrap();
        store.upsert_user(&lead(2, now)).await.unwrap();
        store.set_activity(1, false).await.unwrap();

        let ids = store
            .list_user_ids(Audience::AllActive, now)
            .await
            .unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn audience_last_week_window_is_inclusive() {
        let store = test_store().await;
        let now = Utc::now();
        // Exactly on the boundary: 7×24h before dispatch time
        store
            .upsert_user(&lead(1, now - Duration::days(7)))
            .await
            .unwrap();
        // Just outside
        store
            .upsert_user(&lead(2, now - Duration::days(7) - Duration::seconds(1)))
            .await
            .unwrap();
        // Well inside
        store.upsert_user(&lead(3, now)).await.unwrap();

        let ids = store
            .list_user_ids(Audience::ActiveLastWeek, now)
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn audience_last_week_excludes_inactive() {
        let store = test_store().await;
        let now = Utc::now();
        store.upsert_user(&lead(1, now)).await.unwrap();
        store.set_activity(1, false).await.unwrap();

        let ids = store
            .list_user_ids(Audience::ActiveLastWeek, now)
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn operator_roles() {
        let store = test_store().await;
        store.grant_operator(10, "Manager").await.unwrap();
        store.grant_super_operator(20, "Owner").await.unwrap();

        assert!(store.is_operator(10).await.unwrap());
        assert!(store.is_operator(20).await.unwrap());
        assert!(!store.is_operator(30).await.unwrap());

        assert!(!store.is_super_operator(10).await.unwrap());
        assert!(store.is_super_operator(20).await.unwrap());

        assert_eq!(store.list_operator_ids(false).await.unwrap(), vec![10, 20]);
        assert_eq!(store.list_operator_ids(true).await.unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn grant_is_upsert() {
        let store = test_store().await;
        store.grant_super_operator(10, "Owner").await.unwrap();
        // Re-granting regular downgrades the role; the row count stays 1
        store.grant_operator(10, "Owner").await.unwrap();

        assert!(!store.is_super_operator(10).await.unwrap());
        assert_eq!(store.list_operator_ids(false).await.unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn local_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leadbot.db");

        {
            let store = LibSqlStore::new_local(&path, test_zone()).await.unwrap();
            store.upsert_user(&lead(1, Utc::now())).await.unwrap();
        }

        let store = LibSqlStore::new_local(&path, test_zone()).await.unwrap();
        assert!(store.get_user(1).await.unwrap().is_some());
    }
}
