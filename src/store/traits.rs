//! `RecordStore` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::store::model::{Audience, UserFilter, UserRecord};

/// Backend-agnostic store covering users and operators.
///
/// All operations are immediately consistent; individual row reads/writes are
/// atomic, cross-row transactions are not required by any caller.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ── Users ───────────────────────────────────────────────────────

    /// Insert or replace a user record (keyed by `record.id`).
    async fn upsert_user(&self, record: &UserRecord) -> Result<(), DatabaseError>;

    /// Get a user by id.
    async fn get_user(&self, id: i64) -> Result<Option<UserRecord>, DatabaseError>;

    /// All user records, ordered by registration time (for export).
    async fn list_users(&self) -> Result<Vec<UserRecord>, DatabaseError>;

    /// Count users matching a filter.
    async fn count_users(&self, filter: UserFilter) -> Result<u64, DatabaseError>;

    /// Set or clear a user's activity flag. No-op for unknown ids.
    async fn set_activity(&self, id: i64, active: bool) -> Result<(), DatabaseError>;

    /// Record that a user was seen at `now`.
    async fn touch_user(&self, id: i64, now: DateTime<Utc>) -> Result<(), DatabaseError>;

    /// Resolve a broadcast audience to user ids, with the sliding window
    /// anchored at `now`.
    async fn list_user_ids(
        &self,
        audience: Audience,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, DatabaseError>;

    // ── Operators ───────────────────────────────────────────────────

    /// Whether any operator row exists for this id.
    async fn is_operator(&self, id: i64) -> Result<bool, DatabaseError>;

    /// Whether an operator row with the super role exists for this id.
    async fn is_super_operator(&self, id: i64) -> Result<bool, DatabaseError>;

    /// Grant the regular operator role (insert-or-replace).
    async fn grant_operator(&self, id: i64, name: &str) -> Result<(), DatabaseError>;

    /// Grant the super operator role. Used to seed the startup allow-list.
    async fn grant_super_operator(&self, id: i64, name: &str) -> Result<(), DatabaseError>;

    /// Operator ids, optionally excluding super-operators.
    async fn list_operator_ids(&self, exclude_super: bool) -> Result<Vec<i64>, DatabaseError>;
}
