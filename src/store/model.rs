//! Record models shared by the store trait and its backends.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A lead/user record. Keyed by the Telegram user id; insert-or-replace
/// semantics — re-registration overwrites prior profile fields, records are
/// never hard-deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Collected during intake; `None` until the user reaches that step.
    pub phone: Option<String>,
    pub company: Option<String>,
    pub request: Option<String>,
    pub registered_at: DateTime<Utc>,
    /// Cleared when a delivery to this user fails.
    pub active: bool,
    pub last_seen_at: DateTime<Utc>,
}

impl UserRecord {
    /// A fresh record for a user making first contact, before any intake
    /// fields are collected.
    pub fn new_contact(
        id: i64,
        username: Option<String>,
        first_name: Option<String>,
        last_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username,
            first_name,
            last_name,
            phone: None,
            company: None,
            request: None,
            registered_at: now,
            active: true,
            last_seen_at: now,
        }
    }
}

/// Operator role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    /// Receives lead notifications.
    Regular,
    /// May additionally grant the operator role to others.
    Super,
}

impl OperatorRole {
    /// The value stored in the operators table's role column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Super => "super",
        }
    }
}

/// Filters for `count_users`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFilter {
    All,
    /// Registered on a specific civil date in the reporting zone.
    RegisteredOn(NaiveDate),
    Active,
    Inactive,
}

/// Broadcast recipient selectors. Resolved at dispatch time, not at
/// selection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Every user with the activity flag set.
    AllActive,
    /// Active users registered within the last 7×24h, boundary inclusive.
    ActiveLastWeek,
}

impl Audience {
    /// Human-readable description used when rendering a broadcast draft.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::AllActive => "all active users",
            Self::ActiveLastWeek => "active users registered in the last 7 days",
        }
    }
}
