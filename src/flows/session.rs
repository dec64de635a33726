//! Per-conversation transient state, keyed by (participant, flow).

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::flows::admin::AdminSession;
use crate::flows::intake::IntakeSession;

/// Which state machine a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Intake,
    Admin,
}

/// A session for one of the two flows.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowSession {
    Intake(IntakeSession),
    Admin(AdminSession),
}

impl FlowSession {
    pub fn kind(&self) -> FlowKind {
        match self {
            Self::Intake(_) => FlowKind::Intake,
            Self::Admin(_) => FlowKind::Admin,
        }
    }
}

/// In-memory session registry. At most one session per (participant, flow)
/// pair — `put` on an existing key restarts that flow's session.
///
/// Handlers take a clone, advance it, and write it back; the dispatcher's
/// per-participant serialization guarantees no interleaved writes for the
/// same key.
#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<HashMap<(i64, FlowKind), FlowSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, participant: i64, flow: FlowKind) -> Option<FlowSession> {
        self.inner.read().await.get(&(participant, flow)).cloned()
    }

    pub async fn put(&self, participant: i64, session: FlowSession) {
        let key = (participant, session.kind());
        self.inner.write().await.insert(key, session);
    }

    pub async fn remove(&self, participant: i64, flow: FlowKind) {
        self.inner.write().await.remove(&(participant, flow));
    }

    /// Drop every session this participant has, across flows.
    pub async fn clear_participant(&self, participant: i64) {
        self.inner
            .write()
            .await
            .retain(|(id, _), _| *id != participant);
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
