//! Notification fan-out — deliver one payload to many recipients.
//!
//! Each recipient gets exactly one delivery attempt, no retries. A failed
//! recipient is tallied and deactivated in the store but never blocks the
//! rest of the batch.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::messenger::Messenger;
use crate::store::{Audience, RecordStore};

/// The message body of a broadcast: text, optionally carried as the caption
/// of a single image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub text: String,
    /// Messenger file reference for an attached image.
    pub image: Option<String>,
}

impl BroadcastPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn image(file_ref: impl Into<String>, caption: impl Into<String>) -> Self {
        Self {
            text: caption.into(),
            image: Some(file_ref.into()),
        }
    }
}

/// When a confirmed broadcast should go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchTime {
    Now,
    At(DateTime<Utc>),
}

/// A confirmed broadcast, ready for the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastJob {
    pub audience: Audience,
    pub payload: BroadcastPayload,
    pub when: DispatchTime,
    /// Chat that gets the result summary once dispatch completes.
    pub reply_chat: i64,
}

/// Per-broadcast delivery outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// The summary line shown to the operator.
    pub fn summary(&self) -> String {
        format!(
            "Broadcast finished: {} delivered, {} failed.",
            self.succeeded, self.failed
        )
    }
}

/// Deliver the payload to one recipient.
async fn deliver(messenger: &dyn Messenger, chat: i64, payload: &BroadcastPayload) -> bool {
    let result = match &payload.image {
        Some(file_ref) => messenger.send_photo(chat, file_ref, &payload.text, None).await,
        None => messenger.send_text(chat, &payload.text, None).await,
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(recipient = chat, "Delivery failed: {e}");
            false
        }
    }
}

/// Fan a payload out to a fixed recipient set.
///
/// Deliveries run concurrently; the tally is reported only after every
/// attempt has completed, so `succeeded + failed` always equals the size of
/// the recipient set. Failed recipients have their activity flag cleared.
pub async fn fan_out(
    store: &dyn RecordStore,
    messenger: &dyn Messenger,
    recipients: &[i64],
    payload: &BroadcastPayload,
) -> Tally {
    let attempts = join_all(
        recipients
            .iter()
            .map(|&chat| async move { (chat, deliver(messenger, chat, payload).await) }),
    )
    .await;

    let mut tally = Tally::default();
    for (chat, delivered) in attempts {
        if delivered {
            tally.succeeded += 1;
        } else {
            tally.failed += 1;
            if let Err(e) = store.set_activity(chat, false).await {
                tracing::error!(recipient = chat, "Failed to deactivate recipient: {e}");
            }
        }
    }
    tally
}

/// Resolve an audience at dispatch time and fan out to it.
pub async fn run_broadcast(
    store: &dyn RecordStore,
    messenger: &dyn Messenger,
    audience: Audience,
    payload: &BroadcastPayload,
    now: DateTime<Utc>,
) -> Result<Tally, DatabaseError> {
    let recipients = store.list_user_ids(audience, now).await?;
    tracing::info!(
        audience = ?audience,
        recipients = recipients.len(),
        "Starting broadcast"
    );
    Ok(fan_out(store, messenger, &recipients, payload).await)
}
