//! Broadcast scheduler — immediate dispatch or a one-shot deferred timer.
//!
//! Deferred jobs live in an in-process map keyed by a job id, so pending
//! schedules are enumerable and abortable. They are not persisted: a
//! restart drops them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broadcast::{self, BroadcastJob, DispatchTime, Tally};
use crate::error::DatabaseError;
use crate::messenger::Messenger;
use crate::store::RecordStore;

/// What `dispatch` did with a job.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Ran synchronously; the tally is final.
    Dispatched(Tally),
    /// Registered a one-shot timer.
    Scheduled { job_id: Uuid, at: DateTime<Utc> },
}

/// Schedules broadcast jobs and runs their fan-out.
pub struct BroadcastScheduler {
    store: Arc<dyn RecordStore>,
    messenger: Arc<dyn Messenger>,
    /// Pending deferred jobs, keyed by job id.
    pending: Arc<RwLock<HashMap<Uuid, JoinHandle<()>>>>,
}

impl BroadcastScheduler {
    pub fn new(store: Arc<dyn RecordStore>, messenger: Arc<dyn Messenger>) -> Self {
        Self {
            store,
            messenger,
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Dispatch a confirmed job: run it now, or arm a one-shot timer.
    ///
    /// In both cases the result summary is sent to the job's reply chat once
    /// fan-out completes.
    pub async fn dispatch(&self, job: BroadcastJob) -> Result<DispatchOutcome, DatabaseError> {
        match job.when {
            DispatchTime::Now => {
                let tally = self.run_job(&job).await?;
                Ok(DispatchOutcome::Dispatched(tally))
            }
            DispatchTime::At(at) => {
                let job_id = Uuid::new_v4();
                let delay = (at - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);

                let store = Arc::clone(&self.store);
                let messenger = Arc::clone(&self.messenger);
                let pending = Arc::clone(&self.pending);

                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    match broadcast::run_broadcast(
                        store.as_ref(),
                        messenger.as_ref(),
                        job.audience,
                        &job.payload,
                        Utc::now(),
                    )
                    .await
                    {
                        Ok(tally) => {
                            if let Err(e) = messenger
                                .send_text(job.reply_chat, &tally.summary(), None)
                                .await
                            {
                                tracing::warn!(job_id = %job_id, "Failed to send summary: {e}");
                            }
                        }
                        Err(e) => {
                            tracing::error!(job_id = %job_id, "Scheduled broadcast failed: {e}");
                        }
                    }
                    pending.write().await.remove(&job_id);
                });

                self.pending.write().await.insert(job_id, handle);
                tracing::info!(job_id = %job_id, at = %at, "Broadcast scheduled");
                Ok(DispatchOutcome::Scheduled { job_id, at })
            }
        }
    }

    /// Run a job's fan-out now and report the summary to the reply chat.
    async fn run_job(&self, job: &BroadcastJob) -> Result<Tally, DatabaseError> {
        let tally = broadcast::run_broadcast(
            self.store.as_ref(),
            self.messenger.as_ref(),
            job.audience,
            &job.payload,
            Utc::now(),
        )
        .await?;

        if let Err(e) = self
            .messenger
            .send_text(job.reply_chat, &tally.summary(), None)
            .await
        {
            tracing::warn!("Failed to send summary: {e}");
        }
        Ok(tally)
    }

    /// Number of armed timers.
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Abort all armed timers (shutdown path).
    pub async fn abort_all(&self) {
        let mut pending = self.pending.write().await;
        for (job_id, handle) in pending.drain() {
            handle.abort();
            tracing::info!(job_id = %job_id, "Aborted pending broadcast");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::FixedOffset;

    use super::*;
    use crate::broadcast::BroadcastPayload;
    use crate::error::MessengerError;
    use crate::messenger::Keyboard;
    use crate::store::{Audience, LibSqlStore, UserRecord};

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Messenger for RecordingMessenger {
        async fn send_text(
            &self,
            chat: i64,
            text: &str,
            _keyboard: Option<&Keyboard>,
        ) -> Result<(), MessengerError> {
            self.sent.lock().unwrap().push((chat, text.to_string()));
            Ok(())
        }

        async fn send_photo(
            &self,
            chat: i64,
            _file_ref: &str,
            caption: &str,
            _keyboard: Option<&Keyboard>,
        ) -> Result<(), MessengerError> {
            self.sent.lock().unwrap().push((chat, caption.to_string()));
            Ok(())
        }

        async fn send_document(
            &self,
            _chat: i64,
            _file_bytes: Vec<u8>,
            _file_name: &str,
            _caption: Option<&str>,
        ) -> Result<(), MessengerError> {
            Ok(())
        }

        async fn ack_callback(&self, _callback_id: &str) -> Result<(), MessengerError> {
            Ok(())
        }
    }

    const OPERATOR_CHAT: i64 = 900;

    async fn scheduler_with_users(
        ids: &[i64],
    ) -> (BroadcastScheduler, Arc<RecordingMessenger>) {
        let zone = FixedOffset::east_opt(3 * 3600).unwrap();
        let store = Arc::new(LibSqlStore::new_memory(zone).await.unwrap());
        let now = Utc::now();
        for &id in ids {
            store
                .upsert_user(&UserRecord::new_contact(id, None, None, None, now))
                .await
                .unwrap();
        }
        let messenger = Arc::new(RecordingMessenger::default());
        let scheduler = BroadcastScheduler::new(store, Arc::clone(&messenger) as Arc<dyn Messenger>);
        (scheduler, messenger)
    }

    fn job(when: DispatchTime) -> BroadcastJob {
        BroadcastJob {
            audience: Audience::AllActive,
            payload: BroadcastPayload::text("ping"),
            when,
            reply_chat: OPERATOR_CHAT,
        }
    }

    #[tokio::test]
    async fn immediate_dispatch_runs_inline() {
        let (scheduler, messenger) = scheduler_with_users(&[1, 2]).await;

        let outcome = scheduler.dispatch(job(DispatchTime::Now)).await.unwrap();
        let DispatchOutcome::Dispatched(tally) = outcome else {
            panic!("expected inline dispatch");
        };
        assert_eq!(tally.succeeded, 2);
        assert_eq!(scheduler.pending_count().await, 0);

        // Two deliveries plus the operator summary
        let sent = messenger.sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert!(
            sent.iter()
                .any(|(chat, text)| *chat == OPERATOR_CHAT && text.contains("2 delivered"))
        );
    }

    #[tokio::test]
    async fn deferred_dispatch_fires_once_and_clears() {
        let (scheduler, messenger) = scheduler_with_users(&[1]).await;
        let at = Utc::now() + chrono::Duration::milliseconds(50);

        let outcome = scheduler.dispatch(job(DispatchTime::At(at))).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Scheduled { .. }));
        assert_eq!(scheduler.pending_count().await, 1);
        assert!(messenger.sent.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(scheduler.pending_count().await, 0);
        let sent = messenger.sent.lock().unwrap();
        assert_eq!(sent.iter().filter(|(chat, _)| *chat == 1).count(), 1);
        assert!(
            sent.iter()
                .any(|(chat, text)| *chat == OPERATOR_CHAT && text.contains("1 delivered"))
        );
    }

    #[tokio::test]
    async fn multiple_pending_jobs_coexist() {
        let (scheduler, _messenger) = scheduler_with_users(&[1]).await;
        let far = Utc::now() + chrono::Duration::hours(1);

        scheduler.dispatch(job(DispatchTime::At(far))).await.unwrap();
        scheduler.dispatch(job(DispatchTime::At(far))).await.unwrap();
        assert_eq!(scheduler.pending_count().await, 2);

        scheduler.abort_all().await;
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test]
    async fn past_instant_fires_immediately() {
        let (scheduler, messenger) = scheduler_with_users(&[1]).await;
        let past = Utc::now() - chrono::Duration::minutes(5);

        scheduler.dispatch(job(DispatchTime::At(past))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(scheduler.pending_count().await, 0);
        assert!(!messenger.sent.lock().unwrap().is_empty());
    }
}
