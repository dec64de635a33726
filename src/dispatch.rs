//! Event dispatcher — routes inbound events into the two flows.
//!
//! One in-flight handler per participant: a per-participant mutex serializes
//! events for the same person while different participants proceed
//! concurrently. Handler errors abort that event only; they are logged and
//! never take the process down.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{FixedOffset, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::broadcast::{self, BroadcastJob, BroadcastPayload, DispatchTime};
use crate::error::Result;
use crate::export;
use crate::flows::admin::{self, AdminSession, AdminState};
use crate::flows::intake::{self, IntakeSession, IntakeStep};
use crate::flows::{CallbackTag, FlowKind, FlowSession, SessionStore};
use crate::messenger::{Inbound, InboundKind, Messenger, Sender};
use crate::scheduler::{BroadcastScheduler, DispatchOutcome};
use crate::store::{RecordStore, UserFilter, UserRecord};

const HELP: &str = "Send /start to leave a consultation request.";
const CANCELLED: &str = "Okay, cancelled.";

/// Routes inbound events to flow handlers and applies their side effects.
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    messenger: Arc<dyn Messenger>,
    scheduler: BroadcastScheduler,
    sessions: SessionStore,
    zone: FixedOffset,
    participant_locks: RwLock<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        messenger: Arc<dyn Messenger>,
        zone: FixedOffset,
    ) -> Self {
        let scheduler = BroadcastScheduler::new(Arc::clone(&store), Arc::clone(&messenger));
        Self {
            store,
            messenger,
            scheduler,
            sessions: SessionStore::new(),
            zone,
            participant_locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn scheduler(&self) -> &BroadcastScheduler {
        &self.scheduler
    }

    /// Handle one inbound event. Serialized per participant; errors are
    /// logged and swallowed so the receive loop never dies.
    pub async fn handle(&self, inbound: Inbound) {
        let participant = inbound.from.id;
        let lock = self.participant_lock(participant).await;
        {
            let _guard = lock.lock().await;
            if let Err(e) = self.route(&inbound).await {
                tracing::error!(participant, chat = inbound.chat, "Handler failed: {e}");
            }
        }
        drop(lock);
        self.release_participant_lock(participant).await;
    }

    async fn participant_lock(&self, participant: i64) -> Arc<Mutex<()>> {
        let mut locks = self.participant_locks.write().await;
        Arc::clone(
            locks
                .entry(participant)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the map entry once no handler references it, so the map does not
    /// grow with every identity ever seen.
    async fn release_participant_lock(&self, participant: i64) {
        let mut locks = self.participant_locks.write().await;
        if let Some(entry) = locks.get(&participant) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(&participant);
            }
        }
    }

    async fn route(&self, inbound: &Inbound) -> Result<()> {
        // Last-activity bookkeeping; a no-op for ids without a record
        self.store.touch_user(inbound.from.id, Utc::now()).await?;

        match &inbound.kind {
            InboundKind::Command(cmd) => match cmd.as_str() {
                "start" => self.enter_intake(inbound).await,
                "admin" => self.enter_admin(inbound).await,
                "cancel" => self.cancel(inbound).await,
                _ => {
                    self.messenger.send_text(inbound.chat, HELP, None).await?;
                    Ok(())
                }
            },
            InboundKind::Callback { id, data } => {
                // Best effort; a failed ack only leaves the client spinner on
                if let Err(e) = self.messenger.ack_callback(id).await {
                    tracing::warn!("Failed to ack callback: {e}");
                }
                match data.parse::<CallbackTag>() {
                    Ok(tag) => self.on_callback(inbound, tag).await,
                    Err(()) => {
                        tracing::debug!(%data, "Ignoring unknown callback tag");
                        Ok(())
                    }
                }
            }
            _ => self.on_content(inbound).await,
        }
    }

    // ── Entry points ────────────────────────────────────────────────

    async fn enter_intake(&self, inbound: &Inbound) -> Result<()> {
        let from = &inbound.from;
        // Re-registration overwrites prior profile fields
        let record = UserRecord::new_contact(
            from.id,
            from.username.clone(),
            from.first_name.clone(),
            from.last_name.clone(),
            Utc::now(),
        );
        self.store.upsert_user(&record).await?;

        let session = IntakeSession::new();
        self.messenger
            .send_text(inbound.chat, session.state.prompt(), None)
            .await?;
        self.sessions
            .put(from.id, FlowSession::Intake(session))
            .await;
        Ok(())
    }

    async fn enter_admin(&self, inbound: &Inbound) -> Result<()> {
        if !self.store.is_operator(inbound.from.id).await? {
            tracing::info!(participant = inbound.from.id, "Denied /admin");
            self.messenger
                .send_text(inbound.chat, admin::DENIED, None)
                .await?;
            return Ok(());
        }
        self.enter_admin_state(inbound.from.id, inbound.chat, AdminState::Menu)
            .await
    }

    async fn cancel(&self, inbound: &Inbound) -> Result<()> {
        self.sessions.clear_participant(inbound.from.id).await;
        self.messenger
            .send_text(inbound.chat, CANCELLED, None)
            .await?;
        Ok(())
    }

    // ── Callback (button) handling ──────────────────────────────────

    async fn on_callback(&self, inbound: &Inbound, tag: CallbackTag) -> Result<()> {
        let participant = inbound.from.id;
        let chat = inbound.chat;

        let Some(FlowSession::Admin(session)) =
            self.sessions.get(participant, FlowKind::Admin).await
        else {
            tracing::debug!(participant, ?tag, "Button press without an admin session");
            return Ok(());
        };

        if tag == CallbackTag::Back {
            return self
                .enter_admin_state(participant, chat, session.state.back())
                .await;
        }

        match (session.state, tag) {
            (AdminState::Menu, CallbackTag::MenuStats) => self.run_stats(chat).await,
            (AdminState::Menu, CallbackTag::MenuExport) => self.run_export(chat).await,
            (AdminState::Menu, CallbackTag::MenuBroadcast) => {
                self.enter_admin_state(participant, chat, AdminState::SelectRecipients)
                    .await
            }
            (AdminState::Menu, CallbackTag::MenuAddOperator) => {
                if !self.store.is_super_operator(participant).await? {
                    tracing::info!(participant, "Denied add-operator");
                    self.messenger.send_text(chat, admin::DENIED, None).await?;
                    return Ok(());
                }
                self.enter_admin_state(participant, chat, AdminState::AddOperator)
                    .await
            }
            (AdminState::SelectRecipients, CallbackTag::AudienceAll) => {
                self.enter_admin_state(
                    participant,
                    chat,
                    AdminState::Compose {
                        audience: crate::store::Audience::AllActive,
                    },
                )
                .await
            }
            (AdminState::SelectRecipients, CallbackTag::AudienceWeek) => {
                self.enter_admin_state(
                    participant,
                    chat,
                    AdminState::Compose {
                        audience: crate::store::Audience::ActiveLastWeek,
                    },
                )
                .await
            }
            (AdminState::ScheduleChoice { audience, payload }, CallbackTag::SendNow) => {
                self.enter_admin_state(
                    participant,
                    chat,
                    AdminState::Confirm {
                        audience,
                        payload,
                        when: DispatchTime::Now,
                    },
                )
                .await
            }
            (AdminState::ScheduleChoice { audience, payload }, CallbackTag::SendLater) => {
                self.enter_admin_state(
                    participant,
                    chat,
                    AdminState::AwaitCustomTime { audience, payload },
                )
                .await
            }
            (
                AdminState::Confirm {
                    audience,
                    payload,
                    when,
                },
                CallbackTag::ConfirmSend,
            ) => {
                // Terminal: the broadcast session is done either way
                self.sessions.remove(participant, FlowKind::Admin).await;
                let job = BroadcastJob {
                    audience,
                    payload,
                    when,
                    reply_chat: chat,
                };
                match self.scheduler.dispatch(job).await? {
                    DispatchOutcome::Dispatched(tally) => {
                        tracing::info!(
                            succeeded = tally.succeeded,
                            failed = tally.failed,
                            "Broadcast dispatched"
                        );
                    }
                    DispatchOutcome::Scheduled { at, .. } => {
                        let local = at.with_timezone(&self.zone).format("%d.%m.%Y %H:%M");
                        self.messenger
                            .send_text(chat, &format!("Scheduled for {local}."), None)
                            .await?;
                    }
                }
                Ok(())
            }
            (AdminState::Confirm { .. }, CallbackTag::ConfirmCancel) => {
                self.messenger
                    .send_text(chat, admin::DRAFT_DISCARDED, None)
                    .await?;
                self.enter_admin_state(participant, chat, AdminState::Menu)
                    .await
            }
            (state, tag) => {
                // Stale button from an earlier message
                tracing::debug!(?state, ?tag, "Ignoring tag not valid in this state");
                self.sessions
                    .put(participant, FlowSession::Admin(AdminSession { state }))
                    .await;
                Ok(())
            }
        }
    }

    // ── Text / photo / forward handling ─────────────────────────────

    async fn on_content(&self, inbound: &Inbound) -> Result<()> {
        let participant = inbound.from.id;

        // The admin flow takes precedence when both sessions exist
        if let Some(FlowSession::Admin(session)) =
            self.sessions.get(participant, FlowKind::Admin).await
        {
            return self.on_admin_content(inbound, session).await;
        }
        if let Some(FlowSession::Intake(session)) =
            self.sessions.get(participant, FlowKind::Intake).await
        {
            return self.on_intake_content(inbound, session).await;
        }

        self.messenger.send_text(inbound.chat, HELP, None).await?;
        Ok(())
    }

    async fn on_admin_content(&self, inbound: &Inbound, session: AdminSession) -> Result<()> {
        let participant = inbound.from.id;
        let chat = inbound.chat;

        match (session.state, &inbound.kind) {
            (AdminState::Compose { audience }, InboundKind::Text(text)) => {
                self.enter_admin_state(
                    participant,
                    chat,
                    AdminState::ScheduleChoice {
                        audience,
                        payload: BroadcastPayload::text(text.clone()),
                    },
                )
                .await
            }
            (AdminState::Compose { audience }, InboundKind::Photo { file_id, caption }) => {
                self.enter_admin_state(
                    participant,
                    chat,
                    AdminState::ScheduleChoice {
                        audience,
                        payload: BroadcastPayload::image(
                            file_id.clone(),
                            caption.clone().unwrap_or_default(),
                        ),
                    },
                )
                .await
            }
            (AdminState::AwaitCustomTime { audience, payload }, InboundKind::Text(text)) => {
                match admin::parse_schedule_time(text, self.zone) {
                    Some(at) => {
                        self.enter_admin_state(
                            participant,
                            chat,
                            AdminState::Confirm {
                                audience,
                                payload,
                                when: DispatchTime::At(at),
                            },
                        )
                        .await
                    }
                    None => {
                        // Recovered locally: same state, draft untouched
                        self.sessions
                            .put(
                                participant,
                                FlowSession::Admin(AdminSession {
                                    state: AdminState::AwaitCustomTime { audience, payload },
                                }),
                            )
                            .await;
                        self.messenger.send_text(chat, admin::BAD_TIME, None).await?;
                        Ok(())
                    }
                }
            }
            (AdminState::AddOperator, InboundKind::Forwarded { origin }) => {
                self.store
                    .grant_operator(origin.id, &origin.display_name())
                    .await?;
                tracing::info!(operator = origin.id, granted_by = participant, "Operator granted");
                self.messenger
                    .send_text(
                        chat,
                        &format!("{} is now an operator.", origin.display_name()),
                        None,
                    )
                    .await?;
                self.enter_admin_state(participant, chat, AdminState::Menu)
                    .await
            }
            (AdminState::AddOperator, _) => {
                self.sessions
                    .put(
                        participant,
                        FlowSession::Admin(AdminSession {
                            state: AdminState::AddOperator,
                        }),
                    )
                    .await;
                self.messenger
                    .send_text(chat, admin::NEED_FORWARD, None)
                    .await?;
                Ok(())
            }
            (state, _) => {
                // Unsolicited content: re-show where the flow stands
                self.enter_admin_state(participant, chat, state).await
            }
        }
    }

    async fn on_intake_content(&self, inbound: &Inbound, session: IntakeSession) -> Result<()> {
        let InboundKind::Text(text) = &inbound.kind else {
            self.messenger
                .send_text(inbound.chat, intake::NEED_TEXT, None)
                .await?;
            return Ok(());
        };

        match intake::accept_text(session, text) {
            IntakeStep::Continue(session, prompt) => {
                self.sessions
                    .put(inbound.from.id, FlowSession::Intake(session))
                    .await;
                self.messenger.send_text(inbound.chat, prompt, None).await?;
                Ok(())
            }
            IntakeStep::Complete(lead) => {
                let from = &inbound.from;
                let now = Utc::now();
                // Keep the registration time from flow entry
                let registered_at = self
                    .store
                    .get_user(from.id)
                    .await?
                    .map(|u| u.registered_at)
                    .unwrap_or(now);

                let record = UserRecord {
                    id: from.id,
                    username: from.username.clone(),
                    first_name: Some(lead.name.clone()),
                    last_name: from.last_name.clone(),
                    phone: Some(lead.phone.clone()),
                    company: Some(lead.company.clone()),
                    request: Some(lead.request.clone()),
                    registered_at,
                    active: true,
                    last_seen_at: now,
                };
                self.store.upsert_user(&record).await?;

                self.notify_operators(from, &lead).await?;

                self.messenger
                    .send_text(inbound.chat, intake::THANKS, None)
                    .await?;
                self.sessions.remove(from.id, FlowKind::Intake).await;
                Ok(())
            }
        }
    }

    /// Fan the lead summary out to every regular operator.
    async fn notify_operators(
        &self,
        from: &Sender,
        lead: &intake::CompletedLead,
    ) -> Result<()> {
        let operators = self.store.list_operator_ids(true).await?;
        let summary = intake::lead_summary(lead, from.username.as_deref(), from.id);
        let tally = broadcast::fan_out(
            self.store.as_ref(),
            self.messenger.as_ref(),
            &operators,
            &BroadcastPayload::text(summary),
        )
        .await;
        if tally.failed > 0 {
            tracing::warn!(failed = tally.failed, "Some operator notifications failed");
        }
        Ok(())
    }

    // ── One-shot admin actions ──────────────────────────────────────

    async fn run_stats(&self, chat: i64) -> Result<()> {
        let today = Utc::now().with_timezone(&self.zone).date_naive();
        let total = self.store.count_users(UserFilter::All).await?;
        let registered_today = self
            .store
            .count_users(UserFilter::RegisteredOn(today))
            .await?;
        let active = self.store.count_users(UserFilter::Active).await?;
        let inactive = self.store.count_users(UserFilter::Inactive).await?;

        let text = format!(
            "Users: {total}\nRegistered today: {registered_today}\nActive: {active}\nInactive: {inactive}"
        );
        self.messenger.send_text(chat, &text, None).await?;
        Ok(())
    }

    async fn run_export(&self, chat: i64) -> Result<()> {
        let users = self.store.list_users().await?;
        let file = export::export_users(&users);
        self.messenger
            .send_document(
                chat,
                file,
                export::EXPORT_FILE_NAME,
                Some(&format!("{} users", users.len())),
            )
            .await?;
        Ok(())
    }

    /// Store the session in `state` and send that state's prompt.
    async fn enter_admin_state(
        &self,
        participant: i64,
        chat: i64,
        state: AdminState,
    ) -> Result<()> {
        let keyboard = state.keyboard();
        let text = match &state {
            AdminState::Confirm {
                audience,
                payload,
                when,
            } => admin::render_confirmation(*audience, payload, *when, self.zone),
            other => other.prompt().to_string(),
        };
        self.messenger
            .send_text(chat, &text, keyboard.as_ref())
            .await?;
        self.sessions
            .put(participant, FlowSession::Admin(AdminSession { state }))
            .await;
        Ok(())
    }
}
