//! Admin flow — nested menus for stats, export, broadcast, and role grants.
//!
//! The state enum carries, per variant, exactly the draft fields that are
//! valid in that state; the dispatcher matches on (state, event) exhaustively.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

use crate::broadcast::{BroadcastPayload, DispatchTime};
use crate::flows::CallbackTag;
use crate::messenger::{Button, Keyboard};
use crate::store::Audience;

pub const DENIED: &str = "You are not allowed to use this command.";
pub const MENU_PROMPT: &str = "Admin panel. Choose an action:";
pub const PICK_AUDIENCE: &str = "Who should receive the broadcast?";
pub const ASK_MESSAGE: &str = "Send the broadcast message: text, or a photo with a caption.";
pub const PICK_SCHEDULE: &str = "When should it go out?";
pub const ASK_TIME: &str = "Enter the send time as DD.MM.YYYY HH:MM";
pub const BAD_TIME: &str = "Could not parse that time. Use DD.MM.YYYY HH:MM, e.g. 05.09.2026 14:30";
pub const ASK_FORWARD: &str =
    "Forward me any message from the user you want to make an operator.";
pub const NEED_FORWARD: &str =
    "That is not a forwarded message. Forward one from the user, or /cancel.";
pub const DRAFT_DISCARDED: &str = "Broadcast discarded.";

/// Schedule-time input format, civil time in the reporting zone.
const TIME_FORMAT: &str = "%d.%m.%Y %H:%M";

/// States of the admin flow.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminState {
    /// Top menu; stats and export are handled as one-shot actions here.
    Menu,
    /// Choosing a broadcast audience.
    SelectRecipients,
    /// Waiting for the broadcast message body.
    Compose { audience: Audience },
    /// Choosing "now" vs "later".
    ScheduleChoice {
        audience: Audience,
        payload: BroadcastPayload,
    },
    /// Waiting for a custom send time.
    AwaitCustomTime {
        audience: Audience,
        payload: BroadcastPayload,
    },
    /// Full draft assembled, waiting for accept/cancel.
    Confirm {
        audience: Audience,
        payload: BroadcastPayload,
        when: DispatchTime,
    },
    /// Waiting for a forwarded message to grant the operator role.
    AddOperator,
}

impl AdminState {
    /// One step back, discarding only this state's partial input.
    pub fn back(self) -> AdminState {
        match self {
            AdminState::Menu => AdminState::Menu,
            AdminState::SelectRecipients => AdminState::Menu,
            AdminState::Compose { .. } => AdminState::SelectRecipients,
            AdminState::ScheduleChoice { audience, .. } => AdminState::Compose { audience },
            AdminState::AwaitCustomTime { audience, payload } => {
                AdminState::ScheduleChoice { audience, payload }
            }
            AdminState::Confirm {
                audience, payload, ..
            } => AdminState::ScheduleChoice { audience, payload },
            AdminState::AddOperator => AdminState::Menu,
        }
    }

    /// The prompt to send when (re-)entering this state.
    pub fn prompt(&self) -> &'static str {
        match self {
            AdminState::Menu => MENU_PROMPT,
            AdminState::SelectRecipients => PICK_AUDIENCE,
            AdminState::Compose { .. } => ASK_MESSAGE,
            AdminState::ScheduleChoice { .. } => PICK_SCHEDULE,
            AdminState::AwaitCustomTime { .. } => ASK_TIME,
            AdminState::Confirm { .. } => unreachable!("confirm renders the draft instead"),
            AdminState::AddOperator => ASK_FORWARD,
        }
    }

    /// The keyboard shown alongside this state's prompt, if any.
    pub fn keyboard(&self) -> Option<Keyboard> {
        match self {
            AdminState::Menu => Some(menu_keyboard()),
            AdminState::SelectRecipients => Some(audience_keyboard()),
            AdminState::ScheduleChoice { .. } => Some(schedule_keyboard()),
            AdminState::Confirm { .. } => Some(confirm_keyboard()),
            AdminState::Compose { .. } | AdminState::AwaitCustomTime { .. } => {
                Some(back_keyboard())
            }
            AdminState::AddOperator => None,
        }
    }
}

/// An admin session.
#[derive(Debug, Clone, PartialEq)]
pub struct AdminSession {
    pub state: AdminState,
}

impl AdminSession {
    pub fn new() -> Self {
        Self {
            state: AdminState::Menu,
        }
    }
}

impl Default for AdminSession {
    fn default() -> Self {
        Self::new()
    }
}

// ── Keyboards ───────────────────────────────────────────────────────

pub fn menu_keyboard() -> Keyboard {
    Keyboard(vec![
        vec![
            Button::new("📊 Stats", CallbackTag::MenuStats),
            Button::new("📁 Export", CallbackTag::MenuExport),
        ],
        vec![
            Button::new("📣 Broadcast", CallbackTag::MenuBroadcast),
            Button::new("➕ Add operator", CallbackTag::MenuAddOperator),
        ],
    ])
}

pub fn audience_keyboard() -> Keyboard {
    Keyboard(vec![
        vec![
            Button::new("All active", CallbackTag::AudienceAll),
            Button::new("New (last 7 days)", CallbackTag::AudienceWeek),
        ],
        vec![Button::new("⬅ Back", CallbackTag::Back)],
    ])
}

pub fn schedule_keyboard() -> Keyboard {
    Keyboard(vec![
        vec![
            Button::new("Send now", CallbackTag::SendNow),
            Button::new("Send later", CallbackTag::SendLater),
        ],
        vec![Button::new("⬅ Back", CallbackTag::Back)],
    ])
}

pub fn confirm_keyboard() -> Keyboard {
    Keyboard(vec![vec![
        Button::new("✅ Send", CallbackTag::ConfirmSend),
        Button::new("❌ Cancel", CallbackTag::ConfirmCancel),
    ]])
}

fn back_keyboard() -> Keyboard {
    Keyboard(vec![vec![Button::new("⬅ Back", CallbackTag::Back)]])
}

// ── Schedule time parsing and draft rendering ───────────────────────

/// Parse a user-entered schedule time, interpreted in the reporting zone.
/// Returns `None` on any malformed input; the caller re-prompts.
pub fn parse_schedule_time(input: &str, zone: FixedOffset) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(input.trim(), TIME_FORMAT).ok()?;
    let local = naive.and_local_timezone(zone).single()?;
    Some(local.with_timezone(&Utc))
}

/// Render the full draft for the confirmation step.
pub fn render_confirmation(
    audience: Audience,
    payload: &BroadcastPayload,
    when: DispatchTime,
    zone: FixedOffset,
) -> String {
    let when_desc = match when {
        DispatchTime::Now => "immediately".to_string(),
        DispatchTime::At(t) => t.with_timezone(&zone).format(TIME_FORMAT).to_string(),
    };
    let attachment = if payload.image.is_some() {
        "\nAttachment: 1 image"
    } else {
        ""
    };
    format!(
        "About to broadcast.\nRecipients: {}\nWhen: {}{}\n\n{}",
        audience.describe(),
        when_desc,
        attachment,
        payload.text
    )
}
