//! Conversation flows — the intake and admin state machines.

pub mod admin;
pub mod intake;
pub mod session;

pub use admin::{AdminSession, AdminState};
pub use intake::{IntakeSession, IntakeState, LeadDraft};
pub use session::{FlowKind, FlowSession, SessionStore};

use std::fmt;
use std::str::FromStr;

/// Typed callback-button payloads.
///
/// Buttons carry these round-tripped through the transport's opaque string;
/// dispatch on a pressed button is an exhaustive match on this enum rather
/// than string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackTag {
    MenuStats,
    MenuExport,
    MenuBroadcast,
    MenuAddOperator,
    AudienceAll,
    AudienceWeek,
    SendNow,
    SendLater,
    ConfirmSend,
    ConfirmCancel,
    Back,
}

impl CallbackTag {
    fn as_str(&self) -> &'static str {
        match self {
            Self::MenuStats => "menu:stats",
            Self::MenuExport => "menu:export",
            Self::MenuBroadcast => "menu:broadcast",
            Self::MenuAddOperator => "menu:add_operator",
            Self::AudienceAll => "audience:all",
            Self::AudienceWeek => "audience:week",
            Self::SendNow => "schedule:now",
            Self::SendLater => "schedule:later",
            Self::ConfirmSend => "confirm:send",
            Self::ConfirmCancel => "confirm:cancel",
            Self::Back => "back",
        }
    }

    const ALL: [CallbackTag; 11] = [
        Self::MenuStats,
        Self::MenuExport,
        Self::MenuBroadcast,
        Self::MenuAddOperator,
        Self::AudienceAll,
        Self::AudienceWeek,
        Self::SendNow,
        Self::SendLater,
        Self::ConfirmSend,
        Self::ConfirmCancel,
        Self::Back,
    ];
}

impl fmt::Display for CallbackTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackTag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or(())
    }
}
