//! Intake flow — the multi-step lead questionnaire.
//!
//! States progress linearly: AwaitName → AwaitPhone → AwaitCompany →
//! AwaitRequest → done. The transition logic is pure; the dispatcher applies
//! the side effects (persisting the lead, notifying operators).

use serde::{Deserialize, Serialize};

pub const WELCOME: &str =
    "Hi! I'll help you leave a consultation request.\nWhat is your name?";
pub const ASK_PHONE: &str = "Nice to meet you! What phone number can we reach you at?";
pub const ASK_COMPANY: &str = "What company are you with?";
pub const ASK_REQUEST: &str = "Briefly describe what you need help with.";
pub const THANKS: &str =
    "Thank you! Your request has been recorded — a manager will contact you shortly.";
pub const NEED_TEXT: &str = "Please answer with a text message.";

/// The steps of the intake questionnaire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeState {
    AwaitName,
    AwaitPhone,
    AwaitCompany,
    AwaitRequest,
}

impl IntakeState {
    /// The prompt sent when entering this state.
    pub fn prompt(&self) -> &'static str {
        match self {
            Self::AwaitName => WELCOME,
            Self::AwaitPhone => ASK_PHONE,
            Self::AwaitCompany => ASK_COMPANY,
            Self::AwaitRequest => ASK_REQUEST,
        }
    }
}

/// Fields collected so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadDraft {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub request: Option<String>,
}

/// A lead with every field collected.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedLead {
    pub name: String,
    pub phone: String,
    pub company: String,
    pub request: String,
}

/// An in-progress intake session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeSession {
    pub state: IntakeState,
    pub draft: LeadDraft,
}

impl IntakeSession {
    pub fn new() -> Self {
        Self {
            state: IntakeState::AwaitName,
            draft: LeadDraft::default(),
        }
    }
}

impl Default for IntakeSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of feeding one text answer into the questionnaire.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeStep {
    /// More fields to collect: the advanced session and the next prompt.
    Continue(IntakeSession, &'static str),
    /// All four fields collected; the session is finished.
    Complete(CompletedLead),
}

/// Accept a free-form text answer for the current state.
pub fn accept_text(mut session: IntakeSession, text: &str) -> IntakeStep {
    let answer = text.trim().to_string();
    match session.state {
        IntakeState::AwaitName => {
            session.draft.name = Some(answer);
            session.state = IntakeState::AwaitPhone;
            IntakeStep::Continue(session, ASK_PHONE)
        }
        IntakeState::AwaitPhone => {
            session.draft.phone = Some(answer);
            session.state = IntakeState::AwaitCompany;
            IntakeStep::Continue(session, ASK_COMPANY)
        }
        IntakeState::AwaitCompany => {
            session.draft.company = Some(answer);
            session.state = IntakeState::AwaitRequest;
            IntakeStep::Continue(session, ASK_REQUEST)
        }
        IntakeState::AwaitRequest => {
            let draft = session.draft;
            IntakeStep::Complete(CompletedLead {
                name: draft.name.unwrap_or_default(),
                phone: draft.phone.unwrap_or_default(),
                company: draft.company.unwrap_or_default(),
                request: answer,
            })
        }
    }
}

/// The notification text fanned out to operators when a lead completes.
pub fn lead_summary(lead: &CompletedLead, username: Option<&str>, id: i64) -> String {
    let contact = match username {
        Some(handle) => format!("@{handle} (id {id})"),
        None => format!("id {id}"),
    };
    format!(
        "New lead from {contact}\nName: {}\nPhone: {}\nCompany: {}\nRequest: {}",
        lead.name, lead.phone, lead.company, lead.request
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_all_four_steps() {
        let session = IntakeSession::new();
        assert_eq!(session.state, IntakeState::AwaitName);

        let IntakeStep::Continue(session, prompt) = accept_text(session, "Alice") else {
            panic!("expected continue");
        };
        assert_eq!(session.state, IntakeState::AwaitPhone);
        assert_eq!(prompt, ASK_PHONE);

        let IntakeStep::Continue(session, _) = accept_text(session, "+155501") else {
            panic!("expected continue");
        };
        let IntakeStep::Continue(session, prompt) = accept_text(session, "Acme") else {
            panic!("expected continue");
        };
        assert_eq!(prompt, ASK_REQUEST);

        let IntakeStep::Complete(lead) = accept_text(session, "Need an audit") else {
            panic!("expected completion");
        };
        assert_eq!(
            lead,
            CompletedLead {
                name: "Alice".into(),
                phone: "+155501".into(),
                company: "Acme".into(),
                request: "Need an audit".into(),
            }
        );
    }

    #[test]
    fn answers_are_trimmed() {
        let IntakeStep::Continue(session, _) = accept_text(IntakeSession::new(), "  Alice \n")
        else {
            panic!("expected continue");
        };
        assert_eq!(session.draft.name.as_deref(), Some("Alice"));
    }

    #[test]
    fn summary_contains_all_fields() {
        let lead = CompletedLead {
            name: "Alice".into(),
            phone: "+155501".into(),
            company: "Acme".into(),
            request: "Need an audit".into(),
        };
        let summary = lead_summary(&lead, Some("alice"), 42);
        for needle in ["@alice", "42", "Alice", "+155501", "Acme", "Need an audit"] {
            assert!(summary.contains(needle), "missing {needle}: {summary}");
        }
    }

    #[test]
    fn summary_without_handle_uses_id() {
        let lead = CompletedLead {
            name: "A".into(),
            phone: "1".into(),
            company: "B".into(),
            request: "C".into(),
        };
        assert!(lead_summary(&lead, None, 42).contains("id 42"));
    }
}
