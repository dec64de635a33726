//! Messenger abstraction for chat I/O.

pub mod telegram;

pub use telegram::TelegramMessenger;

use async_trait::async_trait;

use crate::error::MessengerError;

/// An inline keyboard button. `data` is the opaque callback payload echoed
/// back when the button is pressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl ToString) -> Self {
        Self {
            label: label.into(),
            data: data.to_string(),
        }
    }
}

/// Rows of inline buttons attached to an outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard(pub Vec<Vec<Button>>);

impl Keyboard {
    /// Render as a Telegram `reply_markup` object.
    pub fn to_reply_markup(&self) -> serde_json::Value {
        let rows: Vec<Vec<serde_json::Value>> = self
            .0
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| serde_json::json!({"text": b.label, "callback_data": b.data}))
                    .collect()
            })
            .collect();
        serde_json::json!({ "inline_keyboard": rows })
    }
}

/// The participant a message came from (or was originally sent by, for
/// forwards).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Sender {
    /// Best-effort display name: "First Last", falling back to the handle
    /// and finally the numeric id.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self
                .username
                .clone()
                .unwrap_or_else(|| self.id.to_string()),
        }
    }
}

/// What kind of inbound event arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// A `/command`, with the leading slash and any `@botname` suffix stripped.
    Command(String),
    /// Plain text.
    Text(String),
    /// A photo attachment with an optional caption. `file_id` can be passed
    /// back to the Bot API to re-send the same image.
    Photo {
        file_id: String,
        caption: Option<String>,
    },
    /// A button press. `id` must be acknowledged via `ack_callback`.
    Callback { id: String, data: String },
    /// A forwarded message carrying the original sender's metadata.
    Forwarded { origin: Sender },
}

/// A single inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub chat: i64,
    pub from: Sender,
    pub kind: InboundKind,
}

/// Abstract send capability. The conversation engine and fan-out depend only
/// on this trait; `TelegramMessenger` is the production implementation.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text message, optionally with an inline keyboard.
    async fn send_text(
        &self,
        chat: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), MessengerError>;

    /// Send a photo by file reference (file id or URL) with a caption.
    async fn send_photo(
        &self,
        chat: i64,
        file_ref: &str,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), MessengerError>;

    /// Send an in-memory file as a document.
    async fn send_document(
        &self,
        chat: i64,
        file_bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<(), MessengerError>;

    /// Acknowledge a callback button press so the client stops its spinner.
    async fn ack_callback(&self, callback_id: &str) -> Result<(), MessengerError>;
}
