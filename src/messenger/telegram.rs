//! Telegram messenger — long-polls the Bot API for updates.
//!
//! Native Bot API implementation over `reqwest`. Outbound sends go through
//! the `Messenger` trait; inbound updates are decoded into `Inbound` events
//! and handed to the dispatcher through an mpsc channel.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tokio::sync::mpsc;

use crate::error::MessengerError;
use crate::messenger::{Inbound, InboundKind, Keyboard, Messenger, Sender};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram messenger — connects to the Bot API via long-polling.
pub struct TelegramMessenger {
    bot_token: String,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramMessenger {
    pub fn new(bot_token: String, poll_timeout_secs: u64) -> Self {
        Self {
            bot_token,
            poll_timeout_secs,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    async fn post_json(
        &self,
        method: &str,
        chat: i64,
        body: serde_json::Value,
    ) -> Result<(), MessengerError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| MessengerError::SendFailed {
                chat,
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(MessengerError::SendFailed {
                chat,
                reason: format!("{method} returned {status}: {detail}"),
            });
        }
        Ok(())
    }

    /// Spawn the long-poll loop. Returns the receiving end of the inbound
    /// event stream; the loop ends when the receiver is dropped.
    pub fn start(&self) -> mpsc::UnboundedReceiver<Inbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let bot_token = self.bot_token.clone();
        let client = self.client.clone();
        let timeout = self.poll_timeout_secs;

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            let url = format!("https://api.telegram.org/bot{bot_token}/getUpdates");

            tracing::info!("Telegram messenger listening for updates...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": timeout,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
                    for update in results {
                        if let Some(uid) =
                            update.get("update_id").and_then(serde_json::Value::as_i64)
                        {
                            offset = uid + 1;
                        }

                        let Some(inbound) = parse_update(update) else {
                            continue;
                        };

                        if tx.send(inbound).is_err() {
                            tracing::info!("Telegram listener channel closed");
                            return;
                        }
                    }
                }
            }
        });

        rx
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(
        &self,
        chat: i64,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), MessengerError> {
        // Keyboards only go on the final chunk of a split message
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len() - 1;

        for (i, chunk) in chunks.iter().enumerate() {
            let mut body = serde_json::json!({
                "chat_id": chat,
                "text": chunk,
            });
            if i == last {
                if let Some(kb) = keyboard {
                    body["reply_markup"] = kb.to_reply_markup();
                }
            }
            self.post_json("sendMessage", chat, body).await?;
        }
        Ok(())
    }

    async fn send_photo(
        &self,
        chat: i64,
        file_ref: &str,
        caption: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), MessengerError> {
        let mut body = serde_json::json!({
            "chat_id": chat,
            "photo": file_ref,
        });
        if !caption.is_empty() {
            body["caption"] = serde_json::Value::String(caption.to_string());
        }
        if let Some(kb) = keyboard {
            body["reply_markup"] = kb.to_reply_markup();
        }
        self.post_json("sendPhoto", chat, body).await
    }

    async fn send_document(
        &self,
        chat: i64,
        file_bytes: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> Result<(), MessengerError> {
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let mut form = Form::new()
            .text("chat_id", chat.to_string())
            .part("document", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| MessengerError::SendFailed {
                chat,
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(MessengerError::SendFailed {
                chat,
                reason: format!("sendDocument failed: {detail}"),
            });
        }

        tracing::info!("Document sent to {chat}: {file_name}");
        Ok(())
    }

    async fn ack_callback(&self, callback_id: &str) -> Result<(), MessengerError> {
        self.post_json(
            "answerCallbackQuery",
            0,
            serde_json::json!({ "callback_query_id": callback_id }),
        )
        .await
    }
}

// ── Update decoding ─────────────────────────────────────────────────

/// Decode one getUpdates entry into an `Inbound` event, or `None` for
/// update shapes the bot does not handle.
fn parse_update(update: &serde_json::Value) -> Option<Inbound> {
    if let Some(callback) = update.get("callback_query") {
        let from = parse_sender(callback.get("from")?)?;
        let chat = callback
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(from.id);
        let id = callback.get("id")?.as_str()?.to_string();
        let data = callback.get("data")?.as_str()?.to_string();
        return Some(Inbound {
            chat,
            from,
            kind: InboundKind::Callback { id, data },
        });
    }

    let message = update.get("message")?;
    let from = parse_sender(message.get("from")?)?;
    let chat = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(from.id);

    // Forwards take precedence over their own text/photo content: the
    // add-operator flow only cares about the origin sender.
    if let Some(origin) = parse_forward_origin(message) {
        return Some(Inbound {
            chat,
            from,
            kind: InboundKind::Forwarded { origin },
        });
    }

    if let Some(photos) = message.get("photo").and_then(serde_json::Value::as_array) {
        // The last entry is the largest size
        let file_id = photos
            .last()
            .and_then(|p| p.get("file_id"))
            .and_then(serde_json::Value::as_str)?
            .to_string();
        let caption = message
            .get("caption")
            .and_then(serde_json::Value::as_str)
            .map(String::from);
        return Some(Inbound {
            chat,
            from,
            kind: InboundKind::Photo { file_id, caption },
        });
    }

    let text = message.get("text").and_then(serde_json::Value::as_str)?;
    if let Some(stripped) = text.strip_prefix('/') {
        let command = stripped
            .split_whitespace()
            .next()
            .unwrap_or("")
            .split('@')
            .next()
            .unwrap_or("")
            .to_lowercase();
        if !command.is_empty() {
            return Some(Inbound {
                chat,
                from,
                kind: InboundKind::Command(command),
            });
        }
    }

    Some(Inbound {
        chat,
        from,
        kind: InboundKind::Text(text.to_string()),
    })
}

fn parse_sender(value: &serde_json::Value) -> Option<Sender> {
    Some(Sender {
        id: value.get("id")?.as_i64()?,
        username: value
            .get("username")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
        first_name: value
            .get("first_name")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
        last_name: value
            .get("last_name")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
    })
}

/// Extract the original sender of a forwarded message. Supports both the
/// current `forward_origin` shape and the legacy `forward_from` field.
fn parse_forward_origin(message: &serde_json::Value) -> Option<Sender> {
    if let Some(origin) = message.get("forward_origin") {
        if let Some(user) = origin.get("sender_user") {
            return parse_sender(user);
        }
        // Hidden-user forwards carry no usable identity
        return None;
    }
    message.get("forward_from").and_then(parse_sender)
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Largest prefix within the limit that ends on a char boundary
        let mut cap = max_len;
        while !remaining.is_char_boundary(cap) {
            cap -= 1;
        }

        let chunk = &remaining[..cap];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(cap);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cap } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_url_shape() {
        let m = TelegramMessenger::new("123:ABC".into(), 30);
        assert_eq!(
            m.api_url("getUpdates"),
            "https://api.telegram.org/bot123:ABC/getUpdates"
        );
    }

    #[test]
    fn parse_text_message() {
        let update = serde_json::json!({
            "update_id": 1,
            "message": {
                "chat": {"id": 555},
                "from": {"id": 42, "username": "alice", "first_name": "Alice"},
                "text": "hello there"
            }
        });
        let inbound = parse_update(&update).unwrap();
        assert_eq!(inbound.chat, 555);
        assert_eq!(inbound.from.id, 42);
        assert_eq!(inbound.kind, InboundKind::Text("hello there".into()));
    }

    #[test]
    fn parse_command_strips_slash_and_bot_suffix() {
        let update = serde_json::json!({
            "message": {
                "chat": {"id": 1},
                "from": {"id": 42},
                "text": "/Start@lead_bot now"
            }
        });
        let inbound = parse_update(&update).unwrap();
        assert_eq!(inbound.kind, InboundKind::Command("start".into()));
    }

    #[test]
    fn parse_bare_slash_is_text() {
        let update = serde_json::json!({
            "message": {
                "chat": {"id": 1},
                "from": {"id": 42},
                "text": "/"
            }
        });
        let inbound = parse_update(&update).unwrap();
        assert_eq!(inbound.kind, InboundKind::Text("/".into()));
    }

    #[test]
    fn parse_callback_query() {
        let update = serde_json::json!({
            "callback_query": {
                "id": "cbq-9",
                "from": {"id": 42, "first_name": "Alice"},
                "message": {"chat": {"id": 777}},
                "data": "menu:stats"
            }
        });
        let inbound = parse_update(&update).unwrap();
        assert_eq!(inbound.chat, 777);
        assert_eq!(
            inbound.kind,
            InboundKind::Callback {
                id: "cbq-9".into(),
                data: "menu:stats".into()
            }
        );
    }

    #[test]
    fn parse_photo_takes_largest_size() {
        let update = serde_json::json!({
            "message": {
                "chat": {"id": 1},
                "from": {"id": 42},
                "photo": [
                    {"file_id": "small"},
                    {"file_id": "large"}
                ],
                "caption": "look"
            }
        });
        let inbound = parse_update(&update).unwrap();
        assert_eq!(
            inbound.kind,
            InboundKind::Photo {
                file_id: "large".into(),
                caption: Some("look".into())
            }
        );
    }

    #[test]
    fn parse_forward_origin_current_shape() {
        let update = serde_json::json!({
            "message": {
                "chat": {"id": 1},
                "from": {"id": 42},
                "forward_origin": {
                    "type": "user",
                    "sender_user": {"id": 99, "first_name": "Bob", "last_name": "Ray"}
                },
                "text": "forwarded body"
            }
        });
        let inbound = parse_update(&update).unwrap();
        match inbound.kind {
            InboundKind::Forwarded { origin } => {
                assert_eq!(origin.id, 99);
                assert_eq!(origin.display_name(), "Bob Ray");
            }
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn parse_forward_from_legacy_shape() {
        let update = serde_json::json!({
            "message": {
                "chat": {"id": 1},
                "from": {"id": 42},
                "forward_from": {"id": 99, "first_name": "Bob"},
                "text": "forwarded body"
            }
        });
        let inbound = parse_update(&update).unwrap();
        assert!(matches!(
            inbound.kind,
            InboundKind::Forwarded { origin: Sender { id: 99, .. } }
        ));
    }

    #[test]
    fn parse_hidden_forward_falls_through_to_text() {
        // Hidden-user forwards have no sender identity to grant a role to
        let update = serde_json::json!({
            "message": {
                "chat": {"id": 1},
                "from": {"id": 42},
                "forward_origin": {"type": "hidden_user", "sender_user_name": "Bob"},
                "text": "forwarded body"
            }
        });
        let inbound = parse_update(&update).unwrap();
        assert_eq!(inbound.kind, InboundKind::Text("forwarded body".into()));
    }

    #[test]
    fn parse_ignores_updates_without_payload() {
        let update = serde_json::json!({
            "update_id": 5,
            "message": {
                "chat": {"id": 1},
                "from": {"id": 42},
                "sticker": {"file_id": "x"}
            }
        });
        assert!(parse_update(&update).is_none());
    }

    #[test]
    fn split_message_short() {
        let chunks = split_message("Hello", 4096);
        assert_eq!(chunks, vec!["Hello"]);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(2000));
        assert_eq!(chunks[1], "b".repeat(3000));
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_multibyte_never_cuts_a_char() {
        // The leading 'a' shifts every 2-byte 'я' onto an odd offset, so a
        // fixed cut at 4096 would land mid-character
        let msg = format!("a{}", "я".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.len() <= 4096));
        assert_eq!(chunks.concat(), msg);
    }

    #[test]
    fn split_message_multibyte_with_spaces() {
        let word = "тест ";
        let msg = word.repeat(1000);
        let chunks = split_message(&msg, 4096);
        assert!(chunks.iter().all(|c| c.len() <= 4096));
        for chunk in &chunks {
            assert!(chunk.chars().all(|c| c == 'т' || c == 'е' || c == 'с' || c == ' '));
        }
    }
}
