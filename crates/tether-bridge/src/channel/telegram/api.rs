//! Telegram Bot API client.
//!
//! Uses reqwest to call the five Bot API methods the bridge needs:
//! sendMessage (with and without an inline keyboard), editMessageText,
//! answerCallbackQuery, and getUpdates (offset-based long poll).

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::channel::ChannelError;

/// One getUpdates entry.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<WireMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

/// Incoming or sent message.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<WireMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Button interaction on a sent message.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<WireMessage>,
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Thin client over the Bot API.
#[derive(Debug, Clone)]
pub struct TelegramApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramApi {
    /// Create a new Bot API client.
    pub fn new(api_base: &str, token: &str) -> Result<Self, ChannelError> {
        if token.is_empty() {
            return Err(ChannelError::Config("bot token is empty".into()));
        }

        // Ensure a TLS crypto provider is installed (reqwest uses rustls-no-provider).
        // The `Err` case just means it was already installed, safe to ignore.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder().build()?;
        let base_url = api_base.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            token: token.to_string(),
        })
    }

    /// Build the URL for a Bot API method.
    pub(crate) fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, ChannelError> {
        let mut req = self.http.post(self.method_url(method)).json(body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let envelope: ApiEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| ChannelError::Malformed(format!("{method}: {e}")))?;

        if !envelope.ok {
            return Err(ChannelError::Api {
                status,
                message: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }
        envelope
            .result
            .ok_or_else(|| ChannelError::Malformed(format!("{method}: ok without result")))
    }

    /// Send a plain text message.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<WireMessage, ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        self.call("sendMessage", &body, None).await
    }

    /// Send a message with an inline keyboard of `(label, callback_data)` buttons.
    pub async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[(&str, &str)],
    ) -> Result<WireMessage, ChannelError> {
        let row: Vec<serde_json::Value> = buttons
            .iter()
            .map(|(label, data)| serde_json::json!({"text": label, "callback_data": data}))
            .collect();
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "reply_markup": {"inline_keyboard": [row]},
        });
        self.call("sendMessage", &body, None).await
    }

    /// Replace the text of a previously sent message.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        // The edited message comes back; we only care that the call succeeded.
        let _: serde_json::Value = self.call("editMessageText", &body, None).await?;
        Ok(())
    }

    /// Acknowledge a callback query so the client stops its spinner.
    pub async fn answer_callback_query(&self, callback_query_id: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({"callback_query_id": callback_query_id});
        let _: serde_json::Value = self.call("answerCallbackQuery", &body, None).await?;
        Ok(())
    }

    /// Long-poll for updates past `offset`, holding up to `timeout_secs`.
    ///
    /// The HTTP timeout is padded past the server-side hold so a quiet
    /// channel returns an empty batch instead of a client-side error.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, ChannelError> {
        let mut body = serde_json::json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = serde_json::json!(offset);
        }
        self.call(
            "getUpdates",
            &body,
            Some(Duration::from_secs(timeout_secs + 10)),
        )
        .await
    }
}
