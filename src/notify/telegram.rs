// ABOUTME: Thin Telegram Bot API client for notification delivery and chat discovery

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::TELEGRAM_TIMEOUT;

const API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("telegram request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram API error: {0}")]
    Api(String),
}

/// A chat the bot has seen, surfaced so the user can pick a delivery target.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Update {
    message: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    chat: Chat,
    from: Option<User>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

pub struct TelegramSender {
    client: reqwest::Client,
    token: String,
    allowed_users: Vec<i64>,
}

impl TelegramSender {
    pub fn new(token: String, allowed_users: Vec<i64>) -> Result<Self, TelegramError> {
        let client = reqwest::Client::builder()
            .timeout(TELEGRAM_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            token,
            allowed_users,
        })
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let url = format!("{API_BASE}/bot{}/sendMessage", self.token);
        let response: ApiEnvelope<serde_json::Value> = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?
            .json()
            .await?;
        if !response.ok {
            return Err(TelegramError::Api(
                response
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }

    /// Chats visible in the bot's recent updates, deduplicated, restricted to
    /// allowed users when configured.
    pub async fn list_chats(&self) -> Result<Vec<ChatInfo>, TelegramError> {
        let url = format!("{API_BASE}/bot{}/getUpdates", self.token);
        let response: ApiEnvelope<Vec<Update>> = self.client.get(&url).send().await?.json().await?;
        if !response.ok {
            return Err(TelegramError::Api(
                response
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let mut chats: Vec<ChatInfo> = Vec::new();
        for update in response.result.unwrap_or_default() {
            let Some(message) = update.message else { continue };
            if !self.allowed_users.is_empty() {
                let allowed = message
                    .from
                    .as_ref()
                    .is_some_and(|u| self.allowed_users.contains(&u.id));
                if !allowed {
                    debug!("skipping update from unlisted user");
                    continue;
                }
            }
            let chat = message.chat;
            let title = chat
                .title
                .or(chat.username)
                .or(chat.first_name)
                .unwrap_or_else(|| chat.id.to_string());
            if !chats.iter().any(|c| c.id == chat.id) {
                chats.push(ChatInfo { id: chat.id, title });
            }
        }
        Ok(chats)
    }
}
