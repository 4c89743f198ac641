//! Failure alerts sent to a Telegram chat list.
//!
//! Telegram Bot API reference: https://core.telegram.org/bots/api#sendmessage

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::scrape::AlertConfig;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("TOKEN not defined in environment, skip sending telegram message")]
    MissingToken,

    #[error("chat list is empty (env var: TELEGRAM_CHATLIST)")]
    NoRecipients,

    #[error("{} of {total} chat(s) could not be notified", failed.len())]
    Delivery {
        total: usize,
        failed: Vec<ChatDeliveryError>,
    },
}

#[derive(Error, Debug)]
pub enum ChatDeliveryError {
    #[error("chat {chat}: request failed: {source}")]
    Request { chat: String, source: reqwest::Error },

    #[error("chat {chat}: telegram answered with status {status}: {body}")]
    Rejected {
        chat: String,
        status: StatusCode,
        body: String,
    },
}

/// Something that tells a human a run failed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;

    fn name(&self) -> &'static str;
}

pub fn alert_text(message: &str) -> String {
    format!("Error while executing: {message}")
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    config: AlertConfig,
}

impl TelegramNotifier {
    pub fn new(client: reqwest::Client, config: AlertConfig) -> Self {
        Self { client, config }
    }

    async fn send_to_chat(&self, token: &str, chat: &str, text: &str) -> Result<(), ChatDeliveryError> {
        let url = format!("{}/bot{}/sendMessage", self.config.telegram_api_url, token);
        let response = self
            .client
            .post(url)
            .json(&json!({ "chat_id": chat, "text": text }))
            .send()
            .await
            .map_err(|source| ChatDeliveryError::Request {
                chat: chat.to_string(),
                source: source.without_url(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(ChatDeliveryError::Rejected {
            chat: chat.to_string(),
            status,
            body: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument("send_telegram_alert", skip_all)]
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        let Some(token) = self.config.telegram_token.as_deref() else {
            return Err(NotifyError::MissingToken);
        };
        if self.config.telegram_chats.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let text = alert_text(message);
        let results = join_all(
            self.config
                .telegram_chats
                .iter()
                .map(|chat| self.send_to_chat(token, chat, &text)),
        )
        .await;

        let total = results.len();
        let failed: Vec<ChatDeliveryError> = results.into_iter().filter_map(Result::err).collect();
        for e in &failed {
            warn!("{e}");
        }
        if failed.is_empty() {
            info!("Alert sent to {total} chat(s).");
            Ok(())
        } else {
            Err(NotifyError::Delivery { total, failed })
        }
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Delivers `message` through every notifier; failures are logged and swallowed.
pub async fn alert_all(notifiers: &[Box<dyn Notifier>], message: &str) {
    for notifier in notifiers {
        if let Err(e) = notifier.notify(message).await {
            error!("Alert via {} failed: {}", notifier.name(), e);
        }
    }
}
