//! Thin Telegram Bot API adapter.
//!
//! Only the three methods the service needs: `sendMessage`, `getUpdates`
//! and `deleteWebhook`. Error answers are normalized into [`SendOutcome`].

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tourbook_shared::ChatId;

use crate::error::NotifyError;
use crate::transport::{DeliveryTransport, SendOptions, SendOutcome};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Server-side wait of one `getUpdates` long poll.
pub const LONG_POLL_SECS: u64 = 25;

// Must outlast a long poll.
const HTTP_TIMEOUT: Duration = Duration::from_secs(LONG_POLL_SECS + 15);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    offset: i64,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct DeleteWebhook {
    drop_pending_updates: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Bot API client bound to one bot token.
#[derive(Clone)]
pub struct TelegramTransport {
    client: reqwest::Client,
    // {api_base}/bot{token}
    endpoint: String,
}

impl TelegramTransport {
    pub fn new(api_base: &str, token: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        })
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, reqwest::Error> {
        // Error answers come with 4xx/5xx statuses and a JSON body; read it
        // regardless of status.
        self.client
            .post(format!("{}/{}", self.endpoint, method))
            .json(body)
            .send()
            .await?
            .json()
            .await
    }

    async fn call_ok<B: Serialize + ?Sized, T: DeserializeOwned>(&self, method: &str, body: &B) -> Result<T, NotifyError> {
        let resp: ApiResponse<T> = self.call(method, body).await?;
        match (resp.ok, resp.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(NotifyError::Api {
                code: resp.error_code,
                description: resp.description.unwrap_or_else(|| format!("{method} failed")),
            }),
        }
    }

    /// Long-poll for updates newer than `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, NotifyError> {
        self.call_ok(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: LONG_POLL_SECS,
                allowed_updates: &["message"],
            },
        )
        .await
    }

    /// Switch the bot to polling mode, optionally discarding queued updates.
    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), NotifyError> {
        let _: bool = self
            .call_ok("deleteWebhook", &DeleteWebhook { drop_pending_updates })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryTransport for TelegramTransport {
    async fn send(&self, chat_id: &ChatId, text: &str, options: &SendOptions) -> SendOutcome {
        let body = SendMessage {
            chat_id: chat_id.as_str(),
            text,
            parse_mode: options.html.then_some("HTML"),
            disable_web_page_preview: options.disable_web_page_preview,
        };

        match self.call::<_, serde_json::Value>("sendMessage", &body).await {
            Ok(resp) => classify(resp),
            Err(e) => SendOutcome::TransientFailure {
                code: e.status().map(|s| i64::from(s.as_u16())),
                description: e.to_string(),
            },
        }
    }
}

fn classify<T>(resp: ApiResponse<T>) -> SendOutcome {
    if resp.ok {
        return SendOutcome::Delivered;
    }
    SendOutcome::from_error(
        resp.error_code,
        resp.description.unwrap_or_default(),
        resp.parameters.and_then(|p| p.retry_after),
    )
}
