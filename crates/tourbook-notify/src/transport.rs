//! The delivery seam between the dispatcher and a messaging provider.
//!
//! Providers report failures in their own shapes; adapters normalize them
//! into [`SendOutcome`] so nothing downstream inspects raw errors.

use std::time::Duration;

use async_trait::async_trait;
use tourbook_shared::constants::{is_permanent_failure, RATE_LIMITED_CODE};
use tourbook_shared::ChatId;

/// Result of a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Code 429. `retry_after` is the provider's suggested wait, if any.
    RateLimited { retry_after: Option<Duration> },
    /// Codes 400/403: the chat is gone or has blocked the bot.
    PermanentFailure { code: i64, description: String },
    /// Everything else, including network errors (`code: None`).
    TransientFailure {
        code: Option<i64>,
        description: String,
    },
}

impl SendOutcome {
    /// Classify a provider error report.
    pub fn from_error(code: Option<i64>, description: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        let description = description.into();
        match code {
            Some(RATE_LIMITED_CODE) => SendOutcome::RateLimited {
                retry_after: retry_after_secs.map(Duration::from_secs),
            },
            Some(code) if is_permanent_failure(code) => SendOutcome::PermanentFailure { code, description },
            code => SendOutcome::TransientFailure { code, description },
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Delivered)
    }

    /// Code to store as the subscriber's last error.
    pub fn code(&self) -> Option<i64> {
        match self {
            SendOutcome::Delivered => None,
            SendOutcome::RateLimited { .. } => Some(RATE_LIMITED_CODE),
            SendOutcome::PermanentFailure { code, .. } => Some(*code),
            SendOutcome::TransientFailure { code, .. } => *code,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            SendOutcome::Delivered => "",
            SendOutcome::RateLimited { .. } => "Too Many Requests",
            SendOutcome::PermanentFailure { description, .. }
            | SendOutcome::TransientFailure { description, .. } => description,
        }
    }
}

/// Per-message formatting flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Render the text as HTML.
    pub html: bool,
    pub disable_web_page_preview: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            html: true,
            disable_web_page_preview: true,
        }
    }
}

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Make exactly one delivery attempt. Never retries.
    async fn send(&self, chat_id: &ChatId, text: &str, options: &SendOptions) -> SendOutcome;
}
