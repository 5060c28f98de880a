//! Fan-out of one message to every active subscriber.
//!
//! Sends run concurrently and independently: a failing recipient never
//! delays or aborts another. Each recipient gets at most two attempts, the
//! second only after a rate-limit answer and the suggested wait.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tourbook_shared::constants::{DEFAULT_RETRY_AFTER_SECS, MAX_MESSAGE_LEN, TRUNCATION_MARKER};
use tourbook_shared::ChatId;

use crate::directory::SubscriberDirectory;
use crate::error::NotifyError;
use crate::transport::{DeliveryTransport, SendOptions, SendOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Text ceiling in UTF-16 units, truncation marker included.
    pub max_len: usize,
    /// Wait before the retry when a rate limit carries no hint.
    pub default_retry_after: Duration,
    pub send: SendOptions,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_len: MAX_MESSAGE_LEN,
            default_retry_after: Duration::from_secs(DEFAULT_RETRY_AFTER_SECS),
            send: SendOptions::default(),
        }
    }
}

/// Counts for one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Subscribers attempted.
    pub total: usize,
    /// Subscribers whose final attempt did not deliver.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastResult {
    /// No transport is configured. Not an error: notifications are off.
    Unavailable,
    Completed(BroadcastOutcome),
}

pub struct BroadcastDispatcher {
    transport: Option<Arc<dyn DeliveryTransport>>,
    directory: Arc<dyn SubscriberDirectory>,
    options: DispatchOptions,
}

impl BroadcastDispatcher {
    /// `transport` is `None` when delivery is disabled or has no credentials.
    pub fn new(transport: Option<Arc<dyn DeliveryTransport>>, directory: Arc<dyn SubscriberDirectory>) -> Self {
        Self {
            transport,
            directory,
            options: DispatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_available(&self) -> bool {
        self.transport.is_some()
    }

    pub fn directory(&self) -> &Arc<dyn SubscriberDirectory> {
        &self.directory
    }

    /// Deliver `text` to every active subscriber and wait for all of them.
    ///
    /// Returns [`BroadcastResult::Unavailable`] without touching the directory
    /// when there is no transport. A directory that cannot be listed is an
    /// error, never a zero-recipient success.
    pub async fn notify_all(&self, text: &str) -> Result<BroadcastResult, NotifyError> {
        let Some(transport) = self.transport.as_deref() else {
            tracing::debug!("broadcast skipped: no delivery transport");
            return Ok(BroadcastResult::Unavailable);
        };

        let subscribers = self.directory.list_active().await?;
        let text = clamp_text(text, self.options.max_len);

        let outcomes = join_all(
            subscribers
                .iter()
                .map(|sub| self.deliver(transport, &sub.chat_id, &text)),
        )
        .await;

        let outcome = BroadcastOutcome {
            total: outcomes.len(),
            failed: outcomes.iter().filter(|o| !o.is_delivered()).count(),
        };
        if outcome.failed > 0 {
            tracing::warn!(total = outcome.total, failed = outcome.failed, "broadcast finished with failures");
        } else {
            tracing::info!(total = outcome.total, "broadcast delivered");
        }
        Ok(BroadcastResult::Completed(outcome))
    }

    async fn deliver(&self, transport: &dyn DeliveryTransport, chat_id: &ChatId, text: &str) -> SendOutcome {
        let mut outcome = transport.send(chat_id, text, &self.options.send).await;

        if let SendOutcome::RateLimited { retry_after } = outcome {
            let wait = retry_after.unwrap_or(self.options.default_retry_after);
            tracing::debug!(chat_id = %chat_id, wait_ms = wait.as_millis() as u64, "rate limited, retrying once");
            tokio::time::sleep(wait).await;
            outcome = transport.send(chat_id, text, &self.options.send).await;
        }

        if !outcome.is_delivered() {
            tracing::warn!(
                chat_id = %chat_id,
                code = ?outcome.code(),
                description = outcome.description(),
                "delivery failed"
            );
            if let Err(e) = self
                .directory
                .record_send_error(chat_id, outcome.code(), outcome.description())
                .await
            {
                tracing::warn!(chat_id = %chat_id, error = %e, "failed to record delivery error");
            }
        }

        outcome
    }
}

/// Length as the Bot API counts it: UTF-16 code units.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Cut `text` to at most `max_len` UTF-16 units, marker included. The cut
/// never splits a character and never leaves a partial HTML entity or tag.
pub fn clamp_text(text: &str, max_len: usize) -> Cow<'_, str> {
    if utf16_len(text) <= max_len {
        return Cow::Borrowed(text);
    }
    let keep = max_len.saturating_sub(utf16_len(TRUNCATION_MARKER));
    let mut clamped = html_prefix(text, keep).to_string();
    clamped.push_str(TRUNCATION_MARKER);
    Cow::Owned(clamped)
}

/// Longest prefix of `text` within `max_units` UTF-16 units that does not
/// end inside an `&entity;` or a `<tag>`.
pub fn html_prefix(text: &str, max_units: usize) -> &str {
    let mut units = 0;
    let mut end = text.len();
    for (i, ch) in text.char_indices() {
        units += ch.len_utf16();
        if units > max_units {
            end = i;
            break;
        }
    }
    if end == text.len() {
        return text;
    }

    let mut head = &text[..end];
    if let Some(amp) = head.rfind('&') {
        let tail = &head[amp + 1..];
        if tail.chars().all(|c| c.is_ascii_alphanumeric() || c == '#') {
            head = &head[..amp];
        }
    }
    if let Some(lt) = head.rfind('<') {
        if !head[lt..].contains('>') {
            head = &head[..lt];
        }
    }
    head
}
