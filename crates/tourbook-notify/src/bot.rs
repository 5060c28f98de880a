//! Inbound side of the bot: long polling, command parsing, subscriber
//! bookkeeping and replies.
//!
//! The loop is an owned resource: [`BotHandle::spawn`] starts it and
//! [`BotHandle::stop`] ends it and waits for the task to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tourbook_shared::{ChatId, ChatKind, ProfileFields};
use tracing::{debug, info, warn};

use crate::directory::SubscriberDirectory;
use crate::error::NotifyError;
use crate::telegram::{Message, TelegramTransport};
use crate::transport::{DeliveryTransport, SendOptions};

pub const SUBSCRIBED_REPLY: &str = "Вы подписаны на уведомления ✅\nКоманды: /stop — отписка, /ping — проверка";
pub const UNSUBSCRIBED_REPLY: &str = "Отписал от уведомлений ✅";
pub const PING_REPLY: &str = "pong";

/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    /// `/start`
    Subscribe,
    /// `/stop`
    Unsubscribe,
    /// `/ping`
    Ping,
    /// Anything else.
    Message,
}

/// A normalized inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub profile: ProfileFields,
    pub kind: InboundKind,
}

impl InboundEvent {
    pub fn from_message(message: &Message) -> Self {
        let chat = &message.chat;
        let from = message.from.as_ref();
        let profile = ProfileFields {
            kind: chat.kind.parse::<ChatKind>().ok(),
            username: from.and_then(|u| u.username.clone()).or_else(|| chat.username.clone()),
            first_name: from
                .and_then(|u| u.first_name.clone())
                .or_else(|| chat.first_name.clone()),
            last_name: from.and_then(|u| u.last_name.clone()).or_else(|| chat.last_name.clone()),
            title: chat.title.clone(),
        };

        Self {
            chat_id: ChatId::from(chat.id),
            profile,
            kind: message.text.as_deref().map_or(InboundKind::Message, parse_command),
        }
    }
}

/// Map the leading bot command of `text`, tolerating `/cmd@botname`.
pub fn parse_command(text: &str) -> InboundKind {
    let Some(first) = text.split_whitespace().next() else {
        return InboundKind::Message;
    };
    let Some(command) = first.strip_prefix('/') else {
        return InboundKind::Message;
    };
    let command = command.split('@').next().unwrap_or(command);
    match command.to_ascii_lowercase().as_str() {
        "start" => InboundKind::Subscribe,
        "stop" => InboundKind::Unsubscribe,
        "ping" => InboundKind::Ping,
        _ => InboundKind::Message,
    }
}

/// Apply `event` to the directory and return the reply to send, if any.
pub async fn handle_event(
    event: &InboundEvent,
    directory: &dyn SubscriberDirectory,
) -> Result<Option<&'static str>, NotifyError> {
    match event.kind {
        InboundKind::Subscribe => {
            directory.upsert_active(&event.chat_id, &event.profile).await?;
            directory.touch_activity(&event.chat_id).await?;
            Ok(Some(SUBSCRIBED_REPLY))
        }
        InboundKind::Message => {
            directory.upsert_active(&event.chat_id, &event.profile).await?;
            directory.touch_activity(&event.chat_id).await?;
            Ok(None)
        }
        InboundKind::Unsubscribe => {
            directory.touch_activity(&event.chat_id).await?;
            directory.deactivate(&event.chat_id).await?;
            Ok(Some(UNSUBSCRIBED_REPLY))
        }
        InboundKind::Ping => {
            directory.touch_activity(&event.chat_id).await?;
            Ok(Some(PING_REPLY))
        }
    }
}

/// Handle to the running polling loop.
pub struct BotHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BotHandle {
    pub fn spawn(transport: TelegramTransport, directory: Arc<dyn SubscriberDirectory>) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(run(transport, directory, rx));
        Self { shutdown, task }
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "telegram bot task ended abnormally");
        }
        info!("telegram bot stopped");
    }
}

async fn run(transport: TelegramTransport, directory: Arc<dyn SubscriberDirectory>, mut shutdown: watch::Receiver<bool>) {
    if let Err(e) = transport.delete_webhook(true).await {
        warn!(error = %e, "deleteWebhook failed; polling anyway");
    }
    info!("telegram bot polling started");

    let mut offset = 0i64;
    loop {
        let polled = tokio::select! {
            _ = shutdown.changed() => break,
            polled = transport.get_updates(offset) => polled,
        };

        let updates = match polled {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "getUpdates failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                }
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };
            let event = InboundEvent::from_message(&message);
            debug!(chat_id = %event.chat_id, kind = ?event.kind, "inbound message");

            match handle_event(&event, directory.as_ref()).await {
                Ok(Some(reply)) => {
                    let outcome = transport.send(&event.chat_id, reply, &SendOptions::default()).await;
                    if !outcome.is_delivered() {
                        warn!(chat_id = %event.chat_id, ?outcome, "reply not delivered");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(chat_id = %event.chat_id, error = %e, "inbound handling failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Mutex;
    use tourbook_store::Database;

    use super::*;
    use crate::directory::SqliteDirectory;
    use crate::telegram::{Chat, User};

    fn message(text: Option<&str>) -> Message {
        Message {
            chat: Chat {
                id: 77,
                kind: "private".into(),
                title: None,
                username: Some("chat_name".into()),
                first_name: Some("Chat".into()),
                last_name: None,
            },
            from: Some(User {
                username: Some("olga".into()),
                first_name: Some("Olga".into()),
                last_name: Some("P".into()),
            }),
            text: text.map(str::to_string),
        }
    }

    fn directory() -> SqliteDirectory {
        SqliteDirectory::new(Arc::new(Mutex::new(Database::open_in_memory().unwrap())))
    }

    #[test]
    fn command_parsing() {
        assert_eq!(parse_command("/start"), InboundKind::Subscribe);
        assert_eq!(parse_command("/start@tour_bot payload"), InboundKind::Subscribe);
        assert_eq!(parse_command("/STOP"), InboundKind::Unsubscribe);
        assert_eq!(parse_command("/ping@x"), InboundKind::Ping);
        assert_eq!(parse_command("/help"), InboundKind::Message);
        assert_eq!(parse_command("hello /start"), InboundKind::Message);
        assert_eq!(parse_command("   "), InboundKind::Message);
    }

    #[test]
    fn event_prefers_sender_profile() {
        let event = InboundEvent::from_message(&message(Some("hi")));
        assert_eq!(event.chat_id.as_str(), "77");
        assert_eq!(event.kind, InboundKind::Message);
        assert_eq!(event.profile.kind, Some(ChatKind::Private));
        assert_eq!(event.profile.username.as_deref(), Some("olga"));
        assert_eq!(event.profile.last_name.as_deref(), Some("P"));
    }

    #[test]
    fn non_text_messages_are_plain_messages() {
        assert_eq!(InboundEvent::from_message(&message(None)).kind, InboundKind::Message);
    }

    #[tokio::test]
    async fn start_subscribes_and_stop_unsubscribes() {
        let dir = directory();
        let start = InboundEvent::from_message(&message(Some("/start")));

        assert_eq!(handle_event(&start, &dir).await.unwrap(), Some(SUBSCRIBED_REPLY));
        let sub = dir.get(&start.chat_id).await.unwrap().unwrap();
        assert!(sub.is_active);
        assert!(sub.last_message_at.is_some());

        let stop = InboundEvent::from_message(&message(Some("/stop")));
        assert_eq!(handle_event(&stop, &dir).await.unwrap(), Some(UNSUBSCRIBED_REPLY));
        assert!(!dir.get(&stop.chat_id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn any_message_reactivates() {
        let dir = directory();
        let stop = InboundEvent::from_message(&message(Some("/stop")));
        handle_event(&InboundEvent::from_message(&message(Some("/start"))), &dir)
            .await
            .unwrap();
        handle_event(&stop, &dir).await.unwrap();

        let hello = InboundEvent::from_message(&message(Some("hello again")));
        assert_eq!(handle_event(&hello, &dir).await.unwrap(), None);
        assert!(dir.get(&hello.chat_id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn ping_does_not_subscribe() {
        let dir = directory();
        let ping = InboundEvent::from_message(&message(Some("/ping")));
        assert_eq!(handle_event(&ping, &dir).await.unwrap(), Some(PING_REPLY));
        assert!(dir.get(&ping.chat_id).await.unwrap().is_none());
    }
}
