//! # tourbook-notify
//!
//! Booking notifications: the delivery transport seam, the Telegram Bot API
//! adapter, the async subscriber directory, the broadcast dispatcher and the
//! inbound bot loop.

pub mod bot;
pub mod directory;
pub mod dispatcher;
pub mod telegram;
pub mod transport;

mod error;

pub use bot::{BotHandle, InboundEvent, InboundKind};
pub use directory::{SqliteDirectory, SubscriberDirectory};
pub use dispatcher::{
    clamp_text, html_prefix, utf16_len, BroadcastDispatcher, BroadcastOutcome, BroadcastResult,
    DispatchOptions,
};
pub use error::NotifyError;
pub use telegram::TelegramTransport;
pub use transport::{DeliveryTransport, SendOptions, SendOutcome};
