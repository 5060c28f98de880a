//! Types and constants shared by every `tourbook-*` crate.

pub mod constants;
pub mod error;
pub mod types;

pub use error::SharedError;
pub use types::{ChatId, ChatKind, ProfileFields};
