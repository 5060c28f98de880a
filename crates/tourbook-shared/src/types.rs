use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SharedError;

// Chat identity, always kept as text: supergroup/channel ids such as
// -1001234567890 do not survive a round trip through f64.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct ChatId(String);

impl ChatId {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, SharedError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(SharedError::EmptyChatId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl TryFrom<String> for ChatId {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChatId> for String {
    fn from(id: ChatId) -> Self {
        id.0
    }
}

impl FromStr for ChatId {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

impl FromStr for ChatKind {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(ChatKind::Private),
            "group" => Ok(ChatKind::Group),
            "supergroup" => Ok(ChatKind::Supergroup),
            "channel" => Ok(ChatKind::Channel),
            other => Err(SharedError::UnknownChatKind(other.to_string())),
        }
    }
}

impl fmt::Display for ChatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile data reported by the messenger for a chat.
///
/// Every field is optional: `None` means "not reported this time", and the
/// directory keeps whatever it already stored for that field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileFields {
    pub kind: Option<ChatKind>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Group/channel title.
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_is_trimmed_text() {
        let id = ChatId::new("  -1001234567890123 ").unwrap();
        assert_eq!(id.as_str(), "-1001234567890123");
    }

    #[test]
    fn chat_id_rejects_blank() {
        assert_eq!(ChatId::new("   "), Err(SharedError::EmptyChatId));
    }

    #[test]
    fn chat_id_from_large_negative_integer() {
        let id = ChatId::from(-1_002_147_483_648_123i64);
        assert_eq!(id.to_string(), "-1002147483648123");
    }

    #[test]
    fn chat_id_serde_goes_through_validation() {
        let ok: ChatId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(ok.as_str(), "42");
        assert!(serde_json::from_str::<ChatId>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"42\"");
    }

    #[test]
    fn chat_kind_round_trips_through_text() {
        for kind in [
            ChatKind::Private,
            ChatKind::Group,
            ChatKind::Supergroup,
            ChatKind::Channel,
        ] {
            assert_eq!(kind.as_str().parse::<ChatKind>().unwrap(), kind);
        }
        assert!("bot".parse::<ChatKind>().is_err());
    }
}
