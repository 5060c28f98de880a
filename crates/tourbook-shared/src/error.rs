use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SharedError {
    #[error("Chat id must not be empty")]
    EmptyChatId,

    #[error("Unknown chat kind: {0}")]
    UnknownChatKind(String),
}
