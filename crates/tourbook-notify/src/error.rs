use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifyError {
    /// The subscriber directory could not be read or written.
    #[error("Subscriber directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// The Bot API answered `ok: false` to a control call.
    #[error("Telegram API error {code:?}: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<tourbook_store::StoreError> for NotifyError {
    fn from(e: tourbook_store::StoreError) -> Self {
        NotifyError::DirectoryUnavailable(e.to_string())
    }
}
