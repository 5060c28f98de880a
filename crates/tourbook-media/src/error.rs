use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    /// Declared media type is not `image/*`. The item is skipped, not fatal.
    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// HEIC/HEIF to JPEG conversion failed.
    #[error("HEIF conversion failed: {0}")]
    Conversion(String),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("WebP encoding failed: {0}")]
    Encode(String),
}

impl MediaError {
    /// Whether the caller should log-and-skip rather than report a failure.
    pub fn is_skippable(&self) -> bool {
        matches!(self, MediaError::UnsupportedMedia(_))
    }
}
