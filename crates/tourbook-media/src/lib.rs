//! # tourbook-media
//!
//! Image ingestion for catalog uploads:
//! - [`transcode`]: normalizes any uploaded image (HEIC/HEIF included) into a
//!   size-bounded WebP via iterative quality/width reduction
//! - [`keys`]: storage key allocation and public URL <-> key mapping

pub mod heif;
pub mod keys;
pub mod plan;
pub mod transcode;

mod error;

pub use error::MediaError;
pub use keys::{allocate_key, replace_extension, sanitize_folder, PublicUrlMapper};
pub use plan::{CompressionPlan, CompressionStep};
pub use transcode::{ImageTranscoder, TranscodeOptions, Transcoded};
