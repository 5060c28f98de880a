//! Storage key allocation and public URL <-> key mapping.
//!
//! Keys look like `{folder}/{yyyy}/{mm}/{uuid}{ext}`. They depend on the clock
//! and a fresh v4 UUID only, never on content: identical uploads get
//! distinct keys.

use std::path::Path;

use chrono::{DateTime, Datelike, Utc};
use tourbook_shared::constants::DEFAULT_UPLOAD_FOLDER;
use uuid::Uuid;

/// Extension used when the original file name carries none.
pub const FALLBACK_EXTENSION: &str = ".jpg";

/// Keep `[A-Za-z0-9/_-]`, strip leading/trailing slashes, fall back to the
/// default folder when nothing is left.
pub fn sanitize_folder(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-'))
        .collect();
    let trimmed = kept.trim_matches('/');
    if trimmed.is_empty() {
        DEFAULT_UPLOAD_FOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Allocate a fresh key for `original_name` under `folder`.
pub fn allocate_key(original_name: &str, folder: &str) -> String {
    allocate_key_at(original_name, folder, Utc::now())
}

pub fn allocate_key_at(original_name: &str, folder: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{:04}/{:02}/{}{}",
        sanitize_folder(folder),
        now.year(),
        now.month(),
        Uuid::new_v4(),
        extension_of(original_name)
    )
}

/// Lower-cased `.ext` of a file name, or [`FALLBACK_EXTENSION`].
fn extension_of(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// Swap the extension of the last path segment of `key` for `extension`
/// (which includes the leading dot).
pub fn replace_extension(key: &str, extension: &str) -> String {
    let segment_start = key.rfind('/').map_or(0, |i| i + 1);
    let stem_end = key[segment_start..]
        .rfind('.')
        .filter(|&i| i > 0)
        .map_or(key.len(), |i| segment_start + i);
    format!("{}{}", &key[..stem_end], extension)
}

/// Converts between stored keys and the URLs handed to clients.
///
/// Understands three URL shapes:
/// - `{public_base}/{key}`
/// - `https://{storage_host}/{bucket}/{key}` (path style)
/// - `https://{bucket}.{storage_host}/{key}` (virtual-host style)
///
/// Bare keys pass through with leading slashes stripped; absolute URLs on any
/// other host are kept verbatim and treated as opaque keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicUrlMapper {
    public_base: String,
    storage_host: Option<String>,
    bucket: Option<String>,
}

impl PublicUrlMapper {
    pub fn new(public_base: impl Into<String>) -> Self {
        let public_base = public_base.into().trim_end_matches('/').to_string();
        Self {
            public_base,
            storage_host: None,
            bucket: None,
        }
    }

    pub fn with_bucket(mut self, storage_host: impl Into<String>, bucket: impl Into<String>) -> Self {
        self.storage_host = Some(storage_host.into().to_ascii_lowercase());
        self.bucket = Some(bucket.into());
        self
    }

    pub fn public_base(&self) -> &str {
        &self.public_base
    }

    pub fn to_url(&self, key: &str) -> String {
        if key.is_empty() || is_absolute_url(key) || self.public_base.is_empty() {
            return key.to_string();
        }
        format!("{}/{}", self.public_base, key.trim_start_matches('/'))
    }

    pub fn to_key(&self, url_or_key: &str) -> String {
        let value = url_or_key.trim();
        if value.is_empty() {
            return String::new();
        }
        let Some((host, path)) = split_url(value) else {
            return value.trim_start_matches('/').to_string();
        };

        if !self.public_base.is_empty() {
            if let Some(rest) = value.strip_prefix(&self.public_base) {
                if rest.starts_with('/') {
                    return join_segments(strip_query(rest).split('/'));
                }
            }
        }

        let host = host.to_ascii_lowercase();
        match self.storage_host.as_deref() {
            Some(storage) if host == storage => {
                let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
                if segments.peek().copied() == self.bucket.as_deref() {
                    segments.next();
                }
                join_segments(segments)
            }
            Some(storage) if self.is_bucket_host(&host, storage) => join_segments(path.split('/')),
            _ => value.to_string(),
        }
    }

    /// `{bucket}.{storage_host}`; other buckets on the same storage are foreign.
    fn is_bucket_host(&self, host: &str, storage: &str) -> bool {
        self.bucket.as_deref().is_some_and(|bucket| {
            host.strip_suffix(storage)
                .and_then(|rest| rest.strip_suffix('.'))
                .is_some_and(|label| label.eq_ignore_ascii_case(bucket))
        })
    }
}

fn is_absolute_url(value: &str) -> bool {
    let lower = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Split an absolute http(s) URL into host and path (query/fragment dropped).
fn split_url(value: &str) -> Option<(&str, &str)> {
    if !is_absolute_url(value) {
        return None;
    }
    let after_scheme = &value[value.find("://")? + 3..];
    let host_end = after_scheme
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(after_scheme.len());
    let (host, rest) = after_scheme.split_at(host_end);
    let path = if rest.starts_with('/') { strip_query(rest) } else { "" };
    Some((host, path))
}

fn strip_query(path: &str) -> &str {
    path.find(|c| matches!(c, '?' | '#'))
        .map_or(path, |i| &path[..i])
}

fn join_segments<'a>(segments: impl Iterator<Item = &'a str>) -> String {
    segments
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn yandex() -> PublicUrlMapper {
        PublicUrlMapper::new("https://storage.yandexcloud.net/tour-media/")
            .with_bucket("storage.yandexcloud.net", "tour-media")
    }

    #[test]
    fn folder_sanitization() {
        assert_eq!(sanitize_folder("tours/altai"), "tours/altai");
        assert_eq!(sanitize_folder("//hero images/x//"), "heroimages/x");
        assert_eq!(sanitize_folder("../../etc"), "etc");
        assert_eq!(sanitize_folder("маршруты"), "tours");
        assert_eq!(sanitize_folder("///"), "tours");
        assert_eq!(sanitize_folder(""), "tours");
        assert_eq!(sanitize_folder("a_b-c/D9"), "a_b-c/D9");
    }

    #[test]
    fn key_shape() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap();
        let key = allocate_key_at("Sunset.JPEG", "gallery", now);
        let parts: Vec<&str> = key.split('/').collect();

        assert_eq!(&parts[..3], &["gallery", "2025", "03"]);
        let file = parts[3];
        assert!(file.ends_with(".jpeg"));
        assert!(Uuid::parse_str(file.trim_end_matches(".jpeg")).is_ok());
    }

    #[test]
    fn missing_extension_defaults_to_jpg() {
        assert!(allocate_key("camera-upload", "tours").ends_with(".jpg"));
        assert!(allocate_key("", "tours").ends_with(".jpg"));
        assert!(allocate_key("weird.ex t", "tours").ends_with(".jpg"));
    }

    #[test]
    fn identical_arguments_give_distinct_keys() {
        let a = allocate_key("photo.png", "tours");
        let b = allocate_key("photo.png", "tours");
        assert_ne!(a, b);
    }

    #[test]
    fn empty_folder_falls_back() {
        assert!(allocate_key("x.png", "/??/").starts_with("tours/"));
    }

    #[test]
    fn extension_replacement() {
        assert_eq!(replace_extension("tours/2025/03/abc.heic", ".webp"), "tours/2025/03/abc.webp");
        assert_eq!(replace_extension("tours/2025/03/abc", ".webp"), "tours/2025/03/abc.webp");
        assert_eq!(replace_extension("a.b/2025/abc.jpg", ".webp"), "a.b/2025/abc.webp");
    }

    #[test]
    fn key_to_url() {
        let m = yandex();
        assert_eq!(
            m.to_url("/tours/2025/03/a.webp"),
            "https://storage.yandexcloud.net/tour-media/tours/2025/03/a.webp"
        );
        assert_eq!(m.to_url(""), "");
        assert_eq!(m.to_url("https://cdn.example.com/x.png"), "https://cdn.example.com/x.png");
        assert_eq!(PublicUrlMapper::new("").to_url("tours/a.webp"), "tours/a.webp");
    }

    #[test]
    fn url_to_key_path_style() {
        let m = yandex();
        assert_eq!(
            m.to_key("https://storage.yandexcloud.net/tour-media/tours/2025/03/a.webp?v=2"),
            "tours/2025/03/a.webp"
        );
        // Other bucket on the same host: keep the whole path.
        assert_eq!(
            m.to_key("https://storage.yandexcloud.net/other/tours/a.webp"),
            "other/tours/a.webp"
        );
    }

    #[test]
    fn url_to_key_virtual_host_style() {
        assert_eq!(
            yandex().to_key("https://tour-media.storage.yandexcloud.net/tours/2025/03/a.webp"),
            "tours/2025/03/a.webp"
        );
    }

    #[test]
    fn other_bucket_hosts_are_foreign() {
        let m = yandex();
        let other = "https://other-bucket.storage.yandexcloud.net/tours/a.webp";
        assert_eq!(m.to_key(other), other);
        let nested = "https://x.tour-media.storage.yandexcloud.net/a.webp";
        assert_eq!(m.to_key(nested), nested);
    }

    #[test]
    fn url_to_key_under_public_base() {
        let m = PublicUrlMapper::new("http://localhost:5174/uploads");
        assert_eq!(m.to_key("http://localhost:5174/uploads/tours/2025/01/x.webp"), "tours/2025/01/x.webp");
    }

    #[test]
    fn bare_keys_and_foreign_urls_pass_through() {
        let m = yandex();
        assert_eq!(m.to_key("/tours/a.webp"), "tours/a.webp");
        assert_eq!(m.to_key("tours/a.webp"), "tours/a.webp");
        assert_eq!(m.to_key("https://images.example.org/p/a.jpg"), "https://images.example.org/p/a.jpg");
        assert_eq!(m.to_key("  "), "");
    }

    #[test]
    fn mapping_round_trips_for_keys() {
        let m = yandex();
        let key = "tours/2025/03/abc.webp";
        assert_eq!(m.to_key(&m.to_url(key)), key);
    }
}
