//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development. A `.env` file is read by `main` before this runs.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use tourbook_media::PublicUrlMapper;
use tourbook_shared::constants::{DEFAULT_HTTP_PORT, MAX_UPLOAD_SIZE};
use tourbook_notify::telegram::DEFAULT_API_BASE;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `HTTP_ADDR`, or `PORT` (binds `0.0.0.0:{PORT}`)
    /// Default: `0.0.0.0:5174`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./data/tourbook.db`
    pub database_path: PathBuf,

    /// Directory of the object store, also served under `/uploads`.
    /// Env: `BLOB_STORAGE_PATH`
    /// Default: `./uploads`
    pub blob_storage_path: PathBuf,

    /// Base of the public URLs handed out for stored images.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:{port}/uploads`
    pub public_base_url: String,

    /// Host and bucket of an S3-style storage whose URLs may appear in
    /// payloads; they are mapped back to keys.
    /// Env: `STORAGE_HOST`, `STORAGE_BUCKET`
    pub storage_host: Option<String>,
    pub storage_bucket: Option<String>,

    /// Admin password. Admin endpoints are unusable without it.
    /// Env: `ADMIN_PASSWORD`
    pub admin_password: Option<String>,

    /// Origins allowed by CORS; empty allows any origin.
    /// Env: `ORIGIN_WHITELIST` (comma-separated)
    pub origin_whitelist: Vec<String>,

    /// Env: `TELEGRAM_ENABLE` (anything but `false` enables)
    pub telegram_enabled: bool,

    /// Env: `TELEGRAM_BOT_TOKEN`
    pub telegram_bot_token: Option<String>,

    /// Env: `TELEGRAM_API_BASE`
    /// Default: `https://api.telegram.org`
    pub telegram_api_base: String,

    /// Whether a reverse proxy in front appends `X-Forwarded-For`; rate
    /// limits then key on its last hop.
    /// Env: `TRUST_PROXY` (`true` / `1`)
    /// Default: `false`
    pub trust_proxy: bool,

    /// Largest accepted file in an upload, in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    /// Default: 30 MiB
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./data/tourbook.db"),
            blob_storage_path: PathBuf::from("./uploads"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}/uploads"),
            storage_host: None,
            storage_bucket: None,
            admin_password: None,
            origin_whitelist: Vec::new(),
            telegram_enabled: true,
            telegram_bot_token: None,
            telegram_api_base: DEFAULT_API_BASE.to_string(),
            trust_proxy: false,
            max_upload_size: MAX_UPLOAD_SIZE,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("blob_storage_path", &self.blob_storage_path)
            .field("public_base_url", &self.public_base_url)
            .field("storage_host", &self.storage_host)
            .field("storage_bucket", &self.storage_bucket)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "<redacted>"))
            .field("origin_whitelist", &self.origin_whitelist)
            .field("telegram_enabled", &self.telegram_enabled)
            .field("telegram_bot_token", &self.telegram_bot_token.as_ref().map(|_| "<redacted>"))
            .field("telegram_api_base", &self.telegram_api_base)
            .field("trust_proxy", &self.trust_proxy)
            .field("max_upload_size", &self.max_upload_size)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(port) = non_empty("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(addr) = non_empty("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = non_empty("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = non_empty("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        config.public_base_url = non_empty("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}/uploads", config.http_addr.port()));

        config.storage_host = non_empty("STORAGE_HOST");
        config.storage_bucket = non_empty("STORAGE_BUCKET");
        config.admin_password = non_empty("ADMIN_PASSWORD");

        if let Some(list) = non_empty("ORIGIN_WHITELIST") {
            config.origin_whitelist = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(val) = non_empty("TELEGRAM_ENABLE") {
            config.telegram_enabled = !val.eq_ignore_ascii_case("false");
        }
        config.telegram_bot_token = non_empty("TELEGRAM_BOT_TOKEN");
        if let Some(base) = non_empty("TELEGRAM_API_BASE") {
            config.telegram_api_base = base;
        }

        if let Some(val) = non_empty("TRUST_PROXY") {
            config.trust_proxy = val == "1" || val.eq_ignore_ascii_case("true");
        }

        if let Some(val) = non_empty("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        config
    }

    /// The bot token, when notifications are enabled and a token is set.
    pub fn telegram_token(&self) -> Option<&str> {
        self.telegram_bot_token
            .as_deref()
            .filter(|_| self.telegram_enabled)
    }

    pub fn url_mapper(&self) -> PublicUrlMapper {
        let mapper = PublicUrlMapper::new(self.public_base_url.clone());
        match (&self.storage_host, &self.storage_bucket) {
            (Some(host), Some(bucket)) => mapper.with_bucket(host.clone(), bucket.clone()),
            _ => mapper,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 5174).into());
        assert_eq!(config.public_base_url, "http://localhost:5174/uploads");
        assert_eq!(config.max_upload_size, 30 * 1024 * 1024);
        assert!(config.telegram_enabled);
        assert!(config.telegram_token().is_none());
        assert!(config.admin_password.is_none());
        assert!(!config.trust_proxy);
    }

    #[test]
    fn proxy_trust_is_opt_in() {
        assert!(from_pairs(&[("TRUST_PROXY", "true")]).trust_proxy);
        assert!(from_pairs(&[("TRUST_PROXY", "1")]).trust_proxy);
        assert!(!from_pairs(&[("TRUST_PROXY", "no")]).trust_proxy);
    }

    #[test]
    fn port_and_addr() {
        let config = from_pairs(&[("PORT", "8080")]);
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.public_base_url, "http://localhost:8080/uploads");

        let config = from_pairs(&[("PORT", "8080"), ("HTTP_ADDR", "127.0.0.1:9000")]);
        assert_eq!(config.http_addr, "127.0.0.1:9000".parse().unwrap());

        let config = from_pairs(&[("PORT", "not-a-port")]);
        assert_eq!(config.http_addr.port(), 5174);
    }

    #[test]
    fn telegram_switch() {
        let on = from_pairs(&[("TELEGRAM_BOT_TOKEN", "123:abc")]);
        assert_eq!(on.telegram_token(), Some("123:abc"));

        let off = from_pairs(&[("TELEGRAM_BOT_TOKEN", "123:abc"), ("TELEGRAM_ENABLE", "FALSE")]);
        assert!(off.telegram_token().is_none());

        let blank = from_pairs(&[("TELEGRAM_BOT_TOKEN", "  ")]);
        assert!(blank.telegram_token().is_none());
    }

    #[test]
    fn whitelist_is_split_and_trimmed() {
        let config = from_pairs(&[("ORIGIN_WHITELIST", "https://a.ru, https://b.ru,,")]);
        assert_eq!(config.origin_whitelist, vec!["https://a.ru", "https://b.ru"]);
    }

    #[test]
    fn bucket_mapping_needs_both_parts() {
        let config = from_pairs(&[
            ("PUBLIC_BASE_URL", "https://cdn.example.com/media"),
            ("STORAGE_HOST", "storage.yandexcloud.net"),
            ("STORAGE_BUCKET", "tours"),
        ]);
        let urls = config.url_mapper();
        assert_eq!(urls.to_key("https://storage.yandexcloud.net/tours/a/b.webp"), "a/b.webp");
        assert_eq!(urls.to_url("a/b.webp"), "https://cdn.example.com/media/a/b.webp");
    }

    #[test]
    fn debug_hides_secrets() {
        let config = from_pairs(&[("ADMIN_PASSWORD", "hunter2"), ("TELEGRAM_BOT_TOKEN", "123:secret")]);
        let printed = format!("{config:?}");
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("123:secret"));
    }
}
