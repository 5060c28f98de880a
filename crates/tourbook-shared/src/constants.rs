/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 5174;

/// Maximum accepted size of a single uploaded file (30 MiB)
pub const MAX_UPLOAD_SIZE: usize = 30 * 1024 * 1024;

/// Folder used when an upload names none (or only disallowed characters)
pub const DEFAULT_UPLOAD_FOLDER: &str = "tours";

/// Hard ceiling on outgoing notification text, in UTF-16 code units (the
/// unit the Bot API counts)
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Appended to notification text cut down to `MAX_MESSAGE_LEN`
pub const TRUNCATION_MARKER: &str = "\n…(truncated)";

/// Wait applied when a rate-limited send carries no `retry_after`
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Delivery error codes after which a chat is considered unreachable
pub const PERMANENT_FAILURE_CODES: [i64; 2] = [400, 403];

/// Delivery error code signalling a rate limit
pub const RATE_LIMITED_CODE: i64 = 429;

/// Admin session lifetime in days
pub const ADMIN_TOKEN_TTL_DAYS: i64 = 7;

/// Key derivation context for admin session tokens (BLAKE3)
pub const KDF_CONTEXT_ADMIN_TOKEN: &str = "tourbook-admin-token-v1";

/// Returns `true` if a delivery error code means the chat cannot be reached again.
pub fn is_permanent_failure(code: i64) -> bool {
    PERMANENT_FAILURE_CODES.contains(&code)
}
