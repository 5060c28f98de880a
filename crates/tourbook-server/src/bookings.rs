use axum::{extract::State, Json};
use serde_json::{json, Value};
use tourbook_notify::{html_prefix, utf16_len, BroadcastResult};
use tourbook_shared::constants::MAX_MESSAGE_LEN;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::catalog::{text, to_number};
use crate::error::ServerError;

pub const UNAVAILABLE_WARNING: &str = "Telegram disabled/unavailable";

/// Per-field caps, in characters, applied before escaping.
const SHORT_FIELD_MAX: usize = 100;
const TITLE_MAX: usize = 200;
const PHONE_MAX: usize = 40;
const TOUR_ID_MAX: usize = 64;
const COMMENT_MAX: usize = 2000;

const COMMENT_LABEL: &str = "• <b>Комментарий:</b> ";

/// A booking request as submitted by the public site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingRequest {
    pub tour_id: String,
    pub tour_title: String,
    /// Free text such as `01.12.2025 — 05.12.2025`.
    pub date_range: String,
    pub name: String,
    pub phone: String,
    pub adults: Option<f64>,
    pub children: Option<f64>,
    pub comment: String,
}

impl BookingRequest {
    pub fn from_json(body: &Value) -> Self {
        let field = |name: &str, max: usize| cap_chars(text(body.get(name)).trim(), max);
        // Present counts that do not parse still show up, as zero.
        let count = |name: &str| match body.get(name) {
            None | Some(Value::Null) => None,
            value => Some(to_number(value).unwrap_or(0.0)),
        };

        Self {
            tour_id: field("tourId", TOUR_ID_MAX),
            tour_title: field("tourTitle", TITLE_MAX),
            date_range: field("dateRange", SHORT_FIELD_MAX),
            name: field("name", SHORT_FIELD_MAX),
            phone: field("phone", PHONE_MAX),
            adults: count("adults"),
            children: count("children"),
            comment: field("comment", COMMENT_MAX),
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        let mut problems = Vec::new();
        if self.tour_id.is_empty() && self.tour_title.is_empty() {
            problems.push("tourId или tourTitle обязателен");
        }
        if self.name.is_empty() {
            problems.push("name обязателен");
        }
        if self.phone.is_empty() {
            problems.push("phone обязателен");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ServerError::BadRequest(problems.join(", ")))
        }
    }
}

fn cap_chars(raw: &str, max: usize) -> String {
    match raw.char_indices().nth(max) {
        Some((end, _)) => raw[..end].to_string(),
        None => raw.to_string(),
    }
}

/// Escape the characters Telegram's HTML parse mode cares about.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// The notification text for a booking. Optional fields that are empty are
/// left out entirely. The comment is shortened so the whole message stays
/// within [`MAX_MESSAGE_LEN`] and is never cut later in the middle of markup.
pub fn format_booking_message(booking: &BookingRequest) -> String {
    let mut lines = vec!["🧳 <b>Новая заявка на тур</b>".to_string()];

    if !booking.tour_title.is_empty() {
        lines.push(format!("• <b>Тур:</b> {}", escape_html(&booking.tour_title)));
    }
    if !booking.date_range.is_empty() {
        lines.push(format!("• <b>Даты:</b> {}", escape_html(&booking.date_range)));
    }
    lines.push(format!("• <b>Имя:</b> {}", escape_html(&booking.name)));
    lines.push(format!("• <b>Телефон:</b> {}", escape_html(&booking.phone)));
    if let Some(adults) = booking.adults {
        lines.push(format!("• <b>Взрослых:</b> {adults}"));
    }
    if let Some(children) = booking.children {
        lines.push(format!("• <b>Детей:</b> {children}"));
    }

    let tour_id_line = (!booking.tour_id.is_empty())
        .then(|| format!("\nID тура: <code>{}</code>", escape_html(&booking.tour_id)));

    if !booking.comment.is_empty() {
        let used = utf16_len(&lines.join("\n"))
            + 1
            + utf16_len(COMMENT_LABEL)
            + tour_id_line.as_deref().map_or(0, |line| 1 + utf16_len(line));
        let budget = MAX_MESSAGE_LEN.saturating_sub(used);
        lines.push(format!("{COMMENT_LABEL}{}", fit_escaped(escape_html(&booking.comment), budget)));
    }
    lines.extend(tour_id_line);

    lines.join("\n")
}

/// Shorten already-escaped text to `budget` UTF-16 units, ending with `…`.
fn fit_escaped(escaped: String, budget: usize) -> String {
    if utf16_len(&escaped) <= budget {
        return escaped;
    }
    format!("{}…", html_prefix(&escaped, budget.saturating_sub(1)))
}

pub async fn submit_booking(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ServerError> {
    let booking = BookingRequest::from_json(&body);
    booking.validate()?;

    let message = format_booking_message(&booking);
    match state.dispatcher.notify_all(&message).await {
        Ok(BroadcastResult::Completed(outcome)) => {
            info!(
                tour_id = %booking.tour_id,
                total = outcome.total,
                failed = outcome.failed,
                "Booking broadcast"
            );
            Ok(Json(json!({ "ok": true })))
        }
        Ok(BroadcastResult::Unavailable) => {
            warn!(tour_id = %booking.tour_id, "Booking received but notifications are off");
            Ok(Json(json!({ "ok": true, "warning": UNAVAILABLE_WARNING })))
        }
        Err(e) => {
            error!(error = %e, "Booking broadcast failed");
            Err(ServerError::Failed("Failed to submit booking".to_string()))
        }
    }
}

/// Broadcast a fixed test message and report the counts.
pub async fn ping_telegram(State(state): State<AppState>) -> Result<Json<Value>, ServerError> {
    match state.dispatcher.notify_all("✅ Тестовое сообщение от сервера").await {
        Ok(BroadcastResult::Completed(outcome)) => {
            info!(total = outcome.total, failed = outcome.failed, "Test broadcast sent");
            Ok(Json(json!({ "ok": true, "total": outcome.total, "failed": outcome.failed })))
        }
        Ok(BroadcastResult::Unavailable) => Ok(Json(json!({ "ok": true, "warning": UNAVAILABLE_WARNING }))),
        Err(e) => {
            error!(error = %e, "Test broadcast failed");
            Err(ServerError::Failed(e.to_string()))
        }
    }
}
