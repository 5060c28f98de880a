//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize`; tours are handed to
//! HTTP clients as-is (camelCase on the wire).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tourbook_shared::{ChatId, ChatKind};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Subscriber
// ---------------------------------------------------------------------------

/// The most recent failed delivery to a subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryError {
    /// Transport error code, when the transport reported one.
    pub code: Option<i64>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A chat registered to receive booking notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscriber {
    pub chat_id: ChatId,
    pub kind: ChatKind,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Title of a group or channel.
    pub title: Option<String>,
    /// Whether broadcasts are sent to this chat.
    pub is_active: bool,
    /// First registration; never overwritten.
    pub date_subscribed: DateTime<Utc>,
    /// Last inbound message or command from this chat.
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_error: Option<DeliveryError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TourStatus {
    #[default]
    Published,
    Draft,
}

impl TourStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TourStatus::Published => "published",
            TourStatus::Draft => "draft",
        }
    }
}

/// One day of a tour programme.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryDay {
    pub day: u32,
    pub title: String,
    /// HTML or plain text.
    pub details: String,
    /// Image keys, at most three.
    pub photos: Vec<String>,
}

/// A departure window with the seats still free.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DateSlot {
    /// `YYYY-MM-DD`
    pub start: String,
    /// `YYYY-MM-DD`
    pub end: String,
    pub seats_available: u32,
}

/// Tour content without identity and bookkeeping, as produced by payload
/// normalization.
///
/// Image fields hold storage keys, never URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TourContent {
    pub title: String,
    pub slug: String,
    pub duration_days: f64,
    #[serde(rename = "priceFromRUB")]
    pub price_from_rub: f64,
    pub activity: String,
    pub age_range: String,
    pub comfort: String,
    pub language: String,
    pub status: TourStatus,
    pub categories: Vec<String>,
    pub location: Vec<String>,
    pub hero_images: Vec<String>,
    pub gallery: Vec<String>,
    pub summary: String,
    pub description: String,
    pub itinerary: Vec<ItineraryDay>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub date_slots: Vec<DateSlot>,
    pub accommodation_text: String,
    pub accommodation_images: Vec<String>,
    pub map_image: String,
    pub payment_terms: String,
    pub cancellation_policy: String,
    pub important_info: String,
    pub faq: String,
}

impl TourContent {
    /// Every image key referenced anywhere in the record.
    pub fn image_keys(&self) -> Vec<String> {
        self.hero_images
            .iter()
            .chain(&self.gallery)
            .chain(&self.accommodation_images)
            .chain(std::iter::once(&self.map_image))
            .chain(self.itinerary.iter().flat_map(|d| d.photos.iter()))
            .filter(|k| !k.is_empty())
            .cloned()
            .collect()
    }

    /// Lower-cased text matched by catalog search.
    pub fn search_text(&self) -> String {
        [
            self.title.as_str(),
            self.summary.as_str(),
            &self.categories.join(" "),
            &self.location.join(" "),
        ]
        .join("\n")
        .to_lowercase()
    }
}

/// A catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tour {
    pub id: Uuid,
    #[serde(flatten)]
    pub content: TourContent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tour {
    /// A new, unsaved tour stamped with the current time.
    pub fn new(content: TourContent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            content,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One page of a catalog listing.
#[derive(Debug, Clone, PartialEq)]
pub struct TourPage {
    pub items: Vec<Tour>,
    /// Matches across all pages.
    pub total: u64,
}
