//! Tour catalog endpoints and the payload normalization behind them.
//!
//! Admin payloads are loose JSON: list fields may be arrays or
//! comma-separated strings, numbers may arrive as strings, and image fields
//! may hold public URLs. Everything is folded into a [`TourContent`] that
//! stores keys only.

use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tourbook_media::PublicUrlMapper;
use tourbook_store::{DateSlot, Database, ItineraryDay, Tour, TourContent, TourStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::{AdminSession, MaybeAdmin};
use crate::error::ServerError;

const DEFAULT_LANGUAGE: &str = "Русский";
const DEFAULT_PAGE_SIZE: u64 = 24;
const MAX_PAGE_SIZE: u64 = 100;
const MAX_DAY_PHOTOS: usize = 3;
const MAX_ACCOMMODATION_IMAGES: usize = 10;

// ─── Normalization ───

/// Scalar JSON as text; `null`, arrays and objects become empty.
pub(crate) fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_string(),
        _ => String::new(),
    }
}

fn to_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| text(Some(item)).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Numbers and numeric strings; anything else is `None`.
pub(crate) fn to_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn to_count(value: Option<&Value>) -> Option<u32> {
    to_number(value).map(|n| n.max(0.0).min(u32::MAX as f64) as u32)
}

fn to_keys<'a>(urls: &PublicUrlMapper, values: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| urls.to_key(v))
        .filter(|k| !k.is_empty())
        .collect()
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

fn normalize_itinerary(value: Option<&Value>, urls: &PublicUrlMapper) -> Vec<ItineraryDay> {
    match value {
        Some(Value::Array(days)) => days
            .iter()
            .enumerate()
            .map(|(i, day)| {
                let ordinal = i as u32 + 1;
                let title = text(day.get("title"));
                let photos = match day.get("photos") {
                    Some(Value::Array(photos)) => photos
                        .iter()
                        .map(|p| urls.to_key(&text(Some(p))))
                        .filter(|k| !k.is_empty())
                        .take(MAX_DAY_PHOTOS)
                        .collect(),
                    _ => Vec::new(),
                };
                ItineraryDay {
                    day: to_count(day.get("day")).unwrap_or(ordinal),
                    title: if title.is_empty() { format!("День {ordinal}") } else { title },
                    details: text(day.get("details")),
                    photos,
                }
            })
            .collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(i, line)| ItineraryDay {
                day: i as u32 + 1,
                title: line.to_string(),
                ..Default::default()
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn normalize_date_slots(value: Option<&Value>) -> Vec<DateSlot> {
    let Some(Value::Array(slots)) = value else {
        return Vec::new();
    };
    let mut slots: Vec<DateSlot> = slots
        .iter()
        .filter_map(|slot| {
            let start = text(slot.get("start")).trim().to_string();
            let end = text(slot.get("end")).trim().to_string();
            if start.is_empty() || end.is_empty() {
                return None;
            }
            Some(DateSlot {
                start,
                end,
                seats_available: to_count(slot.get("seatsAvailable")).unwrap_or(0),
            })
        })
        .collect();
    slots.sort_by(|a, b| a.start.cmp(&b.start));
    slots
}

/// Fold an admin payload into tour content. Writes always publish.
pub fn normalize_payload(body: &Value, urls: &PublicUrlMapper) -> TourContent {
    let field = |name: &str| body.get(name);
    let language = text(field("language")).trim().to_string();
    let map_image = text(field("mapImage"));

    TourContent {
        title: text(field("title")).trim().to_string(),
        slug: text(field("slug")).trim().to_string(),
        duration_days: to_number(field("durationDays")).unwrap_or(0.0),
        price_from_rub: to_number(field("priceFromRUB")).unwrap_or(0.0),
        activity: text(field("activity")),
        age_range: text(field("ageRange")),
        comfort: text(field("comfort")),
        language: if language.is_empty() { DEFAULT_LANGUAGE.to_string() } else { language },
        status: TourStatus::Published,
        categories: to_list(field("categories")),
        location: to_list(field("location")),
        hero_images: dedup(to_keys(urls, &to_list(field("heroImages")))),
        gallery: dedup(to_keys(urls, &to_list(field("gallery")))),
        summary: text(field("summary")),
        description: text(field("description")),
        itinerary: normalize_itinerary(field("itinerary"), urls),
        includes: to_list(field("includes")),
        excludes: to_list(field("excludes")),
        date_slots: normalize_date_slots(field("dateSlots")),
        accommodation_text: text(field("accommodationText")),
        accommodation_images: to_keys(urls, &to_list(field("accommodationImages")))
            .into_iter()
            .take(MAX_ACCOMMODATION_IMAGES)
            .collect(),
        map_image: if map_image.is_empty() { String::new() } else { urls.to_key(&map_image) },
        payment_terms: text(field("paymentTerms")),
        cancellation_policy: text(field("cancellationPolicy")),
        important_info: text(field("importantInfo")),
        faq: text(field("faq")),
    }
}

// ─── Slugs ───

fn transliterate(ch: char) -> Option<&'static str> {
    Some(match ch {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' | 'ё' | 'э' => "e",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' | 'ы' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "h",
        'ц' => "c",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ъ' | 'ь' => "",
        'ю' => "yu",
        'я' => "ya",
        _ => return None,
    })
}

/// Lower-case, transliterate Cyrillic, collapse everything that is not
/// `[a-z0-9]` into single dashes. Never empty.
pub fn slugify(input: &str) -> String {
    fn emit(c: char, slug: &mut String, gap: &mut bool) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if *gap && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c);
            *gap = false;
        } else {
            *gap = true;
        }
    }

    let mut slug = String::with_capacity(input.len());
    let mut gap = false;

    for ch in input.to_lowercase().chars() {
        match transliterate(ch) {
            Some(latin) => latin.chars().for_each(|c| emit(c, &mut slug, &mut gap)),
            None => emit(ch, &mut slug, &mut gap),
        }
    }

    if slug.is_empty() {
        "tour".to_string()
    } else {
        slug
    }
}

/// First of `slug`, `slug-2`, `slug-3`, ... not used by a tour other than
/// `exclude`.
pub fn unique_slug(db: &Database, base: &str, exclude: Option<Uuid>) -> tourbook_store::Result<String> {
    let root = slugify(base);
    let mut candidate = root.clone();
    let mut n = 1;
    while db.slug_taken(&candidate, exclude)? {
        n += 1;
        candidate = format!("{root}-{n}");
    }
    Ok(candidate)
}

// ─── URL expansion ───

fn wants_urls(expand: Option<&str>) -> bool {
    expand
        .unwrap_or("")
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case("urls"))
}

/// Replace every stored key of `tour` with its public URL.
pub fn expand_urls(mut tour: Tour, urls: &PublicUrlMapper) -> Tour {
    let content = &mut tour.content;
    let map_all = |keys: &mut Vec<String>| keys.iter_mut().for_each(|k| *k = urls.to_url(k));

    map_all(&mut content.hero_images);
    map_all(&mut content.gallery);
    map_all(&mut content.accommodation_images);
    content.itinerary.iter_mut().for_each(|day| map_all(&mut day.photos));
    content.map_image = urls.to_url(&content.map_image);
    tour
}

// ─── Handlers ───

fn parse_positive(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(default)
}

/// Unknown and malformed ids are both "not found".
fn parse_id(raw: &str) -> Result<Uuid, ServerError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ServerError::not_found())
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    q: Option<String>,
    page: Option<String>,
    limit: Option<String>,
    expand: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpandParams {
    expand: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TourList {
    pub items: Vec<Tour>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

pub async fn list_tours(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<TourList>, ServerError> {
    let page = parse_positive(params.page.as_deref(), 1);
    let limit = parse_positive(params.limit.as_deref(), DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(limit);

    let result = state
        .db
        .lock()
        .await
        .list_published_tours(params.q.as_deref(), offset, limit)?;

    let items = if wants_urls(params.expand.as_deref()) {
        result.items.into_iter().map(|t| expand_urls(t, &state.urls)).collect()
    } else {
        result.items
    };

    Ok(Json(TourList {
        items,
        page,
        limit,
        total: result.total,
        pages: result.total.div_ceil(limit),
    }))
}

pub async fn get_tour(
    State(state): State<AppState>,
    MaybeAdmin(is_admin): MaybeAdmin,
    Path(id): Path<String>,
    Query(params): Query<ExpandParams>,
) -> Result<Json<Tour>, ServerError> {
    let id = parse_id(&id)?;
    let tour = state.db.lock().await.get_tour(id)?;

    if tour.content.status == TourStatus::Draft && !is_admin {
        return Err(ServerError::not_found());
    }

    if wants_urls(params.expand.as_deref()) {
        Ok(Json(expand_urls(tour, &state.urls)))
    } else {
        Ok(Json(tour))
    }
}

pub async fn create_tour(
    State(state): State<AppState>,
    _admin: AdminSession,
    Json(body): Json<Value>,
) -> Result<Json<Tour>, ServerError> {
    let mut content = normalize_payload(&body, &state.urls);
    if content.title.is_empty() {
        return Err(ServerError::BadRequest("title is required".to_string()));
    }

    let db = state.db.lock().await;
    let base = if content.slug.is_empty() { content.title.clone() } else { content.slug.clone() };
    content.slug = unique_slug(&db, &base, None)?;

    let tour = Tour::new(content);
    db.insert_tour(&tour)?;
    info!(id = %tour.id, slug = %tour.content.slug, "Tour created");
    Ok(Json(db.get_tour(tour.id)?))
}

pub async fn update_tour(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Tour>, ServerError> {
    let id = parse_id(&id)?;
    let mut content = normalize_payload(&body, &state.urls);
    if content.title.is_empty() {
        return Err(ServerError::BadRequest("title is required".to_string()));
    }

    let db = state.db.lock().await;
    let existing = db.get_tour(id)?;
    let base = if content.slug.is_empty() { content.title.clone() } else { content.slug.clone() };
    content.slug = unique_slug(&db, &base, Some(id))?;

    let tour = Tour {
        content,
        updated_at: chrono::Utc::now(),
        ..existing
    };
    db.update_tour(&tour)?;
    info!(id = %tour.id, slug = %tour.content.slug, "Tour updated");
    Ok(Json(db.get_tour(id)?))
}

pub async fn delete_tour(
    State(state): State<AppState>,
    _admin: AdminSession,
    Path(id): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let id = parse_id(&id)?;
    let tour = state.db.lock().await.get_tour(id)?;

    let keys = dedup(to_keys(&state.urls, &tour.content.image_keys()));
    if !keys.is_empty() {
        match state.objects.delete_many(&keys).await {
            Ok(deleted) => info!(id = %id, deleted, "Deleted tour images"),
            Err(e) => warn!(id = %id, error = %e, "Failed to delete tour images"),
        }
    }

    if !state.db.lock().await.delete_tour(id)? {
        return Err(ServerError::not_found());
    }
    info!(id = %id, "Tour deleted");
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn urls() -> PublicUrlMapper {
        PublicUrlMapper::new("http://localhost:5174/uploads")
            .with_bucket("storage.yandexcloud.net", "tours-bucket")
    }

    #[test]
    fn slugify_transliterates_and_collapses() {
        assert_eq!(slugify("Алтай: Горы и Озёра!"), "altay-gory-i-ozera");
        assert_eq!(slugify("  --Hello,   World--  "), "hello-world");
        assert_eq!(slugify("Подъезд 5"), "podezd-5");
        assert_eq!(slugify("Café"), "caf");
        assert_eq!(slugify("!!!"), "tour");
        assert_eq!(slugify(""), "tour");
    }

    #[test]
    fn unique_slug_suffixes_and_excludes_self() {
        let db = Database::open_in_memory().unwrap();
        let first = Tour::new(TourContent {
            title: "Байкал".into(),
            slug: "baykal".into(),
            ..Default::default()
        });
        db.insert_tour(&first).unwrap();

        assert_eq!(unique_slug(&db, "Байкал", None).unwrap(), "baykal-2");
        assert_eq!(unique_slug(&db, "Байкал", Some(first.id)).unwrap(), "baykal");

        let second = Tour::new(TourContent {
            title: "Байкал".into(),
            slug: "baykal-2".into(),
            ..Default::default()
        });
        db.insert_tour(&second).unwrap();
        assert_eq!(unique_slug(&db, "baykal", None).unwrap(), "baykal-3");
    }

    #[test]
    fn normalize_fills_defaults() {
        let content = normalize_payload(&json!({ "title": "  Kamchatka  " }), &urls());
        assert_eq!(content.title, "Kamchatka");
        assert_eq!(content.language, "Русский");
        assert_eq!(content.status, TourStatus::Published);
        assert_eq!(content.duration_days, 0.0);
        assert!(content.categories.is_empty());
        assert!(content.itinerary.is_empty());
        assert_eq!(content.map_image, "");
    }

    #[test]
    fn normalize_coerces_loose_types() {
        let body = json!({
            "title": "Tour",
            "status": "draft",
            "durationDays": "5",
            "priceFromRUB": 45000,
            "categories": "горы, треккинг , ,",
            "location": ["Алтай", 7, null],
            "includes": ["питание"],
        });
        let content = normalize_payload(&body, &urls());
        assert_eq!(content.status, TourStatus::Published);
        assert_eq!(content.duration_days, 5.0);
        assert_eq!(content.price_from_rub, 45000.0);
        assert_eq!(content.categories, vec!["горы", "треккинг"]);
        assert_eq!(content.location, vec!["Алтай", "7"]);
        assert_eq!(content.includes, vec!["питание"]);
    }

    #[test]
    fn normalize_maps_images_to_keys() {
        let body = json!({
            "title": "Tour",
            "heroImages": [
                "http://localhost:5174/uploads/tours/2025/01/a.webp",
                "tours/2025/01/a.webp",
                "https://storage.yandexcloud.net/tours-bucket/tours/2025/01/b.webp",
            ],
            "gallery": "/g/1.webp,g/1.webp",
            "accommodationImages": (0..12).map(|i| format!("acc/{i}.webp")).collect::<Vec<_>>(),
            "mapImage": "https://tours-bucket.storage.yandexcloud.net/maps/m.webp",
        });
        let content = normalize_payload(&body, &urls());
        assert_eq!(content.hero_images, vec!["tours/2025/01/a.webp", "tours/2025/01/b.webp"]);
        assert_eq!(content.gallery, vec!["g/1.webp"]);
        assert_eq!(content.accommodation_images.len(), 10);
        assert_eq!(content.map_image, "maps/m.webp");
    }

    #[test]
    fn itinerary_from_objects_and_text() {
        let body = json!({
            "title": "Tour",
            "itinerary": [
                { "title": "Arrival", "details": "<p>Hotel</p>", "photos": ["a", "b", "c", "d"] },
                { "day": "4" },
            ],
        });
        let days = normalize_payload(&body, &urls()).itinerary;
        assert_eq!(days[0].day, 1);
        assert_eq!(days[0].title, "Arrival");
        assert_eq!(days[0].photos, vec!["a", "b", "c"]);
        assert_eq!(days[1].day, 4);
        assert_eq!(days[1].title, "День 2");

        let body = json!({ "title": "Tour", "itinerary": "Прилёт\n\n  Озеро  \nВылет" });
        let days = normalize_payload(&body, &urls()).itinerary;
        let titles: Vec<_> = days.iter().map(|d| (d.day, d.title.as_str())).collect();
        assert_eq!(titles, vec![(1, "Прилёт"), (2, "Озеро"), (3, "Вылет")]);
    }

    #[test]
    fn date_slots_need_both_ends_and_are_sorted() {
        let body = json!({
            "title": "Tour",
            "dateSlots": [
                { "start": "2025-08-01", "end": "2025-08-07", "seatsAvailable": "6" },
                { "start": "2025-06-01", "end": "2025-06-07" },
                { "start": "2025-07-01" },
                { "start": "2025-05-01", "end": "2025-05-03", "seatsAvailable": "" },
            ],
        });
        let slots = normalize_payload(&body, &urls()).date_slots;
        let starts: Vec<_> = slots.iter().map(|s| s.start.as_str()).collect();
        assert_eq!(starts, vec!["2025-05-01", "2025-06-01", "2025-08-01"]);
        assert_eq!(slots[0].seats_available, 0);
        assert_eq!(slots[1].seats_available, 0);
        assert_eq!(slots[2].seats_available, 6);
    }

    #[test]
    fn expand_urls_covers_every_image_field() {
        let tour = Tour::new(TourContent {
            title: "T".into(),
            hero_images: vec!["h.webp".into()],
            gallery: vec!["https://cdn.example.org/g.webp".into()],
            accommodation_images: vec!["a.webp".into()],
            map_image: "m.webp".into(),
            itinerary: vec![ItineraryDay {
                day: 1,
                photos: vec!["d.webp".into()],
                ..Default::default()
            }],
            ..Default::default()
        });
        let expanded = expand_urls(tour, &urls()).content;
        assert_eq!(expanded.hero_images, vec!["http://localhost:5174/uploads/h.webp"]);
        assert_eq!(expanded.gallery, vec!["https://cdn.example.org/g.webp"]);
        assert_eq!(expanded.accommodation_images, vec!["http://localhost:5174/uploads/a.webp"]);
        assert_eq!(expanded.map_image, "http://localhost:5174/uploads/m.webp");
        assert_eq!(expanded.itinerary[0].photos, vec!["http://localhost:5174/uploads/d.webp"]);
    }

    #[test]
    fn paging_params() {
        assert_eq!(parse_positive(None, 24), 24);
        assert_eq!(parse_positive(Some("0"), 24), 24);
        assert_eq!(parse_positive(Some("-3"), 1), 1);
        assert_eq!(parse_positive(Some("7"), 1), 7);
        assert!(wants_urls(Some("foo, URLS")));
        assert!(!wants_urls(Some("url")));
    }
}
