use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::{from_db_time, to_db_time, Database};
use crate::error::{Result, StoreError};
use crate::models::{Tour, TourContent, TourPage, TourStatus};

impl Database {
    pub fn insert_tour(&self, tour: &Tour) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tours (id, slug, status, search_text, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tour.id.to_string(),
                    tour.content.slug,
                    tour.content.status.as_str(),
                    tour.content.search_text(),
                    serde_json::to_string(&tour.content)?,
                    to_db_time(&tour.created_at),
                    to_db_time(&tour.updated_at),
                ],
            )
            .map_err(StoreError::from_query)?;
        Ok(())
    }

    /// Replace the content of an existing tour. `created_at` is kept.
    pub fn update_tour(&self, tour: &Tour) -> Result<()> {
        let affected = self
            .conn()
            .execute(
                "UPDATE tours
                 SET slug = ?2, status = ?3, search_text = ?4, body = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    tour.id.to_string(),
                    tour.content.slug,
                    tour.content.status.as_str(),
                    tour.content.search_text(),
                    serde_json::to_string(&tour.content)?,
                    to_db_time(&tour.updated_at),
                ],
            )
            .map_err(StoreError::from_query)?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn get_tour(&self, id: Uuid) -> Result<Tour> {
        let (body, id, created_at, updated_at) = self
            .conn()
            .query_row(
                "SELECT body, id, created_at, updated_at FROM tours WHERE id = ?1",
                params![id.to_string()],
                row_to_parts,
            )
            .map_err(StoreError::from_query)?;
        parts_to_tour(body, id, created_at, updated_at)
    }

    /// Whether `slug` is used by any tour other than `exclude`.
    pub fn slug_taken(&self, slug: &str, exclude: Option<Uuid>) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM tours WHERE slug = ?1 AND (?2 IS NULL OR id <> ?2) LIMIT 1",
                params![slug, exclude.map(|id| id.to_string())],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Published tours, newest first, optionally filtered by a
    /// case-insensitive substring of title, summary, categories or location.
    pub fn list_published_tours(
        &self,
        query: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<TourPage> {
        let needle = query
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        // SQLite reads a negative OFFSET as zero.
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let filter = "status = ?1 AND (?2 IS NULL OR instr(search_text, ?2) > 0)";

        let total: u64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM tours WHERE {filter}"),
            params![TourStatus::Published.as_str(), needle],
            |row| row.get::<_, i64>(0),
        )? as u64;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT body, id, created_at, updated_at FROM tours
             WHERE {filter}
             ORDER BY created_at DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![
                TourStatus::Published.as_str(),
                needle,
                limit,
                offset
            ],
            row_to_parts,
        )?;

        let mut items = Vec::new();
        for row in rows {
            let (body, id, created_at, updated_at) = row?;
            items.push(parts_to_tour(body, id, created_at, updated_at)?);
        }
        Ok(TourPage { items, total })
    }

    pub fn delete_tour(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM tours WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

type TourParts = (String, String, String, String);

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<TourParts> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn parts_to_tour(body: String, id: String, created_at: String, updated_at: String) -> Result<Tour> {
    let id = Uuid::parse_str(&id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let content: TourContent = serde_json::from_str(&body)?;
    Ok(Tour {
        id,
        content,
        created_at: from_db_time(2, &created_at)?,
        updated_at: from_db_time(3, &updated_at)?,
    })
}
