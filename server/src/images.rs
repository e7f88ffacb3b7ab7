pub use crate::model::{ImageRecord, ImageStatus};
use crate::db::{placeholders, uuid_col};
use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

const COLUMNS: &str = "id, filename, path, url, status, created_at";

fn row_to_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRecord> {
    let status: String = row.get(4)?;
    Ok(ImageRecord {
        id: uuid_col(row, 0)?,
        filename: row.get(1)?,
        path: row.get(2)?,
        url: row.get(3)?,
        status: status.parse().map_err(|e: anyhow::Error| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
        })?,
        created_at: row.get(5)?,
    })
}

/// Register a freshly uploaded image. New images always start `pending`.
pub fn insert_image(
    conn: &Connection,
    filename: &str,
    path: &str,
    url: &str,
    created_at: i64,
) -> Result<ImageRecord> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO images (id, filename, path, url, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            filename,
            path,
            url,
            ImageStatus::Pending.as_str(),
            created_at
        ],
    )?;
    Ok(ImageRecord {
        id,
        filename: filename.into(),
        path: path.into(),
        url: url.into(),
        status: ImageStatus::Pending,
        created_at,
    })
}

pub fn find_by_url(conn: &Connection, url: &str) -> Result<Option<ImageRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM images WHERE url = ?1"))?;
    Ok(stmt.query_row([url], row_to_image).optional()?)
}

/// Fetch the records for a set of URLs. Unknown URLs are skipped.
pub fn find_by_urls<'a, I>(conn: &Connection, urls: I) -> Result<Vec<ImageRecord>>
where
    I: IntoIterator<Item = &'a String>,
{
    let urls: Vec<&String> = urls.into_iter().collect();
    if urls.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {COLUMNS} FROM images WHERE url IN ({}) ORDER BY created_at, url",
        placeholders(1, urls.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let images = stmt
        .query_map(params_from_iter(urls), row_to_image)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

/// List registry entries, optionally restricted to one status.
pub fn list_images(conn: &Connection, status: Option<ImageStatus>) -> Result<Vec<ImageRecord>> {
    let images = match status {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM images WHERE status = ?1 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([status.as_str()], row_to_image)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM images ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map([], row_to_image)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(images)
}

/// Set `status` on every record whose URL is in `urls`, in one statement.
/// Records already in that status are not rewritten. Returns rows changed.
pub fn set_status_for_urls<'a, I>(conn: &Connection, urls: I, status: ImageStatus) -> Result<usize>
where
    I: IntoIterator<Item = &'a String>,
{
    let urls: Vec<&String> = urls.into_iter().collect();
    if urls.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "UPDATE images SET status = ?1 WHERE status <> ?1 AND url IN ({})",
        placeholders(2, urls.len())
    );
    let mut values: Vec<&str> = Vec::with_capacity(urls.len() + 1);
    values.push(status.as_str());
    values.extend(urls.iter().map(|u| u.as_str()));
    let changed = conn.execute(&sql, params_from_iter(values))?;
    Ok(changed)
}

/// Pending records created strictly before `cutoff`.
pub fn stale_pending(conn: &Connection, cutoff: i64) -> Result<Vec<ImageRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM images WHERE status = ?1 AND created_at < ?2 ORDER BY created_at"
    ))?;
    let images = stmt
        .query_map(params![ImageStatus::Pending.as_str(), cutoff], row_to_image)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

/// Remove a registry entry. Returns false when no such record existed.
pub fn delete_image(conn: &Connection, id: &Uuid) -> Result<bool> {
    let changed = conn.execute("DELETE FROM images WHERE id = ?1", [id.to_string()])?;
    Ok(changed > 0)
}
