use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use time::OffsetDateTime;

const MAIN_KEY: &str = "main";

/// The landing page document, or `None` before it was first saved.
pub fn get_content(conn: &Connection) -> Result<Option<Map<String, Value>>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT content FROM landing_page WHERE key = ?1",
            [MAIN_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Replace the landing page document, creating it on first use.
pub fn put_content(conn: &Connection, content: &Map<String, Value>) -> Result<()> {
    if content.is_empty() {
        return Err(anyhow!("no update data provided"));
    }
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO landing_page (key, content, updated_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(key) DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
        params![MAIN_KEY, serde_json::to_string(content)?, now],
    )?;
    Ok(())
}
