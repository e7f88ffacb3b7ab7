pub use crate::model::Comment;
use crate::db::uuid_col;
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub post_id: String,
    #[serde(default)]
    pub author_id: Option<String>,
    pub author_name: String,
    pub content: String,
}

fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: uuid_col(row, 0)?,
        post_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        content: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub fn create_comment(conn: &Connection, new: NewComment) -> Result<Comment> {
    if new.post_id.trim().is_empty()
        || new.author_name.trim().is_empty()
        || new.content.trim().is_empty()
    {
        return Err(anyhow!("postId, authorName and content are required"));
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO comments (id, post_id, author_id, author_name, content, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, 'new', ?6, ?6)",
        params![
            id.to_string(),
            new.post_id,
            new.author_id,
            new.author_name,
            new.content,
            now
        ],
    )?;
    Ok(Comment {
        id,
        post_id: new.post_id,
        author_id: new.author_id,
        author_name: new.author_name,
        content: new.content,
        status: "new".into(),
        created_at: now,
        updated_at: now,
    })
}

/// Visible comments on a post, newest first.
pub fn list_for_post(conn: &Connection, post_id: &str) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, post_id, author_id, author_name, content, status, created_at, updated_at FROM comments WHERE post_id = ?1 AND status <> 'deleted' ORDER BY created_at DESC, id",
    )?;
    let comments = stmt
        .query_map([post_id], row_to_comment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

/// Replace a comment's text. Returns false if the comment does not exist.
pub fn update_content(conn: &Connection, id: &Uuid, content: &str) -> Result<bool> {
    if content.trim().is_empty() {
        return Err(anyhow!("content is required"));
    }
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let changed = conn.execute(
        "UPDATE comments SET content = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), content, now],
    )?;
    Ok(changed > 0)
}

pub fn soft_delete(conn: &Connection, id: &Uuid) -> Result<bool> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let changed = conn.execute(
        "UPDATE comments SET status = 'deleted', updated_at = ?2 WHERE id = ?1",
        params![id.to_string(), now],
    )?;
    Ok(changed > 0)
}
