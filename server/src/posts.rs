pub use crate::model::Post;
use crate::db::uuid_col;
use crate::model::{POST_ACTIVE, POST_DELETED};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

const COLUMNS: &str =
    "id, title, content, header_image, category, author, status, created_at, updated_at";

/// Fields supplied when creating a post.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category: String,
    pub author: String,
    pub header_image: Option<String>,
}

/// Partial update; absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub author: Option<String>,
    pub header_image: Option<String>,
    pub status: Option<String>,
}

impl PostPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.category.is_none()
            && self.author.is_none()
            && self.header_image.is_none()
            && self.status.is_none()
    }
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: uuid_col(row, 0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        header_image: row.get(3)?,
        category: row.get(4)?,
        author: row.get(5)?,
        status: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub fn create_post(conn: &Connection, new: NewPost) -> Result<Post> {
    if new.title.trim().is_empty() || new.content.trim().is_empty() {
        return Err(anyhow!("missing_title_or_content"));
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO posts (id, title, content, header_image, category, author, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id.to_string(),
            new.title,
            new.content,
            new.header_image,
            new.category,
            new.author,
            POST_ACTIVE,
            now
        ],
    )?;
    Ok(Post {
        id,
        title: new.title,
        content: new.content,
        header_image: new.header_image,
        category: new.category,
        author: new.author,
        status: POST_ACTIVE.into(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_post(conn: &Connection, id: &Uuid) -> Result<Option<Post>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM posts WHERE id = ?1"))?;
    Ok(stmt.query_row([id.to_string()], row_to_post).optional()?)
}

/// Which posts a listing returns.
#[derive(Debug, Clone)]
pub enum PostFilter {
    All,
    Category(String),
    Status(String),
}

/// List posts, newest first.
pub fn list_posts(conn: &Connection, filter: &PostFilter) -> Result<Vec<Post>> {
    let (clause, arg) = match filter {
        PostFilter::All => ("", None),
        PostFilter::Category(c) => ("WHERE category = ?1", Some(c.as_str())),
        PostFilter::Status(s) => ("WHERE status = ?1", Some(s.as_str())),
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM posts {clause} ORDER BY created_at DESC, id"
    ))?;
    let rows = match arg {
        Some(arg) => stmt.query_map([arg], row_to_post)?.collect::<Result<Vec<_>, _>>()?,
        None => stmt.query_map([], row_to_post)?.collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

/// Most recent live post in a category.
pub fn latest_in_category(conn: &Connection, category: &str) -> Result<Option<Post>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM posts WHERE category = ?1 AND status <> ?2 ORDER BY created_at DESC, id LIMIT 1"
    ))?;
    Ok(stmt
        .query_row(params![category, POST_DELETED], row_to_post)
        .optional()?)
}

/// Apply a partial update and return the row as stored afterwards.
pub fn update_post(conn: &Connection, id: &Uuid, patch: &PostPatch) -> Result<Option<Post>> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let changed = conn.execute(
        "UPDATE posts SET \
           title = COALESCE(?2, title), \
           content = COALESCE(?3, content), \
           category = COALESCE(?4, category), \
           author = COALESCE(?5, author), \
           header_image = COALESCE(?6, header_image), \
           status = COALESCE(?7, status), \
           updated_at = ?8 \
         WHERE id = ?1",
        params![
            id.to_string(),
            patch.title,
            patch.content,
            patch.category,
            patch.author,
            patch.header_image,
            patch.status,
            now
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_post(conn, id)
}

/// Set the status column only. Returns the updated post.
pub fn set_status(conn: &Connection, id: &Uuid, status: &str) -> Result<Option<Post>> {
    update_post(
        conn,
        id,
        &PostPatch {
            status: Some(status.into()),
            ..Default::default()
        },
    )
}
