pub use crate::model::User;
use crate::db::uuid_col;
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Role given to self-registered accounts.
pub const DEFAULT_ROLE: &str = "parent";

/// Role allowed to manage content, leads and accounts. The first account
/// registered on an empty database gets it.
pub const ADMIN_ROLE: &str = "admin";

static USERNAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap());

/// Usernames are 3-32 characters of letters, digits, `_`, `.` or `-`.
pub fn valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

const COLUMNS: &str =
    "id, username, password_hash, name, role, is_active, created_at, updated_at";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UserError {
    #[error("duplicate_user")]
    Duplicate,
}

/// Admin-editable profile fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub role: Option<String>,
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_col(row, 0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        name: row.get(3)?,
        role: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Insert an active user. Usernames are unique; a clash yields [`UserError::Duplicate`].
pub fn create_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    name: &str,
    role: &str,
) -> Result<User> {
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let res = conn.execute(
        &format!("INSERT INTO users ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)"),
        params![id.to_string(), username, password_hash, name, role, now],
    );
    match res {
        Ok(_) => Ok(User {
            id,
            username: username.into(),
            password_hash: password_hash.into(),
            name: name.into(),
            role: role.into(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }),
        Err(e) => {
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) {
                Err(UserError::Duplicate.into())
            } else {
                Err(e.into())
            }
        }
    }
}

pub fn find_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users WHERE username = ?1"))?;
    Ok(stmt.query_row([username], row_to_user).optional()?)
}

pub fn get_user(conn: &Connection, id: &Uuid) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users WHERE id = ?1"))?;
    Ok(stmt.query_row([id.to_string()], row_to_user).optional()?)
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM users ORDER BY created_at, username"))?;
    let users = stmt
        .query_map([], row_to_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn update_user(conn: &Connection, id: &Uuid, patch: &UserPatch) -> Result<Option<User>> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let changed = conn.execute(
        "UPDATE users SET name = COALESCE(?2, name), role = COALESCE(?3, role), updated_at = ?4 WHERE id = ?1",
        params![id.to_string(), patch.name, patch.role, now],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_user(conn, id)
}

/// Enable or disable login for an account.
pub fn set_active(conn: &Connection, id: &Uuid, active: bool) -> Result<bool> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let changed = conn.execute(
        "UPDATE users SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), active, now],
    )?;
    Ok(changed > 0)
}
