pub use crate::model::Candidate;
use crate::db::uuid_col;
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

pub const STATUS_NEW: &str = "new";
pub const STATUS_DELETED: &str = "deleted";
pub const STATUS_RECOVERED: &str = "recovered";

const COLUMNS: &str =
    "id, student_name, gender, dob, parent_name, address, phone, status, created_at, updated_at";

/// Admission lead submitted from the public form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCandidate {
    pub student_name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub dob: String,
    #[serde(default)]
    pub parent_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CandidatePatch {
    pub student_name: Option<String>,
    pub gender: Option<String>,
    pub dob: Option<String>,
    pub parent_name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub status: Option<String>,
}

fn row_to_candidate(row: &rusqlite::Row<'_>) -> rusqlite::Result<Candidate> {
    Ok(Candidate {
        id: uuid_col(row, 0)?,
        student_name: row.get(1)?,
        gender: row.get(2)?,
        dob: row.get(3)?,
        parent_name: row.get(4)?,
        address: row.get(5)?,
        phone: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub fn create_candidate(conn: &Connection, new: NewCandidate) -> Result<Candidate> {
    if new.student_name.trim().is_empty() {
        return Err(anyhow!("student_name is required"));
    }
    let id = Uuid::new_v4();
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        &format!("INSERT INTO candidates ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)"),
        params![
            id.to_string(),
            new.student_name,
            new.gender,
            new.dob,
            new.parent_name,
            new.address,
            new.phone,
            STATUS_NEW,
            now
        ],
    )?;
    Ok(Candidate {
        id,
        student_name: new.student_name,
        gender: new.gender,
        dob: new.dob,
        parent_name: new.parent_name,
        address: new.address,
        phone: new.phone,
        status: STATUS_NEW.into(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_candidate(conn: &Connection, id: &Uuid) -> Result<Option<Candidate>> {
    let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM candidates WHERE id = ?1"))?;
    Ok(stmt.query_row([id.to_string()], row_to_candidate).optional()?)
}

/// List candidates newest first, optionally only those in `status`.
pub fn list_candidates(conn: &Connection, status: Option<&str>) -> Result<Vec<Candidate>> {
    let rows = match status {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM candidates WHERE status = ?1 ORDER BY created_at DESC, id"
            ))?;
            let rows = stmt
                .query_map([status], row_to_candidate)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM candidates ORDER BY created_at DESC, id"
            ))?;
            let rows = stmt
                .query_map([], row_to_candidate)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

pub fn update_candidate(
    conn: &Connection,
    id: &Uuid,
    patch: &CandidatePatch,
) -> Result<Option<Candidate>> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let changed = conn.execute(
        "UPDATE candidates SET \
           student_name = COALESCE(?2, student_name), \
           gender = COALESCE(?3, gender), \
           dob = COALESCE(?4, dob), \
           parent_name = COALESCE(?5, parent_name), \
           address = COALESCE(?6, address), \
           phone = COALESCE(?7, phone), \
           status = COALESCE(?8, status), \
           updated_at = ?9 \
         WHERE id = ?1",
        params![
            id.to_string(),
            patch.student_name,
            patch.gender,
            patch.dob,
            patch.parent_name,
            patch.address,
            patch.phone,
            patch.status,
            now
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    get_candidate(conn, id)
}

pub fn set_status(conn: &Connection, id: &Uuid, status: &str) -> Result<Option<Candidate>> {
    update_candidate(
        conn,
        id,
        &CandidatePatch {
            status: Some(status.into()),
            ..Default::default()
        },
    )
}
