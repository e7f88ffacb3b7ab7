use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of an uploaded image.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Pending,
    Used,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Used => "used",
        }
    }
}

impl fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ImageStatus::Pending),
            "used" => Ok(ImageStatus::Used),
            other => Err(anyhow::anyhow!("unknown image status: {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: Uuid,
    pub filename: String,
    pub path: String,
    pub url: String,
    pub status: ImageStatus,
    pub created_at: i64,
}

pub const POST_ACTIVE: &str = "active";
pub const POST_DELETED: &str = "deleted";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub header_image: Option<String>,
    pub category: String,
    pub author: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A post together with the registry entries its content references.
#[derive(Debug, Serialize, Clone)]
pub struct PostDetail {
    pub post: Post,
    pub images: Vec<ImageRecord>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: String,
    pub author_id: Option<String>,
    pub author_name: String,
    pub content: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: Uuid,
    pub student_name: String,
    pub gender: String,
    pub dob: String,
    pub parent_name: String,
    pub address: String,
    pub phone: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}
