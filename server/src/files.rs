use anyhow::Result;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Outcome of removing a file that is expected to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    AlreadyMissing,
}

/// Save upload data under a fresh unique name, keeping the original extension.
/// Returns the stored file name and its full path.
pub async fn save_upload<P: AsRef<Path>>(
    dir: P,
    original_name: &str,
    data: Bytes,
) -> Result<(String, PathBuf)> {
    let filename = unique_name(original_name);
    fs::create_dir_all(dir.as_ref()).await?;
    let path = dir.as_ref().join(&filename);
    fs::write(&path, data).await?;
    Ok((filename, path))
}

/// Generate `<uuid>.<ext>` where the extension is taken from the client name
/// when it is a short alphanumeric token.
pub fn unique_name(original_name: &str) -> String {
    let ext = Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

/// Resolve a requested upload name to a path inside `dir`, rejecting anything
/// that is not a single plain path component.
pub fn upload_path<P: AsRef<Path>>(dir: P, filename: &str) -> Option<PathBuf> {
    if filename.is_empty()
        || filename.starts_with('.')
        || filename.contains(|c: char| c == '/' || c == '\\')
        || filename.contains("..")
    {
        return None;
    }
    Some(dir.as_ref().join(filename))
}

/// Delete a file; a file that is already gone is not an error.
pub async fn remove_file<P: AsRef<Path>>(path: P) -> std::io::Result<Removal> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(Removal::Removed),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Removal::AlreadyMissing),
        Err(e) => Err(e),
    }
}
