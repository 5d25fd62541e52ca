//! Private scratch directories backing one daemon instance each.

use std::{
    io,
    path::{Path, PathBuf},
};

use uuid::Uuid;

pub const DEFAULT_PREFIX: &str = "centy-e2e-";

/// Creates a fresh, uniquely named directory under `root`.
pub async fn create(root: &Path, prefix: &str) -> io::Result<PathBuf> {
    let path = root.join(format!("{prefix}{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&path).await?;
    Ok(path)
}

/// Recursively removes `path`. A directory that is already gone is not an error.
pub async fn destroy(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
