//! Local directory tree holding the files of the selected run.
//!
//! One subdirectory per variable category. Contents are never trusted
//! across invocations: the resolver clears the subtrees it owns before
//! writing the files of a newly selected run.

use crate::target::RetrievalTarget;
use std::path::{Path, PathBuf};

/// Errors from local store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Suffix of files being written; renamed into place once complete.
const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: &str) -> PathBuf {
        self.root.join(category)
    }

    /// Empty the given category subtrees, creating any that are missing.
    pub async fn clear(&self, categories: &[&str]) -> Result<()> {
        for category in categories {
            let dir = self.category_dir(category);
            tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

            let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err(&dir))?;
            let mut removed = 0usize;
            while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(io_err(&path))?;
                if file_type.is_dir() {
                    tokio::fs::remove_dir_all(&path).await.map_err(io_err(&path))?;
                } else {
                    tokio::fs::remove_file(&path).await.map_err(io_err(&path))?;
                }
                removed += 1;
            }
            if removed > 0 {
                log::debug!("[Store] cleared {} entries from {}", removed, dir.display());
            }
        }
        Ok(())
    }

    /// Write a target's bytes to its deterministic path, replacing any previous file.
    pub async fn write(&self, target: &RetrievalTarget, bytes: &[u8]) -> Result<PathBuf> {
        let path = target.local_path(&self.root);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        if let Err(e) = tokio::fs::write(&partial, bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(io_err(&partial)(e));
        }
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(io_err(&path)(e));
        }
        Ok(path)
    }

    /// Files currently stored under a category, sorted by name.
    pub async fn list(&self, category: &str) -> Result<Vec<PathBuf>> {
        let dir = self.category_dir(category);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
            let path = entry.path();
            if entry.file_type().await.map_err(io_err(&path))?.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
