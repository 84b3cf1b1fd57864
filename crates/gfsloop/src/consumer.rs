//! Strategies that read the store after a cycle.
//!
//! Rendering and presentation live outside this crate. Each of them is a
//! `StoreConsumer` handed to the scheduler, which calls it once per cycle
//! after the resolver has finished writing.

use crate::resolver::FetchedRun;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Errors from store consumers.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A collaborator that consumes the files of the selected run.
#[async_trait]
pub trait StoreConsumer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Called after a run was fully written to the store.
    async fn consume(&self, run: &FetchedRun) -> Result<(), ConsumerError>;

    /// Called when no candidate run was usable and the store is empty.
    async fn on_no_run(&self) -> Result<(), ConsumerError> {
        Ok(())
    }
}

/// File name of the manifest written at the store root.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub run_date: String,
    pub cycle: String,
    pub steps: Vec<String>,
    /// Category → file names relative to the category directory.
    pub files: BTreeMap<String, Vec<String>>,
}

impl Manifest {
    pub fn from_run(run: &FetchedRun) -> Self {
        let mut files: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in &run.files {
            let name = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            files.entry(file.category.clone()).or_default().push(name);
        }
        Self {
            run_date: run.run.date_str(),
            cycle: run.run.cycle_str(),
            steps: run.steps.iter().map(|s| s.to_string()).collect(),
            files,
        }
    }
}

/// Writes a JSON listing of the stored run for presentation layers.
pub struct ManifestWriter {
    path: PathBuf,
}

impl ManifestWriter {
    pub fn new(store_root: &Path) -> Self {
        Self {
            path: store_root.join(MANIFEST_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StoreConsumer for ManifestWriter {
    fn name(&self) -> &str {
        "manifest"
    }

    async fn consume(&self, run: &FetchedRun) -> Result<(), ConsumerError> {
        let manifest = Manifest::from_run(run);
        let json = serde_json::to_vec_pretty(&manifest)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        log::info!("[Manifest] wrote {}", self.path.display());
        Ok(())
    }

    async fn on_no_run(&self) -> Result<(), ConsumerError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                log::info!("[Manifest] removed stale {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
