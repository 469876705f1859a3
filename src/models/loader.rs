//! Artifact persistence and lazy, memoized loading

use crate::error::{Error, Result};
use crate::features::FeatureState;
use crate::models::ensemble::ModelEnsemble;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Everything inference needs from a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBundle {
    pub models: ModelEnsemble,
    pub feature_state: FeatureState,
    pub created_at: DateTime<Utc>,
}

impl ArtifactBundle {
    pub fn new(models: ModelEnsemble, feature_state: FeatureState) -> Self {
        Self {
            models,
            feature_state,
            created_at: Utc::now(),
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(path, self)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path)
    }
}

/// Serialize `value` as pretty JSON, creating parent directories.
pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    info!(path = %path.display(), "Wrote artifact");
    Ok(())
}

/// Read a JSON artifact; an absent file is [`Error::MissingArtifact`].
pub fn read_json<P: AsRef<Path>, T: DeserializeOwned>(path: P) -> Result<T> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::MissingArtifact {
            path: path.to_path_buf(),
        },
        _ => Error::Io(e),
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// A JSON artifact read from disk on first use and shared afterwards.
///
/// A failed load is not memoized; the next call retries, so an artifact
/// written after startup is picked up.
#[derive(Debug)]
pub struct LazyArtifact<T> {
    path: PathBuf,
    cell: OnceCell<Arc<T>>,
}

impl<T: DeserializeOwned + Send + Sync + 'static> LazyArtifact<T> {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            cell: OnceCell::new(),
        }
    }

    /// Already-loaded artifact; the path is kept for logging only.
    pub fn preloaded<P: Into<PathBuf>>(path: P, value: T) -> Self {
        Self {
            path: path.into(),
            cell: OnceCell::new_with(Some(Arc::new(value))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<Arc<T>> {
        let value = self
            .cell
            .get_or_try_init(|| async {
                let path = self.path.clone();
                let value = tokio::task::spawn_blocking(move || read_json::<_, T>(path))
                    .await
                    .map_err(|e| Error::Internal(format!("artifact loader panicked: {}", e)))??;
                info!(path = %self.path.display(), "Loaded artifact");
                Ok::<_, Error>(Arc::new(value))
            })
            .await?;
        Ok(Arc::clone(value))
    }
}
