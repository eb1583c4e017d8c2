//! Build state carried between CI runs: the dbt manifest and where it is kept.

pub mod manifest;
pub mod object_store;

pub use manifest::{ManifestInfo, ManifestState, ManifestSync, MANIFEST_FILE};
pub use object_store::{LocalStore, ObjectStore, S3CliStore};

use crate::process::ProcessError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("no manifest at {0} (did the dbt build run?)")]
    MissingArtifact(PathBuf),

    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },
}

impl StateError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
