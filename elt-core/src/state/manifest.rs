//! Pull and push the dbt manifest.
//!
//! A pulled manifest lets dbt build only what changed (`state:modified+`) and
//! defer everything else to production. No manifest is a normal situation on
//! the first run; the caller falls back to a full build.

use super::object_store::ObjectStore;
use super::StateError;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Facts about a manifest that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInfo {
    pub path: PathBuf,
    /// BLAKE3 of the file contents.
    pub hash: String,
    pub node_count: usize,
    /// `metadata.generated_at`, when dbt recorded it.
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestState {
    Present(ManifestInfo),
    Missing,
}

impl ManifestState {
    pub fn is_present(&self) -> bool {
        matches!(self, ManifestState::Present(_))
    }
}

pub struct ManifestSync<'a> {
    store: &'a dyn ObjectStore,
    key: String,
}

impl<'a> ManifestSync<'a> {
    pub fn new(store: &'a dyn ObjectStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn location(&self) -> String {
        self.store.location(&self.key)
    }

    /// Fetch the stored manifest into `state_dir/manifest.json`.
    ///
    /// Any manifest already in `state_dir` is removed first so a stale local
    /// copy can never stand in for the remote one. A downloaded manifest that
    /// fails validation is renamed to `manifest.json.quarantined` and reported
    /// as missing.
    pub fn pull(&self, state_dir: &Path) -> Result<ManifestState, StateError> {
        fs::create_dir_all(state_dir).map_err(|e| StateError::io(state_dir, e))?;
        let dest = state_dir.join(MANIFEST_FILE);
        if dest.exists() {
            fs::remove_file(&dest).map_err(|e| StateError::io(&dest, e))?;
        }

        if !self.store.exists(&self.key)? {
            tracing::warn!(
                location = %self.location(),
                "no stored manifest, falling back to a full build"
            );
            return Ok(ManifestState::Missing);
        }

        self.store.download(&self.key, &dest)?;

        match inspect(&dest) {
            Ok(info) => {
                tracing::info!(
                    location = %self.location(),
                    nodes = info.node_count,
                    hash = %&info.hash[..12],
                    "manifest pulled"
                );
                Ok(ManifestState::Present(info))
            }
            Err(StateError::InvalidManifest { reason, .. }) => {
                let quarantine = dest.with_extension("json.quarantined");
                tracing::warn!(
                    reason = %reason,
                    quarantined = %quarantine.display(),
                    "stored manifest is unusable, falling back to a full build"
                );
                fs::rename(&dest, &quarantine).map_err(|e| StateError::io(&dest, e))?;
                Ok(ManifestState::Missing)
            }
            Err(other) => Err(other),
        }
    }

    /// Upload `target_dir/manifest.json` as the new stored manifest.
    ///
    /// The file must exist and validate; an invalid manifest is never
    /// uploaded over a good one.
    pub fn push(&self, target_dir: &Path) -> Result<ManifestInfo, StateError> {
        let src = target_dir.join(MANIFEST_FILE);
        if !src.is_file() {
            return Err(StateError::MissingArtifact(src));
        }

        let info = inspect(&src)?;
        self.store.upload(&src, &self.key)?;
        tracing::info!(
            location = %self.location(),
            nodes = info.node_count,
            hash = %&info.hash[..12],
            "manifest pushed"
        );
        Ok(info)
    }

    pub fn remote_exists(&self) -> Result<bool, StateError> {
        self.store.exists(&self.key)
    }
}

/// Validate a manifest file: a JSON object whose `nodes` is an object.
pub fn inspect(path: &Path) -> Result<ManifestInfo, StateError> {
    let bytes = fs::read(path).map_err(|e| StateError::io(path, e))?;
    let invalid = |reason: String| StateError::InvalidManifest {
        path: path.to_path_buf(),
        reason,
    };

    let doc: Value =
        serde_json::from_slice(&bytes).map_err(|e| invalid(format!("not JSON: {e}")))?;
    let nodes = doc
        .get("nodes")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("missing `nodes` object".into()))?;

    Ok(ManifestInfo {
        path: path.to_path_buf(),
        hash: blake3::hash(&bytes).to_hex().to_string(),
        node_count: nodes.len(),
        generated_at: doc
            .pointer("/metadata/generated_at")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LocalStore;

    const GOOD: &str = r#"{"metadata":{"generated_at":"2024-06-01T10:00:00Z"},"nodes":{"model.commodities.stg_commodity_prices":{}}}"#;

    #[test]
    fn inspect_reads_node_count_and_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, GOOD).unwrap();

        let info = inspect(&path).unwrap();
        assert_eq!(info.node_count, 1);
        assert_eq!(info.generated_at.as_deref(), Some("2024-06-01T10:00:00Z"));
        assert_eq!(info.hash.len(), 64);
    }

    #[test]
    fn inspect_rejects_non_manifest_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, r#"{"nodes": []}"#).unwrap();
        assert!(matches!(
            inspect(&path),
            Err(StateError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn pull_missing_clears_stale_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("bucket"));
        let state_dir = dir.path().join("state");
        fs::create_dir_all(&state_dir).unwrap();
        fs::write(state_dir.join(MANIFEST_FILE), GOOD).unwrap();

        let sync = ManifestSync::new(&store, "dbt/manifest.json");
        assert_eq!(sync.pull(&state_dir).unwrap(), ManifestState::Missing);
        assert!(!state_dir.join(MANIFEST_FILE).exists());
    }

    #[test]
    fn push_without_build_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("bucket"));
        let sync = ManifestSync::new(&store, "dbt/manifest.json");

        assert!(matches!(
            sync.push(&dir.path().join("target")),
            Err(StateError::MissingArtifact(_))
        ));
        assert!(!sync.remote_exists().unwrap());
    }
}
