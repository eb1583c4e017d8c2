//! Object stores holding build state between CI runs.
//!
//! `S3CliStore` drives the `aws s3` CLI, which is what the CI runners already
//! have installed and authenticated. `LocalStore` maps keys onto a directory
//! for local runs and tests.

use super::StateError;
use crate::process::{CommandRunner, CommandSpec};
use std::fs;
use std::path::{Path, PathBuf};

/// Key/value blob storage for build state.
pub trait ObjectStore {
    /// Human-readable location of `key` (`s3://bucket/key`, a file path, ...).
    fn location(&self, key: &str) -> String;

    /// Whether an object exists at exactly `key`.
    fn exists(&self, key: &str) -> Result<bool, StateError>;

    /// Copy the object at `key` to `dest`, overwriting it.
    fn download(&self, key: &str, dest: &Path) -> Result<(), StateError>;

    /// Copy `src` to `key`, overwriting any previous object.
    fn upload(&self, src: &Path, key: &str) -> Result<(), StateError>;
}

/// S3 bucket accessed through `aws s3`.
pub struct S3CliStore<'a> {
    runner: &'a dyn CommandRunner,
    aws_bin: String,
    bucket: String,
}

impl<'a> S3CliStore<'a> {
    /// `aws_bin` is the AWS CLI executable; `bucket` is a bare bucket name.
    pub fn new(runner: &'a dyn CommandRunner, aws_bin: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            runner,
            aws_bin: aws_bin.into(),
            bucket: bucket.into(),
        }
    }

    fn s3(&self) -> CommandSpec {
        CommandSpec::new(&self.aws_bin).arg("s3")
    }
}

impl ObjectStore for S3CliStore<'_> {
    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key.trim_start_matches('/'))
    }

    /// `aws s3 ls` exits 1 with no output when nothing matches the prefix.
    /// A prefix match is not enough: the listing must name the exact object.
    fn exists(&self, key: &str) -> Result<bool, StateError> {
        let cmd = self.s3().arg("ls").arg(self.location(key)).captured();
        let out = self.runner.run(&cmd)?;

        if out.code == Some(1) && out.stderr.trim().is_empty() {
            return Ok(false);
        }
        let out = out.check(&cmd)?;

        let file_name = key.rsplit('/').next().unwrap_or(key);
        Ok(out
            .stdout
            .lines()
            .any(|line| line.split_whitespace().last() == Some(file_name)))
    }

    fn download(&self, key: &str, dest: &Path) -> Result<(), StateError> {
        let cmd = self
            .s3()
            .arg("cp")
            .arg(self.location(key))
            .arg(dest.display().to_string())
            .arg("--only-show-errors")
            .captured();
        self.runner.run(&cmd)?.check(&cmd)?;
        Ok(())
    }

    fn upload(&self, src: &Path, key: &str) -> Result<(), StateError> {
        let cmd = self
            .s3()
            .arg("cp")
            .arg(src.display().to_string())
            .args([self.location(key), "--only-show-errors".to_string()])
            .captured();
        self.runner.run(&cmd)?.check(&cmd)?;
        Ok(())
    }
}

/// Directory-backed store; keys become relative paths under the root.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Store objects under `root`, created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

impl ObjectStore for LocalStore {
    fn location(&self, key: &str) -> String {
        self.path(key).display().to_string()
    }

    fn exists(&self, key: &str) -> Result<bool, StateError> {
        Ok(self.path(key).is_file())
    }

    fn download(&self, key: &str, dest: &Path) -> Result<(), StateError> {
        let src = self.path(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        fs::copy(&src, dest).map_err(|e| StateError::io(&src, e))?;
        Ok(())
    }

    /// Written to a temp file and renamed so readers never see half an object.
    fn upload(&self, src: &Path, key: &str) -> Result<(), StateError> {
        let dest = self.path(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        let tmp = dest.with_extension("tmp");
        fs::copy(src, &tmp).map_err(|e| StateError::io(src, e))?;
        fs::rename(&tmp, &dest).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StateError::io(&dest, e)
        })?;
        Ok(())
    }
}
