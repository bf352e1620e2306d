//! Where check artifacts go.
//!
//! Artifacts are addressed by a list of path segments such as
//! `["independent", "3", "results.json"]`. The store decides what a path
//! means; [`FsStore`] maps it onto a directory tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::StoreError;

pub trait ArtifactStore: Send + Sync {
    fn write(&self, path: &[String], content: &[u8]) -> Result<(), StoreError>;
}

impl<S: ArtifactStore + ?Sized> ArtifactStore for Arc<S> {
    fn write(&self, path: &[String], content: &[u8]) -> Result<(), StoreError> {
        (**self).write(path, content)
    }
}

/// Writes artifacts as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file `path` refers to. Segments may not climb out of the root.
    pub fn resolve(&self, path: &[String]) -> Result<PathBuf, StoreError> {
        let mut file = self.root.clone();
        for segment in path {
            let bad = segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains(['/', '\\', '\0']);
            if bad {
                return Err(StoreError::InvalidSegment(segment.clone()));
            }
            file.push(segment);
        }
        Ok(file)
    }
}

impl ArtifactStore for FsStore {
    fn write(&self, path: &[String], content: &[u8]) -> Result<(), StoreError> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, content)?;
        Ok(())
    }
}
