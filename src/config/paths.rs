//! Resolved store locations and temporary path allocation.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Absolute locations of the long-lived stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub new_data: PathBuf,
    pub master: PathBuf,
    pub temp: PathBuf,
    pub results: PathBuf,
}

impl StoragePaths {
    pub fn temp_paths(&self) -> TempPaths {
        TempPaths::new(&self.temp)
    }
}

/// Hands out working paths under a temp root.
///
/// Every call yields `<root>/<name>-<uuid>`, so a retried step never lands
/// on a path an earlier attempt used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempPaths {
    root: PathBuf,
}

impl TempPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fresh(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}-{}", Uuid::new_v4()))
    }
}
