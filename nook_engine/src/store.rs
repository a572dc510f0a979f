use std::fs;
use std::path::{Path, PathBuf};

use nook_model::Project;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read project from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse project{}: {source}", describe_origin(.path))]
    Parse {
        path: Option<PathBuf>,
        #[source]
        source: serde_json::Error,
    },
}

fn describe_origin(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|path| format!(" {}", path.display()))
        .unwrap_or_default()
}

/// Present project data plus the snapshot restart returns to.
///
/// The backup is captured once when the store is created and is never
/// touched by commits, so a restart always lands on the loaded state.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    present: Project,
    backup: Project,
    commits: u64,
}

impl ProjectStore {
    pub fn new(project: Project) -> Self {
        ProjectStore {
            backup: project.clone(),
            present: project,
            commits: 0,
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, StoreError> {
        let project = serde_json::from_str(text)
            .map_err(|source| StoreError::Parse { path: None, source })?;
        Ok(Self::new(project))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let text = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let project = serde_json::from_str(&text).map_err(|source| StoreError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        Ok(Self::new(project))
    }

    pub fn present(&self) -> &Project {
        &self.present
    }

    pub fn backup(&self) -> &Project {
        &self.backup
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Applies a mutation to the present project.
    pub fn commit<R>(&mut self, mutation: impl FnOnce(&mut Project) -> R) -> R {
        self.commits = self.commits.saturating_add(1);
        mutation(&mut self.present)
    }

    /// Replaces the present project with the backup snapshot.
    pub fn restore(&mut self) -> &Project {
        self.present = self.backup.clone();
        &self.present
    }
}
