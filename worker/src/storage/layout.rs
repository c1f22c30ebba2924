//! Run directory layout

use std::path::{Component, Path, PathBuf};

use crate::errors::WorkerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// File name of the generated plan inside a run directory
pub const PLAYBOOK_NAME: &str = "main.yaml";

/// Root of all per-job run directories
#[derive(Debug, Clone)]
pub struct RunsLayout {
    /// Base directory for all runs
    pub base_dir: PathBuf,
}

impl RunsLayout {
    /// Create a new runs layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Resolve `<base>/<user_id>/<job_id>`.
    ///
    /// Both ids must be a single plain path segment.
    pub fn run_dir(&self, user_id: &str, job_id: &str) -> Result<RunDir, WorkerError> {
        check_segment("userId", user_id)?;
        check_segment("jobId", job_id)?;
        Ok(RunDir {
            dir: Dir::new(self.base_dir.join(user_id).join(job_id)),
        })
    }

    /// Create the base directory
    pub async fn setup(&self) -> Result<(), WorkerError> {
        Dir::new(&self.base_dir).create().await
    }
}

impl Default for RunsLayout {
    fn default() -> Self {
        Self::new("runs")
    }
}

fn check_segment(field: &str, value: &str) -> Result<(), WorkerError> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(WorkerError::ValidationError(format!(
            "{} is not usable as a directory name: {:?}",
            field, value
        ))),
    }
}

/// Working directory of one job
#[derive(Debug, Clone)]
pub struct RunDir {
    dir: Dir,
}

impl RunDir {
    /// Get the directory path
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create the run directory
    pub async fn create(&self) -> Result<(), WorkerError> {
        self.dir.create().await
    }

    /// Generated plan
    pub fn playbook_file(&self) -> File {
        self.dir.file(PLAYBOOK_NAME)
    }

    /// Generated inventory
    pub fn inventory_file(&self) -> File {
        self.dir.subdir("inventory").file("hosts")
    }

    /// Files downloaded by role handlers
    pub fn overrides_dir(&self) -> Dir {
        self.dir.subdir("overrides")
    }

    /// Private key of one host/credential pair
    pub fn ssh_key_file(&self, host_id: i64, credential_id: i64) -> File {
        self.dir.file(&format!("ssh_key_{}_{}", host_id, credential_id))
    }
}
