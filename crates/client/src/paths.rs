//! Cross-platform application paths

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the per-user data directory without touching the filesystem.
    pub fn resolve() -> io::Result<Self> {
        let base = dirs::data_dir().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "could not determine data directory")
        })?;
        Ok(Self::at(base.join("depoview")))
    }

    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Create the archive and report directories.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(self.archive_dir())?;
        fs::create_dir_all(self.report_dir())
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archives")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    pub fn archive_file(&self, job_name: &str) -> PathBuf {
        self.archive_dir().join(format!("{job_name}.dtrj"))
    }

    pub fn report_file(&self, job_name: &str) -> PathBuf {
        self.report_dir().join(format!("{job_name}.heightmap.json"))
    }
}
