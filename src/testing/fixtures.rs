//! Throwaway project directories for tests.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A temporary project root, removed on drop.
pub struct TestProject {
    temp_dir: TempDir,
}

impl TestProject {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.path().join("state")
    }

    /// Write `state/plan.md`.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_plan(&self, content: &str) {
        self.write("state/plan.md", content);
    }

    /// Write `.conductor/config.toml`.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write_config(&self, toml: &str) {
        self.write(".conductor/config.toml", toml);
    }

    /// Write a file relative to the project root, creating parents.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn write(&self, relative: &str, content: &str) {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&path, content).expect("Failed to write fixture file");
    }

    /// Read a file relative to the project root.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be read.
    #[must_use]
    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path().join(relative)).expect("Failed to read fixture file")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
