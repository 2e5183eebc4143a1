//! Context retrieval: external search command, then a local file scan.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ContextSource;
use crate::process::{run_with_timeout, CommandSpec};

/// Context retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Search command; the query is appended as the last argument.
    pub command: Vec<String>,
    pub command_timeout_secs: u64,
    /// Glob patterns for files the scan may return.
    pub include: Vec<String>,
    pub max_files: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            command_timeout_secs: 10,
            include: ["py", "js", "ts", "rs", "md", "txt", "json", "yaml", "yml", "toml"]
                .iter()
                .map(|ext| format!("**/*.{ext}"))
                .collect(),
            max_files: 5,
        }
    }
}

/// Tries the search command, then scans the project for files containing the query.
#[derive(Debug, Clone)]
pub struct ScanContextSource {
    root: PathBuf,
    config: ContextConfig,
    include: GlobSet,
}

impl ScanContextSource {
    /// # Errors
    ///
    /// Fails if an include pattern is not a valid glob.
    pub fn new(root: impl AsRef<Path>, config: ContextConfig) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.include {
            builder.add(
                Glob::new(pattern).with_context(|| format!("invalid context glob {pattern}"))?,
            );
        }
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            include: builder.build()?,
            config,
        })
    }

    async fn search_command(&self, query: &str) -> Option<String> {
        let (program, rest) = self.config.command.split_first()?;
        let mut args = rest.to_vec();
        args.push(query.to_string());

        match run_with_timeout(
            CommandSpec::new(program, &args).current_dir(&self.root),
            Duration::from_secs(self.config.command_timeout_secs),
        )
        .await
        {
            Ok(out) if out.success() && !out.stdout.trim().is_empty() => Some(out.stdout),
            Ok(out) => {
                warn!("context search exited {:?}, using file scan", out.code);
                None
            }
            Err(e) => {
                warn!("context search failed ({e}), using file scan");
                None
            }
        }
    }

    /// Files under the root whose contents mention `query`, case-insensitively.
    pub fn scan(&self, query: &str) -> String {
        let needle = query.to_lowercase();
        let mut sections = Vec::new();

        for entry in WalkBuilder::new(&self.root).build().filter_map(|e| e.ok()) {
            if sections.len() >= self.config.max_files {
                break;
            }
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            if !self.include.is_match(relative) {
                continue;
            }
            // Binary and unreadable files are skipped.
            let Ok(content) = std::fs::read_to_string(path) else {
                continue;
            };
            if needle.is_empty() || content.to_lowercase().contains(&needle) {
                sections.push(format!(
                    "--- FILE: {} ---\n{}\n",
                    relative.to_string_lossy().replace('\\', "/"),
                    content
                ));
            }
        }

        debug!("context scan matched {} file(s)", sections.len());
        sections.join("\n")
    }
}

#[async_trait]
impl ContextSource for ScanContextSource {
    async fn fetch(&self, query: &str) -> Result<String> {
        if let Some(found) = self.search_command(query).await {
            return Ok(found);
        }
        Ok(self.scan(query))
    }
}
