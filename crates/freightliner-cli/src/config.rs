//! `.freightliner.toml` configuration loading. Configuration loading is a CLI
//! concern, kept out of the core replication engine entirely.
//!
//! Every field is optional; the file's absence is not an error — it just
//! means the run uses the engine's built-in [`ReplicationOptions::default`].
//! CLI flags are layered on top of whatever the file provides and always
//! win, since the CLI is a thin wrapper that delegates everything else to
//! the core engine.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use freightliner_types::ReplicationOptions;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = ".freightliner.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub replication: ReplicationFileConfig,
    #[serde(default)]
    pub checkpoint: CheckpointFileConfig,
    #[serde(default)]
    pub retry: RetryFileConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationFileConfig {
    pub workers: Option<usize>,
    pub max_concurrent_transfers: Option<usize>,
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub allowed_types: Vec<String>,
    #[serde(default)]
    pub denied_types: Vec<String>,
    pub include_referrers: Option<bool>,
    pub include_signatures: Option<bool>,
    pub include_sboms: Option<bool>,
    pub skip_existing: Option<bool>,
    pub include_layers: Option<bool>,
    pub enable_mount: Option<bool>,
    pub verify_digests: Option<bool>,
    /// Humantime string (e.g. "5m", "300s").
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointFileConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryFileConfig {
    /// One of "default", "aggressive", "conservative".
    pub policy: Option<String>,
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Load `.freightliner.toml` from `dir`, or an empty (all-default) config if
/// it doesn't exist there.
pub fn load_config(dir: &Path) -> Result<FileConfig> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.display()))
}

impl ReplicationFileConfig {
    /// Apply whichever fields the file set onto `opts`, which the caller has
    /// already built from engine defaults. CLI flags are layered on top of
    /// `opts` afterward by the caller, so the ordering here only determines
    /// file-vs-engine-default precedence, never file-vs-CLI.
    pub fn apply(&self, opts: &mut ReplicationOptions) -> Result<()> {
        if let Some(v) = self.workers {
            opts.workers = v;
        }
        if let Some(v) = self.max_concurrent_transfers {
            opts.max_concurrent_transfers = v;
        }
        if !self.include_tags.is_empty() {
            opts.include_tags = self.include_tags.clone();
        }
        if !self.exclude_tags.is_empty() {
            opts.exclude_tags = self.exclude_tags.clone();
        }
        if !self.allowed_types.is_empty() {
            opts.allowed_types = self.allowed_types.clone();
        }
        if !self.denied_types.is_empty() {
            opts.denied_types = self.denied_types.clone();
        }
        if let Some(v) = self.include_referrers {
            opts.include_referrers = v;
        }
        if let Some(v) = self.include_signatures {
            opts.include_signatures = v;
        }
        if let Some(v) = self.include_sboms {
            opts.include_sboms = v;
        }
        if let Some(v) = self.skip_existing {
            opts.skip_existing = v;
        }
        if let Some(v) = self.include_layers {
            opts.include_layers = v;
        }
        if let Some(v) = self.enable_mount {
            opts.enable_mount = v;
        }
        if let Some(v) = self.verify_digests {
            opts.verify_digests = v;
        }
        if let Some(ref t) = self.timeout {
            opts.timeout =
                humantime::parse_duration(t).with_context(|| format!("invalid duration in config: {t}"))?;
        }
        Ok(())
    }
}
