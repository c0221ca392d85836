//! On-disk checkpoint persistence.
//!
//! One JSON file per job: `<dir>/<job_id>.json`. Writes are atomic
//! (write-temp-then-rename). Unknown fields are preserved on read+write via
//! `freightliner_types::Checkpoint::extra` / `TagEntry::extra` /
//! `RepoEntry::extra`'s `#[serde(flatten)]` catch-alls.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use freightliner_types::{Checkpoint, CURRENT_CHECKPOINT_VERSION};

pub const MINIMUM_SUPPORTED_CHECKPOINT_VERSION: &str = "freightliner.checkpoint.v1";

pub fn checkpoint_path(dir: &Path, job_id: &str) -> PathBuf {
    dir.join(format!("{job_id}.json"))
}

fn tmp_path(dir: &Path, job_id: &str) -> PathBuf {
    dir.join(format!("{job_id}.tmp"))
}

/// Parse `freightliner.checkpoint.vN` -> `N`.
fn parse_schema_version(version: &str) -> Result<u32> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 || parts[0] != "freightliner" || !parts[2].starts_with('v') {
        bail!("invalid checkpoint schema version format: {version}");
    }
    parts[2][1..]
        .parse::<u32>()
        .with_context(|| format!("invalid version number in schema version: {version}"))
}

pub fn validate_schema_version(version: &str) -> Result<()> {
    let version_num = parse_schema_version(version)
        .with_context(|| format!("invalid schema version format: {version}"))?;
    let minimum_num = parse_schema_version(MINIMUM_SUPPORTED_CHECKPOINT_VERSION)?;
    if version_num < minimum_num {
        bail!(
            "checkpoint schema version {version} is older than the minimum supported version {MINIMUM_SUPPORTED_CHECKPOINT_VERSION}"
        );
    }
    Ok(())
}

/// Load a checkpoint record from disk. Returns `None` if the file does not
/// exist (a fresh job).
pub fn load_checkpoint(dir: &Path, job_id: &str) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(dir, job_id);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
    let checkpoint: Checkpoint = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse checkpoint {}", path.display()))?;
    validate_schema_version(&checkpoint.checkpoint_version)?;
    Ok(Some(checkpoint))
}

/// Atomically persist a checkpoint record: write to a sibling `.tmp` file,
/// fsync, then rename over the target. A partial file is never observable.
pub fn save_checkpoint(dir: &Path, checkpoint: &Checkpoint) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create checkpoint dir {}", dir.display()))?;

    let path = checkpoint_path(dir, &checkpoint.job_id);
    let tmp = tmp_path(dir, &checkpoint.job_id);

    let bytes = serde_json::to_vec_pretty(checkpoint).context("failed to serialize checkpoint")?;
    {
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(&bytes)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to fsync {}", tmp.display()))?;
    }

    fs::rename(&tmp, &path)
        .with_context(|| format!("failed to rename {} to {}", tmp.display(), path.display()))?;

    fsync_parent_dir(&path);
    Ok(())
}

/// Best-effort fsync of the parent directory after a rename. Errors are
/// silently ignored: not every platform supports opening a directory for sync.
fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

/// List job ids with a checkpoint file that has not been finalized — the
/// resume-list for `CheckpointStore::ListInProgress`.
pub fn list_in_progress(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(job_id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(checkpoint) = load_checkpoint(dir, job_id)?
            && checkpoint.terminal_state.is_none()
        {
            ids.push(job_id.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

pub fn new_checkpoint(
    job_id: String,
    source_prefix: String,
    destination_prefix: String,
    options_digest: String,
) -> Checkpoint {
    Checkpoint {
        checkpoint_version: CURRENT_CHECKPOINT_VERSION.to_string(),
        job_id,
        started_at: chrono::Utc::now(),
        source_prefix,
        destination_prefix,
        options_digest,
        repositories: Vec::new(),
        terminal_state: None,
        extra: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let td = tempdir().unwrap();
        let checkpoint = new_checkpoint(
            "job-1".into(),
            "src/app".into(),
            "dst/app".into(),
            "deadbeef".into(),
        );
        save_checkpoint(td.path(), &checkpoint).unwrap();

        let loaded = load_checkpoint(td.path(), "job-1").unwrap().unwrap();
        assert_eq!(loaded.job_id, "job-1");
        assert_eq!(loaded.source_prefix, "src/app");
    }

    #[test]
    fn load_missing_checkpoint_returns_none() {
        let td = tempdir().unwrap();
        assert!(load_checkpoint(td.path(), "nonexistent").unwrap().is_none());
    }

    #[test]
    fn load_rejects_checkpoint_older_than_minimum_version() {
        let td = tempdir().unwrap();
        let mut checkpoint = new_checkpoint(
            "job-2".into(),
            "src".into(),
            "dst".into(),
            "x".into(),
        );
        checkpoint.checkpoint_version = "freightliner.checkpoint.v0".into();
        let path = checkpoint_path(td.path(), "job-2");
        fs::write(&path, serde_json::to_vec(&checkpoint).unwrap()).unwrap();

        let err = load_checkpoint(td.path(), "job-2").unwrap_err();
        assert!(err.to_string().contains("older than the minimum"));
    }

    #[test]
    fn unknown_fields_are_preserved_through_save_and_load() {
        let td = tempdir().unwrap();
        let json = serde_json::json!({
            "checkpoint_version": "freightliner.checkpoint.v1",
            "job_id": "job-3",
            "started_at": chrono::Utc::now().to_rfc3339(),
            "source_prefix": "src",
            "destination_prefix": "dst",
            "options_digest": "x",
            "repositories": [],
            "future_top_level_field": "kept"
        });
        fs::write(checkpoint_path(td.path(), "job-3"), json.to_string()).unwrap();

        let loaded = load_checkpoint(td.path(), "job-3").unwrap().unwrap();
        assert_eq!(
            loaded.extra.get("future_top_level_field").and_then(|v| v.as_str()),
            Some("kept")
        );

        save_checkpoint(td.path(), &loaded).unwrap();
        let reloaded = load_checkpoint(td.path(), "job-3").unwrap().unwrap();
        assert_eq!(
            reloaded.extra.get("future_top_level_field").and_then(|v| v.as_str()),
            Some("kept")
        );
    }

    #[test]
    fn list_in_progress_excludes_finalized_jobs() {
        let td = tempdir().unwrap();
        let mut running = new_checkpoint("job-running".into(), "s".into(), "d".into(), "x".into());
        save_checkpoint(td.path(), &running).unwrap();

        running.job_id = "job-done".into();
        running.terminal_state = Some(freightliner_types::TerminalState::Success);
        save_checkpoint(td.path(), &running).unwrap();

        let in_progress = list_in_progress(td.path()).unwrap();
        assert_eq!(in_progress, vec!["job-running".to_string()]);
    }

    #[test]
    fn list_in_progress_on_missing_dir_returns_empty() {
        let td = tempdir().unwrap();
        let missing = td.path().join("does-not-exist");
        assert!(list_in_progress(&missing).unwrap().is_empty());
    }

    #[test]
    fn save_surfaces_rename_failure() {
        let td = tempdir().unwrap();
        let checkpoint = new_checkpoint("job-4".into(), "s".into(), "d".into(), "x".into());
        // Pre-create the destination path as a directory so the rename fails.
        fs::create_dir(checkpoint_path(td.path(), "job-4")).unwrap();
        assert!(save_checkpoint(td.path(), &checkpoint).is_err());
    }
}
