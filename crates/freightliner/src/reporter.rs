//! Reporter: streams progress and produces the TreeReport. Purely
//! observational — subscribes to the pool's outcome channel, maintains
//! counters and per-repo aggregates, exposes a snapshot on demand. No feedback
//! into the scheduler.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use freightliner_types::{RepoReport, TagOutcome, TagOutcomeStatus, TreeReport};
use serde::{Deserialize, Serialize};

/// Hand-rolled progress sink rather than pulling in a logging framework —
/// the engine has no other use for one.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Test double that records every call instead of printing it.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub info: Vec<String>,
    pub warn: Vec<String>,
    pub error: Vec<String>,
}

impl Reporter for CollectingReporter {
    fn info(&mut self, msg: &str) {
        self.info.push(msg.to_string());
    }
    fn warn(&mut self, msg: &str) {
        self.warn.push(msg.to_string());
    }
    fn error(&mut self, msg: &str) {
        self.error.push(msg.to_string());
    }
}

/// One JSONL-logged replication event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    /// `"<repo>:<tag>"`, or `"all"` for job-wide events.
    pub scope: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventType {
    JobStarted { job_id: String, repositories_discovered: usize },
    JobFinished { tags_copied: usize, tags_skipped: usize, tags_failed: usize },
    RepoDiscovered { name: String },
    RepoCompleted { name: String },
    TagStarted,
    TagAttempted { attempt: u32 },
    TagOutcomeRecorded { outcome: TagOutcomeKind },
    ReferrerCopied { subject_digest: String, referrer_digest: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagOutcomeKind {
    Copied,
    Skipped,
    Failed,
}

impl From<TagOutcomeStatus> for TagOutcomeKind {
    fn from(s: TagOutcomeStatus) -> Self {
        match s {
            TagOutcomeStatus::Copied => TagOutcomeKind::Copied,
            TagOutcomeStatus::Skipped => TagOutcomeKind::Skipped,
            TagOutcomeStatus::Failed => TagOutcomeKind::Failed,
        }
    }
}

pub const EVENTS_FILE: &str = "events.jsonl";

pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// Append-only event log for a replication job.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<ReplicationEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: ReplicationEvent) {
        self.events.push(event);
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;

        let mut writer = std::io::BufWriter::new(file);
        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;
        Ok(())
    }

    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line.with_context(|| {
                format!("failed to read line from events file {}", path.display())
            })?;
            let event: ReplicationEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON: {line}"))?;
            events.push(event);
        }
        Ok(Self { events })
    }

    pub fn all_events(&self) -> &[ReplicationEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Aggregates per-tag outcomes into the final [`TreeReport`].
/// Construction is cheap; `record` is called once per completed TagTask as
/// outcomes drain from the WorkerPool.
#[derive(Debug, Default)]
pub struct ReportAggregator {
    per_repo: BTreeMap<String, Vec<TagOutcome>>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: TagOutcome) {
        self.per_repo.entry(outcome.repo.clone()).or_default().push(outcome);
    }

    pub fn finalize(
        self,
        job_id: String,
        repositories_discovered: usize,
        duration_ms: u64,
    ) -> TreeReport {
        let mut tags_copied = 0;
        let mut tags_skipped = 0;
        let mut tags_failed = 0;
        let mut repositories_completed = 0;
        let mut per_repo_reports = Vec::new();

        for (repo, outcomes) in self.per_repo {
            let mut repo_copied = 0;
            let mut repo_skipped = 0;
            let mut repo_failed = 0;
            let mut failed_tags = Vec::new();

            for outcome in &outcomes {
                match outcome.status {
                    TagOutcomeStatus::Copied => repo_copied += 1,
                    TagOutcomeStatus::Skipped => repo_skipped += 1,
                    TagOutcomeStatus::Failed => {
                        repo_failed += 1;
                        failed_tags.push(outcome.clone());
                    }
                }
            }

            tags_copied += repo_copied;
            tags_skipped += repo_skipped;
            tags_failed += repo_failed;
            if repo_failed == 0 {
                repositories_completed += 1;
            }

            per_repo_reports.push(RepoReport {
                repo,
                tags_copied: repo_copied,
                tags_skipped: repo_skipped,
                tags_failed: repo_failed,
                failed_tags,
            });
        }

        TreeReport {
            job_id,
            repositories_discovered,
            repositories_completed,
            tags_copied,
            tags_skipped,
            tags_failed,
            duration_ms,
            per_repo_reports,
            environment: freightliner_types::EnvironmentFingerprint::current(),
        }
    }
}
