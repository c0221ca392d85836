//! `CheckpointStore`: the in-process handle the replicator drives
//! while a job runs.
//!
//! The in-memory record lives behind one `Mutex` (a per-record lock, in
//! spec terms); every mutating call takes the lock, applies its delta, and
//! marks the record dirty. A single background thread — the "single writer
//! goroutine fed by a buffered update channel" the persisted-state contract
//! calls for, translated to this codebase's thread model — wakes on a
//! bounded interval and flushes the dirty record to disk, so callers observe
//! apply-on-next-disk-flush semantics without blocking on I/O per update.
//! `finalize` flushes immediately and stops the writer, matching "immediate
//! flush on terminal state."

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use freightliner_types::{Checkpoint, EntryStatus, RepoEntry, TagEntry, TerminalState};

use crate::checkpoint;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Handle to one job's on-disk checkpoint. Cloning shares the in-memory
/// record and the background writer thread.
#[derive(Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    inner: Arc<Mutex<Checkpoint>>,
    dirty: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CheckpointStore {
    /// Start a fresh job: no prior checkpoint is consulted. Persists
    /// immediately so a crash before the first tag completes still leaves a
    /// resumable record.
    pub fn begin(
        dir: &Path,
        job_id: String,
        source_prefix: String,
        destination_prefix: String,
        options_digest: String,
    ) -> Result<Self> {
        let record = checkpoint::new_checkpoint(job_id, source_prefix, destination_prefix, options_digest);
        checkpoint::save_checkpoint(dir, &record)?;
        Ok(Self::wrap(dir, record))
    }

    /// Resume `job_id` if a non-finalized checkpoint exists for it.
    /// `options_digest` is compared against the persisted one so a resume
    /// with materially different `ReplicationOptions` is rejected rather than
    /// silently reusing stale per-tag progress.
    pub fn load(dir: &Path, job_id: &str, options_digest: &str) -> Result<Option<Self>> {
        let Some(record) = checkpoint::load_checkpoint(dir, job_id)? else {
            return Ok(None);
        };
        if record.terminal_state.is_some() {
            anyhow::bail!("checkpoint {job_id} is already finalized and cannot be resumed");
        }
        if record.options_digest != options_digest {
            anyhow::bail!(
                "checkpoint {job_id} was started with different replication options (digest {} != {})",
                record.options_digest,
                options_digest
            );
        }
        Ok(Some(Self::wrap(dir, record)))
    }

    fn wrap(dir: &Path, record: Checkpoint) -> Self {
        let inner = Arc::new(Mutex::new(record));
        let dirty = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let writer_inner = inner.clone();
        let writer_dirty = dirty.clone();
        let writer_stop = stop.clone();
        let writer_dir = dir.to_path_buf();
        let handle = thread::spawn(move || {
            while !writer_stop.load(Ordering::SeqCst) {
                thread::sleep(DEFAULT_FLUSH_INTERVAL);
                if writer_dirty.swap(false, Ordering::SeqCst) {
                    let record = writer_inner.lock().expect("checkpoint mutex poisoned");
                    let _ = checkpoint::save_checkpoint(&writer_dir, &record);
                }
            }
        });

        Self {
            dir: dir.to_path_buf(),
            inner,
            dirty,
            stop,
            writer: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn list_in_progress(dir: &Path) -> Result<Vec<String>> {
        checkpoint::list_in_progress(dir)
    }

    pub fn job_id(&self) -> String {
        self.inner.lock().expect("checkpoint mutex poisoned").job_id.clone()
    }

    /// Tags already `Completed` for `repo` in a resumed job, used by
    /// `TreeReplicator` to skip re-submitting work already done before a
    /// crash.
    pub fn completed_tags(&self, repo: &str) -> Vec<String> {
        let record = self.inner.lock().expect("checkpoint mutex poisoned");
        record
            .repositories
            .iter()
            .find(|r| r.name == repo)
            .map(|r| {
                r.tags
                    .iter()
                    .filter(|t| t.status == EntryStatus::Completed)
                    .map(|t| t.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Record that a repository has been discovered, inserting an entry if
    /// this is the first time it's been seen in this job.
    pub fn record_repo_discovered(&self, repo: &str) {
        let mut record = self.inner.lock().expect("checkpoint mutex poisoned");
        if !record.repositories.iter().any(|r| r.name == repo) {
            record.repositories.push(RepoEntry {
                name: repo.to_string(),
                status: EntryStatus::InProgress,
                tags: Vec::new(),
                extra: Default::default(),
            });
        }
        drop(record);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Record that `tag` within `repo` has transitioned to `status`.
    /// Inserts an entry first if this tag hasn't been seen yet.
    pub fn update_tag(
        &self,
        repo: &str,
        tag: &str,
        status: EntryStatus,
        src_digest: Option<String>,
        dst_digest: Option<String>,
        error: Option<String>,
    ) {
        {
            let mut record = self.inner.lock().expect("checkpoint mutex poisoned");
            let repo_entry = match record.repositories.iter_mut().find(|r| r.name == repo) {
                Some(r) => r,
                None => {
                    record.repositories.push(RepoEntry {
                        name: repo.to_string(),
                        status: EntryStatus::InProgress,
                        tags: Vec::new(),
                        extra: Default::default(),
                    });
                    record.repositories.last_mut().expect("just pushed")
                }
            };
            let tag_entry = match repo_entry.tags.iter_mut().find(|t| t.name == tag) {
                Some(t) => t,
                None => {
                    repo_entry.tags.push(TagEntry::pending(tag));
                    repo_entry.tags.last_mut().expect("just pushed")
                }
            };
            // A completed tag is never demoted: append-only within a run.
            if tag_entry.status == EntryStatus::Completed && status != EntryStatus::Completed {
                return;
            }
            tag_entry.status = status;
            if src_digest.is_some() {
                tag_entry.src_digest = src_digest;
            }
            if dst_digest.is_some() {
                tag_entry.dst_digest = dst_digest;
            }
            tag_entry.error = error;
            if matches!(status, EntryStatus::Completed | EntryStatus::Failed) {
                tag_entry.completed_at = Some(chrono::Utc::now());
            }
        }
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Mark `repo` as `Completed` once every submitted tag for it has
    /// reached a terminal per-tag status.
    pub fn record_repo_completed(&self, repo: &str) {
        let mut record = self.inner.lock().expect("checkpoint mutex poisoned");
        if let Some(entry) = record.repositories.iter_mut().find(|r| r.name == repo) {
            entry.status = EntryStatus::Completed;
        }
        drop(record);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Finalize the job with a terminal state, flush immediately, and stop
    /// the background writer. Idempotent: the replicator calls this exactly
    /// once on its own exit path, but overwriting an existing terminal state
    /// is not itself an error.
    pub fn finalize(&self, terminal_state: TerminalState) -> Result<()> {
        {
            let mut record = self.inner.lock().expect("checkpoint mutex poisoned");
            record.terminal_state = Some(terminal_state);
        }
        self.flush_now()?;
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.writer.lock().expect("writer mutex poisoned").take() {
            let _ = handle.join();
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Checkpoint {
        self.inner.lock().expect("checkpoint mutex poisoned").clone()
    }

    /// Force an out-of-band flush, bypassing the bounded interval. Used by
    /// `finalize` and by tests that need to observe a write deterministically
    /// rather than wait out the flush interval.
    pub fn flush_now(&self) -> Result<()> {
        let record = self.inner.lock().expect("checkpoint mutex poisoned");
        checkpoint::save_checkpoint(&self.dir, &record)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for CheckpointStore {
    /// Signal the writer thread to exit on the last clone's drop. Does not
    /// join: a caller that wants the final state durable must call
    /// `finalize`, which flushes synchronously before stopping.
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.stop.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn begin_persists_immediately() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::begin(td.path(), "job-1".into(), "s".into(), "d".into(), "x".into()).unwrap();
        assert!(checkpoint::load_checkpoint(td.path(), &store.job_id()).unwrap().is_some());
        store.finalize(TerminalState::Success).unwrap();
    }

    #[test]
    fn update_tag_creates_repo_and_tag_entries_and_flush_now_persists() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::begin(td.path(), "job-2".into(), "s".into(), "d".into(), "x".into()).unwrap();
        store.update_tag("team/app", "1.0", EntryStatus::Completed, Some("sha256:aa".into()), Some("sha256:aa".into()), None);
        store.flush_now().unwrap();

        let loaded = checkpoint::load_checkpoint(td.path(), "job-2").unwrap().unwrap();
        assert_eq!(loaded.repositories.len(), 1);
        assert_eq!(loaded.repositories[0].tags[0].status, EntryStatus::Completed);
        assert!(loaded.repositories[0].tags[0].completed_at.is_some());
        store.finalize(TerminalState::Success).unwrap();
    }

    #[test]
    fn update_tag_never_demotes_a_completed_tag() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::begin(td.path(), "job-demote".into(), "s".into(), "d".into(), "x".into()).unwrap();
        store.update_tag("team/app", "1.0", EntryStatus::Completed, Some("sha256:aa".into()), Some("sha256:aa".into()), None);

        // A later write reporting failure must not overwrite the completed entry.
        store.update_tag("team/app", "1.0", EntryStatus::Failed, None, None, Some("retry raced".into()));

        let snapshot = store.snapshot();
        let tag = &snapshot.repositories[0].tags[0];
        assert_eq!(tag.status, EntryStatus::Completed);
        assert_eq!(tag.src_digest.as_deref(), Some("sha256:aa"));
        assert_eq!(tag.dst_digest.as_deref(), Some("sha256:aa"));
        assert!(tag.error.is_none());
        assert!(tag.completed_at.is_some());
        store.finalize(TerminalState::Success).unwrap();
    }

    #[test]
    fn completed_tags_filters_by_status() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::begin(td.path(), "job-3".into(), "s".into(), "d".into(), "x".into()).unwrap();
        store.update_tag("team/app", "1.0", EntryStatus::Completed, None, None, None);
        store.update_tag("team/app", "2.0", EntryStatus::Failed, None, None, Some("boom".into()));

        let completed = store.completed_tags("team/app");
        assert_eq!(completed, vec!["1.0".to_string()]);
        store.finalize(TerminalState::PartialFailure).unwrap();
    }

    #[test]
    fn load_rejects_mismatched_options_digest() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::begin(td.path(), "job-4".into(), "s".into(), "d".into(), "digest-a".into()).unwrap();
        store.finalize(TerminalState::Canceled).unwrap();

        let err = CheckpointStore::load(td.path(), "job-4", "digest-b").unwrap_err();
        assert!(err.to_string().contains("different replication options"));
    }

    #[test]
    fn load_rejects_already_finalized_job() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::begin(td.path(), "job-5".into(), "s".into(), "d".into(), "x".into()).unwrap();
        store.finalize(TerminalState::Success).unwrap();

        let err = CheckpointStore::load(td.path(), "job-5", "x").unwrap_err();
        assert!(err.to_string().contains("already finalized"));
    }

    #[test]
    fn load_resumes_in_progress_job() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::begin(td.path(), "job-6".into(), "s".into(), "d".into(), "x".into()).unwrap();
        store.update_tag("team/app", "1.0", EntryStatus::Completed, None, None, None);
        store.flush_now().unwrap();
        drop(store);

        let resumed = CheckpointStore::load(td.path(), "job-6", "x").unwrap().unwrap();
        assert_eq!(resumed.completed_tags("team/app"), vec!["1.0".to_string()]);
        resumed.finalize(TerminalState::Success).unwrap();
    }

    #[test]
    fn list_in_progress_delegates_to_checkpoint_module() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::begin(td.path(), "job-7".into(), "s".into(), "d".into(), "x".into()).unwrap();
        assert_eq!(CheckpointStore::list_in_progress(td.path()).unwrap(), vec!["job-7".to_string()]);
        store.finalize(TerminalState::Success).unwrap();
    }
}
