//! TreeReplicator: the top-level orchestrator. Resolves the two registry
//! clients, begins or resumes a checkpoint, discovers repositories under the
//! source prefix, enumerates and filters each repository's tags, submits one
//! `TagJob` per surviving tag to the [`WorkerPool`], and drains outcomes
//! into the checkpoint and [`Reporter`] until every submitted job has
//! reported back. Finalizes the checkpoint and returns the terminal
//! [`TreeReport`].
//!
//! Repository auto-creation (some registries, like ECR, require an explicit
//! create step before the first push) happens here, once per discovered
//! repository, rather than in `TagCopier` per tag — a repository that
//! doesn't exist yet only needs creating once, not once per tag copied into
//! it.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use freightliner_retry::{AttemptError, RetryExecutor, RetryPolicy};
use freightliner_types::{
    Digest, EntryStatus, ReplicationOptions, RepositoryRef, TagOutcome, TagOutcomeStatus,
    TerminalState, TreeReport,
};

use crate::cancellation::CancellationToken;
use crate::checkpoint_store::CheckpointStore;
use crate::error::FreightlinerError;
use crate::filters::tag_allowed;
use crate::registry::RegistryClient;
use crate::reporter::{EventLog, EventType, ReplicationEvent, ReportAggregator, Reporter};
use crate::retry_support::retry_op;
use crate::seen_set::SeenRegistry;
use crate::tag_copier::{self, CopyContext, CopyStatus};
use crate::worker_pool::WorkerPool;

/// One tag's replication work, as submitted to the [`WorkerPool`].
struct TagJob {
    src_repo: RepositoryRef,
    dst_repo: RepositoryRef,
    tag: String,
}

/// Everything a worker thread needs to run a [`TagJob`] to completion,
/// shared read-only across the pool via one [`Arc`].
struct JobShared {
    src_client: Arc<dyn RegistryClient>,
    dst_client: Arc<dyn RegistryClient>,
    opts: ReplicationOptions,
    per_op_retry: RetryExecutor,
    per_tag_retry: RetryExecutor,
    cancel: CancellationToken,
    seen: SeenRegistry,
}

/// Stable hash of the options a job was started with, used to reject a
/// resume whose `ReplicationOptions` materially differ from the original
/// run.
fn options_digest(opts: &ReplicationOptions) -> String {
    let json = serde_json::to_string(opts).unwrap_or_default();
    Digest::sha256_of(json.as_bytes()).to_string()
}

/// Rewrite a source repository path onto the destination prefix: the portion
/// of `repo_path` past `src_prefix` is appended to `dst_prefix` verbatim.
fn map_repo_path(src_prefix: &str, dst_prefix: &str, repo_path: &str) -> String {
    match repo_path.strip_prefix(src_prefix) {
        Some(suffix) => format!("{dst_prefix}{suffix}"),
        None => repo_path.to_string(),
    }
}

/// Run one tag job under its own whole-tag [`RetryExecutor`] — an outer
/// retry layer wrapping the entire copy in one more retry loop, for failures
/// that occur outside any individual network call (resolving the repository
/// handle itself, for instance). `TagCopier`'s own operations are each
/// separately retried under `shared.per_op_retry`.
fn run_tag_job(shared: &JobShared, job: TagJob) -> TagOutcome {
    let start = Instant::now();
    let attempts = AtomicU32::new(0);

    let result = shared.per_tag_retry.run(|_attempt| {
        attempts.fetch_add(1, Ordering::SeqCst);
        if shared.cancel.is_cancelled() {
            return Err(AttemptError::Terminal(FreightlinerError::Canceled));
        }

        let ctx = CopyContext {
            opts: &shared.opts,
            retry: &shared.per_op_retry,
            cancel: &shared.cancel,
            seen: &shared.seen,
        };

        match tag_copier::copy_tag(
            &ctx,
            &*shared.src_client,
            &*shared.dst_client,
            &job.src_repo,
            &job.dst_repo,
            &job.tag,
        ) {
            Ok(r) => Ok(r),
            Err(e) if e.class().is_retryable() => {
                let retry_after = match &e {
                    FreightlinerError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                Err(AttemptError::Retryable { error: e, retry_after })
            }
            Err(e) => Err(AttemptError::Terminal(e)),
        }
    });

    let duration_ms = start.elapsed().as_millis() as u64;
    let attempts_taken = attempts.load(Ordering::SeqCst).max(1);

    match result {
        Ok(copy_result) => TagOutcome {
            repo: job.src_repo.repository_path,
            tag: job.tag,
            status: match copy_result.status {
                CopyStatus::Copied => TagOutcomeStatus::Copied,
                CopyStatus::Skipped => TagOutcomeStatus::Skipped,
            },
            attempts: attempts_taken,
            src_digest: copy_result.src_digest.map(|d| d.to_string()),
            dst_digest: copy_result.dst_digest.map(|d| d.to_string()),
            error_class: None,
            error_message: None,
            duration_ms,
        },
        Err(e) => TagOutcome {
            repo: job.src_repo.repository_path,
            tag: job.tag,
            status: TagOutcomeStatus::Failed,
            attempts: attempts_taken,
            src_digest: None,
            dst_digest: None,
            error_class: Some(e.class()),
            error_message: Some(e.to_string()),
            duration_ms,
        },
    }
}

pub struct TreeReplicator {
    src_client: Arc<dyn RegistryClient>,
    dst_client: Arc<dyn RegistryClient>,
    opts: ReplicationOptions,
    cancel: CancellationToken,
    per_op_retry: RetryExecutor,
    per_tag_retry: RetryExecutor,
}

impl TreeReplicator {
    pub fn new(
        src_client: Arc<dyn RegistryClient>,
        dst_client: Arc<dyn RegistryClient>,
        opts: ReplicationOptions,
        cancel: CancellationToken,
        per_op_retry: RetryExecutor,
        per_tag_retry: RetryExecutor,
    ) -> Self {
        Self { src_client, dst_client, opts, cancel, per_op_retry, per_tag_retry }
    }

    /// Convenience constructor using the default retry policy for both retry
    /// layers.
    pub fn with_default_retries(
        src_client: Arc<dyn RegistryClient>,
        dst_client: Arc<dyn RegistryClient>,
        opts: ReplicationOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(
            src_client,
            dst_client,
            opts,
            cancel,
            RetryExecutor::from_policy(RetryPolicy::Default),
            RetryExecutor::from_policy(RetryPolicy::Default),
        )
    }

    fn resolve_checkpoint(
        &self,
        state_dir: &Path,
        digest: &str,
        src_prefix: &str,
        dst_prefix: &str,
    ) -> Result<CheckpointStore, FreightlinerError> {
        if let Some(resume_id) = &self.opts.resume_id {
            return CheckpointStore::load(state_dir, resume_id, digest)
                .map_err(|e| FreightlinerError::Internal(e.to_string()))?
                .ok_or_else(|| {
                    FreightlinerError::Internal(format!(
                        "no resumable checkpoint found for job {resume_id}"
                    ))
                });
        }
        let job_id = self.opts.checkpoint_id.clone().unwrap_or_else(|| digest.to_string());
        CheckpointStore::begin(state_dir, job_id, src_prefix.to_string(), dst_prefix.to_string(), digest.to_string())
            .map_err(|e| FreightlinerError::Internal(e.to_string()))
    }

    /// Replicate every tag (subject to the configured include/exclude filters) in every repository
    /// under `src_prefix` into the equivalent repository under `dst_prefix`.
    pub fn replicate(
        &self,
        src_prefix: &str,
        dst_prefix: &str,
        state_dir: &Path,
        reporter: &mut dyn Reporter,
        events: &mut EventLog,
    ) -> Result<TreeReport, FreightlinerError> {
        let start = Instant::now();
        let digest = options_digest(&self.opts);

        let checkpoint = if self.opts.enable_checkpoint {
            Some(self.resolve_checkpoint(state_dir, &digest, src_prefix, dst_prefix)?)
        } else {
            None
        };
        let job_id = checkpoint.as_ref().map(|c| c.job_id()).unwrap_or_else(|| digest.clone());

        reporter.info(&format!("discovering repositories under {src_prefix}"));
        let repo_paths = self
            .src_client
            .list_repositories(src_prefix)
            .map_err(|e| FreightlinerError::SourceNotFound(e.to_string()))?;

        let shared = Arc::new(JobShared {
            src_client: Arc::clone(&self.src_client),
            dst_client: Arc::clone(&self.dst_client),
            opts: self.opts.clone(),
            per_op_retry: self.per_op_retry.clone(),
            per_tag_retry: self.per_tag_retry.clone(),
            cancel: self.cancel.clone(),
            seen: SeenRegistry::new(),
        });
        let pool_shared = Arc::clone(&shared);
        let pool: WorkerPool<TagJob, TagOutcome> =
            WorkerPool::new(self.opts.workers, move |job| run_tag_job(&pool_shared, job));

        let mut repositories_discovered = 0usize;
        let mut total_jobs = 0usize;
        let mut remaining_per_repo: HashMap<String, usize> = HashMap::new();

        for repo_path in &repo_paths {
            if self.cancel.is_cancelled() {
                break;
            }
            repositories_discovered += 1;
            let dst_path = map_repo_path(src_prefix, dst_prefix, repo_path);

            if let Some(checkpoint) = &checkpoint {
                checkpoint.record_repo_discovered(repo_path);
            }
            events.record(ReplicationEvent {
                timestamp: chrono::Utc::now(),
                event_type: EventType::RepoDiscovered { name: repo_path.clone() },
                scope: "all".to_string(),
            });
            reporter.info(&format!("discovered repository {repo_path}"));

            if !self.opts.dry_run
                && let Some(creator) = self.dst_client.as_repository_creator()
            {
                let created = retry_op(&self.per_op_retry, &self.cancel, || {
                    creator
                        .create_repository(&dst_path)
                        .map_err(|e| FreightlinerError::DestinationUnreachable(e.to_string()))
                });
                if let Err(e) = created {
                    reporter.error(&format!(
                        "failed to create destination repository {dst_path}: {e}"
                    ));
                    continue;
                }
            }

            let src_handle = match self.src_client.get_repository(repo_path) {
                Ok(h) => h,
                Err(e) => {
                    reporter.error(&format!("failed to resolve source repository {repo_path}: {e}"));
                    continue;
                }
            };
            let tags = match src_handle.list_tags() {
                Ok(t) => t,
                Err(e) => {
                    reporter.error(&format!("failed to list tags for {repo_path}: {e}"));
                    continue;
                }
            };

            let already_completed: HashSet<String> = checkpoint
                .as_ref()
                .map(|c| c.completed_tags(repo_path).into_iter().collect())
                .unwrap_or_default();

            let src_repo_ref = RepositoryRef::new(self.src_client.registry_name(), repo_path.clone());
            let dst_repo_ref = RepositoryRef::new(self.dst_client.registry_name(), dst_path);

            let mut submitted_for_repo = 0usize;
            for tag in tags {
                if !tag_allowed(&self.opts, &tag) || already_completed.contains(&tag) {
                    continue;
                }
                if let Some(checkpoint) = &checkpoint {
                    checkpoint.update_tag(repo_path, &tag, EntryStatus::InProgress, None, None, None);
                }
                pool.submit(TagJob {
                    src_repo: src_repo_ref.clone(),
                    dst_repo: dst_repo_ref.clone(),
                    tag,
                });
                submitted_for_repo += 1;
                total_jobs += 1;
            }

            if submitted_for_repo == 0 {
                if let Some(checkpoint) = &checkpoint {
                    checkpoint.record_repo_completed(repo_path);
                }
            } else {
                remaining_per_repo.insert(repo_path.clone(), submitted_for_repo);
            }
        }

        let mut aggregator = ReportAggregator::new();
        for _ in 0..total_jobs {
            let Some(outcome) = pool.recv() else { break };

            events.record(ReplicationEvent {
                timestamp: chrono::Utc::now(),
                event_type: EventType::TagOutcomeRecorded { outcome: outcome.status.into() },
                scope: format!("{}:{}", outcome.repo, outcome.tag),
            });

            if let Some(checkpoint) = &checkpoint {
                let status = match outcome.status {
                    TagOutcomeStatus::Copied | TagOutcomeStatus::Skipped => EntryStatus::Completed,
                    TagOutcomeStatus::Failed => EntryStatus::Failed,
                };
                checkpoint.update_tag(
                    &outcome.repo,
                    &outcome.tag,
                    status,
                    outcome.src_digest.clone(),
                    outcome.dst_digest.clone(),
                    outcome.error_message.clone(),
                );
            }

            if let Some(count) = remaining_per_repo.get_mut(&outcome.repo) {
                *count -= 1;
                if *count == 0 {
                    if let Some(checkpoint) = &checkpoint {
                        checkpoint.record_repo_completed(&outcome.repo);
                    }
                    events.record(ReplicationEvent {
                        timestamp: chrono::Utc::now(),
                        event_type: EventType::RepoCompleted { name: outcome.repo.clone() },
                        scope: "all".to_string(),
                    });
                }
            }

            match outcome.status {
                TagOutcomeStatus::Failed => reporter.warn(&format!(
                    "{}:{} failed after {} attempt(s): {}",
                    outcome.repo,
                    outcome.tag,
                    outcome.attempts,
                    outcome.error_message.as_deref().unwrap_or("unknown error")
                )),
                _ => reporter.info(&format!("{}:{} {:?}", outcome.repo, outcome.tag, outcome.status)),
            }

            aggregator.record(outcome);
        }
        pool.close();

        let duration_ms = start.elapsed().as_millis() as u64;
        let report = aggregator.finalize(job_id, repositories_discovered, duration_ms);

        if let Some(checkpoint) = &checkpoint {
            let terminal = if self.cancel.is_cancelled() {
                TerminalState::Canceled
            } else if report.tags_failed > 0 {
                TerminalState::PartialFailure
            } else {
                TerminalState::Success
            };
            checkpoint.finalize(terminal).map_err(|e| FreightlinerError::Internal(e.to_string()))?;
        }

        events.record(ReplicationEvent {
            timestamp: chrono::Utc::now(),
            event_type: EventType::JobFinished {
                tags_copied: report.tags_copied,
                tags_skipped: report.tags_skipped,
                tags_failed: report.tags_failed,
            },
            scope: "all".to_string(),
        });

        Ok(report)
    }
}
