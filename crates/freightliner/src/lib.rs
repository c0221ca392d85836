//! Freightliner's core replication engine: discovers repositories and
//! tags across heterogeneous OCI registries and copies each tag's manifest
//! graph from a source prefix to a destination prefix, surviving
//! interruption via a resumable on-disk checkpoint.
//!
//! The engine itself speaks only the capability interfaces in
//! [`registry`]; no concrete ECR/GCR/Docker Hub/ACR/Harbor/Quay client
//! lives in this crate — binding one is the responsibility of whatever
//! constructs a `RegistryClient` and hands it to
//! [`tree_replicator::TreeReplicator`].
//!
//! Module map, leaves first:
//! - [`registry`] — capability surface consumed from external registry clients.
//! - [`cancellation`] — root cancellation handle threaded through every operation.
//! - [`error`] — the error taxonomy.
//! - [`retry_support`] — glue between [`error::FreightlinerError`] and [`freightliner_retry`].
//! - [`seen_set`] — per-destination-repo dedup of already-uploaded digests.
//! - [`filters`] — tag/artifact-type include/exclude predicates.
//! - [`artifact_handler`] — index/manifest-list recursion and referrers copy.
//! - [`tag_copier`] — single-tag manifest+blob graph copy.
//! - [`worker_pool`] — bounded-parallel task executor.
//! - [`checkpoint`] / [`checkpoint_store`] — on-disk resumable job state.
//! - [`reporter`] — streaming progress and the terminal [`freightliner_types::TreeReport`].
//! - [`tree_replicator`] — the top-level orchestrator tying all of the above together.

pub mod artifact_handler;
pub mod cancellation;
pub mod checkpoint;
pub mod checkpoint_store;
pub mod error;
pub mod filters;
pub mod registry;
pub mod reporter;
pub mod retry_support;
pub mod seen_set;
pub mod tag_copier;
pub mod tree_replicator;
pub mod worker_pool;

pub use cancellation::CancellationToken;
pub use checkpoint_store::CheckpointStore;
pub use error::FreightlinerError;
pub use reporter::{CollectingReporter, EventLog, ReplicationEvent, ReportAggregator, Reporter};
pub use tree_replicator::TreeReplicator;
