//! Core domain types shared by the Freightliner replication engine, its retry
//! policy crate, and its CLI: repository/image references, the manifest/descriptor
//! graph, replication tasks, checkpoint records, and the terminal report shape.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod digest;

pub use digest::Digest;

/// Deserialize a Duration from either a string (human-readable, e.g. "30s") or a
/// u64 (milliseconds).
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        U64(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
        DurationHelper::U64(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a Duration as milliseconds so it round-trips with [`deserialize_duration`].
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// A `(registry_host, repository_path)` pair, parsed from `<host>/<path>`.
///
/// Namespace normalization (bare names resolving to `library/<name>` on Docker
/// Hub, mandatory `<project>/<path>` on GCR, and so on) is the registry adapter's
/// responsibility; the engine treats this as an opaque pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub registry_host: String,
    pub repository_path: String,
}

impl RepositoryRef {
    pub fn new(registry_host: impl Into<String>, repository_path: impl Into<String>) -> Self {
        Self {
            registry_host: registry_host.into(),
            repository_path: repository_path.into(),
        }
    }

    /// Parse a `<host>/<path>` prefix string into its host and path components.
    pub fn parse(prefix: &str) -> Option<Self> {
        let (host, path) = prefix.split_once('/')?;
        if host.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self::new(host, path))
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry_host, self.repository_path)
    }
}

/// Either a tag string or a digest qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Qualifier {
    Tag(String),
    Digest(Digest),
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qualifier::Tag(t) => write!(f, "{t}"),
            Qualifier::Digest(d) => write!(f, "{d}"),
        }
    }
}

/// `(repository, qualifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub repository: RepositoryRef,
    pub qualifier: Qualifier,
}

/// Media types the engine discriminates on. Anything else is `Unknown` and is
/// rejected as `Unsupported` before a transfer is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaTypeClass {
    Image,
    Index,
    Artifact,
    Unknown,
}

/// Classify a raw media-type string the way TagCopier's dispatch step does.
pub fn classify_media_type(media_type: &str) -> MediaTypeClass {
    match media_type {
        "application/vnd.docker.distribution.manifest.v2+json"
        | "application/vnd.oci.image.manifest.v1+json" => MediaTypeClass::Image,
        "application/vnd.docker.distribution.manifest.list.v2+json"
        | "application/vnd.oci.image.index.v1+json" => MediaTypeClass::Index,
        other
            if other.starts_with("application/vnd.cncf.helm")
                || other.starts_with("application/wasm")
                || other.starts_with("application/vnd.in-toto")
                || other.starts_with("application/vnd.cyclonedx")
                || other.contains("sbom")
                || other.contains("signature")
                || other.contains("ml-model") =>
        {
            MediaTypeClass::Artifact
        }
        _ => MediaTypeClass::Unknown,
    }
}

/// `{media_type, digest, size, optional_platform, optional_annotations}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// An immutable record `{raw_bytes, media_type, digest}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub raw_bytes: Vec<u8>,
    pub media_type: String,
    pub digest: Digest,
}

impl Manifest {
    pub fn class(&self) -> MediaTypeClass {
        classify_media_type(&self.media_type)
    }
}

/// Artifact-type classification for referrer filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Signature,
    Sbom,
    Attestation,
    Helm,
    Wasm,
    MlModel,
    Other,
}

/// Pure classification function used by ArtifactHandler for referrers.
pub fn classify_artifact_type(media_type: &str) -> ArtifactType {
    if media_type.contains("signature") {
        ArtifactType::Signature
    } else if media_type.contains("sbom") || media_type.contains("cyclonedx") {
        ArtifactType::Sbom
    } else if media_type.contains("in-toto") || media_type.contains("attestation") {
        ArtifactType::Attestation
    } else if media_type.starts_with("application/vnd.cncf.helm") {
        ArtifactType::Helm
    } else if media_type.starts_with("application/wasm") {
        ArtifactType::Wasm
    } else if media_type.contains("ml-model") {
        ArtifactType::MlModel
    } else {
        ArtifactType::Other
    }
}

/// The unit of work scheduled by the pool. Only `TagTask` is ever executed by a
/// worker; `TreeTask`/`RepoTask` are expanded in the scheduler thread.
#[derive(Debug, Clone)]
pub enum ReplicationTask {
    Tree {
        src_prefix: String,
        dst_prefix: String,
    },
    Repo {
        src_repo: RepositoryRef,
        dst_repo: RepositoryRef,
    },
    Tag {
        src_repo: RepositoryRef,
        dst_repo: RepositoryRef,
        tag: String,
    },
}

/// Status of a repository or tag checkpoint entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A single tag's checkpoint record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagEntry {
    pub name: String,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Unknown fields from a newer schema version, preserved on round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TagEntry {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: EntryStatus::Pending,
            src_digest: None,
            dst_digest: None,
            error: None,
            completed_at: None,
            extra: BTreeMap::new(),
        }
    }
}

/// A single repository's checkpoint record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoEntry {
    pub name: String,
    pub status: EntryStatus,
    pub tags: Vec<TagEntry>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Terminal state of a finalized job checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Success,
    PartialFailure,
    Canceled,
}

/// Persisted document, one per job: `{job_id, started_at, source_prefix,
/// destination_prefix, filters, repositories[]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_version: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub source_prefix: String,
    pub destination_prefix: String,
    pub options_digest: String,
    pub repositories: Vec<RepoEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_state: Option<TerminalState>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

pub const CURRENT_CHECKPOINT_VERSION: &str = "freightliner.checkpoint.v1";

/// Declarative inclusion/exclusion filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationOptions {
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub max_concurrent_transfers: usize,
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    #[serde(default)]
    pub allowed_types: Vec<String>,
    #[serde(default)]
    pub denied_types: Vec<String>,
    #[serde(default)]
    pub include_referrers: bool,
    #[serde(default)]
    pub include_signatures: bool,
    #[serde(default)]
    pub include_sboms: bool,
    #[serde(default = "default_skip_existing")]
    pub skip_existing: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration",
        default = "default_tag_timeout"
    )]
    pub timeout: Duration,
    #[serde(default = "default_true")]
    pub include_layers: bool,
    #[serde(default)]
    pub enable_checkpoint: bool,
    #[serde(default)]
    pub checkpoint_id: Option<String>,
    #[serde(default)]
    pub resume_id: Option<String>,
    #[serde(default = "default_true")]
    pub enable_mount: bool,
    #[serde(default = "default_true")]
    pub verify_digests: bool,
}

fn default_skip_existing() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_tag_timeout() -> Duration {
    Duration::from_secs(300)
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            workers: 3,
            max_concurrent_transfers: 5,
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            allowed_types: Vec::new(),
            denied_types: Vec::new(),
            include_referrers: false,
            include_signatures: false,
            include_sboms: false,
            skip_existing: default_skip_existing(),
            dry_run: false,
            timeout: default_tag_timeout(),
            include_layers: true,
            enable_checkpoint: false,
            checkpoint_id: None,
            resume_id: None,
            enable_mount: true,
            verify_digests: true,
        }
    }
}

/// Error taxonomy classification, shared by the retry crate's per-class
/// backoff configuration and the engine's outcome reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    SourceNotFound,
    DestinationUnreachable,
    AuthFailure,
    RateLimited,
    IntegrityFailure,
    Unsupported,
    Canceled,
    Internal,
}

impl ErrorClass {
    /// Whether RetryExecutor should ever retry an error of this class.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::DestinationUnreachable | ErrorClass::RateLimited)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::SourceNotFound => "source_not_found",
            ErrorClass::DestinationUnreachable => "destination_unreachable",
            ErrorClass::AuthFailure => "auth_failure",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::IntegrityFailure => "integrity_failure",
            ErrorClass::Unsupported => "unsupported",
            ErrorClass::Canceled => "canceled",
            ErrorClass::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a single TagTask, emitted by a worker and consumed by the Reporter
/// and the CheckpointStore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagOutcome {
    pub repo: String,
    pub tag: String,
    pub status: TagOutcomeStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagOutcomeStatus {
    Copied,
    Skipped,
    Failed,
}

/// `TreeReport`, the terminal result of a `Replicate(...)` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeReport {
    pub job_id: String,
    pub repositories_discovered: usize,
    pub repositories_completed: usize,
    pub tags_copied: usize,
    pub tags_skipped: usize,
    pub tags_failed: usize,
    pub duration_ms: u64,
    pub per_repo_reports: Vec<RepoReport>,
    pub environment: EnvironmentFingerprint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoReport {
    pub repo: String,
    pub tags_copied: usize,
    pub tags_skipped: usize,
    pub tags_failed: usize,
    pub failed_tags: Vec<TagOutcome>,
}

/// Evidence-capture fingerprint carried on the terminal report for
/// after-the-fact auditing of which build and host ran a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub freightliner_version: String,
    pub os: String,
    pub arch: String,
    pub hostname: Option<String>,
}

impl EnvironmentFingerprint {
    pub fn current() -> Self {
        Self {
            freightliner_version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: gethostname::gethostname().into_string().ok(),
        }
    }
}
