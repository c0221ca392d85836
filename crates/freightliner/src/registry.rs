//! Registry boundary: the capability interfaces the replication engine
//! consumes from an external registry client. These are deliberately small
//! and non-overlapping rather than one fat interface — `RegistryClient` for
//! repository discovery, `Repository` for the per-repo manifest/blob
//! surface, and two optional capabilities (`BlobMounter`,
//! `RepositoryCreator`) that a concrete adapter may or may not support. No
//! backend (ECR, GCR, Docker Hub, ...) is implemented here.
//!
//! The in-memory [`test_support`] module is a counting test-double registry
//! used to assert properties like "blob `(R, d)` is PUT at most once per
//! job" directly, without a real network-backed registry.

use std::io::Read;
use std::sync::Arc;

use anyhow::Result;
use freightliner_types::{Descriptor, Digest, Manifest, Qualifier};

/// Per-repository capability surface.
pub trait Repository: Send + Sync {
    fn list_tags(&self) -> Result<Vec<String>>;

    fn get_manifest(&self, qualifier: &Qualifier) -> Result<Manifest>;

    fn put_manifest(&self, tag: &str, manifest: &Manifest) -> Result<()>;

    /// May be fused into `get_manifest` by an adapter that has no cheaper
    /// HEAD; here it is a distinct call so TagCopier can avoid fetching
    /// bytes it doesn't need, both before the copy and during post-verify.
    fn head_manifest(&self, qualifier: &Qualifier) -> Result<Option<Descriptor>>;

    fn get_layer_reader(&self, digest: &Digest) -> Result<Box<dyn Read + Send>>;

    fn head_blob(&self, digest: &Digest) -> Result<bool>;

    fn put_blob(&self, digest: &Digest, size: u64, reader: &mut dyn Read) -> Result<()>;

    /// Referrers API. Default: unsupported — if the source registry does not
    /// advertise the Referrers API, the handler returns an empty referrer
    /// list; this is not an error.
    fn get_referrers(&self, _subject: &Digest) -> Result<Vec<Descriptor>> {
        Ok(Vec::new())
    }

    /// Narrow to the optional cross-repository mount capability, when this
    /// repository's adapter supports it.
    fn as_blob_mounter(&self) -> Option<&dyn BlobMounter> {
        None
    }
}

/// Optional cross-repository blob mount capability. An adapter that
/// implements this must gracefully degrade on any non-201 response rather
/// than treat it as an error.
pub trait BlobMounter: Send + Sync {
    /// Attempt to make `digest` present in this repository by reference to
    /// `from_repo` within the same registry tenant. Returns `Ok(true)` on a
    /// successful mount (adapter's 201), `Ok(false)` on any other response —
    /// the caller falls through to a full transfer.
    fn mount_blob(&self, digest: &Digest, from_repo: &str) -> Result<bool>;
}

/// Registry-level capability surface.
pub trait RegistryClient: Send + Sync {
    fn list_repositories(&self, prefix: &str) -> Result<Vec<String>>;

    /// Pure in the sense that resolving a path to a repository handle should
    /// not itself require I/O or validate existence.
    fn get_repository(&self, path: &str) -> Result<Arc<dyn Repository>>;

    fn registry_name(&self) -> &str;

    /// Narrow to the optional repository-autocreate capability (ECR needs an
    /// explicit create step; GCR/Harbor/Quay autocreate on push and need not
    /// implement this).
    fn as_repository_creator(&self) -> Option<&dyn RepositoryCreator> {
        None
    }
}

/// Optional explicit repository-creation capability, used by adapters (such
/// as ECR) that require an explicit create step before the first push.
pub trait RepositoryCreator: Send + Sync {
    fn create_repository(&self, path: &str) -> Result<()>;
}

/// Whether `src` and `dst` belong to the same registry tenant for the
/// purposes of cross-repository mount eligibility. The engine treats
/// registry identity as the adapter's `registry_name()`; anything finer
/// (account/tenant within a host) is the adapter's concern.
pub fn same_tenant(src: &dyn RegistryClient, dst: &dyn RegistryClient) -> bool {
    src.registry_name() == dst.registry_name()
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! An in-memory `RegistryClient`/`Repository` pair used by this crate's
    //! own tests (and available to downstream integration tests behind the
    //! `test-support` feature) in place of a real ECR/GCR/Docker Hub client.
    //! Counts every manifest/blob PUT and every mount attempt so tests can
    //! assert invariants like "blob PUT at most once per job" and "mount
    //! falls through on any non-201" directly.

    use std::collections::HashMap;
    use std::io::Read;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicU64, Ordering};

    use anyhow::{Result, bail};
    use freightliner_types::{Descriptor, Digest, Manifest, Qualifier};

    use super::{BlobMounter, Repository, RegistryClient, RepositoryCreator};

    #[derive(Debug, Default)]
    struct RepoState {
        tags: HashMap<String, Digest>,
        manifests: HashMap<String, Manifest>,
        blobs: HashMap<String, Vec<u8>>,
        referrers: HashMap<String, Vec<Descriptor>>,
        exists: bool,
    }

    type RepoTable = Arc<Mutex<HashMap<String, Arc<Mutex<RepoState>>>>>;

    /// An in-memory registry. `put_manifest_count`/`put_blob_count`/
    /// `mount_count` are process-wide counters shared across every
    /// repository handed out by this client, so a test can assert total PUT
    /// counts across an entire tree replication.
    #[derive(Debug)]
    pub struct MemoryRegistryClient {
        name: String,
        repos: RepoTable,
        put_manifest_count: Arc<AtomicU64>,
        put_blob_count: Arc<AtomicU64>,
        mount_count: Arc<AtomicU64>,
        mount_supported: bool,
        autocreate: bool,
        created_repos: Mutex<Vec<String>>,
        /// When `true`, repositories must be created via
        /// `RepositoryCreator::create_repository` before a manifest/blob can
        /// be pushed to them — emulating ECR's lack of autocreate.
        requires_explicit_create: bool,
    }

    impl MemoryRegistryClient {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                repos: Arc::new(Mutex::new(HashMap::new())),
                put_manifest_count: Arc::new(AtomicU64::new(0)),
                put_blob_count: Arc::new(AtomicU64::new(0)),
                mount_count: Arc::new(AtomicU64::new(0)),
                mount_supported: true,
                autocreate: true,
                created_repos: Mutex::new(Vec::new()),
                requires_explicit_create: false,
            }
        }

        pub fn without_mount_support(mut self) -> Self {
            self.mount_supported = false;
            self
        }

        /// Simulate ECR: repositories must be created explicitly before a
        /// manifest/blob can be pushed to them.
        pub fn requiring_explicit_create(mut self) -> Self {
            self.autocreate = false;
            self.requires_explicit_create = true;
            self
        }

        pub fn put_manifest_count(&self) -> u64 {
            self.put_manifest_count.load(Ordering::SeqCst)
        }

        pub fn put_blob_count(&self) -> u64 {
            self.put_blob_count.load(Ordering::SeqCst)
        }

        pub fn mount_count(&self) -> u64 {
            self.mount_count.load(Ordering::SeqCst)
        }

        pub fn created_repos(&self) -> Vec<String> {
            self.created_repos.lock().expect("poisoned").clone()
        }

        fn state_for(&self, path: &str) -> Arc<Mutex<RepoState>> {
            let mut guard = self.repos.lock().expect("poisoned");
            guard
                .entry(path.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(RepoState {
                        exists: self.autocreate,
                        ..RepoState::default()
                    }))
                })
                .clone()
        }

        fn handle(&self, path: &str) -> MemoryRepositoryHandle {
            MemoryRepositoryHandle {
                path: path.to_string(),
                state: self.state_for(path),
                siblings: self.repos.clone(),
                put_manifest_count: self.put_manifest_count.clone(),
                put_blob_count: self.put_blob_count.clone(),
                mount_count: self.mount_count.clone(),
                mount_supported: self.mount_supported,
            }
        }

        /// Seed a tag directly (bypassing PUT accounting), for setting up
        /// "source already has this content" test fixtures.
        pub fn seed_manifest(&self, path: &str, tag: &str, manifest: Manifest) {
            let state = self.state_for(path);
            let mut state = state.lock().expect("poisoned");
            state.exists = true;
            state.tags.insert(tag.to_string(), manifest.digest.clone());
            state.manifests.insert(manifest.digest.to_string(), manifest);
        }

        pub fn seed_blob(&self, path: &str, digest: Digest, bytes: Vec<u8>) {
            let state = self.state_for(path);
            let mut state = state.lock().expect("poisoned");
            state.exists = true;
            state.blobs.insert(digest.to_string(), bytes);
        }

        pub fn seed_referrers(&self, path: &str, subject: &Digest, referrers: Vec<Descriptor>) {
            let state = self.state_for(path);
            let mut state = state.lock().expect("poisoned");
            state.referrers.insert(subject.to_string(), referrers);
        }

        /// Corrupt a blob already present in a repository, to exercise the
        /// integrity-failure path of a registry that returns bytes not
        /// matching the requested digest.
        pub fn corrupt_blob(&self, path: &str, digest: &Digest) {
            let state = self.state_for(path);
            let mut state = state.lock().expect("poisoned");
            if let Some(bytes) = state.blobs.get_mut(&digest.to_string()) {
                bytes.push(0xff);
            }
        }
    }

    impl RegistryClient for MemoryRegistryClient {
        fn list_repositories(&self, prefix: &str) -> Result<Vec<String>> {
            let guard = self.repos.lock().expect("poisoned");
            let mut paths: Vec<String> = guard
                .keys()
                .filter(|p| prefix.is_empty() || p.starts_with(prefix))
                .cloned()
                .collect();
            paths.sort();
            Ok(paths)
        }

        fn get_repository(&self, path: &str) -> Result<Arc<dyn Repository>> {
            Ok(Arc::new(self.handle(path)) as Arc<dyn Repository>)
        }

        fn registry_name(&self) -> &str {
            &self.name
        }

        fn as_repository_creator(&self) -> Option<&dyn RepositoryCreator> {
            if self.requires_explicit_create { Some(self) } else { None }
        }
    }

    impl RepositoryCreator for MemoryRegistryClient {
        fn create_repository(&self, path: &str) -> Result<()> {
            let state = self.state_for(path);
            state.lock().expect("poisoned").exists = true;
            self.created_repos.lock().expect("poisoned").push(path.to_string());
            Ok(())
        }
    }

    /// Lightweight, cloneable handle into a [`MemoryRegistryClient`]'s
    /// shared repo table. Cheap to construct per `get_repository` call since
    /// the actual state lives behind `Arc<Mutex<RepoState>>`.
    #[derive(Debug)]
    struct MemoryRepositoryHandle {
        path: String,
        state: Arc<Mutex<RepoState>>,
        siblings: RepoTable,
        put_manifest_count: Arc<AtomicU64>,
        put_blob_count: Arc<AtomicU64>,
        mount_count: Arc<AtomicU64>,
        mount_supported: bool,
    }

    impl MemoryRepositoryHandle {
        fn require_exists(&self) -> Result<()> {
            if !self.state.lock().expect("poisoned").exists {
                bail!("repository {} does not exist (no autocreate, not yet created)", self.path);
            }
            Ok(())
        }

        fn resolve_digest(&self, qualifier: &Qualifier) -> Result<Digest> {
            match qualifier {
                Qualifier::Digest(d) => Ok(d.clone()),
                Qualifier::Tag(t) => {
                    let state = self.state.lock().expect("poisoned");
                    state
                        .tags
                        .get(t)
                        .cloned()
                        .ok_or_else(|| anyhow::anyhow!("tag not found: {t}"))
                }
            }
        }
    }

    impl Repository for MemoryRepositoryHandle {
        fn list_tags(&self) -> Result<Vec<String>> {
            let state = self.state.lock().expect("poisoned");
            let mut tags: Vec<String> = state.tags.keys().cloned().collect();
            tags.sort();
            Ok(tags)
        }

        fn get_manifest(&self, qualifier: &Qualifier) -> Result<Manifest> {
            let digest = self.resolve_digest(qualifier)?;
            let state = self.state.lock().expect("poisoned");
            state
                .manifests
                .get(&digest.to_string())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("manifest not found for digest {digest}"))
        }

        fn put_manifest(&self, tag: &str, manifest: &Manifest) -> Result<()> {
            self.require_exists()?;
            let mut state = self.state.lock().expect("poisoned");
            state.manifests.insert(manifest.digest.to_string(), manifest.clone());
            state.tags.insert(tag.to_string(), manifest.digest.clone());
            drop(state);
            self.put_manifest_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn head_manifest(&self, qualifier: &Qualifier) -> Result<Option<Descriptor>> {
            let digest = match self.resolve_digest(qualifier) {
                Ok(d) => d,
                Err(_) => return Ok(None),
            };
            let state = self.state.lock().expect("poisoned");
            Ok(state.manifests.get(&digest.to_string()).map(|m| Descriptor {
                media_type: m.media_type.clone(),
                digest: m.digest.clone(),
                size: m.raw_bytes.len() as u64,
                platform: None,
                annotations: Default::default(),
            }))
        }

        fn get_layer_reader(&self, digest: &Digest) -> Result<Box<dyn Read + Send>> {
            let state = self.state.lock().expect("poisoned");
            let bytes = state
                .blobs
                .get(&digest.to_string())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("blob not found for digest {digest}"))?;
            Ok(Box::new(std::io::Cursor::new(bytes)))
        }

        fn head_blob(&self, digest: &Digest) -> Result<bool> {
            let state = self.state.lock().expect("poisoned");
            Ok(state.blobs.contains_key(&digest.to_string()))
        }

        fn put_blob(&self, digest: &Digest, _size: u64, reader: &mut dyn Read) -> Result<()> {
            self.require_exists()?;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            let mut state = self.state.lock().expect("poisoned");
            state.blobs.insert(digest.to_string(), bytes);
            drop(state);
            self.put_blob_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn get_referrers(&self, subject: &Digest) -> Result<Vec<Descriptor>> {
            let state = self.state.lock().expect("poisoned");
            Ok(state.referrers.get(&subject.to_string()).cloned().unwrap_or_default())
        }

        fn as_blob_mounter(&self) -> Option<&dyn BlobMounter> {
            if self.mount_supported { Some(self) } else { None }
        }
    }

    impl BlobMounter for MemoryRepositoryHandle {
        fn mount_blob(&self, digest: &Digest, from_repo: &str) -> Result<bool> {
            if self.require_exists().is_err() {
                return Ok(false);
            }
            let source_state = {
                let siblings = self.siblings.lock().expect("poisoned");
                siblings.get(from_repo).cloned()
            };
            let Some(source_state) = source_state else {
                return Ok(false);
            };
            let bytes = {
                let source = source_state.lock().expect("poisoned");
                source.blobs.get(&digest.to_string()).cloned()
            };
            let Some(bytes) = bytes else {
                return Ok(false);
            };

            let mut state = self.state.lock().expect("poisoned");
            state.blobs.insert(digest.to_string(), bytes);
            drop(state);
            self.mount_count.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use freightliner_types::Qualifier;

        #[test]
        fn list_repositories_filters_by_prefix() {
            let client = MemoryRegistryClient::new("test.example.com");
            client.seed_manifest(
                "team/app",
                "1.0",
                Manifest {
                    raw_bytes: b"{}".to_vec(),
                    media_type: "application/vnd.oci.image.manifest.v1+json".into(),
                    digest: Digest::sha256_of(b"{}"),
                },
            );
            client.seed_manifest(
                "other/app",
                "1.0",
                Manifest {
                    raw_bytes: b"{}".to_vec(),
                    media_type: "application/vnd.oci.image.manifest.v1+json".into(),
                    digest: Digest::sha256_of(b"{}"),
                },
            );
            let repos = client.list_repositories("team/").unwrap();
            assert_eq!(repos, vec!["team/app".to_string()]);
        }

        #[test]
        fn put_blob_increments_shared_counter_across_repos() {
            let client = MemoryRegistryClient::new("test.example.com");
            let repo_a = client.get_repository("team/a").unwrap();
            let repo_b = client.get_repository("team/b").unwrap();
            let digest = Digest::sha256_of(b"layer");
            repo_a.put_blob(&digest, 5, &mut std::io::Cursor::new(b"layer".to_vec())).unwrap();
            repo_b.put_blob(&digest, 5, &mut std::io::Cursor::new(b"layer".to_vec())).unwrap();
            assert_eq!(client.put_blob_count(), 2);
        }

        #[test]
        fn head_manifest_returns_none_for_unknown_tag() {
            let client = MemoryRegistryClient::new("test.example.com");
            let repo = client.get_repository("team/a").unwrap();
            assert!(repo.head_manifest(&Qualifier::Tag("missing".into())).unwrap().is_none());
        }

        #[test]
        fn explicit_create_gate_blocks_push_until_created() {
            let client = MemoryRegistryClient::new("ecr.example.com").requiring_explicit_create();
            let repo = client.get_repository("team/a").unwrap();
            let manifest = Manifest {
                raw_bytes: b"{}".to_vec(),
                media_type: "application/vnd.oci.image.manifest.v1+json".into(),
                digest: Digest::sha256_of(b"{}"),
            };
            assert!(repo.put_manifest("1.0", &manifest).is_err());

            client.as_repository_creator().unwrap().create_repository("team/a").unwrap();
            assert!(repo.put_manifest("1.0", &manifest).is_ok());
            assert_eq!(client.created_repos(), vec!["team/a".to_string()]);
        }

        #[test]
        fn corrupt_blob_breaks_digest_equality_on_reread() {
            let client = MemoryRegistryClient::new("test.example.com");
            let repo = client.get_repository("team/a").unwrap();
            let digest = Digest::sha256_of(b"layer");
            repo.put_blob(&digest, 5, &mut std::io::Cursor::new(b"layer".to_vec())).unwrap();
            client.corrupt_blob("team/a", &digest);

            let mut buf = Vec::new();
            repo.get_layer_reader(&digest).unwrap().read_to_end(&mut buf).unwrap();
            assert_ne!(Digest::sha256_of(&buf), digest);
        }

        #[test]
        fn mount_without_support_reports_unsupported() {
            let client = MemoryRegistryClient::new("test.example.com").without_mount_support();
            let repo = client.get_repository("team/a").unwrap();
            assert!(repo.as_blob_mounter().is_none());
        }

        #[test]
        fn mount_succeeds_when_blob_present_in_source_repo() {
            let client = MemoryRegistryClient::new("test.example.com");
            let digest = Digest::sha256_of(b"shared-layer");
            client.seed_blob("team/source", digest.clone(), b"shared-layer".to_vec());

            let dst = client.get_repository("team/dest").unwrap();
            let mounted = dst
                .as_blob_mounter()
                .unwrap()
                .mount_blob(&digest, "team/source")
                .unwrap();
            assert!(mounted);
            assert!(dst.head_blob(&digest).unwrap());
            assert_eq!(client.mount_count(), 1);
            assert_eq!(client.put_blob_count(), 0, "a mount is not a PUT");
        }

        #[test]
        fn mount_falls_through_when_source_lacks_blob() {
            let client = MemoryRegistryClient::new("test.example.com");
            let dst = client.get_repository("team/dest").unwrap();
            let digest = Digest::sha256_of(b"absent");
            let mounted = dst
                .as_blob_mounter()
                .unwrap()
                .mount_blob(&digest, "team/source")
                .unwrap();
            assert!(!mounted);
        }
    }
}
