//! Per-destination-repo seen-digest set (invariant: a blob is uploaded at
//! most once per destination repository per job; guarded by a mutex or
//! a concurrent map. Entry is promoted to seen only after a successful HEAD
//! or PUT.").
//!
//! One [`SeenDigests`] is shared by every blob sub-task copying into a given
//! destination repository within a job; [`SeenRegistry`] hands out (and
//! caches) one per `dst_repo` so index children that share a layer elide the
//! second upload even across recursive [`crate::tag_copier::TagCopier`] calls.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use freightliner_types::{Digest, RepositoryRef};

/// Concurrent set of digests already known present at one destination
/// repository. `mark_seen` returns whether the digest was newly inserted so
/// callers can distinguish "I am the one who should upload this" from
/// "someone else already did."
#[derive(Debug, Default)]
pub struct SeenDigests {
    inner: Mutex<BTreeSet<String>>,
}

impl SeenDigests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.inner.lock().expect("seen-set mutex poisoned").contains(digest.to_string().as_str())
    }

    /// Mark `digest` seen. Returns `true` if this call was the one that
    /// inserted it (i.e. the caller owns the upload), `false` if another
    /// caller already marked it.
    pub fn mark_seen(&self, digest: &Digest) -> bool {
        self.inner
            .lock()
            .expect("seen-set mutex poisoned")
            .insert(digest.to_string())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("seen-set mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hands out one [`SeenDigests`] per destination repository for the lifetime
/// of a job, so concurrent tag/blob workers targeting the same repo share
/// dedup state, shared by all blob sub-tasks of that repo.
#[derive(Debug, Default, Clone)]
pub struct SeenRegistry {
    per_repo: Arc<Mutex<HashMap<RepositoryRef, Arc<SeenDigests>>>>,
}

impl SeenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_repo(&self, repo: &RepositoryRef) -> Arc<SeenDigests> {
        let mut guard = self.per_repo.lock().expect("seen-registry mutex poisoned");
        guard.entry(repo.clone()).or_insert_with(|| Arc::new(SeenDigests::new())).clone()
    }
}
