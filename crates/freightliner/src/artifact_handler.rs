//! ArtifactHandler: the two pieces of graph-shaped work TagCopier
//! delegates out rather than inlining — recursing into a manifest list/index's
//! children, and discovering+copying a subject's referrers (signatures,
//! SBOMs, attestations, and other OCI artifact types).
//!
//! Neither function owns retry or cancellation policy; both run under the
//! same [`crate::tag_copier::CopyContext`] the caller already built, and
//! recurse back into [`crate::tag_copier::copy_manifest_graph`] so a child
//! manifest (or a referrer) gets exactly the same blob-copy/verify treatment
//! a top-level tag does.

use freightliner_types::{Descriptor, Digest, Manifest, Qualifier, RepositoryRef};

use crate::error::FreightlinerError;
use crate::filters::artifact_type_allowed;
use crate::registry::Repository;
use crate::tag_copier::{self, CopyContext};

/// Copy every child manifest of an index, bounded by
/// `ctx.opts.max_concurrent_transfers` in flight at a time — mirroring the
/// per-tag blob concurrency limit, since an index's children are exactly as
/// independent as a manifest's blobs are. The index manifest itself is
/// pushed by the caller once every child has been verified present at the
/// destination: the index is only pushed after every child succeeds.
pub(crate) fn copy_index(
    ctx: &CopyContext,
    src_repo: &dyn Repository,
    dst_repo: &dyn Repository,
    src_repo_ref: &RepositoryRef,
    dst_repo_ref: &RepositoryRef,
    manifest: &Manifest,
    depth: u32,
    mountable: bool,
) -> Result<(), FreightlinerError> {
    let children = tag_copier::parse_index_children(manifest)?;
    let chunk_size = ctx.opts.max_concurrent_transfers.max(1);

    for chunk in children.chunks(chunk_size) {
        std::thread::scope(|scope| -> Result<(), FreightlinerError> {
            let handles: Vec<_> = chunk
                .iter()
                .map(|child| {
                    scope.spawn(move || {
                        let push_ref = child.digest.to_string();
                        tag_copier::copy_manifest_graph(
                            ctx,
                            src_repo,
                            dst_repo,
                            src_repo_ref,
                            dst_repo_ref,
                            &Qualifier::Digest(child.digest.clone()),
                            &push_ref,
                            depth + 1,
                            mountable,
                        )
                        .map(|_| ())
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("index child copy thread panicked")?;
            }
            Ok(())
        })?;
    }

    Ok(())
}

/// Query the source's referrers API for `subject` and copy every referrer
/// that survives the artifact-type filters (`include_signatures`,
/// `include_sboms`, `allowed_types`/`denied_types`). A source that doesn't
/// advertise the Referrers API returns an empty list rather than an error,
/// so this never fails on that account alone.
pub(crate) fn copy_referrers(
    ctx: &CopyContext,
    src_repo: &dyn Repository,
    dst_repo: &dyn Repository,
    src_repo_ref: &RepositoryRef,
    dst_repo_ref: &RepositoryRef,
    subject: &Digest,
    mountable: bool,
) -> Result<Vec<Digest>, FreightlinerError> {
    let referrers: Vec<Descriptor> = src_repo
        .get_referrers(subject)
        .map_err(|e| FreightlinerError::SourceNotFound(e.to_string()))?;

    let mut copied = Vec::new();
    for referrer in referrers {
        let artifact_type = tag_copier::classify(&referrer.media_type);
        if !artifact_type_allowed(ctx.opts, artifact_type) {
            continue;
        }
        let push_ref = referrer.digest.to_string();
        let digest = tag_copier::copy_manifest_graph(
            ctx,
            src_repo,
            dst_repo,
            src_repo_ref,
            dst_repo_ref,
            &Qualifier::Digest(referrer.digest.clone()),
            &push_ref,
            0,
            mountable,
        )?;
        copied.push(digest);
    }
    Ok(copied)
}
