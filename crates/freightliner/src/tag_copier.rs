//! TagCopier: copies one tag's manifest graph from a source repository to a
//! destination repository. Dispatches on the fetched manifest's media type —
//! a plain image manifest is copied blob-by-blob here; a manifest list/index
//! is delegated to [`crate::artifact_handler::copy_index`], which recurses
//! back into [`copy_manifest_graph`] for each child, one level deep.
//!
//! Every tag submitted by the scheduler runs through exactly one
//! [`copy_tag`] call; the worker wraps that call in its own
//! [`freightliner_retry::RetryExecutor`] to retry the whole tag on a
//! transport-level failure, while `copy_manifest_graph`'s own network calls
//! are each individually wrapped via [`crate::retry_support::retry_op`],
//! which retries each network operation within the copy independently.

use std::io::{Cursor, Read};
use std::time::Instant;

use freightliner_retry::RetryExecutor;
use freightliner_types::{
    ArtifactType, Descriptor, Digest, ErrorClass, MediaTypeClass, Manifest, Qualifier,
    ReplicationOptions, RepositoryRef,
};
use serde::Deserialize;

use crate::artifact_handler;
use crate::cancellation::CancellationToken;
use crate::error::FreightlinerError;
use crate::registry::{Repository, RegistryClient, same_tenant};
use crate::retry_support::retry_op;
use crate::seen_set::{SeenDigests, SeenRegistry};

/// An index-of-indices is rejected as `Unsupported`: recursion is bounded to
/// a single level, index → manifest.
pub const MAX_INDEX_DEPTH: u32 = 1;

/// Shared, read-only state every tag/blob/child-manifest copy in a job
/// consults. Cheap to construct per worker since everything behind it is an
/// `Arc` or a borrow.
pub struct CopyContext<'a> {
    pub opts: &'a ReplicationOptions,
    pub retry: &'a RetryExecutor,
    pub cancel: &'a CancellationToken,
    pub seen: &'a SeenRegistry,
}

/// What a tag copy (or, recursively, a child-manifest copy) produced, absent
/// the bookkeeping fields (`repo`, `tag`, `attempts`, `duration_ms`) only the
/// caller that owns retry/timing can fill in.
pub struct CopyResult {
    pub status: CopyStatus,
    pub src_digest: Option<Digest>,
    pub dst_digest: Option<Digest>,
}

pub enum CopyStatus {
    Copied,
    Skipped,
}

#[derive(Deserialize)]
struct RawDescriptor {
    #[serde(rename = "mediaType")]
    media_type: String,
    digest: String,
    size: u64,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    config: Option<RawDescriptor>,
    #[serde(default)]
    layers: Option<Vec<RawDescriptor>>,
}

#[derive(Deserialize)]
pub(crate) struct RawIndex {
    pub(crate) manifests: Vec<RawDescriptor>,
}

impl RawDescriptor {
    fn into_descriptor(self) -> Result<Descriptor, FreightlinerError> {
        let digest = Digest::parse(&self.digest)
            .map_err(|e| FreightlinerError::Internal(format!("malformed descriptor digest: {e}")))?;
        Ok(Descriptor {
            media_type: self.media_type,
            digest,
            size: self.size,
            platform: None,
            annotations: Default::default(),
        })
    }
}

pub(crate) fn parse_index_children(manifest: &Manifest) -> Result<Vec<Descriptor>, FreightlinerError> {
    let raw: RawIndex = serde_json::from_slice(&manifest.raw_bytes)
        .map_err(|e| FreightlinerError::Internal(format!("malformed index manifest json: {e}")))?;
    raw.manifests.into_iter().map(RawDescriptor::into_descriptor).collect()
}

/// Turn a reference string (a tag, or a digest rendered as `sha256:<hex>`)
/// into the `Qualifier` a post-push HEAD verify should use.
fn qualifier_for_ref(reference: &str) -> Qualifier {
    match Digest::parse(reference) {
        Ok(d) => Qualifier::Digest(d),
        Err(_) => Qualifier::Tag(reference.to_string()),
    }
}

fn to_engine_error(err: anyhow::Error, class: ErrorClass) -> FreightlinerError {
    match class {
        ErrorClass::SourceNotFound => FreightlinerError::SourceNotFound(err.to_string()),
        ErrorClass::DestinationUnreachable => FreightlinerError::DestinationUnreachable(err.to_string()),
        _ => FreightlinerError::Internal(err.to_string()),
    }
}

/// Top-level entry point invoked once per submitted `TagTask`.
pub fn copy_tag(
    ctx: &CopyContext,
    src_client: &dyn RegistryClient,
    dst_client: &dyn RegistryClient,
    src_repo: &RepositoryRef,
    dst_repo: &RepositoryRef,
    tag: &str,
) -> Result<CopyResult, FreightlinerError> {
    if ctx.cancel.is_cancelled() {
        return Err(FreightlinerError::Canceled);
    }

    let src_repository = src_client
        .get_repository(&src_repo.repository_path)
        .map_err(|e| to_engine_error(e, ErrorClass::SourceNotFound))?;
    let dst_repository = dst_client
        .get_repository(&dst_repo.repository_path)
        .map_err(|e| to_engine_error(e, ErrorClass::DestinationUnreachable))?;

    let src_desc = retry_op(ctx.retry, ctx.cancel, || {
        src_repository
            .head_manifest(&Qualifier::Tag(tag.to_string()))
            .map_err(|e| to_engine_error(e, ErrorClass::SourceNotFound))
    })?
    .ok_or_else(|| FreightlinerError::SourceNotFound(format!("tag not found: {src_repo}:{tag}")))?;

    let already_in_sync = if ctx.opts.skip_existing {
        let dst_desc = retry_op(ctx.retry, ctx.cancel, || {
            dst_repository
                .head_manifest(&Qualifier::Tag(tag.to_string()))
                .map_err(|e| to_engine_error(e, ErrorClass::DestinationUnreachable))
        })?;
        dst_desc.map(|d| d.digest == src_desc.digest).unwrap_or(false)
    } else {
        false
    };

    if ctx.opts.dry_run {
        // "Runs through discovery and digest comparison but never initiates
        // an upload" — report what would happen without doing it.
        return Ok(CopyResult {
            status: CopyStatus::Skipped,
            src_digest: Some(src_desc.digest),
            dst_digest: None,
        });
    }

    let mountable = ctx.opts.enable_mount && same_tenant(src_client, dst_client);

    let pushed_digest = if already_in_sync {
        src_desc.digest.clone()
    } else {
        copy_manifest_graph(
            ctx,
            &*src_repository,
            &*dst_repository,
            src_repo,
            dst_repo,
            &Qualifier::Tag(tag.to_string()),
            tag,
            0,
            mountable,
        )?
    };

    // Referrers are re-checked even when the subject is already in sync: new
    // signatures/SBOMs can be attached to an unchanged manifest after the
    // fact.
    if ctx.opts.include_referrers {
        artifact_handler::copy_referrers(
            ctx,
            &*src_repository,
            &*dst_repository,
            src_repo,
            dst_repo,
            &pushed_digest,
            mountable,
        )?;
    }

    Ok(CopyResult {
        status: if already_in_sync { CopyStatus::Skipped } else { CopyStatus::Copied },
        src_digest: Some(src_desc.digest),
        dst_digest: Some(pushed_digest),
    })
}

/// Fetch, classify, copy (blobs or recursively, children) and push one
/// manifest, then verify it's retrievable at `push_ref` with the digest
/// unchanged. Used for both the top-level tag (`depth == 0`, `push_ref` is
/// the tag name) and index children (`depth == 1`, `push_ref` is the child's
/// own digest).
pub(crate) fn copy_manifest_graph(
    ctx: &CopyContext,
    src_repo: &dyn Repository,
    dst_repo: &dyn Repository,
    src_repo_ref: &RepositoryRef,
    dst_repo_ref: &RepositoryRef,
    fetch: &Qualifier,
    push_ref: &str,
    depth: u32,
    mountable: bool,
) -> Result<Digest, FreightlinerError> {
    if ctx.cancel.is_cancelled() {
        return Err(FreightlinerError::Canceled);
    }

    let manifest = retry_op(ctx.retry, ctx.cancel, || {
        src_repo.get_manifest(fetch).map_err(|e| to_engine_error(e, ErrorClass::SourceNotFound))
    })?;

    match manifest.class() {
        MediaTypeClass::Index => {
            if depth >= MAX_INDEX_DEPTH {
                return Err(FreightlinerError::Unsupported(
                    "nested image index (index-of-indices) is not supported".to_string(),
                ));
            }
            artifact_handler::copy_index(
                ctx,
                src_repo,
                dst_repo,
                src_repo_ref,
                dst_repo_ref,
                &manifest,
                depth,
                mountable,
            )?;
        }
        MediaTypeClass::Image | MediaTypeClass::Artifact => {
            copy_blobs(ctx, src_repo, dst_repo, src_repo_ref, dst_repo_ref, &manifest, mountable)?;
        }
        MediaTypeClass::Unknown => {
            return Err(FreightlinerError::Unsupported(manifest.media_type.clone()));
        }
    }

    retry_op(ctx.retry, ctx.cancel, || {
        dst_repo
            .put_manifest(push_ref, &manifest)
            .map_err(|e| to_engine_error(e, ErrorClass::DestinationUnreachable))
    })?;

    let verify_qualifier = qualifier_for_ref(push_ref);
    let dst_desc = retry_op(ctx.retry, ctx.cancel, || {
        dst_repo
            .head_manifest(&verify_qualifier)
            .map_err(|e| to_engine_error(e, ErrorClass::DestinationUnreachable))
    })?
    .ok_or_else(|| {
        FreightlinerError::Internal(format!("post-verify HEAD returned nothing for {push_ref}"))
    })?;

    if dst_desc.digest != manifest.digest {
        return Err(FreightlinerError::IntegrityFailure(format!(
            "post-verify digest mismatch for {push_ref}: expected {}, got {}",
            manifest.digest, dst_desc.digest
        )));
    }

    Ok(manifest.digest)
}

fn copy_blobs(
    ctx: &CopyContext,
    src_repo: &dyn Repository,
    dst_repo: &dyn Repository,
    src_repo_ref: &RepositoryRef,
    dst_repo_ref: &RepositoryRef,
    manifest: &Manifest,
    mountable: bool,
) -> Result<(), FreightlinerError> {
    let raw: RawManifest = serde_json::from_slice(&manifest.raw_bytes)
        .map_err(|e| FreightlinerError::Internal(format!("malformed manifest json: {e}")))?;

    let mut descriptors = Vec::new();
    if let Some(config) = raw.config {
        descriptors.push(config.into_descriptor()?);
    }
    if ctx.opts.include_layers {
        for layer in raw.layers.unwrap_or_default() {
            descriptors.push(layer.into_descriptor()?);
        }
    }

    let seen = ctx.seen.for_repo(dst_repo_ref);
    let chunk_size = ctx.opts.max_concurrent_transfers.max(1);

    for chunk in descriptors.chunks(chunk_size) {
        std::thread::scope(|scope| -> Result<(), FreightlinerError> {
            let handles: Vec<_> = chunk
                .iter()
                .map(|d| {
                    scope.spawn(|| {
                        transfer_one_blob(ctx, src_repo, dst_repo, src_repo_ref, &seen, d, mountable)
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("blob transfer thread panicked")?;
            }
            Ok(())
        })?;
    }

    Ok(())
}

fn transfer_one_blob(
    ctx: &CopyContext,
    src_repo: &dyn Repository,
    dst_repo: &dyn Repository,
    src_repo_ref: &RepositoryRef,
    seen: &SeenDigests,
    descriptor: &Descriptor,
    mountable: bool,
) -> Result<(), FreightlinerError> {
    if ctx.cancel.is_cancelled() {
        return Err(FreightlinerError::Canceled);
    }

    let digest = &descriptor.digest;
    if seen.contains(digest) {
        return Ok(());
    }

    let exists = retry_op(ctx.retry, ctx.cancel, || {
        dst_repo.head_blob(digest).map_err(|e| to_engine_error(e, ErrorClass::DestinationUnreachable))
    })?;
    if exists {
        seen.mark_seen(digest);
        return Ok(());
    }

    if mountable {
        if let Some(mounter) = dst_repo.as_blob_mounter() {
            let mounted = retry_op(ctx.retry, ctx.cancel, || {
                mounter
                    .mount_blob(digest, &src_repo_ref.repository_path)
                    .map_err(|e| to_engine_error(e, ErrorClass::DestinationUnreachable))
            })?;
            if mounted {
                seen.mark_seen(digest);
                return Ok(());
            }
        }
    }

    retry_op(ctx.retry, ctx.cancel, || transfer_blob_once(ctx, src_repo, dst_repo, descriptor))?;
    seen.mark_seen(digest);
    Ok(())
}

fn transfer_blob_once(
    ctx: &CopyContext,
    src_repo: &dyn Repository,
    dst_repo: &dyn Repository,
    descriptor: &Descriptor,
) -> Result<(), FreightlinerError> {
    let mut reader = src_repo
        .get_layer_reader(&descriptor.digest)
        .map_err(|e| to_engine_error(e, ErrorClass::SourceNotFound))?;

    if ctx.opts.verify_digests {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| FreightlinerError::SourceNotFound(e.to_string()))?;
        let computed = Digest::sha256_of(&bytes);
        if computed != descriptor.digest {
            return Err(FreightlinerError::IntegrityFailure(format!(
                "blob {}: computed digest {computed} does not match",
                descriptor.digest
            )));
        }
        dst_repo
            .put_blob(&descriptor.digest, descriptor.size, &mut Cursor::new(bytes))
            .map_err(|e| to_engine_error(e, ErrorClass::DestinationUnreachable))
    } else {
        dst_repo
            .put_blob(&descriptor.digest, descriptor.size, &mut *reader)
            .map_err(|e| to_engine_error(e, ErrorClass::DestinationUnreachable))
    }
}

/// Whether `artifact_type` gates on the include flags, exposed for
/// `artifact_handler`'s referrer filtering.
pub(crate) fn classify(media_type: &str) -> ArtifactType {
    freightliner_types::classify_artifact_type(media_type)
}
