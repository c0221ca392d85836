//! ReplicationOptions filtering: tag include/exclude globs and
//! artifact allow/deny lists. Pure, side-effect-free predicates over
//! [`freightliner_types::ReplicationOptions`] so the scheduler and
//! ArtifactHandler can both consult the same logic.

use freightliner_types::{ArtifactType, ReplicationOptions};

/// Whether `tag` should be replicated under `opts`'s include/exclude globs.
/// Include-list empty means all; exclude wins over include.
pub fn tag_allowed(opts: &ReplicationOptions, tag: &str) -> bool {
    if matches_any(&opts.exclude_tags, tag) {
        return false;
    }
    if opts.include_tags.is_empty() {
        return true;
    }
    matches_any(&opts.include_tags, tag)
}

fn matches_any(patterns: &[String], candidate: &str) -> bool {
    patterns.iter().any(|pattern| glob_match(pattern, candidate))
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    match glob::Pattern::new(pattern) {
        Ok(p) => p.matches(candidate),
        // An unparsable pattern is treated as a literal string match rather
        // than a fatal configuration error deep in a per-tag filter.
        Err(_) => pattern == candidate,
    }
}

/// Artifact-type label string used for `allowed_types`/`denied_types`
/// matching: lowercase snake_case name of an [`ArtifactType`].
pub fn artifact_type_label(artifact_type: ArtifactType) -> &'static str {
    match artifact_type {
        ArtifactType::Signature => "signature",
        ArtifactType::Sbom => "sbom",
        ArtifactType::Attestation => "attestation",
        ArtifactType::Helm => "helm",
        ArtifactType::Wasm => "wasm",
        ArtifactType::MlModel => "ml_model",
        ArtifactType::Other => "other",
    }
}

/// Whether an artifact of `artifact_type` should be replicated under `opts`.
/// Denied wins; empty allow-list means all; signatures and SBOMs are gated
/// further by their own `include_signatures`/`include_sboms` booleans.
pub fn artifact_type_allowed(opts: &ReplicationOptions, artifact_type: ArtifactType) -> bool {
    let label = artifact_type_label(artifact_type);

    if opts.denied_types.iter().any(|d| d == label) {
        return false;
    }

    match artifact_type {
        ArtifactType::Signature if !opts.include_signatures => return false,
        ArtifactType::Sbom if !opts.include_sboms => return false,
        _ => {}
    }

    if opts.allowed_types.is_empty() {
        return true;
    }
    opts.allowed_types.iter().any(|a| a == label)
}
