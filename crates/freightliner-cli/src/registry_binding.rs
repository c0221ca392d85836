//! Resolves a `--src`/`--dst` registry argument to a concrete
//! [`freightliner::registry::RegistryClient`].
//!
//! Per-backend registry client implementations (ECR, GCR, Docker Hub, GHCR,
//! ACR, Harbor, Quay, generic v2) are abstracted entirely behind the
//! `RegistryClient` / `Repository` capability surface; binding a real one is
//! the responsibility of whatever embeds the engine. This CLI ships only
//! the `memory://` scheme, backed by the engine's in-memory test double, so
//! `replicate-tree` is runnable end-to-end without a live registry for
//! smoke-testing and demonstration.
//!
//! A production deployment links in its own adapter crate implementing
//! these traits and extends [`resolve`] (or bypasses this CLI entirely and
//! embeds [`freightliner::TreeReplicator`] directly) to reach a real
//! registry.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use freightliner::registry::RegistryClient;
use freightliner::registry::test_support::MemoryRegistryClient;

/// Parse a `<scheme>://<name>` argument and hand back the bound client.
pub fn resolve(arg: &str) -> Result<Arc<dyn RegistryClient>> {
    let (scheme, rest) = arg
        .split_once("://")
        .with_context(|| format!("registry argument must be `<scheme>://<name>`, got {arg:?}"))?;

    match scheme {
        "memory" => Ok(Arc::new(MemoryRegistryClient::new(rest)) as Arc<dyn RegistryClient>),
        other => bail!(
            "unsupported registry scheme {other:?}: only `memory://` ships with this CLI; \
             bind a real RegistryClient adapter (ECR/GCR/Docker Hub/ACR/Harbor/Quay/generic v2) \
             by embedding freightliner::TreeReplicator directly"
        ),
    }
}

/// Parse a `replicate-tree` positional argument of the form
/// `<scheme>://<registry-name>[/<repository-prefix>]` into a bound client and
/// the repository-path prefix `TreeReplicator::replicate` discovers under.
/// The prefix is everything past the first `/` following the registry name,
/// so `memory://src-registry/team/` discovers repositories under `team/`
/// while `memory://src-registry` discovers the whole registry.
pub fn resolve_with_prefix(arg: &str) -> Result<(Arc<dyn RegistryClient>, String)> {
    let (scheme, rest) = arg
        .split_once("://")
        .with_context(|| format!("registry argument must be `<scheme>://<name>[/<prefix>]`, got {arg:?}"))?;

    let (name, prefix) = match rest.split_once('/') {
        Some((name, prefix)) => (name, prefix.to_string()),
        None => (rest, String::new()),
    };

    let client = resolve(&format!("{scheme}://{name}"))?;
    Ok((client, prefix))
}
