//! `freightliner`: the command-line front end for the replication engine.
//!
//! Thin by design — every subcommand here does argument parsing, config-file
//! merging, and output formatting, then hands off to
//! [`freightliner::TreeReplicator`] or [`serve::run`]. None of the copy logic,
//! retry policy, or checkpoint semantics live in this crate.

mod config;
mod progress;
mod registry_binding;
mod serve;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use freightliner::CancellationToken;
use freightliner::reporter::EventLog;
use freightliner_retry::{RetryExecutor, RetryPolicy};
use freightliner_types::{ReplicationOptions, TreeReport};

use progress::ProgressReporter;

const DEFAULT_CHECKPOINT_DIR: &str = ".freightliner-state";

#[derive(Parser, Debug)]
#[command(name = "freightliner", version, about = "Replicates OCI repository trees between registries")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replicate every discovered tag under `<src>` into `<dst>`.
    ReplicateTree {
        /// `<scheme>://<registry>[/<repo-prefix>]`, e.g. `memory://src-registry/team/`.
        src: String,
        /// `<scheme>://<registry>[/<repo-prefix>]`, e.g. `memory://dst-registry/team/`.
        dst: String,

        /// Number of concurrent tag workers (overrides `.freightliner.toml`).
        #[arg(long)]
        workers: Option<usize>,

        /// Persist and resume progress via an on-disk checkpoint.
        #[arg(long)]
        checkpoint: bool,

        /// Directory holding checkpoint and event-log files.
        #[arg(long, default_value = DEFAULT_CHECKPOINT_DIR)]
        checkpoint_dir: PathBuf,

        /// Resume a previously started job by its checkpoint id.
        #[arg(long)]
        resume_id: Option<String>,

        /// Discover and report, but never push manifests or blobs.
        #[arg(long)]
        dry_run: bool,

        /// Only replicate tags matching this glob (repeatable).
        #[arg(long = "include-tag")]
        include_tag: Vec<String>,

        /// Never replicate tags matching this glob (repeatable, wins over include).
        #[arg(long = "exclude-tag")]
        exclude_tag: Vec<String>,

        /// Retry policy for transport errors: default, aggressive, or conservative
        /// (overrides `.freightliner.toml`, whose own default is "default").
        #[arg(long)]
        retry_policy: Option<RetryPolicyArg>,

        /// Directory to look for `.freightliner.toml` in.
        #[arg(long, default_value = ".")]
        config_dir: PathBuf,

        /// Never draw a progress spinner, even on a TTY.
        #[arg(long)]
        no_progress: bool,
    },

    /// Serve `/healthz` and a Prometheus `/metrics` endpoint.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Defaults to the same port as `--port` (combined handler).
        #[arg(long)]
        metrics_port: Option<u16>,
    },

    /// Print the CLI's own version and exit.
    Version,

    /// Print a shell completion script to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RetryPolicyArg {
    Default,
    Aggressive,
    Conservative,
}

impl From<RetryPolicyArg> for RetryPolicy {
    fn from(value: RetryPolicyArg) -> Self {
        match value {
            RetryPolicyArg::Default => RetryPolicy::Default,
            RetryPolicyArg::Aggressive => RetryPolicy::Aggressive,
            RetryPolicyArg::Conservative => RetryPolicy::Conservative,
        }
    }
}

fn parse_retry_policy(name: &str) -> Result<RetryPolicy> {
    match name.to_ascii_lowercase().as_str() {
        "default" => Ok(RetryPolicy::Default),
        "aggressive" => Ok(RetryPolicy::Aggressive),
        "conservative" => Ok(RetryPolicy::Conservative),
        other => bail!("unknown retry policy {other:?}: expected default, aggressive, or conservative"),
    }
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.cmd {
        Commands::ReplicateTree {
            src,
            dst,
            workers,
            checkpoint,
            checkpoint_dir,
            resume_id,
            dry_run,
            include_tag,
            exclude_tag,
            retry_policy,
            config_dir,
            no_progress,
        } => run_replicate_tree(
            ReplicateTreeArgs {
                src,
                dst,
                workers,
                checkpoint,
                checkpoint_dir,
                resume_id,
                dry_run,
                include_tag,
                exclude_tag,
                retry_policy,
                config_dir,
                no_progress,
            },
        ),
        Commands::Serve { port, metrics_port } => run_serve(port, metrics_port),
        Commands::Version => {
            println!("Freightliner {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(0)
        }
    }
}

struct ReplicateTreeArgs {
    src: String,
    dst: String,
    workers: Option<usize>,
    checkpoint: bool,
    checkpoint_dir: PathBuf,
    resume_id: Option<String>,
    dry_run: bool,
    include_tag: Vec<String>,
    exclude_tag: Vec<String>,
    retry_policy: Option<RetryPolicyArg>,
    config_dir: PathBuf,
    no_progress: bool,
}

fn install_ctrlc_handler(cancel: CancellationToken) -> Result<()> {
    ctrlc::set_handler(move || cancel.cancel()).context("failed to install Ctrl+C handler")
}

fn run_replicate_tree(args: ReplicateTreeArgs) -> Result<i32> {
    let cancel = CancellationToken::new();
    install_ctrlc_handler(cancel.clone())?;

    let (src_client, src_prefix) =
        registry_binding::resolve_with_prefix(&args.src).context("resolving source registry")?;
    let (dst_client, dst_prefix) =
        registry_binding::resolve_with_prefix(&args.dst).context("resolving destination registry")?;

    let file_config = config::load_config(&args.config_dir)?;
    let mut opts = ReplicationOptions::default();
    file_config.replication.apply(&mut opts)?;

    if let Some(workers) = args.workers {
        opts.workers = workers;
    }
    if args.dry_run {
        opts.dry_run = true;
    }
    if !args.include_tag.is_empty() {
        opts.include_tags = args.include_tag;
    }
    if !args.exclude_tag.is_empty() {
        opts.exclude_tags = args.exclude_tag;
    }
    opts.enable_checkpoint = args.checkpoint || args.resume_id.is_some();
    opts.resume_id = args.resume_id;

    let retry_policy = match args.retry_policy {
        Some(cli_policy) => RetryPolicy::from(cli_policy),
        None => match &file_config.retry.policy {
            Some(name) => parse_retry_policy(name)?,
            None => RetryPolicy::Default,
        },
    };

    let replicator = freightliner::TreeReplicator::new(
        src_client,
        dst_client,
        opts,
        cancel.clone(),
        RetryExecutor::from_policy(retry_policy),
        RetryExecutor::from_policy(retry_policy),
    );

    let mut reporter = if args.no_progress { ProgressReporter::silent() } else { ProgressReporter::new() };
    let mut events = EventLog::new();

    let start = Instant::now();
    let report = replicator
        .replicate(&src_prefix, &dst_prefix, &args.checkpoint_dir, &mut reporter, &mut events)
        .map_err(anyhow::Error::from)
        .context("replication failed before any tag could be scheduled")?;
    reporter.finish();

    let events_path = freightliner::reporter::events_path(&args.checkpoint_dir);
    events.write_to_file(&events_path).context("failed to persist event log")?;

    print_report(&report, start.elapsed());

    if cancel.is_cancelled() {
        Ok(130)
    } else if report.tags_failed > 0 {
        Ok(2)
    } else {
        Ok(0)
    }
}

fn run_serve(port: u16, metrics_port: Option<u16>) -> Result<i32> {
    let cancel = CancellationToken::new();
    install_ctrlc_handler(cancel.clone())?;
    serve::run(port, metrics_port.unwrap_or(port), cancel)?;
    Ok(0)
}

fn print_report(report: &TreeReport, elapsed: std::time::Duration) {
    println!("job_id: {}", report.job_id);
    println!(
        "repositories: {}/{} completed",
        report.repositories_completed, report.repositories_discovered
    );
    println!(
        "tags: {} copied, {} skipped, {} failed ({:?})",
        report.tags_copied, report.tags_skipped, report.tags_failed, elapsed
    );

    if !report.per_repo_reports.is_empty() {
        println!();
        for repo in &report.per_repo_reports {
            println!(
                "  {}: {} copied, {} skipped, {} failed",
                repo.repo, repo.tags_copied, repo.tags_skipped, repo.tags_failed
            );
            for failed in &repo.failed_tags {
                println!(
                    "    {} FAILED: {}",
                    failed.tag,
                    failed.error_message.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_retry_policy_accepts_known_names_case_insensitively() {
        assert!(matches!(parse_retry_policy("Default").unwrap(), RetryPolicy::Default));
        assert!(matches!(parse_retry_policy("AGGRESSIVE").unwrap(), RetryPolicy::Aggressive));
        assert!(matches!(parse_retry_policy("conservative").unwrap(), RetryPolicy::Conservative));
    }

    #[test]
    fn parse_retry_policy_rejects_unknown_names() {
        assert!(parse_retry_policy("turbo").is_err());
    }

    #[test]
    fn cli_parses_replicate_tree_with_repeated_tag_filters() {
        let cli = Cli::parse_from([
            "freightliner",
            "replicate-tree",
            "memory://src/team/",
            "memory://dst/team/",
            "--include-tag",
            "v*",
            "--include-tag",
            "release-*",
            "--exclude-tag",
            "*-rc*",
            "--checkpoint",
            "--workers",
            "4",
        ]);
        let Commands::ReplicateTree { include_tag, exclude_tag, checkpoint, workers, .. } = cli.cmd else {
            panic!("expected ReplicateTree");
        };
        assert_eq!(include_tag, vec!["v*".to_string(), "release-*".to_string()]);
        assert_eq!(exclude_tag, vec!["*-rc*".to_string()]);
        assert!(checkpoint);
        assert_eq!(workers, Some(4));
    }

    #[test]
    fn cli_parses_serve_with_default_ports() {
        let cli = Cli::parse_from(["freightliner", "serve"]);
        let Commands::Serve { port, metrics_port } = cli.cmd else {
            panic!("expected Serve");
        };
        assert_eq!(port, 8080);
        assert_eq!(metrics_port, None);
    }
}
