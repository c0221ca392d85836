//! TTY-aware [`Reporter`] implementation: an indicatif spinner when stdout is
//! a terminal, plain `[info]`/`[warn]`/`[error]` lines on stderr otherwise
//! (CI logs, piped output). The replication engine doesn't report a total
//! tag count up front — discovery and scheduling interleave — so this is a
//! spinner rather than a bounded progress bar.

use std::time::Instant;

use freightliner::Reporter;
use indicatif::{ProgressBar, ProgressStyle};

pub fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

pub struct ProgressReporter {
    bar: Option<ProgressBar>,
    start: Instant,
    tags_seen: u64,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = if is_tty() {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner} {elapsed_precise} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };
        Self { bar, start: Instant::now(), tags_seen: 0 }
    }

    /// Creates a reporter that never draws a bar, for piped/non-interactive
    /// output regardless of the actual TTY state (tests, `--no-progress`).
    pub fn silent() -> Self {
        Self { bar: None, start: Instant::now(), tags_seen: 0 }
    }

    fn emit(&mut self, prefix: &str, msg: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("[{prefix}] {msg}"));
        } else {
            eprintln!("[{prefix}] {msg}");
        }
    }

    pub fn finish(self) {
        let elapsed = self.start.elapsed();
        if let Some(bar) = self.bar {
            bar.finish_with_message(format!("done in {elapsed:?} ({} tags reported)", self.tags_seen));
        } else {
            eprintln!("done in {elapsed:?} ({} tags reported)", self.tags_seen);
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ProgressReporter {
    fn info(&mut self, msg: &str) {
        if msg.contains(':') && !msg.starts_with("discover") {
            self.tags_seen += 1;
        }
        self.emit("info", msg);
    }

    fn warn(&mut self, msg: &str) {
        self.emit("warn", msg);
    }

    fn error(&mut self, msg: &str) {
        self.emit("error", msg);
    }
}
