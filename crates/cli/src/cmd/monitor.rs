//! Watch paths and print events as they arrive
//!
//! Callbacks run on the main thread, which iterates a [`MainContext`]; the
//! backends run on a small tokio runtime that also listens for Ctrl-C.

use crate::output::{EventRecord, Format};
use crate::settings::{self, BackendArg, Overrides};
use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::Args;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use watcher::{MainContext, Monitor, MonitorEngine, WatchFlags};

/// How long one context iteration waits before re-checking exit conditions
const TICK: Duration = Duration::from_millis(100);

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Paths to watch; existing directories are watched as directories
    paths: Vec<PathBuf>,

    /// Watch a directory
    #[arg(short = 'd', long = "dir", value_name = "PATH")]
    dirs: Vec<PathBuf>,

    /// Watch a single file
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Report renames inside a directory as RENAMED / MOVED_IN / MOVED_OUT
    #[arg(long)]
    moves: bool,

    /// Report paired moves as MOVED
    #[arg(long)]
    send_moved: bool,

    /// Report UNMOUNT of the watched path
    #[arg(long)]
    mounts: bool,

    /// Report changes made through other hard links of a watched file
    #[arg(long)]
    hard_links: bool,

    /// Quiet window for CHANGED coalescing in milliseconds
    #[arg(long, value_name = "MS")]
    rate_limit: Option<u64>,

    /// Backend to use
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Config file (default: $XDG_CONFIG_HOME/fsmon/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,

    /// Exit after this many events
    #[arg(long, value_name = "N")]
    count: Option<usize>,

    /// Exit after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

impl MonitorArgs {
    fn flags(&self) -> WatchFlags {
        let mut flags = WatchFlags::empty();
        if self.moves {
            flags |= WatchFlags::WATCH_MOVES;
        }
        if self.send_moved {
            flags |= WatchFlags::SEND_MOVED;
        }
        if self.mounts {
            flags |= WatchFlags::WATCH_MOUNTS;
        }
        if self.hard_links {
            flags |= WatchFlags::WATCH_HARD_LINKS;
        }
        flags
    }

    /// (path, is_directory) pairs in command-line order
    fn targets(&self) -> Vec<(PathBuf, bool)> {
        let dirs = self.dirs.iter().map(|path| (path.clone(), true));
        let files = self.files.iter().map(|path| (path.clone(), false));
        let guessed = self.paths.iter().map(|path| (path.clone(), path.is_dir()));
        dirs.chain(files).chain(guessed).collect()
    }
}

pub fn run(args: MonitorArgs) -> Result<()> {
    let targets = args.targets();
    if targets.is_empty() {
        bail!("Nothing to watch: pass a PATH, --dir or --file");
    }

    let config = settings::load(
        args.config.as_deref(),
        Overrides {
            backend: args.backend,
            rate_limit_ms: args.rate_limit,
        },
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("fsmon-backend")
        .enable_all()
        .build()
        .context("Failed to start backend runtime")?;

    let context = MainContext::new();
    let engine = MonitorEngine::with_handle(
        runtime.handle().clone(),
        Arc::new(context.handle()),
        config,
    )?;

    let format = Format::select(args.json);
    let delivered = Arc::new(AtomicUsize::new(0));
    let flags = args.flags();

    let mut monitors: Vec<Monitor> = Vec::with_capacity(targets.len());
    for (path, is_directory) in targets {
        let monitor = if is_directory {
            engine.monitor_directory(&path, flags)
        } else {
            engine.monitor_file(&path, flags)
        }
        .with_context(|| format!("Failed to watch {}", path.display()))?;

        let delivered = Arc::clone(&delivered);
        monitor.connect(move |_, path, other, kind| {
            let record = EventRecord::new(Local::now(), path, other, kind);
            match record.render(format) {
                Ok(line) => println!("{}", line),
                Err(err) => tracing::warn!("Cannot print event for {}: {}", path.display(), err),
            }
            delivered.fetch_add(1, Ordering::Relaxed);
        });

        let backend = monitor
            .backend()
            .map(|kind| kind.name())
            .unwrap_or("unknown");
        eprintln!(
            "{} {} {}",
            "Watching".green(),
            path.display(),
            format!("({})", backend).dimmed()
        );
        monitors.push(monitor);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
            }
        });
    }

    let deadline = args.timeout.map(|secs| Instant::now() + Duration::from_secs(secs));
    let outcome = loop {
        if interrupted.load(Ordering::SeqCst) {
            break Ok(());
        }
        if args.count.is_some_and(|limit| delivered.load(Ordering::Relaxed) >= limit) {
            break Ok(());
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break Ok(());
        }
        if monitors.iter().all(|monitor| monitor.failure().is_some()) {
            // Let the terminal DELETED events through first
            context.dispatch_pending();
            let reasons: Vec<String> = monitors
                .iter()
                .filter_map(|monitor| monitor.failure())
                .map(|err| err.to_string())
                .collect();
            break Err(anyhow::anyhow!("All watches failed: {}", reasons.join("; ")));
        }
        context.iteration(TICK);
    };

    for monitor in &monitors {
        monitor.cancel();
    }
    drop(monitors);
    drop(engine);
    runtime.shutdown_timeout(Duration::from_millis(500));

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: MonitorArgs,
    }

    fn parse(argv: &[&str]) -> MonitorArgs {
        Harness::parse_from(std::iter::once("fsmon").chain(argv.iter().copied())).args
    }

    #[test]
    fn test_flags_from_switches() {
        let args = parse(&["--moves", "--mounts", "-d", "/tmp"]);
        assert_eq!(args.flags(), WatchFlags::WATCH_MOVES | WatchFlags::WATCH_MOUNTS);

        let args = parse(&["--send-moved", "--hard-links", "-f", "/tmp/x"]);
        assert_eq!(args.flags(), WatchFlags::SEND_MOVED | WatchFlags::WATCH_HARD_LINKS);
    }

    #[test]
    fn test_targets_keep_kind() {
        let temp = tempfile::TempDir::new().unwrap();
        let file = temp.path().join("f.txt");
        std::fs::write(&file, b"x").unwrap();

        let args = parse(&[
            "-f",
            "/explicit/file",
            temp.path().to_str().unwrap(),
            file.to_str().unwrap(),
        ]);
        let targets = args.targets();

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0], (PathBuf::from("/explicit/file"), false));
        assert_eq!(targets[1], (temp.path().to_path_buf(), true));
        assert_eq!(targets[2], (file, false));
    }

    #[test]
    fn test_backend_and_limits_parse() {
        let args = parse(&["--backend", "poll", "--rate-limit", "200", "--count", "3", "x"]);
        assert_eq!(args.backend, Some(BackendArg::Poll));
        assert_eq!(args.rate_limit, Some(200));
        assert_eq!(args.count, Some(3));
    }
}
