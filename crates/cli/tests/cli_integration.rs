//! End-to-end tests of the `fsmon` binary

mod common;

use anyhow::Result;
use std::time::Duration;
use tempfile::TempDir;

/// Upper bound for a monitor run; each run also passes `--timeout`
const RUN_LIMIT: Duration = Duration::from_secs(20);

#[test]
fn test_backends_lists_every_backend() -> Result<()> {
    let temp = TempDir::new()?;
    let result = fsmon!(temp.path(), "backends").assert_success()?;

    for name in ["native", "diff", "poll"] {
        assert!(result.contains_stdout(name), "missing {}:\n{}", name, result.stdout);
    }
    assert!(result.contains_stdout("(selected)"));
    Ok(())
}

#[test]
fn test_monitor_without_targets_fails() -> Result<()> {
    let temp = TempDir::new()?;
    let result = fsmon!(temp.path(), "monitor").assert_failure()?;
    assert!(result.contains_stderr("Nothing to watch"));
    Ok(())
}

#[test]
fn test_monitor_missing_directory_fails() -> Result<()> {
    let temp = TempDir::new()?;
    let config = common::fast_config(temp.path())?;

    let mut cmd = fsmon!(temp.path(), "monitor", "--backend", "diff", "--config");
    cmd.path_arg(&config).args(&["--dir"]).path_arg(temp.path().join("absent"));
    let result = cmd.assert_failure()?;

    assert!(result.contains_stderr("Failed to watch"), "{}", result.stderr);
    Ok(())
}

#[test]
fn test_monitor_rejects_bad_config() -> Result<()> {
    let temp = TempDir::new()?;
    let config = temp.path().join("bad.toml");
    std::fs::write(&config, "diff_interval_ms = \"soon\"\n")?;

    let mut cmd = fsmon!(temp.path(), "monitor", "--config");
    cmd.path_arg(&config).path_arg(temp.path());
    let result = cmd.assert_failure()?;

    assert!(result.contains_stderr("Failed to load config"), "{}", result.stderr);
    Ok(())
}

#[test]
fn test_monitor_directory_prints_json_events() -> Result<()> {
    let temp = TempDir::new()?;
    let config = common::fast_config(temp.path())?;
    let watched = temp.path().join("watched");
    std::fs::create_dir(&watched)?;

    let mut cmd = fsmon!(
        temp.path(),
        "monitor",
        "--json",
        "--backend",
        "diff",
        "--count",
        "1",
        "--timeout",
        "10",
        "--config"
    );
    cmd.path_arg(&config).path_arg(&watched);

    let mut running = cmd.spawn()?;
    running.wait_for_stderr("Watching")?;
    std::fs::write(watched.join("new.txt"), b"hello")?;

    let result = running.finish(RUN_LIMIT)?;
    assert!(result.success(), "{}", result.stderr);

    let events = result.events()?;
    assert_eq!(events.len(), 1, "{}", result.stdout);
    assert_eq!(events[0]["kind"], "CREATED");
    assert!(events[0]["path"].as_str().unwrap_or_default().ends_with("new.txt"));
    assert!(events[0].get("other").is_none());
    Ok(())
}

#[test]
fn test_monitor_file_prints_plain_lines() -> Result<()> {
    let temp = TempDir::new()?;
    let config = common::fast_config(temp.path())?;
    let watched = temp.path().join("watched");
    std::fs::create_dir(&watched)?;
    let file = watched.join("log.txt");
    std::fs::write(&file, b"a")?;

    let mut cmd = fsmon!(
        temp.path(),
        "monitor",
        "--backend",
        "diff",
        "--count",
        "1",
        "--timeout",
        "10",
        "--config"
    );
    cmd.path_arg(&config).args(&["--file"]).path_arg(&file);

    let mut running = cmd.spawn()?;
    running.wait_for_stderr("Watching")?;
    // Unrelated sibling must not be reported
    std::fs::write(watched.join("other.txt"), b"zzz")?;
    std::fs::write(&file, b"a longer line")?;

    let result = running.finish(RUN_LIMIT)?;
    assert!(result.success(), "{}", result.stderr);

    let lines: Vec<&str> = result.stdout.lines().collect();
    assert_eq!(lines.len(), 1, "{}", result.stdout);
    assert!(lines[0].ends_with(&format!("{}: CHANGED", file.display())), "{}", lines[0]);
    Ok(())
}

#[test]
fn test_monitor_timeout_exits_quietly() -> Result<()> {
    let temp = TempDir::new()?;
    let config = common::fast_config(temp.path())?;

    let mut cmd = fsmon!(temp.path(), "monitor", "--backend", "diff", "--timeout", "1", "--config");
    cmd.path_arg(&config).args(&["--dir"]).path_arg(temp.path());

    let result = cmd.spawn()?.finish(RUN_LIMIT)?;
    assert!(result.success(), "{}", result.stderr);
    assert!(result.stdout.is_empty(), "{}", result.stdout);
    assert!(result.duration >= Duration::from_secs(1));
    Ok(())
}
