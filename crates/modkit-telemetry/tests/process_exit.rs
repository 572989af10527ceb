//! Records written right before the process ends must reach the log files.
//!
//! The binary re-runs itself as a child: once returning normally from
//! `main`, once ending through `process::exit` right after a thread panics.
//! Both children use the default (enqueued) file sinks.

use std::env;
use std::fs;
use std::path::Path;
use std::process::{Command, ExitStatus};

use modkit_telemetry::{LogConfig, global, setup_logging};
use tempfile::TempDir;

const ROLE: &str = "MODKIT_EXIT_ROLE";
const LOG_DIR: &str = "MODKIT_EXIT_LOG_DIR";
const RUNS: usize = 5;

fn main() {
    match env::var(ROLE).as_deref() {
        Ok("return") => child_returns(),
        Ok("panic") => child_panics(),
        _ => parent(),
    }
}

fn child_config() -> LogConfig {
    let dir = env::var(LOG_DIR).unwrap();
    LogConfig::new("INFO")
        .without_terminal()
        .with_file_logging(dir, "app")
}

fn child_returns() {
    let _flush = setup_logging(&child_config()).unwrap();
    global().error("last words before exit");
}

fn child_panics() {
    let _flush = setup_logging(&child_config()).unwrap();
    let _ = std::thread::spawn(|| panic!("worker exploded")).join();
    // Skips destructors: only the panic hook can have drained the queue.
    std::process::exit(3);
}

fn run_child(role: &str, dir: &Path) -> ExitStatus {
    Command::new(env::current_exe().unwrap())
        .env(ROLE, role)
        .env(LOG_DIR, dir)
        .status()
        .unwrap()
}

fn error_log(dir: &Path) -> String {
    fs::read_to_string(dir.join("app_error.log")).unwrap_or_default()
}

fn parent() {
    for run in 0..RUNS {
        let temp = TempDir::new().unwrap();
        assert!(run_child("return", temp.path()).success());
        let errors = error_log(temp.path());
        assert!(
            errors.contains("| last words before exit"),
            "run {run}, normal exit: {errors:?}"
        );

        let temp = TempDir::new().unwrap();
        assert_eq!(run_child("panic", temp.path()).code(), Some(3));
        let errors = error_log(temp.path());
        assert!(
            errors.contains("CRITICAL: ") && errors.contains("| Unhandled exception"),
            "run {run}, panic: {errors:?}"
        );
        assert!(errors.contains("worker exploded"), "run {run}: {errors:?}");
    }
    println!("process_exit: {RUNS} runs ok");
}
