#![cfg(unix)]

use std::path::Path;
use std::time::Duration;
use strata_core::{ExecConfig, FileHandle};
use strata_processing::{CommandExecutor, ExecError, ExecOptions};
use tempfile::{tempdir, TempDir};

fn executor(dir: &TempDir) -> CommandExecutor {
    CommandExecutor::new(ExecConfig {
        timeout: Duration::from_secs(10),
        kill_grace: Duration::from_millis(300),
        scratch_dir: dir.path().join("scratch"),
    })
}

async fn source(dir: &TempDir, name: &str, data: &[u8]) -> FileHandle {
    let path = dir.path().join(name);
    tokio::fs::write(&path, data).await.unwrap();
    FileHandle::from_location(path).unwrap()
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// True while `pid` exists and is not a zombie waiting to be reaped.
fn is_running(pid: i32) -> bool {
    if unsafe { libc::kill(pid, 0) } != 0 {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => !stat
            .rsplit_once(')')
            .map(|(_, rest)| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => true,
    }
}

async fn read_pid(path: &Path) -> i32 {
    tokio::fs::read_to_string(path)
        .await
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

async fn scratch_is_empty(dir: &TempDir) -> bool {
    let mut entries = tokio::fs::read_dir(dir.path().join("scratch")).await.unwrap();
    entries.next_entry().await.unwrap().is_none()
}

#[tokio::test]
async fn successful_command_produces_scratch_file() {
    let dir = tempdir().unwrap();
    let executor = executor(&dir);
    let source = source(&dir, "in.txt", b"hello").await;
    let target = FileHandle::from_name("thumb_in.png").unwrap();

    let out = executor
        .exec(&source, target, &argv(&["cp", "{source}", "{target}"]), &ExecOptions::default())
        .await
        .unwrap();

    let location = out.location().unwrap();
    assert_eq!(out.name(), "thumb_in.png");
    assert!(location.starts_with(dir.path().join("scratch")));
    assert_eq!(location.extension().unwrap(), "png");
    assert_eq!(tokio::fs::read(location).await.unwrap(), b"hello");
}

#[tokio::test]
async fn timeout_terminates_the_process_tree() {
    let dir = tempdir().unwrap();
    let executor = executor(&dir);
    let source = source(&dir, "in.txt", b"x").await;
    let pid_file = dir.path().join("pid");
    let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

    let started = std::time::Instant::now();
    let result = executor
        .exec(
            &source,
            FileHandle::from_name("out.txt").unwrap(),
            &argv(&["sh", "-c", &script]),
            &ExecOptions::with_timeout(Duration::from_millis(500)),
        )
        .await;

    assert!(matches!(result, Err(ExecError::Timeout { timeout, .. }) if timeout == Duration::from_millis(500)));
    assert!(started.elapsed() < Duration::from_secs(5));

    let grandchild = read_pid(&pid_file).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!is_running(grandchild), "background process {} survived", grandchild);
}

#[tokio::test]
async fn timeout_kills_commands_that_ignore_sigterm() {
    let dir = tempdir().unwrap();
    let executor = executor(&dir);
    let source = source(&dir, "in.txt", b"x").await;
    let pid_file = dir.path().join("pid");
    let script = format!("trap '' TERM; echo $$ > {}; sleep 30", pid_file.display());

    let result = executor
        .exec(
            &source,
            FileHandle::from_name("out.txt").unwrap(),
            &argv(&["sh", "-c", &script]),
            &ExecOptions::with_timeout(Duration::from_millis(300)),
        )
        .await;

    let err = result.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.exit_code(), None);

    let shell = read_pid(&pid_file).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!is_running(shell));
}

#[tokio::test]
async fn cancelled_exec_kills_the_command() {
    let dir = tempdir().unwrap();
    let executor = executor(&dir);
    let source = source(&dir, "in.txt", b"x").await;
    let pid_file = dir.path().join("pid");
    let script = format!("echo $$ > {}; sleep 30", pid_file.display());
    let command = argv(&["sh", "-c", &script]);

    let cancelled = tokio::time::timeout(
        Duration::from_millis(500),
        executor.exec(
            &source,
            FileHandle::from_name("out.txt").unwrap(),
            &command,
            &ExecOptions::default(),
        ),
    )
    .await;
    assert!(cancelled.is_err());

    let shell = read_pid(&pid_file).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!is_running(shell));
}

#[tokio::test]
async fn zero_exit_without_output_is_file_not_found() {
    let dir = tempdir().unwrap();
    let executor = executor(&dir);
    let source = source(&dir, "in.txt", b"x").await;

    let result = executor
        .exec(
            &source,
            FileHandle::from_name("out.txt").unwrap(),
            &argv(&["sh", "-c", "echo pretending"]),
            &ExecOptions::default(),
        )
        .await;

    match result {
        Err(err @ ExecError::FileNotFound { .. }) => {
            assert_eq!(err.exit_code(), Some(0));
            assert_eq!(err.output(), Some("pretending\n"));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn non_zero_exit_carries_combined_output() {
    let dir = tempdir().unwrap();
    let executor = executor(&dir);
    let source = source(&dir, "in.txt", b"x").await;

    let result = executor
        .exec(
            &source,
            FileHandle::from_name("out.txt").unwrap(),
            &argv(&["sh", "-c", "echo partial > {target}; echo out; echo err >&2; exit 3"]),
            &ExecOptions::default(),
        )
        .await;

    match result {
        Err(ExecError::NonZeroExit { exit_code, output }) => {
            assert_eq!(exit_code, Some(3));
            assert!(output.contains("out"));
            assert!(output.contains("err"));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(scratch_is_empty(&dir).await);
}

#[tokio::test]
async fn missing_program_is_a_launch_error() {
    let dir = tempdir().unwrap();
    let executor = executor(&dir);
    let source = source(&dir, "in.txt", b"x").await;

    let result = executor
        .exec(
            &source,
            FileHandle::from_name("out.txt").unwrap(),
            &argv(&["strata-no-such-tool", "{source}", "{target}"]),
            &ExecOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(ExecError::Launch { ref program, .. }) if program == "strata-no-such-tool"));
}

#[tokio::test]
async fn empty_command_is_rejected() {
    let dir = tempdir().unwrap();
    let executor = executor(&dir);
    let source = source(&dir, "in.txt", b"x").await;

    let result = executor
        .exec(&source, FileHandle::from_name("out.txt").unwrap(), &[], &ExecOptions::default())
        .await;
    assert!(matches!(result, Err(ExecError::EmptyCommand)));
}

#[tokio::test]
async fn file_names_are_never_interpreted_by_a_shell() {
    let dir = tempdir().unwrap();
    let executor = executor(&dir);
    let source = source(&dir, "a'; touch pwned; '.txt", b"safe").await;

    let out = executor
        .exec(
            &source,
            FileHandle::from_name("out.txt").unwrap(),
            &argv(&["cp", "{source}", "{target}"]),
            &ExecOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(out.location().unwrap()).await.unwrap(), b"safe");
    assert!(!dir.path().join("pwned").exists());
    assert!(!Path::new("pwned").exists());
}
