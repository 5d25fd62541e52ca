#![cfg(unix)]

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use daemon_harness::InstanceState;

use common::{process_exists, shell, sleeper, FakeControl};

#[tokio::test]
async fn test_stop_kills_process_and_removes_workspace() {
    let root = tempfile::tempdir().unwrap();
    let manager = sleeper(FakeControl::ready(), root.path()).build();

    let instance = manager.start().await.unwrap();
    let pid = instance.pid().await.unwrap();
    let workspace = instance.workspace().unwrap().to_path_buf();

    instance.stop().await;

    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(!workspace.exists());
    assert!(!process_exists(pid));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let control = FakeControl::ready();
    let manager = sleeper(control.clone(), root.path()).build();

    let instance = manager.start().await.unwrap();
    instance.stop().await;
    instance.stop().await;
    manager.stop_all().await;

    assert_eq!(instance.state(), InstanceState::Stopped);
    // Only the first stop talked to the daemon.
    assert_eq!(control.shutdown_requests().len(), 1);
}

#[tokio::test]
async fn test_concurrent_stops_run_the_sequence_once() {
    let root = tempfile::tempdir().unwrap();
    let control = FakeControl::ready();
    let manager = sleeper(control.clone(), root.path()).build();

    let instance = manager.start().await.unwrap();
    tokio::join!(instance.stop(), instance.stop(), instance.stop());

    assert_eq!(instance.state(), InstanceState::Stopped);
    assert_eq!(control.shutdown_requests().len(), 1);
}

#[tokio::test]
async fn test_cooperative_shutdown_asks_for_zero_delay() {
    let root = tempfile::tempdir().unwrap();
    let control = FakeControl::ready();
    let manager = sleeper(control.clone(), root.path()).build();

    let instance = manager.start().await.unwrap();
    let endpoint = instance.endpoint();
    instance.stop().await;

    assert_eq!(control.shutdown_requests(), vec![(endpoint, 0)]);
}

#[tokio::test]
async fn test_accepted_shutdown_waits_out_grace_before_signalling() {
    let root = tempfile::tempdir().unwrap();
    let control = FakeControl::ready();
    control.accept_shutdown.store(true, Ordering::SeqCst);
    let manager = sleeper(control.clone(), root.path())
        .with_grace_period(Duration::from_millis(300))
        .build();

    let instance = manager.start().await.unwrap();
    let pid = instance.pid().await.unwrap();

    // `sleep` ignores the fake shutdown call, so the grace period runs out
    // before SIGTERM is sent.
    let started = Instant::now();
    instance.stop().await;

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(!process_exists(pid));
}

#[tokio::test]
async fn test_failed_shutdown_call_goes_straight_to_signals() {
    let root = tempfile::tempdir().unwrap();
    let manager = sleeper(FakeControl::ready(), root.path())
        .with_grace_period(Duration::from_secs(5))
        .build();

    let instance = manager.start().await.unwrap();
    let pid = instance.pid().await.unwrap();

    let started = Instant::now();
    instance.stop().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!process_exists(pid));
}

#[tokio::test]
async fn test_hanging_shutdown_call_is_abandoned_for_signals() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let control = FakeControl::ready().with_hanging_shutdown(Duration::from_secs(10));
    let manager = sleeper(control.clone(), root.path())
        .with_shutdown_call_timeout(Duration::from_millis(200))
        .with_grace_period(Duration::from_secs(5))
        .build();

    let instance = manager.start().await?;
    let pid = instance.pid().await.expect("running daemon has a pid");

    let started = Instant::now();
    instance.stop().await;
    let elapsed = started.elapsed();

    assert_eq!(control.shutdown_requests().len(), 1);
    assert!(elapsed >= Duration::from_millis(200));
    // Neither the hung call nor the grace period is waited out.
    assert!(elapsed < Duration::from_secs(3), "stop took {elapsed:?}");
    assert!(!process_exists(pid));
    assert_eq!(instance.state(), InstanceState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_sigterm_ignoring_process_is_killed() {
    let root = tempfile::tempdir().unwrap();
    let manager = shell("trap '' TERM; exec sleep 30", FakeControl::ready(), root.path())
        .with_terminate_wait(Duration::from_millis(100))
        .build();

    let instance = manager.start().await.unwrap();
    let pid = instance.pid().await.unwrap();
    // Give the shell time to install its trap before the first signal.
    tokio::time::sleep(Duration::from_millis(100)).await;

    instance.stop().await;

    assert!(!process_exists(pid));
    assert!(!instance.workspace().unwrap().exists());
}

#[tokio::test]
async fn test_stop_all_reclaims_concurrently_started_instances() {
    let root = tempfile::tempdir().unwrap();
    let manager = sleeper(FakeControl::ready(), root.path()).build();

    let (a, b, c) = tokio::join!(manager.start(), manager.start(), manager.start());
    let instances = [a.unwrap(), b.unwrap(), c.unwrap()];
    assert_eq!(manager.len(), 3);

    let mut pids = Vec::new();
    for instance in &instances {
        pids.push(instance.pid().await.unwrap());
    }

    manager.stop_all().await;

    assert!(manager.is_empty());
    for (instance, pid) in instances.iter().zip(pids) {
        assert_eq!(instance.state(), InstanceState::Stopped);
        assert!(!instance.workspace().unwrap().exists());
        assert!(!process_exists(pid));
    }
}

#[tokio::test]
async fn test_stop_survives_workspace_already_removed() {
    let root = tempfile::tempdir().unwrap();
    let manager = sleeper(FakeControl::ready(), root.path()).build();

    let instance = manager.start().await.unwrap();
    std::fs::remove_dir_all(instance.workspace().unwrap()).unwrap();

    instance.stop().await;

    assert_eq!(instance.state(), InstanceState::Stopped);
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_captured_output_is_available() {
    let root = tempfile::tempdir().unwrap();
    let manager = shell(
        "echo listening; echo warming up >&2; exec sleep 30",
        FakeControl::ready(),
        root.path(),
    )
    .build();

    let instance = manager.start().await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while instance.recent_output().len() < 2 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let output = instance.recent_output();
    assert!(output.contains(&"stdout: listening".to_string()));
    assert!(output.contains(&"stderr: warming up".to_string()));

    instance.stop().await;
}
