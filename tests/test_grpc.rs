#![cfg(unix)]

mod common;

use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

use daemon_harness::{ControlPlane, DaemonManagerBuilder, GrpcControl};

/// An address nothing is listening on.
fn closed_endpoint() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_status_fails_when_nothing_listens() {
    let control = GrpcControl::new().with_request_timeout(Duration::from_millis(500));

    let result = control.status(closed_endpoint()).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_status_is_bounded_when_peer_never_answers() {
    // Accepts TCP connections but never speaks HTTP/2.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = listener.local_addr().unwrap();
    let control = GrpcControl::new().with_request_timeout(Duration::from_millis(300));

    let started = Instant::now();
    let result = control.status(endpoint).await;

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(3));
    drop(listener);
}

#[tokio::test]
async fn test_shutdown_call_to_absent_daemon_is_an_error() {
    let control = GrpcControl::new().with_request_timeout(Duration::from_millis(300));
    assert!(control.shutdown(closed_endpoint(), 0).await.is_err());
}

#[tokio::test]
async fn test_grpc_supervised_process_that_never_listens_times_out_and_is_reclaimed() {
    let root = tempfile::tempdir().unwrap();
    let manager = DaemonManagerBuilder::new()
        .with_binary("sleep")
        .with_arg("30")
        .with_base_port(closed_endpoint().port())
        .with_workspace_root(root.path())
        .with_startup_timeout(Duration::from_millis(500))
        .with_shutdown_call_timeout(Duration::from_millis(300))
        .with_control_plane(GrpcControl::new().with_request_timeout(Duration::from_millis(200)))
        .build();

    let err = manager.start().await.unwrap_err();
    assert!(err.is_timeout(), "unexpected error: {err}");

    let pid = manager.instances()[0].pid().await.unwrap();
    manager.stop_all().await;

    assert!(!common::process_exists(pid));
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}
