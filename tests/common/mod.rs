use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use daemon_harness::{ControlError, ControlPlane, DaemonManagerBuilder};
use tonic::Status;

/// Control plane that never touches the network: readiness is a flag and
/// shutdown calls are recorded.
#[derive(Clone, Default)]
pub struct FakeControl {
    pub ready: Arc<AtomicBool>,
    pub accept_shutdown: Arc<AtomicBool>,
    pub status_calls: Arc<AtomicUsize>,
    pub shutdown_calls: Arc<Mutex<Vec<(SocketAddr, u32)>>>,
    /// How long a shutdown call takes to answer.
    pub shutdown_delay: Duration,
}

#[allow(unused)]
impl FakeControl {
    pub fn ready() -> Self {
        let control = Self::default();
        control.ready.store(true, Ordering::SeqCst);
        control
    }

    pub fn never_ready() -> Self {
        Self::default()
    }

    /// A daemon whose shutdown call does not answer for `delay`.
    pub fn with_hanging_shutdown(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    pub fn shutdown_requests(&self) -> Vec<(SocketAddr, u32)> {
        self.shutdown_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ControlPlane for FakeControl {
    async fn status(&self, _endpoint: SocketAddr) -> Result<(), ControlError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ControlError::Status(Status::unavailable("connection refused")))
        }
    }

    async fn shutdown(&self, endpoint: SocketAddr, delay_seconds: u32) -> Result<(), ControlError> {
        self.shutdown_calls
            .lock()
            .unwrap()
            .push((endpoint, delay_seconds));
        if !self.shutdown_delay.is_zero() {
            tokio::time::sleep(self.shutdown_delay).await;
        }
        if self.accept_shutdown.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ControlError::Status(Status::unavailable("connection refused")))
        }
    }
}

/// Builder launching `sleep 30` as the "daemon", with short timings.
#[allow(unused)]
pub fn sleeper(control: FakeControl, workspace_root: &Path) -> DaemonManagerBuilder {
    DaemonManagerBuilder::new()
        .with_binary("sleep")
        .with_arg("30")
        .with_workspace_root(workspace_root)
        .with_startup_timeout(Duration::from_secs(2))
        .with_poll_interval(Duration::from_millis(20))
        .with_grace_period(Duration::from_millis(200))
        .with_terminate_wait(Duration::from_millis(100))
        .with_control_plane(control)
}

/// Builder launching `sh -c <script>` as the "daemon".
#[allow(unused)]
pub fn shell(script: &str, control: FakeControl, workspace_root: &Path) -> DaemonManagerBuilder {
    DaemonManagerBuilder::new()
        .with_binary("sh")
        .with_args(["-c", script])
        .with_workspace_root(workspace_root)
        .with_startup_timeout(Duration::from_secs(2))
        .with_poll_interval(Duration::from_millis(20))
        .with_grace_period(Duration::from_millis(200))
        .with_terminate_wait(Duration::from_millis(100))
        .with_control_plane(control)
}

/// Whether a process with this pid still exists (zombies count as gone once
/// reaped by the harness).
#[allow(unused)]
pub fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}
