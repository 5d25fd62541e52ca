use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{process::Child, time::timeout};

use crate::control::ControlPlane;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);
pub const DEFAULT_TERMINATE_WAIT: Duration = Duration::from_millis(100);
pub const DEFAULT_SHUTDOWN_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on reaping a SIGKILLed child.
const REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// Escalating stop sequence for one daemon process: a cooperative shutdown
/// call, then SIGTERM, then SIGKILL.
///
/// Every step runs regardless of how the previous one went and nothing is
/// returned to the caller; failures are logged.
#[derive(Clone)]
pub(crate) struct ShutdownCoordinator {
    pub(crate) control: Arc<dyn ControlPlane>,
    pub(crate) grace_period: Duration,
    pub(crate) terminate_wait: Duration,
    pub(crate) call_timeout: Duration,
}

impl ShutdownCoordinator {
    pub(crate) async fn shutdown(&self, endpoint: SocketAddr, child: &mut Child) {
        match timeout(self.call_timeout, self.control.shutdown(endpoint, 0)).await {
            Ok(Ok(())) => {
                tracing::debug!(%endpoint, "cooperative shutdown accepted, waiting for exit");
                let _ = timeout(self.grace_period, child.wait()).await;
            }
            Ok(Err(e)) => {
                tracing::debug!(%endpoint, error = %e, "cooperative shutdown failed");
            }
            Err(_) => {
                tracing::debug!(%endpoint, "cooperative shutdown call timed out");
            }
        }

        if is_alive(child) {
            tracing::debug!(%endpoint, pid = child.id(), "sending SIGTERM");
            if let Err(e) = terminate(child) {
                tracing::warn!(%endpoint, error = %e, "failed to send SIGTERM");
            }
            let _ = timeout(self.terminate_wait, child.wait()).await;
        }

        if is_alive(child) {
            tracing::warn!(%endpoint, pid = child.id(), "daemon ignored SIGTERM, killing");
            if let Err(e) = child.start_kill() {
                tracing::warn!(%endpoint, error = %e, "failed to send SIGKILL");
            }
            // Reap so the pid does not linger as a zombie.
            if timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
                tracing::warn!(%endpoint, "daemon still not reaped after SIGKILL");
            }
        }
    }
}

/// Anything other than a confirmed exit counts as alive.
fn is_alive(child: &mut Child) -> bool {
    !matches!(child.try_wait(), Ok(Some(_)))
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> io::Result<()> {
    use nix::{
        sys::signal::{kill, Signal},
        unistd::Pid,
    };

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
