use std::{net::SocketAddr, time::Duration};

use tokio::{
    process::Child,
    time::{interval, sleep_until, Instant, Interval, MissedTickBehavior},
};

use tokio_util::sync::CancellationToken;

use crate::control::ControlPlane;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
/// Shortest accepted poll interval; tokio intervals must have a non-zero period.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Why a freshly launched daemon never became ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NotReady {
    /// The deadline passed with the process still running.
    Timeout,
    /// The process exited or could no longer be waited on.
    Exited(String),
    /// The instance was stopped while the wait was in progress.
    Stopped,
}

/// Blocks until the daemon at `endpoint` answers a status call.
///
/// Three things race: the next poll attempt, the child exiting, and the
/// deadline at `launched_at + timeout`. Failed attempts are swallowed and
/// retried on the next tick. On timeout the child is left running.
/// Cancelling `stopped` abandons the wait.
pub(crate) async fn await_ready(
    control: &dyn ControlPlane,
    endpoint: SocketAddr,
    child: &mut Child,
    launched_at: Instant,
    timeout: Duration,
    poll_interval: Duration,
    stopped: &CancellationToken,
) -> Result<(), NotReady> {
    let deadline = sleep_until(launched_at + timeout);
    tokio::pin!(deadline);

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            exited = child.wait() => {
                let reason = match exited {
                    Ok(status) => status.to_string(),
                    Err(e) => format!("failed to wait on process: {e}"),
                };
                return Err(NotReady::Exited(reason));
            }
            () = stopped.cancelled() => return Err(NotReady::Stopped),
            () = &mut deadline => return Err(NotReady::Timeout),
            ready = poll_once(control, endpoint, &mut ticker) => {
                if ready {
                    return Ok(());
                }
            }
        }
    }
}

async fn poll_once(control: &dyn ControlPlane, endpoint: SocketAddr, ticker: &mut Interval) -> bool {
    ticker.tick().await;
    match control.status(endpoint).await {
        Ok(()) => true,
        Err(e) => {
            tracing::trace!(%endpoint, error = %e, "daemon not ready yet");
            false
        }
    }
}
