use std::{io, net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::instance::InstanceId;

/// Errors returned by [`DaemonManager::start`](crate::DaemonManager::start).
///
/// Start failures are hard errors: the caller is expected to fail the test.
/// For [`StartError::StartupTimeout`] and [`StartError::ProcessExit`] the
/// instance stays registered and can be reclaimed with
/// [`DaemonManager::stop_instance`](crate::DaemonManager::stop_instance) or
/// [`DaemonManager::stop_all`](crate::DaemonManager::stop_all).
#[derive(Debug, Error)]
pub enum StartError {
    #[error("no free port left above base port {base_port}")]
    PortsExhausted { base_port: u16 },

    #[error("failed to create daemon workspace: {0}")]
    Workspace(#[source] io::Error),

    #[error("failed to launch daemon binary {}: {source}", binary.display())]
    ProcessLaunch {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("daemon {id} at {endpoint} did not become ready within {timeout:?}")]
    StartupTimeout {
        id: InstanceId,
        endpoint: SocketAddr,
        timeout: Duration,
    },

    #[error("daemon {id} at {endpoint} exited before becoming ready: {reason}")]
    ProcessExit {
        id: InstanceId,
        endpoint: SocketAddr,
        reason: String,
        /// Tail of the captured stdout/stderr at the time of exit.
        output: Vec<String>,
    },
}

impl StartError {
    /// Identity of the instance left registered by this failure, if any.
    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            Self::StartupTimeout { id, .. } | Self::ProcessExit { id, .. } => Some(*id),
            Self::PortsExhausted { .. } | Self::Workspace(_) | Self::ProcessLaunch { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::StartupTimeout { .. })
    }

    pub fn is_process_exit(&self) -> bool {
        matches!(self, Self::ProcessExit { .. })
    }

    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Self::ProcessLaunch { .. })
    }

    pub fn is_ports_exhausted(&self) -> bool {
        matches!(self, Self::PortsExhausted { .. })
    }
}

/// Errors from a call over the daemon's remote interface.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid daemon endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: SocketAddr, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("daemon returned status: {0}")]
    Status(#[from] tonic::Status),

    #[error("daemon did not answer within {0:?}")]
    Timeout(Duration),
}
