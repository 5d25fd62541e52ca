use std::{
    env,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::{Path, PathBuf},
    sync::{Mutex, Weak},
};

use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use crate::{launcher::OutputLog, manager::Registry, shutdown::ShutdownCoordinator, workspace};

pub const DEFAULT_ADDRESS_ENV_VAR: &str = "CENTY_DAEMON_ADDR";
pub const DEFAULT_EXTERNAL_ENDPOINT: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 50051));

/// Identity of an instance within the manager that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub(crate) u64);

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a daemon instance. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstanceState {
    Starting,
    Ready,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn is_ready(&self) -> bool {
        matches!(self, InstanceState::Ready)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, InstanceState::Stopped)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Resources owned by a daemon the harness launched itself.
pub(crate) struct Owned {
    pub(crate) workspace: PathBuf,
    pub(crate) output: OutputLog,
    pub(crate) token: CancellationToken,
    pub(crate) coordinator: ShutdownCoordinator,
    pub(crate) registry: Weak<Registry>,
}

/// One running daemon: its endpoint, process, workspace and lifecycle state.
///
/// Obtained from [`DaemonManager::start`](crate::DaemonManager::start) or, for
/// a daemon managed outside the harness, [`DaemonInstance::external`].
pub struct DaemonInstance {
    id: InstanceId,
    endpoint: SocketAddr,
    state: Mutex<InstanceState>,
    process: tokio::sync::Mutex<Option<Child>>,
    /// Cancelled by `stop()` so a readiness wait in progress gives up the
    /// process lock.
    startup: CancellationToken,
    owned: Option<Owned>,
}

impl DaemonInstance {
    pub(crate) fn spawned(id: InstanceId, endpoint: SocketAddr, child: Child, owned: Owned) -> Self {
        Self {
            id,
            endpoint,
            state: Mutex::new(InstanceState::Starting),
            process: tokio::sync::Mutex::new(Some(child)),
            startup: CancellationToken::new(),
            owned: Some(owned),
        }
    }

    /// Wraps a daemon that someone else started. The harness owns no process
    /// or workspace for it and [`stop`](Self::stop) does nothing.
    pub fn external(endpoint: SocketAddr) -> Self {
        Self {
            id: InstanceId(0),
            endpoint,
            state: Mutex::new(InstanceState::Ready),
            process: tokio::sync::Mutex::new(None),
            startup: CancellationToken::new(),
            owned: None,
        }
    }

    /// Like [`external`](Self::external), reading the endpoint from
    /// `CENTY_DAEMON_ADDR` and falling back to `127.0.0.1:50051`.
    pub fn external_from_env() -> Self {
        let endpoint = env::var(DEFAULT_ADDRESS_ENV_VAR)
            .ok()
            .and_then(|value| match value.parse() {
                Ok(endpoint) => Some(endpoint),
                Err(_) => {
                    tracing::warn!(
                        value = %value,
                        "ignoring unparsable {DEFAULT_ADDRESS_ENV_VAR}"
                    );
                    None
                }
            })
            .unwrap_or(DEFAULT_EXTERNAL_ENDPOINT);
        Self::external(endpoint)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// The endpoint as `host:port`, the form the daemon reads from its
    /// environment.
    pub fn address(&self) -> String {
        self.endpoint.to_string()
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.owned.as_ref().map(|owned| owned.workspace.as_path())
    }

    pub fn is_external(&self) -> bool {
        self.owned.is_none()
    }

    pub fn state(&self) -> InstanceState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// OS process id, while the process is owned and not yet reaped.
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(Child::id)
    }

    /// Tail of the daemon's captured stdout and stderr.
    pub fn recent_output(&self) -> Vec<String> {
        self.owned
            .as_ref()
            .map(|owned| owned.output.lines())
            .unwrap_or_default()
    }

    /// Stops the daemon and removes its workspace.
    ///
    /// Never fails and is idempotent: a second call, or a call on an external
    /// instance, returns immediately. Concurrent calls wait for the first one
    /// to finish. A start still waiting for readiness is cut short.
    pub async fn stop(&self) {
        let Some(owned) = &self.owned else {
            return;
        };

        self.startup.cancel();
        let mut process = self.process.lock().await;
        if self.state().is_stopped() {
            return;
        }
        self.mark(InstanceState::Stopping);
        tracing::debug!(instance = %self.id, endpoint = %self.endpoint, "stopping daemon");

        if let Some(mut child) = process.take() {
            owned.coordinator.shutdown(self.endpoint, &mut child).await;
        }
        owned.token.cancel();

        if let Err(e) = workspace::destroy(&owned.workspace).await {
            tracing::warn!(
                instance = %self.id,
                workspace = %owned.workspace.display(),
                error = %e,
                "failed to remove daemon workspace"
            );
        }

        self.mark(InstanceState::Stopped);
        if let Some(registry) = owned.registry.upgrade() {
            registry.deregister(self.id);
        }
        tracing::info!(instance = %self.id, endpoint = %self.endpoint, "daemon stopped");
    }

    pub(crate) fn startup_token(&self) -> CancellationToken {
        self.startup.clone()
    }

    pub(crate) async fn lock_process(&self) -> tokio::sync::MutexGuard<'_, Option<Child>> {
        self.process.lock().await
    }

    /// Moves the lifecycle forward; requests to move backwards are ignored.
    pub(crate) fn mark(&self, next: InstanceState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if next > *state {
            *state = next;
        }
    }
}

impl std::fmt::Debug for DaemonInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonInstance")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("workspace", &self.workspace())
            .finish()
    }
}
