use std::{
    env,
    ffi::OsString,
    net::IpAddr,
    path::PathBuf,
    sync::{atomic::AtomicU64, Arc},
    time::Duration,
};

use crate::{
    address::{PortAllocator, DEFAULT_BASE_PORT, DEFAULT_HOST},
    control::{ControlPlane, GrpcControl},
    instance::DEFAULT_ADDRESS_ENV_VAR,
    manager::{DaemonManager, ManagerConfig, Registry},
    paths::{self, DAEMON_BINARY_ENV_VAR},
    probe::{DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT, MIN_POLL_INTERVAL},
    shutdown::{
        ShutdownCoordinator, DEFAULT_GRACE_PERIOD, DEFAULT_SHUTDOWN_CALL_TIMEOUT,
        DEFAULT_TERMINATE_WAIT,
    },
    workspace,
};

pub const BASE_PORT_ENV_VAR: &str = "CENTY_E2E_BASE_PORT";
pub const STARTUP_TIMEOUT_ENV_VAR: &str = "CENTY_E2E_STARTUP_TIMEOUT_MS";

/// Builds a [`DaemonManager`] with configurable launch, readiness and
/// shutdown parameters.
///
/// Cloning a builder is cheap; the control plane is shared between clones.
#[derive(Clone)]
pub struct DaemonManagerBuilder {
    binary: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    host: IpAddr,
    base_port: u16,
    startup_timeout: Duration,
    poll_interval: Duration,
    grace_period: Duration,
    terminate_wait: Duration,
    shutdown_call_timeout: Duration,
    address_env_var: OsString,
    workspace_env_var: Option<OsString>,
    workspace_root: PathBuf,
    workspace_prefix: String,
    control: Arc<dyn ControlPlane>,
}

impl DaemonManagerBuilder {
    /// Creates a new builder with default configuration values.
    pub fn new() -> Self {
        Self {
            binary: paths::daemon_binary(),
            args: Vec::new(),
            env: Vec::new(),
            host: DEFAULT_HOST,
            base_port: DEFAULT_BASE_PORT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            terminate_wait: DEFAULT_TERMINATE_WAIT,
            shutdown_call_timeout: DEFAULT_SHUTDOWN_CALL_TIMEOUT,
            address_env_var: DEFAULT_ADDRESS_ENV_VAR.into(),
            workspace_env_var: None,
            workspace_root: env::temp_dir(),
            workspace_prefix: workspace::DEFAULT_PREFIX.to_string(),
            control: Arc::new(GrpcControl::default()),
        }
    }

    /// Starts from [`new`](Self::new) and applies overrides from the
    /// environment: `CENTY_DAEMON_BIN`, `CENTY_E2E_BASE_PORT` and
    /// `CENTY_E2E_STARTUP_TIMEOUT_MS`. Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::new().with_env_overrides(|key| env::var(key).ok())
    }

    pub(crate) fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(binary) = lookup(DAEMON_BINARY_ENV_VAR).filter(|value| !value.is_empty()) {
            self.binary = binary.into();
        }
        if let Some(value) = lookup(BASE_PORT_ENV_VAR) {
            match value.parse::<u16>() {
                Ok(port) => self.base_port = port,
                Err(e) => tracing::warn!(%value, error = %e, "ignoring invalid {BASE_PORT_ENV_VAR}"),
            }
        }
        if let Some(value) = lookup(STARTUP_TIMEOUT_ENV_VAR) {
            match value.parse::<u64>() {
                Ok(millis) => self.startup_timeout = Duration::from_millis(millis),
                Err(e) => {
                    tracing::warn!(%value, error = %e, "ignoring invalid {STARTUP_TIMEOUT_ENV_VAR}")
                }
            }
        }
        self
    }

    /// Sets the daemon binary to launch.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Appends a command-line argument passed to every launched daemon.
    pub fn with_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable on top of the inherited environment.
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Sets the host every allocated endpoint binds to.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Sets the first port handed out; later instances count up from it.
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    /// Sets how long a daemon may take to answer its first status call.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Sets the interval between readiness polls. Values below one
    /// millisecond are raised to one millisecond.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Sets how long to wait for a voluntary exit after a cooperative
    /// shutdown call was answered.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Sets how long to wait after SIGTERM before escalating to SIGKILL.
    pub fn with_terminate_wait(mut self, wait: Duration) -> Self {
        self.terminate_wait = wait;
        self
    }

    /// Bounds the cooperative shutdown call itself.
    pub fn with_shutdown_call_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_call_timeout = timeout;
        self
    }

    /// Sets the environment variable through which the daemon learns the
    /// address to bind.
    pub fn with_address_env_var(mut self, name: impl Into<OsString>) -> Self {
        self.address_env_var = name.into();
        self
    }

    /// Also exports each instance's workspace path under `name`.
    pub fn with_workspace_env_var(mut self, name: impl Into<OsString>) -> Self {
        self.workspace_env_var = Some(name.into());
        self
    }

    /// Sets the directory workspaces are created under.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_workspace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.workspace_prefix = prefix.into();
        self
    }

    /// Replaces the gRPC client used for status and shutdown calls.
    pub fn with_control_plane(mut self, control: impl ControlPlane) -> Self {
        self.control = Arc::new(control);
        self
    }

    /// Constructs the `DaemonManager` with the configured settings.
    pub fn build(self) -> DaemonManager {
        let coordinator = ShutdownCoordinator {
            control: Arc::clone(&self.control),
            grace_period: self.grace_period,
            terminate_wait: self.terminate_wait,
            call_timeout: self.shutdown_call_timeout,
        };
        DaemonManager {
            config: Arc::new(ManagerConfig {
                binary: self.binary,
                args: self.args,
                env: self.env,
                startup_timeout: self.startup_timeout,
                poll_interval: self.poll_interval,
                address_env_var: self.address_env_var,
                workspace_env_var: self.workspace_env_var,
                workspace_root: self.workspace_root,
                workspace_prefix: self.workspace_prefix,
            }),
            ports: PortAllocator::new(self.host, self.base_port),
            control: self.control,
            coordinator,
            registry: Arc::new(Registry::default()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for DaemonManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DaemonManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonManagerBuilder")
            .field("binary", &self.binary)
            .field("args", &self.args)
            .field("host", &self.host)
            .field("base_port", &self.base_port)
            .field("startup_timeout", &self.startup_timeout)
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}
