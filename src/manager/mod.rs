pub(crate) mod builder;
pub(crate) mod shared;

use std::{
    ffi::OsString,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::future::join_all;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    address::PortAllocator,
    control::ControlPlane,
    instance::{DaemonInstance, InstanceId, InstanceState, Owned},
    launcher::{self, LaunchSpec},
    probe::{self, NotReady},
    shutdown::ShutdownCoordinator,
    workspace, StartError,
};

/// Static launch settings shared by every instance of one manager.
#[derive(Debug)]
pub(crate) struct ManagerConfig {
    pub(crate) binary: PathBuf,
    pub(crate) args: Vec<OsString>,
    pub(crate) env: Vec<(OsString, OsString)>,
    pub(crate) startup_timeout: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) address_env_var: OsString,
    pub(crate) workspace_env_var: Option<OsString>,
    pub(crate) workspace_root: PathBuf,
    pub(crate) workspace_prefix: String,
}

/// Instances started by one manager, in start order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    instances: Mutex<Vec<Arc<DaemonInstance>>>,
}

impl Registry {
    fn register(&self, instance: Arc<DaemonInstance>) {
        self.lock().push(instance);
    }

    pub(crate) fn deregister(&self, id: InstanceId) {
        self.lock().retain(|instance| instance.id() != id);
    }

    fn get(&self, id: InstanceId) -> Option<Arc<DaemonInstance>> {
        self.lock().iter().find(|instance| instance.id() == id).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<DaemonInstance>> {
        self.lock().clone()
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<DaemonInstance>>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Launches isolated daemon instances and tracks them for bulk teardown.
///
/// Each [`start`](Self::start) allocates a fresh endpoint, creates a private
/// workspace, spawns the daemon with the endpoint injected into its
/// environment and waits until it answers a status call. Every instance that
/// got as far as a running process is recorded so [`stop_all`](Self::stop_all)
/// can reclaim it, including ones whose startup failed.
///
/// Cloning a manager yields another handle onto the same registry.
#[derive(Clone)]
pub struct DaemonManager {
    pub(crate) config: Arc<ManagerConfig>,
    pub(crate) ports: PortAllocator,
    pub(crate) control: Arc<dyn ControlPlane>,
    pub(crate) coordinator: ShutdownCoordinator,
    pub(crate) registry: Arc<Registry>,
    pub(crate) next_id: Arc<AtomicU64>,
}

impl DaemonManager {
    /// Starts a new daemon instance with an isolated workspace.
    pub async fn start(&self) -> Result<Arc<DaemonInstance>, StartError> {
        let id = InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let endpoint = self.ports.next_endpoint().ok_or(StartError::PortsExhausted {
            base_port: self.ports.base_port(),
        })?;

        let workspace_path =
            workspace::create(&self.config.workspace_root, &self.config.workspace_prefix)
                .await
                .map_err(StartError::Workspace)?;

        let mut env = self.config.env.clone();
        env.push((self.config.address_env_var.clone(), endpoint.to_string().into()));
        if let Some(name) = &self.config.workspace_env_var {
            env.push((name.clone(), workspace_path.clone().into_os_string()));
        }

        let token = CancellationToken::new();
        let spec = LaunchSpec {
            binary: &self.config.binary,
            args: &self.config.args,
            env: &env,
            work_dir: &workspace_path,
        };
        let launched = match launcher::launch(id, &spec, &token) {
            Ok(launched) => launched,
            Err(source) => {
                if let Err(e) = workspace::destroy(&workspace_path).await {
                    tracing::warn!(
                        instance = %id,
                        workspace = %workspace_path.display(),
                        error = %e,
                        "failed to remove workspace after launch failure"
                    );
                }
                return Err(StartError::ProcessLaunch {
                    binary: self.config.binary.clone(),
                    source,
                });
            }
        };
        let launched_at = Instant::now();

        let output = launched.output.clone();
        let instance = Arc::new(DaemonInstance::spawned(
            id,
            endpoint,
            launched.child,
            Owned {
                workspace: workspace_path,
                output: launched.output,
                token,
                coordinator: self.coordinator.clone(),
                registry: Arc::downgrade(&self.registry),
            },
        ));
        self.registry.register(Arc::clone(&instance));

        let stopped = instance.startup_token();
        let readiness = {
            let mut process = instance.lock_process().await;
            match process.as_mut() {
                Some(child) => {
                    probe::await_ready(
                        self.control.as_ref(),
                        endpoint,
                        child,
                        launched_at,
                        self.config.startup_timeout,
                        self.config.poll_interval,
                        &stopped,
                    )
                    .await
                }
                // Stopped concurrently before probing began.
                None => Err(NotReady::Stopped),
            }
        };

        match readiness {
            Ok(()) => {
                instance.mark(InstanceState::Ready);
                tracing::info!(instance = %id, %endpoint, "daemon ready");
                Ok(instance)
            }
            Err(NotReady::Timeout) => {
                tracing::warn!(instance = %id, %endpoint, "daemon startup timed out");
                Err(StartError::StartupTimeout {
                    id,
                    endpoint,
                    timeout: self.config.startup_timeout,
                })
            }
            Err(NotReady::Stopped) => {
                tracing::debug!(instance = %id, %endpoint, "daemon stopped during startup");
                Err(StartError::ProcessExit {
                    id,
                    endpoint,
                    reason: "stopped before becoming ready".into(),
                    output: output.lines(),
                })
            }
            Err(NotReady::Exited(reason)) => {
                tracing::warn!(instance = %id, %endpoint, %reason, "daemon exited during startup");
                Err(StartError::ProcessExit {
                    id,
                    endpoint,
                    reason,
                    output: output.lines(),
                })
            }
        }
    }

    /// Stops one registered instance. Unknown ids are ignored.
    pub async fn stop_instance(&self, id: InstanceId) {
        if let Some(instance) = self.registry.get(id) {
            instance.stop().await;
        }
    }

    /// Stops every registered instance concurrently and clears the registry.
    pub async fn stop_all(&self) {
        let instances = self.registry.snapshot();
        if !instances.is_empty() {
            tracing::debug!(count = instances.len(), "stopping all daemon instances");
        }
        join_all(instances.iter().map(|instance| instance.stop())).await;
        self.registry.clear();
    }

    /// Registered instances in start order.
    pub fn instances(&self) -> Vec<Arc<DaemonInstance>> {
        self.registry.snapshot()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DaemonManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonManager")
            .field("config", &self.config)
            .field("ports", &self.ports)
            .field("instances", &self.registry.len())
            .finish_non_exhaustive()
    }
}
