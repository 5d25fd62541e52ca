use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{manager::builder::DaemonManagerBuilder, DaemonInstance, DaemonManager, StartError};

/// A lazily started daemon shared by tests that do not need isolation.
///
/// The slot is an ordinary value: keep it wherever the test suite keeps its
/// fixtures (for example in a `static` initialised with `LazyLock`), and
/// construct separate slots for separately shared daemons.
pub struct SharedDaemon {
    builder: DaemonManagerBuilder,
    slot: Mutex<Option<(DaemonManager, Arc<DaemonInstance>)>>,
}

impl SharedDaemon {
    pub fn new(builder: DaemonManagerBuilder) -> Self {
        Self {
            builder,
            slot: Mutex::new(None),
        }
    }

    /// Returns the shared instance, starting it on first use.
    ///
    /// Concurrent callers wait for the same start. If the start fails, the
    /// half-started daemon is torn down and the next call tries again.
    pub async fn get(&self) -> Result<Arc<DaemonInstance>, StartError> {
        let mut slot = self.slot.lock().await;
        if let Some((_, instance)) = slot.as_ref() {
            return Ok(Arc::clone(instance));
        }

        let manager = self.builder.clone().build();
        match manager.start().await {
            Ok(instance) => {
                tracing::info!(endpoint = %instance.endpoint(), "shared daemon started");
                *slot = Some((manager, Arc::clone(&instance)));
                Ok(instance)
            }
            Err(e) => {
                manager.stop_all().await;
                Err(e)
            }
        }
    }

    /// Stops the shared instance, if any, and empties the slot.
    pub async fn release(&self) {
        let taken = self.slot.lock().await.take();
        if let Some((manager, instance)) = taken {
            tracing::info!(endpoint = %instance.endpoint(), "releasing shared daemon");
            manager.stop_all().await;
        }
    }

    /// Whether a shared instance is currently cached.
    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

impl Default for SharedDaemon {
    fn default() -> Self {
        Self::new(DaemonManagerBuilder::from_env())
    }
}

impl std::fmt::Debug for SharedDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDaemon")
            .field("builder", &self.builder)
            .finish_non_exhaustive()
    }
}
