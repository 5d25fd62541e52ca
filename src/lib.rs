//! # daemon-harness
//!
//! `daemon-harness` gives end-to-end tests a clean daemon to talk to.
//! It launches the daemon binary on a fresh local port with a private scratch
//! directory, waits until it answers over gRPC, and tears it down again:
//! politely first, then with signals.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! use daemon_harness::DaemonManagerBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = DaemonManagerBuilder::from_env().build();
//!
//!     let daemon = manager.start().await?;
//!     println!("daemon listening on {}", daemon.address());
//!
//!     // ... drive the daemon ...
//!
//!     manager.stop_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## What you get
//!
//! * **Isolation** – every instance gets its own port and workspace directory.
//! * **Reliable startup** – readiness is polled, and a daemon that dies during
//!   startup fails fast instead of waiting out the timeout.
//! * **Leak-free teardown** – stopping never fails: cooperative shutdown,
//!   SIGTERM, then SIGKILL, and the workspace is always removed.
//!
//! ## API overview
//!
//! | Call                            | Purpose                                              |
//! | ------------------------------- | ---------------------------------------------------- |
//! | `DaemonManager::start()`        | Launch an isolated instance and wait until ready     |
//! | `DaemonInstance::stop()`        | Stop one instance (idempotent)                       |
//! | `DaemonManager::stop_all()`     | Stop every instance the manager started              |
//! | `SharedDaemon::get()`           | Start-or-reuse one daemon shared across tests        |
//! | `SharedDaemon::release()`       | Stop the shared daemon                               |
//! | `DaemonInstance::external(addr)`| Use a daemon started by hand                         |
//! | `CliCommand::output()`          | Run the CLI front-end and capture its output         |

pub use cli::{CliCommand, CliError, CliOutput};
pub use control::{ControlPlane, DaemonInfo, GrpcControl};
pub use error::{ControlError, StartError};
pub use instance::{DaemonInstance, InstanceId, InstanceState};
pub use launcher::{OutputLog, OutputStream};
pub use manager::{builder::DaemonManagerBuilder, shared::SharedDaemon, DaemonManager};

pub mod address;
pub mod cli;
pub mod control;
mod error;
pub mod instance;
mod launcher;
mod manager;
pub mod paths;
mod probe;
mod shutdown;
pub mod workspace;
