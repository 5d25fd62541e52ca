//! Locations of the binaries under test.
//!
//! CI checks the sibling projects out inside the working directory; local
//! development keeps them next to it.

use std::{
    env,
    path::{Path, PathBuf},
};

pub const DAEMON_BINARY_ENV_VAR: &str = "CENTY_DAEMON_BIN";
pub const CLI_BINARY_ENV_VAR: &str = "CENTY_CLI_BIN";

const DAEMON_RELATIVE: &str = "centy-daemon/target/release/centy-daemon";
const CLI_RELATIVE: &str = "centy-cli/bin/run.js";

/// Path of the daemon binary.
pub fn daemon_binary() -> PathBuf {
    resolve(DAEMON_BINARY_ENV_VAR, DAEMON_RELATIVE)
}

/// Path of the command-line front-end entry point.
pub fn cli_binary() -> PathBuf {
    resolve(CLI_BINARY_ENV_VAR, CLI_RELATIVE)
}

fn resolve(env_var: &str, relative: &str) -> PathBuf {
    if let Some(path) = env::var_os(env_var).filter(|value| !value.is_empty()) {
        return PathBuf::from(path);
    }
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_from(&cwd, relative)
}

fn resolve_from(cwd: &Path, relative: &str) -> PathBuf {
    let ci_path = cwd.join(relative);
    if ci_path.exists() {
        return ci_path;
    }
    cwd.join("..").join(relative)
}
