//! The real host
//!
//! Implements the engine's provider traits over the local filesystem,
//! apt/dpkg, systemd, `sh -c`, the shadow utilities and the `mysql` client.
//! Every mutating call is logged at debug level.

mod accounts;
mod files;
mod mysql;
mod packages;
mod services;

use anyhow::Result;
use declarative::{CommandOutput, CommandRunner};

use crate::runner;

/// Providers backed by the machine this process runs on
#[derive(Debug, Default)]
pub struct SystemHost {
    mysql: mysql::Client,
}

impl SystemHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandRunner for SystemHost {
    fn run(&self, command: &str, path: Option<&str>) -> Result<CommandOutput> {
        log::debug!("sh -c {command}");
        runner::shell(command, path)
    }
}
