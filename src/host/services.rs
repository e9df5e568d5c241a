use anyhow::Result;
use declarative::{ServiceManager, ServiceStatus};

use super::SystemHost;
use crate::runner;

impl ServiceManager for SystemHost {
    fn status(&self, name: &str) -> Result<ServiceStatus> {
        Ok(ServiceStatus {
            running: runner::run_quiet("systemctl", &["is-active", "--quiet", name]),
            enabled: runner::run_quiet("systemctl", &["is-enabled", "--quiet", name]),
        })
    }

    fn ensure_running(&self, name: &str, enabled: bool) -> Result<()> {
        set_enabled(name, enabled)?;
        systemctl("start", name)
    }

    fn stop(&self, name: &str, enabled: bool) -> Result<()> {
        systemctl("stop", name)?;
        set_enabled(name, enabled)
    }

    fn restart(&self, name: &str) -> Result<()> {
        systemctl("restart", name)
    }
}

fn set_enabled(name: &str, enabled: bool) -> Result<()> {
    systemctl(if enabled { "enable" } else { "disable" }, name)
}

fn systemctl(verb: &str, name: &str) -> Result<()> {
    log::debug!("systemctl {verb} {name}");
    runner::run_capture("systemctl", &[verb, name]).map(|_| ())
}
