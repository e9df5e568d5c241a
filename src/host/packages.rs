use anyhow::{Result, bail};
use declarative::PackageManager;

use super::SystemHost;
use crate::runner;

impl PackageManager for SystemHost {
    fn is_installed(&self, name: &str) -> Result<bool> {
        let out = runner::output("dpkg-query", &["-W", "-f=${Status}", name])?;
        Ok(out.success && is_installed_status(&out.stdout_str()))
    }

    fn ensure_installed(&self, name: &str) -> Result<()> {
        log::debug!("apt-get install {name}");
        apt_get(&["install", "-y", "-q", name])
    }

    fn remove(&self, name: &str) -> Result<()> {
        log::debug!("apt-get remove {name}");
        apt_get(&["remove", "-y", "-q", name])
    }
}

fn apt_get(args: &[&str]) -> Result<()> {
    let mut argv = vec!["DEBIAN_FRONTEND=noninteractive", "apt-get"];
    argv.extend_from_slice(args);
    let out = runner::output("env", &argv)?;
    if !out.success {
        bail!("apt-get {} failed: {}", args.join(" "), out.stderr_str().trim());
    }
    Ok(())
}

/// Whether a dpkg status line (`want flag status`) describes an installed package
fn is_installed_status(status: &str) -> bool {
    status.split_whitespace().nth(2) == Some("installed")
}
