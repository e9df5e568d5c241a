use anyhow::Result;
use declarative::UserManager;

use super::SystemHost;
use crate::runner;

impl UserManager for SystemHost {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(runner::run_quiet("id", &["-u", name]))
    }

    fn create(&self, name: &str, system: bool) -> Result<()> {
        log::debug!("useradd {name}");
        let args: &[&str] = if system {
            &["--system", "--no-create-home", "--shell", "/usr/sbin/nologin", name]
        } else {
            &["--create-home", name]
        };
        runner::run_capture("useradd", args).map(|_| ())
    }

    fn remove(&self, name: &str) -> Result<()> {
        log::debug!("userdel {name}");
        runner::run_capture("userdel", &[name]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_exists() {
        let host = SystemHost::new();
        assert!(host.exists("root").unwrap());
        assert!(!host.exists("no-such-user-clusterform").unwrap());
    }
}
