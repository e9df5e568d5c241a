//! Path resolution for clusterform
//!
//! # Environment Variables
//!
//! - `CLUSTERFORM_CONFIG` - Path of the host configuration file (see `--config`)
//! - `CLUSTERFORM_CONFIG_DIR` - Directory holding `clusterform.toml` / `.json`
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `CLUSTERFORM_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/clusterform` (if set)
//! 3. `~/.config/clusterform` when it exists (unprivileged runs)
//! 4. `/etc/clusterform`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "CLUSTERFORM_CONFIG_DIR";

/// Environment variable for the config file itself
pub const ENV_CONFIG_FILE: &str = "CLUSTERFORM_CONFIG";

/// System-wide config directory
pub const SYSTEM_CONFIG_DIR: &str = "/etc/clusterform";

/// Base name of the config file, without extension
pub const CONFIG_NAME: &str = "clusterform";

/// Get the clusterform config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(CONFIG_NAME);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    if let Some(home) = dirs::home_dir() {
        let user_path = home.join(".config").join(CONFIG_NAME);
        if user_path.exists() {
            log::debug!("Using user config dir: {}", user_path.display());
            return Ok(user_path);
        }
    }

    log::debug!("Using system config dir: {SYSTEM_CONFIG_DIR}");
    Ok(PathBuf::from(SYSTEM_CONFIG_DIR))
}

/// Locate the host configuration file
///
/// An explicit path wins; otherwise `clusterform.toml` and then
/// `clusterform.json` are looked up in [`config_dir`].
pub fn config_file(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand(path));
    }

    let dir = config_dir()?;
    ["toml", "json"]
        .iter()
        .map(|ext| dir.join(format!("{CONFIG_NAME}.{ext}")))
        .find(|p| p.exists())
        .with_context(|| {
            format!(
                "No {CONFIG_NAME}.toml or {CONFIG_NAME}.json in {} (set --config or {ENV_CONFIG_FILE})",
                dir.display()
            )
        })
}

/// Expand ~ and environment variables in a path string.
///
/// # Examples
///
/// ```ignore
/// let home_path = paths::expand("~/cluster");
/// let var_path = paths::expand("$HOME/cluster");
/// ```
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Expand `path` and resolve it against `base` when relative
pub fn resolve(base: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that touch the process environment
    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// Uses unsafe env::set_var/remove_var; only call from tests that do not
    /// read the same variable concurrently.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: Tests run in isolation
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    /// Helper to run a test with env var removed
    fn without_env_var<F, R>(key: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: Tests run in isolation and don't read env vars concurrently
        unsafe { env::remove_var(key) };
        let result = f();
        if let Some(v) = original {
            // SAFETY: Tests run in isolation
            unsafe { env::set_var(key, v) };
        }
        result
    }

    #[test]
    fn test_config_dir_env_override() {
        let _env = lock_env();
        with_env_var(ENV_CONFIG_DIR, "/custom/clusterform", || {
            assert_eq!(config_dir().unwrap(), PathBuf::from("/custom/clusterform"));
        });
    }

    #[test]
    fn test_config_dir_xdg() {
        let _env = lock_env();
        without_env_var(ENV_CONFIG_DIR, || {
            with_env_var("XDG_CONFIG_HOME", "/tmp/xdg-clusterform-test", || {
                assert_eq!(
                    config_dir().unwrap(),
                    PathBuf::from("/tmp/xdg-clusterform-test/clusterform")
                );
            });
        });
    }

    #[test]
    fn test_config_file_prefers_toml() {
        let _env = lock_env();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clusterform.json"), "{}").unwrap();
        let dir_str = dir.path().to_str().unwrap().to_string();

        with_env_var(ENV_CONFIG_DIR, &dir_str, || {
            assert_eq!(config_file(None).unwrap(), dir.path().join("clusterform.json"));
            std::fs::write(dir.path().join("clusterform.toml"), "").unwrap();
            assert_eq!(config_file(None).unwrap(), dir.path().join("clusterform.toml"));
        });
    }

    #[test]
    fn test_config_file_missing() {
        let _env = lock_env();
        let dir = tempfile::tempdir().unwrap();
        let dir_str = dir.path().to_str().unwrap().to_string();
        with_env_var(ENV_CONFIG_DIR, &dir_str, || {
            let err = config_file(None).unwrap_err();
            assert!(err.to_string().contains("No clusterform.toml"));
        });
    }

    #[test]
    fn test_config_file_explicit() {
        assert_eq!(
            config_file(Some("/srv/node.toml")).unwrap(),
            PathBuf::from("/srv/node.toml")
        );
    }

    #[test]
    fn test_expand_with_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/cluster/data"), home.join("cluster").join("data"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_CLUSTERFORM_VAR/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_CLUSTERFORM_VAR/file"));
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let base = Path::new("/etc/clusterform");
        assert_eq!(resolve(base, "common.toml"), base.join("common.toml"));
        assert_eq!(resolve(base, "/srv/data.toml"), PathBuf::from("/srv/data.toml"));
    }
}
