use anyhow::{Context, Result};
use declarative::{FileKind, FileState, FileSystem, Mode};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;

use super::SystemHost;
use crate::runner;

impl FileSystem for SystemHost {
    fn inspect(&self, path: &str) -> Result<FileState> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FileState::missing()),
            Err(e) => return Err(e).with_context(|| format!("Failed to stat {path}")),
        };

        let (owner, group) = ownership(path)?;
        let (kind, content) = if meta.is_dir() {
            (FileKind::Directory, None)
        } else {
            let content = fs::read(path).with_context(|| format!("Failed to read {path}"))?;
            (FileKind::File, Some(content))
        };

        Ok(FileState {
            kind,
            mode: Some(Mode(meta.permissions().mode() & 0o7777)),
            owner: Some(owner),
            group: Some(group),
            content,
        })
    }

    fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        log::debug!("write {path} ({} bytes)", content.len());
        fs::write(path, content).with_context(|| format!("Failed to write {path}"))
    }

    fn create_dir(&self, path: &str) -> Result<()> {
        log::debug!("mkdir {path}");
        fs::create_dir_all(path).with_context(|| format!("Failed to create {path}"))
    }

    fn remove(&self, path: &str) -> Result<()> {
        log::debug!("remove {path}");
        let result = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => Err(e),
        };
        result.with_context(|| format!("Failed to remove {path}"))
    }

    fn set_mode(&self, path: &str, mode: Mode) -> Result<()> {
        log::debug!("chmod {mode} {path}");
        fs::set_permissions(path, fs::Permissions::from_mode(mode.bits()))
            .with_context(|| format!("Failed to set mode {mode} on {path}"))
    }

    fn set_owner(&self, path: &str, owner: Option<&str>, group: Option<&str>) -> Result<()> {
        let spec = match (owner, group) {
            (Some(owner), Some(group)) => format!("{owner}:{group}"),
            (Some(owner), None) => owner.to_string(),
            (None, Some(group)) => format!(":{group}"),
            (None, None) => return Ok(()),
        };
        log::debug!("chown {spec} {path}");
        runner::run_capture("chown", &[&spec, path]).map(|_| ())
    }
}

/// Owner and group names of a path
fn ownership(path: &str) -> Result<(String, String)> {
    let out = runner::run_capture("stat", &["-c", "%U:%G", path])?;
    let (owner, group) = out
        .split_once(':')
        .with_context(|| format!("Unexpected stat output for {path}: {out}"))?;
    Ok((owner.to_string(), group.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn path(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).display().to_string()
    }

    #[test]
    fn test_missing_path() {
        let dir = TempDir::new().unwrap();
        let state = SystemHost::new().inspect(&path(&dir, "nope")).unwrap();
        assert_eq!(state, FileState::missing());
    }

    #[test]
    fn test_write_then_inspect() {
        let dir = TempDir::new().unwrap();
        let host = SystemHost::new();
        let file = path(&dir, "my.cnf");

        host.write(&file, b"[mysqld]\n").unwrap();
        host.set_mode(&file, Mode(0o640)).unwrap();

        let state = host.inspect(&file).unwrap();
        assert_eq!(state.kind, FileKind::File);
        assert_eq!(state.mode, Some(Mode(0o640)));
        assert_eq!(state.content.as_deref(), Some(&b"[mysqld]\n"[..]));
        assert!(state.owner.is_some());
    }

    #[test]
    fn test_directories() {
        let dir = TempDir::new().unwrap();
        let host = SystemHost::new();
        let nested = path(&dir, "etc/mysql/conf.d");

        host.create_dir(&nested).unwrap();
        let state = host.inspect(&nested).unwrap();
        assert_eq!(state.kind, FileKind::Directory);
        assert_eq!(state.content, None);

        host.remove(&path(&dir, "etc")).unwrap();
        assert_eq!(host.inspect(&nested).unwrap().kind, FileKind::Missing);
        // removing again is fine
        host.remove(&path(&dir, "etc")).unwrap();
    }

    #[test]
    fn test_set_owner_without_names_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let host = SystemHost::new();
        let file = path(&dir, "f");
        host.write(&file, b"x").unwrap();
        host.set_owner(&file, None, None).unwrap();
    }
}
