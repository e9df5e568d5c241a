//! In-memory host
//!
//! Implements every provider trait over a shared [`MemoryState`], records
//! each mutating call, and lets tests preset command results and failures.

use crate::context::{
    CommandRunner, DatabaseAdmin, FileKind, FileState, FileSystem, PackageManager, ServiceManager,
    ServiceStatus, TemplateRenderer, UserManager,
};
use crate::params::ParameterSet;
use crate::resource::Mode;
use crate::types::CommandOutput;
use anyhow::{Result, anyhow, bail};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// A grant as stored by [`MemoryHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRecord {
    pub privileges: Vec<String>,
    pub grant_option: bool,
}

/// Everything the in-memory host knows
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub files: BTreeMap<String, FileState>,
    pub packages: BTreeSet<String>,
    /// Packages whose installation fails
    pub failing_packages: BTreeSet<String>,
    pub services: BTreeMap<String, ServiceStatus>,
    /// Service restarts, in order
    pub restarts: Vec<String>,
    /// User name to system flag
    pub users: BTreeMap<String, bool>,
    /// Database name to charset
    pub databases: BTreeMap<String, String>,
    /// Account to password
    pub db_users: BTreeMap<String, String>,
    /// (account, table) to grant
    pub grants: BTreeMap<(String, String), GrantRecord>,
    /// Every command run, guards included
    pub commands: Vec<String>,
    /// Preset results; unlisted commands exit 0
    pub command_results: BTreeMap<String, CommandOutput>,
    pub templates: BTreeMap<String, String>,
    pub sources: BTreeMap<String, Vec<u8>>,
    /// Description of each mutating call, in order
    pub mutations: Vec<String>,
}

/// Provider implementation backed by [`MemoryState`]
#[derive(Debug, Default)]
pub struct MemoryHost {
    state: Mutex<MemoryState>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Modify the state directly
    pub fn update(&self, f: impl FnOnce(&mut MemoryState)) {
        f(&mut self.lock());
    }

    pub fn snapshot(&self) -> MemoryState {
        self.lock().clone()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    pub fn commands_run(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn add_file(&self, path: &str, content: &str, mode: Mode) {
        self.update(|s| {
            s.files.insert(
                path.to_string(),
                FileState {
                    kind: FileKind::File,
                    mode: Some(mode),
                    owner: Some("root".into()),
                    group: Some("root".into()),
                    content: Some(content.as_bytes().to_vec()),
                },
            );
        });
    }

    pub fn set_command_result(&self, command: &str, output: CommandOutput) {
        self.update(|s| {
            s.command_results.insert(command.to_string(), output);
        });
    }

    pub fn fail_package(&self, name: &str) {
        self.update(|s| {
            s.failing_packages.insert(name.to_string());
        });
    }

    pub fn add_template(&self, name: &str, body: &str) {
        self.update(|s| {
            s.templates.insert(name.to_string(), body.to_string());
        });
    }

    pub fn add_source(&self, name: &str, content: &[u8]) {
        self.update(|s| {
            s.sources.insert(name.to_string(), content.to_vec());
        });
    }

    fn record(&self, state: &mut MemoryState, what: String) {
        log::trace!("memory host: {what}");
        state.mutations.push(what);
    }
}

impl FileSystem for MemoryHost {
    fn inspect(&self, path: &str) -> Result<FileState> {
        Ok(self
            .lock()
            .files
            .get(path)
            .cloned()
            .unwrap_or_else(FileState::missing))
    }

    fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let mut s = self.lock();
        let entry = s.files.entry(path.to_string()).or_insert_with(|| FileState {
            kind: FileKind::File,
            mode: Some(Mode(0o644)),
            owner: Some("root".into()),
            group: Some("root".into()),
            content: None,
        });
        entry.content = Some(content.to_vec());
        self.record(&mut s, format!("write {path}"));
        Ok(())
    }

    fn create_dir(&self, path: &str) -> Result<()> {
        let mut s = self.lock();
        s.files.insert(
            path.to_string(),
            FileState {
                kind: FileKind::Directory,
                mode: Some(Mode(0o755)),
                owner: Some("root".into()),
                group: Some("root".into()),
                content: None,
            },
        );
        self.record(&mut s, format!("mkdir {path}"));
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let mut s = self.lock();
        let prefix = format!("{}/", path.trim_end_matches('/'));
        s.files.retain(|p, _| p != path && !p.starts_with(&prefix));
        self.record(&mut s, format!("remove {path}"));
        Ok(())
    }

    fn set_mode(&self, path: &str, mode: Mode) -> Result<()> {
        let mut s = self.lock();
        let file = s.files.get_mut(path).ok_or_else(|| anyhow!("{path}: no such file"))?;
        file.mode = Some(mode);
        self.record(&mut s, format!("chmod {mode} {path}"));
        Ok(())
    }

    fn set_owner(&self, path: &str, owner: Option<&str>, group: Option<&str>) -> Result<()> {
        let mut s = self.lock();
        let file = s.files.get_mut(path).ok_or_else(|| anyhow!("{path}: no such file"))?;
        if let Some(owner) = owner {
            file.owner = Some(owner.to_string());
        }
        if let Some(group) = group {
            file.group = Some(group.to_string());
        }
        self.record(&mut s, format!("chown {path}"));
        Ok(())
    }
}

impl PackageManager for MemoryHost {
    fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.lock().packages.contains(name))
    }

    fn ensure_installed(&self, name: &str) -> Result<()> {
        let mut s = self.lock();
        if s.failing_packages.contains(name) {
            bail!("Unable to locate package {name}");
        }
        s.packages.insert(name.to_string());
        self.record(&mut s, format!("install {name}"));
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut s = self.lock();
        s.packages.remove(name);
        self.record(&mut s, format!("purge {name}"));
        Ok(())
    }
}

impl ServiceManager for MemoryHost {
    fn status(&self, name: &str) -> Result<ServiceStatus> {
        Ok(self.lock().services.get(name).copied().unwrap_or_default())
    }

    fn ensure_running(&self, name: &str, enabled: bool) -> Result<()> {
        let mut s = self.lock();
        s.services.insert(
            name.to_string(),
            ServiceStatus {
                running: true,
                enabled,
            },
        );
        self.record(&mut s, format!("start {name}"));
        Ok(())
    }

    fn stop(&self, name: &str, enabled: bool) -> Result<()> {
        let mut s = self.lock();
        s.services.insert(
            name.to_string(),
            ServiceStatus {
                running: false,
                enabled,
            },
        );
        self.record(&mut s, format!("stop {name}"));
        Ok(())
    }

    fn restart(&self, name: &str) -> Result<()> {
        let mut s = self.lock();
        s.restarts.push(name.to_string());
        s.services.entry(name.to_string()).or_default().running = true;
        self.record(&mut s, format!("restart {name}"));
        Ok(())
    }
}

impl CommandRunner for MemoryHost {
    fn run(&self, command: &str, _path: Option<&str>) -> Result<CommandOutput> {
        let mut s = self.lock();
        s.commands.push(command.to_string());
        Ok(s
            .command_results
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandOutput::exit(0)))
    }
}

impl UserManager for MemoryHost {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().users.contains_key(name))
    }

    fn create(&self, name: &str, system: bool) -> Result<()> {
        let mut s = self.lock();
        s.users.insert(name.to_string(), system);
        self.record(&mut s, format!("useradd {name}"));
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut s = self.lock();
        s.users.remove(name);
        self.record(&mut s, format!("userdel {name}"));
        Ok(())
    }
}

impl DatabaseAdmin for MemoryHost {
    fn database_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().databases.contains_key(name))
    }

    fn create_database(&self, name: &str, charset: &str) -> Result<()> {
        let mut s = self.lock();
        s.databases.insert(name.to_string(), charset.to_string());
        self.record(&mut s, format!("create database {name}"));
        Ok(())
    }

    fn drop_database(&self, name: &str) -> Result<()> {
        let mut s = self.lock();
        s.databases.remove(name);
        self.record(&mut s, format!("drop database {name}"));
        Ok(())
    }

    fn user_matches(&self, account: &str, password: &str) -> Result<Option<bool>> {
        Ok(self.lock().db_users.get(account).map(|p| p == password))
    }

    fn ensure_user(&self, account: &str, password: &str) -> Result<()> {
        let mut s = self.lock();
        s.db_users.insert(account.to_string(), password.to_string());
        self.record(&mut s, format!("create user {account}"));
        Ok(())
    }

    fn drop_user(&self, account: &str) -> Result<()> {
        let mut s = self.lock();
        s.db_users.remove(account);
        self.record(&mut s, format!("drop user {account}"));
        Ok(())
    }

    fn grant_matches(
        &self,
        account: &str,
        table: &str,
        privileges: &[String],
        grant_option: bool,
    ) -> Result<bool> {
        let key = (account.to_string(), table.to_string());
        Ok(self.lock().grants.get(&key).is_some_and(|g| {
            g.privileges == privileges && g.grant_option == grant_option
        }))
    }

    fn ensure_grant(
        &self,
        account: &str,
        table: &str,
        privileges: &[String],
        grant_option: bool,
    ) -> Result<()> {
        let mut s = self.lock();
        s.grants.insert(
            (account.to_string(), table.to_string()),
            GrantRecord {
                privileges: privileges.to_vec(),
                grant_option,
            },
        );
        self.record(&mut s, format!("grant on {table} to {account}"));
        Ok(())
    }
}

impl TemplateRenderer for MemoryHost {
    fn render(&self, template: &str, params: &ParameterSet) -> Result<String> {
        let body = self
            .lock()
            .templates
            .get(template)
            .cloned()
            .ok_or_else(|| anyhow!("unknown template {template}"))?;
        let placeholder = Regex::new(r"\{\{\s*(\w+)\s*\}\}")?;
        Ok(placeholder
            .replace_all(&body, |caps: &regex::Captures<'_>| {
                params.get(&caps[1]).map(ToString::to_string).unwrap_or_default()
            })
            .into_owned())
    }

    fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        self.lock()
            .sources
            .get(source)
            .cloned()
            .ok_or_else(|| anyhow!("unknown source {source}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{NoDefaults, ParamDef, ParamSchema};

    #[test]
    fn test_render_substitutes_params() {
        let host = MemoryHost::new();
        host.add_template(
            "garbd.cfg",
            "GALERA_NODES=\"{{ peer_ip }}:4567\"\nGALERA_GROUP=\"{{cluster_name}}\"\n",
        );
        let schema = ParamSchema::new("percona::garbd")
            .param(ParamDef::with_default("peer_ip", "10.0.0.1"))
            .param(ParamDef::with_default("cluster_name", "prod"));
        let params = ParameterSet::resolve(&schema, &BTreeMap::new(), &NoDefaults).unwrap();

        assert_eq!(
            host.render("garbd.cfg", &params).unwrap(),
            "GALERA_NODES=\"10.0.0.1:4567\"\nGALERA_GROUP=\"prod\"\n"
        );
        assert!(host.render("missing", &params).is_err());
    }

    #[test]
    fn test_remove_directory_tree() {
        let host = MemoryHost::new();
        host.create_dir("/etc/garbd").unwrap();
        host.write("/etc/garbd/garbd.cfg", b"x").unwrap();
        host.write("/etc/garbd2", b"y").unwrap();
        FileSystem::remove(&host, "/etc/garbd").unwrap();
        let files: Vec<String> = host.snapshot().files.into_keys().collect();
        assert_eq!(files, vec!["/etc/garbd2".to_string()]);
    }
}
