//! Apply context and provider traits
//!
//! These traits allow the engine to converge resources without depending
//! on a specific host, package manager, or UI. The binary supplies real
//! implementations; tests use [`MemoryHost`](crate::memory::MemoryHost).

use crate::params::ParameterSet;
use crate::resource::{Mode, ResourceId};
use crate::types::{CommandOutput, Status};
use anyhow::Result;

/// What is at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Missing,
    File,
    Directory,
}

/// Observed state of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub kind: FileKind,
    pub mode: Option<Mode>,
    pub owner: Option<String>,
    pub group: Option<String>,
    /// Content of a regular file
    pub content: Option<Vec<u8>>,
}

impl FileState {
    pub fn missing() -> Self {
        Self {
            kind: FileKind::Missing,
            mode: None,
            owner: None,
            group: None,
            content: None,
        }
    }
}

/// Filesystem access
pub trait FileSystem: Send + Sync {
    fn inspect(&self, path: &str) -> Result<FileState>;

    fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    fn create_dir(&self, path: &str) -> Result<()>;

    /// Remove a file or directory tree
    fn remove(&self, path: &str) -> Result<()>;

    fn set_mode(&self, path: &str, mode: Mode) -> Result<()>;

    /// Change owner and/or group; `None` leaves that part alone
    fn set_owner(&self, path: &str, owner: Option<&str>, group: Option<&str>) -> Result<()>;
}

/// Package installation
pub trait PackageManager: Send + Sync {
    fn is_installed(&self, name: &str) -> Result<bool>;

    fn ensure_installed(&self, name: &str) -> Result<()>;

    fn remove(&self, name: &str) -> Result<()>;
}

/// Observed state of a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStatus {
    pub running: bool,
    pub enabled: bool,
}

/// Service supervision
pub trait ServiceManager: Send + Sync {
    fn status(&self, name: &str) -> Result<ServiceStatus>;

    /// Start the service and set whether it starts at boot
    fn ensure_running(&self, name: &str, enabled: bool) -> Result<()>;

    /// Stop the service and set whether it starts at boot
    fn stop(&self, name: &str, enabled: bool) -> Result<()>;

    fn restart(&self, name: &str) -> Result<()>;
}

/// Shell command execution
pub trait CommandRunner: Send + Sync {
    /// Run `command` through a shell, with `path` as its search path when given
    fn run(&self, command: &str, path: Option<&str>) -> Result<CommandOutput>;
}

/// System accounts
pub trait UserManager: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool>;

    fn create(&self, name: &str, system: bool) -> Result<()>;

    fn remove(&self, name: &str) -> Result<()>;
}

/// Database objects
///
/// Accounts are written `user@host`, tables `database.table`.
pub trait DatabaseAdmin: Send + Sync {
    fn database_exists(&self, name: &str) -> Result<bool>;

    fn create_database(&self, name: &str, charset: &str) -> Result<()>;

    fn drop_database(&self, name: &str) -> Result<()>;

    /// `None` when the account does not exist, otherwise whether its password matches
    fn user_matches(&self, account: &str, password: &str) -> Result<Option<bool>>;

    /// Create the account or reset its password
    fn ensure_user(&self, account: &str, password: &str) -> Result<()>;

    fn drop_user(&self, account: &str) -> Result<()>;

    fn grant_matches(
        &self,
        account: &str,
        table: &str,
        privileges: &[String],
        grant_option: bool,
    ) -> Result<bool>;

    fn ensure_grant(
        &self,
        account: &str,
        table: &str,
        privileges: &[String],
        grant_option: bool,
    ) -> Result<()>;
}

/// File content generation
pub trait TemplateRenderer: Send + Sync {
    /// Render a named template with a component's parameters
    fn render(&self, template: &str, params: &ParameterSet) -> Result<String>;

    /// Fetch a named static file
    fn fetch(&self, source: &str) -> Result<Vec<u8>>;
}

/// The full set of capabilities a run needs
#[derive(Clone, Copy)]
pub struct Providers<'a> {
    pub files: &'a dyn FileSystem,
    pub packages: &'a dyn PackageManager,
    pub services: &'a dyn ServiceManager,
    pub commands: &'a dyn CommandRunner,
    pub users: &'a dyn UserManager,
    pub database: &'a dyn DatabaseAdmin,
    pub templates: &'a dyn TemplateRenderer,
}

impl<'a> Providers<'a> {
    /// Use one host for every capability except templates
    pub fn from_host<H>(host: &'a H, templates: &'a dyn TemplateRenderer) -> Self
    where
        H: FileSystem
            + PackageManager
            + ServiceManager
            + CommandRunner
            + UserManager
            + DatabaseAdmin,
    {
        Self {
            files: host,
            packages: host,
            services: host,
            commands: host,
            users: host,
            database: host,
            templates,
        }
    }
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called once the plan is known
    fn on_run_start(&mut self, total: usize, dry_run: bool);

    /// Called when starting to apply a single resource
    fn on_resource_start(&mut self, id: &ResourceId, description: &str);

    /// Called when a resource reaches its final state
    fn on_resource_complete(&mut self, id: &ResourceId, status: &Status);

    /// Called when the run finishes
    fn on_run_complete(&mut self);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize, _dry_run: bool) {}
    fn on_resource_start(&mut self, _id: &ResourceId, _description: &str) {}
    fn on_resource_complete(&mut self, _id: &ResourceId, _status: &Status) {}
    fn on_run_complete(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Context passed to resource apply operations
#[derive(Clone, Copy)]
pub struct ApplyContext<'a> {
    /// Query only; report what would change
    pub dry_run: bool,
    pub providers: Providers<'a>,
}

impl<'a> ApplyContext<'a> {
    pub fn new(dry_run: bool, providers: Providers<'a>) -> Self {
        Self { dry_run, providers }
    }
}
