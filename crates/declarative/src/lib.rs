//! # Declarative
//!
//! A desired-state reconciliation engine.
//!
//! Resources (files, services, packages, commands, users, database objects)
//! are declared with their relationships, validated, ordered into a
//! dependency graph, and converged against a host idempotently, with
//! refresh signals propagated along `subscribe` / `notify` edges.
//!
//! ## Core Concepts
//!
//! - **Resource**: a typed unit of desired state, identified by (kind, title)
//! - **Graph**: ordering and refresh edges between resources; must be acyclic
//! - **RunPlan**: stable topological order (declaration order breaks ties)
//! - **ParameterSet**: resolved parameters of one component instance
//! - **Catalog**: turns component declarations into resources
//! - **RunReport**: the final state of every resource in a run
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     ExecSpec, ExecuteOptions, FileSpec, Kind, MemoryHost, NoProgress, Providers,
//!     Resource, ResourceId, reconcile,
//! };
//!
//! let config = Resource::from_spec(FileSpec::present("/etc/mysql/my.cnf").content("[mysqld]\n"))?
//!     .notify(ResourceId::new(Kind::Exec, "mysqld-restart"));
//! let restart = Resource::new(
//!     "mysqld-restart",
//!     ExecSpec::new("service mysql restart").refresh_only(true),
//! )?;
//!
//! let host = MemoryHost::new();
//! let report = reconcile(
//!     vec![config, restart],
//!     Providers::from_host(&host, &host),
//!     &ExecuteOptions::default(),
//!     &mut NoProgress,
//! )?;
//! assert!(report.is_success());
//! ```
//!
//! ## Provider Traits
//!
//! The engine reaches the host only through traits:
//!
//! - [`FileSystem`], [`PackageManager`], [`ServiceManager`], [`CommandRunner`],
//!   [`UserManager`], [`DatabaseAdmin`]: inspect and mutate system state
//! - [`TemplateRenderer`]: produces file content
//! - [`DefaultSource`]: external parameter values
//! - [`ProgressCallback`], [`ConfirmCallback`]: UI hooks
//!
//! This allows the crate to be used without hard dependencies on a
//! specific operating system, UI framework, or data store.

pub mod apply;
pub mod catalog;
pub mod context;
pub mod data;
pub mod error;
pub mod executor;
pub mod graph;
pub mod memory;
pub mod params;
pub mod resource;
pub mod types;
pub mod value;

// Re-export main types at crate root
pub use apply::{Outcome, desired_content, digest};
pub use catalog::{Catalog, Component, Facts, Instance, Registry, Scope};
pub use context::{
    ApplyContext, AutoConfirm, CommandRunner, ConfirmCallback, DatabaseAdmin, FileKind, FileState,
    FileSystem, NoProgress, PackageManager, ProgressCallback, Providers, ServiceManager,
    ServiceStatus, TemplateRenderer, UserManager,
};
pub use data::{Hierarchy, Layer};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{execute, reconcile};
pub use graph::{Graph, NodeId, RunPlan};
pub use memory::MemoryHost;
pub use params::{
    Bound, DefaultSource, Fallback, NoDefaults, ParamDef, ParamSchema, ParameterSet, Provenance,
};
pub use resource::{
    DatabaseSpec, DbGrantSpec, DbUserSpec, Dependencies, ExecSpec, FileContent, FileEnsure,
    FileSpec, Kind, LogOutput, Mode, PackageSpec, Presence, Resource, ResourceId, ResourceSpec,
    Secret, ServiceEnsure, ServiceSpec, Target, UserSpec,
};
pub use types::{
    CommandOutput, ExecuteOptions, ExecuteSummary, ReportEntry, RunReport, RunState, Status,
};
pub use value::Value;
