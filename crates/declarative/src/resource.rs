//! Resource model
//!
//! A [`Resource`] is one unit of desired state: a file, service, package,
//! command, system user, or database object. Kinds form a closed set, and
//! each kind has a fixed attribute schema checked when the resource is
//! constructed, either from a typed spec or from an attribute map.
//!
//! Dependencies are typed [`Target`]s, parsed once from `Kind[title]` or
//! `Class[component]` references and resolved to graph nodes when the
//! graph is built.

use crate::error::{Error, Result};
use crate::params::ParameterSet;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Identity
// ============================================================================

/// The closed set of resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    File,
    Service,
    Package,
    Exec,
    User,
    Database,
    DbUser,
    DbGrant,
}

impl Kind {
    pub const ALL: [Self; 8] = [
        Self::File,
        Self::Service,
        Self::Package,
        Self::Exec,
        Self::User,
        Self::Database,
        Self::DbUser,
        Self::DbGrant,
    ];

    /// Lowercase identifier, as used in manifests (`file`, `db_grant`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Service => "service",
            Self::Package => "package",
            Self::Exec => "exec",
            Self::User => "user",
            Self::Database => "database",
            Self::DbUser => "db_user",
            Self::DbGrant => "db_grant",
        }
    }

    /// Capitalized name, as used in references (`File[/etc/mysql]`)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::File => "File",
            Self::Service => "Service",
            Self::Package => "Package",
            Self::Exec => "Exec",
            Self::User => "User",
            Self::Database => "Database",
            Self::DbUser => "Db_user",
            Self::DbGrant => "Db_grant",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::validation(s, "unknown resource kind"))
    }
}

/// Identity of a resource: (kind, title), unique within a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceId {
    pub kind: Kind,
    pub title: String,
}

impl ResourceId {
    pub fn new(kind: Kind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind.type_name(), self.title)
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, title) = split_reference(s)
            .ok_or_else(|| Error::validation(s, "expected a reference like File[/path]"))?;
        Ok(Self::new(kind.parse()?, title.trim()))
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Split `Type[title]` into its parts
fn split_reference(s: &str) -> Option<(&str, &str)> {
    let s = s.trim();
    let open = s.find('[')?;
    let inner = s[open + 1..].strip_suffix(']')?;
    let ty = s[..open].trim();
    if ty.is_empty() || inner.trim().is_empty() {
        None
    } else {
        Some((ty, inner))
    }
}

/// What a dependency edge points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    /// A single resource
    Resource(ResourceId),
    /// Every resource directly declared by a component instance
    Component(String),
}

impl Target {
    /// Parse a reference that may name several titles: `File[/a, /b]`
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        let (ty, inner) = split_reference(s)
            .ok_or_else(|| Error::validation(s, "expected a reference like File[/path]"))?;
        if ty.eq_ignore_ascii_case("class") {
            return Ok(vec![Self::Component(inner.trim().to_string())]);
        }
        let kind: Kind = ty.parse()?;
        inner
            .split(',')
            .map(str::trim)
            .map(|title| {
                if title.is_empty() {
                    Err(Error::validation(s, "empty title in reference"))
                } else {
                    Ok(Self::Resource(ResourceId::new(kind, title)))
                }
            })
            .collect()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(id) => write!(f, "{id}"),
            Self::Component(name) => write!(f, "Class[{name}]"),
        }
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut targets = Self::parse_list(s)?;
        if targets.len() != 1 {
            return Err(Error::validation(s, "expected a single reference"));
        }
        Ok(targets.remove(0))
    }
}

impl From<ResourceId> for Target {
    fn from(id: ResourceId) -> Self {
        Self::Resource(id)
    }
}

impl From<&ResourceId> for Target {
    fn from(id: &ResourceId) -> Self {
        Self::Resource(id.clone())
    }
}

/// Declared relationships of a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    /// Apply after these
    pub require: Vec<Target>,
    /// Apply before these
    pub before: Vec<Target>,
    /// Apply after these, and refresh when they change
    pub subscribe: Vec<Target>,
    /// Apply before these, and refresh them when this changes
    pub notify: Vec<Target>,
}

impl Dependencies {
    pub fn is_empty(&self) -> bool {
        self.require.is_empty()
            && self.before.is_empty()
            && self.subscribe.is_empty()
            && self.notify.is_empty()
    }

    /// Merge another set of relationships into this one, skipping duplicates
    pub fn extend(&mut self, other: &Self) {
        fn merge(into: &mut Vec<Target>, from: &[Target]) {
            for t in from {
                if !into.contains(t) {
                    into.push(t.clone());
                }
            }
        }
        merge(&mut self.require, &other.require);
        merge(&mut self.before, &other.before);
        merge(&mut self.subscribe, &other.subscribe);
        merge(&mut self.notify, &other.notify);
    }
}

// ============================================================================
// Attribute enums
// ============================================================================

/// Enumerated attribute values with a fixed spelling
pub(crate) trait Choice: Copy + PartialEq + 'static {
    const CHOICES: &'static [(&'static str, Self)];

    fn parse(s: &str) -> Option<Self> {
        Self::CHOICES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, v)| *v)
    }

    fn name(self) -> &'static str {
        Self::CHOICES
            .iter()
            .find(|(_, v)| *v == self)
            .map_or("?", |(name, _)| name)
    }

    fn allowed() -> String {
        let names: Vec<&str> = Self::CHOICES.iter().map(|(n, _)| *n).collect();
        names.join(", ")
    }
}

/// Whether something should exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Present,
    Absent,
}

impl Choice for Presence {
    const CHOICES: &'static [(&'static str, Self)] =
        &[("present", Self::Present), ("absent", Self::Absent)];
}

/// Desired state of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEnsure {
    Present,
    Absent,
    Directory,
}

impl Choice for FileEnsure {
    const CHOICES: &'static [(&'static str, Self)] = &[
        ("present", Self::Present),
        ("absent", Self::Absent),
        ("directory", Self::Directory),
    ];
}

/// Desired run state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceEnsure {
    Running,
    Stopped,
}

impl Choice for ServiceEnsure {
    const CHOICES: &'static [(&'static str, Self)] =
        &[("running", Self::Running), ("stopped", Self::Stopped)];
}

/// When to log a command's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    Always,
    Never,
    OnFailure,
}

impl Choice for LogOutput {
    const CHOICES: &'static [(&'static str, Self)] = &[
        ("true", Self::Always),
        ("false", Self::Never),
        ("on_failure", Self::OnFailure),
    ];
}

macro_rules! display_choice {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Choice::name(*self))
            }
        })*
    };
}

display_choice!(Presence, FileEnsure, ServiceEnsure, LogOutput);

/// Permission bits of a file, written in octal (`0755`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode(pub u32);

impl Mode {
    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 <= 0o7777
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if !(3..=4).contains(&s.len()) {
            return Err(Error::validation(s, "mode must be 3 or 4 octal digits"));
        }
        u32::from_str_radix(s, 8)
            .map(Self)
            .map_err(|_| Error::validation(s, "mode must be octal"))
    }
}

/// A password or key that must not appear in logs or reports
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

// ============================================================================
// Kind specs
// ============================================================================

/// Where a file's content comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Inline text
    Literal(String),
    /// Rendered from a named template with the declaring component's parameters
    Template(String),
    /// Copied from a named static source
    Source(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec {
    pub path: String,
    pub ensure: FileEnsure,
    pub mode: Option<Mode>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub content: Option<FileContent>,
}

impl FileSpec {
    fn with_ensure(path: impl Into<String>, ensure: FileEnsure) -> Self {
        Self {
            path: path.into(),
            ensure,
            mode: None,
            owner: None,
            group: None,
            content: None,
        }
    }

    pub fn present(path: impl Into<String>) -> Self {
        Self::with_ensure(path, FileEnsure::Present)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::with_ensure(path, FileEnsure::Directory)
    }

    pub fn absent(path: impl Into<String>) -> Self {
        Self::with_ensure(path, FileEnsure::Absent)
    }

    pub fn mode(mut self, bits: u32) -> Self {
        self.mode = Some(Mode(bits));
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set both owner and group
    pub fn owned_by(self, user: &str, group: &str) -> Self {
        self.owner(user).group(group)
    }

    pub fn content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(FileContent::Literal(text.into()));
        self
    }

    pub fn template(mut self, name: impl Into<String>) -> Self {
        self.content = Some(FileContent::Template(name.into()));
        self
    }

    pub fn source(mut self, name: impl Into<String>) -> Self {
        self.content = Some(FileContent::Source(name.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: String,
    pub ensure: ServiceEnsure,
    pub enable: bool,
    pub has_restart: bool,
    pub has_status: bool,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, ensure: ServiceEnsure, enable: bool) -> Self {
        Self {
            name: name.into(),
            ensure,
            enable,
            has_restart: true,
            has_status: true,
        }
    }

    pub fn running(name: impl Into<String>) -> Self {
        Self::new(name, ServiceEnsure::Running, true)
    }

    /// Whether the init system can restart the service (otherwise stop, then start)
    pub fn has_restart(mut self, has_restart: bool) -> Self {
        self.has_restart = has_restart;
        self
    }

    /// Whether the init system reports a reliable status (otherwise the process table is used)
    pub fn has_status(mut self, has_status: bool) -> Self {
        self.has_status = has_status;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub ensure: Presence,
}

impl PackageSpec {
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ensure: Presence::Present,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: String,
    /// Skip when this command exits 0
    pub unless: Option<String>,
    /// Run only when this command exits 0
    pub onlyif: Option<String>,
    /// Run only in response to a refresh event
    pub refresh_only: bool,
    /// Search path for the command, colon separated
    pub path: Option<String>,
    pub log_output: LogOutput,
}

impl ExecSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            unless: None,
            onlyif: None,
            refresh_only: false,
            path: None,
            log_output: LogOutput::OnFailure,
        }
    }

    pub fn unless(mut self, guard: impl Into<String>) -> Self {
        self.unless = Some(guard.into());
        self
    }

    pub fn onlyif(mut self, guard: impl Into<String>) -> Self {
        self.onlyif = Some(guard.into());
        self
    }

    pub fn refresh_only(mut self, refresh_only: bool) -> Self {
        self.refresh_only = refresh_only;
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn log_output(mut self, log_output: LogOutput) -> Self {
        self.log_output = log_output;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub name: String,
    pub ensure: Presence,
    pub system: bool,
}

impl UserSpec {
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ensure: Presence::Present,
            system: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSpec {
    pub name: String,
    pub ensure: Presence,
    pub charset: String,
}

impl DatabaseSpec {
    pub fn present(name: impl Into<String>, charset: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ensure: Presence::Present,
            charset: charset.into(),
        }
    }
}

/// A database account, named `user@host`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbUserSpec {
    pub name: String,
    pub ensure: Presence,
    pub password: Secret,
}

impl DbUserSpec {
    pub fn present(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ensure: Presence::Present,
            password: Secret::new(password),
        }
    }
}

/// Privileges of `user@host` on `database.table`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbGrantSpec {
    pub user: String,
    pub table: String,
    pub privileges: Vec<String>,
    pub grant_option: bool,
}

impl DbGrantSpec {
    pub fn new(user: impl Into<String>, table: impl Into<String>, privileges: Vec<String>) -> Self {
        Self {
            user: user.into(),
            table: table.into(),
            privileges,
            grant_option: false,
        }
    }

    pub fn grant_option(mut self, grant_option: bool) -> Self {
        self.grant_option = grant_option;
        self
    }
}

/// Typed desired state, one variant per kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    File(FileSpec),
    Service(ServiceSpec),
    Package(PackageSpec),
    Exec(ExecSpec),
    User(UserSpec),
    Database(DatabaseSpec),
    DbUser(DbUserSpec),
    DbGrant(DbGrantSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> Kind {
        match self {
            Self::File(_) => Kind::File,
            Self::Service(_) => Kind::Service,
            Self::Package(_) => Kind::Package,
            Self::Exec(_) => Kind::Exec,
            Self::User(_) => Kind::User,
            Self::Database(_) => Kind::Database,
            Self::DbUser(_) => Kind::DbUser,
            Self::DbGrant(_) => Kind::DbGrant,
        }
    }

    /// The title a resource gets when none is given explicitly
    pub fn natural_title(&self) -> String {
        match self {
            Self::File(s) => s.path.clone(),
            Self::Service(s) => s.name.clone(),
            Self::Package(s) => s.name.clone(),
            Self::Exec(s) => s.command.clone(),
            Self::User(s) => s.name.clone(),
            Self::Database(s) => s.name.clone(),
            Self::DbUser(s) => s.name.clone(),
            Self::DbGrant(s) => format!("{}/{}", s.user, s.table),
        }
    }
}

macro_rules! spec_from {
    ($($variant:ident($ty:ty)),*) => {
        $(impl From<$ty> for ResourceSpec {
            fn from(spec: $ty) -> Self {
                Self::$variant(spec)
            }
        })*
    };
}

spec_from!(
    File(FileSpec),
    Service(ServiceSpec),
    Package(PackageSpec),
    Exec(ExecSpec),
    User(UserSpec),
    Database(DatabaseSpec),
    DbUser(DbUserSpec),
    DbGrant(DbGrantSpec)
);

// ============================================================================
// Resource
// ============================================================================

/// One unit of desired state, with its relationships
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: ResourceId,
    pub spec: ResourceSpec,
    pub deps: Dependencies,
    /// Label of the component instance that declared it
    pub component: String,
    /// Parameters of the declaring instance, used to render templates
    pub params: Arc<ParameterSet>,
}

impl Resource {
    /// Build and validate a resource with an explicit title
    pub fn new(title: impl Into<String>, spec: impl Into<ResourceSpec>) -> Result<Self> {
        let spec = spec.into();
        let resource = Self {
            id: ResourceId::new(spec.kind(), title),
            spec,
            deps: Dependencies::default(),
            component: String::new(),
            params: Arc::new(ParameterSet::default()),
        };
        resource.validate()?;
        Ok(resource)
    }

    /// Build and validate a resource titled by its natural key (path, name, command)
    pub fn from_spec(spec: impl Into<ResourceSpec>) -> Result<Self> {
        let spec = spec.into();
        let title = spec.natural_title();
        Self::new(title, spec)
    }

    pub fn kind(&self) -> Kind {
        self.id.kind
    }

    pub fn require(mut self, target: impl Into<Target>) -> Self {
        self.deps.require.push(target.into());
        self
    }

    pub fn require_all<T: Into<Target>>(mut self, targets: impl IntoIterator<Item = T>) -> Self {
        self.deps.require.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn before(mut self, target: impl Into<Target>) -> Self {
        self.deps.before.push(target.into());
        self
    }

    pub fn subscribe(mut self, target: impl Into<Target>) -> Self {
        self.deps.subscribe.push(target.into());
        self
    }

    pub fn subscribe_all<T: Into<Target>>(mut self, targets: impl IntoIterator<Item = T>) -> Self {
        self.deps.subscribe.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn notify(mut self, target: impl Into<Target>) -> Self {
        self.deps.notify.push(target.into());
        self
    }

    /// Whether the resource applies only when a refresh edge fires
    pub fn is_refresh_only(&self) -> bool {
        matches!(&self.spec, ResourceSpec::Exec(e) if e.refresh_only)
    }

    /// Whether a refresh event means anything for this kind
    pub fn is_refreshable(&self) -> bool {
        matches!(self.kind(), Kind::Exec | Kind::Service)
    }

    /// Human-readable description
    pub fn describe(&self) -> String {
        match &self.spec {
            ResourceSpec::File(f) => match f.ensure {
                FileEnsure::Directory => format!("Directory {}", f.path),
                FileEnsure::Present => format!("File {}", f.path),
                FileEnsure::Absent => format!("Remove {}", f.path),
            },
            ResourceSpec::Service(s) => format!("Service {} {}", s.name, s.ensure),
            ResourceSpec::Package(p) => format!("Package {} {}", p.name, p.ensure),
            ResourceSpec::Exec(e) => format!("Run `{}`", e.command),
            ResourceSpec::User(u) => format!("User {} {}", u.name, u.ensure),
            ResourceSpec::Database(d) => format!("Database {} ({})", d.name, d.charset),
            ResourceSpec::DbUser(u) => format!("Database user {}", u.name),
            ResourceSpec::DbGrant(g) => format!(
                "Grant {} on {} to {}",
                g.privileges.join(", "),
                g.table,
                g.user
            ),
        }
    }

    /// Check the kind's attribute constraints
    pub fn validate(&self) -> Result<()> {
        let fail = |message: String| Err(Error::validation(&self.id, message));

        if self.id.title.trim().is_empty() {
            return fail("title must not be empty".into());
        }
        if self.id.kind != self.spec.kind() {
            return fail(format!("title kind does not match a {} spec", self.spec.kind()));
        }

        match &self.spec {
            ResourceSpec::File(f) => {
                if !f.path.starts_with('/') {
                    return fail(format!("path '{}' must be absolute", f.path));
                }
                if let Some(mode) = f.mode
                    && !mode.is_valid()
                {
                    return fail(format!("mode {mode} is out of range"));
                }
                if f.content.is_some() && f.ensure != FileEnsure::Present {
                    return fail(format!("content is not allowed with ensure => {}", f.ensure));
                }
            }
            ResourceSpec::Service(s) => {
                if s.name.trim().is_empty() {
                    return fail("service name must not be empty".into());
                }
            }
            ResourceSpec::Package(p) => {
                if p.name.trim().is_empty() {
                    return fail("package name must not be empty".into());
                }
            }
            ResourceSpec::Exec(e) => {
                if e.command.trim().is_empty() {
                    return fail("command must not be empty".into());
                }
            }
            ResourceSpec::User(u) => {
                if u.name.is_empty() || u.name.contains([':', ' ', '/']) {
                    return fail(format!("'{}' is not a valid user name", u.name));
                }
            }
            ResourceSpec::Database(d) => {
                if d.name.trim().is_empty() {
                    return fail("database name must not be empty".into());
                }
                let valid = |c: char| c.is_ascii_alphanumeric() || c == '_';
                if d.charset.is_empty() || !d.charset.chars().all(valid) {
                    return fail(format!("'{}' is not a valid charset", d.charset));
                }
            }
            ResourceSpec::DbUser(u) => {
                if !is_account(&u.name) {
                    return fail(format!("'{}' must be written user@host", u.name));
                }
            }
            ResourceSpec::DbGrant(g) => {
                if g.privileges.is_empty() {
                    return fail("privileges must not be empty".into());
                }
                if !g.table.contains('.') {
                    return fail(format!("table '{}' must be written database.table", g.table));
                }
                if !is_account(&g.user) {
                    return fail(format!("'{}' must be written user@host", g.user));
                }
            }
        }
        Ok(())
    }

    /// Build a resource from a kind and an untyped attribute map
    ///
    /// Every attribute must belong to the kind's schema; required attributes
    /// must be present and enumerated ones must hold an allowed value.
    pub fn from_attributes(
        kind: Kind,
        title: &str,
        attrs: &BTreeMap<String, Value>,
    ) -> Result<Self> {
        let id = ResourceId::new(kind, title);
        let mut a = Attrs::new(&id, attrs);

        let spec = match kind {
            Kind::File => {
                let ensure: FileEnsure = a.required_choice("ensure")?;
                let path = a.string("path")?.unwrap_or_else(|| title.to_string());
                let mode = a.string("mode")?.map(|m| m.parse::<Mode>()).transpose()?;
                let mut contents = Vec::new();
                if let Some(text) = a.string("content")? {
                    contents.push(FileContent::Literal(text));
                }
                if let Some(name) = a.string("template")? {
                    contents.push(FileContent::Template(name));
                }
                if let Some(name) = a.string("source")? {
                    contents.push(FileContent::Source(name));
                }
                if contents.len() > 1 {
                    return Err(Error::validation(
                        &id,
                        "only one of content, template and source may be set",
                    ));
                }
                ResourceSpec::File(FileSpec {
                    path,
                    ensure,
                    mode,
                    owner: a.string("owner")?,
                    group: a.string("group")?,
                    content: contents.pop(),
                })
            }
            Kind::Service => ResourceSpec::Service(ServiceSpec {
                ensure: a.required_choice("ensure")?,
                enable: a.required_bool("enable")?,
                name: a.string("name")?.unwrap_or_else(|| title.to_string()),
                has_restart: a.bool("hasrestart")?.unwrap_or(true),
                has_status: a.bool("hasstatus")?.unwrap_or(true),
            }),
            Kind::Package => ResourceSpec::Package(PackageSpec {
                ensure: a.required_choice("ensure")?,
                name: a.string("name")?.unwrap_or_else(|| title.to_string()),
            }),
            Kind::Exec => ResourceSpec::Exec(ExecSpec {
                command: a.required_string("command")?,
                unless: a.string("unless")?,
                onlyif: a.string("onlyif")?,
                refresh_only: a.bool("refreshonly")?.unwrap_or(false),
                path: a.string("path")?,
                log_output: a.choice("logoutput")?.unwrap_or(LogOutput::OnFailure),
            }),
            Kind::User => ResourceSpec::User(UserSpec {
                ensure: a.required_choice("ensure")?,
                system: a.bool("system")?.unwrap_or(false),
                name: a.string("name")?.unwrap_or_else(|| title.to_string()),
            }),
            Kind::Database => ResourceSpec::Database(DatabaseSpec {
                ensure: a.required_choice("ensure")?,
                charset: a.string("charset")?.unwrap_or_else(|| "utf8".to_string()),
                name: a.string("name")?.unwrap_or_else(|| title.to_string()),
            }),
            Kind::DbUser => ResourceSpec::DbUser(DbUserSpec {
                ensure: a.required_choice("ensure")?,
                password: Secret::new(a.required_string("password")?),
                name: title.to_string(),
            }),
            Kind::DbGrant => ResourceSpec::DbGrant(DbGrantSpec {
                privileges: a.required_list("privileges")?,
                table: a.required_string("table")?,
                user: a.required_string("user")?,
                grant_option: a.bool("grant_option")?.unwrap_or(false),
            }),
        };

        let deps = Dependencies {
            require: a.references("require")?,
            before: a.references("before")?,
            subscribe: a.references("subscribe")?,
            notify: a.references("notify")?,
        };
        a.finish()?;

        let mut resource = Self::new(title, spec)?;
        resource.deps = deps;
        Ok(resource)
    }
}

fn is_account(name: &str) -> bool {
    matches!(name.split_once('@'), Some((user, _)) if !user.is_empty())
}

// ============================================================================
// Attribute reader
// ============================================================================

/// Typed access to an attribute map, tracking which keys were consumed
struct Attrs<'a> {
    id: &'a ResourceId,
    map: &'a BTreeMap<String, Value>,
    seen: BTreeSet<&'a str>,
}

impl<'a> Attrs<'a> {
    fn new(id: &'a ResourceId, map: &'a BTreeMap<String, Value>) -> Self {
        Self {
            id,
            map,
            seen: BTreeSet::new(),
        }
    }

    fn error(&self, message: String) -> Error {
        Error::validation(self.id, message)
    }

    fn get(&mut self, name: &str) -> Option<&'a Value> {
        let (key, value) = self.map.get_key_value(name)?;
        self.seen.insert(key.as_str());
        Some(value)
    }

    fn string(&mut self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v.as_scalar().map(Some).ok_or_else(|| {
                self.error(format!("attribute '{name}' must be a string, got {}", v.type_name()))
            }),
        }
    }

    fn required_string(&mut self, name: &str) -> Result<String> {
        self.string(name)?
            .ok_or_else(|| self.error(format!("missing required attribute '{name}'")))
    }

    fn bool(&mut self, name: &str) -> Result<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v.as_bool().map(Some).ok_or_else(|| {
                self.error(format!("attribute '{name}' must be a boolean, got {v}"))
            }),
        }
    }

    fn required_bool(&mut self, name: &str) -> Result<bool> {
        self.bool(name)?
            .ok_or_else(|| self.error(format!("missing required attribute '{name}'")))
    }

    fn required_list(&mut self, name: &str) -> Result<Vec<String>> {
        match self.get(name) {
            None => Err(self.error(format!("missing required attribute '{name}'"))),
            Some(v) => v
                .as_list()
                .ok_or_else(|| self.error(format!("attribute '{name}' must be a list of strings"))),
        }
    }

    fn choice<T: Choice>(&mut self, name: &str) -> Result<Option<T>> {
        match self.string(name)? {
            None => Ok(None),
            Some(s) => T::parse(&s).map(Some).ok_or_else(|| {
                self.error(format!(
                    "{name} => '{s}' is not one of: {}",
                    T::allowed()
                ))
            }),
        }
    }

    fn required_choice<T: Choice>(&mut self, name: &str) -> Result<T> {
        self.choice(name)?
            .ok_or_else(|| self.error(format!("missing required attribute '{name}'")))
    }

    fn references(&mut self, name: &str) -> Result<Vec<Target>> {
        let Some(value) = self.get(name) else {
            return Ok(Vec::new());
        };
        let items = value.as_list().ok_or_else(|| {
            self.error(format!("attribute '{name}' must be a reference or a list"))
        })?;
        let mut targets = Vec::new();
        for item in items {
            targets.extend(Target::parse_list(&item)?);
        }
        Ok(targets)
    }

    fn finish(self) -> Result<()> {
        let unknown: Vec<&str> = self
            .map
            .keys()
            .map(String::as_str)
            .filter(|k| !self.seen.contains(k))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(self.error(format!(
                "unknown attribute(s) for {}: {}",
                self.id.kind,
                unknown.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_reference_round_trip() {
        let id: ResourceId = "File[/etc/mysql/my.cnf]".parse().unwrap();
        assert_eq!(id, ResourceId::new(Kind::File, "/etc/mysql/my.cnf"));
        assert_eq!(id.to_string(), "File[/etc/mysql/my.cnf]");

        let grant: ResourceId = "Db_grant[app@localhost/app.*]".parse().unwrap();
        assert_eq!(grant.kind, Kind::DbGrant);
    }

    #[test]
    fn test_reference_rejects_garbage() {
        assert!("File".parse::<ResourceId>().is_err());
        assert!("File[]".parse::<ResourceId>().is_err());
        assert!("Widget[x]".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_target_list_and_class() {
        let targets = Target::parse_list("File[/etc/mysql, /etc/mysql/conf.d]").unwrap();
        assert_eq!(
            targets,
            vec![
                Target::Resource(ResourceId::new(Kind::File, "/etc/mysql")),
                Target::Resource(ResourceId::new(Kind::File, "/etc/mysql/conf.d")),
            ]
        );
        assert_eq!(
            "Class[percona::node]".parse::<Target>().unwrap(),
            Target::Component("percona::node".into())
        );
    }

    #[test]
    fn test_target_list_without_spaces() {
        let targets = Target::parse_list("File[/a,/b ,  /c]").unwrap();
        let titles: Vec<String> = targets.iter().map(ToString::to_string).collect();
        assert_eq!(titles, vec!["File[/a]", "File[/b]", "File[/c]"]);
        assert!(Target::parse_list("File[/a,]").is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("0755".parse::<Mode>().unwrap(), Mode(0o755));
        assert_eq!("600".parse::<Mode>().unwrap(), Mode(0o600));
        assert!("0789".parse::<Mode>().is_err());
        assert!("12345".parse::<Mode>().is_err());
        assert_eq!(Mode(0o644).to_string(), "0644");
    }

    #[test]
    fn test_file_from_attributes() {
        let r = Resource::from_attributes(
            Kind::File,
            "/etc/garbd/replication-key.pem",
            &attrs(&[
                ("ensure", "present".into()),
                ("owner", "root".into()),
                ("group", "root".into()),
                ("mode", "0600".into()),
                ("source", "replication-key.pem".into()),
                ("require", "File[/etc/garbd]".into()),
            ]),
        )
        .unwrap();

        let ResourceSpec::File(f) = &r.spec else {
            panic!("expected a file spec");
        };
        assert_eq!(f.mode, Some(Mode(0o600)));
        assert_eq!(f.content, Some(FileContent::Source("replication-key.pem".into())));
        assert_eq!(
            r.deps.require,
            vec![Target::Resource(ResourceId::new(Kind::File, "/etc/garbd"))]
        );
    }

    #[test]
    fn test_missing_required_attribute() {
        let err = Resource::from_attributes(Kind::File, "/etc/x", &attrs(&[])).unwrap_err();
        assert!(err.to_string().contains("missing required attribute 'ensure'"));

        let err = Resource::from_attributes(
            Kind::Service,
            "mysql",
            &attrs(&[("ensure", "running".into())]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'enable'"));
    }

    #[test]
    fn test_value_outside_allowed_set() {
        let err = Resource::from_attributes(
            Kind::File,
            "/etc/x",
            &attrs(&[("ensure", "link".into())]),
        )
        .unwrap_err();
        assert!(err.is_preflight());
        assert!(err.to_string().contains("present, absent, directory"));
    }

    #[test]
    fn test_unknown_attribute_rejected() {
        let err = Resource::from_attributes(
            Kind::Package,
            "xinetd",
            &attrs(&[("ensure", "present".into()), ("provider", "apt".into())]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("provider"));
    }

    #[test]
    fn test_directory_with_content_rejected() {
        let err = Resource::from_spec(FileSpec::directory("/etc/garbd").content("x")).unwrap_err();
        assert!(err.to_string().contains("content is not allowed"));
    }

    #[test]
    fn test_exec_attributes() {
        let r = Resource::from_attributes(
            Kind::Exec,
            "mysqld-restart",
            &attrs(&[
                ("command", "service mysql restart".into()),
                ("refreshonly", "true".into()),
                ("logoutput", "on_failure".into()),
                ("path", "/sbin/:/usr/sbin/:/usr/bin/:/bin/".into()),
            ]),
        )
        .unwrap();
        assert!(r.is_refresh_only());
        assert_eq!(r.id.to_string(), "Exec[mysqld-restart]");
    }

    #[test]
    fn test_grant_requires_account_and_table() {
        let err =
            Resource::from_spec(DbGrantSpec::new("app", "app.*", vec!["all".into()])).unwrap_err();
        assert!(err.to_string().contains("user@host"));

        let ok =
            Resource::from_spec(DbGrantSpec::new("app@localhost", "app.*", vec!["all".into()]))
                .unwrap();
        assert_eq!(ok.id.title, "app@localhost/app.*");
    }

    #[test]
    fn test_secret_is_redacted() {
        let spec = DbUserSpec::present("app@localhost", "hunter2");
        assert!(!format!("{spec:?}").contains("hunter2"));
        assert_eq!(spec.password.expose(), "hunter2");
    }
}
