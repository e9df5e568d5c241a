//! Per-kind convergence
//!
//! Each kind checks its current state through the providers and acts only
//! when it differs from the desired state. In a dry run the checks still
//! happen but no mutating provider call is made.

use crate::context::{ApplyContext, FileKind, ServiceStatus};
use crate::resource::{
    DatabaseSpec, DbGrantSpec, DbUserSpec, ExecSpec, FileContent, FileEnsure, FileSpec, LogOutput,
    PackageSpec, Presence, Resource, ResourceSpec, ServiceEnsure, ServiceSpec, UserSpec,
};
use anyhow::{Context, Result, bail};

/// Result of converging one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Changed {
        changes: Vec<String>,
        /// An exec's command ran, or a service was started
        ran: bool,
    },
}

impl Outcome {
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Collects change messages, skipping the actions in a dry run
struct Changes {
    dry_run: bool,
    list: Vec<String>,
    ran: bool,
}

impl Changes {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            list: Vec::new(),
            ran: false,
        }
    }

    fn record(
        &mut self,
        message: impl Into<String>,
        action: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        if !self.dry_run {
            action()?;
        }
        self.list.push(message.into());
        Ok(())
    }

    fn finish(self) -> Outcome {
        if self.list.is_empty() {
            Outcome::Unchanged
        } else {
            Outcome::Changed {
                changes: self.list,
                ran: self.ran,
            }
        }
    }
}

/// Bring a resource to its desired state
pub fn converge(resource: &Resource, ctx: &ApplyContext<'_>) -> Result<Outcome> {
    match &resource.spec {
        ResourceSpec::File(spec) => converge_file(resource, spec, ctx),
        ResourceSpec::Service(spec) => converge_service(spec, ctx),
        ResourceSpec::Package(spec) => converge_package(spec, ctx),
        ResourceSpec::Exec(spec) => converge_exec(spec, ctx),
        ResourceSpec::User(spec) => converge_user(spec, ctx),
        ResourceSpec::Database(spec) => converge_database(spec, ctx),
        ResourceSpec::DbUser(spec) => converge_db_user(spec, ctx),
        ResourceSpec::DbGrant(spec) => converge_db_grant(spec, ctx),
    }
}

/// React to a refresh event
///
/// `prior` is this run's convergence outcome, if the resource was converged.
/// Returns the change message when the refresh did something.
pub fn refresh(
    resource: &Resource,
    prior: Option<&Outcome>,
    ctx: &ApplyContext<'_>,
) -> Result<Option<String>> {
    if matches!(prior, Some(Outcome::Changed { ran: true, .. })) {
        return Ok(None);
    }
    match &resource.spec {
        ResourceSpec::Exec(spec) => {
            if !guards_allow(spec, ctx)? {
                return Ok(None);
            }
            if !ctx.dry_run {
                run_exec(spec, ctx)?;
            }
            Ok(Some("executed on refresh".to_string()))
        }
        ResourceSpec::Service(spec) if spec.ensure == ServiceEnsure::Running => {
            let services = ctx.providers.services;
            if spec.has_restart {
                if !ctx.dry_run {
                    services.restart(&spec.name)?;
                }
                return Ok(Some("restarted".to_string()));
            }
            if !ctx.dry_run {
                services.stop(&spec.name, spec.enable)?;
                services.ensure_running(&spec.name, spec.enable)?;
            }
            Ok(Some("stopped and started".to_string()))
        }
        _ => Ok(None),
    }
}

/// Content a present file should have, if any is managed
pub fn desired_content(resource: &Resource, ctx: &ApplyContext<'_>) -> Result<Option<Vec<u8>>> {
    let ResourceSpec::File(spec) = &resource.spec else {
        return Ok(None);
    };
    let templates = ctx.providers.templates;
    Ok(match &spec.content {
        None => None,
        Some(FileContent::Literal(text)) => Some(text.clone().into_bytes()),
        Some(FileContent::Template(name)) => Some(
            templates
                .render(name, &resource.params)
                .with_context(|| format!("Failed to render template {name}"))?
                .into_bytes(),
        ),
        Some(FileContent::Source(name)) => Some(
            templates
                .fetch(name)
                .with_context(|| format!("Failed to fetch {name}"))?,
        ),
    })
}

/// Short content digest for messages
pub fn digest(content: &[u8]) -> String {
    let hash = blake3::hash(content).to_hex();
    hash[..12].to_string()
}

fn converge_file(resource: &Resource, spec: &FileSpec, ctx: &ApplyContext<'_>) -> Result<Outcome> {
    let fs = ctx.providers.files;
    let path = spec.path.as_str();
    let state = fs.inspect(path)?;
    let mut changes = Changes::new(ctx.dry_run);

    match spec.ensure {
        FileEnsure::Absent => {
            if state.kind != FileKind::Missing {
                changes.record("removed", || fs.remove(path))?;
            }
            return Ok(changes.finish());
        }
        FileEnsure::Directory => match state.kind {
            FileKind::Directory => {}
            FileKind::Missing => changes.record("created directory", || fs.create_dir(path))?,
            FileKind::File => bail!("{path} exists and is not a directory"),
        },
        FileEnsure::Present => {
            if state.kind == FileKind::Directory {
                bail!("{path} is a directory");
            }
            let desired = desired_content(resource, ctx)?;
            match (state.kind, desired) {
                (FileKind::Missing, desired) => {
                    let content = desired.unwrap_or_default();
                    let message = format!("created ({})", digest(&content));
                    changes.record(message, || fs.write(path, &content))?;
                }
                (_, Some(content)) => {
                    let current = state.content.clone().unwrap_or_default();
                    if blake3::hash(&current) != blake3::hash(&content) {
                        let message =
                            format!("content {} => {}", digest(&current), digest(&content));
                        changes.record(message, || fs.write(path, &content))?;
                    }
                }
                (_, None) => {}
            }
        }
    }

    if let Some(mode) = spec.mode
        && state.mode != Some(mode)
    {
        let message = match state.mode {
            Some(old) => format!("mode {old} => {mode}"),
            None => format!("mode {mode}"),
        };
        changes.record(message, || fs.set_mode(path, mode))?;
    }

    let owner = spec
        .owner
        .as_deref()
        .filter(|o| state.owner.as_deref() != Some(*o));
    let group = spec
        .group
        .as_deref()
        .filter(|g| state.group.as_deref() != Some(*g));
    if owner.is_some() || group.is_some() {
        let message = format!(
            "owner {}:{}",
            spec.owner.as_deref().unwrap_or("-"),
            spec.group.as_deref().unwrap_or("-")
        );
        changes.record(message, || fs.set_owner(path, owner, group))?;
    }

    Ok(changes.finish())
}

/// Current state of a service
///
/// Without a usable status command, whether it runs comes from the process table.
fn service_status(spec: &ServiceSpec, ctx: &ApplyContext<'_>) -> Result<ServiceStatus> {
    let mut status = ctx.providers.services.status(&spec.name)?;
    if !spec.has_status {
        let probe = format!("pgrep -x {}", spec.name);
        status.running = ctx.providers.commands.run(&probe, None)?.success;
        log::debug!("{}: process table says running={}", spec.name, status.running);
    }
    Ok(status)
}

fn converge_service(spec: &ServiceSpec, ctx: &ApplyContext<'_>) -> Result<Outcome> {
    let services = ctx.providers.services;
    let status = service_status(spec, ctx)?;
    let mut changes = Changes::new(ctx.dry_run);

    let enable_message = if spec.enable { "enabled" } else { "disabled" };
    match spec.ensure {
        ServiceEnsure::Running => {
            if !status.running {
                changes.ran = true;
                changes.record("started", || services.ensure_running(&spec.name, spec.enable))?;
            } else if status.enabled != spec.enable {
                changes.record(enable_message, || {
                    services.ensure_running(&spec.name, spec.enable)
                })?;
            }
        }
        ServiceEnsure::Stopped => {
            if status.running {
                changes.record("stopped", || services.stop(&spec.name, spec.enable))?;
            } else if status.enabled != spec.enable {
                changes.record(enable_message, || services.stop(&spec.name, spec.enable))?;
            }
        }
    }
    Ok(changes.finish())
}

fn converge_package(spec: &PackageSpec, ctx: &ApplyContext<'_>) -> Result<Outcome> {
    let packages = ctx.providers.packages;
    let installed = packages.is_installed(&spec.name)?;
    let mut changes = Changes::new(ctx.dry_run);
    match (spec.ensure, installed) {
        (Presence::Present, false) => {
            changes.record("installed", || packages.ensure_installed(&spec.name))?;
        }
        (Presence::Absent, true) => changes.record("removed", || packages.remove(&spec.name))?,
        _ => {}
    }
    Ok(changes.finish())
}

/// Whether the `unless` / `onlyif` guards let the command run
fn guards_allow(spec: &ExecSpec, ctx: &ApplyContext<'_>) -> Result<bool> {
    let runner = ctx.providers.commands;
    let path = spec.path.as_deref();
    if let Some(unless) = &spec.unless
        && runner.run(unless, path)?.success
    {
        log::debug!("`{}` skipped: unless guard passed", spec.command);
        return Ok(false);
    }
    if let Some(onlyif) = &spec.onlyif
        && !runner.run(onlyif, path)?.success
    {
        log::debug!("`{}` skipped: onlyif guard failed", spec.command);
        return Ok(false);
    }
    Ok(true)
}

fn run_exec(spec: &ExecSpec, ctx: &ApplyContext<'_>) -> Result<()> {
    let output = ctx
        .providers
        .commands
        .run(&spec.command, spec.path.as_deref())
        .with_context(|| format!("Failed to run `{}`", spec.command))?;

    let text = || {
        let mut text = output.stdout_str();
        text.push_str(&output.stderr_str());
        text.trim().to_string()
    };
    if !output.success {
        if spec.log_output != LogOutput::Never {
            for line in text().lines() {
                log::warn!("{}: {line}", spec.command);
            }
        }
        let code = output.code.map_or_else(|| "signal".to_string(), |c| c.to_string());
        bail!("`{}` returned {code}: {}", spec.command, output.stderr_str().trim());
    }
    if spec.log_output == LogOutput::Always {
        for line in text().lines() {
            log::info!("{}: {line}", spec.command);
        }
    }
    Ok(())
}

fn converge_exec(spec: &ExecSpec, ctx: &ApplyContext<'_>) -> Result<Outcome> {
    if spec.refresh_only || !guards_allow(spec, ctx)? {
        return Ok(Outcome::Unchanged);
    }
    let mut changes = Changes::new(ctx.dry_run);
    changes.ran = true;
    changes.record("executed", || run_exec(spec, ctx))?;
    Ok(changes.finish())
}

fn converge_user(spec: &UserSpec, ctx: &ApplyContext<'_>) -> Result<Outcome> {
    let users = ctx.providers.users;
    let exists = users.exists(&spec.name)?;
    let mut changes = Changes::new(ctx.dry_run);
    match (spec.ensure, exists) {
        (Presence::Present, false) => {
            changes.record("created", || users.create(&spec.name, spec.system))?;
        }
        (Presence::Absent, true) => changes.record("removed", || users.remove(&spec.name))?,
        _ => {}
    }
    Ok(changes.finish())
}

fn converge_database(spec: &DatabaseSpec, ctx: &ApplyContext<'_>) -> Result<Outcome> {
    let db = ctx.providers.database;
    let exists = db.database_exists(&spec.name)?;
    let mut changes = Changes::new(ctx.dry_run);
    match (spec.ensure, exists) {
        (Presence::Present, false) => changes.record(format!("created ({})", spec.charset), || {
            db.create_database(&spec.name, &spec.charset)
        })?,
        (Presence::Absent, true) => changes.record("dropped", || db.drop_database(&spec.name))?,
        _ => {}
    }
    Ok(changes.finish())
}

fn converge_db_user(spec: &DbUserSpec, ctx: &ApplyContext<'_>) -> Result<Outcome> {
    let db = ctx.providers.database;
    let password = spec.password.expose();
    let current = db.user_matches(&spec.name, password)?;
    let mut changes = Changes::new(ctx.dry_run);
    match (spec.ensure, current) {
        (Presence::Present, None) => {
            changes.record("created", || db.ensure_user(&spec.name, password))?;
        }
        (Presence::Present, Some(false)) => {
            changes.record("password changed", || db.ensure_user(&spec.name, password))?;
        }
        (Presence::Absent, Some(_)) => changes.record("dropped", || db.drop_user(&spec.name))?,
        _ => {}
    }
    Ok(changes.finish())
}

fn converge_db_grant(spec: &DbGrantSpec, ctx: &ApplyContext<'_>) -> Result<Outcome> {
    let db = ctx.providers.database;
    let mut changes = Changes::new(ctx.dry_run);
    if !db.grant_matches(&spec.user, &spec.table, &spec.privileges, spec.grant_option)? {
        let message = format!("granted {} on {}", spec.privileges.join(", "), spec.table);
        changes.record(message, || {
            db.ensure_grant(&spec.user, &spec.table, &spec.privileges, spec.grant_option)
        })?;
    }
    Ok(changes.finish())
}
