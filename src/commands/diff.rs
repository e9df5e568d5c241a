//! Show what apply would change, with unified diffs for file content

use anyhow::Result;
use colored::Colorize;
use declarative::{
    ApplyContext, ExecuteOptions, Graph, NoProgress, Providers, Resource, ResourceSpec, RunReport,
    Status, desired_content, execute,
};
use similar::{ChangeTag, TextDiff};

use super::Session;
use crate::Context;
use crate::host::SystemHost;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let graph = session.graph()?;
    let assets = session.assets()?;
    let host = SystemHost::new();
    let providers = Providers::from_host(&host, &assets);
    let jobs = session.config.jobs(None);

    let report = preview(&graph, providers, jobs);
    let changed = report.summary().changed;
    if changed == 0 {
        ui::success("No differences - every resource is in sync");
        return Ok(());
    }

    for entry in &report.entries {
        match &entry.status {
            Status::Changed { changes, refreshed, .. } => {
                ui::section(&entry.id.to_string());
                if *refreshed {
                    ui::dim("would be refreshed");
                }
                for change in changes {
                    ui::dim(change);
                }
                if let Some(node) = graph.node(&entry.id) {
                    show_content_diff(graph.resource(node), providers)?;
                }
            }
            Status::Failed { error } => {
                ui::section(&entry.id.to_string());
                ui::error(error);
            }
            _ => {}
        }
    }

    println!();
    ui::info(&format!("{changed} resources would change"));
    Ok(())
}

fn preview(graph: &Graph, providers: Providers<'_>, jobs: usize) -> RunReport {
    let opts = ExecuteOptions { dry_run: true, jobs };
    execute(graph, providers, &opts, &mut NoProgress)
}

/// Current and desired text of a managed file, if both are available and differ
fn content_change(
    resource: &Resource,
    providers: Providers<'_>,
) -> Result<Option<(String, String)>> {
    let ResourceSpec::File(spec) = &resource.spec else {
        return Ok(None);
    };
    let ctx = ApplyContext::new(true, providers);
    let Some(desired) = desired_content(resource, &ctx)? else {
        return Ok(None);
    };
    let current = providers
        .files
        .inspect(&spec.path)?
        .content
        .unwrap_or_default();
    if current == desired {
        return Ok(None);
    }
    Ok(Some((
        String::from_utf8_lossy(&current).into_owned(),
        String::from_utf8_lossy(&desired).into_owned(),
    )))
}

/// Show a text diff using the `similar` crate
fn show_content_diff(resource: &Resource, providers: Providers<'_>) -> Result<()> {
    let Some((current, desired)) = content_change(resource, providers)? else {
        return Ok(());
    };

    let diff = TextDiff::from_lines(&current, &desired);
    let mut has_changes = false;

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => {
                has_changes = true;
                print!("    {}", format!("- {change}").red());
            }
            ChangeTag::Insert => {
                has_changes = true;
                print!("    {}", format!("+ {change}").green());
            }
            ChangeTag::Equal => {}
        }
    }

    if !has_changes {
        println!("    {}", "(files are identical)".dimmed());
    }
    Ok(())
}
