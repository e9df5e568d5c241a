//! Converge the host: preview with a dry run, confirm, then apply

use anyhow::{Result, bail};
use chrono::Local;
use colored::Colorize;
use declarative::{
    ConfirmCallback, ExecuteOptions, Graph, Providers, RunReport, Status, execute,
};

use super::Session;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::host::SystemHost;
use crate::progress::{Bar, Prompt};
use crate::ui;

pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let graph = session.graph()?;
    let assets = session.assets()?;
    let host = SystemHost::new();
    let providers = Providers::from_host(&host, &assets);
    let jobs = session.config.jobs(args.jobs);
    let quiet = ctx.quiet || args.json;

    let report = converge(&graph, providers, jobs, args, &mut Prompt, quiet)?;

    if let Some(report) = report {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        if !report.is_success() {
            let summary = report.summary();
            bail!(
                "Run aborted: {} failed, {} blocked",
                summary.failed,
                summary.blocked
            );
        }
    }
    Ok(())
}

/// Preview, confirm and apply; returns the report of the last run performed
///
/// `None` means the user declined.
pub fn converge(
    graph: &Graph,
    providers: Providers<'_>,
    jobs: usize,
    args: &ApplyArgs,
    confirm: &mut dyn ConfirmCallback,
    quiet: bool,
) -> Result<Option<RunReport>> {
    let preview_opts = ExecuteOptions { dry_run: true, jobs };
    let preview = execute(graph, providers, &preview_opts, &mut Bar::new(quiet));

    if !quiet {
        print_preview(&preview);
    }

    if preview.changed().next().is_none() && preview.is_success() {
        if !quiet {
            ui::success("Nothing to do - every resource is in sync");
        }
        return Ok(Some(preview));
    }

    if args.dry_run {
        if !quiet {
            println!();
            println!("  {} Dry run - no changes made", "ℹ".blue());
        }
        return Ok(Some(preview));
    }

    if !args.yes && !confirm.confirm("Continue?")? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(None);
    }

    let opts = ExecuteOptions {
        dry_run: false,
        jobs,
    };
    let report = execute(graph, providers, &opts, &mut Bar::new(quiet));
    if !quiet {
        print_summary(&report);
    }
    Ok(Some(report))
}

/// What the dry run found out of sync
fn print_preview(report: &RunReport) {
    let pending: Vec<_> = report
        .entries
        .iter()
        .filter(|e| e.status.is_change() || e.status.is_failure())
        .collect();
    if pending.is_empty() {
        return;
    }

    ui::header("Changes");
    for entry in &pending {
        print!("  {} {}", ui::status_symbol(&entry.status), entry.id);
        match &entry.status {
            Status::Changed {
                changes, refreshed, ..
            } => {
                if *refreshed {
                    print!(" {}", "(refresh)".cyan());
                }
                println!();
                for change in changes {
                    ui::dim(&format!("    {change}"));
                }
            }
            Status::Failed { error } => println!(": {}", error.red()),
            Status::Blocked { failed, .. } => {
                println!(" {}", format!("(blocked by {failed})").yellow());
            }
            _ => println!(),
        }
    }

    let summary = report.summary();
    println!();
    println!("    • {} resources to change", summary.changed);
    if summary.failed + summary.blocked > 0 {
        println!(
            "    • {} resources would fail or be blocked",
            summary.failed + summary.blocked
        );
    }
}

/// Print final summary
fn print_summary(report: &RunReport) {
    let summary = report.summary();

    println!();
    if report.is_success() {
        println!(
            "  {} Configuration applied successfully!",
            "✓".green().bold()
        );
    } else {
        println!(
            "  {} Configuration applied with errors",
            "⚠".yellow().bold()
        );
    }

    if summary.changed > 0 {
        println!("    • {} resources changed", summary.changed);
    }
    if summary.unchanged > 0 {
        println!("    • {} resources unchanged", summary.unchanged);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
    }
    if summary.blocked > 0 {
        println!("    • {} {} blocked", summary.blocked, "resources".yellow());
    }

    for failure in report.failures() {
        if let Status::Failed { error } = &failure.status {
            ui::error(&format!("{}: {error}", failure.id));
        }
        let blocked: Vec<String> = report
            .blocked_by(&failure.id)
            .map(|e| e.id.to_string())
            .collect();
        if !blocked.is_empty() {
            ui::dim(&format!("  blocked: {}", blocked.join(", ")));
        }
    }

    if let Some(elapsed) = report.elapsed() {
        let started = report.started_at.with_timezone(&Local);
        ui::dim(&format!(
            "Started {}, took {:.1}s",
            started.format("%H:%M:%S"),
            elapsed.num_milliseconds() as f64 / 1000.0
        ));
    }
}
