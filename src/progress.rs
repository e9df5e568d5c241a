//! Terminal hooks for runs: an `indicatif` bar and a `dialoguer` prompt

use anyhow::Result;
use declarative::{ConfirmCallback, ProgressCallback, ResourceId, Status};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui;

const TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

/// Progress bar over the resources of a run
///
/// Failures are printed above the bar as they happen; everything else only
/// updates the message line.
pub struct Bar {
    bar: Option<ProgressBar>,
    hidden: bool,
}

impl Bar {
    /// A bar that draws nothing when `hidden` (quiet or JSON output)
    pub fn new(hidden: bool) -> Self {
        Self { bar: None, hidden }
    }

    fn style() -> ProgressStyle {
        match ProgressStyle::default_bar().template(TEMPLATE) {
            Ok(style) => style.progress_chars("=>-"),
            Err(e) => {
                log::debug!("Invalid progress template: {e}");
                ProgressStyle::default_bar()
            }
        }
    }
}

impl ProgressCallback for Bar {
    fn on_run_start(&mut self, total: usize, dry_run: bool) {
        let bar = if self.hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        bar.set_style(Self::style());
        bar.set_message(if dry_run { "Checking" } else { "Applying" });
        self.bar = Some(bar);
    }

    fn on_resource_start(&mut self, _id: &ResourceId, description: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(description.to_string());
        }
    }

    fn on_resource_complete(&mut self, id: &ResourceId, status: &Status) {
        let Some(bar) = &self.bar else {
            return;
        };
        if let Status::Failed { error } = status {
            bar.suspend(|| println!("  {} {id}: {error}", ui::status_symbol(status)));
        }
        bar.set_message(format!("{} {id}", ui::status_symbol(status)));
        bar.inc(1);
    }

    fn on_run_complete(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

/// Asks on the terminal
pub struct Prompt;

impl ConfirmCallback for Prompt {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        Ok(Confirm::new().with_prompt(prompt).default(true).interact()?)
    }
}
