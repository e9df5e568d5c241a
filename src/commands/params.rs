//! Resolved parameters of each component instance, with their provenance

use anyhow::{Result, bail};
use colored::Colorize;
use declarative::{Hierarchy, Instance, Provenance};

use super::Session;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, component: Option<&str>) -> Result<()> {
    let session = Session::open(ctx)?;
    let catalog = session.config.catalog(&session.registry)?;

    let instances = select(catalog.instances(), component)?;
    for instance in instances {
        ui::section(&instance.label);
        for line in describe(instance, &session.config.hierarchy) {
            println!("{line}");
        }
    }
    Ok(())
}

/// The instances to show: all, or those matching a label or component name
fn select<'a>(instances: &'a [Instance], filter: Option<&str>) -> Result<Vec<&'a Instance>> {
    let Some(filter) = filter else {
        return Ok(instances.iter().collect());
    };
    let found: Vec<&Instance> = instances
        .iter()
        .filter(|i| i.label == filter || i.component == filter)
        .collect();
    if found.is_empty() {
        let declared: Vec<&str> = instances.iter().map(|i| i.label.as_str()).collect();
        bail!(
            "No component instance named '{filter}' (declared: {})",
            declared.join(", ")
        );
    }
    Ok(found)
}

/// One line per parameter: name, value (secrets masked) and where it came from
fn describe(instance: &Instance, hierarchy: &Hierarchy) -> Vec<String> {
    let params: Vec<_> = instance
        .params
        .iter()
        .filter(|(name, _)| *name != "title")
        .collect();
    let width = params.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

    params
        .into_iter()
        .map(|(name, bound)| {
            let source = match bound.provenance {
                Provenance::External => {
                    let key = format!("{}::{name}", instance.component);
                    match hierarchy.source_of(&key) {
                        Some(layer) => format!("external: {layer}"),
                        None => bound.provenance.to_string(),
                    }
                }
                other => other.to_string(),
            };
            format!(
                "  {name:<width$}  {}  {}",
                bound.display(),
                format!("({source})").dimmed()
            )
        })
        .collect()
}
