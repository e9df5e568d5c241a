//! Pre-flight checks: parameters, resources, graph, templates and sources

use anyhow::Result;
use declarative::{FileContent, Graph, ResourceSpec, TemplateRenderer};

use super::Session;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    ui::kv("config", &session.config.path.display().to_string());

    let graph = match session.graph() {
        Ok(graph) => graph,
        Err(e) => {
            if let Some(cause) = e.downcast_ref::<declarative::Error>() {
                ui::error(cause.category().description());
            }
            return Err(e);
        }
    };
    let assets = session.assets()?;

    let problems = check_content(&graph, &assets);
    for problem in &problems {
        ui::warn(problem);
    }

    let instances = session.config.catalog(&session.registry)?.instances().len();
    if problems.is_empty() {
        ui::success(&format!(
            "Configuration is valid: {instances} component instances, {} resources",
            graph.len()
        ));
        Ok(())
    } else {
        anyhow::bail!("{} files cannot be produced", problems.len())
    }
}

/// Render every template and fetch every source the graph needs
fn check_content(graph: &Graph, assets: &dyn TemplateRenderer) -> Vec<String> {
    let mut problems = Vec::new();
    for resource in graph.resources() {
        let ResourceSpec::File(spec) = &resource.spec else {
            continue;
        };
        let result = match &spec.content {
            Some(FileContent::Template(name)) => assets.render(name, &resource.params).map(|_| ()),
            Some(FileContent::Source(name)) => assets.fetch(name).map(|_| ()),
            Some(FileContent::Literal(_)) | None => Ok(()),
        };
        if let Err(e) = result {
            problems.push(format!("{}: {e:#}", resource.id));
        }
    }
    problems
}
