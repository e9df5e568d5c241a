//! Print the run order and each resource's edges, without querying the host

use anyhow::Result;
use colored::Colorize;
use declarative::{Graph, NodeId};
use std::collections::BTreeSet;

use super::Session;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let graph = session.graph()?;

    ui::header(&format!("Run plan ({} resources)", graph.len()));
    for line in render(&graph) {
        println!("{line}");
    }
    Ok(())
}

fn names(graph: &Graph, nodes: &BTreeSet<NodeId>) -> String {
    nodes
        .iter()
        .map(|n| graph.resource(*n).id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One block per resource in plan order
fn render(graph: &Graph) -> Vec<String> {
    let plan = graph.plan();
    let width = plan.len().to_string().len();
    let mut lines = Vec::new();

    for (i, node) in plan.iter().enumerate() {
        let resource = graph.resource(node);
        let mut line = format!("{:>width$}. {}", i + 1, resource.id.to_string().bold());
        if !resource.component.is_empty() {
            line.push_str(&format!("  {}", resource.component.dimmed()));
        }
        lines.push(line);

        let after = graph.predecessors(node);
        if !after.is_empty() {
            lines.push(format!("{:width$}    after {}", "", names(graph, after)));
        }
        let refreshed_by = graph.refresh_sources(node);
        if !refreshed_by.is_empty() {
            lines.push(format!(
                "{:width$}    {} {}",
                "",
                "refreshed by".cyan(),
                names(graph, refreshed_by)
            ));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ExecSpec, FileSpec, Kind, Resource, ResourceId};

    #[test]
    fn test_render_lists_order_and_edges() {
        colored::control::set_override(false);
        let restart = Resource::new("restart", ExecSpec::new("true").refresh_only(true))
            .unwrap()
            .subscribe(ResourceId::new(Kind::File, "/etc/a"));
        let file = Resource::from_spec(FileSpec::present("/etc/a").content("x")).unwrap();
        let graph = Graph::build(vec![restart, file]).unwrap();

        let lines = render(&graph);
        assert_eq!(
            lines,
            vec![
                "1. File[/etc/a]",
                "2. Exec[restart]",
                "     after File[/etc/a]",
                "     refreshed by File[/etc/a]",
            ]
        );
    }
}
