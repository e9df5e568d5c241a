pub mod apply;
pub mod diff;
pub mod params;
pub mod plan;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};
use declarative::{Graph, Registry, Resource};
use std::path::Path;

use crate::Context;
use crate::assets::Assets;
use crate::components;
use crate::config::LoadedConfig;

/// Configuration plus the component registry, shared by every command
pub struct Session {
    pub config: LoadedConfig,
    pub registry: Registry,
}

impl Session {
    /// Load the host configuration named by `--config` or found by discovery
    pub fn open(ctx: &Context) -> Result<Self> {
        Ok(Self {
            config: LoadedConfig::discover(ctx.config.as_deref())?,
            registry: components::registry(),
        })
    }

    /// Every resource the configuration declares, in declaration order
    pub fn resources(&self) -> Result<Vec<Resource>> {
        Ok(self.config.catalog(&self.registry)?.into_resources())
    }

    /// Validated dependency graph; fails on any pre-flight error
    pub fn graph(&self) -> Result<Graph> {
        Graph::build(self.resources()?).context("Invalid resource graph")
    }

    /// Templates and files, with `files/` next to the config searched first
    pub fn assets(&self) -> Result<Assets> {
        let base = self.config.path.parent().unwrap_or_else(|| Path::new("."));
        let files = base.join("files");
        Assets::new(files.is_dir().then_some(files))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FACTS, session};
    use declarative::TemplateRenderer;
    use std::fs;

    #[test]
    fn test_graph_of_a_db() {
        let config = format!(
            r#"{FACTS}
[[component]]
class = "percona::db"
title = "app"
params = {{ user = "app", password = "pw" }}
"#
        );
        let (_dir, session) = session(&config);
        let graph = session.graph().unwrap();
        assert_eq!(graph.len(), 4);
    }

    #[test]
    fn test_cycle_is_reported() {
        let config = format!(
            r#"{FACTS}
[[resource]]
kind = "file"
title = "/a"
ensure = "present"
content = "a"
require = "File[/b]"

[[resource]]
kind = "file"
title = "/b"
ensure = "present"
content = "b"
require = "File[/a]"
"#
        );
        let (_dir, session) = session(&config);
        let err = session.graph().unwrap_err();
        let cause = err.downcast_ref::<declarative::Error>().unwrap();
        assert!(matches!(cause, declarative::Error::Cycle { .. }));
    }

    #[test]
    fn test_files_dir_overrides_assets() {
        let (dir, session) = session(FACTS);
        fs::create_dir(dir.path().join("files")).unwrap();
        fs::write(dir.path().join("files/replication-key.pem"), "KEY").unwrap();

        let assets = session.assets().unwrap();
        assert_eq!(assets.fetch("replication-key.pem").unwrap(), b"KEY");
    }
}
