//! Host configuration
//!
//! One file per host (`clusterform.toml` or `clusterform.json`) names the
//! facts of the machine, the data layers consulted for parameter defaults,
//! the component instances to declare and any standalone resources.

use anyhow::{Context, Result, bail};
use declarative::{
    Catalog, Dependencies, Facts, Hierarchy, Kind, Layer, Registry, Resource, Target, Value,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths;

/// Default number of parallel jobs when neither the CLI nor the file sets one
pub const DEFAULT_JOBS: usize = 4;

/// On-disk formats accepted for the config and data layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            _ => bail!("{} must end in .toml or .json", path.display()),
        }
    }

    pub fn parse<T: DeserializeOwned>(self, content: &str) -> Result<T> {
        match self {
            Self::Toml => toml::from_str(content).context("Invalid TOML format"),
            Self::Json => serde_json::from_str(content).context("Invalid JSON format"),
        }
    }
}

/// Read and parse a TOML or JSON file
fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = ConfigFormat::from_path(path)?;
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    format
        .parse(&content)
        .with_context(|| format!("Could not parse {}", path.display()))
}

// ============================================================================
// File schema
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentDecl>,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceDecl>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Layer files, most specific first
    #[serde(default)]
    pub layers: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub jobs: Option<usize>,
}

/// A component instance to declare
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDecl {
    pub class: String,
    pub title: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub require: Vec<String>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub subscribe: Vec<String>,
    #[serde(default)]
    pub notify: Vec<String>,
}

impl ComponentDecl {
    fn label(&self) -> String {
        match &self.title {
            Some(t) => format!("{}[{t}]", self.class),
            None => self.class.clone(),
        }
    }

    fn dependencies(&self) -> Result<Dependencies> {
        fn parse(refs: &[String]) -> Result<Vec<Target>> {
            let mut targets = Vec::new();
            for r in refs {
                targets.extend(Target::parse_list(r)?);
            }
            Ok(targets)
        }
        Ok(Dependencies {
            require: parse(&self.require)?,
            before: parse(&self.before)?,
            subscribe: parse(&self.subscribe)?,
            notify: parse(&self.notify)?,
        })
    }
}

/// A standalone resource given as an attribute table
#[derive(Debug, Deserialize)]
pub struct ResourceDecl {
    pub kind: String,
    pub title: String,
    #[serde(flatten)]
    pub attrs: BTreeMap<String, Value>,
}

// ============================================================================
// Loaded configuration
// ============================================================================

/// A parsed config file with its data layers loaded
#[derive(Debug)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: HostConfig,
    pub facts: Facts,
    pub hierarchy: Hierarchy,
}

impl LoadedConfig {
    /// Load the config file and every data layer it names
    pub fn load(path: &Path) -> Result<Self> {
        let config: HostConfig = load_file(path)?;
        log::info!("Loaded {}", path.display());

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut hierarchy = Hierarchy::new();
        for layer in &config.data.layers {
            let layer_path = paths::resolve(base, layer);
            let values: BTreeMap<String, Value> = load_file(&layer_path)
                .with_context(|| format!("Invalid data layer '{layer}'"))?;
            hierarchy.push(Layer::new(layer.clone(), values));
        }

        let facts = config
            .facts
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            config,
            facts,
            hierarchy,
        })
    }

    /// Locate and load the config, honouring `--config`
    pub fn discover(explicit: Option<&str>) -> Result<Self> {
        let path = paths::config_file(explicit)?;
        Self::load(&path)
    }

    /// Jobs from the CLI, then the file, then the default
    pub fn jobs(&self, cli: Option<usize>) -> usize {
        cli.or(self.config.run.jobs).unwrap_or(DEFAULT_JOBS).max(1)
    }

    /// Declare every configured component and resource
    pub fn catalog<'r>(&'r self, registry: &'r Registry) -> Result<Catalog<'r>> {
        let mut catalog = Catalog::new(registry, &self.hierarchy, &self.facts);

        for decl in &self.config.components {
            let deps = decl.dependencies()?;
            catalog
                .declare_with(&decl.class, decl.title.as_deref(), &decl.params, deps)
                .with_context(|| format!("Could not declare {}", decl.label()))?;
        }

        for decl in &self.config.resources {
            let kind: Kind = decl.kind.parse()?;
            let resource = Resource::from_attributes(kind, &decl.title, &decl.attrs)?;
            catalog.add_resource(resource);
        }

        log::info!(
            "Declared {} component instances, {} resources",
            catalog.instances().len(),
            catalog.resources().len()
        );
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components;
    use declarative::{ResourceId, ResourceSpec};

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    const HOST: &str = r#"
[facts]
hostname = "db1"
fqdn = "db1.example.com"
ipaddress = "10.0.0.11"
lsbdistcodename = "jammy"

[data]
layers = ["nodes/db1.toml", "common.json"]

[run]
jobs = 2

[[component]]
class = "percona::db"
title = "app"
params = { user = "app", password = "secret" }

[[resource]]
kind = "file"
title = "/etc/motd"
ensure = "present"
content = "managed\n"
mode = "0644"
"#;

    #[test]
    fn test_load_toml_with_layers() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "nodes/db1.toml", "\"percona::db::charset\" = \"utf8mb4\"\n");
        write(
            dir.path(),
            "common.json",
            r#"{"percona::db::charset": "latin1", "percona::db::host": "%"}"#,
        );
        let path = write(dir.path(), "clusterform.toml", HOST);

        let loaded = LoadedConfig::load(&path).unwrap();
        assert_eq!(loaded.facts.get("fqdn"), Some("db1.example.com"));
        assert_eq!(loaded.hierarchy.layers().len(), 2);
        assert_eq!(loaded.jobs(None), 2);
        assert_eq!(loaded.jobs(Some(8)), 8);

        let registry = components::registry();
        let catalog = loaded.catalog(&registry).unwrap();
        let database = catalog
            .resources()
            .iter()
            .find(|r| r.id == ResourceId::new(Kind::Database, "app"))
            .unwrap();
        // first layer wins for charset, second still answers host
        match &database.spec {
            ResourceSpec::Database(d) => assert_eq!(d.charset, "utf8mb4"),
            other => panic!("unexpected spec {other:?}"),
        }
        assert!(
            catalog
                .resources()
                .iter()
                .any(|r| r.id == ResourceId::new(Kind::DbUser, "app@%"))
        );
        assert!(
            catalog
                .resources()
                .iter()
                .any(|r| r.id == ResourceId::new(Kind::File, "/etc/motd"))
        );
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "clusterform.json",
            r#"{
                "facts": {"hostname": "arb1"},
                "component": [{"class": "percona::garbd", "params": {"peer_ip": "10.0.0.11"}}]
            }"#,
        );

        let loaded = LoadedConfig::load(&path).unwrap();
        assert_eq!(loaded.jobs(None), DEFAULT_JOBS);
        let registry = components::registry();
        let catalog = loaded.catalog(&registry).unwrap();
        assert!(
            catalog
                .resources()
                .iter()
                .any(|r| r.id == ResourceId::new(Kind::Service, "garbd"))
        );
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "clusterform.yaml", "facts: {}\n");
        let err = LoadedConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains(".toml or .json"));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "clusterform.toml", "[nodes]\nname = \"db1\"\n");
        assert!(LoadedConfig::load(&path).is_err());
    }

    #[test]
    fn test_missing_layer_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "clusterform.toml",
            "[data]\nlayers = [\"missing.toml\"]\n",
        );
        let err = LoadedConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("missing.toml"));
    }

    #[test]
    fn test_unknown_parameter_names_the_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "clusterform.toml",
            "[[component]]\nclass = \"percona::garbd\"\nparams = { peer = \"10.0.0.1\" }\n",
        );
        let loaded = LoadedConfig::load(&path).unwrap();
        let registry = components::registry();
        let err = loaded.catalog(&registry).unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("Could not declare percona::garbd"));
        assert!(text.contains("peer"));
    }

    #[test]
    fn test_component_dependencies_are_parsed() {
        let decl = ComponentDecl {
            class: "percona::db".into(),
            title: Some("app".into()),
            params: BTreeMap::new(),
            require: vec!["Package[mysql-server]".into(), "Class[percona::node]".into()],
            before: vec![],
            subscribe: vec!["File[/a, /b]".into()],
            notify: vec![],
        };
        let deps = decl.dependencies().unwrap();
        assert_eq!(deps.require.len(), 2);
        assert_eq!(deps.subscribe.len(), 2);
        assert_eq!(decl.label(), "percona::db[app]");
    }
}
