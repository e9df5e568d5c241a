//! Component catalog
//!
//! A [`Component`] turns a resolved [`ParameterSet`] into resources. The
//! [`Catalog`] resolves parameters for each declared instance, lets the
//! component populate its [`Scope`], and collects the resulting resources
//! in declaration order.

use crate::error::{Error, Result};
use crate::params::{DefaultSource, ParamSchema, ParameterSet};
use crate::resource::{Dependencies, Resource};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Host facts (hostname, fqdn, ipaddress, ...) supplied by configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facts(BTreeMap<String, String>);

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// A fact that must be present
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| Error::validation(format!("fact '{name}'"), "is not set"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Facts {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A reusable unit that declares resources from its parameters
pub trait Component: Send + Sync {
    /// Fully qualified name, e.g. `percona::node`
    fn name(&self) -> &'static str;

    /// Accepted parameters and their built-in defaults
    fn schema(&self) -> ParamSchema;

    /// Whether instances carry a title (and may be declared many times)
    fn titled(&self) -> bool {
        false
    }

    /// Declare this instance's resources into `scope`
    fn declare(&self, scope: &mut Scope<'_, '_>, params: &ParameterSet) -> Result<()>;
}

/// The set of known components
#[derive(Default)]
pub struct Registry {
    components: BTreeMap<&'static str, Box<dyn Component>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, component: impl Component + 'static) {
        self.components.insert(component.name(), Box::new(component));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Component> {
        self.components.get(name).map(Box::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Component> {
        self.components.values().map(Box::as_ref)
    }
}

/// A declared component instance
#[derive(Debug, Clone)]
pub struct Instance {
    /// `percona::node` or `percona::db[app]`
    pub label: String,
    pub component: String,
    pub title: Option<String>,
    pub params: Arc<ParameterSet>,
}

/// Collects resources from declared component instances
pub struct Catalog<'r> {
    registry: &'r Registry,
    source: &'r dyn DefaultSource,
    facts: &'r Facts,
    resources: Vec<Resource>,
    instances: Vec<Instance>,
}

impl fmt::Debug for Catalog<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("facts", self.facts)
            .field("resources", &self.resources)
            .field("instances", &self.instances)
            .finish_non_exhaustive()
    }
}

impl<'r> Catalog<'r> {
    pub fn new(registry: &'r Registry, source: &'r dyn DefaultSource, facts: &'r Facts) -> Self {
        Self {
            registry,
            source,
            facts,
            resources: Vec::new(),
            instances: Vec::new(),
        }
    }

    /// Declare a component instance
    pub fn declare(
        &mut self,
        class: &str,
        title: Option<&str>,
        overrides: &BTreeMap<String, Value>,
    ) -> Result<()> {
        self.declare_with(class, title, overrides, Dependencies::default())
    }

    /// Declare a component instance whose resources all carry `deps`
    pub fn declare_with(
        &mut self,
        class: &str,
        title: Option<&str>,
        overrides: &BTreeMap<String, Value>,
        deps: Dependencies,
    ) -> Result<()> {
        let registry = self.registry;
        let component = registry
            .get(class)
            .ok_or_else(|| Error::validation(class, "unknown component"))?;

        let label = match (component.titled(), title) {
            (true, Some(t)) => format!("{class}[{t}]"),
            (false, None) => class.to_string(),
            (true, None) => return Err(Error::validation(class, "requires a title")),
            (false, Some(_)) => return Err(Error::validation(class, "does not take a title")),
        };
        if self.instances.iter().any(|i| i.label == label) {
            return Err(Error::validation(&label, "declared more than once"));
        }

        let mut params = ParameterSet::resolve(&component.schema(), overrides, self.source)?;
        if let Some(t) = title {
            params = params.with("title", t);
        }
        let params = Arc::new(params);

        log::debug!("Declaring {label}");
        self.instances.push(Instance {
            label: label.clone(),
            component: class.to_string(),
            title: title.map(str::to_string),
            params: Arc::clone(&params),
        });

        let mut scope = Scope {
            catalog: self,
            label,
            params: Arc::clone(&params),
            deps,
        };
        component.declare(&mut scope, &params)
    }

    /// Declare a component with default parameters unless already declared
    pub fn include(&mut self, class: &str) -> Result<()> {
        if self.instances.iter().any(|i| i.label == class) {
            return Ok(());
        }
        self.declare(class, None, &BTreeMap::new())
    }

    /// Add a resource that belongs to no component
    pub fn add_resource(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn facts(&self) -> &'r Facts {
        self.facts
    }

    pub fn into_resources(self) -> Vec<Resource> {
        self.resources
    }
}

/// What a component sees while declaring its resources
pub struct Scope<'c, 'r> {
    catalog: &'c mut Catalog<'r>,
    label: String,
    params: Arc<ParameterSet>,
    deps: Dependencies,
}

impl<'r> Scope<'_, 'r> {
    /// Label of the instance being declared
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn facts(&self) -> &'r Facts {
        self.catalog.facts
    }

    /// Replace the parameters attached to subsequently added resources
    ///
    /// Used when a component derives values (from facts or other
    /// parameters) that its templates need.
    pub fn bind(&mut self, params: ParameterSet) {
        self.params = Arc::new(params);
    }

    /// Add a resource owned by this instance
    pub fn add(&mut self, mut resource: Resource) {
        resource.component.clone_from(&self.label);
        resource.params = Arc::clone(&self.params);
        resource.deps.extend(&self.deps);
        self.catalog.resources.push(resource);
    }

    /// Whether an instance with this label was declared earlier in the run
    pub fn is_declared(&self, label: &str) -> bool {
        self.catalog.instances.iter().any(|i| i.label == label)
    }

    /// Include a singleton component
    pub fn include(&mut self, class: &str) -> Result<()> {
        self.catalog.include(class)
    }

    /// Declare a nested component instance
    pub fn declare(
        &mut self,
        class: &str,
        title: Option<&str>,
        overrides: &BTreeMap<String, Value>,
        deps: Dependencies,
    ) -> Result<()> {
        self.catalog.declare_with(class, title, overrides, deps)
    }
}
