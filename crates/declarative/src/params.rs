//! Parameter binding
//!
//! Each component instance gets a [`ParameterSet`] resolved from three
//! sources, in order: explicit overrides, the external [`DefaultSource`]
//! (keyed `"<component>::<param>"`), and the component's built-in default.
//! A resolved set is immutable; derived values produce a new set.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Where a parameter's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Given explicitly by the declarer
    Override,
    /// Found in the external data source
    External,
    /// The component's built-in default
    Builtin,
    /// Computed by the component from other parameters or facts
    Derived,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Override => "override",
            Self::External => "external",
            Self::Builtin => "default",
            Self::Derived => "derived",
        })
    }
}

/// What a parameter falls back to when neither override nor external value exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// No default; resolution fails
    Required,
    /// Optional, reads as `None`
    Undef,
    Value(Value),
}

/// Declaration of one component parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    pub name: String,
    pub fallback: Fallback,
    /// Masked when displayed
    pub secret: bool,
}

impl ParamDef {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fallback: Fallback::Required,
            secret: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fallback: Fallback::Undef,
            secret: false,
        }
    }

    pub fn with_default(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            fallback: Fallback::Value(value.into()),
            secret: false,
        }
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }
}

/// The parameters a component accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSchema {
    component: String,
    params: Vec<ParamDef>,
}

impl ParamSchema {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, def: ParamDef) -> Self {
        self.params.push(def);
        self
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn params(&self) -> &[ParamDef] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamDef> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Read-only external lookup of `"<component>::<param>"` keys
pub trait DefaultSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<Value>;
}

/// A source with no values
pub struct NoDefaults;

impl DefaultSource for NoDefaults {
    fn lookup(&self, _key: &str) -> Option<Value> {
        None
    }
}

impl DefaultSource for BTreeMap<String, Value> {
    fn lookup(&self, key: &str) -> Option<Value> {
        self.get(key).cloned()
    }
}

/// A resolved parameter value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bound {
    /// `None` when the parameter is undefined
    pub value: Option<Value>,
    pub provenance: Provenance,
    #[serde(skip)]
    pub secret: bool,
}

impl Bound {
    /// Render for display, masking secrets
    pub fn display(&self) -> String {
        match &self.value {
            None => "undef".to_string(),
            Some(_) if self.secret => "********".to_string(),
            Some(v) => v.to_string(),
        }
    }
}

/// Immutable resolved parameters of one component instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    component: String,
    values: BTreeMap<String, Bound>,
}

impl ParameterSet {
    /// Resolve every parameter in `schema`
    ///
    /// Fails with `UnknownParameter` when an override names a parameter the
    /// schema does not declare, and with `UnresolvedParameter` when a
    /// required parameter has no value from any source.
    pub fn resolve(
        schema: &ParamSchema,
        overrides: &BTreeMap<String, Value>,
        source: &dyn DefaultSource,
    ) -> Result<Self> {
        let component = schema.component();

        if let Some(name) = overrides.keys().find(|k| schema.get(k).is_none()) {
            return Err(Error::UnknownParameter {
                component: component.to_string(),
                name: name.clone(),
            });
        }

        let mut values = BTreeMap::new();
        for def in schema.params() {
            let (value, provenance) = if let Some(v) = overrides.get(&def.name) {
                (Some(v.clone()), Provenance::Override)
            } else if let Some(v) = source.lookup(&format!("{component}::{}", def.name)) {
                (Some(v), Provenance::External)
            } else {
                match &def.fallback {
                    Fallback::Value(v) => (Some(v.clone()), Provenance::Builtin),
                    Fallback::Undef => (None, Provenance::Builtin),
                    Fallback::Required => {
                        return Err(Error::UnresolvedParameter {
                            component: component.to_string(),
                            name: def.name.clone(),
                        });
                    }
                }
            };
            let bound = Bound {
                value,
                provenance,
                secret: def.secret,
            };
            log::trace!("{component}::{} = {} ({provenance})", def.name, bound.display());
            values.insert(def.name.clone(), bound);
        }

        Ok(Self {
            component: component.to_string(),
            values,
        })
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn bound(&self, name: &str) -> Option<&Bound> {
        self.values.get(name)
    }

    /// The value, or `None` when undefined or not declared
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).and_then(|b| b.value.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bound)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// A copy of this set with one more (or one replaced) value
    pub fn with(&self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let secret = self.values.get(&name).is_some_and(|b| b.secret);
        let mut next = self.clone();
        next.values.insert(
            name,
            Bound {
                value: Some(value.into()),
                provenance: Provenance::Derived,
                secret,
            },
        );
        next
    }

    fn lookup(&self, name: &str) -> Result<&Bound> {
        self.values.get(name).ok_or_else(|| Error::UnknownParameter {
            component: self.component.clone(),
            name: name.to_string(),
        })
    }

    fn mismatch(&self, name: &str, expected: &'static str, found: &Bound) -> Error {
        Error::ParameterType {
            component: self.component.clone(),
            name: name.to_string(),
            expected,
            found: found.display(),
        }
    }

    /// Optional string; integers and booleans are formatted
    pub fn opt_str(&self, name: &str) -> Result<Option<String>> {
        let bound = self.lookup(name)?;
        match &bound.value {
            None => Ok(None),
            Some(v) => v
                .as_scalar()
                .map(Some)
                .ok_or_else(|| self.mismatch(name, "a string", bound)),
        }
    }

    pub fn str(&self, name: &str) -> Result<String> {
        let bound = self.lookup(name)?;
        self.opt_str(name)?
            .ok_or_else(|| self.mismatch(name, "a string", bound))
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        let bound = self.lookup(name)?;
        bound
            .value
            .as_ref()
            .and_then(Value::as_bool)
            .ok_or_else(|| self.mismatch(name, "a boolean", bound))
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        let bound = self.lookup(name)?;
        bound
            .value
            .as_ref()
            .and_then(Value::as_int)
            .ok_or_else(|| self.mismatch(name, "an integer", bound))
    }

    pub fn list(&self, name: &str) -> Result<Vec<String>> {
        let bound = self.lookup(name)?;
        bound
            .value
            .as_ref()
            .and_then(Value::as_list)
            .ok_or_else(|| self.mismatch(name, "a list", bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ParamSchema {
        ParamSchema::new("percona::garbd")
            .param(ParamDef::with_default("cluster_name", "my_cluster"))
            .param(ParamDef::with_default("mode", "0644"))
            .param(ParamDef::optional("release"))
            .param(ParamDef::required("peer_ip"))
            .param(ParamDef::with_default("sst_password", "password").secret())
    }

    fn map(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_precedence_override_then_external_then_builtin() {
        let peer = map(&[("peer_ip", "10.0.0.1".into())]);

        let p = ParameterSet::resolve(&schema(), &peer, &NoDefaults).unwrap();
        assert_eq!(p.str("mode").unwrap(), "0644");
        assert_eq!(p.bound("mode").unwrap().provenance, Provenance::Builtin);

        let external = map(&[("percona::garbd::mode", "0600".into())]);
        let p = ParameterSet::resolve(&schema(), &peer, &external).unwrap();
        assert_eq!(p.str("mode").unwrap(), "0600");
        assert_eq!(p.bound("mode").unwrap().provenance, Provenance::External);

        let overrides = map(&[("peer_ip", "10.0.0.1".into()), ("mode", "0755".into())]);
        let p = ParameterSet::resolve(&schema(), &overrides, &external).unwrap();
        assert_eq!(p.str("mode").unwrap(), "0755");
        assert_eq!(p.bound("mode").unwrap().provenance, Provenance::Override);
    }

    #[test]
    fn test_required_without_value_fails() {
        let err = ParameterSet::resolve(&schema(), &map(&[]), &NoDefaults).unwrap_err();
        assert_eq!(
            err,
            Error::UnresolvedParameter {
                component: "percona::garbd".into(),
                name: "peer_ip".into(),
            }
        );
        assert!(err.is_preflight());
    }

    #[test]
    fn test_required_satisfied_externally() {
        let external = map(&[("percona::garbd::peer_ip", "10.0.0.2".into())]);
        let p = ParameterSet::resolve(&schema(), &map(&[]), &external).unwrap();
        assert_eq!(p.str("peer_ip").unwrap(), "10.0.0.2");
    }

    #[test]
    fn test_unknown_override_rejected() {
        let err = ParameterSet::resolve(
            &schema(),
            &map(&[("peer_ip", "x".into()), ("bogus", "1".into())]),
            &NoDefaults,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownParameter { ref name, .. } if name == "bogus"));
    }

    #[test]
    fn test_undef_reads_as_none() {
        let p = ParameterSet::resolve(&schema(), &map(&[("peer_ip", "x".into())]), &NoDefaults)
            .unwrap();
        assert_eq!(p.opt_str("release").unwrap(), None);
        assert!(p.str("release").is_err());
    }

    #[test]
    fn test_typed_getters() {
        let p = ParameterSet::resolve(
            &schema(),
            &map(&[("peer_ip", "x".into()), ("cluster_name", "true".into())]),
            &NoDefaults,
        )
        .unwrap();
        assert!(p.bool("cluster_name").unwrap());
        let err = p.int("peer_ip").unwrap_err();
        assert!(matches!(err, Error::ParameterType { expected: "an integer", .. }));
    }

    #[test]
    fn test_with_returns_new_set() {
        let p = ParameterSet::resolve(&schema(), &map(&[("peer_ip", "x".into())]), &NoDefaults)
            .unwrap();
        let q = p.with("release", "jammy");
        assert_eq!(p.opt_str("release").unwrap(), None);
        assert_eq!(q.str("release").unwrap(), "jammy");
        assert_eq!(q.bound("release").unwrap().provenance, Provenance::Derived);
    }

    #[test]
    fn test_secret_masked_in_display() {
        let p = ParameterSet::resolve(&schema(), &map(&[("peer_ip", "x".into())]), &NoDefaults)
            .unwrap();
        assert_eq!(p.bound("sst_password").unwrap().display(), "********");
        assert_eq!(p.str("sst_password").unwrap(), "password");
    }
}
