//! Embedded templates and static files
//!
//! Templates use `{{ name }}` placeholders filled from the declaring
//! component's parameters. Static files can be overridden (or supplied,
//! for key material) by dropping a file of the same name into the
//! `files/` directory next to the host configuration.

use anyhow::{Context, Result, anyhow, bail};
use declarative::{ParameterSet, TemplateRenderer};
use regex::Regex;
use std::fs;
use std::path::PathBuf;

const TEMPLATES: &[(&str, &str)] = &[
    ("balancermember.cfg", include_str!("../templates/balancermember.cfg")),
    ("debian.cnf", include_str!("../templates/debian.cnf")),
    ("garbd.cfg", include_str!("../templates/garbd.cfg")),
    ("my.cnf.pass", include_str!("../templates/my.cnf.pass")),
    ("mysqlchk", include_str!("../templates/mysqlchk")),
    ("percona.list", include_str!("../templates/percona.list")),
    ("percona_chk", include_str!("../templates/percona_chk")),
    ("perconanotify.py", include_str!("../templates/perconanotify.py")),
    ("tuning.cnf", include_str!("../templates/tuning.cnf")),
    ("wsrep.cnf", include_str!("../templates/wsrep.cnf")),
];

const FILES: &[(&str, &str)] = &[
    ("garbd-init", include_str!("../files/garbd-init")),
    ("garbd-logrotate", include_str!("../files/garbd-logrotate")),
    ("my.cnf", include_str!("../files/my.cnf")),
    ("percona-logrotate", include_str!("../files/percona-logrotate")),
    ("utf8.cnf", include_str!("../files/utf8.cnf")),
];

/// Renders embedded templates and serves static files
pub struct Assets {
    placeholder: Regex,
    files_dir: Option<PathBuf>,
}

impl Assets {
    /// `files_dir` is searched before the embedded files
    pub fn new(files_dir: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            placeholder: Regex::new(r"\{\{\s*(\w+)\s*\}\}").context("Invalid placeholder pattern")?,
            files_dir,
        })
    }

    pub fn template_names() -> impl Iterator<Item = &'static str> {
        TEMPLATES.iter().map(|(name, _)| *name)
    }

    fn template(name: &str) -> Option<&'static str> {
        TEMPLATES.iter().find(|(n, _)| *n == name).map(|(_, body)| *body)
    }

    fn embedded_file(name: &str) -> Option<&'static str> {
        FILES.iter().find(|(n, _)| *n == name).map(|(_, body)| *body)
    }
}

impl TemplateRenderer for Assets {
    fn render(&self, template: &str, params: &ParameterSet) -> Result<String> {
        let body = Self::template(template).ok_or_else(|| anyhow!("unknown template {template}"))?;

        if let Some(missing) = self
            .placeholder
            .captures_iter(body)
            .map(|caps| caps[1].to_string())
            .find(|name| params.bound(name).is_none())
        {
            bail!(
                "template {template} uses '{missing}', which {} does not define",
                params.component()
            );
        }

        Ok(self
            .placeholder
            .replace_all(body, |caps: &regex::Captures<'_>| {
                params.get(&caps[1]).map(ToString::to_string).unwrap_or_default()
            })
            .into_owned())
    }

    fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        if let Some(dir) = &self.files_dir {
            let path = dir.join(source);
            if path.is_file() {
                log::debug!("Using {} for {source}", path.display());
                return fs::read(&path)
                    .with_context(|| format!("Could not read {}", path.display()));
            }
        }
        Self::embedded_file(source)
            .map(|body| body.as_bytes().to_vec())
            .ok_or_else(|| anyhow!("no file named {source} is embedded or present in files/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{NoDefaults, ParamDef, ParamSchema};
    use std::collections::BTreeMap;

    fn params(defs: Vec<ParamDef>) -> ParameterSet {
        let schema = defs
            .into_iter()
            .fold(ParamSchema::new("percona::garbd"), ParamSchema::param);
        ParameterSet::resolve(&schema, &BTreeMap::new(), &NoDefaults).unwrap()
    }

    #[test]
    fn test_render_garbd_cfg() {
        let assets = Assets::new(None).unwrap();
        let params = params(vec![
            ParamDef::with_default("peer_ip", "10.0.0.11"),
            ParamDef::with_default("cluster_name", "prod"),
        ]);

        let text = assets.render("garbd.cfg", &params).unwrap();
        assert!(text.contains("GALERA_NODES=\"10.0.0.11:4567\""));
        assert!(text.contains("GALERA_GROUP=\"prod\""));
    }

    #[test]
    fn test_render_undef_is_empty() {
        let assets = Assets::new(None).unwrap();
        let params = params(vec![
            ParamDef::with_default("location", "http://repo.percona.com/apt"),
            ParamDef::optional("release"),
            ParamDef::with_default("repos", "main"),
        ]);

        let text = assets.render("percona.list", &params).unwrap();
        assert!(text.contains("deb http://repo.percona.com/apt  main"));
    }

    #[test]
    fn test_render_missing_parameter_fails() {
        let assets = Assets::new(None).unwrap();
        let params = params(vec![ParamDef::with_default("peer_ip", "10.0.0.11")]);

        let err = assets.render("garbd.cfg", &params).unwrap_err();
        assert!(err.to_string().contains("cluster_name"));
        assert!(assets.render("nope.cfg", &params).is_err());
    }

    #[test]
    fn test_every_template_is_reachable() {
        for name in Assets::template_names() {
            assert!(Assets::template(name).is_some_and(|body| !body.is_empty()));
        }
    }

    #[test]
    fn test_fetch_prefers_files_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("utf8.cnf"), "[mysqld]\n").unwrap();
        fs::write(dir.path().join("replication-key.pem"), "KEY").unwrap();
        let assets = Assets::new(Some(dir.path().to_path_buf())).unwrap();

        assert_eq!(assets.fetch("utf8.cnf").unwrap(), b"[mysqld]\n");
        assert_eq!(assets.fetch("replication-key.pem").unwrap(), b"KEY");
        assert!(assets.fetch("my.cnf").unwrap().starts_with(b"# Managed by clusterform"));
        assert!(Assets::new(None).unwrap().fetch("replication-key.pem").is_err());
    }
}
