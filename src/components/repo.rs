use declarative::{
    Component, ExecSpec, FileSpec, ParamDef, ParamSchema, ParameterSet, Resource, Result, Scope,
};

use super::SYSTEM_PATH;

const SOURCES_LIST: &str = "/etc/apt/sources.list.d/percona.list";

/// The vendor apt repository and its signing key
pub struct Repo;

impl Component for Repo {
    fn name(&self) -> &'static str {
        "percona::repo"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(self.name())
            .param(ParamDef::with_default("location", "http://repo.percona.com/apt"))
            .param(ParamDef::optional("release"))
            .param(ParamDef::with_default("repos", "main"))
            .param(ParamDef::with_default(
                "key_id",
                "430BDF5C56E7C94E848EE60C1C4CBDCDCD2EFD2A",
            ))
            .param(ParamDef::with_default("key_server", "pool.sks-keyservers.net"))
    }

    fn declare(&self, scope: &mut Scope<'_, '_>, params: &ParameterSet) -> Result<()> {
        let release = match params.opt_str("release")? {
            Some(release) => release,
            None => scope.facts().require("lsbdistcodename")?.to_string(),
        };
        scope.bind(params.with("release", release));

        let key_id = params.str("key_id")?;
        let short_id = key_id.get(key_id.len().saturating_sub(8)..).unwrap_or(&key_id);

        let list = Resource::from_spec(
            FileSpec::present(SOURCES_LIST)
                .mode(0o644)
                .template("percona.list"),
        )?;
        let key = Resource::new(
            "percona-apt-key",
            ExecSpec::new(format!(
                "apt-key adv --keyserver {} --recv-keys {key_id}",
                params.str("key_server")?
            ))
            .unless(format!("apt-key list 2>/dev/null | grep -qi {short_id}"))
            .path(SYSTEM_PATH),
        )?;
        let update = Resource::new(
            "percona-apt-update",
            ExecSpec::new("apt-get update")
                .refresh_only(true)
                .path(SYSTEM_PATH),
        )?
        .subscribe(&list.id)
        .subscribe(&key.id);

        scope.add(list);
        scope.add(key);
        scope.add(update);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing::{declare, find, params, run};
    use declarative::{Kind, MemoryHost, ResourceId, ResourceSpec, Status, Value};
    use std::collections::BTreeMap;

    #[test]
    fn test_release_defaults_to_codename_fact() {
        let resources = declare("percona::repo", None, &BTreeMap::new());
        let list = find(&resources, "File[/etc/apt/sources.list.d/percona.list]");
        assert_eq!(list.params.str("release").unwrap(), "jammy");

        let overrides = params(&[("release", Value::from("noble"))]);
        let resources = declare("percona::repo", None, &overrides);
        let list = find(&resources, "File[/etc/apt/sources.list.d/percona.list]");
        assert_eq!(list.params.str("release").unwrap(), "noble");
    }

    #[test]
    fn test_key_exec_is_guarded() {
        let resources = declare("percona::repo", None, &BTreeMap::new());
        match &find(&resources, "Exec[percona-apt-key]").spec {
            ResourceSpec::Exec(e) => {
                assert!(e.command.contains("--keyserver pool.sks-keyservers.net"));
                assert!(e.command.ends_with("430BDF5C56E7C94E848EE60C1C4CBDCDCD2EFD2A"));
                assert_eq!(
                    e.unless.as_deref(),
                    Some("apt-key list 2>/dev/null | grep -qi CD2EFD2A")
                );
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_update_runs_when_sources_change() {
        let host = MemoryHost::new();
        let report = run(&host, declare("percona::repo", None, &BTreeMap::new()));
        assert!(report.is_success());
        assert!(host.commands_run().contains(&"apt-get update".to_string()));

        let state = host.snapshot();
        let content = state.files[SOURCES_LIST].content.clone().unwrap();
        let text = String::from_utf8(content).unwrap();
        assert!(text.contains("deb http://repo.percona.com/apt jammy main"));

        // converged: the list is unchanged and the update is skipped
        let report = run(&host, declare("percona::repo", None, &BTreeMap::new()));
        let update = ResourceId::new(Kind::Exec, "percona-apt-update");
        assert!(matches!(report.status(&update), Some(Status::Skipped { .. })));
        assert_eq!(report.summary().changed, 0);
    }
}
