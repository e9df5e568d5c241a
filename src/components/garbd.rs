use declarative::{
    Component, FileSpec, PackageSpec, ParamDef, ParamSchema, ParameterSet, Resource, Result, Scope,
    ServiceSpec,
};

use super::file;

const CONFIG_DIR: &str = "/etc/garbd";
const CONFIG_FILE: &str = "/etc/garbd/garbd.cfg";
const INIT_SCRIPT: &str = "/etc/init.d/garbd";

/// The Galera arbitrator, a voting member that stores no data
pub struct Garbd;

impl Component for Garbd {
    fn name(&self) -> &'static str {
        "percona::garbd"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(self.name())
            .param(ParamDef::with_default("cluster_name", "my_cluster"))
            .param(ParamDef::with_default("peer_ip", "0.0.0.0"))
            .param(ParamDef::with_default(
                "package_name",
                "percona-xtradb-cluster-galera-2.x",
            ))
    }

    fn declare(&self, scope: &mut Scope<'_, '_>, params: &ParameterSet) -> Result<()> {
        let package = Resource::new("galera", PackageSpec::present(params.str("package_name")?))?;
        let config_dir = Resource::from_spec(FileSpec::directory(CONFIG_DIR).mode(0o755))?;
        let log_dir = Resource::from_spec(FileSpec::directory("/var/log/garbd").mode(0o755))?;
        let logrotate = Resource::from_spec(
            FileSpec::present("/etc/logrotate.d/garbd").source("garbd-logrotate"),
        )?;
        let key = Resource::from_spec(
            FileSpec::present("/etc/garbd/replication-key.pem")
                .owned_by("root", "root")
                .mode(0o600)
                .source("replication-key.pem"),
        )?
        .require(file(CONFIG_DIR));
        let cert = Resource::from_spec(
            FileSpec::present("/etc/garbd/replication-cert.pem")
                .owned_by("root", "root")
                .mode(0o600)
                .source("replication-cert.pem"),
        )?
        .require(&key.id);
        let init =
            Resource::from_spec(FileSpec::present(INIT_SCRIPT).mode(0o755).source("garbd-init"))?;
        let config = Resource::from_spec(FileSpec::present(CONFIG_FILE).template("garbd.cfg"))?
            .require(file(CONFIG_DIR));
        let service = Resource::new("garbd", ServiceSpec::running("garbd"))?
            .require(&package.id)
            .require_all([&config.id, &init.id, &cert.id])
            .subscribe(&config.id);

        for resource in [
            package, config_dir, log_dir, logrotate, key, cert, init, config, service,
        ] {
            scope.add(resource);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::components::testing::{declare, find, params, run};
    use declarative::{Kind, MemoryHost, ResourceId, Status, Target, Value};
    use std::collections::BTreeMap;

    #[test]
    fn test_service_waits_for_config_and_keys() {
        let resources = declare("percona::garbd", None, &BTreeMap::new());
        let service = find(&resources, "Service[garbd]");
        assert_eq!(service.deps.require.len(), 4);
        assert_eq!(
            service.deps.subscribe,
            vec![Target::from(ResourceId::new(Kind::File, "/etc/garbd/garbd.cfg"))]
        );
    }

    #[test]
    fn test_missing_key_material_blocks_the_service() {
        let host = MemoryHost::new();
        let overrides = params(&[("peer_ip", Value::from("10.0.0.11"))]);
        let report = run(&host, declare("percona::garbd", None, &overrides));

        let key = ResourceId::new(Kind::File, "/etc/garbd/replication-key.pem");
        assert!(matches!(report.status(&key), Some(Status::Failed { .. })));
        let service = ResourceId::new(Kind::Service, "garbd");
        match report.status(&service) {
            Some(Status::Blocked { failed, .. }) => assert_eq!(failed, &key),
            other => panic!("unexpected status {other:?}"),
        }

        // independent resources still converge
        let state = host.snapshot();
        let cfg = String::from_utf8(state.files["/etc/garbd/garbd.cfg"].content.clone().unwrap())
            .unwrap();
        assert!(cfg.contains("GALERA_NODES=\"10.0.0.11:4567\""));
        assert!(state.packages.contains("percona-xtradb-cluster-galera-2.x"));
    }
}
