use declarative::{
    Component, Dependencies, ExecSpec, FileSpec, PackageSpec, ParamDef, ParamSchema,
    ParameterSet, Resource, Result, Scope, ServiceEnsure, ServiceSpec, Value,
};

use super::{SYSTEM_PATH, overrides};

/// HTTP health endpoint on port 9200, served by xinetd
///
/// Balancers probe it to learn whether the node is synced.
pub struct HealthCheck;

impl Component for HealthCheck {
    fn name(&self) -> &'static str {
        "percona::health_check"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(self.name())
            .param(ParamDef::with_default("mysql_host", "127.0.0.1"))
            .param(ParamDef::with_default("mysql_port", "3306"))
            .param(ParamDef::with_default("mysql_bin_dir", "/usr/bin/mysql"))
            .param(ParamDef::with_default("mysqlchk_script_dir", "/usr/local/bin"))
            .param(ParamDef::with_default("xinetd_dir", "/etc/xinetd.d"))
            .param(ParamDef::with_default("mysqlchk_user", "mysqlchk_user"))
            .param(ParamDef::with_default("mysqlchk_password", "mysqlchk_password").secret())
            .param(ParamDef::with_default("enabled", true))
    }

    fn declare(&self, scope: &mut Scope<'_, '_>, params: &ParameterSet) -> Result<()> {
        let enabled = params.bool("enabled")?;
        scope.bind(params.with("xinetd_disable", if enabled { "no" } else { "yes" }));

        let script_dir = params.str("mysqlchk_script_dir")?;
        let xinetd_dir = params.str("xinetd_dir")?;

        let package = Resource::from_spec(PackageSpec::present("xinetd"))?;
        let scripts = Resource::from_spec(
            FileSpec::directory(&script_dir)
                .mode(0o755)
                .owned_by("root", "root"),
        )?
        .require(&package.id);
        let xinetd = Resource::from_spec(
            FileSpec::directory(&xinetd_dir)
                .mode(0o755)
                .owned_by("root", "root"),
        )?
        .require(&package.id);
        let script = Resource::from_spec(
            FileSpec::present(format!("{script_dir}/percona_chk"))
                .mode(0o755)
                .owned_by("root", "root")
                .template("percona_chk"),
        )?
        .require(&scripts.id);
        let service_file = Resource::from_spec(
            FileSpec::present(format!("{xinetd_dir}/mysqlchk"))
                .mode(0o644)
                .owned_by("root", "root")
                .template("mysqlchk"),
        )?
        .require(&xinetd.id);
        let port = Resource::new(
            "mysqlchk-service-port",
            ExecSpec::new("printf 'mysqlchk\\t9200/tcp\\n' >> /etc/services")
                .unless("grep -qE '[[:space:]]9200/tcp' /etc/services")
                .path(SYSTEM_PATH),
        )?
        .require(&service_file.id);

        let ensure = if enabled {
            ServiceEnsure::Running
        } else {
            ServiceEnsure::Stopped
        };
        let service = Resource::new("xinetd", ServiceSpec::new("xinetd", ensure, true))?
            .require(&package.id)
            .require(&service_file.id)
            .subscribe(&service_file.id);

        for resource in [package, scripts, xinetd, script, service_file, port, service] {
            scope.add(resource);
        }

        let db = overrides([
            ("user", Value::from(params.str("mysqlchk_user")?)),
            ("password", Value::from(params.str("mysqlchk_password")?)),
            ("host", Value::from(params.str("mysql_host")?)),
            ("grant", Value::from(vec!["all"])),
        ]);
        scope.declare("percona::db", Some("mysql"), &db, Dependencies::default())
    }
}
