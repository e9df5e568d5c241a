use declarative::{
    Component, FileSpec, ParamDef, ParamSchema, ParameterSet, Resource, Result, Scope,
};

const MEMBERS_DIR: &str = "/etc/haproxy/members.d";
const CHECK_OPTIONS: &str = "check port 9200 inter 12000 rise 3 fall 3";

/// Registers this node as a member of a balancer listener
///
/// Each node drops one fragment into `members.d`; the balancer assembles
/// its backend from the fragments.
pub struct Haproxy;

impl Component for Haproxy {
    fn name(&self) -> &'static str {
        "percona::haproxy"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(self.name())
            .param(ParamDef::with_default("haproxy_listener", "default_listener"))
            .param(ParamDef::with_default("haproxy_failover", false))
            .param(ParamDef::with_default("haproxy_primary", false))
    }

    fn declare(&self, scope: &mut Scope<'_, '_>, params: &ParameterSet) -> Result<()> {
        let facts = scope.facts();
        let fqdn = facts.require("fqdn")?;

        let backup = params.bool("haproxy_failover")? && !params.bool("haproxy_primary")?;
        let options = if backup {
            format!("{CHECK_OPTIONS} backup")
        } else {
            CHECK_OPTIONS.to_string()
        };
        scope.bind(
            params
                .with("server_name", facts.require("hostname")?)
                .with("ipaddress", facts.require("ipaddress")?)
                .with("haproxy_options", options),
        );

        let dir = Resource::from_spec(FileSpec::directory(MEMBERS_DIR).mode(0o755))?;
        let path = format!(
            "{MEMBERS_DIR}/{}-{fqdn}.cfg",
            params.str("haproxy_listener")?
        );
        let member = Resource::from_spec(
            FileSpec::present(path)
                .mode(0o644)
                .template("balancermember.cfg"),
        )?
        .require(&dir.id);

        scope.add(dir);
        scope.add(member);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::components::testing::{declare, find, params, run};
    use declarative::{MemoryHost, Value};
    use std::collections::BTreeMap;

    const FRAGMENT: &str = "/etc/haproxy/members.d/default_listener-db1.example.com.cfg";

    fn fragment(host: &MemoryHost) -> String {
        let state = host.snapshot();
        String::from_utf8(state.files[FRAGMENT].content.clone().unwrap()).unwrap()
    }

    #[test]
    fn test_member_fragment_from_facts() {
        let host = MemoryHost::new();
        let resources = declare("percona::haproxy", None, &BTreeMap::new());
        find(&resources, &format!("File[{FRAGMENT}]"));
        assert!(run(&host, resources).is_success());

        assert_eq!(
            fragment(&host),
            "  server db1 10.0.0.11:3306 check port 9200 inter 12000 rise 3 fall 3\n"
        );
    }

    #[test]
    fn test_failover_member_is_backup_unless_primary() {
        let host = MemoryHost::new();
        let overrides = params(&[("haproxy_failover", Value::from(true))]);
        run(&host, declare("percona::haproxy", None, &overrides));
        assert!(fragment(&host).trim_end().ends_with("fall 3 backup"));

        let host = MemoryHost::new();
        let overrides = params(&[
            ("haproxy_failover", Value::from(true)),
            ("haproxy_primary", Value::from("true")),
        ]);
        run(&host, declare("percona::haproxy", None, &overrides));
        assert!(fragment(&host).trim_end().ends_with("fall 3"));
    }
}
