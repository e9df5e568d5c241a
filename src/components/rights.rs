use declarative::{
    Component, DbGrantSpec, DbUserSpec, ParamDef, ParamSchema, ParameterSet, Resource, Result,
    Scope,
};

/// A database account and its privileges on one database
///
/// Relationships given by the declarer apply to both the account and the
/// grant.
pub struct Rights;

impl Component for Rights {
    fn name(&self) -> &'static str {
        "percona::rights"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(self.name())
            .param(ParamDef::required("database"))
            .param(ParamDef::required("user"))
            .param(ParamDef::required("password").secret())
            .param(ParamDef::required("priv"))
            .param(ParamDef::with_default("host", "localhost"))
            .param(ParamDef::with_default("grant_option", false))
    }

    fn titled(&self) -> bool {
        true
    }

    fn declare(&self, scope: &mut Scope<'_, '_>, params: &ParameterSet) -> Result<()> {
        let account = format!("{}@{}", params.str("user")?, params.str("host")?);
        // "SELECT, INSERT" and ["SELECT", "INSERT"] mean the same
        let privileges: Vec<String> = params
            .list("priv")?
            .iter()
            .flat_map(|p| p.split(','))
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let user = Resource::from_spec(DbUserSpec::present(&account, params.str("password")?))?;
        let grant = Resource::from_spec(
            DbGrantSpec::new(&account, format!("{}.*", params.str("database")?), privileges)
                .grant_option(params.bool("grant_option")?),
        )?
        .require(&user.id);

        scope.add(user);
        scope.add(grant);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::components::testing::{declare_with_source, find, params};
    use declarative::{Error, NoDefaults, ResourceSpec, Target, Value};

    fn overrides() -> Vec<(&'static str, Value)> {
        vec![
            ("database", Value::from("*")),
            ("user", Value::from("debian-sys-maint")),
            ("password", Value::from("maint")),
            ("priv", Value::from("SELECT, RELOAD, SHUTDOWN")),
            ("grant_option", Value::from(true)),
        ]
    }

    #[test]
    fn test_declares_user_and_grant() {
        let resources = declare_with_source(
            "percona::rights",
            Some("debian-sys-maint user"),
            &params(&overrides()),
            &NoDefaults,
        )
        .unwrap();
        assert_eq!(resources.len(), 2);

        let grant = find(&resources, "Db_grant[debian-sys-maint@localhost/*.*]");
        match &grant.spec {
            ResourceSpec::DbGrant(g) => {
                assert_eq!(g.privileges, vec!["SELECT", "RELOAD", "SHUTDOWN"]);
                assert!(g.grant_option);
            }
            other => panic!("unexpected spec {other:?}"),
        }
        let user = find(&resources, "Db_user[debian-sys-maint@localhost]");
        assert_eq!(grant.deps.require, vec![Target::from(&user.id)]);
        assert_eq!(user.component, "percona::rights[debian-sys-maint user]");
    }

    #[test]
    fn test_missing_password_is_unresolved() {
        let mut pairs = overrides();
        pairs.retain(|(k, _)| *k != "password");
        let err = declare_with_source("percona::rights", Some("x"), &params(&pairs), &NoDefaults)
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedParameter { ref name, .. } if name == "password"));
    }
}
