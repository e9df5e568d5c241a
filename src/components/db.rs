use declarative::{
    Component, DatabaseSpec, DbGrantSpec, DbUserSpec, ExecSpec, LogOutput, ParamDef, ParamSchema,
    ParameterSet, Resource, Result, Scope, Target, Value,
};

/// An application database with its owner account
///
/// When `sql` names a dump, it is imported once the database is created,
/// or on every run with `enforce_sql`. Without `sql` the import is a no-op.
pub struct Db;

impl Component for Db {
    fn name(&self) -> &'static str {
        "percona::db"
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema::new(self.name())
            .param(ParamDef::required("user"))
            .param(ParamDef::required("password").secret())
            .param(ParamDef::with_default("charset", "utf8"))
            .param(ParamDef::with_default("host", "localhost"))
            .param(ParamDef::with_default("grant", Value::from(vec!["all"])))
            .param(ParamDef::with_default("sql", ""))
            .param(ParamDef::with_default("enforce_sql", false))
    }

    fn titled(&self) -> bool {
        true
    }

    fn declare(&self, scope: &mut Scope<'_, '_>, params: &ParameterSet) -> Result<()> {
        let name = params.str("title")?;
        let account = format!("{}@{}", params.str("user")?, params.str("host")?);

        let mut database =
            Resource::from_spec(DatabaseSpec::present(&name, params.str("charset")?))?;
        if scope.is_declared("percona::node") {
            database = database.require(Target::Component("percona::node".into()));
        }
        let user = Resource::from_spec(DbUserSpec::present(&account, params.str("password")?))?
            .require(&database.id);
        let grant = Resource::from_spec(DbGrantSpec::new(
            &account,
            format!("{name}.*"),
            params.list("grant")?,
        ))?
        .require(&user.id);

        let sql = params.str("sql")?;
        let import = Resource::new(
            format!("{name}-import"),
            ExecSpec::new(format!("/usr/bin/mysql {name} < {sql}"))
                .onlyif(format!("test -n '{sql}'"))
                .log_output(LogOutput::Always)
                .refresh_only(!params.bool("enforce_sql")?),
        )?
        .require(&grant.id)
        .subscribe(&database.id);

        scope.add(database);
        scope.add(user);
        scope.add(grant);
        scope.add(import);
        Ok(())
    }
}
