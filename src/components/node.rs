use declarative::{
    Component, Dependencies, ExecSpec, FileSpec, Kind, LogOutput, PackageSpec, ParamDef,
    ParamSchema, ParameterSet, Resource, ResourceId, Result, Scope, ServiceEnsure, ServiceSpec,
    Target, UserSpec, Value,
};

use super::{file, overrides};

const MYSQL_DIR: &str = "/etc/mysql";
const CONF_DIR: &str = "/etc/mysql/conf.d";
const NOTIFY_SCRIPT: &str = "/usr/local/bin/perconanotify.py";
const REPLICATION_KEY: &str = "/etc/mysql/replication-key.pem";
const REPLICATION_CERT: &str = "/etc/mysql/replication-cert.pem";
const ROOT_MY_CNF: &str = "/root/.my.cnf";

/// Privileges of the maintenance account used by the distribution scripts
const MAINT_PRIVILEGES: &[&str] = &[
    "SELECT",
    "INSERT",
    "UPDATE",
    "DELETE",
    "CREATE",
    "DROP",
    "RELOAD",
    "SHUTDOWN",
    "PROCESS",
    "FILE",
    "REFERENCES",
    "INDEX",
    "ALTER",
    "SHOW DATABASES",
    "SUPER",
    "CREATE TEMPORARY TABLES",
    "LOCK TABLES",
    "EXECUTE",
    "REPLICATION SLAVE",
    "REPLICATION CLIENT",
    "CREATE VIEW",
    "SHOW VIEW",
    "CREATE ROUTINE",
    "ALTER ROUTINE",
    "CREATE USER",
    "EVENT",
    "TRIGGER",
];

/// Tuning knobs written to `tuning.cnf`, with their defaults
const TUNING: &[(&str, &str)] = &[
    ("tune_innodb_buffer_pool_size", "134217728"),
    ("tune_innodb_data_file_path", "ibdata1:12M:autoextend"),
    ("tune_innodb_flush_method", "fsync"),
    ("tune_innodb_file_per_table", "1"),
    ("tune_table_open_cache", "2000"),
    ("tune_max_connections", "151"),
    ("tune_wait_timeout", "28800"),
    ("tune_tmp_table_size", "16777216"),
    ("tune_max_heap_table_size", "16777216"),
    ("tune_thread_cache_size", "8"),
    ("tune_open_files_limit", "5000"),
    ("tune_table_definition_cache", "1400"),
    ("tune_query_cache_size", "0"),
    ("tune_query_cache_type", "0"),
];

/// A database server joined to (or bootstrapping) a Galera cluster
pub struct Node;

impl Component for Node {
    fn name(&self) -> &'static str {
        "percona::node"
    }

    fn schema(&self) -> ParamSchema {
        let schema = ParamSchema::new(self.name())
            .param(ParamDef::with_default("cluster_name", "my_cluster"))
            .param(ParamDef::with_default("joiner", false))
            .param(ParamDef::with_default("donor_ip", "0.0.0.0"))
            .param(ParamDef::with_default("sst_method", "xtrabackup-v2"))
            .param(ParamDef::with_default("sst_user", "wsrep_sst"))
            .param(ParamDef::with_default("sst_password", "password").secret())
            .param(ParamDef::with_default("root_password", "password").secret())
            .param(ParamDef::with_default("maint_password", "maint").secret())
            .param(ParamDef::with_default("old_root_password", "").secret())
            .param(ParamDef::with_default("enabled", true))
            .param(ParamDef::with_default(
                "package_name",
                "percona-xtradb-cluster-server-5.6",
            ))
            .param(ParamDef::with_default("repo_location", "http://repo.percona.com/apt"))
            .param(ParamDef::with_default(
                "percona_notify_from",
                "percona-noreply@example.com",
            ))
            .param(ParamDef::with_default("percona_notify_to", "root@localhost"))
            .param(ParamDef::optional("wsrep_node_address"))
            .param(ParamDef::with_default("ssl_replication", false))
            .param(ParamDef::optional("ssl_replication_cert"))
            .param(ParamDef::optional("ssl_replication_key").secret());

        TUNING
            .iter()
            .fold(schema, |s, (name, default)| {
                s.param(ParamDef::with_default(*name, *default))
            })
            .param(ParamDef::optional("tune_other_options"))
    }

    fn declare(&self, scope: &mut Scope<'_, '_>, params: &ParameterSet) -> Result<()> {
        if !scope.is_declared("percona::repo") {
            let repo = overrides([("location", Value::from(params.str("repo_location")?))]);
            scope.declare("percona::repo", None, &repo, Dependencies::default())?;
        }

        let joiner = params.bool("joiner")?;
        let ssl = params.bool("ssl_replication")?;
        let root_password = params.str("root_password")?;
        let sst_user = params.str("sst_user")?;
        let sst_password = params.str("sst_password")?;

        let cluster_address = if joiner {
            format!("gcomm://{}", params.str("donor_ip")?)
        } else {
            "gcomm://".to_string()
        };
        let node_address = params
            .opt_str("wsrep_node_address")?
            .map(|a| format!("wsrep_node_address = {a}"))
            .unwrap_or_default();
        let provider_options = if ssl {
            format!(
                "wsrep_provider_options = \"socket.ssl_cert={REPLICATION_CERT}; socket.ssl_key={REPLICATION_KEY}\""
            )
        } else {
            String::new()
        };
        scope.bind(
            params
                .with("wsrep_cluster_address", cluster_address)
                .with("wsrep_node_address_line", node_address)
                .with("wsrep_provider_options_line", provider_options),
        );

        let mysql_user = ResourceId::new(Kind::User, "mysql");
        let mysql_service = ResourceId::new(Kind::Service, "mysql");
        let dirs = [file(MYSQL_DIR), file(CONF_DIR)];

        let package = Resource::new(
            "mysql-server",
            PackageSpec::present(params.str("package_name")?),
        )?
        .require(Target::Component("percona::repo".into()));
        let mut user = UserSpec::present("mysql");
        user.system = true;
        let user = Resource::new("mysql", user)?;

        let mysql_dir = Resource::from_spec(FileSpec::directory(MYSQL_DIR).mode(0o755))?;
        let conf_dir = Resource::from_spec(FileSpec::directory(CONF_DIR).mode(0o755))?;
        let my_cnf = Resource::from_spec(FileSpec::present("/etc/mysql/my.cnf").source("my.cnf"))?
            .require(file(MYSQL_DIR));
        let notify = Resource::from_spec(
            FileSpec::present(NOTIFY_SCRIPT)
                .mode(0o755)
                .template("perconanotify.py"),
        )?;
        let wsrep = Resource::from_spec(
            FileSpec::present("/etc/mysql/conf.d/wsrep.cnf")
                .owned_by("mysql", "mysql")
                .mode(0o600)
                .template("wsrep.cnf"),
        )?
        .require_all(dirs.clone())
        .require(file(NOTIFY_SCRIPT))
        .require(&mysql_user);
        let utf8 = Resource::from_spec(
            FileSpec::present("/etc/mysql/conf.d/utf8.cnf").source("utf8.cnf"),
        )?
        .require_all(dirs.clone());
        let tuning = Resource::from_spec(
            FileSpec::present("/etc/mysql/conf.d/tuning.cnf").template("tuning.cnf"),
        )?
        .require_all(dirs.clone());
        let debian = Resource::from_spec(
            FileSpec::present("/etc/mysql/debian.cnf")
                .owned_by("mysql", "mysql")
                .mode(0o600)
                .template("debian.cnf"),
        )?
        .require(&mysql_service)
        .require_all(dirs.clone())
        .require(&mysql_user);
        let logrotate = Resource::from_spec(
            FileSpec::present("/etc/logrotate.d/percona").source("percona-logrotate"),
        )?;

        let mut config_files = vec![
            my_cnf.id.clone(),
            wsrep.id.clone(),
            utf8.id.clone(),
            tuning.id.clone(),
        ];

        let replication = if ssl {
            let mut key = FileSpec::present(REPLICATION_KEY)
                .owned_by("mysql", "mysql")
                .mode(0o600);
            key = match params.opt_str("ssl_replication_key")? {
                Some(pem) => key.content(pem),
                None => key.source("replication-key.pem"),
            };
            let mut cert = FileSpec::present(REPLICATION_CERT)
                .owned_by("mysql", "mysql")
                .mode(0o644);
            cert = match params.opt_str("ssl_replication_cert")? {
                Some(pem) => cert.content(pem),
                None => cert.source("replication-cert.pem"),
            };
            let key = Resource::from_spec(key)?
                .require_all(dirs.clone())
                .require(&mysql_user);
            let cert = Resource::from_spec(cert)?.require(&key.id);
            config_files.push(key.id.clone());
            config_files.push(cert.id.clone());
            vec![key, cert]
        } else {
            Vec::new()
        };

        let ensure = if params.bool("enabled")? {
            ServiceEnsure::Running
        } else {
            ServiceEnsure::Stopped
        };
        let service = Resource::new("mysql", ServiceSpec::new("mysql", ensure, true))?
            .require(&package.id)
            .require_all(config_files.iter())
            .subscribe_all(config_files.iter());

        let restart = Resource::new(
            "mysqld-restart",
            ExecSpec::new("service mysql restart")
                .log_output(LogOutput::OnFailure)
                .refresh_only(true)
                .path("/sbin/:/usr/sbin/:/usr/bin/:/bin/"),
        )?;

        let old_root = params.str("old_root_password")?;
        let old_pw = if old_root.is_empty() {
            String::new()
        } else {
            format!("-p{old_root}")
        };
        let set_root = Resource::new(
            "set_mysql_rootpw",
            ExecSpec::new(format!("mysqladmin -u root {old_pw} password {root_password}"))
                .log_output(LogOutput::Always)
                .unless(format!("mysqladmin -u root -p{root_password} status > /dev/null"))
                .path("/usr/local/sbin:/usr/bin:/usr/local/bin"),
        )?
        .notify(&restart.id)
        .require(file(CONF_DIR))
        .require(&mysql_service);

        let root_cnf = Resource::from_spec(
            FileSpec::present(ROOT_MY_CNF)
                .mode(0o600)
                .template("my.cnf.pass"),
        )?
        .require(&set_root.id);

        // joiners receive their accounts from the donor by state transfer
        let sst_grant = if joiner {
            None
        } else {
            let sql = format!(
                "set wsrep_on='off'; delete from mysql.user where user=''; \
                 grant all on *.* to '{sst_user}'@'%' identified by '{sst_password}';flush privileges;"
            );
            let (title, login) = if root_password.is_empty() {
                ("set-mysql-password-noroot", "-uroot".to_string())
            } else {
                ("set-mysql-password", format!("-uroot -p{root_password}"))
            };
            Some(
                Resource::new(
                    title,
                    ExecSpec::new(format!("/usr/bin/mysql {login} -e \"{sql}\""))
                        .unless(format!(
                            "/usr/bin/mysql -u{sst_user} -p{sst_password} -e 'select 1'"
                        ))
                        .refresh_only(true),
                )?
                .require(&mysql_service)
                .subscribe(&mysql_service),
            )
        };

        for resource in [
            package, user, mysql_dir, conf_dir, my_cnf, notify, wsrep, utf8, tuning, debian,
            logrotate,
        ] {
            scope.add(resource);
        }
        for resource in replication {
            scope.add(resource);
        }
        scope.add(service);
        scope.add(restart);
        scope.add(set_root);
        scope.add(root_cnf);
        if let Some(resource) = sst_grant {
            scope.add(resource);
        }

        let rights = overrides([
            ("database", Value::from("*")),
            ("user", Value::from("debian-sys-maint")),
            ("password", Value::from(params.str("maint_password")?)),
            ("priv", Value::from(MAINT_PRIVILEGES.to_vec())),
            ("grant_option", Value::from(true)),
        ]);
        let deps = Dependencies {
            require: vec![Target::from(&mysql_service), Target::from(file(ROOT_MY_CNF))],
            ..Dependencies::default()
        };
        scope.declare("percona::rights", Some("debian-sys-maint user"), &rights, deps)
    }
}
