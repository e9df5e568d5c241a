//! Execution engine - applies resources in dependency order with refresh propagation

use crate::apply::{self, Outcome};
use crate::context::{ApplyContext, ProgressCallback, Providers};
use crate::error::{Error, Result};
use crate::graph::{Graph, NodeId};
use crate::resource::Resource;
use crate::types::{ExecuteOptions, ReportEntry, RunReport, RunState, Status};
use chrono::Utc;
use rayon::prelude::*;

/// Build the graph for `resources` and apply it
///
/// Validation and cycle errors are returned before any provider is called.
/// Failures while applying are recorded in the report instead.
pub fn reconcile(
    resources: Vec<Resource>,
    providers: Providers<'_>,
    opts: &ExecuteOptions,
    progress: &mut dyn ProgressCallback,
) -> Result<RunReport> {
    log::info!("Building graph of {} resources", resources.len());
    let graph = Graph::build(resources)?;
    Ok(execute(&graph, providers, opts, progress))
}

/// Apply an already built graph
pub fn execute(
    graph: &Graph,
    providers: Providers<'_>,
    opts: &ExecuteOptions,
    progress: &mut dyn ProgressCallback,
) -> RunReport {
    let mut report = RunReport::new(opts.dry_run);
    let ctx = ApplyContext::new(opts.dry_run, providers);

    report.state = RunState::Planning;
    let plan = graph.plan();
    log::info!(
        "Planned {} resources{}",
        plan.len(),
        if opts.dry_run { " (dry run)" } else { "" }
    );

    report.state = RunState::Executing;
    progress.on_run_start(plan.len(), opts.dry_run);
    let mut statuses = vec![Status::Pending; graph.len()];

    let pool = if opts.jobs > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(opts.jobs).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                log::warn!("Failed to create thread pool, running sequentially: {e}");
                None
            }
        }
    } else {
        None
    };

    if let Some(pool) = pool {
        for wave in graph.waves() {
            for &node in &wave {
                let resource = graph.resource(node);
                statuses[node.0] = Status::Applying;
                progress.on_resource_start(&resource.id, &resource.describe());
            }
            let results: Vec<(NodeId, Status)> = pool.install(|| {
                wave.par_iter()
                    .map(|&node| (node, evaluate(graph, node, &statuses, &ctx)))
                    .collect()
            });
            for (node, status) in results {
                progress.on_resource_complete(&graph.resource(node).id, &status);
                statuses[node.0] = status;
            }
        }
    } else {
        for node in plan.iter() {
            let resource = graph.resource(node);
            statuses[node.0] = Status::Applying;
            progress.on_resource_start(&resource.id, &resource.describe());
            let status = evaluate(graph, node, &statuses, &ctx);
            progress.on_resource_complete(&resource.id, &status);
            statuses[node.0] = status;
        }
    }

    report.entries = plan
        .iter()
        .map(|node| {
            let resource = graph.resource(node);
            ReportEntry {
                id: resource.id.clone(),
                component: resource.component.clone(),
                description: resource.describe(),
                status: statuses[node.0].clone(),
            }
        })
        .collect();

    report.state = if report.entries.iter().any(|e| e.status.is_failure()) {
        RunState::Aborted
    } else {
        RunState::Completed
    };
    report.finished_at = Some(Utc::now());
    progress.on_run_complete();

    let summary = report.summary();
    log::info!(
        "Run {:?}: {} changed, {} unchanged, {} skipped, {} failed, {} blocked",
        report.state,
        summary.changed,
        summary.unchanged,
        summary.skipped,
        summary.failed,
        summary.blocked
    );
    report
}

/// Decide and apply one resource; every predecessor must be terminal
fn evaluate(graph: &Graph, node: NodeId, statuses: &[Status], ctx: &ApplyContext<'_>) -> Status {
    let resource = graph.resource(node);
    let status = evaluate_inner(graph, node, statuses, ctx);
    match &status {
        Status::Failed { error } => log::warn!("{}: {error}", resource.id),
        Status::Blocked { failed, .. } => log::warn!("{}: skipped, {failed} failed", resource.id),
        other => log::debug!("{}: {}", resource.id, other.label()),
    }
    status
}

fn evaluate_inner(
    graph: &Graph,
    node: NodeId,
    statuses: &[Status],
    ctx: &ApplyContext<'_>,
) -> Status {
    let resource = graph.resource(node);

    for &pred in graph.predecessors(node) {
        let via = graph.resource(pred).id.clone();
        match &statuses[pred.0] {
            Status::Failed { .. } => {
                return Status::Blocked {
                    failed: via.clone(),
                    via,
                };
            }
            Status::Blocked { failed, .. } => {
                return Status::Blocked {
                    failed: failed.clone(),
                    via,
                };
            }
            _ => {}
        }
    }

    let triggered = graph
        .refresh_sources(node)
        .iter()
        .any(|s| statuses[s.0].is_change());

    if resource.is_refresh_only() && !triggered {
        return Status::Skipped {
            reason: "refresh-only, not triggered".to_string(),
        };
    }

    let prior = if resource.is_refresh_only() {
        None
    } else {
        match apply::converge(resource, ctx) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                return Status::Failed {
                    error: format!("{e:#}"),
                };
            }
        }
    };

    let mut changes = match &prior {
        Some(Outcome::Changed { changes, .. }) => changes.clone(),
        _ => Vec::new(),
    };
    let mut refreshed = false;
    if triggered && resource.is_refreshable() {
        match apply::refresh(resource, prior.as_ref(), ctx) {
            Ok(Some(message)) => {
                changes.push(message);
                refreshed = true;
            }
            Ok(None) => {}
            Err(e) => {
                return Status::Failed {
                    error: format!("{e:#}"),
                };
            }
        }
    }

    if changes.is_empty() {
        Status::Unchanged
    } else {
        Status::Changed {
            changes,
            refreshed,
            simulated: ctx.dry_run,
        }
    }
}

impl RunReport {
    /// Runtime errors of the run, as engine errors
    pub fn errors(&self) -> Vec<Error> {
        self.entries
            .iter()
            .filter_map(|e| match &e.status {
                Status::Failed { error } => Some(Error::Apply {
                    resource: e.id.clone(),
                    message: error.clone(),
                }),
                Status::Blocked { failed, .. } => Some(Error::DependencyFailed {
                    resource: e.id.clone(),
                    failed: failed.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::memory::MemoryHost;
    use crate::resource::{
        DatabaseSpec, DbGrantSpec, DbUserSpec, ExecSpec, FileSpec, Kind, PackageSpec, ResourceId,
        ServiceSpec,
    };
    use crate::types::{CommandOutput, ExecuteSummary};

    fn id(kind: Kind, title: &str) -> ResourceId {
        ResourceId::new(kind, title)
    }

    fn run(
        host: &MemoryHost,
        resources: Vec<Resource>,
        dry_run: bool,
        jobs: usize,
    ) -> Result<RunReport> {
        let opts = ExecuteOptions { dry_run, jobs };
        reconcile(resources, Providers::from_host(host, host), &opts, &mut NoProgress)
    }

    fn mysql_config() -> Vec<Resource> {
        vec![
            Resource::from_spec(PackageSpec::present("percona-xtradb-cluster-server-5.6")).unwrap(),
            Resource::from_spec(FileSpec::directory("/etc/mysql"))
                .unwrap()
                .require(id(Kind::Package, "percona-xtradb-cluster-server-5.6")),
            Resource::from_spec(FileSpec::present("/etc/mysql/my.cnf").content("[mysqld]\n"))
                .unwrap()
                .require(id(Kind::File, "/etc/mysql"))
                .notify(id(Kind::Exec, "mysqld-restart")),
            Resource::new(
                "mysqld-restart",
                ExecSpec::new("service mysql restart").refresh_only(true),
            )
            .unwrap(),
            Resource::from_spec(ServiceSpec::running("mysql"))
                .unwrap()
                .subscribe(id(Kind::File, "/etc/mysql/my.cnf")),
        ]
    }

    #[test]
    fn test_applies_in_dependency_order() {
        let host = MemoryHost::new();
        let report = run(&host, mysql_config(), false, 1).unwrap();
        assert!(report.is_success());
        assert_eq!(
            host.mutations()[..3],
            [
                "install percona-xtradb-cluster-server-5.6",
                "mkdir /etc/mysql",
                "write /etc/mysql/my.cnf",
            ]
        );
    }

    #[test]
    fn test_cycle_aborts_before_any_mutation() {
        let host = MemoryHost::new();
        let resources = vec![
            Resource::from_spec(FileSpec::directory("/a"))
                .unwrap()
                .require(id(Kind::File, "/b")),
            Resource::from_spec(FileSpec::directory("/b"))
                .unwrap()
                .require(id(Kind::File, "/a")),
            Resource::from_spec(PackageSpec::present("xinetd")).unwrap(),
        ];
        let err = run(&host, resources, false, 1).unwrap_err();
        assert!(matches!(err, Error::Cycle { .. }));
        assert!(host.mutations().is_empty());
        assert!(host.commands_run().is_empty());
    }

    #[test]
    fn test_second_run_reports_no_change() {
        let host = MemoryHost::new();
        let first = run(&host, mysql_config(), false, 1).unwrap();
        assert!(first.summary().changed > 0);

        let before = host.mutations().len();
        let second = run(&host, mysql_config(), false, 1).unwrap();
        assert_eq!(second.summary().changed, 0);
        assert_eq!(host.mutations().len(), before);
    }

    #[test]
    fn test_refresh_only_runs_only_when_triggered() {
        let host = MemoryHost::new();
        let restart = id(Kind::Exec, "mysqld-restart");

        let first = run(&host, mysql_config(), false, 1).unwrap();
        assert!(matches!(
            first.status(&restart),
            Some(Status::Changed { refreshed: true, .. })
        ));
        assert_eq!(
            host.commands_run()
                .iter()
                .filter(|c| *c == "service mysql restart")
                .count(),
            1
        );

        let second = run(&host, mysql_config(), false, 1).unwrap();
        assert!(matches!(second.status(&restart), Some(Status::Skipped { .. })));
        assert_eq!(
            host.commands_run()
                .iter()
                .filter(|c| *c == "service mysql restart")
                .count(),
            1
        );
    }

    #[test]
    fn test_service_restarts_on_config_change_only_when_already_running() {
        let host = MemoryHost::new();
        run(&host, mysql_config(), false, 1).unwrap();
        // started on the first run, not restarted
        assert!(host.snapshot().restarts.is_empty());

        host.add_file("/etc/mysql/my.cnf", "[mysqld]\nport=3307\n", crate::resource::Mode(0o644));
        let report = run(&host, mysql_config(), false, 1).unwrap();
        assert_eq!(host.snapshot().restarts, vec!["mysql".to_string()]);
        assert!(matches!(
            report.status(&id(Kind::Service, "mysql")),
            Some(Status::Changed { refreshed: true, .. })
        ));
    }

    #[test]
    fn test_failed_package_blocks_dependents() {
        let host = MemoryHost::new();
        host.fail_package("percona-xtradb-cluster-server-5.6");
        let mut resources = mysql_config();
        resources.push(Resource::from_spec(PackageSpec::present("xinetd")).unwrap());

        let report = run(&host, resources, false, 1).unwrap();
        assert_eq!(report.state, RunState::Aborted);

        let pkg = id(Kind::Package, "percona-xtradb-cluster-server-5.6");
        assert!(matches!(report.status(&pkg), Some(Status::Failed { .. })));
        assert_eq!(
            report.status(&id(Kind::File, "/etc/mysql/my.cnf")),
            Some(&Status::Blocked {
                failed: pkg.clone(),
                via: id(Kind::File, "/etc/mysql"),
            })
        );
        assert!(matches!(
            report.status(&id(Kind::Service, "mysql")),
            Some(Status::Blocked { .. })
        ));
        assert_eq!(report.status(&id(Kind::Package, "xinetd")).map(Status::label), Some("changed"));
        assert_eq!(report.blocked_by(&pkg).count(), 4);
        assert!(host.snapshot().packages.contains("xinetd"));

        let errors = report.errors();
        assert!(matches!(errors[0], Error::Apply { .. }));
        assert!(errors[1..].iter().all(|e| matches!(e, Error::DependencyFailed { .. })));
    }

    #[test]
    fn test_failed_requirement_wins_over_changed_subscription() {
        for jobs in [1, 4] {
            let host = MemoryHost::new();
            host.fail_package("broken");
            let broken = id(Kind::Package, "broken");
            let resources = vec![
                Resource::from_spec(FileSpec::present("/a").content("new\n")).unwrap(),
                Resource::from_spec(PackageSpec::present("broken")).unwrap(),
                Resource::new("r", ExecSpec::new("reload-r").refresh_only(true))
                    .unwrap()
                    .subscribe(id(Kind::File, "/a"))
                    .require(broken.clone()),
            ];

            let report = run(&host, resources, false, jobs).unwrap();
            assert_eq!(report.state, RunState::Aborted, "jobs={jobs}");
            assert!(matches!(
                report.status(&id(Kind::File, "/a")),
                Some(Status::Changed { .. })
            ));
            assert!(
                matches!(
                    report.status(&id(Kind::Exec, "r")),
                    Some(Status::Blocked { failed, .. }) if *failed == broken
                ),
                "jobs={jobs}"
            );
            assert!(host.commands_run().is_empty(), "jobs={jobs}");
        }
    }

    #[test]
    fn test_dry_run_simulates_refresh() {
        let host = MemoryHost::new();
        let report = run(&host, mysql_config(), true, 1).unwrap();
        assert!(host.mutations().is_empty());
        assert!(report.dry_run);
        assert!(matches!(
            report.status(&id(Kind::Exec, "mysqld-restart")),
            Some(Status::Changed { simulated: true, .. })
        ));
        assert!(!host.commands_run().contains(&"service mysql restart".to_string()));
    }

    #[test]
    fn test_database_scenario() {
        let host = MemoryHost::new();
        host.set_command_result("mysql app < /tmp/app.sql", CommandOutput::exit(0));
        let resources = vec![
            Resource::from_spec(DatabaseSpec::present("app", "utf8")).unwrap(),
            Resource::from_spec(DbUserSpec::present("app@localhost", "secret")).unwrap(),
            Resource::from_spec(DbGrantSpec::new("app@localhost", "app.*", vec!["all".into()]))
                .unwrap()
                .require(id(Kind::DbUser, "app@localhost"))
                .require(id(Kind::Database, "app")),
            Resource::new(
                "app-import",
                ExecSpec::new("mysql app < /tmp/app.sql").refresh_only(true),
            )
            .unwrap()
            .subscribe(id(Kind::Database, "app")),
        ];
        let report = run(&host, resources, false, 1).unwrap();
        let order: Vec<String> = report.entries.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(
            order,
            vec![
                "Database[app]",
                "Db_user[app@localhost]",
                "Db_grant[app@localhost/app.*]",
                "Exec[app-import]",
            ]
        );
        assert_eq!(report.summary().changed, 4);
        assert_eq!(host.snapshot().databases["app"], "utf8");
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let sequential = MemoryHost::new();
        let parallel = MemoryHost::new();
        let a = run(&sequential, mysql_config(), false, 1).unwrap();
        let b = run(&parallel, mysql_config(), false, 4).unwrap();

        let statuses = |r: &RunReport| -> Vec<(String, &'static str)> {
            r.entries
                .iter()
                .map(|e| (e.id.to_string(), e.status.label()))
                .collect()
        };
        assert_eq!(statuses(&a), statuses(&b));
        assert_eq!(
            b.summary(),
            ExecuteSummary {
                changed: 5,
                ..Default::default()
            }
        );
    }
}
