//! Components that deploy a Galera/XtraDB cluster node
//!
//! Each component resolves its parameters and declares the resources that
//! realise them. Defined types (`percona::db`, `percona::rights`) take a
//! title and may be declared many times; classes are singletons.

mod db;
mod garbd;
mod haproxy;
mod health_check;
mod node;
mod repo;
mod rights;

use declarative::{Kind, Registry, ResourceId, Value};
use std::collections::BTreeMap;

pub use db::Db;
pub use garbd::Garbd;
pub use haproxy::Haproxy;
pub use health_check::HealthCheck;
pub use node::Node;
pub use repo::Repo;
pub use rights::Rights;

/// Search path for the package and service commands the components run
const SYSTEM_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Every component this tool knows
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(Repo);
    registry.register(Node);
    registry.register(Garbd);
    registry.register(Haproxy);
    registry.register(HealthCheck);
    registry.register(Db);
    registry.register(Rights);
    registry
}

fn file(path: &str) -> ResourceId {
    ResourceId::new(Kind::File, path)
}

/// Parameter overrides for a nested declaration
fn overrides<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}
