//! Dependency graph
//!
//! Builds ordering and refresh adjacency from the resources' declared
//! relationships, rejects unknown references and cycles, and produces a
//! stable topological [`RunPlan`].
//!
//! Edge directions (`a -> b` means `a` is applied before `b`):
//!
//! | declared on `n`    | ordering | refresh |
//! |--------------------|----------|---------|
//! | `require => t`     | t -> n   |         |
//! | `before => t`      | n -> t   |         |
//! | `subscribe => t`   | t -> n   | t -> n  |
//! | `notify => t`      | n -> t   | n -> t  |

use crate::error::{Error, Result};
use crate::resource::{Resource, ResourceId, Target};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

/// Index of a resource in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Validated, acyclic resource graph
#[derive(Debug)]
pub struct Graph {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, NodeId>,
    preds: Vec<BTreeSet<NodeId>>,
    succs: Vec<BTreeSet<NodeId>>,
    refresh_sources: Vec<BTreeSet<NodeId>>,
    refresh_targets: Vec<BTreeSet<NodeId>>,
}

/// Order in which to apply resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub order: Vec<NodeId>,
}

impl RunPlan {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().copied()
    }
}

impl Graph {
    /// Validate resources and build the graph
    ///
    /// Fails on an invalid resource, a duplicated (kind, title), a reference
    /// to an undeclared resource or component, or a cycle.
    pub fn build(resources: Vec<Resource>) -> Result<Self> {
        let mut index = HashMap::with_capacity(resources.len());
        let mut components: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();

        for (i, resource) in resources.iter().enumerate() {
            resource.validate()?;
            if index.insert(resource.id.clone(), NodeId(i)).is_some() {
                return Err(Error::validation(&resource.id, "declared more than once"));
            }
            if !resource.component.is_empty() {
                components
                    .entry(resource.component.as_str())
                    .or_default()
                    .push(NodeId(i));
            }
        }

        let resolve = |from: &Resource, target: &Target| -> Result<Vec<NodeId>> {
            let found = match target {
                Target::Resource(id) => index.get(id).map(|n| vec![*n]),
                Target::Component(label) => components.get(label.as_str()).cloned(),
            };
            found.ok_or_else(|| Error::validation(&from.id, format!("unknown reference {target}")))
        };

        let n = resources.len();
        let mut edges: Vec<(NodeId, NodeId, bool)> = Vec::new();
        for (i, resource) in resources.iter().enumerate() {
            let me = NodeId(i);
            let deps = &resource.deps;
            for t in &deps.require {
                edges.extend(resolve(resource, t)?.into_iter().map(|d| (d, me, false)));
            }
            for t in &deps.before {
                edges.extend(resolve(resource, t)?.into_iter().map(|d| (me, d, false)));
            }
            for t in &deps.subscribe {
                edges.extend(resolve(resource, t)?.into_iter().map(|d| (d, me, true)));
            }
            for t in &deps.notify {
                edges.extend(resolve(resource, t)?.into_iter().map(|d| (me, d, true)));
            }
        }

        let mut graph = Self {
            index: HashMap::new(),
            preds: vec![BTreeSet::new(); n],
            succs: vec![BTreeSet::new(); n],
            refresh_sources: vec![BTreeSet::new(); n],
            refresh_targets: vec![BTreeSet::new(); n],
            resources: Vec::new(),
        };

        for (from, to, refresh) in edges {
            if from == to {
                return Err(Error::Cycle {
                    members: vec![resources[from.0].id.clone()],
                });
            }
            graph.succs[from.0].insert(to);
            graph.preds[to.0].insert(from);
            if refresh {
                graph.refresh_targets[from.0].insert(to);
                graph.refresh_sources[to.0].insert(from);
            }
        }

        graph.index = index;
        graph.resources = resources;

        if let Some(cycle) = graph.find_cycle() {
            return Err(Error::Cycle {
                members: cycle.into_iter().map(|n| graph.resource(n).id.clone()).collect(),
            });
        }

        log::debug!(
            "Graph: {} resources, {} ordering edges",
            graph.len(),
            graph.succs.iter().map(BTreeSet::len).sum::<usize>()
        );
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resource(&self, node: NodeId) -> &Resource {
        &self.resources[node.0]
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn node(&self, id: &ResourceId) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    /// Direct ordering predecessors
    pub fn predecessors(&self, node: NodeId) -> &BTreeSet<NodeId> {
        &self.preds[node.0]
    }

    pub fn successors(&self, node: NodeId) -> &BTreeSet<NodeId> {
        &self.succs[node.0]
    }

    /// Nodes whose change triggers a refresh of `node`
    pub fn refresh_sources(&self, node: NodeId) -> &BTreeSet<NodeId> {
        &self.refresh_sources[node.0]
    }

    pub fn refresh_targets(&self, node: NodeId) -> &BTreeSet<NodeId> {
        &self.refresh_targets[node.0]
    }

    /// Topological order, lowest declaration index first among ready nodes
    pub fn plan(&self) -> RunPlan {
        let mut in_degree: Vec<usize> = self.preds.iter().map(BTreeSet::len).collect();
        let mut ready: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(NodeId(i)))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &self.succs[node.0] {
                in_degree[next.0] -= 1;
                if in_degree[next.0] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        RunPlan { order }
    }

    /// Group nodes into waves; every node's predecessors are in earlier waves
    pub fn waves(&self) -> Vec<Vec<NodeId>> {
        let mut level = vec![0usize; self.len()];
        let mut waves: Vec<Vec<NodeId>> = Vec::new();
        for node in self.plan().iter() {
            let l = self.preds[node.0]
                .iter()
                .map(|p| level[p.0] + 1)
                .max()
                .unwrap_or(0);
            level[node.0] = l;
            if waves.len() <= l {
                waves.resize_with(l + 1, Vec::new);
            }
            waves[l].push(node);
        }
        for wave in &mut waves {
            wave.sort();
        }
        waves
    }

    /// Depth-first search with white/gray/black colouring
    fn find_cycle(&self) -> Option<Vec<NodeId>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit(
            graph: &Graph,
            node: NodeId,
            color: &mut [Color],
            stack: &mut Vec<NodeId>,
        ) -> Option<Vec<NodeId>> {
            color[node.0] = Color::Gray;
            stack.push(node);
            for &next in &graph.succs[node.0] {
                match color[next.0] {
                    Color::Gray => {
                        let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                        return Some(stack[start..].to_vec());
                    }
                    Color::White => {
                        if let Some(cycle) = visit(graph, next, color, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
            stack.pop();
            color[node.0] = Color::Black;
            None
        }

        let mut color = vec![Color::White; self.len()];
        let mut stack = Vec::new();
        for i in 0..self.len() {
            if color[i] == Color::White
                && let Some(cycle) = visit(self, NodeId(i), &mut color, &mut stack)
            {
                return Some(cycle);
            }
        }
        None
    }
}
