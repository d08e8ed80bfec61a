//! Dependency graph of declared resources.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::resource::{Resource, ResourceKey};
use crate::{Error, Result};

/// In-memory DAG of declared resources.
///
/// Resources keep their declaration order, which breaks ties between
/// independent resources in [`ResourceGraph::topological_order`]. A
/// dependency may name a resource that is declared later.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    nodes: Vec<Resource>,
    index: HashMap<ResourceKey, usize>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from resources in declaration order.
    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Result<Self> {
        let mut graph = Self::new();
        for resource in resources {
            graph.add_resource(resource)?;
        }
        Ok(graph)
    }

    /// Declare a resource together with its `depends_on` edges.
    ///
    /// Fails without modifying the graph if the key is already declared or if
    /// the edges would close a cycle.
    pub fn add_resource(&mut self, resource: Resource) -> Result<()> {
        if self.index.contains_key(&resource.key) {
            return Err(Error::DuplicateResource(resource.key));
        }

        for dependency in &resource.depends_on {
            if *dependency == resource.key {
                return Err(Error::CyclicDependency {
                    path: vec![resource.key.clone(), resource.key.clone()],
                });
            }
            if let Some(path) = self.find_path(dependency, &resource.key) {
                let mut cycle = vec![resource.key.clone()];
                cycle.extend(path);
                return Err(Error::CyclicDependency { path: cycle });
            }
        }

        self.index.insert(resource.key.clone(), self.nodes.len());
        self.nodes.push(resource);
        Ok(())
    }

    /// Add a single edge: `dependent` depends on `dependency`.
    pub fn add_dependency(&mut self, dependent: &ResourceKey, dependency: ResourceKey) -> Result<()> {
        let Some(&idx) = self.index.get(dependent) else {
            return Err(Error::NotFound(format!("resource {}", dependent)));
        };

        if *dependent == dependency {
            return Err(Error::CyclicDependency {
                path: vec![dependent.clone(), dependency],
            });
        }
        if let Some(path) = self.find_path(&dependency, dependent) {
            let mut cycle = vec![dependent.clone()];
            cycle.extend(path);
            return Err(Error::CyclicDependency { path: cycle });
        }

        self.nodes[idx].depends_on.insert(dependency);
        Ok(())
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        self.index.get(key).map(|&idx| &self.nodes[idx])
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resources in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.nodes.iter()
    }

    /// Declared resources that depend directly on `key`.
    pub fn dependents(&self, key: &ResourceKey) -> Vec<&Resource> {
        self.nodes
            .iter()
            .filter(|r| r.depends_on.contains(key))
            .collect()
    }

    /// Edges whose dependency was never declared, as `(resource, dependency)`.
    pub fn dangling_dependencies(&self) -> Vec<(ResourceKey, ResourceKey)> {
        self.nodes
            .iter()
            .flat_map(|r| {
                r.depends_on
                    .iter()
                    .filter(|dep| !self.index.contains_key(*dep))
                    .map(|dep| (r.key.clone(), dep.clone()))
            })
            .collect()
    }

    /// Fail on the first dependency that was never declared.
    pub fn validate(&self) -> Result<()> {
        match self.dangling_dependencies().into_iter().next() {
            Some((resource, dependency)) => Err(Error::UnknownDependency {
                resource,
                dependency,
            }),
            None => Ok(()),
        }
    }

    /// Dependencies before dependents, ties broken by declaration order.
    ///
    /// The iterator is computed lazily; call again (or clone it) to restart.
    /// Undeclared dependencies are treated as already satisfied.
    pub fn topological_order(&self) -> TopologicalOrder<'_> {
        TopologicalOrder::new(self)
    }

    /// Dependents before their dependencies.
    pub fn reverse_topological_order(&self) -> Vec<&Resource> {
        let mut order: Vec<&Resource> = self.topological_order().collect();
        order.reverse();
        order
    }

    /// Path of keys from `from` to `to` following dependency edges.
    fn find_path(&self, from: &ResourceKey, to: &ResourceKey) -> Option<Vec<ResourceKey>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if self.dfs_path(from, to, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_path<'a>(
        &'a self,
        current: &'a ResourceKey,
        target: &ResourceKey,
        visited: &mut HashSet<&'a ResourceKey>,
        path: &mut Vec<ResourceKey>,
    ) -> bool {
        path.push(current.clone());
        if current == target {
            return true;
        }
        if visited.insert(current) {
            if let Some(node) = self.get(current) {
                for dependency in &node.depends_on {
                    if self.dfs_path(dependency, target, visited, path) {
                        return true;
                    }
                }
            }
        }
        path.pop();
        false
    }
}

/// Lazy Kahn traversal over a [`ResourceGraph`].
#[derive(Debug, Clone)]
pub struct TopologicalOrder<'a> {
    graph: &'a ResourceGraph,
    pending: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: BTreeSet<usize>,
}

impl<'a> TopologicalOrder<'a> {
    fn new(graph: &'a ResourceGraph) -> Self {
        let mut pending = vec![0; graph.nodes.len()];
        let mut dependents = vec![Vec::new(); graph.nodes.len()];

        for (idx, node) in graph.nodes.iter().enumerate() {
            for dependency in &node.depends_on {
                if let Some(&dep_idx) = graph.index.get(dependency) {
                    pending[idx] += 1;
                    dependents[dep_idx].push(idx);
                }
            }
        }

        let ready = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| idx)
            .collect();

        Self {
            graph,
            pending,
            dependents,
            ready,
        }
    }
}

impl<'a> Iterator for TopologicalOrder<'a> {
    type Item = &'a Resource;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.ready.pop_first()?;
        for &dependent in &self.dependents[idx] {
            self.pending[dependent] -= 1;
            if self.pending[dependent] == 0 {
                self.ready.insert(dependent);
            }
        }
        Some(&self.graph.nodes[idx])
    }
}
