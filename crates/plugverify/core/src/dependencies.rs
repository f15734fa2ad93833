// Plugverify
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Plugin dependency resolution
//!
//! Builds a graph of plugin ids rooted at the verified plugin. Each id is
//! resolved at most once through a [`DependencyFinder`], so dependency cycles
//! terminate. Resolved dependencies contribute their classes to the classpath;
//! unresolved edges become [`MissingDependency`] values.

use indexmap::IndexMap;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::plugin::{PluginDependency, PluginDetails};

/// Dependency edge that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MissingDependency {
    /// Plugin declaring the dependency
    pub plugin_id: String,
    pub dependency: PluginDependency,
    pub reason: String,
}

impl MissingDependency {
    pub fn is_optional(&self) -> bool {
        self.dependency.optional
    }
}

impl fmt::Display for MissingDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (required by {}): {}", self.dependency, self.plugin_id, self.reason)
    }
}

/// A dependency whose plugin details are available.
///
/// The keepalive holds whatever must stay alive while the details are used,
/// typically a cache handle.
pub struct ResolvedDependency {
    pub details: Arc<PluginDetails>,
    keepalive: Option<Box<dyn Any + Send + Sync>>,
}

impl ResolvedDependency {
    pub fn new(details: Arc<PluginDetails>) -> Self {
        Self { details, keepalive: None }
    }

    pub fn with_keepalive(mut self, keepalive: impl Any + Send + Sync) -> Self {
        self.keepalive = Some(Box::new(keepalive));
        self
    }

    pub fn id(&self) -> &str {
        &self.details.info.id
    }

    pub fn has_keepalive(&self) -> bool {
        self.keepalive.is_some()
    }
}

impl fmt::Debug for ResolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedDependency")
            .field("plugin", &self.details.info)
            .field("keepalive", &self.keepalive.is_some())
            .finish()
    }
}

/// Outcome of looking up one dependency
#[derive(Debug)]
pub enum DependencyResolution {
    Found(ResolvedDependency),
    NotFound(String),
}

/// Capability of locating the plugin that satisfies a dependency
pub trait DependencyFinder: Send + Sync {
    fn find(&self, dependency: &PluginDependency) -> DependencyResolution;
}

/// Finder that never resolves anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

impl DependencyFinder for NoDependencies {
    fn find(&self, dependency: &PluginDependency) -> DependencyResolution {
        DependencyResolution::NotFound(format!("Dependency {} is not available", dependency.id))
    }
}

/// Transitive dependency graph of a plugin
#[derive(Debug)]
pub struct DependenciesGraph {
    /// Edges point from the dependent plugin to its dependency; weight is the optional flag
    graph: DiGraph<String, bool>,
    node_indices: HashMap<String, NodeIndex>,
    root: String,
    resolved: IndexMap<String, ResolvedDependency>,
    missing: Vec<MissingDependency>,
}

impl DependenciesGraph {
    /// Resolves the dependencies of `plugin` breadth-first
    pub fn build(plugin: &PluginDetails, finder: &dyn DependencyFinder) -> Self {
        let mut graph = Self {
            graph: DiGraph::new(),
            node_indices: HashMap::new(),
            root: plugin.info.id.clone(),
            resolved: IndexMap::new(),
            missing: Vec::new(),
        };
        graph.add_node(&plugin.info.id);

        let mut failures: HashMap<String, String> = HashMap::new();
        let mut queue: VecDeque<(String, Vec<PluginDependency>)> = VecDeque::from([(plugin.info.id.clone(), plugin.dependencies.clone())]);

        while let Some((plugin_id, dependencies)) = queue.pop_front() {
            for dependency in dependencies {
                let first_seen = !graph.node_indices.contains_key(&dependency.id);
                graph.add_edge(&plugin_id, &dependency.id, dependency.optional);

                if !first_seen {
                    if let Some(reason) = failures.get(&dependency.id) {
                        graph.missing.push(MissingDependency {
                            plugin_id: plugin_id.clone(),
                            dependency,
                            reason: reason.clone(),
                        });
                    }
                    continue;
                }

                match finder.find(&dependency) {
                    DependencyResolution::Found(resolved) => {
                        debug!(plugin = %plugin_id, dependency = %dependency.id, "Resolved dependency");
                        queue.push_back((dependency.id.clone(), resolved.details.dependencies.clone()));
                        graph.resolved.insert(dependency.id.clone(), resolved);
                    }
                    DependencyResolution::NotFound(reason) => {
                        debug!(plugin = %plugin_id, dependency = %dependency.id, %reason, "Dependency not resolved");
                        failures.insert(dependency.id.clone(), reason.clone());
                        graph.missing.push(MissingDependency {
                            plugin_id: plugin_id.clone(),
                            dependency,
                            reason,
                        });
                    }
                }
            }
        }

        graph
    }

    fn add_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&index) = self.node_indices.get(id) {
            return index;
        }
        let index = self.graph.add_node(id.to_string());
        self.node_indices.insert(id.to_string(), index);
        index
    }

    fn add_edge(&mut self, dependent: &str, dependency: &str, optional: bool) {
        let from = self.add_node(dependent);
        let to = self.add_node(dependency);
        self.graph.add_edge(from, to, optional);
    }

    pub fn root_id(&self) -> &str {
        &self.root
    }

    /// Resolved dependencies in discovery order
    pub fn resolved(&self) -> impl Iterator<Item = &ResolvedDependency> {
        self.resolved.values()
    }

    pub fn is_resolved(&self, id: &str) -> bool {
        self.resolved.contains_key(id)
    }

    /// Every unresolved edge in the graph
    pub fn missing(&self) -> &[MissingDependency] {
        &self.missing
    }

    /// Unresolved dependencies declared by the root plugin itself
    pub fn direct_missing(&self) -> impl Iterator<Item = &MissingDependency> {
        self.missing.iter().filter(move |missing| missing.plugin_id == self.root)
    }

    pub fn has_mandatory_direct_missing(&self) -> bool {
        self.direct_missing().any(|missing| !missing.is_optional())
    }

    /// Direct dependency ids of a plugin in the graph
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        let Some(&index) = self.node_indices.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<&str> = self.graph.neighbors(index).map(|neighbor| self.graph[neighbor].as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
