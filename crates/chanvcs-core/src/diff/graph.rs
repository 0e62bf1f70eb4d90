//! Inter-channel reference graph.
//!
//! A channel references another when one of its connector properties named
//! `channelId` holds the other's id (channel writers and routers do this).
//! An edge `A -> B` means "A references B": B must be deployed before A,
//! and changing B may affect A.
//!
//! Unlike a build graph, references are not validated on insertion. Cycles
//! and dangling references are real in exported configurations, so both
//! are recorded and reported instead of rejected.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::artifact::DecomposedArtifact;
use crate::domain::error::{ChanvcsError, Result};

/// Property name that carries a channel reference.
pub const REFERENCE_PROPERTY: &str = "channelId";

/// A channel in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelNode {
    pub id: String,
    pub name: String,
}

/// A reference to a channel id that is not part of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DanglingReference {
    pub from: String,
    pub to: String,
}

/// Serializable snapshot of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub nodes: Vec<ChannelNode>,
    /// `(from, to)`: `from` references `to`.
    pub edges: Vec<(String, String)>,
    pub cycles: Vec<Vec<String>>,
    pub dangling: Vec<DanglingReference>,
    /// Deployment order, absent when there is a cycle.
    pub order: Option<Vec<String>>,
}

/// Directed reference graph over channels.
#[derive(Debug, Clone, Default)]
pub struct ChannelGraph {
    nodes: BTreeMap<String, ChannelNode>,
    /// `referenced -> {referencing, ...}`
    dependents: BTreeMap<String, BTreeSet<String>>,
    /// `referencing -> {referenced, ...}`
    references: BTreeMap<String, BTreeSet<String>>,
    dangling: Vec<DanglingReference>,
}

impl ChannelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a set of artifacts, scanning every connector's properties.
    pub fn build(artifacts: &[DecomposedArtifact]) -> Self {
        let mut graph = Self::new();
        for artifact in artifacts {
            graph.add_node(ChannelNode {
                id: artifact.metadata.id.clone(),
                name: artifact.metadata.name.clone(),
            });
        }
        for artifact in artifacts {
            for target in referenced_ids(artifact) {
                graph.add_reference(&artifact.metadata.id, &target);
            }
        }
        graph
    }

    pub fn add_node(&mut self, node: ChannelNode) {
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        self.dependents.entry(id.clone()).or_default();
        self.references.entry(id).or_default();
    }

    /// Record that `from` references `to`. Unknown targets are kept as
    /// dangling references.
    pub fn add_reference(&mut self, from: &str, to: &str) {
        if !self.nodes.contains_key(to) {
            let dangling = DanglingReference {
                from: from.to_string(),
                to: to.to_string(),
            };
            if !self.dangling.contains(&dangling) {
                self.dangling.push(dangling);
            }
            return;
        }
        self.references
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.dependents
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ChannelNode> {
        self.nodes.values()
    }

    pub fn dangling(&self) -> &[DanglingReference] {
        &self.dangling
    }

    fn require(&self, id: &str) -> Result<()> {
        if self.nodes.contains_key(id) {
            Ok(())
        } else {
            Err(ChanvcsError::ChannelNotFound {
                id: id.to_string(),
                location: "reference graph".to_string(),
            })
        }
    }

    /// Channels `id` references directly.
    pub fn references_of(&self, id: &str) -> Result<Vec<String>> {
        self.require(id)?;
        Ok(self
            .references
            .get(id)
            .into_iter()
            .flatten()
            .cloned()
            .collect())
    }

    /// Channels that reference `id` directly.
    pub fn dependents_of(&self, id: &str) -> Result<Vec<String>> {
        self.require(id)?;
        Ok(self
            .dependents
            .get(id)
            .into_iter()
            .flatten()
            .cloned()
            .collect())
    }

    /// Every channel that reaches `id` through references, sorted.
    pub fn transitive_dependents_of(&self, id: &str) -> Result<Vec<String>> {
        self.require(id)?;
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents.get(&current).into_iter().flatten() {
                if visited.insert(dependent.clone()) {
                    queue.push_back(dependent.clone());
                }
            }
        }
        visited.remove(id);
        Ok(visited.into_iter().collect())
    }

    /// Referenced channels before the channels referencing them (Kahn's
    /// algorithm, ties broken by id). Fails on a cycle.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), self.references.get(id).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, &n)| n == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in self.dependents.get(id).into_iter().flatten() {
                if let Some(n) = remaining.get_mut(dependent.as_str()) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(dependent.as_str());
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let channels = self.cycles().into_iter().flatten().collect();
            return Err(ChanvcsError::DependencyCycle { channels });
        }
        Ok(order)
    }

    /// Strongly connected components that form cycles (including
    /// self-references), each sorted, in id order.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut tarjan = Tarjan {
            graph: self,
            index: 0,
            indices: BTreeMap::new(),
            lowlink: BTreeMap::new(),
            stack: Vec::new(),
            on_stack: BTreeSet::new(),
            components: Vec::new(),
        };
        for id in self.nodes.keys() {
            if !tarjan.indices.contains_key(id.as_str()) {
                tarjan.visit(id);
            }
        }
        let mut cycles: Vec<Vec<String>> = tarjan
            .components
            .into_iter()
            .filter(|c| {
                c.len() > 1
                    || self
                        .references
                        .get(&c[0])
                        .is_some_and(|refs| refs.contains(&c[0]))
            })
            .map(|mut c| {
                c.sort();
                c
            })
            .collect();
        cycles.sort();
        cycles
    }

    pub fn summary(&self) -> GraphSummary {
        let edges = self
            .references
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from.clone(), to.clone())))
            .collect();
        GraphSummary {
            nodes: self.nodes.values().cloned().collect(),
            edges,
            cycles: self.cycles(),
            dangling: self.dangling.clone(),
            order: self.topological_order().ok(),
        }
    }
}

struct Tarjan<'a> {
    graph: &'a ChannelGraph,
    index: usize,
    indices: BTreeMap<&'a str, usize>,
    lowlink: BTreeMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: BTreeSet<&'a str>,
    components: Vec<Vec<String>>,
}

impl<'a> Tarjan<'a> {
    fn visit(&mut self, id: &'a str) {
        self.indices.insert(id, self.index);
        self.lowlink.insert(id, self.index);
        self.index += 1;
        self.stack.push(id);
        self.on_stack.insert(id);

        let graph = self.graph;
        for next in graph.references.get(id).into_iter().flatten() {
            let next = next.as_str();
            if !self.indices.contains_key(next) {
                self.visit(next);
                let low = self.lowlink[next].min(self.lowlink[id]);
                self.lowlink.insert(id, low);
            } else if self.on_stack.contains(next) {
                let low = self.indices[next].min(self.lowlink[id]);
                self.lowlink.insert(id, low);
            }
        }

        if self.lowlink[id] == self.indices[id] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(member);
                component.push(member.to_string());
                if member == id {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

/// Channel ids referenced by an artifact's connector properties.
pub fn referenced_ids(artifact: &DecomposedArtifact) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for (_, connector) in artifact.connectors() {
        for (path, value) in connector.property_leaves() {
            let key = path.rsplit('/').next().unwrap_or(&path);
            let key = key.split('[').next().unwrap_or(key);
            let value = value.trim();
            if key == REFERENCE_PROPERTY && !value.is_empty() && value != "none" {
                ids.insert(value.to_string());
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::decompose_str;

    fn channel(id: &str, targets: &[&str]) -> DecomposedArtifact {
        let dests: String = targets
            .iter()
            .map(|t| {
                format!(
                    "<connector><name>to {t}</name><properties><channelId>{t}</channelId></properties></connector>"
                )
            })
            .collect();
        decompose_str(&format!(
            "<channel><id>{id}</id><name>{id}</name><sourceConnector/><destinationConnectors>{dests}</destinationConnectors></channel>"
        ))
        .unwrap()
    }

    #[test]
    fn dependents_and_order() {
        let graph = ChannelGraph::build(&[
            channel("a", &["b"]),
            channel("b", &["c"]),
            channel("c", &["none"]),
            channel("d", &["b"]),
        ]);
        assert_eq!(graph.dependents_of("b").unwrap(), vec!["a", "d"]);
        assert_eq!(graph.references_of("a").unwrap(), vec!["b"]);
        assert_eq!(graph.transitive_dependents_of("c").unwrap(), vec!["a", "b", "d"]);
        assert_eq!(graph.topological_order().unwrap(), vec!["c", "b", "a", "d"]);
        assert!(graph.cycles().is_empty());
        assert!(graph.dangling().is_empty());
    }

    #[test]
    fn cycles_are_reported_not_rejected() {
        let graph = ChannelGraph::build(&[
            channel("a", &["b"]),
            channel("b", &["a"]),
            channel("s", &["s"]),
            channel("x", &[]),
        ]);
        assert_eq!(
            graph.cycles(),
            vec![vec!["a".to_string(), "b".to_string()], vec!["s".to_string()]]
        );
        let err = graph.topological_order().unwrap_err();
        assert!(matches!(err, ChanvcsError::DependencyCycle { .. }));
        assert!(graph.summary().order.is_none());
    }

    #[test]
    fn unknown_targets_are_dangling() {
        let graph = ChannelGraph::build(&[channel("a", &["ghost"])]);
        assert_eq!(
            graph.dangling(),
            &[DanglingReference {
                from: "a".to_string(),
                to: "ghost".to_string(),
            }]
        );
        assert!(graph.dependents_of("ghost").is_err());
    }
}
