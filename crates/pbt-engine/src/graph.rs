//! Dependency graph over owned and third-party packages.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::EngineError;
use crate::package::{DepConstraint, Package, PackageKind};

/// An external dependency, synthesized while building the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ThirdPartyPackage {
    pub name: String,
    pub kind: PackageKind,
    /// Owned package name to the constraints it places on this package.
    pub inverted_dependents: BTreeMap<String, Vec<DepConstraint>>,
}

/// A graph node: either a package in the project or an external one.
#[derive(Debug, Clone, PartialEq)]
pub enum PkgNode {
    Owned(Package),
    ThirdParty(ThirdPartyPackage),
}

impl PkgNode {
    pub fn name(&self) -> &str {
        match self {
            PkgNode::Owned(p) => &p.name,
            PkgNode::ThirdParty(p) => &p.name,
        }
    }

    pub fn kind(&self) -> PackageKind {
        match self {
            PkgNode::Owned(p) => p.kind,
            PkgNode::ThirdParty(p) => p.kind,
        }
    }

    pub fn as_owned(&self) -> Option<&Package> {
        match self {
            PkgNode::Owned(p) => Some(p),
            PkgNode::ThirdParty(_) => None,
        }
    }
}

/// Directed graph where an edge `A -> B` means "A depends on B". The edge
/// weight is `true` for a dev-only dependency.
#[derive(Debug, Default)]
pub struct PkgGraph {
    graph: DiGraph<PkgNode, bool>,
    index: HashMap<String, NodeIndex>,
}

impl PkgGraph {
    /// Build the graph from the owned packages of a project.
    ///
    /// A dependency declared both as production and dev counts as production.
    /// An owner's constraints on a third-party package are recorded from
    /// both declarations, so the merged specs satisfy each of them.
    ///
    /// # Errors
    /// Returns an error if a third-party package is shared by packages of
    /// incompatible kinds, or the dependencies form a cycle.
    pub fn from_packages(packages: BTreeMap<String, Package>) -> Result<Self, EngineError> {
        let mut graph = PkgGraph::default();
        let mut edges: Vec<(String, String, Vec<DepConstraint>, bool)> = Vec::new();

        for (name, pkg) in packages {
            for (dep, specs) in &pkg.dependencies {
                edges.push((name.clone(), dep.clone(), specs.clone(), false));
            }
            for (dep, specs) in &pkg.dev_dependencies {
                edges.push((name.clone(), dep.clone(), specs.clone(), true));
            }
            let idx = graph.graph.add_node(PkgNode::Owned(pkg));
            graph.index.insert(name, idx);
        }

        for (owner, dep, specs, is_dev) in edges {
            let Some(&owner_idx) = graph.index.get(&owner) else {
                continue;
            };
            let owner_kind = graph.graph.node_weight(owner_idx).map(PkgNode::kind);
            let dep_idx = match graph.index.get(&dep) {
                Some(&idx) => idx,
                None => {
                    let idx = graph.graph.add_node(PkgNode::ThirdParty(ThirdPartyPackage {
                        name: dep.clone(),
                        kind: owner_kind.unwrap_or(PackageKind::Script),
                        inverted_dependents: BTreeMap::new(),
                    }));
                    graph.index.insert(dep.clone(), idx);
                    idx
                }
            };

            if let (Some(PkgNode::ThirdParty(tp)), Some(kind)) =
                (graph.graph.node_weight_mut(dep_idx), owner_kind)
            {
                if !tp.kind.is_compatible(kind) {
                    let first_owner = tp.inverted_dependents.keys().next().cloned().unwrap_or_default();
                    return Err(EngineError::IncompatibleKind {
                        dependency: dep,
                        first_owner,
                        first_kind: tp.kind.to_string(),
                        owner,
                        kind: kind.to_string(),
                    });
                }
                let recorded = tp.inverted_dependents.entry(owner.clone()).or_default();
                for spec in specs {
                    if !recorded.contains(&spec) {
                        recorded.push(spec);
                    }
                }
            }

            match graph.graph.find_edge(owner_idx, dep_idx) {
                Some(edge) => {
                    if let Some(weight) = graph.graph.edge_weight_mut(edge) {
                        *weight = *weight && is_dev;
                    }
                }
                None => {
                    graph.graph.add_edge(owner_idx, dep_idx, is_dev);
                }
            }
        }

        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn get(&self, name: &str) -> Option<&PkgNode> {
        self.index
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// The owned package called `name`, if any.
    pub fn package(&self, name: &str) -> Option<&Package> {
        self.get(name).and_then(PkgNode::as_owned)
    }

    pub(crate) fn package_mut(&mut self, name: &str) -> Option<&mut Package> {
        let idx = *self.index.get(name)?;
        match self.graph.node_weight_mut(idx) {
            Some(PkgNode::Owned(p)) => Some(p),
            _ => None,
        }
    }

    pub(crate) fn third_party_mut(&mut self, name: &str) -> Option<&mut ThirdPartyPackage> {
        let idx = *self.index.get(name)?;
        match self.graph.node_weight_mut(idx) {
            Some(PkgNode::ThirdParty(p)) => Some(p),
            _ => None,
        }
    }

    /// Owned packages, sorted by name.
    pub fn packages(&self) -> Vec<&Package> {
        let mut pkgs: Vec<&Package> = self
            .graph
            .node_weights()
            .filter_map(PkgNode::as_owned)
            .collect();
        pkgs.sort_by(|a, b| a.name.cmp(&b.name));
        pkgs
    }

    /// Third-party packages, sorted by name.
    pub fn third_party_packages(&self) -> Vec<&ThirdPartyPackage> {
        let mut pkgs: Vec<&ThirdPartyPackage> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                PkgNode::ThirdParty(p) => Some(p),
                PkgNode::Owned(_) => None,
            })
            .collect();
        pkgs.sort_by(|a, b| a.name.cmp(&b.name));
        pkgs
    }

    /// Everything `name` depends on, directly or transitively, in depth-first
    /// pre-order (children visited by name), excluding `name` itself.
    ///
    /// Without `include_dev`, only nodes reachable through production edges
    /// alone are returned: one dev edge anywhere on every path drops a node.
    ///
    /// # Errors
    /// Returns an error if `name` is not in the graph.
    pub fn dependencies(&self, name: &str, include_dev: bool) -> Result<Vec<&PkgNode>, EngineError> {
        let &root = self.index.get(name).ok_or_else(|| self.unknown(name))?;

        let mut order = Vec::new();
        let mut seen = HashSet::from([root]);
        self.preorder(root, &mut seen, &mut order, true);

        let keep: HashSet<NodeIndex> = if include_dev {
            order.iter().copied().collect()
        } else {
            let mut prod = Vec::new();
            let mut prod_seen = HashSet::from([root]);
            self.preorder(root, &mut prod_seen, &mut prod, false);
            prod.into_iter().collect()
        };

        Ok(order
            .into_iter()
            .filter(|idx| keep.contains(idx))
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect())
    }

    /// Order the named owned packages so every package comes after the
    /// packages it depends on; ties go to the smaller name.
    pub fn topological_order(&self, names: &BTreeSet<String>) -> Vec<String> {
        let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
        for name in names {
            let blockers = self
                .direct_dependencies(name)
                .filter(|dep| *dep != name.as_str() && names.contains(*dep))
                .count();
            remaining.insert(name.as_str(), blockers);
        }

        let mut order = Vec::with_capacity(names.len());
        while let Some(next) = remaining
            .iter()
            .find(|(_, blockers)| **blockers == 0)
            .map(|(name, _)| *name)
        {
            remaining.remove(next);
            for (name, blockers) in remaining.iter_mut() {
                if self.direct_dependencies(name).any(|dep| dep == next) {
                    *blockers = blockers.saturating_sub(1);
                }
            }
            order.push(next.to_owned());
        }
        order
    }

    fn direct_dependencies<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.index
            .get(name)
            .into_iter()
            .flat_map(move |&idx| self.graph.neighbors_directed(idx, Direction::Outgoing))
            .filter_map(move |idx| self.graph.node_weight(idx).map(PkgNode::name))
    }

    fn sorted_children(&self, idx: NodeIndex, include_dev: bool) -> Vec<NodeIndex> {
        let mut children: Vec<NodeIndex> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| include_dev || !*e.weight())
            .map(|e| e.target())
            .collect();
        children.sort_by(|a, b| self.node_name(*a).cmp(self.node_name(*b)));
        children
    }

    fn preorder(
        &self,
        idx: NodeIndex,
        seen: &mut HashSet<NodeIndex>,
        out: &mut Vec<NodeIndex>,
        include_dev: bool,
    ) {
        for child in self.sorted_children(idx, include_dev) {
            if seen.insert(child) {
                out.push(child);
                self.preorder(child, seen, out, include_dev);
            }
        }
    }

    /// DFS with three-color marking (white, gray, black) over all nodes.
    fn check_acyclic(&self) -> Result<(), EngineError> {
        let mut color: HashMap<NodeIndex, u8> = HashMap::new();
        let mut roots: Vec<NodeIndex> = self.graph.node_indices().collect();
        roots.sort_by(|a, b| self.node_name(*a).cmp(self.node_name(*b)));

        for root in roots {
            let mut stack = Vec::new();
            self.visit(root, &mut color, &mut stack)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        idx: NodeIndex,
        color: &mut HashMap<NodeIndex, u8>,
        stack: &mut Vec<NodeIndex>,
    ) -> Result<(), EngineError> {
        match color.get(&idx).copied().unwrap_or(0) {
            2 => return Ok(()),
            1 => {
                let start = stack.iter().position(|&n| n == idx).unwrap_or(0);
                let mut names: Vec<&str> = stack
                    .get(start..)
                    .unwrap_or(stack.as_slice())
                    .iter()
                    .map(|&n| self.node_name(n))
                    .collect();
                names.push(self.node_name(idx));
                return Err(EngineError::DependencyCycle {
                    cycle: names.join(" -> "),
                });
            }
            _ => {}
        }

        color.insert(idx, 1);
        stack.push(idx);
        for child in self.sorted_children(idx, true) {
            self.visit(child, color, stack)?;
        }
        stack.pop();
        color.insert(idx, 2);
        Ok(())
    }

    fn node_name(&self, idx: NodeIndex) -> &str {
        self.graph.node_weight(idx).map_or("", PkgNode::name)
    }

    pub(crate) fn unknown(&self, name: &str) -> EngineError {
        let available: Vec<String> = self.packages().iter().map(|p| p.name.clone()).collect();
        EngineError::UnknownPackage {
            name: name.to_owned(),
            available: available.join(", "),
        }
    }
}
