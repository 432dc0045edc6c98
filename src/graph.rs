use std::collections::{BTreeMap, BTreeSet};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};
use crate::module::ModuleSet;

/// Whether an edge participates in execution ordering or only in
/// change-impact propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeKind {
    /// `terraform_remote_state` reference; orders stages.
    Execution,
    /// Local `module` source under a library path; impact only.
    Library,
}

/// A directed edge `(from, to)`: `from` must be applied after `to`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dependency {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// Execution DAG over executable modules, keyed by module ID.
///
/// `deps` maps a module to the modules it must wait for; `dependents` is the
/// reverse view used for impact propagation. All containers are BTree-based
/// so every enumeration is lexicographic without extra sorting.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeSet<String>,
    deps: BTreeMap<String, BTreeSet<String>>,
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    /// Build the execution graph from discovered modules and extracted
    /// edges. Library edges are ignored here; library modules never become
    /// nodes.
    pub fn build(modules: &ModuleSet, edges: &[Dependency]) -> Result<Self> {
        let mut graph = Graph::default();
        for module in modules.executables() {
            graph.nodes.insert(module.id.clone());
        }

        for edge in edges {
            if edge.kind != EdgeKind::Execution {
                continue;
            }
            graph.add_edge(&edge.from, &edge.to)?;
        }

        Ok(graph)
    }

    fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        if from == to {
            return Err(Error::graph(format!("self-edge on module '{}'", from)));
        }
        if !self.nodes.contains(from) {
            return Err(Error::graph(format!("edge from unknown module '{}'", from)));
        }
        if !self.nodes.contains(to) {
            return Err(Error::graph(format!("edge to unknown module '{}'", to)));
        }

        self.deps
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.dependents
            .entry(to.to_string())
            .or_default()
            .insert(from.to_string());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains(id)
    }

    /// Node IDs in lexicographic order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Direct prerequisites of a module, lexicographically ordered.
    pub fn deps_of(&self, id: &str) -> Vec<&str> {
        self.deps
            .get(id)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Detect all cycles. Each cycle is a closed node sequence (first node
    /// repeated at the end), rotated so its smallest node leads.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn visit(
            graph: &Graph,
            node: &str,
            color: &mut BTreeMap<String, Color>,
            path: &mut Vec<String>,
            cycles: &mut Vec<Vec<String>>,
        ) {
            color.insert(node.to_string(), Color::Gray);
            path.push(node.to_string());

            for next in graph.deps_of(node) {
                match color.get(next).copied().unwrap_or(Color::White) {
                    Color::White => visit(graph, next, color, path, cycles),
                    Color::Gray => {
                        let start = path.iter().position(|n| n == next).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..].to_vec();
                        cycle.push(next.to_string());
                        cycles.push(canonicalize_cycle(cycle));
                    }
                    Color::Black => {}
                }
            }

            path.pop();
            color.insert(node.to_string(), Color::Black);
        }

        let mut color = BTreeMap::new();
        let mut cycles = Vec::new();
        for node in &self.nodes {
            if color.get(node).copied().unwrap_or(Color::White) == Color::White {
                let mut path = Vec::new();
                visit(self, node, &mut color, &mut path, &mut cycles);
            }
        }

        cycles.sort();
        cycles.dedup();
        cycles
    }

    /// Longest-path level assignment.
    ///
    /// Level 0 holds modules with no prerequisites; every other module lands
    /// one past its deepest prerequisite, so `level(from) > level(to)` holds
    /// for every edge. Fails with the cycle list when the graph is cyclic.
    pub fn levels(&self) -> Result<Vec<Vec<String>>> {
        let cycles = self.cycles();
        if !cycles.is_empty() {
            return Err(Error::Cycle { cycles });
        }

        let mut remaining: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.deps.get(n).map_or(0, BTreeSet::len)))
            .collect();
        let mut level: BTreeMap<&str, usize> = BTreeMap::new();

        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&node, _)| node)
            .collect();

        while let Some(node) = ready.pop() {
            let node_level = *level.entry(node).or_insert(0);

            if let Some(dependents) = self.dependents.get(node) {
                for dependent in dependents {
                    let entry = level.entry(dependent.as_str()).or_insert(0);
                    *entry = (*entry).max(node_level + 1);

                    if let Some(count) = remaining.get_mut(dependent.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(dependent.as_str());
                        }
                    }
                }
            }
        }

        let mut grouped: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for (node, lvl) in level {
            grouped.entry(lvl).or_default().push(node.to_string());
        }

        // BTreeMap iteration gives contiguous levels; BTreeSet-backed nodes
        // arrive sorted, but group insertion order depends on the queue, so
        // sort each level explicitly.
        let mut levels: Vec<Vec<String>> = grouped.into_values().collect();
        for level in &mut levels {
            level.sort();
        }
        Ok(levels)
    }

    /// All modules reachable from the seeds via reverse edges (transitive
    /// dependents), seeds included.
    pub fn impact_closure<'a>(&self, seeds: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut queue: Vec<&str> = seeds.into_iter().filter(|s| self.contains(s)).collect();

        while let Some(node) = queue.pop() {
            if !closure.insert(node.to_string()) {
                continue;
            }
            if let Some(dependents) = self.dependents.get(node) {
                queue.extend(dependents.iter().map(String::as_str));
            }
        }

        closure
    }

    /// Induced subgraph over `keep`: those nodes plus edges between them.
    pub fn subgraph(&self, keep: &BTreeSet<String>) -> Graph {
        let mut graph = Graph::default();
        graph.nodes = self.nodes.intersection(keep).cloned().collect();

        for (from, deps) in &self.deps {
            if !graph.nodes.contains(from) {
                continue;
            }
            for to in deps {
                if graph.nodes.contains(to) {
                    graph
                        .deps
                        .entry(from.clone())
                        .or_default()
                        .insert(to.clone());
                    graph
                        .dependents
                        .entry(to.clone())
                        .or_default()
                        .insert(from.clone());
                }
            }
        }

        graph
    }
}

fn canonicalize_cycle(mut cycle: Vec<String>) -> Vec<String> {
    cycle.pop();
    let min_idx = cycle
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    cycle.rotate_left(min_idx);
    if let Some(first) = cycle.first().cloned() {
        cycle.push(first);
    }
    cycle
}

/// Compile glob patterns, separating out the invalid ones so callers can
/// warn instead of failing.
pub fn compile_globs(patterns: &[String]) -> (GlobSet, Vec<String>) {
    let mut builder = GlobSetBuilder::new();
    let mut invalid = Vec::new();

    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(_) => invalid.push(pattern.clone()),
        }
    }

    let set = builder.build().unwrap_or_else(|_| GlobSet::empty());
    (set, invalid)
}

/// Apply include/exclude patterns to module IDs.
///
/// Exclusion is evaluated first and short-circuits; an empty include list
/// keeps everything. Returns the surviving IDs plus any invalid patterns.
pub fn filter_ids<'a>(
    ids: impl IntoIterator<Item = &'a str>,
    include: &[String],
    exclude: &[String],
) -> (Vec<String>, Vec<String>) {
    let (exclude_set, mut invalid) = compile_globs(exclude);
    let (include_set, invalid_includes) = compile_globs(include);
    invalid.extend(invalid_includes);

    let kept = ids
        .into_iter()
        .filter(|id| {
            if exclude_set.is_match(id) {
                return false;
            }
            include.is_empty() || include_set.is_match(id)
        })
        .map(String::from)
        .collect();

    (kept, invalid)
}
