//! Dependency extraction, soft-cycle cluster detection, and topological
//! ordering, driven by a walk over the already-parsed AST (see the parser
//! crate's `AstNode::collect_refs`) rather than re-scanning formula text.

use std::collections::VecDeque;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use periodix_common::RefKind;
use periodix_parse::ast::AstNode;

/// A node in the scheduling graph: either a formula output or a
/// non-converted module solver. Module *outputs* (`M<id>.<out>`) are not
/// separate nodes: a reference to any of a module's outputs is a
/// dependency on the module node as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Formula(u32),
    Module(u32),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Formula(id) => write!(f, "R{id}"),
            NodeId::Module(id) => write!(f, "M{id}"),
        }
    }
}

/// A maximal set of formula nodes mutually reachable through a mix of hard
/// and `SHIFT`/`PREVSUM`/`PREVVAL` edges, evaluated jointly by the cluster
/// evaluator (see `crate::cluster`).
#[derive(Debug, Clone, Default)]
pub struct Cluster {
    pub members: Vec<u32>,
    /// Topological order restricted to this cluster's members; filled in
    /// once the overall schedule is known.
    pub internal_order: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Schedule {
    /// Kahn-sorted node order, with any residual (hard-cycle) nodes
    /// appended at the end.
    pub order: Vec<NodeId>,
    pub clusters: FxHashMap<usize, Cluster>,
    pub node_to_cluster: FxHashMap<u32, usize>,
    /// Nodes that could not be ordered by the acyclic contracted graph,
    /// a hard cycle the input formulas contain. Scheduled last; the
    /// engine records an `EngineError::cycle` for each one instead of
    /// producing a value.
    pub residual: Vec<NodeId>,
}

impl Schedule {
    /// The position within `order` at which cluster `cid` should actually
    /// be evaluated (its last-positioned member).
    pub fn trigger_positions(&self) -> FxHashMap<usize, usize> {
        let mut last: FxHashMap<usize, usize> = FxHashMap::default();
        for (pos, node) in self.order.iter().enumerate() {
            if let NodeId::Formula(id) = node {
                if let Some(&cid) = self.node_to_cluster.get(id) {
                    last.insert(cid, pos);
                }
            }
        }
        last
    }
}

/// One parsed calculation plus whatever it depends on, ready for
/// scheduling. `ast` is `None` when the formula failed to parse; such a
/// node still participates in the graph (with no dependencies) so it is
/// still visited and assigned a zero result.
pub struct CalcNode {
    pub id: u32,
    pub ast: Option<AstNode>,
}

fn node_for_ref(kind: RefKind) -> Option<NodeId> {
    match kind {
        RefKind::Formula(id) => Some(NodeId::Formula(id)),
        RefKind::Module { module, .. } => Some(NodeId::Module(module)),
        _ => None,
    }
}

/// Build the full schedule: hard dependency graph, soft-cycle clusters,
/// graph contraction, and a Kahn topological order.
///
/// `modules` lists the graph node and hard dependencies of every enabled,
/// non-converted module (see `crate::modules`); a module's declared
/// reference-valued inputs are its dependencies.
pub fn build_schedule(calcs: &[CalcNode], modules: &[(u32, FxHashSet<NodeId>)]) -> Schedule {
    let mut graph: FxHashMap<NodeId, FxHashSet<NodeId>> = FxHashMap::default();
    let mut soft_targets: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();

    for calc in calcs {
        let node = NodeId::Formula(calc.id);
        let mut deps = FxHashSet::default();
        let mut soft_list = Vec::new();
        if let Some(ast) = &calc.ast {
            let mut hard = Vec::new();
            let mut soft = Vec::new();
            ast.collect_refs(&mut hard, &mut soft);
            for name in &hard {
                if let Some(kind) = RefKind::parse(name) {
                    if let Some(target) = node_for_ref(kind) {
                        deps.insert(target);
                    }
                }
            }
            for name in &soft {
                if let Some(RefKind::Formula(id)) = RefKind::parse(name) {
                    soft_list.push(NodeId::Formula(id));
                }
            }
        }
        graph.insert(node, deps);
        soft_targets.insert(node, soft_list);
    }

    for (id, deps) in modules {
        graph.insert(NodeId::Module(*id), deps.clone());
    }

    let all_nodes: FxHashSet<NodeId> = graph.keys().copied().collect();
    for deps in graph.values_mut() {
        deps.retain(|d| all_nodes.contains(d));
    }
    for list in soft_targets.values_mut() {
        list.retain(|d| all_nodes.contains(d));
    }

    let (node_to_cluster, mut clusters) = detect_clusters(&graph, &soft_targets);

    // Any soft edge outside a cluster is safe to treat as an ordinary hard
    // edge: the lagged value is guaranteed available from an
    // earlier-scheduled node.
    for (node, targets) in &soft_targets {
        let NodeId::Formula(node_id) = node else { continue };
        for target in targets {
            if target == node {
                continue;
            }
            let NodeId::Formula(target_id) = target else { continue };
            let same_cluster = node_to_cluster
                .get(node_id)
                .zip(node_to_cluster.get(target_id))
                .is_some_and(|(a, b)| a == b);
            if !same_cluster {
                graph.get_mut(node).unwrap().insert(*target);
            }
        }
    }

    // A hard dependency on any cluster member becomes a dependency on
    // every member, so the whole cluster is scheduled as one atomic unit.
    if !node_to_cluster.is_empty() {
        let snapshot = graph.clone();
        for (node, deps) in graph.iter_mut() {
            if matches!(node, NodeId::Formula(id) if node_to_cluster.contains_key(id)) {
                continue;
            }
            let mut augmented = FxHashSet::default();
            for dep in &snapshot[node] {
                if let NodeId::Formula(dep_id) = dep {
                    if let Some(&cid) = node_to_cluster.get(dep_id) {
                        for &member in &clusters[&cid].members {
                            augmented.insert(NodeId::Formula(member));
                        }
                    }
                }
            }
            deps.extend(augmented);
        }
    }

    let (order, residual) = topological_sort(&graph);
    if !residual.is_empty() {
        warn!(nodes = ?residual, "unresolvable hard cycle; evaluating with partial context");
    }

    if !clusters.is_empty() {
        let position: FxHashMap<NodeId, usize> =
            order.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        for cluster in clusters.values_mut() {
            cluster
                .members
                .sort_by_key(|id| position.get(&NodeId::Formula(*id)).copied().unwrap_or(usize::MAX));
            cluster.internal_order = cluster.members.clone();
            debug!(members = ?cluster.internal_order, "soft-cycle cluster");
        }
    }

    Schedule {
        order,
        clusters,
        node_to_cluster,
        residual,
    }
}

fn detect_clusters(
    graph: &FxHashMap<NodeId, FxHashSet<NodeId>>,
    soft_targets: &FxHashMap<NodeId, Vec<NodeId>>,
) -> (FxHashMap<u32, usize>, FxHashMap<usize, Cluster>) {
    let is_reachable = |start: NodeId, target: NodeId| -> bool {
        if start == target {
            return true;
        }
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        visited.insert(start);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let Some(deps) = graph.get(&current) else {
                continue;
            };
            for &dep in deps {
                if dep == target {
                    return true;
                }
                if visited.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }
        false
    };

    let mut cycle_sets: Vec<FxHashSet<NodeId>> = Vec::new();
    for (&node, targets) in soft_targets {
        for &target in targets {
            if !graph.contains_key(&target) {
                continue;
            }
            if is_reachable(target, node) {
                let mut cycle_nodes: FxHashSet<NodeId> = FxHashSet::default();
                cycle_nodes.insert(node);
                cycle_nodes.insert(target);
                for &n in graph.keys() {
                    if matches!(n, NodeId::Formula(_))
                        && is_reachable(target, n)
                        && is_reachable(n, node)
                    {
                        cycle_nodes.insert(n);
                    }
                }
                cycle_sets.push(cycle_nodes);
            }
        }
    }

    if cycle_sets.is_empty() {
        return (FxHashMap::default(), FxHashMap::default());
    }

    let mut merged: Vec<FxHashSet<NodeId>> = Vec::new();
    for set in cycle_sets {
        if let Some(existing) = merged.iter_mut().find(|m| m.intersection(&set).next().is_some()) {
            existing.extend(set);
        } else {
            merged.push(set);
        }
    }

    let mut node_to_cluster = FxHashMap::default();
    let mut clusters = FxHashMap::default();
    for (cid, node_set) in merged.into_iter().enumerate() {
        let mut members: Vec<u32> = node_set
            .iter()
            .filter_map(|n| match n {
                NodeId::Formula(id) => Some(*id),
                NodeId::Module(_) => None,
            })
            .collect();
        members.sort_unstable();
        for &id in &members {
            node_to_cluster.insert(id, cid);
        }
        clusters.insert(
            cid,
            Cluster {
                members: members.clone(),
                internal_order: members,
            },
        );
    }
    (node_to_cluster, clusters)
}

/// Kahn's algorithm with a stable, deterministic queue: nodes are sorted
/// before seeding so the resulting order does not depend on hash-map
/// iteration order.
fn topological_sort(graph: &FxHashMap<NodeId, FxHashSet<NodeId>>) -> (Vec<NodeId>, Vec<NodeId>) {
    let mut all_nodes: Vec<NodeId> = graph.keys().copied().collect();
    all_nodes.sort();

    let mut reverse_adj: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
    let mut in_degree: FxHashMap<NodeId, usize> = all_nodes.iter().map(|&n| (n, 0)).collect();
    for &node in &all_nodes {
        for &dep in &graph[&node] {
            *in_degree.get_mut(&node).unwrap() += 1;
            reverse_adj.entry(dep).or_default().push(node);
        }
    }

    let mut queue: VecDeque<NodeId> = all_nodes
        .iter()
        .copied()
        .filter(|n| in_degree[n] == 0)
        .collect();
    let mut order = Vec::with_capacity(all_nodes.len());
    while let Some(node) = queue.pop_front() {
        order.push(node);
        if let Some(dependents) = reverse_adj.get(&node) {
            let mut newly_ready: Vec<NodeId> = Vec::new();
            for &dependent in dependents {
                let deg = in_degree.get_mut(&dependent).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(dependent);
                }
            }
            newly_ready.sort();
            queue.extend(newly_ready);
        }
    }

    let ordered: FxHashSet<NodeId> = order.iter().copied().collect();
    let residual: Vec<NodeId> = all_nodes.into_iter().filter(|n| !ordered.contains(n)).collect();
    order.extend(residual.iter().copied());
    (order, residual)
}
