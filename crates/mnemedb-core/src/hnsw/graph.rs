//! HNSW graph core.
//!
//! Implements the hierarchical navigable small world structure described in
//! the Malkov & Yashunin paper: an arena of nodes keyed by `NodeId` with
//! per-layer adjacency lists. Neighbor lists store ids, never references, so
//! the richly cyclic graph carries no cyclic ownership and deletion can
//! never dangle.
//!
//! All mutation happens under the owning index's write lock; `GraphCore`
//! itself is a plain single-writer structure. Every "nearest" decision
//! breaks ties by lower distance first, lower id second, which makes both
//! construction and search deterministic under a fixed RNG seed.

use super::ordered_float::OrderedFloat;
use super::params::HnswParams;
use super::rng::LevelRng;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Unique identifier for a node. Monotonically increasing, never reused
/// within an index lifetime, stable across persistence.
pub type NodeId = u64;

/// Opaque metadata attached to a node. Stored and returned verbatim; the
/// index inspects only the reserved `inserted_at` key.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Reserved metadata key holding the insertion timestamp (Unix seconds).
/// Nodes without it are exempt from age-based pruning.
pub const INSERTED_AT_KEY: &str = "inserted_at";

/// A single search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Id of the matched node.
    pub node_id: NodeId,
    /// Distance from the query under the index metric.
    pub distance: f32,
    /// The stored vector.
    pub vector: Vec<f32>,
    /// The stored metadata.
    pub metadata: Metadata,
}

/// Result summary of a [`GraphCore::compact`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactReport {
    /// Orphan nodes removed.
    pub removed_nodes: usize,
    /// Neighbor lists re-pruned back under their degree cap.
    pub optimized_connections: usize,
    /// Live nodes after the pass.
    pub total_nodes_after: usize,
}

/// One node: vector, metadata, and a neighbor list per layer `0..=top_level`.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) vector: Vec<f32>,
    pub(crate) metadata: Metadata,
    pub(crate) top_level: usize,
    /// `neighbors[layer]` holds the adjacency at that layer.
    pub(crate) neighbors: Vec<Vec<NodeId>>,
}

impl Node {
    fn new(vector: Vec<f32>, metadata: Metadata, top_level: usize) -> Self {
        Self {
            vector,
            metadata,
            top_level,
            neighbors: vec![Vec::new(); top_level + 1],
        }
    }

    /// Insertion timestamp, if the reserved key carries one.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn inserted_at(&self) -> Option<u64> {
        let value = self.metadata.get(INSERTED_AT_KEY)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|t| *t >= 0.0).map(|t| t as u64))
    }
}

/// The graph engine. Owns nodes, layered neighbor lists, the entry point,
/// and the level RNG.
pub(crate) struct GraphCore {
    params: HnswParams,
    dimension: Option<usize>,
    nodes: FxHashMap<NodeId, Node>,
    next_id: NodeId,
    entry_point: Option<NodeId>,
    rng: LevelRng,
}

impl GraphCore {
    pub(crate) fn new(params: HnswParams, seed: u64) -> Self {
        Self {
            dimension: params.dimension,
            nodes: FxHashMap::default(),
            next_id: 0,
            entry_point: None,
            rng: LevelRng::new(seed),
            params,
        }
    }

    /// Rebuilds a core from persisted parts. The caller is responsible for
    /// validating invariants afterwards.
    pub(crate) fn from_parts(
        params: HnswParams,
        dimension: Option<usize>,
        nodes: FxHashMap<NodeId, Node>,
        next_id: NodeId,
        entry_point: Option<NodeId>,
        seed: u64,
    ) -> Self {
        Self {
            params,
            dimension,
            nodes,
            next_id,
            entry_point,
            rng: LevelRng::new(seed),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn params(&self) -> &HnswParams {
        &self.params
    }

    pub(crate) fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub(crate) fn entry_point(&self) -> Option<NodeId> {
        self.entry_point
    }

    pub(crate) fn next_id(&self) -> NodeId {
        self.next_id
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn iter_nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    fn metric(&self) -> DistanceMetric {
        self.params.metric
    }

    fn cap_for(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m0()
        } else {
            self.params.m
        }
    }

    /// Rough memory footprint in bytes: vectors, adjacency, and per-node
    /// bookkeeping. Metadata is estimated, not measured.
    pub(crate) fn memory_estimate(&self) -> usize {
        self.nodes
            .values()
            .map(|node| {
                let edges: usize = node.neighbors.iter().map(Vec::len).sum();
                node.vector.len() * 4 + edges * 8 + node.metadata.len() * 48 + 96
            })
            .sum()
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Rejects empty, non-finite, or wrongly sized vectors.
    pub(crate) fn validate_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(Error::InvalidVector("vector is empty".into()));
        }
        if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidVector(format!(
                "non-finite value at position {position}"
            )));
        }
        if let Some(expected) = self.dimension {
            if vector.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts a vector with metadata and returns the assigned id.
    ///
    /// The full descent + linking sequence runs as one logical unit; on any
    /// error the graph is left untouched, so a caller crash between public
    /// operations can never expose a half-linked node.
    pub(crate) fn insert(&mut self, vector: Vec<f32>, metadata: Metadata) -> Result<NodeId> {
        self.validate_vector(&vector)?;
        if let Some(max_elements) = self.params.max_elements {
            if self.nodes.len() >= max_elements {
                return Err(Error::CapacityExceeded { max_elements });
            }
        }
        if self.dimension.is_none() {
            self.dimension = Some(vector.len());
        }

        let id = self.next_id;
        let level = self.rng.assign_level(self.params.ml);
        let query = vector.clone();

        self.nodes.insert(id, Node::new(vector, metadata, level));
        self.next_id += 1;

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            return Ok(id);
        };

        let entry_level = self.top_level_of(entry);

        // Descent phase: greedy width-1 search through the layers above the
        // new node's level.
        let mut ep = entry;
        for layer in ((level + 1)..=entry_level).rev() {
            ep = self.greedy_closest(&query, ep, layer, None)?;
        }

        // Linking phase.
        let mut seeds = vec![ep];
        for layer in (0..=level.min(entry_level)).rev() {
            let pool =
                self.search_layer(&query, &seeds, self.params.ef_construction, layer, None)?;

            let cap = self.cap_for(layer);
            // Simple heuristic: closest candidates in ascending (distance, id)
            // order. The pool never contains the new node itself.
            let selected: Vec<NodeId> = pool.iter().take(cap).map(|&(n, _)| n).collect();

            if let Some(node) = self.nodes.get_mut(&id) {
                node.neighbors[layer] = selected.clone();
            }
            for &neighbor in &selected {
                self.link_back(neighbor, id, layer, cap);
            }

            seeds = if selected.is_empty() { vec![ep] } else { selected };
        }

        if level > entry_level {
            self.entry_point = Some(id);
        }

        Ok(id)
    }

    fn top_level_of(&self, id: NodeId) -> usize {
        self.nodes.get(&id).map_or(0, |n| n.top_level)
    }

    /// Adds `new_node` to `owner`'s list at `layer`, re-pruning to the cap
    /// and removing back-links from any evicted neighbor.
    fn link_back(&mut self, owner: NodeId, new_node: NodeId, layer: usize, cap: usize) {
        let Some(owner_node) = self.nodes.get(&owner) else {
            return;
        };
        if owner_node.neighbors[layer].contains(&new_node) {
            return;
        }

        if owner_node.neighbors[layer].len() < cap {
            if let Some(node) = self.nodes.get_mut(&owner) {
                node.neighbors[layer].push(new_node);
            }
            return;
        }

        // Over cap: keep the `cap` closest of (current ∪ new), evict the rest.
        let owner_vector = owner_node.vector.clone();
        let mut extended = owner_node.neighbors[layer].clone();
        extended.push(new_node);

        let kept = self.closest_subset(&owner_vector, &extended, cap);
        let evicted: Vec<NodeId> = extended.iter().copied().filter(|n| !kept.contains(n)).collect();

        if let Some(node) = self.nodes.get_mut(&owner) {
            node.neighbors[layer] = kept;
        }
        for e in evicted {
            if let Some(node) = self.nodes.get_mut(&e) {
                if let Some(list) = node.neighbors.get_mut(layer) {
                    list.retain(|&n| n != owner);
                }
            }
        }
    }

    /// Selects the `cap` candidates closest to `reference` in ascending
    /// (distance, id) order, deduplicated.
    fn closest_subset(&self, reference: &[f32], candidates: &[NodeId], cap: usize) -> Vec<NodeId> {
        let mut scored: Vec<(OrderedFloat, NodeId)> = Vec::with_capacity(candidates.len());
        let mut seen = FxHashSet::default();
        for &candidate in candidates {
            if !seen.insert(candidate) {
                continue;
            }
            if let Some(node) = self.nodes.get(&candidate) {
                let d = self.metric().distance(reference, &node.vector);
                scored.push((OrderedFloat(d), candidate));
            }
        }
        scored.sort_unstable();
        scored.into_iter().take(cap).map(|(_, n)| n).collect()
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Greedy width-1 descent step at a single layer.
    fn greedy_closest(
        &self,
        query: &[f32],
        start: NodeId,
        layer: usize,
        deadline: Option<Instant>,
    ) -> Result<NodeId> {
        let mut best = start;
        let mut best_dist = self
            .nodes
            .get(&start)
            .map(|n| self.metric().distance(query, &n.vector))
            .ok_or_else(|| Error::Internal(format!("dangling entry point {start}")))?;

        loop {
            check_deadline(deadline)?;
            let Some(node) = self.nodes.get(&best) else {
                return Err(Error::Internal(format!("dangling node {best}")));
            };
            let Some(neighbors) = node.neighbors.get(layer) else {
                return Ok(best);
            };

            let mut improved = false;
            for &neighbor in neighbors {
                let Some(n) = self.nodes.get(&neighbor) else {
                    return Err(Error::Internal(format!("dangling neighbor {neighbor}")));
                };
                let d = n.vector.as_slice();
                let dist = self.metric().distance(query, d);
                // Strict lexicographic improvement on (distance, id) keeps the
                // walk deterministic and guarantees termination.
                if (OrderedFloat(dist), neighbor) < (OrderedFloat(best_dist), best) {
                    best = neighbor;
                    best_dist = dist;
                    improved = true;
                }
            }
            if !improved {
                return Ok(best);
            }
        }
    }

    /// Layer-restricted best-first search with candidate width `ef`.
    ///
    /// Returns up to `ef` nodes sorted ascending by (distance, id). The
    /// deadline, when given, is checked between candidate expansions and
    /// trips as [`Error::Canceled`].
    pub(crate) fn search_layer(
        &self,
        query: &[f32],
        seeds: &[NodeId],
        ef: usize,
        layer: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<(NodeId, f32)>> {
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut candidates: BinaryHeap<Reverse<(OrderedFloat, NodeId)>> = BinaryHeap::new();
        let mut results: BinaryHeap<(OrderedFloat, NodeId)> = BinaryHeap::new();

        for &seed in seeds {
            if !visited.insert(seed) {
                continue;
            }
            let Some(node) = self.nodes.get(&seed) else {
                return Err(Error::Internal(format!("dangling seed {seed}")));
            };
            let d = self.metric().distance(query, &node.vector);
            candidates.push(Reverse((OrderedFloat(d), seed)));
            results.push((OrderedFloat(d), seed));
            if results.len() > ef {
                results.pop();
            }
        }

        while let Some(Reverse((OrderedFloat(c_dist), c_node))) = candidates.pop() {
            check_deadline(deadline)?;

            let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);
            if results.len() >= ef && c_dist > furthest {
                break;
            }

            let Some(node) = self.nodes.get(&c_node) else {
                return Err(Error::Internal(format!("dangling candidate {c_node}")));
            };
            let Some(neighbors) = node.neighbors.get(layer) else {
                continue;
            };

            for &neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(n) = self.nodes.get(&neighbor) else {
                    return Err(Error::Internal(format!("dangling neighbor {neighbor}")));
                };
                let d = self.metric().distance(query, &n.vector);
                let furthest = results.peek().map_or(f32::MAX, |r| r.0 .0);

                if results.len() < ef || d < furthest {
                    candidates.push(Reverse((OrderedFloat(d), neighbor)));
                    results.push((OrderedFloat(d), neighbor));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(OrderedFloat, NodeId)> = results.into_iter().collect();
        out.sort_unstable();
        Ok(out.into_iter().map(|(d, n)| (n, d.0)).collect())
    }

    /// Full top-level search: descent through the upper layers, then a
    /// width-`ef` sweep of layer 0, returning the `k` nearest hits.
    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        ef: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<SearchHit>> {
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        self.validate_vector(query)?;

        let mut ep = entry;
        for layer in (1..=self.top_level_of(entry)).rev() {
            ep = self.greedy_closest(query, ep, layer, deadline)?;
        }

        let pool = self.search_layer(query, &[ep], ef.max(k).max(1), 0, deadline)?;

        Ok(pool
            .into_iter()
            .take(k)
            .filter_map(|(id, distance)| {
                self.nodes.get(&id).map(|node| SearchHit {
                    node_id: id,
                    distance,
                    vector: node.vector.clone(),
                    metadata: node.metadata.clone(),
                })
            })
            .collect())
    }

    // =========================================================================
    // Deletion and maintenance
    // =========================================================================

    /// Removes a node, detaching every back-link and re-electing the entry
    /// point when necessary. Returns false if the id was not live.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.remove(&id) else {
            return false;
        };

        for (layer, neighbors) in node.neighbors.iter().enumerate() {
            for &neighbor in neighbors {
                if let Some(n) = self.nodes.get_mut(&neighbor) {
                    if let Some(list) = n.neighbors.get_mut(layer) {
                        list.retain(|&x| x != id);
                    }
                }
            }
        }

        if self.entry_point == Some(id) {
            self.entry_point = self.elect_entry_point();
        }
        true
    }

    /// The live node with the greatest top level, ties broken by lowest id.
    fn elect_entry_point(&self) -> Option<NodeId> {
        let mut best: Option<(usize, NodeId)> = None;
        for (&id, node) in &self.nodes {
            let candidate = (node.top_level, id);
            best = Some(match best {
                None => candidate,
                Some((level, best_id)) => {
                    if node.top_level > level || (node.top_level == level && id < best_id) {
                        candidate
                    } else {
                        (level, best_id)
                    }
                }
            });
        }
        best.map(|(_, id)| id)
    }

    /// Deletes every node whose `inserted_at` is older than `now - max_age`.
    /// Nodes without the key are untouched. Returns the count removed.
    pub(crate) fn prune_by_age(&mut self, max_age: Duration, now: u64) -> usize {
        let cutoff = now.saturating_sub(max_age.as_secs());
        let mut victims: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.inserted_at().is_some_and(|t| t < cutoff))
            .map(|(&id, _)| id)
            .collect();
        victims.sort_unstable();

        for &id in &victims {
            self.remove_node(id);
        }
        victims.len()
    }

    /// Removes orphan nodes and re-prunes lists that drifted above
    /// `1.5 * cap` (possible in snapshots written by earlier versions).
    pub(crate) fn compact(&mut self) -> CompactReport {
        // Orphans: no neighbors at any layer and not the entry point. Such a
        // node is unreachable from the entry point by construction.
        let entry = self.entry_point;
        let mut orphans: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|&(&id, node)| {
                Some(id) != entry && node.neighbors.iter().all(Vec::is_empty)
            })
            .map(|(&id, _)| id)
            .collect();
        orphans.sort_unstable();
        for &id in &orphans {
            self.remove_node(id);
        }

        // Over-degree repair.
        let mut over: Vec<(NodeId, usize)> = Vec::new();
        for (&id, node) in &self.nodes {
            for (layer, list) in node.neighbors.iter().enumerate() {
                let cap = self.cap_for(layer);
                if list.len() * 2 > cap * 3 {
                    over.push((id, layer));
                }
            }
        }
        over.sort_unstable();

        let mut optimized = 0;
        for (id, layer) in over {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let cap = self.cap_for(layer);
            let reference = node.vector.clone();
            let current = node.neighbors[layer].clone();

            let kept = self.closest_subset(&reference, &current, cap);
            let evicted: Vec<NodeId> =
                current.iter().copied().filter(|n| !kept.contains(n)).collect();

            if let Some(node) = self.nodes.get_mut(&id) {
                node.neighbors[layer] = kept;
            }
            for e in evicted {
                if let Some(n) = self.nodes.get_mut(&e) {
                    if let Some(list) = n.neighbors.get_mut(layer) {
                        list.retain(|&x| x != id);
                    }
                }
            }
            optimized += 1;
        }

        CompactReport {
            removed_nodes: orphans.len(),
            optimized_connections: optimized,
            total_nodes_after: self.nodes.len(),
        }
    }

    // =========================================================================
    // Invariant validation
    // =========================================================================

    /// Full structural validation: bidirectionality, degree caps, no
    /// self-loops or duplicates, live references, entry-point maximality.
    ///
    /// Runs in O(nodes × edges); meant for tests and snapshot loading, not
    /// the hot path.
    pub(crate) fn validate_invariants(&self) -> Result<()> {
        if self.nodes.is_empty() {
            if self.entry_point.is_some() {
                return Err(Error::Internal("entry point set on empty graph".into()));
            }
            return Ok(());
        }

        let Some(entry) = self.entry_point else {
            return Err(Error::Internal("non-empty graph without entry point".into()));
        };
        let Some(entry_node) = self.nodes.get(&entry) else {
            return Err(Error::Internal(format!("entry point {entry} is dead")));
        };

        let max_level = self.nodes.values().map(|n| n.top_level).max().unwrap_or(0);
        if entry_node.top_level != max_level {
            return Err(Error::Internal(format!(
                "entry point at level {} but graph contains level {max_level}",
                entry_node.top_level
            )));
        }

        for (&id, node) in &self.nodes {
            if id >= self.next_id {
                return Err(Error::Internal(format!(
                    "node {id} at or above next_id {}",
                    self.next_id
                )));
            }
            if node.neighbors.len() != node.top_level + 1 {
                return Err(Error::Internal(format!(
                    "node {id}: {} layers for top level {}",
                    node.neighbors.len(),
                    node.top_level
                )));
            }
            for (layer, list) in node.neighbors.iter().enumerate() {
                let cap = self.cap_for(layer);
                if list.len() > cap {
                    return Err(Error::Internal(format!(
                        "node {id} layer {layer}: degree {} exceeds cap {cap}",
                        list.len()
                    )));
                }
                let mut seen = FxHashSet::default();
                for &neighbor in list {
                    if neighbor == id {
                        return Err(Error::Internal(format!("node {id}: self-loop at {layer}")));
                    }
                    if !seen.insert(neighbor) {
                        return Err(Error::Internal(format!(
                            "node {id} layer {layer}: duplicate neighbor {neighbor}"
                        )));
                    }
                    let Some(other) = self.nodes.get(&neighbor) else {
                        return Err(Error::Internal(format!(
                            "node {id} layer {layer}: dead neighbor {neighbor}"
                        )));
                    };
                    let reciprocal = other
                        .neighbors
                        .get(layer)
                        .is_some_and(|l| l.contains(&id));
                    if !reciprocal {
                        return Err(Error::Internal(format!(
                            "broken back-link: {id} -> {neighbor} at layer {layer}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Trips [`Error::Canceled`] once the deadline has passed.
#[inline]
fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(Error::Canceled),
        _ => Ok(()),
    }
}
