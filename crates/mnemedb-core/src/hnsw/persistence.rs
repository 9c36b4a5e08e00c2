//! Index persistence (save/load).
//!
//! Snapshots are a versioned binary blob: a 4-byte magic, a little-endian
//! `u16` version, then a bincode body holding parameters, the id counter,
//! the entry point, all nodes, and all adjacency lists. Node metadata is
//! embedded as opaque JSON bytes; that choice is fixed for version 2.
//!
//! Writes are atomic: the snapshot goes to `<path>.tmp` in the same
//! directory, is fsynced, and is renamed over the target. Loading refuses
//! unknown magics and any version above [`SNAPSHOT_VERSION`]; version 1
//! files (which predate metadata) load with empty metadata, leaving those
//! nodes exempt from age-based pruning until re-inserted.

use super::graph::{GraphCore, Metadata, Node, NodeId};
use super::index::{HnswIndex, IndexState};
use super::params::HnswParams;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::events::OpKind;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Instant;

/// Leading file identifier.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"HNSW";
/// Current snapshot version.
pub const SNAPSHOT_VERSION: u16 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotParams {
    m: u64,
    m0: u64,
    ef_construction: u64,
    ef_search: u64,
    ml: f64,
    metric_tag: u8,
    dimension: Option<u64>,
    max_elements: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotNode {
    id: u64,
    top_level: u16,
    vector: Vec<f32>,
    metadata: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEdges {
    id: u64,
    layers: Vec<Vec<u64>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBody {
    params: SnapshotParams,
    next_id: u64,
    entry_point: Option<u64>,
    nodes: Vec<SnapshotNode>,
    edges: Vec<SnapshotEdges>,
}

// Version 1 predates per-node metadata.
#[derive(Debug, Deserialize)]
struct SnapshotNodeV1 {
    id: u64,
    top_level: u16,
    vector: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct SnapshotBodyV1 {
    params: SnapshotParams,
    next_id: u64,
    entry_point: Option<u64>,
    nodes: Vec<SnapshotNodeV1>,
    edges: Vec<SnapshotEdges>,
}

/// Clears the persist-in-progress flag even on the error paths.
struct PersistGuard<'a>(&'a HnswIndex);

impl Drop for PersistGuard<'_> {
    fn drop(&mut self) {
        self.0.persist_guard.store(false, Ordering::Release);
        self.0.settle_state();
    }
}

impl HnswIndex {
    /// Writes a snapshot to `path`, or to the configured persist path when
    /// `path` is `None`.
    ///
    /// The in-memory state is serialized under a read lock, so concurrent
    /// searches keep running; the disk write happens with no lock held.
    ///
    /// # Errors
    ///
    /// [`Error::PersistInProgress`] if another persist is mid-flight,
    /// [`Error::Config`] when no path is available, [`Error::Io`] on disk
    /// failure. The index is unchanged on failure.
    pub fn persist(&self, path: Option<&Path>) -> Result<()> {
        let started = Instant::now();
        let target = match path.or(self.persist_path.as_deref()) {
            Some(p) => p.to_path_buf(),
            None => return Err(Error::Config("no persist path configured".into())),
        };

        if self
            .persist_guard
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::PersistInProgress);
        }
        let _guard = PersistGuard(self);
        self.state
            .store(IndexState::Persisting as u8, Ordering::Release);

        let bytes = {
            let core = self.core.read();
            encode_snapshot(&core)?
        };

        let result = write_atomic(&target, &bytes);
        self.emit(OpKind::Persist, started, result.is_ok(), bytes.len());
        result
    }

    /// Loads an index from a snapshot file.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] when the file cannot be read,
    /// [`Error::VersionMismatch`] for snapshots newer than this build, and
    /// [`Error::Corrupt`] for bad magic, undecodable bodies, or graphs that
    /// fail invariant validation.
    pub fn load(path: &Path) -> Result<Self> {
        let started = Instant::now();
        let bytes = fs::read(path)?;
        let core = decode_snapshot(&bytes)?;

        core.validate_invariants()
            .map_err(|e| Error::Corrupt(format!("invariant check failed: {e}")))?;

        let index = Self::from_core(core);
        index.emit(OpKind::Load, started, true, index.len());
        Ok(index)
    }
}

#[allow(clippy::cast_possible_truncation)] // top_level is capped at 16
fn encode_snapshot(core: &GraphCore) -> Result<Vec<u8>> {
    let params = core.params();
    let mut nodes: Vec<SnapshotNode> = Vec::with_capacity(core.len());
    let mut edges: Vec<SnapshotEdges> = Vec::with_capacity(core.len());

    let mut ids: Vec<NodeId> = core.iter_nodes().map(|(id, _)| id).collect();
    ids.sort_unstable();

    for id in ids {
        let node = core
            .node(id)
            .ok_or_else(|| Error::Internal(format!("node {id} vanished during encode")))?;
        let metadata = if node.metadata.is_empty() {
            Vec::new()
        } else {
            serde_json::to_vec(&node.metadata)
                .map_err(|e| Error::Internal(format!("metadata encode: {e}")))?
        };
        nodes.push(SnapshotNode {
            id,
            top_level: node.top_level as u16,
            vector: node.vector.clone(),
            metadata,
        });
        edges.push(SnapshotEdges {
            id,
            layers: node.neighbors.clone(),
        });
    }

    let body = SnapshotBody {
        params: SnapshotParams {
            m: params.m as u64,
            m0: params.m0() as u64,
            ef_construction: params.ef_construction as u64,
            ef_search: params.ef_search as u64,
            ml: params.ml,
            metric_tag: params.metric.tag(),
            dimension: core.dimension().map(|d| d as u64),
            max_elements: params.max_elements.map(|m| m as u64),
        },
        next_id: core.next_id(),
        entry_point: core.entry_point(),
        nodes,
        edges,
    };

    let mut out = Vec::with_capacity(64 + core.len() * 64);
    out.extend_from_slice(&SNAPSHOT_MAGIC);
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    bincode::serialize_into(&mut out, &body)
        .map_err(|e| Error::Internal(format!("snapshot encode: {e}")))?;
    Ok(out)
}

fn decode_snapshot(bytes: &[u8]) -> Result<GraphCore> {
    if bytes.len() < 6 {
        return Err(Error::Corrupt("file shorter than header".into()));
    }
    if bytes[0..4] != SNAPSHOT_MAGIC {
        return Err(Error::Corrupt("unknown magic".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version > SNAPSHOT_VERSION {
        return Err(Error::VersionMismatch {
            found: version,
            supported: SNAPSHOT_VERSION,
        });
    }

    let body = match version {
        SNAPSHOT_VERSION => bincode::deserialize::<SnapshotBody>(&bytes[6..])
            .map_err(|e| Error::Corrupt(format!("body decode: {e}")))?,
        1 => upgrade_v1(
            bincode::deserialize::<SnapshotBodyV1>(&bytes[6..])
                .map_err(|e| Error::Corrupt(format!("v1 body decode: {e}")))?,
        ),
        _ => return Err(Error::Corrupt(format!("unsupported version {version}"))),
    };

    rebuild_core(body)
}

/// v1 nodes carry no metadata; they load empty and stay exempt from
/// age-based pruning until re-inserted.
fn upgrade_v1(body: SnapshotBodyV1) -> SnapshotBody {
    SnapshotBody {
        params: body.params,
        next_id: body.next_id,
        entry_point: body.entry_point,
        nodes: body
            .nodes
            .into_iter()
            .map(|n| SnapshotNode {
                id: n.id,
                top_level: n.top_level,
                vector: n.vector,
                metadata: Vec::new(),
            })
            .collect(),
        edges: body.edges,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn rebuild_core(body: SnapshotBody) -> Result<GraphCore> {
    let metric = DistanceMetric::from_tag(body.params.metric_tag)
        .ok_or_else(|| Error::Corrupt(format!("unknown metric tag {}", body.params.metric_tag)))?;

    let params = HnswParams {
        m: body.params.m as usize,
        ef_construction: body.params.ef_construction as usize,
        ef_search: body.params.ef_search as usize,
        ml: body.params.ml,
        metric,
        dimension: body.params.dimension.map(|d| d as usize),
        max_elements: body.params.max_elements.map(|m| m as usize),
    };
    params
        .validate()
        .map_err(|e| Error::Corrupt(format!("invalid persisted params: {e}")))?;
    if body.params.m0 != params.m0() as u64 {
        return Err(Error::Corrupt(format!(
            "m0 {} does not match 2*m {}",
            body.params.m0,
            params.m0()
        )));
    }

    let mut adjacency: FxHashMap<u64, Vec<Vec<NodeId>>> = FxHashMap::default();
    for edge in body.edges {
        if adjacency.insert(edge.id, edge.layers).is_some() {
            return Err(Error::Corrupt(format!("duplicate edge record for {}", edge.id)));
        }
    }

    let dimension = params.dimension;
    let mut dimension_seen = dimension;
    let mut nodes: FxHashMap<NodeId, Node> = FxHashMap::default();
    for snapshot_node in body.nodes {
        let id = snapshot_node.id;
        if id >= body.next_id {
            return Err(Error::Corrupt(format!(
                "node {id} at or above next_id {}",
                body.next_id
            )));
        }
        match dimension_seen {
            None => dimension_seen = Some(snapshot_node.vector.len()),
            Some(d) if d != snapshot_node.vector.len() => {
                return Err(Error::Corrupt(format!(
                    "node {id}: dimension {} differs from {d}",
                    snapshot_node.vector.len()
                )));
            }
            Some(_) => {}
        }

        let metadata: Metadata = if snapshot_node.metadata.is_empty() {
            Metadata::new()
        } else {
            serde_json::from_slice(&snapshot_node.metadata)
                .map_err(|e| Error::Corrupt(format!("node {id} metadata: {e}")))?
        };

        let top_level = snapshot_node.top_level as usize;
        let neighbors = adjacency.remove(&id).unwrap_or_default();
        let neighbors = if neighbors.is_empty() {
            vec![Vec::new(); top_level + 1]
        } else if neighbors.len() == top_level + 1 {
            neighbors
        } else {
            return Err(Error::Corrupt(format!(
                "node {id}: {} edge layers for top level {top_level}",
                neighbors.len()
            )));
        };

        let previous = nodes.insert(
            id,
            Node {
                vector: snapshot_node.vector,
                metadata,
                top_level,
                neighbors,
            },
        );
        if previous.is_some() {
            return Err(Error::Corrupt(format!("duplicate node record for {id}")));
        }
    }

    if let Some(stray) = adjacency.keys().next() {
        return Err(Error::Corrupt(format!("edge record for unknown node {stray}")));
    }

    Ok(GraphCore::from_parts(
        params,
        dimension_seen,
        nodes,
        body.next_id,
        body.entry_point,
        0x9E37_79B9_7F4A_7C15,
    ))
}

/// Write-to-temp, fsync, rename-over-target.
fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = match target.file_name() {
        Some(name) => {
            let mut tmp_name = name.to_os_string();
            tmp_name.push(".tmp");
            target.with_file_name(tmp_name)
        }
        None => return Err(Error::Config(format!("invalid persist path {target:?}"))),
    };

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, target)?;
    Ok(())
}
