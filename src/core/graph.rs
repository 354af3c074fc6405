// core/graph.rs

// Per-scan navigation graph. Nodes are panorama viewpoints carrying a 3D position;
// undirected edges join mutually reachable viewpoints and are weighted by the
// Euclidean distance between them. Graphs are immutable once built.

// Dependencies
use log::debug;
use nalgebra::Vector3;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while building or loading a scan graph
#[derive(Debug, Error)]
pub enum GraphLoadError {
    /// The connectivity file could not be opened
    #[error("cannot read connectivity for scan {scan} at {}: {source}", .path.display())]
    Io {
        /// Scan id
        scan: String,
        /// File that was attempted
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },
    /// The connectivity file is not valid JSON or lacks required fields
    #[error("malformed connectivity for scan {scan}: {source}")]
    Parse {
        /// Scan id
        scan: String,
        /// Underlying failure
        #[source]
        source: serde_json::Error,
    },
    /// A single connectivity entry is inconsistent
    #[error("scan {scan}, viewpoint {viewpoint}: {reason}")]
    InvalidEntry {
        /// Scan id
        scan: String,
        /// Offending viewpoint
        viewpoint: String,
        /// What is wrong with it
        reason: String,
    },
    /// The same viewpoint id was declared twice
    #[error("scan {scan}: duplicate viewpoint {viewpoint}")]
    DuplicateNode {
        /// Scan id
        scan: String,
        /// Duplicated viewpoint
        viewpoint: String,
    },
    /// An edge names a viewpoint that was never declared
    #[error("scan {scan}: edge {from} - {to} references an undeclared viewpoint")]
    UnknownEndpoint {
        /// Scan id
        scan: String,
        /// Edge source
        from: String,
        /// Edge target
        to: String,
    },
    /// Edge weights must be finite and non-negative
    #[error("scan {scan}: edge {from} - {to} has invalid weight {weight}")]
    InvalidWeight {
        /// Scan id
        scan: String,
        /// Edge source
        from: String,
        /// Edge target
        to: String,
        /// Rejected weight
        weight: f64,
    },
    /// An in-memory store was asked for a scan it was never given
    #[error("scan {0} is not registered with this store")]
    NotRegistered(String),
}

/// Undirected weighted viewpoint graph of one scan
#[derive(Debug, Clone)]
pub struct ScanGraph {
    scan_id: String,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    positions: Vec<Vector3<f64>>,
    adjacency: Vec<Vec<(usize, f64)>>,
    edge_count: usize,
}

impl ScanGraph {
    /// Starts building a graph for `scan_id`
    pub fn builder(scan_id: impl Into<String>) -> ScanGraphBuilder {
        ScanGraphBuilder {
            scan_id: scan_id.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Scan identifier
    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Number of viewpoints
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when the graph has no viewpoints
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of undirected edges
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Dense index of a viewpoint
    pub fn node_index(&self, viewpoint: &str) -> Option<usize> {
        self.index.get(viewpoint).copied()
    }

    /// Viewpoint id at a dense index
    pub fn node_id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    /// Viewpoint ids in declaration order
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Whether `viewpoint` belongs to this scan
    pub fn contains(&self, viewpoint: &str) -> bool {
        self.index.contains_key(viewpoint)
    }

    /// 3D position of a viewpoint
    pub fn position(&self, viewpoint: &str) -> Option<&Vector3<f64>> {
        self.node_index(viewpoint).map(|i| &self.positions[i])
    }

    /// 3D position at a dense index
    pub fn position_at(&self, index: usize) -> &Vector3<f64> {
        &self.positions[index]
    }

    /// Neighbours of a dense index with edge weights, in insertion order
    pub fn neighbors(&self, index: usize) -> &[(usize, f64)] {
        &self.adjacency[index]
    }

    /// Builds the graph described by a connectivity file in `dir`
    pub fn load(dir: &Path, scan_id: &str) -> Result<Self, GraphLoadError> {
        let path = connectivity_path(dir, scan_id);
        let file = std::fs::File::open(&path).map_err(|source| GraphLoadError::Io {
            scan: scan_id.to_string(),
            path: path.clone(),
            source,
        })?;
        let graph = Self::from_connectivity_reader(scan_id, std::io::BufReader::new(file))?;
        debug!(
            "Loaded scan {} from {}: {} viewpoints, {} edges",
            scan_id,
            path.display(),
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Parses a connectivity description: a JSON array of viewpoint entries, each with a
    /// 4x4 row-major `pose` whose translation column is the position, an `included` flag,
    /// and an `unobstructed` list parallel to the array.
    pub fn from_connectivity_reader<R: Read>(scan_id: &str, reader: R) -> Result<Self, GraphLoadError> {
        let entries: Vec<ConnectivityEntry> =
            serde_json::from_reader(reader).map_err(|source| GraphLoadError::Parse {
                scan: scan_id.to_string(),
                source,
            })?;

        let mut builder = ScanGraph::builder(scan_id);
        for entry in entries.iter().filter(|e| e.included) {
            if entry.pose.len() < 12 {
                return Err(GraphLoadError::InvalidEntry {
                    scan: scan_id.to_string(),
                    viewpoint: entry.image_id.clone(),
                    reason: format!("pose has {} values, expected 16", entry.pose.len()),
                });
            }
            if entry.unobstructed.len() != entries.len() {
                return Err(GraphLoadError::InvalidEntry {
                    scan: scan_id.to_string(),
                    viewpoint: entry.image_id.clone(),
                    reason: format!(
                        "unobstructed lists {} viewpoints, scan has {}",
                        entry.unobstructed.len(),
                        entries.len()
                    ),
                });
            }
            builder = builder.node(
                entry.image_id.clone(),
                Vector3::new(entry.pose[3], entry.pose[7], entry.pose[11]),
            );
        }

        let mut seen = HashSet::new();
        for (i, entry) in entries.iter().enumerate().filter(|(_, e)| e.included) {
            for (j, open) in entry.unobstructed.iter().enumerate() {
                if !*open || !entries[j].included || i == j {
                    continue;
                }
                if seen.insert((i.min(j), i.max(j))) {
                    builder = builder.edge(entry.image_id.clone(), entries[j].image_id.clone());
                }
            }
        }
        builder.build()
    }
}

/// File holding a scan's connectivity
pub fn connectivity_path(dir: &Path, scan_id: &str) -> PathBuf {
    dir.join(format!("{}_connectivity.json", scan_id))
}

#[derive(Deserialize)]
struct ConnectivityEntry {
    image_id: String,
    pose: Vec<f64>,
    included: bool,
    unobstructed: Vec<bool>,
}

/// Incremental constructor for [`ScanGraph`]
#[derive(Debug, Clone)]
pub struct ScanGraphBuilder {
    scan_id: String,
    nodes: Vec<(String, Vector3<f64>)>,
    edges: Vec<(String, String, Option<f64>)>,
}

impl ScanGraphBuilder {
    /// Declares a viewpoint at `position`
    pub fn node(mut self, viewpoint: impl Into<String>, position: Vector3<f64>) -> Self {
        self.nodes.push((viewpoint.into(), position));
        self
    }

    /// Connects two viewpoints, weighted by their Euclidean distance
    pub fn edge(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        self.edges.push((a.into(), b.into(), None));
        self
    }

    /// Connects two viewpoints with an explicit weight
    pub fn weighted_edge(mut self, a: impl Into<String>, b: impl Into<String>, weight: f64) -> Self {
        self.edges.push((a.into(), b.into(), Some(weight)));
        self
    }

    /// Validates and freezes the graph
    pub fn build(self) -> Result<ScanGraph, GraphLoadError> {
        let scan = self.scan_id;
        let mut ids = Vec::with_capacity(self.nodes.len());
        let mut index = HashMap::with_capacity(self.nodes.len());
        let mut positions = Vec::with_capacity(self.nodes.len());
        for (id, position) in self.nodes {
            if index.contains_key(&id) {
                return Err(GraphLoadError::DuplicateNode { scan, viewpoint: id });
            }
            if !position.iter().all(|c| c.is_finite()) {
                return Err(GraphLoadError::InvalidEntry {
                    scan,
                    viewpoint: id,
                    reason: "position is not finite".to_string(),
                });
            }
            index.insert(id.clone(), ids.len());
            ids.push(id);
            positions.push(position);
        }

        let mut adjacency = vec![Vec::new(); ids.len()];
        let mut edge_count = 0;
        for (a, b, weight) in self.edges {
            let (Some(&ia), Some(&ib)) = (index.get(&a), index.get(&b)) else {
                return Err(GraphLoadError::UnknownEndpoint { scan, from: a, to: b });
            };
            let weight = weight.unwrap_or_else(|| (positions[ia] - positions[ib]).norm());
            if !weight.is_finite() || weight < 0.0 {
                return Err(GraphLoadError::InvalidWeight { scan, from: a, to: b, weight });
            }
            adjacency[ia].push((ib, weight));
            if ia != ib {
                adjacency[ib].push((ia, weight));
            }
            edge_count += 1;
        }

        Ok(ScanGraph {
            scan_id: scan,
            ids,
            index,
            positions,
            adjacency,
            edge_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(x: f64, y: f64, z: f64) -> String {
        format!("[1,0,0,{x},0,1,0,{y},0,0,1,{z},0,0,0,1]")
    }

    #[test]
    fn connectivity_skips_excluded_viewpoints() {
        let json = format!(
            r#"[
                {{"image_id": "a", "pose": {}, "included": true, "unobstructed": [false, true, true]}},
                {{"image_id": "b", "pose": {}, "included": true, "unobstructed": [true, false, false]}},
                {{"image_id": "c", "pose": {}, "included": false, "unobstructed": [true, false, false]}}
            ]"#,
            pose(0.0, 0.0, 0.0),
            pose(3.0, 4.0, 0.0),
            pose(1.0, 1.0, 0.0)
        );
        let graph = ScanGraph::from_connectivity_reader("s1", json.as_bytes()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert!(!graph.contains("c"));
        let a = graph.node_index("a").unwrap();
        assert_eq!(graph.neighbors(a).len(), 1);
        assert!((graph.neighbors(a)[0].1 - 5.0).abs() < 1e-12);
    }

    #[test]
    fn connectivity_missing_fields_is_parse_error() {
        let json = r#"[{"image_id": "a", "included": true}]"#;
        let err = ScanGraph::from_connectivity_reader("s1", json.as_bytes()).unwrap_err();
        assert!(matches!(err, GraphLoadError::Parse { .. }));
    }

    #[test]
    fn short_unobstructed_list_is_rejected() {
        let json = format!(
            r#"[{{"image_id": "a", "pose": {}, "included": true, "unobstructed": []}}]"#,
            pose(0.0, 0.0, 0.0)
        );
        let err = ScanGraph::from_connectivity_reader("s1", json.as_bytes()).unwrap_err();
        assert!(matches!(err, GraphLoadError::InvalidEntry { .. }));
    }

    #[test]
    fn builder_rejects_unknown_endpoint() {
        let err = ScanGraph::builder("s")
            .node("a", Vector3::zeros())
            .edge("a", "ghost")
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphLoadError::UnknownEndpoint { .. }));
    }

    #[test]
    fn builder_rejects_duplicate_node() {
        let err = ScanGraph::builder("s")
            .node("a", Vector3::zeros())
            .node("a", Vector3::x())
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphLoadError::DuplicateNode { .. }));
    }
}
