// core/oracle.rs

// All-pairs shortest paths for one scan. Dijkstra runs from every viewpoint and the
// resulting distance matrix and predecessor trees are kept for the lifetime of the
// process. Ties between equally short routes keep the first route discovered, with
// neighbours expanded in graph insertion order, so paths are deterministic.

use super::graph::ScanGraph;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use thiserror::Error;

/// Precondition violations reported by the distance oracle
#[derive(Debug, Error)]
pub enum OracleError {
    /// A viewpoint that is not part of the scan graph was referenced
    #[error("viewpoint {node} is not part of scan {scan}")]
    UnknownNode {
        /// Scan id
        scan: String,
        /// Missing viewpoint
        node: String,
    },
    /// Two viewpoints of the same scan have no connecting path
    #[error("scan {scan}: no path from {from} to {to}")]
    Unreachable {
        /// Scan id
        scan: String,
        /// Path source
        from: String,
        /// Path target
        to: String,
    },
    /// A nearest-node query was given no candidates
    #[error("scan {scan}: nearest-node query from {from} has no candidates")]
    NoCandidates {
        /// Scan id
        scan: String,
        /// Query source
        from: String,
    },
}

/// Shortest-path distances and routes between every pair of viewpoints of a scan
#[derive(Debug, Clone)]
pub struct DistanceTable {
    scan_id: String,
    ids: Vec<String>,
    index: HashMap<String, usize>,
    // Row-major n x n; `dist[src * n + dst]`
    dist: Vec<f64>,
    // Predecessor of `dst` on the shortest route from `src`
    pred: Vec<Option<usize>>,
}

#[derive(Debug, Clone, Copy)]
struct Frontier {
    cost: f64,
    seq: u64,
    node: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frontier {
    // Reversed so BinaryHeap pops the cheapest, oldest entry first
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl DistanceTable {
    /// Runs Dijkstra from every viewpoint of `graph`
    pub fn build(graph: &ScanGraph) -> Self {
        let n = graph.len();
        let mut dist = vec![f64::INFINITY; n * n];
        let mut pred = vec![None; n * n];

        for src in 0..n {
            let row = src * n;
            let mut settled = vec![false; n];
            let mut heap = BinaryHeap::new();
            let mut seq = 0u64;
            dist[row + src] = 0.0;
            heap.push(Frontier { cost: 0.0, seq, node: src });

            while let Some(Frontier { cost, node, .. }) = heap.pop() {
                if settled[node] {
                    continue;
                }
                settled[node] = true;
                for &(next, weight) in graph.neighbors(node) {
                    if settled[next] {
                        continue;
                    }
                    let candidate = cost + weight;
                    if candidate < dist[row + next] {
                        dist[row + next] = candidate;
                        pred[row + next] = Some(node);
                        seq += 1;
                        heap.push(Frontier { cost: candidate, seq, node: next });
                    }
                }
            }
        }

        let ids: Vec<String> = graph.node_ids().map(str::to_string).collect();
        let index = ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        DistanceTable {
            scan_id: graph.scan_id().to_string(),
            ids,
            index,
            dist,
            pred,
        }
    }

    /// Scan identifier
    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Whether the table covers `viewpoint`
    pub fn contains(&self, viewpoint: &str) -> bool {
        self.index.contains_key(viewpoint)
    }

    fn idx(&self, viewpoint: &str) -> Result<usize, OracleError> {
        self.index
            .get(viewpoint)
            .copied()
            .ok_or_else(|| OracleError::UnknownNode {
                scan: self.scan_id.clone(),
                node: viewpoint.to_string(),
            })
    }

    /// Shortest-path distance between two viewpoints
    pub fn distance(&self, a: &str, b: &str) -> Result<f64, OracleError> {
        let (ia, ib) = (self.idx(a)?, self.idx(b)?);
        let d = self.dist[ia * self.ids.len() + ib];
        if d.is_finite() {
            Ok(d)
        } else {
            Err(OracleError::Unreachable {
                scan: self.scan_id.clone(),
                from: a.to_string(),
                to: b.to_string(),
            })
        }
    }

    /// The candidate closest to `from` and its distance. Ties go to the earliest
    /// candidate; unreachable candidates are skipped.
    pub fn nearest<'c, S: AsRef<str>>(
        &self,
        from: &str,
        candidates: &'c [S],
    ) -> Result<(&'c str, f64), OracleError> {
        let src = self.idx(from)?;
        if candidates.is_empty() {
            return Err(OracleError::NoCandidates {
                scan: self.scan_id.clone(),
                from: from.to_string(),
            });
        }
        let n = self.ids.len();
        let mut best: Option<(&'c str, f64)> = None;
        for candidate in candidates {
            let candidate = candidate.as_ref();
            let d = self.dist[src * n + self.idx(candidate)?];
            if d.is_finite() && best.is_none_or(|(_, best_d)| d < best_d) {
                best = Some((candidate, d));
            }
        }
        best.ok_or_else(|| OracleError::Unreachable {
            scan: self.scan_id.clone(),
            from: from.to_string(),
            to: candidates
                .iter()
                .map(|c| c.as_ref())
                .collect::<Vec<_>>()
                .join(","),
        })
    }

    /// Shortest route from `a` to `b`, both endpoints included
    pub fn path(&self, a: &str, b: &str) -> Result<Vec<String>, OracleError> {
        Ok(self
            .path_indices(a, b)?
            .into_iter()
            .map(|i| self.ids[i].clone())
            .collect())
    }

    /// The node after `a` on the shortest route to `b`, or `None` when `a == b`
    pub fn next_hop(&self, a: &str, b: &str) -> Result<Option<&str>, OracleError> {
        let route = self.path_indices(a, b)?;
        Ok(route.get(1).map(|&i| self.ids[i].as_str()))
    }

    fn path_indices(&self, a: &str, b: &str) -> Result<Vec<usize>, OracleError> {
        // Distance check also surfaces unknown / unreachable endpoints
        self.distance(a, b)?;
        let (src, dst) = (self.idx(a)?, self.idx(b)?);
        let row = src * self.ids.len();
        let mut route = vec![dst];
        let mut cursor = dst;
        while cursor != src {
            match self.pred[row + cursor] {
                Some(p) => {
                    route.push(p);
                    cursor = p;
                }
                None => {
                    return Err(OracleError::Unreachable {
                        scan: self.scan_id.clone(),
                        from: a.to_string(),
                        to: b.to_string(),
                    });
                }
            }
        }
        route.reverse();
        Ok(route)
    }
}
