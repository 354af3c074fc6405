// core/mod.rs

// Declares the scan-level building blocks (graph, distance oracle, region labels,
// episode phase, trajectory-length memory) and the store that loads and caches them.
// Scans are loaded at most once per process and shared read-only afterwards.

pub mod graph;
pub mod memory;
pub mod oracle;
pub mod regions;
pub mod state;

// Re-export key types for a unified API
pub use graph::{GraphLoadError, ScanGraph, ScanGraphBuilder};
pub use memory::{TrajLenAccumulator, TrajLenEstimates};
pub use oracle::{DistanceTable, OracleError};
pub use regions::RegionMap;
pub use state::{EpisodePhase, EpisodeState};

// Imports for internal use
use log::info;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// A scan graph together with its all-pairs shortest paths
#[derive(Debug)]
pub struct ScanData {
    graph: ScanGraph,
    distances: DistanceTable,
}

impl ScanData {
    /// Computes the distance table for `graph`
    pub fn new(graph: ScanGraph) -> Self {
        let distances = DistanceTable::build(&graph);
        ScanData { graph, distances }
    }

    /// Scan identifier
    pub fn scan_id(&self) -> &str {
        self.graph.scan_id()
    }

    /// The navigation graph
    pub fn graph(&self) -> &ScanGraph {
        &self.graph
    }

    /// Shortest-path oracle for the scan
    pub fn distances(&self) -> &DistanceTable {
        &self.distances
    }
}

type Slot = Arc<Mutex<Option<Arc<ScanData>>>>;

/// Lazily-populated, process-wide cache of scans
///
/// Lookups of an already loaded scan only clone an `Arc`. A miss locks that scan's slot
/// while the graph is read and the distance table built, so concurrent requests for the
/// same scan wait for one load instead of duplicating it; other scans are unaffected.
#[derive(Debug)]
pub struct ScanStore {
    connectivity_dir: Option<PathBuf>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ScanStore {
    /// Store backed by `<connectivity_dir>/<scan>_connectivity.json` files
    pub fn new(connectivity_dir: impl Into<PathBuf>) -> Self {
        ScanStore {
            connectivity_dir: Some(connectivity_dir.into()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Store holding only graphs registered through [`ScanStore::insert`]
    pub fn in_memory() -> Self {
        ScanStore {
            connectivity_dir: None,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, scan_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(scan_id.to_string()).or_default().clone()
    }

    /// Registers an already built graph, replacing nothing that is loaded
    pub fn insert(&self, graph: ScanGraph) -> Arc<ScanData> {
        let slot = self.slot(graph.scan_id());
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get_or_insert_with(|| Arc::new(ScanData::new(graph))).clone()
    }

    /// Returns the scan, loading it on first use
    pub fn load(&self, scan_id: &str) -> Result<Arc<ScanData>, GraphLoadError> {
        let slot = self.slot(scan_id);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(data) = guard.as_ref() {
            return Ok(data.clone());
        }
        let dir = self
            .connectivity_dir
            .as_ref()
            .ok_or_else(|| GraphLoadError::NotRegistered(scan_id.to_string()))?;
        let started = Instant::now();
        let data = Arc::new(ScanData::new(ScanGraph::load(dir, scan_id)?));
        info!(
            "Loaded navigation graph for scan {} ({} viewpoints) in {:.2?}",
            scan_id,
            data.graph().len(),
            started.elapsed()
        );
        *guard = Some(data.clone());
        Ok(data)
    }

    /// Loads every listed scan, in parallel
    pub fn load_all<S: AsRef<str> + Sync>(&self, scan_ids: &[S]) -> Result<(), GraphLoadError> {
        scan_ids
            .par_iter()
            .try_for_each(|scan| self.load(scan.as_ref()).map(|_| ()))
    }

    /// The scan if it is already loaded
    pub fn get(&self, scan_id: &str) -> Option<Arc<ScanData>> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scan_id)
            .cloned()?;
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Ids of every loaded scan, sorted
    pub fn loaded_scans(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut loaded: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().unwrap_or_else(PoisonError::into_inner).is_some())
            .map(|(k, _)| k)
            .collect();
        loaded.sort();
        loaded
    }
}
