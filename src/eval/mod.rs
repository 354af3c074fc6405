//! Trajectory scoring for mpnav
//!
//! Scores recorded agent trajectories against ground-truth tasks using oracle
//! distances:
//! - Navigation error from the final node to each goal tier
//! - Pass-through ("oracle") error from the nearest visited node
//! - Room-level success when region labels are available
//! - Ordering buckets for two-tier tasks, and wrong-order scores when the priority
//!   was not stated explicitly

pub mod summary;

pub use summary::summarize;

use crate::core::{DistanceTable, GraphLoadError, OracleError, RegionMap, ScanStore};
use crate::dataset::{AgentResult, DatasetError, Goals, Task, TrajectoryPoint};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// How the priority of two-tier tasks was conveyed to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// The instruction states the order; only first-then-second counts
    Explicit,
    /// No stated order; trajectories are also scored against swapped tiers
    Implicit,
}

/// Scoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Maximum oracle distance counted as reaching a goal
    pub success_radius: f64,
    /// Ordering policy of two-tier tasks
    pub ordering: OrderingPolicy,
    /// Count second-then-first completion as success (implicit policy only)
    pub accept_wrong_order: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            success_radius: 2.0,
            ordering: OrderingPolicy::Explicit,
            accept_wrong_order: false,
        }
    }
}

impl EvalConfig {
    /// Whether an error is within the success radius
    pub fn is_success(&self, error: f64) -> bool {
        error <= self.success_radius
    }
}

/// Scoring errors; all are fatal for the pass
#[derive(Debug, Error)]
pub enum ScoreError {
    /// Trajectory does not begin at the task's start viewpoint
    #[error("trajectory for {instr_id} starts at {actual}, expected {expected}")]
    StartMismatch {
        /// Instruction id
        instr_id: String,
        /// Start viewpoint of the task
        expected: String,
        /// First viewpoint of the trajectory
        actual: String,
    },
    /// Some expected instruction ids were not submitted
    #[error("Missing {missing} of {total} instruction ids from {splits} - not in {source_name}")]
    MissingInstructions {
        /// Ids not found
        missing: usize,
        /// Ids expected
        total: usize,
        /// Splits the ground truth came from
        splits: String,
        /// Where the results came from
        source_name: String,
    },
    /// Scoring requested for an id with no ground truth
    #[error("no ground truth for instruction {0}")]
    UnknownInstruction(String),
    /// Implicit-priority scoring of a task without ordering lengths
    #[error("task {0} has no short/long path lengths")]
    MissingPathLengths(String),
    /// Goals of one tier lie in different or unlabelled regions
    #[error("goals of task {0} do not share one labelled region")]
    AmbiguousGoalRegion(String),
    /// Oracle query failed
    #[error(transparent)]
    Oracle(#[from] OracleError),
    /// Scan or region data could not be loaded
    #[error(transparent)]
    Graph(#[from] GraphLoadError),
    /// Results file could not be read
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// Which tiers of a two-tier task succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingBucket {
    /// First tier only
    FirstOnly,
    /// Second tier only
    SecondOnly,
    /// Both tiers
    Both,
    /// Neither tier
    Neither,
}

impl OrderingBucket {
    /// Bucket of two independent success checks
    pub fn classify(first: bool, second: bool) -> Self {
        match (first, second) {
            (true, false) => OrderingBucket::FirstOnly,
            (false, true) => OrderingBucket::SecondOnly,
            (true, true) => OrderingBucket::Both,
            (false, false) => OrderingBucket::Neither,
        }
    }
}

/// Scores of the same trajectory against swapped tiers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WrongOrderScore {
    /// Final node to the first-tier goals
    pub first_nav_error: f64,
    /// Nearest visited node to the second-tier goals
    pub second_nav_error: f64,
    /// Steps of the natural ordering's reference trajectory
    pub short_steps: usize,
    /// Steps of the reversed ordering's reference trajectory
    pub long_steps: usize,
}

/// Two-tier part of a score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwoTierScore {
    /// Nearest visited node to the first-tier goals
    pub first_nav_error: f64,
    /// Region of the visited node nearest the first tier matches its goal region
    pub first_room_success: Option<bool>,
    /// Ordering bucket
    pub bucket: OrderingBucket,
    /// Swapped-tier scores, implicit policy only
    pub wrong_order: Option<WrongOrderScore>,
}

/// Metrics of one scored trajectory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    /// Instruction id
    pub instr_id: String,
    /// Actions taken
    pub steps: usize,
    /// Oracle length of the walked path
    pub length: f64,
    /// Final node to the goals of the single (or second) tier
    pub nav_error: f64,
    /// Nearest visited node to the goals of the single (or second) tier
    pub oracle_error: f64,
    /// Final region matches the single (or second) tier's goal region
    pub room_success: Option<bool>,
    /// Present for two-tier tasks
    pub two_tier: Option<TwoTierScore>,
}

impl ScoreRecord {
    /// Whether the trajectory ends within the success radius of its final tier.
    ///
    /// Second-then-first completion of a two-tier task also counts when the wrong order
    /// is accepted. The in-order requirement is reported by the ordering buckets.
    pub fn is_success(&self, config: &EvalConfig) -> bool {
        config.is_success(self.nav_error) || (config.accept_wrong_order && self.wrong_order(config))
    }

    /// Whether the trajectory ends on the second tier after passing through the first
    pub fn correct_order(&self, config: &EvalConfig) -> bool {
        config.is_success(self.nav_error)
            && self
                .two_tier
                .as_ref()
                .is_some_and(|t| config.is_success(t.first_nav_error))
    }

    /// Whether the trajectory ends on the first tier after passing through the second,
    /// without ending on the second
    pub fn wrong_order(&self, config: &EvalConfig) -> bool {
        !config.is_success(self.nav_error)
            && self
                .two_tier
                .as_ref()
                .and_then(|t| t.wrong_order.as_ref())
                .is_some_and(|w| {
                    config.is_success(w.first_nav_error) && config.is_success(w.second_nav_error)
                })
    }
}

/// Result of a scoring pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    /// Metric name to value
    pub summary: BTreeMap<String, f64>,
    /// Per-instruction scores, in submission order
    pub records: Vec<ScoreRecord>,
    /// Per-instruction success
    pub is_success: Vec<(String, bool)>,
}

/// Scorer over a set of ground-truth tasks
pub struct Evaluation {
    store: Arc<ScanStore>,
    config: EvalConfig,
    splits: Vec<String>,
    gt: HashMap<String, Task>,
    regions: HashMap<String, RegionMap>,
}

impl Evaluation {
    /// Indexes `tasks` by instruction id and loads their scans
    pub fn new(
        store: Arc<ScanStore>,
        config: &EvalConfig,
        tasks: Vec<Task>,
        splits: Vec<String>,
    ) -> Result<Self, ScoreError> {
        let mut scans: Vec<&str> = tasks.iter().map(|t| t.scan.as_str()).collect();
        scans.sort_unstable();
        scans.dedup();
        store.load_all(&scans)?;
        let gt: HashMap<String, Task> = tasks
            .into_iter()
            .map(|t| (t.instr_id.clone(), t))
            .collect();
        info!("Evaluation over {} instructions from {}", gt.len(), splits.join(","));
        Ok(Evaluation {
            store,
            config: config.clone(),
            splits,
            gt,
            regions: HashMap::new(),
        })
    }

    /// Loads region labels for every scan in the ground truth
    pub fn load_regions(&mut self, dir: &Path) -> Result<(), ScoreError> {
        let scans: HashSet<String> = self.gt.values().map(|t| t.scan.clone()).collect();
        for scan in scans {
            let map = RegionMap::load(dir, &scan)?;
            self.regions.insert(scan, map);
        }
        Ok(())
    }

    /// Uses `regions` as the labels of `scan`
    pub fn set_regions(&mut self, scan: impl Into<String>, regions: RegionMap) {
        self.regions.insert(scan.into(), regions);
    }

    /// Scoring settings
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Number of expected instruction ids
    pub fn len(&self) -> usize {
        self.gt.len()
    }

    /// True when there is no ground truth
    pub fn is_empty(&self) -> bool {
        self.gt.is_empty()
    }

    /// Scores one trajectory
    pub fn score_item(&self, instr_id: &str, trajectory: &[TrajectoryPoint]) -> Result<ScoreRecord, ScoreError> {
        let task = self
            .gt
            .get(instr_id)
            .ok_or_else(|| ScoreError::UnknownInstruction(instr_id.to_string()))?;
        let start = trajectory.first().map(|p| p.viewpoint.as_str()).unwrap_or_default();
        let Some(last) = trajectory.last().filter(|_| start == task.start_viewpoint) else {
            return Err(ScoreError::StartMismatch {
                instr_id: instr_id.to_string(),
                expected: task.start_viewpoint.clone(),
                actual: start.to_string(),
            });
        };
        let scan = self.store.load(&task.scan)?;
        let table = scan.distances();
        let regions = self.regions.get(&task.scan);
        let final_pos = last.viewpoint.as_str();

        let mut length = 0.0;
        for pair in trajectory.windows(2) {
            length += table.distance(&pair[0].viewpoint, &pair[1].viewpoint)?;
        }
        let steps = trajectory.len() - 1;

        let room_success = |goals: &[String], node: &str| -> Result<Option<bool>, ScoreError> {
            let Some(regions) = regions else {
                return Ok(None);
            };
            let goal_region = regions
                .common_region(goals)
                .ok_or_else(|| ScoreError::AmbiguousGoalRegion(instr_id.to_string()))?;
            Ok(Some(regions.region_of(node) == Some(goal_region)))
        };

        match &task.goals {
            Goals::Single { goals } => {
                let (_, nav_error) = table.nearest(final_pos, goals)?;
                let (oracle_error, _) = pass_through(table, trajectory, goals)?;
                Ok(ScoreRecord {
                    instr_id: instr_id.to_string(),
                    steps,
                    length,
                    nav_error,
                    oracle_error,
                    room_success: room_success(goals, final_pos)?,
                    two_tier: None,
                })
            }
            Goals::Dual { first, second } => {
                let (first_nav_error, first_pos) = pass_through(table, trajectory, first)?;
                let (_, second_nav_error) = table.nearest(final_pos, second)?;
                let (oracle_error, _) = pass_through(table, trajectory, second)?;
                let bucket = OrderingBucket::classify(
                    self.config.is_success(first_nav_error),
                    self.config.is_success(second_nav_error),
                );
                let wrong_order = match self.config.ordering {
                    OrderingPolicy::Explicit => None,
                    OrderingPolicy::Implicit => {
                        let (Some(short), Some(long)) = (task.short_path_length, task.long_path_length) else {
                            return Err(ScoreError::MissingPathLengths(instr_id.to_string()));
                        };
                        Some(WrongOrderScore {
                            first_nav_error: table.nearest(final_pos, first)?.1,
                            second_nav_error: pass_through(table, trajectory, second)?.0,
                            short_steps: short.saturating_sub(1),
                            long_steps: long.saturating_sub(1),
                        })
                    }
                };
                Ok(ScoreRecord {
                    instr_id: instr_id.to_string(),
                    steps,
                    length,
                    nav_error: second_nav_error,
                    oracle_error,
                    room_success: room_success(second, final_pos)?,
                    two_tier: Some(TwoTierScore {
                        first_nav_error,
                        first_room_success: room_success(first, first_pos)?,
                        bucket,
                        wrong_order,
                    }),
                })
            }
        }
    }

    /// Scores submitted results.
    ///
    /// Every expected id must appear; repeated and unknown ids are ignored after the
    /// first occurrence. `source_name` names the results in the missing-id error.
    pub fn score(&self, results: &[AgentResult], source_name: &str) -> Result<EvalReport, ScoreError> {
        let mut remaining: HashSet<&str> = self.gt.keys().map(String::as_str).collect();
        let mut selected = Vec::with_capacity(results.len());
        for result in results {
            if remaining.remove(result.instr_id.as_str()) {
                selected.push(result);
            }
        }
        if !remaining.is_empty() {
            return Err(ScoreError::MissingInstructions {
                missing: remaining.len(),
                total: self.gt.len(),
                splits: self.splits.join(","),
                source_name: source_name.to_string(),
            });
        }
        if selected.len() < results.len() {
            warn!(
                "Ignored {} duplicate or unexpected results in {}",
                results.len() - selected.len(),
                source_name
            );
        }

        let records: Vec<ScoreRecord> = selected
            .par_iter()
            .map(|r| self.score_item(&r.instr_id, &r.trajectory))
            .collect::<Result<_, _>>()?;
        let is_success = records
            .iter()
            .map(|r| (r.instr_id.clone(), r.is_success(&self.config)))
            .collect();
        let summary = summarize(&records, &self.config, !self.regions.is_empty());
        info!("Scored {} trajectories from {}", records.len(), source_name);
        Ok(EvalReport {
            summary,
            records,
            is_success,
        })
    }

    /// Reads a results file and scores it
    pub fn score_file(&self, path: impl AsRef<Path>) -> Result<EvalReport, ScoreError> {
        let path = path.as_ref();
        let results = crate::dataset::load_results(path)?;
        self.score(&results, &path.display().to_string())
    }
}

// Smallest distance from any visited node to any goal, and the node achieving it.
// Ties keep the earlier goal, then the earlier node.
fn pass_through<'t>(
    table: &DistanceTable,
    trajectory: &'t [TrajectoryPoint],
    goals: &[String],
) -> Result<(f64, &'t str), ScoreError> {
    let mut best: Option<(f64, &'t str)> = None;
    for goal in goals {
        for point in trajectory {
            let d = table.distance(&point.viewpoint, goal)?;
            if best.is_none_or(|(best_d, _)| d < best_d) {
                best = Some((d, point.viewpoint.as_str()));
            }
        }
    }
    best.ok_or_else(|| {
        ScoreError::Oracle(OracleError::NoCandidates {
            scan: table.scan_id().to_string(),
            from: trajectory.first().map(|p| p.viewpoint.clone()).unwrap_or_default(),
        })
    })
}
