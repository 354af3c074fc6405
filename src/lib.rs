//! mpnav - Multi-Priority Navigation oracle
//!
//! This library provides the shortest-path oracle over per-scan panorama graphs, the
//! discrete action planner and multi-goal episode driver built on it, the query budget
//! estimator, and the trajectory scorer used to evaluate recorded agent trajectories.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod budget;
pub mod core;
pub mod dataset;
pub mod eval;
pub mod navigation;
pub mod sim_interface;

// Re-export commonly used items for easier access
pub use crate::core::{
    DistanceTable, EpisodePhase, EpisodeState, GraphLoadError, OracleError, RegionMap, ScanData,
    ScanGraph, ScanStore, TrajLenAccumulator, TrajLenEstimates,
};
pub use budget::{BudgetConfig, BudgetError, KeyBasis, QueryBudget, TaskClassKey};
pub use dataset::{AgentResult, DatasetError, Goals, SourceTask, Task, TrajectoryPoint};
pub use eval::{EvalConfig, EvalReport, Evaluation, OrderingPolicy, ScoreError, ScoreRecord};
pub use navigation::{
    Action, ActionPlanner, EpisodeConfig, EpisodeDriver, EpisodeOutcome, GenerationConfig,
    NavigationError, RolloutBatch, TaskGenerator,
};
pub use sim_interface::{GraphSimulator, SimError, SimState, Simulator, SimulatorConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main configuration structure for mpnav
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MpnavConfig {
    /// Where scan data lives on disk
    pub data: DataConfig,
    /// Camera model of the in-process simulator
    pub simulator: SimulatorConfig,
    /// Episode driver limits
    pub episode: EpisodeConfig,
    /// Two-tier task synthesis
    pub generation: GenerationConfig,
    /// Time and help-request budgeting
    pub budget: BudgetConfig,
    /// Trajectory scoring
    pub eval: EvalConfig,
}

/// Locations of the static scan data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding `<scan>_connectivity.json` files
    pub connectivity_dir: PathBuf,
    /// Directory holding `<scan>_regions.json` viewpoint labels, if room metrics are wanted
    pub region_dir: Option<PathBuf>,
    /// Directory holding dataset splits
    pub data_dir: PathBuf,
    /// Split file prefix, `<prefix>_<split>.json`
    pub split_prefix: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            connectivity_dir: PathBuf::from("data/connectivity"),
            region_dir: None,
            data_dir: PathBuf::from("data/asknav"),
            split_prefix: "asknav".to_string(),
        }
    }
}

impl MpnavConfig {
    /// Reads a YAML configuration file; missing sections take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MpnavError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            MpnavError::Config(format!("cannot open {}: {}", path.display(), e))
        })?;
        let config: MpnavConfig = serde_yaml::from_reader(file)
            .map_err(|e| MpnavError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Rejects settings no episode could run under.
    pub fn validate(&self) -> Result<(), MpnavError> {
        if self.episode.max_steps == 0 {
            return Err(MpnavError::Config("episode.max_steps must be positive".into()));
        }
        if self.generation.single_min_steps > self.generation.single_max_steps {
            return Err(MpnavError::Config(format!(
                "generation.single_min_steps ({}) exceeds single_max_steps ({})",
                self.generation.single_min_steps, self.generation.single_max_steps
            )));
        }
        if !(self.eval.success_radius >= 0.0) {
            return Err(MpnavError::Config("eval.success_radius must be non-negative".into()));
        }
        if !(self.budget.query_ratio >= 0.0) || self.budget.n_subgoal_steps == 0 {
            return Err(MpnavError::Config(
                "budget.query_ratio must be non-negative and n_subgoal_steps positive".into(),
            ));
        }
        if !(self.budget.max_episode_length > 0.0) {
            return Err(MpnavError::Config("budget.max_episode_length must be positive".into()));
        }
        if !(self.simulator.vfov_degrees > 0.0 && self.simulator.vfov_degrees < 180.0) {
            return Err(MpnavError::Config("simulator.vfov_degrees must lie in (0, 180)".into()));
        }
        Ok(())
    }
}

/// mpnav error types
#[derive(Debug, Error)]
pub enum MpnavError {
    /// Connectivity data could not be loaded
    #[error(transparent)]
    Graph(#[from] GraphLoadError),
    /// Distance oracle precondition violated
    #[error(transparent)]
    Oracle(#[from] OracleError),
    /// Simulator collaborator failure
    #[error(transparent)]
    Sim(#[from] SimError),
    /// Planning or episode driving failed
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    /// Budget estimation failed
    #[error(transparent)]
    Budget(#[from] BudgetError),
    /// Scoring pass failed
    #[error(transparent)]
    Score(#[from] ScoreError),
    /// Dataset file could not be read or written
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}
