//! Navigation system for mpnav
//!
//! This module turns shortest paths into discrete simulator actions and drives
//! multi-goal episodes with them:
//! - [`ActionPlanner`] picks the next action towards the nearest active goal
//! - [`EpisodeDriver`] replays the planner against a simulator until termination
//! - [`TaskGenerator`] assembles two-tier tasks from single-goal ones
//! - [`RolloutBatch`] steps a batch of learner episodes in parallel

pub mod controller;
pub mod generator;
pub mod planner;
pub mod rollout;

pub use controller::{EpisodeConfig, EpisodeDriver, EpisodeOutcome};
pub use generator::{
    CandidateOutcome, GenerationConfig, GenerationStats, GenerationVariant, Rejection,
    TaskGenerator,
};
pub use planner::ActionPlanner;
pub use rollout::{Observation, RolloutBatch};

use crate::core::{GraphLoadError, OracleError};
use crate::sim_interface::SimError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Simulator action encoding: (navigable index, heading delta, elevation delta)
pub type ActionTriple = (usize, i32, i32);

/// One discrete agent action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Move to the navigable location at this index (never 0)
    Move(usize),
    /// Rotate one heading bucket clockwise
    TurnRight,
    /// Rotate one heading bucket counter-clockwise
    TurnLeft,
    /// Tilt one elevation row up
    LookUp,
    /// Tilt one elevation row down
    LookDown,
    /// Declare the active goal reached
    Stop,
}

impl Action {
    /// Encodes the action as a simulator triple
    pub fn triple(self) -> ActionTriple {
        match self {
            Action::Move(index) => (index, 0, 0),
            Action::TurnRight => (0, 1, 0),
            Action::TurnLeft => (0, -1, 0),
            Action::LookUp => (0, 0, 1),
            Action::LookDown => (0, 0, -1),
            Action::Stop => (0, 0, 0),
        }
    }

    /// Decodes a simulator triple
    pub fn from_triple(triple: ActionTriple) -> Result<Self, NavigationError> {
        match triple {
            (0, 0, 0) => Ok(Action::Stop),
            (0, 1, 0) => Ok(Action::TurnRight),
            (0, -1, 0) => Ok(Action::TurnLeft),
            (0, 0, 1) => Ok(Action::LookUp),
            (0, 0, -1) => Ok(Action::LookDown),
            (index, 0, 0) => Ok(Action::Move(index)),
            other => Err(NavigationError::InvalidTriple(other)),
        }
    }

    /// Whether the action ends a goal tier
    pub fn is_stop(self) -> bool {
        self == Action::Stop
    }
}

/// Navigation error types
#[derive(Debug, Error)]
pub enum NavigationError {
    /// Shortest-path query failed
    #[error(transparent)]
    Oracle(#[from] OracleError),
    /// Scan could not be loaded
    #[error(transparent)]
    Graph(#[from] GraphLoadError),
    /// Simulator collaborator failed
    #[error(transparent)]
    Sim(#[from] SimError),
    /// The simulator reports a different scan than the one planned over
    #[error("simulator is in scan {actual}, planner expects {expected}")]
    ScanMismatch {
        /// Scan the planner holds
        expected: String,
        /// Scan reported by the simulator
        actual: String,
    },
    /// A triple that encodes no action
    #[error("invalid action triple {0:?}")]
    InvalidTriple(ActionTriple),
    /// A task with an empty goal tier
    #[error("task {0} has an empty goal tier")]
    EmptyGoals(String),
    /// Source records from different scans combined into one task
    #[error("cannot combine {first} ({first_scan}) with {second} ({second_scan})")]
    CrossScan {
        /// First record id
        first: String,
        /// Its scan
        first_scan: String,
        /// Second record id
        second: String,
        /// Its scan
        second_scan: String,
    },
    /// A source record is unusable
    #[error(transparent)]
    Dataset(#[from] crate::dataset::DatasetError),
    /// Batch operation given the wrong number of inputs
    #[error("expected {expected} entries, got {actual}")]
    BatchSize {
        /// Batch size
        expected: usize,
        /// Entries supplied
        actual: usize,
    },
    /// A batch operation was issued before `reset`
    #[error("rollout batch has not been reset")]
    NotStarted,
    /// A rollout batch was built over no tasks
    #[error("rollout batch has no tasks")]
    EmptyDataset,
    /// Episode budget could not be assigned
    #[error(transparent)]
    Budget(#[from] crate::budget::BudgetError),
}
