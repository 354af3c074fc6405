//! Query budget estimation for mpnav
//!
//! Converts trajectory-length estimates into a per-episode time budget and an integer
//! help-request allowance:
//! - Training episodes use the mean length of the task's reference trajectories
//! - Evaluation episodes use the per-class upper confidence bound from [`TrajLenEstimates`]
//! - The allowance `ratio * L / n` is rounded up with probability equal to its
//!   fractional part, so its expectation equals the unrounded value

use crate::core::{TrajLenAccumulator, TrajLenEstimates};
use crate::dataset::Task;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// What a task class is keyed on besides the start region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyBasis {
    /// Goal region names
    Region,
    /// Target object names, for datasets without room information
    Object,
}

/// Groups tasks with similar expected trajectory length
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum TaskClassKey {
    /// Single-tier task
    Single {
        /// Start region name
        start_region: String,
        /// Goal region or object
        target: String,
    },
    /// Two-tier task
    Dual {
        /// Start region name
        start_region: String,
        /// First-tier region or object
        first_target: String,
        /// Second-tier region or object
        second_target: String,
    },
}

impl fmt::Display for TaskClassKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskClassKey::Single { start_region, target } => {
                write!(f, "({}, {})", start_region, target)
            }
            TaskClassKey::Dual {
                start_region,
                first_target,
                second_target,
            } => write!(f, "({}, {}, {})", start_region, first_target, second_target),
        }
    }
}

impl TaskClassKey {
    /// Key of `task`; two-tier tasks are recognised by their first-tier region name
    pub fn for_task(task: &Task, basis: KeyBasis) -> Result<Self, BudgetError> {
        let field = |value: &Option<String>, name: &'static str| {
            value.clone().ok_or_else(|| BudgetError::MissingField {
                instr_id: task.instr_id.clone(),
                field: name,
            })
        };
        let start_region = field(&task.start_region_name, "start_region_name")?;
        if task.first_end_region_name.is_some() {
            let (first_target, second_target) = match basis {
                KeyBasis::Region => (
                    field(&task.first_end_region_name, "first_end_region_name")?,
                    field(&task.second_end_region_name, "second_end_region_name")?,
                ),
                KeyBasis::Object => (
                    field(&task.first_object_name, "first_object_name")?,
                    field(&task.second_object_name, "second_object_name")?,
                ),
            };
            Ok(TaskClassKey::Dual {
                start_region,
                first_target,
                second_target,
            })
        } else {
            let target = match basis {
                KeyBasis::Region => field(&task.end_region_name, "end_region_name")?,
                KeyBasis::Object => field(&task.object_name, "object_name")?,
            };
            Ok(TaskClassKey::Single { start_region, target })
        }
    }
}

/// Budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    /// Fewer than two observations and no fallback configured
    #[error("standard error undefined for task class {key} with {observations} observation(s)")]
    UndefinedStandardError {
        /// Task class
        key: TaskClassKey,
        /// Observations recorded
        observations: usize,
    },
    /// Estimates could not be saved or loaded
    #[error("cannot persist trajectory length estimates: {0}")]
    Persist(String),
    /// Training-mode estimate requested for a task without reference trajectories
    #[error("task {0} has no reference trajectories")]
    NoTrajectories(String),
    /// Task lacks a field its class key needs
    #[error("task {instr_id} has no {field}")]
    MissingField {
        /// Instruction id
        instr_id: String,
        /// Missing field
        field: &'static str,
    },
}

/// Budget settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Upper cap on any time budget
    pub max_episode_length: f64,
    /// Help requests per subgoal span
    pub query_ratio: f64,
    /// Steps covered by one help request
    pub n_subgoal_steps: usize,
    /// Multiplier of the standard error in the evaluation bound
    pub confidence_z: f64,
    /// Use `max_episode_length` for classes with an undefined standard error
    pub fallback_to_max_length: bool,
    /// Seed of the randomized rounding
    pub seed: u64,
    /// Task class key basis
    pub key_basis: KeyBasis,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        BudgetConfig {
            max_episode_length: 50.0,
            query_ratio: 0.4,
            n_subgoal_steps: 4,
            confidence_z: 1.95,
            fallback_to_max_length: true,
            seed: 0,
            key_basis: KeyBasis::Region,
        }
    }
}

/// Budget assigned to one episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeBudget {
    /// Time budget in actions
    pub traj_len: usize,
    /// Help requests allowed
    pub max_queries: usize,
}

/// Mean length of the task's reference trajectories
pub fn training_estimate(task: &Task) -> Result<f64, BudgetError> {
    if task.trajectories.is_empty() {
        return Err(BudgetError::NoTrajectories(task.instr_id.clone()));
    }
    Ok(task.trajectory_lengths().sum::<usize>() as f64 / task.trajectories.len() as f64)
}

/// `floor(q)`, plus one with probability `q - floor(q)`
pub fn randomized_round<R: Rng + ?Sized>(q: f64, rng: &mut R) -> usize {
    let whole = q.floor();
    let frac = q - whole;
    whole as usize + usize::from(rng.gen_range(0.0..1.0) < frac)
}

/// Collects per-class statistics over a dataset
pub fn accumulate(tasks: &[Task], basis: KeyBasis) -> Result<TrajLenAccumulator, BudgetError> {
    let accumulator = TrajLenAccumulator::new();
    for task in tasks {
        accumulator.record(TaskClassKey::for_task(task, basis)?, task.trajectory_lengths());
    }
    Ok(accumulator)
}

/// Assigns time and help-request budgets to episodes
#[derive(Debug)]
pub struct QueryBudget {
    config: BudgetConfig,
    estimates: TrajLenEstimates,
    rng: ChaCha8Rng,
}

impl QueryBudget {
    /// Budget over previously reduced estimates
    pub fn new(config: &BudgetConfig, estimates: TrajLenEstimates) -> Self {
        QueryBudget {
            config: config.clone(),
            estimates,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
        }
    }

    /// Reduces the trajectory statistics of `tasks` and wraps them in a budget
    pub fn from_tasks(config: &BudgetConfig, tasks: &[Task]) -> Result<Self, BudgetError> {
        let estimates = accumulate(tasks, config.key_basis)?.finalize(
            config.max_episode_length,
            config.confidence_z,
            config.fallback_to_max_length,
        )?;
        Ok(QueryBudget::new(config, estimates))
    }

    /// The same budget with estimates taken from another split; classes the other split
    /// never saw take the maximum episode length
    pub fn with_estimates(mut self, estimates: TrajLenEstimates) -> Self {
        self.estimates = estimates;
        self
    }

    /// Per-class estimates in use
    pub fn estimates(&self) -> &TrajLenEstimates {
        &self.estimates
    }

    /// Raw length estimate for `task`
    pub fn length_estimate(&self, task: &Task, is_eval: bool) -> Result<f64, BudgetError> {
        if is_eval {
            Ok(self
                .estimates
                .get(&TaskClassKey::for_task(task, self.config.key_basis)?))
        } else {
            training_estimate(task)
        }
    }

    /// `min(max_episode_length, round(estimate))`, halves rounding to even
    pub fn time_budget(&self, estimate: f64) -> usize {
        estimate.round_ties_even().min(self.config.max_episode_length).max(0.0) as usize
    }

    /// Help-request allowance for a time budget of `traj_len`
    pub fn sample_max_queries(&mut self, traj_len: usize) -> usize {
        let q = self.config.query_ratio * traj_len as f64 / self.config.n_subgoal_steps as f64;
        randomized_round(q, &mut self.rng)
    }

    /// Time and help-request budget of one episode
    pub fn assign(&mut self, task: &Task, is_eval: bool) -> Result<EpisodeBudget, BudgetError> {
        let traj_len = self.time_budget(self.length_estimate(task, is_eval)?);
        Ok(EpisodeBudget {
            traj_len,
            max_queries: self.sample_max_queries(traj_len),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Goals;

    fn task(lengths: &[usize]) -> Task {
        let mut t = Task::new("1", "s", "a", 0.0, Goals::Single { goals: vec!["b".into()] });
        t.trajectories = lengths.iter().map(|&n| vec![(0, 1, 0); n]).collect();
        t.start_region_name = Some("kitchen".into());
        t.end_region_name = Some("bathroom".into());
        t.object_name = Some("towel".into());
        t
    }

    #[test]
    fn key_follows_basis_and_tier() {
        let t = task(&[]);
        assert_eq!(
            TaskClassKey::for_task(&t, KeyBasis::Object).unwrap(),
            TaskClassKey::Single {
                start_region: "kitchen".into(),
                target: "towel".into()
            }
        );
        let mut dual = t.clone();
        dual.first_end_region_name = Some("hall".into());
        assert!(matches!(
            TaskClassKey::for_task(&dual, KeyBasis::Region),
            Err(BudgetError::MissingField { field: "second_end_region_name", .. })
        ));
    }

    #[test]
    fn time_budget_rounds_half_to_even_and_caps() {
        let budget = QueryBudget::new(&BudgetConfig::default(), TrajLenEstimates::empty(50.0));
        assert_eq!(budget.time_budget(12.5), 12);
        assert_eq!(budget.time_budget(13.5), 14);
        assert_eq!(budget.time_budget(80.2), 50);
    }

    #[test]
    fn training_estimate_is_mean() {
        assert_eq!(training_estimate(&task(&[10, 13])).unwrap(), 11.5);
        assert!(matches!(training_estimate(&task(&[])), Err(BudgetError::NoTrajectories(_))));
    }

    #[test]
    fn integral_budget_is_exact() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(randomized_round(4.0, &mut rng), 4);
        }
    }
}
