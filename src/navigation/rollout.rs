// src/navigation/rollout.rs
// Interactive batch of learner episodes. Serves shuffled minibatches of tasks, assigns
// each episode its time and help-request budget, and applies a batch of actions with
// one exclusive simulator per episode, in parallel.

use super::{Action, ActionPlanner, NavigationError};
use crate::budget::{EpisodeBudget, QueryBudget};
use crate::core::{EpisodePhase, EpisodeState, ScanStore};
use crate::dataset::Task;
use crate::sim_interface::{SimError, SimState, Simulator};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::sync::Arc;

/// What the learner sees of one episode after `reset` or `step`
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Instruction id
    pub instr_id: String,
    /// Pose reported by the simulator
    pub state: SimState,
    /// Instruction, including any prepended subgoal
    pub instruction: String,
    /// Start viewpoint of the task
    pub start_viewpoint: String,
    /// Goal phase
    pub phase: EpisodePhase,
    /// Goals of the active tier
    pub active_goals: Vec<String>,
    /// The first tier of a two-tier task is behind the agent
    pub first_goal_reached: bool,
    /// Assigned budget
    pub budget: EpisodeBudget,
}

/// Batch of concurrently running episodes
pub struct RolloutBatch<S: Simulator> {
    sims: Vec<S>,
    store: Arc<ScanStore>,
    data: Vec<Task>,
    budget: QueryBudget,
    rng: ChaCha8Rng,
    ix: usize,
    batch: Vec<Task>,
    episodes: Vec<EpisodeState>,
    states: Vec<SimState>,
    instructions: Vec<String>,
    budgets: Vec<EpisodeBudget>,
}

impl<S: Simulator> RolloutBatch<S> {
    /// One episode per simulator handle, drawing tasks from `data`
    pub fn new(
        sims: Vec<S>,
        store: Arc<ScanStore>,
        data: Vec<Task>,
        budget: QueryBudget,
        seed: u64,
    ) -> Result<Self, NavigationError> {
        if data.is_empty() {
            return Err(NavigationError::EmptyDataset);
        }
        info!("Rollout batch of {} over {} tasks", sims.len(), data.len());
        Ok(RolloutBatch {
            sims,
            store,
            data,
            budget,
            rng: ChaCha8Rng::seed_from_u64(seed),
            ix: 0,
            batch: Vec::new(),
            episodes: Vec::new(),
            states: Vec::new(),
            instructions: Vec::new(),
            budgets: Vec::new(),
        })
    }

    /// Episodes per batch
    pub fn batch_size(&self) -> usize {
        self.sims.len()
    }

    /// Tasks of the current minibatch
    pub fn batch(&self) -> &[Task] {
        &self.batch
    }

    /// Restarts minibatch iteration; the next `reset` reshuffles
    pub fn reset_epoch(&mut self) {
        self.ix = 0;
    }

    // Wraps around the end of the data, reshuffling before the refill
    fn next_minibatch(&mut self) {
        let n = self.batch_size();
        if self.ix == 0 {
            self.data.shuffle(&mut self.rng);
        }
        let end = (self.ix + n).min(self.data.len());
        let mut batch = self.data[self.ix.min(end)..end].to_vec();
        self.ix = end;
        // Batches larger than the data take several passes
        while batch.len() < n {
            self.data.shuffle(&mut self.rng);
            self.ix = (n - batch.len()).min(self.data.len());
            batch.extend_from_slice(&self.data[..self.ix]);
        }
        if self.ix == self.data.len() {
            self.ix = 0;
        }
        self.batch = batch;
    }

    /// Starts a new minibatch of episodes and assigns their budgets
    pub fn reset(&mut self, is_eval: bool) -> Result<Vec<Observation>, NavigationError> {
        self.next_minibatch();
        let batch = &self.batch;
        self.sims
            .par_iter_mut()
            .zip(batch.par_iter())
            .try_for_each(|(sim, task)| {
                sim.new_episode(&task.scan, &task.start_viewpoint, task.initial_heading, 0.0)
            })?;

        self.episodes = batch.iter().map(|t| EpisodeState::new(t.goals.clone())).collect();
        self.instructions = batch.iter().map(|t| t.instruction.clone()).collect();
        self.budgets = batch
            .iter()
            .map(|task| self.budget.assign(task, is_eval))
            .collect::<Result<_, _>>()?;
        self.states = self
            .sims
            .iter()
            .map(|sim| sim.current_state())
            .collect::<Result<_, _>>()?;
        debug!("Reset {} episodes (eval: {})", self.batch.len(), is_eval);
        Ok(self.observations())
    }

    /// Applies one action per episode.
    ///
    /// `Stop` ends an episode; later actions for it are ignored. Otherwise, the first
    /// time an episode stands on a first-tier goal its second tier becomes active.
    pub fn step(&mut self, actions: &[Action]) -> Result<Vec<Observation>, NavigationError> {
        if self.states.is_empty() {
            return Err(NavigationError::NotStarted);
        }
        if actions.len() != self.sims.len() {
            return Err(NavigationError::BatchSize {
                expected: self.sims.len(),
                actual: actions.len(),
            });
        }
        let episodes = &self.episodes;
        let states = &self.states;
        let next: Vec<SimState> = self
            .sims
            .par_iter_mut()
            .enumerate()
            .map(|(i, sim)| {
                if episodes[i].is_terminated() {
                    return Ok(states[i].clone());
                }
                let (index, heading, elevation) = actions[i].triple();
                sim.apply_action(index, heading, elevation)?;
                sim.current_state()
            })
            .collect::<Result<_, SimError>>()?;

        for ((episode, state), action) in self.episodes.iter_mut().zip(&next).zip(actions) {
            if episode.is_terminated() {
                continue;
            }
            if action.is_stop() {
                episode.terminate();
            } else {
                episode.on_arrival(&state.viewpoint_id);
            }
        }
        self.states = next;
        Ok(self.observations())
    }

    /// The shortest-path action of every episode; `Stop` for ended ones
    pub fn oracle_actions(&self) -> Result<Vec<Action>, NavigationError> {
        if self.states.is_empty() {
            return Err(NavigationError::NotStarted);
        }
        self.states
            .iter()
            .zip(&self.episodes)
            .map(|(state, episode)| {
                if episode.is_terminated() {
                    return Ok(Action::Stop);
                }
                let scan = self.store.load(&state.scan_id)?;
                ActionPlanner::new(&scan).plan(state, episode.active_goals())
            })
            .collect()
    }

    /// Prefixes a subgoal instruction to episode `idx`'s task instruction
    pub fn prepend_instruction(&mut self, idx: usize, instruction: &str) {
        if let (Some(slot), Some(task)) = (self.instructions.get_mut(idx), self.batch.get(idx)) {
            *slot = format!("{} . {}", instruction, task.instruction);
        }
    }

    /// Current observations
    pub fn observations(&self) -> Vec<Observation> {
        self.batch
            .iter()
            .zip(&self.states)
            .zip(&self.episodes)
            .zip(self.instructions.iter().zip(&self.budgets))
            .map(|(((task, state), episode), (instruction, budget))| Observation {
                instr_id: task.instr_id.clone(),
                state: state.clone(),
                instruction: instruction.clone(),
                start_viewpoint: task.start_viewpoint.clone(),
                phase: episode.phase(),
                active_goals: episode.active_goals().to_vec(),
                first_goal_reached: episode.reached_first_goal(),
                budget: *budget,
            })
            .collect()
    }
}
