// src/navigation/controller.rs
// Drives one episode: repeatedly asks the planner for an action, applies it through
// the simulator and lets the episode state machine switch goal tiers on Stop.
// The loop is bounded by a step ceiling instead of a wall-clock timer.

use super::{Action, ActionPlanner, ActionTriple, NavigationError};
use crate::core::{EpisodePhase, EpisodeState, ScanData};
use crate::dataset::{Task, TrajectoryPoint};
use crate::sim_interface::{SimState, Simulator};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Episode driver limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    /// Actions allowed before an episode is abandoned as non-terminating
    pub max_steps: usize,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        EpisodeConfig { max_steps: 500 }
    }
}

/// Result of driving one episode
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeOutcome {
    /// Every action applied, in order, including each `Stop`
    pub actions: Vec<Action>,
    /// Poses visited, starting at the start viewpoint
    pub visited: Vec<TrajectoryPoint>,
    /// Phase the episode ended in
    pub phase: EpisodePhase,
    /// False when the step ceiling was hit first
    pub terminated: bool,
}

impl EpisodeOutcome {
    /// Actions before the final pose, i.e. visited poses minus one
    pub fn steps(&self) -> usize {
        self.visited.len().saturating_sub(1)
    }

    /// Actions as simulator triples
    pub fn triples(&self) -> Vec<ActionTriple> {
        self.actions.iter().map(|a| a.triple()).collect()
    }

    /// Viewpoints visited, in order
    pub fn viewpoints(&self) -> impl Iterator<Item = &str> {
        self.visited.iter().map(|p| p.viewpoint.as_str())
    }
}

/// Multi-goal episode driver
#[derive(Debug, Clone)]
pub struct EpisodeDriver {
    max_steps: usize,
}

impl EpisodeDriver {
    /// Creates a driver with the configured step ceiling
    pub fn new(config: &EpisodeConfig) -> Self {
        EpisodeDriver {
            max_steps: config.max_steps,
        }
    }

    /// Runs `task` to termination or the step ceiling.
    ///
    /// A two-tier task's first `Stop` switches the active goal set; the next `Stop`
    /// (or the only one of a single-tier task) ends the episode.
    pub fn run<S: Simulator + ?Sized>(
        &self,
        sim: &mut S,
        scan: &ScanData,
        task: &Task,
    ) -> Result<EpisodeOutcome, NavigationError> {
        if task.goals.first().is_empty() || task.goals.second().is_some_and(|g| g.is_empty()) {
            return Err(NavigationError::EmptyGoals(task.instr_id.clone()));
        }
        sim.new_episode(&task.scan, &task.start_viewpoint, task.initial_heading, 0.0)?;
        let planner = ActionPlanner::new(scan);
        let mut episode = EpisodeState::new(task.goals.clone());
        let mut state = sim.current_state()?;
        let mut actions = Vec::new();
        let mut visited = vec![point(&state)];

        while actions.len() < self.max_steps {
            let action = planner.plan(&state, episode.active_goals())?;
            let (index, heading, elevation) = action.triple();
            sim.apply_action(index, heading, elevation)?;
            actions.push(action);

            if action.is_stop() && episode.on_stop() == EpisodePhase::Terminated {
                debug!("Task {} finished after {} actions", task.instr_id, actions.len());
                return Ok(EpisodeOutcome {
                    actions,
                    visited,
                    phase: episode.phase(),
                    terminated: true,
                });
            }
            state = sim.current_state()?;
            visited.push(point(&state));
        }

        warn!(
            "Task {}: {} actions reached without getting to the final goal",
            task.instr_id, self.max_steps
        );
        Ok(EpisodeOutcome {
            actions,
            visited,
            phase: episode.phase(),
            terminated: false,
        })
    }
}

fn point(state: &SimState) -> TrajectoryPoint {
    TrajectoryPoint {
        viewpoint: state.viewpoint_id.clone(),
        heading: state.heading,
        elevation: state.elevation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScanGraph;
    use crate::dataset::Goals;
    use crate::sim_interface::{MockSimulator, NavigableLocation};
    use nalgebra::Vector3;

    fn scan() -> ScanData {
        ScanData::new(
            ScanGraph::builder("s")
                .node("a", Vector3::new(0.0, 0.0, 0.0))
                .node("b", Vector3::new(0.0, 1.0, 0.0))
                .edge("a", "b")
                .build()
                .unwrap(),
        )
    }

    fn stuck_state() -> SimState {
        SimState {
            scan_id: "s".into(),
            viewpoint_id: "a".into(),
            view_index: 12,
            heading: 0.0,
            elevation: 0.0,
            position: Vector3::zeros(),
            step: 0,
            navigable_locations: vec![NavigableLocation {
                viewpoint_id: "a".into(),
                rel_heading: 0.0,
                rel_elevation: 0.0,
                rel_distance: 0.0,
            }],
        }
    }

    #[test]
    fn gives_up_at_step_ceiling() {
        // A simulator whose camera never moves keeps `b` out of view forever
        let mut sim = MockSimulator::new();
        sim.expect_new_episode().times(1).returning(|_, _, _, _| Ok(()));
        sim.expect_apply_action().times(7).returning(|_, _, _| Ok(()));
        sim.expect_current_state().returning(|| Ok(stuck_state()));

        let task = Task::new("1", "s", "a", 0.0, Goals::Single { goals: vec!["b".into()] });
        let driver = EpisodeDriver::new(&EpisodeConfig { max_steps: 7 });
        let outcome = driver.run(&mut sim, &scan(), &task).unwrap();
        assert!(!outcome.terminated);
        assert_eq!(outcome.actions.len(), 7);
        assert_eq!(outcome.phase, EpisodePhase::Navigating);
        assert!(outcome.actions.iter().all(|a| *a == Action::TurnRight));
    }

    #[test]
    fn two_tier_stops_twice_on_shared_goal() {
        let mut sim = MockSimulator::new();
        sim.expect_new_episode().returning(|_, _, _, _| Ok(()));
        sim.expect_apply_action().times(2).returning(|_, _, _| Ok(()));
        sim.expect_current_state().returning(|| Ok(stuck_state()));

        let task = Task::new(
            "2",
            "s",
            "a",
            0.0,
            Goals::Dual {
                first: vec!["a".into()],
                second: vec!["a".into()],
            },
        );
        let outcome = EpisodeDriver::new(&EpisodeConfig::default())
            .run(&mut sim, &scan(), &task)
            .unwrap();
        assert!(outcome.terminated);
        assert_eq!(outcome.actions, vec![Action::Stop, Action::Stop]);
        assert_eq!(outcome.steps(), 1);
        assert_eq!(outcome.phase, EpisodePhase::Terminated);
    }

    #[test]
    fn empty_goal_tier_is_rejected() {
        let mut sim = MockSimulator::new();
        let task = Task::new("3", "s", "a", 0.0, Goals::Single { goals: vec![] });
        assert!(matches!(
            EpisodeDriver::new(&EpisodeConfig::default()).run(&mut sim, &scan(), &task),
            Err(NavigationError::EmptyGoals(_))
        ));
    }
}
