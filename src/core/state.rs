// core/state.rs

// Tracks which goal tier an episode is working towards using a small finite state
// machine (Navigating, FirstGoalReached, Terminated). This is the only place the
// active goal set changes during an episode.

// Dependencies
use crate::dataset::Goals;
use log::debug;
use serde::{Deserialize, Serialize};

/// Goal phase of an episode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodePhase {
    /// Heading for the first (or only) goal tier
    Navigating,
    /// First tier satisfied, heading for the second
    FirstGoalReached,
    /// Episode over
    Terminated,
}

/// Per-episode goal state, owned by whoever drives the episode
#[derive(Clone, Debug)]
pub struct EpisodeState {
    phase: EpisodePhase,
    goals: Goals,
}

impl EpisodeState {
    /// Starts in `Navigating` with the first tier active
    pub fn new(goals: Goals) -> Self {
        EpisodeState {
            phase: EpisodePhase::Navigating,
            goals,
        }
    }

    /// Current phase
    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    /// Whether the episode has ended
    pub fn is_terminated(&self) -> bool {
        self.phase == EpisodePhase::Terminated
    }

    /// Whether the first tier of a two-tier task has been satisfied
    pub fn reached_first_goal(&self) -> bool {
        matches!(self.goals, Goals::Dual { .. }) && self.phase != EpisodePhase::Navigating
    }

    /// Goal viewpoints the agent should currently head for
    pub fn active_goals(&self) -> &[String] {
        match (&self.goals, self.phase) {
            (Goals::Single { goals }, _) => goals,
            (Goals::Dual { first, .. }, EpisodePhase::Navigating) => first,
            (Goals::Dual { second, .. }, _) => second,
        }
    }

    /// Applies a `Stop`. On a two-tier task the first stop switches to the second tier;
    /// any other stop ends the episode.
    pub fn on_stop(&mut self) -> EpisodePhase {
        let next = match (self.phase, &self.goals) {
            (EpisodePhase::Navigating, Goals::Dual { .. }) => EpisodePhase::FirstGoalReached,
            _ => EpisodePhase::Terminated,
        };
        if next != self.phase {
            debug!("Episode phase {:?} -> {:?}", self.phase, next);
        }
        self.phase = next;
        next
    }

    /// Arrival rule used by interactive rollouts: the first time the agent stands on a
    /// first-tier goal, the second tier becomes active. Returns true on that transition.
    pub fn on_arrival(&mut self, viewpoint: &str) -> bool {
        if self.phase != EpisodePhase::Navigating {
            return false;
        }
        match &self.goals {
            Goals::Dual { first, .. } if first.iter().any(|g| g == viewpoint) => {
                debug!("Reached first goal {}, switching to second tier", viewpoint);
                self.phase = EpisodePhase::FirstGoalReached;
                true
            }
            _ => false,
        }
    }

    /// Ends the episode regardless of phase
    pub fn terminate(&mut self) {
        self.phase = EpisodePhase::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dual() -> Goals {
        Goals::Dual {
            first: vec!["f1".into(), "f2".into()],
            second: vec!["s1".into()],
        }
    }

    #[test]
    fn single_tier_stop_terminates() {
        let mut state = EpisodeState::new(Goals::Single { goals: vec!["g".into()] });
        assert_eq!(state.active_goals(), ["g".to_string()]);
        assert_eq!(state.on_stop(), EpisodePhase::Terminated);
        assert!(!state.reached_first_goal());
    }

    #[test]
    fn dual_tier_swaps_once_then_terminates() {
        let mut state = EpisodeState::new(dual());
        assert_eq!(state.active_goals().len(), 2);
        assert_eq!(state.on_stop(), EpisodePhase::FirstGoalReached);
        assert_eq!(state.active_goals(), ["s1".to_string()]);
        assert!(state.reached_first_goal());
        assert_eq!(state.on_stop(), EpisodePhase::Terminated);
        assert_eq!(state.active_goals(), ["s1".to_string()]);
    }

    #[test]
    fn arrival_only_switches_on_first_tier_goal() {
        let mut state = EpisodeState::new(dual());
        assert!(!state.on_arrival("s1"));
        assert_eq!(state.phase(), EpisodePhase::Navigating);
        assert!(state.on_arrival("f2"));
        assert!(!state.on_arrival("f1"));
        assert_eq!(state.phase(), EpisodePhase::FirstGoalReached);
    }
}
