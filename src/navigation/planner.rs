// src/navigation/planner.rs
// Picks the next discrete action on the shortest path to the nearest active goal.
// The rule order below (stop, heading, elevation, move, then re-centre and turn when
// the next node is out of view) decides trajectory lengths and must not change.

use super::{Action, NavigationError};
use crate::core::ScanData;
use crate::sim_interface::SimState;
use log::trace;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_6, PI, TAU};

/// Stateless shortest-path action oracle bound to one scan
#[derive(Debug, Clone, Copy)]
pub struct ActionPlanner<'a> {
    scan: &'a ScanData, // Graph positions and all-pairs paths
}

impl<'a> ActionPlanner<'a> {
    /// Creates a planner over `scan`
    pub fn new(scan: &'a ScanData) -> Self {
        ActionPlanner { scan }
    }

    /// Next action towards the nearest of `goals` from the pose in `state`.
    /// Fails when the pose is in another scan, `goals` is empty, or a node is unknown.
    pub fn plan<S: AsRef<str>>(&self, state: &SimState, goals: &[S]) -> Result<Action, NavigationError> {
        if state.scan_id != self.scan.scan_id() {
            return Err(NavigationError::ScanMismatch {
                expected: self.scan.scan_id().to_string(),
                actual: state.scan_id.clone(),
            });
        }
        let table = self.scan.distances();
        let here = state.viewpoint_id.as_str();
        let (goal, _) = table.nearest(here, goals)?;
        let Some(next) = table.next_hop(here, goal)? else {
            return Ok(Action::Stop);
        };

        let bucket = state.elevation_bucket();
        if let Some((index, loc)) = state
            .navigable_locations
            .iter()
            .enumerate()
            .find(|(_, loc)| loc.viewpoint_id == next)
        {
            let action = if loc.rel_heading > FRAC_PI_6 {
                Action::TurnRight
            } else if loc.rel_heading < -FRAC_PI_6 {
                Action::TurnLeft
            } else if loc.rel_elevation > FRAC_PI_6 && bucket < 2 {
                Action::LookUp
            } else if loc.rel_elevation < -FRAC_PI_6 && bucket > 0 {
                Action::LookDown
            } else {
                Action::Move(index)
            };
            trace!("{} -> {} visible at {}: {:?}", here, next, index, action);
            return Ok(action);
        }

        // Out of view: level the camera before searching by heading
        match bucket {
            0 => return Ok(Action::LookUp),
            2 => return Ok(Action::LookDown),
            _ => {}
        }
        let target = self.scan.graph().position(next).ok_or_else(|| {
            crate::core::OracleError::UnknownNode {
                scan: self.scan.scan_id().to_string(),
                node: next.to_string(),
            }
        })?;
        let delta = target - state.position;
        let mut target_heading = FRAC_PI_2 - delta.y.atan2(delta.x);
        if target_heading < 0.0 {
            target_heading += TAU;
        }
        Ok(turn_towards(state.heading, target_heading))
    }
}

/// Shorter-arc turn from `heading` to `target_heading`; right on exact opposition
pub fn turn_towards(heading: f64, target_heading: f64) -> Action {
    let left = (heading > target_heading && heading - target_heading < PI)
        || (target_heading > heading && target_heading - heading > PI);
    if left { Action::TurnLeft } else { Action::TurnRight }
}

/// One-shot form of [`ActionPlanner::plan`]
pub fn shortest_path_action<S: AsRef<str>>(
    state: &SimState,
    goals: &[S],
    scan: &ScanData,
) -> Result<Action, NavigationError> {
    ActionPlanner::new(scan).plan(state, goals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScanGraph;
    use crate::sim_interface::NavigableLocation;
    use nalgebra::Vector3;

    fn scan() -> ScanData {
        ScanData::new(
            ScanGraph::builder("s")
                .node("a", Vector3::new(0.0, 0.0, 0.0))
                .node("b", Vector3::new(0.0, 1.0, 0.0))
                .node("c", Vector3::new(0.0, 2.0, 0.0))
                .edge("a", "b")
                .edge("b", "c")
                .build()
                .unwrap(),
        )
    }

    fn state(view_index: usize, heading: f64, visible: &[(&str, f64, f64)]) -> SimState {
        let mut navigable_locations = vec![NavigableLocation {
            viewpoint_id: "a".into(),
            rel_heading: 0.0,
            rel_elevation: 0.0,
            rel_distance: 0.0,
        }];
        navigable_locations.extend(visible.iter().map(|&(id, h, e)| NavigableLocation {
            viewpoint_id: id.into(),
            rel_heading: h,
            rel_elevation: e,
            rel_distance: 1.0,
        }));
        SimState {
            scan_id: "s".into(),
            viewpoint_id: "a".into(),
            view_index,
            heading,
            elevation: 0.0,
            position: Vector3::zeros(),
            step: 0,
            navigable_locations,
        }
    }

    #[test]
    fn stops_on_goal() {
        let scan = scan();
        let planner = ActionPlanner::new(&scan);
        assert_eq!(planner.plan(&state(12, 0.0, &[]), &["c", "a"]).unwrap(), Action::Stop);
    }

    #[test]
    fn heading_checked_before_elevation() {
        let scan = scan();
        let planner = ActionPlanner::new(&scan);
        let goals = ["c"];
        assert_eq!(planner.plan(&state(12, 0.0, &[("b", 0.6, 0.9)]), &goals).unwrap(), Action::TurnRight);
        assert_eq!(planner.plan(&state(12, 0.0, &[("b", -0.6, 0.0)]), &goals).unwrap(), Action::TurnLeft);
        assert_eq!(planner.plan(&state(12, 0.0, &[("b", 0.1, 0.9)]), &goals).unwrap(), Action::LookUp);
        // Top row cannot tilt further up
        assert_eq!(planner.plan(&state(24, 0.0, &[("b", 0.1, 0.9)]), &goals).unwrap(), Action::Move(1));
        assert_eq!(planner.plan(&state(12, 0.0, &[("b", 0.1, -0.9)]), &goals).unwrap(), Action::LookDown);
    }

    #[test]
    fn out_of_view_levels_camera_then_turns() {
        let scan = scan();
        let planner = ActionPlanner::new(&scan);
        assert_eq!(planner.plan(&state(0, 1.0, &[]), &["c"]).unwrap(), Action::LookUp);
        assert_eq!(planner.plan(&state(30, 1.0, &[]), &["c"]).unwrap(), Action::LookDown);
        // b is straight ahead along +y, heading 0
        assert_eq!(planner.plan(&state(12, 1.0, &[]), &["c"]).unwrap(), Action::TurnLeft);
        assert_eq!(planner.plan(&state(12, 5.0, &[]), &["c"]).unwrap(), Action::TurnRight);
    }

    #[test]
    fn turn_resolves_wraparound() {
        assert_eq!(turn_towards(0.2, 6.0), Action::TurnLeft);
        assert_eq!(turn_towards(6.0, 0.2), Action::TurnRight);
        assert_eq!(turn_towards(1.0, 1.0 + PI), Action::TurnRight);
    }

    #[test]
    fn rejects_wrong_scan() {
        let scan = scan();
        let mut s = state(12, 0.0, &[]);
        s.scan_id = "other".into();
        assert!(matches!(
            ActionPlanner::new(&scan).plan(&s, &["c"]),
            Err(NavigationError::ScanMismatch { .. })
        ));
    }
}
