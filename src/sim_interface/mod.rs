//! Simulator interface for mpnav
//!
//! This module defines the narrow contract with the panorama simulator:
//! - Starting an episode at a (scan, viewpoint, heading, elevation)
//! - Applying one discrete action as an (index, heading delta, elevation delta) triple
//! - Reading back the agent's pose and currently navigable locations
//!
//! [`GraphSimulator`] implements the contract directly over a scan graph.

mod graph_sim;

pub use graph_sim::*;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of discrete heading buckets per elevation row
pub const HEADING_BUCKETS: usize = 12;

/// Number of elevation rows (down, level, up)
pub const ELEVATION_BUCKETS: usize = 3;

/// A neighbouring viewpoint the agent could move to from its current view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigableLocation {
    /// Viewpoint id
    pub viewpoint_id: String,
    /// Heading of the location relative to the camera, radians, right positive
    pub rel_heading: f64,
    /// Elevation of the location relative to the camera, radians, up positive
    pub rel_elevation: f64,
    /// Straight-line distance to the location
    pub rel_distance: f64,
}

/// Agent pose as reported by the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimState {
    /// Scan id
    pub scan_id: String,
    /// Current viewpoint
    pub viewpoint_id: String,
    /// Discretized view, `12 * elevation_bucket + heading_bucket`
    pub view_index: usize,
    /// Heading in radians, clockwise from the +y axis, in [0, 2π)
    pub heading: f64,
    /// Elevation in radians
    pub elevation: f64,
    /// 3D position of the current viewpoint
    pub position: Vector3<f64>,
    /// Actions applied since the episode began
    pub step: usize,
    /// Reachable locations; index 0 is always the current viewpoint
    pub navigable_locations: Vec<NavigableLocation>,
}

impl SimState {
    /// Elevation row of the current view: 0 looking down, 1 level, 2 looking up
    pub fn elevation_bucket(&self) -> usize {
        self.view_index / HEADING_BUCKETS
    }
}

/// Simulator failures
#[derive(Debug, Error)]
pub enum SimError {
    /// An action or state query was issued before `new_episode`
    #[error("no episode has been started")]
    NoEpisode,
    /// The scan could not be provided
    #[error("scan unavailable: {0}")]
    Scan(#[from] crate::core::GraphLoadError),
    /// The start viewpoint is not part of the scan
    #[error("viewpoint {viewpoint} is not part of scan {scan}")]
    UnknownViewpoint {
        /// Scan id
        scan: String,
        /// Requested viewpoint
        viewpoint: String,
    },
    /// A move index outside the navigable list
    #[error("move index {index} is not navigable ({available} locations)")]
    InvalidMove {
        /// Requested index
        index: usize,
        /// Size of the navigable list
        available: usize,
    },
    /// Failure reported by an external simulator backend
    #[error("simulator backend: {0}")]
    Backend(String),
}

/// The panorama simulator collaborator
///
/// Calls happen strictly in the order `new_episode`, then alternating
/// `apply_action` / `current_state`. Each handle drives exactly one episode at a time.
#[cfg_attr(test, mockall::automock)]
pub trait Simulator: Send {
    /// Places the agent at a viewpoint with the given camera angles
    fn new_episode(
        &mut self,
        scan_id: &str,
        viewpoint_id: &str,
        heading: f64,
        elevation: f64,
    ) -> Result<(), SimError>;

    /// Moves to navigable location `index` (0 stays), then turns by `heading_delta`
    /// and tilts by `elevation_delta` buckets
    fn apply_action(
        &mut self,
        index: usize,
        heading_delta: i32,
        elevation_delta: i32,
    ) -> Result<(), SimError>;

    /// Current pose
    fn current_state(&self) -> Result<SimState, SimError>;
}
