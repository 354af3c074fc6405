//! In-process simulator over a scan graph
//!
//! Reproduces the discretized camera model of the panorama simulator without
//! rendering: 12 heading buckets by 3 elevation rows of 30 degrees, with a neighbour
//! navigable when it falls inside the current field of view.

use super::{
    ELEVATION_BUCKETS, HEADING_BUCKETS, NavigableLocation, SimError, SimState, Simulator,
};
use crate::core::{ScanData, ScanStore};
use log::{debug, trace};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use std::sync::Arc;

const BUCKET_ANGLE: f64 = PI / 6.0;

/// Camera parameters of the simulated agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Image width in pixels
    pub image_width: u32,
    /// Image height in pixels
    pub image_height: u32,
    /// Vertical field of view in degrees
    pub vfov_degrees: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            image_width: 640,
            image_height: 480,
            vfov_degrees: 60.0,
        }
    }
}

impl SimulatorConfig {
    /// Vertical field of view in radians
    pub fn vfov(&self) -> f64 {
        self.vfov_degrees.to_radians()
    }

    /// Horizontal field of view in radians, derived from the aspect ratio
    pub fn hfov(&self) -> f64 {
        let aspect = self.image_width as f64 / self.image_height as f64;
        2.0 * ((self.vfov() / 2.0).tan() * aspect).atan()
    }
}

#[derive(Debug)]
struct Episode {
    scan: Arc<ScanData>,
    node: usize,
    heading_bucket: usize,
    elevation_bucket: usize,
    step: usize,
}

impl Episode {
    fn heading(&self) -> f64 {
        self.heading_bucket as f64 * BUCKET_ANGLE
    }

    fn elevation(&self) -> f64 {
        (self.elevation_bucket as f64 - 1.0) * BUCKET_ANGLE
    }
}

/// Simulator that answers from connectivity data alone
#[derive(Debug)]
pub struct GraphSimulator {
    store: Arc<ScanStore>,
    half_hfov: f64,
    half_vfov: f64,
    episode: Option<Episode>,
}

impl GraphSimulator {
    /// Creates a simulator reading scans from `store`
    pub fn new(store: Arc<ScanStore>, config: &SimulatorConfig) -> Self {
        GraphSimulator {
            store,
            half_hfov: config.hfov() / 2.0,
            half_vfov: config.vfov() / 2.0,
            episode: None,
        }
    }

    fn episode(&self) -> Result<&Episode, SimError> {
        self.episode.as_ref().ok_or(SimError::NoEpisode)
    }

    // Self first, then visible neighbours nearest first
    fn navigable(&self, ep: &Episode) -> Vec<(usize, NavigableLocation)> {
        let graph = ep.scan.graph();
        let here = graph.position_at(ep.node);
        let mut visible: Vec<(usize, NavigableLocation)> = graph
            .neighbors(ep.node)
            .iter()
            .filter_map(|&(idx, _)| {
                let loc = relative_location(
                    graph.node_id(idx),
                    here,
                    graph.position_at(idx),
                    ep.heading(),
                    ep.elevation(),
                );
                (loc.rel_heading.abs() <= self.half_hfov && loc.rel_elevation.abs() <= self.half_vfov)
                    .then_some((idx, loc))
            })
            .collect();
        visible.sort_by(|a, b| a.1.rel_distance.total_cmp(&b.1.rel_distance));

        let mut locations = Vec::with_capacity(visible.len() + 1);
        locations.push((
            ep.node,
            NavigableLocation {
                viewpoint_id: graph.node_id(ep.node).to_string(),
                rel_heading: 0.0,
                rel_elevation: 0.0,
                rel_distance: 0.0,
            },
        ));
        locations.extend(visible);
        locations
    }
}

impl Simulator for GraphSimulator {
    fn new_episode(
        &mut self,
        scan_id: &str,
        viewpoint_id: &str,
        heading: f64,
        elevation: f64,
    ) -> Result<(), SimError> {
        let scan = self.store.load(scan_id)?;
        let node = scan
            .graph()
            .node_index(viewpoint_id)
            .ok_or_else(|| SimError::UnknownViewpoint {
                scan: scan_id.to_string(),
                viewpoint: viewpoint_id.to_string(),
            })?;
        let heading_bucket =
            (heading.rem_euclid(TAU) / BUCKET_ANGLE).round() as usize % HEADING_BUCKETS;
        let elevation_bucket =
            ((elevation / BUCKET_ANGLE).round() + 1.0).clamp(0.0, (ELEVATION_BUCKETS - 1) as f64)
                as usize;
        debug!(
            "New episode in {} at {} (view {})",
            scan_id,
            viewpoint_id,
            elevation_bucket * HEADING_BUCKETS + heading_bucket
        );
        self.episode = Some(Episode {
            scan,
            node,
            heading_bucket,
            elevation_bucket,
            step: 0,
        });
        Ok(())
    }

    fn apply_action(
        &mut self,
        index: usize,
        heading_delta: i32,
        elevation_delta: i32,
    ) -> Result<(), SimError> {
        let target = if index > 0 {
            let ep = self.episode()?;
            let locations = self.navigable(ep);
            let available = locations.len();
            Some(
                locations
                    .into_iter()
                    .nth(index)
                    .map(|(idx, _)| idx)
                    .ok_or(SimError::InvalidMove { index, available })?,
            )
        } else {
            None
        };

        let ep = self.episode.as_mut().ok_or(SimError::NoEpisode)?;
        if let Some(node) = target {
            trace!(
                "Move {} -> {}",
                ep.scan.graph().node_id(ep.node),
                ep.scan.graph().node_id(node)
            );
            ep.node = node;
        }
        ep.heading_bucket =
            (ep.heading_bucket as i64 + heading_delta as i64).rem_euclid(HEADING_BUCKETS as i64) as usize;
        ep.elevation_bucket = (ep.elevation_bucket as i64 + elevation_delta as i64)
            .clamp(0, ELEVATION_BUCKETS as i64 - 1) as usize;
        ep.step += 1;
        Ok(())
    }

    fn current_state(&self) -> Result<SimState, SimError> {
        let ep = self.episode()?;
        let graph = ep.scan.graph();
        Ok(SimState {
            scan_id: ep.scan.scan_id().to_string(),
            viewpoint_id: graph.node_id(ep.node).to_string(),
            view_index: ep.elevation_bucket * HEADING_BUCKETS + ep.heading_bucket,
            heading: ep.heading(),
            elevation: ep.elevation(),
            position: *graph.position_at(ep.node),
            step: ep.step,
            navigable_locations: self.navigable(ep).into_iter().map(|(_, loc)| loc).collect(),
        })
    }
}

/// Wraps an angle into (-π, π]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI { wrapped - TAU } else { wrapped }
}

/// Heading of `to` seen from `from`, clockwise from +y, in [0, 2π)
pub fn heading_towards(from: &Vector3<f64>, to: &Vector3<f64>) -> f64 {
    let d = to - from;
    d.x.atan2(d.y).rem_euclid(TAU)
}

fn relative_location(
    viewpoint: &str,
    from: &Vector3<f64>,
    to: &Vector3<f64>,
    heading: f64,
    elevation: f64,
) -> NavigableLocation {
    let d = to - from;
    let horizontal = d.x.hypot(d.y);
    NavigableLocation {
        viewpoint_id: viewpoint.to_string(),
        rel_heading: wrap_angle(heading_towards(from, to) - heading),
        rel_elevation: d.z.atan2(horizontal) - elevation,
        rel_distance: d.norm(),
    }
}
