// src/navigation/generator.rs
// Assembles two-tier tasks from pairs of single-goal source records in the same house,
// synthesizes their reference trajectories with the episode driver, and keeps only
// candidates whose legs and trajectory lengths pass the validity checks.

use super::{EpisodeConfig, EpisodeDriver, EpisodeOutcome, NavigationError};
use crate::core::{ScanData, ScanStore};
use crate::dataset::{group_by_scan, Goals, SourceTask, Task};
use crate::sim_interface::{GraphSimulator, SimulatorConfig};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How the priority between the two goals is conveyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationVariant {
    /// The instruction states which goal comes first; all record pairs are tried
    Explicit,
    /// No stated order: the near goal must be strictly cheaper to do first
    Implicit,
}

/// Two-tier task synthesis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Minimum actions of a single-goal trajectory
    pub single_min_steps: usize,
    /// Maximum actions of a single-goal trajectory
    pub single_max_steps: usize,
    /// Minimum nodes on each leg's shortest path
    pub min_path_nodes: usize,
    /// Accepted tasks per house
    pub per_house_limit: usize,
    /// Candidate draws per start record before moving on
    pub attempts_per_start: usize,
    /// Priority variant
    pub variant: GenerationVariant,
    /// Base RNG seed
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            single_min_steps: 5,
            single_max_steps: 25,
            min_path_nodes: 3,
            per_house_limit: 3000,
            attempts_per_start: 5,
            variant: GenerationVariant::Implicit,
            seed: 0,
        }
    }
}

impl GenerationConfig {
    /// Whether a combined trajectory of `actions` actions is within `[2·min, 2·max]`
    pub fn accepts_length(&self, actions: usize) -> bool {
        (2 * self.single_min_steps..=2 * self.single_max_steps).contains(&actions)
    }
}

/// Why a candidate task was discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A leg's shortest path has too few nodes
    ShortLeg {
        /// Nodes on the leg
        nodes: usize,
    },
    /// Combined trajectory outside the accepted length range
    TrajectoryLength {
        /// Actions in the trajectory
        actions: usize,
    },
    /// The driver hit its step ceiling
    NonTerminating,
    /// The first goal lies on the shortest path to the second
    FirstGoalOnDirectPath,
    /// Doing the near goal first is not strictly shorter
    OrderingNotShorter {
        /// Actions of the natural ordering
        short: usize,
        /// Actions of the reversed ordering
        long: usize,
    },
    /// A tier has more than one goal viewpoint
    MultipleGoals,
    /// Far region drawn equal to the start region
    SameRegion,
}

impl Rejection {
    /// Stable name used for counting
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::ShortLeg { .. } => "short_leg",
            Rejection::TrajectoryLength { .. } => "trajectory_length",
            Rejection::NonTerminating => "non_terminating",
            Rejection::FirstGoalOnDirectPath => "first_goal_on_direct_path",
            Rejection::OrderingNotShorter { .. } => "ordering_not_shorter",
            Rejection::MultipleGoals => "multiple_goals",
            Rejection::SameRegion => "same_region",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejection::ShortLeg { nodes } => write!(f, "leg has only {} nodes", nodes),
            Rejection::TrajectoryLength { actions } => {
                write!(f, "trajectory has {} actions", actions)
            }
            Rejection::OrderingNotShorter { short, long } => {
                write!(f, "natural order {} is not shorter than reversed {}", short, long)
            }
            other => f.write_str(other.kind()),
        }
    }
}

/// Validity of one synthesized two-tier trajectory and its two legs
pub fn check_two_tier(
    actions: usize,
    first_leg: &[String],
    second_leg: &[String],
    config: &GenerationConfig,
) -> Result<(), Rejection> {
    if !config.accepts_length(actions) {
        return Err(Rejection::TrajectoryLength { actions });
    }
    for leg in [first_leg, second_leg] {
        if leg.len() < config.min_path_nodes {
            return Err(Rejection::ShortLeg { nodes: leg.len() });
        }
    }
    Ok(())
}

/// Outcome of evaluating one candidate pair
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateOutcome {
    /// Task passed every check
    Accepted(Box<Task>),
    /// Task discarded
    Rejected(Rejection),
}

/// Counters over a generation run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationStats {
    /// Houses processed
    pub houses: usize,
    /// Candidates evaluated
    pub candidates: usize,
    /// Candidates accepted
    pub accepted: usize,
    /// Rejections by kind
    pub rejected: BTreeMap<String, usize>,
}

impl GenerationStats {
    fn record(&mut self, outcome: &CandidateOutcome) {
        self.candidates += 1;
        match outcome {
            CandidateOutcome::Accepted(_) => self.accepted += 1,
            CandidateOutcome::Rejected(reason) => {
                *self.rejected.entry(reason.kind().to_string()).or_default() += 1
            }
        }
    }

    fn merge(mut self, other: GenerationStats) -> Self {
        self.houses += other.houses;
        self.candidates += other.candidates;
        self.accepted += other.accepted;
        for (kind, n) in other.rejected {
            *self.rejected.entry(kind).or_default() += n;
        }
        self
    }

    /// Total rejected candidates
    pub fn rejected_total(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Joins two instructions.
///
/// The implicit variant concatenates them in random order; the explicit variant uses one
/// of several phrasings that state `first` is more urgent.
pub fn combine_instructions<R: Rng + ?Sized>(
    first: &str,
    second: &str,
    variant: GenerationVariant,
    rng: &mut R,
) -> String {
    match variant {
        GenerationVariant::Implicit => {
            if rng.gen_bool(0.5) {
                format!("{} {}", first, second)
            } else {
                format!("{} {}", second, first)
            }
        }
        GenerationVariant::Explicit => match rng.gen_range(0..10) {
            0 => format!("first {} then {}", first, second),
            1 => format!("{} but you should urgently {}", second, first),
            2 => format!("it is urgent to {} afterwards {}", first, second),
            3 => format!("before you {} please first {}", second, first),
            4 => format!("hurry up and {} while you are at it , {}", first, second),
            5 => format!("there is no rush to {} but please urgently {}", second, first),
            6 => format!("it is very important to {} but not so important to {}", first, second),
            7 => format!("please {} but more urgently , please first {}", second, first),
            8 => format!("you should first {} afterwards {}", first, second),
            _ => format!("take your time to {} but first , please {}", second, first),
        },
    }
}

/// Start pose shared by both tiers of a combined task
#[derive(Debug, Clone, Copy)]
pub struct StartPose<'a> {
    /// Start viewpoint
    pub viewpoint: &'a str,
    /// Name of the region it lies in
    pub region_name: &'a str,
    /// Initial heading
    pub heading: f64,
}

/// Builds validated two-tier tasks over one scan store
pub struct TaskGenerator {
    store: Arc<ScanStore>,
    sim_config: SimulatorConfig,
    driver: EpisodeDriver,
    config: GenerationConfig,
}

impl TaskGenerator {
    /// Creates a generator
    pub fn new(
        store: Arc<ScanStore>,
        sim_config: &SimulatorConfig,
        episode: &EpisodeConfig,
        config: &GenerationConfig,
    ) -> Self {
        TaskGenerator {
            store,
            sim_config: sim_config.clone(),
            driver: EpisodeDriver::new(episode),
            config: config.clone(),
        }
    }

    /// Generation settings
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Drives the oracle through `task` on a fresh simulator
    pub fn synthesize(&self, task: &Task) -> Result<EpisodeOutcome, NavigationError> {
        let scan = self.store.load(&task.scan)?;
        let mut sim = GraphSimulator::new(self.store.clone(), &self.sim_config);
        self.driver.run(&mut sim, &scan, task)
    }

    fn leg_task(&self, task: &Task, first: &str, second: &str) -> Task {
        let mut leg = task.clone();
        leg.goals = Goals::Dual {
            first: vec![first.to_string()],
            second: vec![second.to_string()],
        };
        leg.trajectories.clear();
        leg.paths.clear();
        leg
    }

    /// Combines `near` (first tier) and `far` (second tier) into one task starting at
    /// `start`, synthesizing a trajectory for every pair of goals.
    pub fn combine_two_tasks<R: Rng + ?Sized>(
        &self,
        near: &SourceTask,
        far: &SourceTask,
        start: StartPose<'_>,
        rng: &mut R,
    ) -> Result<CandidateOutcome, NavigationError> {
        if near.scan != far.scan {
            return Err(NavigationError::CrossScan {
                first: near.path_id.clone(),
                first_scan: near.scan.clone(),
                second: far.path_id.clone(),
                second_scan: far.scan.clone(),
            });
        }
        let scan = self.store.load(&near.scan)?;
        let first_goals = near.goal_viewpoints();
        let second_goals = far.goal_viewpoints();

        let mut task = Task::new(
            format!("{}{}", near.path_id, far.path_id),
            near.scan.clone(),
            start.viewpoint,
            start.heading,
            Goals::Dual {
                first: first_goals.clone(),
                second: second_goals.clone(),
            },
        );
        task.instruction =
            combine_instructions(near.instruction(), far.instruction(), self.config.variant, rng);
        task.start_region_name = Some(start.region_name.to_string());
        task.first_end_region_name = Some(near.end_region_name.clone());
        task.second_end_region_name = Some(far.end_region_name.clone());
        task.first_object_name = non_empty(&near.object_name);
        task.second_object_name = non_empty(&far.object_name);

        if self.config.variant == GenerationVariant::Implicit {
            if let Some(reason) = self.implicit_precheck(&scan, &task)? {
                return Ok(CandidateOutcome::Rejected(reason));
            }
        }

        let table = scan.distances();
        for first_goal in &first_goals {
            let first_leg = table.path(start.viewpoint, first_goal)?;
            for second_goal in &second_goals {
                let second_leg = table.path(first_goal, second_goal)?;
                let outcome = self.synthesize(&self.leg_task(&task, first_goal, second_goal))?;
                if !outcome.terminated {
                    return Ok(CandidateOutcome::Rejected(Rejection::NonTerminating));
                }
                if let Err(reason) =
                    check_two_tier(outcome.actions.len(), &first_leg, &second_leg, &self.config)
                {
                    return Ok(CandidateOutcome::Rejected(reason));
                }
                let mut path = first_leg.clone();
                path.extend(second_leg.into_iter().skip(1));
                task.paths.push(path);
                task.trajectories.push(outcome.triples());
            }
        }

        if self.config.variant == GenerationVariant::Implicit {
            let short = task.trajectories.first().map_or(0, Vec::len);
            let reversed = self.synthesize(&self.leg_task(&task, &second_goals[0], &first_goals[0]))?;
            let long = reversed.actions.len();
            if short >= long {
                return Ok(CandidateOutcome::Rejected(Rejection::OrderingNotShorter { short, long }));
            }
            task.short_path_length = Some(short);
            task.long_path_length = Some(long);
        }
        Ok(CandidateOutcome::Accepted(Box::new(task)))
    }

    fn implicit_precheck(&self, scan: &ScanData, task: &Task) -> Result<Option<Rejection>, NavigationError> {
        let (first, second) = (task.goals.first(), task.goals.second().unwrap_or_default());
        if first.len() != 1 || second.len() != 1 {
            return Ok(Some(Rejection::MultipleGoals));
        }
        let direct = scan.distances().path(&task.start_viewpoint, &second[0])?;
        if direct.contains(&first[0]) {
            return Ok(Some(Rejection::FirstGoalOnDirectPath));
        }
        Ok(None)
    }

    /// Generates tasks from the source records of one house
    pub fn generate_from_house<R: Rng + ?Sized>(
        &self,
        tasks: &[SourceTask],
        rng: &mut R,
        stats: &mut GenerationStats,
    ) -> Result<Vec<Task>, NavigationError> {
        stats.houses += 1;
        match self.config.variant {
            GenerationVariant::Explicit => self.generate_explicit(tasks, rng, stats),
            GenerationVariant::Implicit => self.generate_implicit(tasks, rng, stats),
        }
    }

    fn generate_explicit<R: Rng + ?Sized>(
        &self,
        tasks: &[SourceTask],
        rng: &mut R,
        stats: &mut GenerationStats,
    ) -> Result<Vec<Task>, NavigationError> {
        let mut results = Vec::new();
        for (i, first) in tasks.iter().enumerate() {
            for second in &tasks[i + 1..] {
                let start = StartPose {
                    viewpoint: first.start_viewpoint()?,
                    region_name: &first.start_region_name,
                    heading: first.heading,
                };
                let outcome = self.combine_two_tasks(first, second, start, rng)?;
                stats.record(&outcome);
                if let CandidateOutcome::Accepted(task) = outcome {
                    results.push(*task);
                    if results.len() >= self.config.per_house_limit {
                        return Ok(results);
                    }
                }
            }
        }
        Ok(results)
    }

    fn generate_implicit<R: Rng + ?Sized>(
        &self,
        tasks: &[SourceTask],
        rng: &mut R,
        stats: &mut GenerationStats,
    ) -> Result<Vec<Task>, NavigationError> {
        // Single-goal records by goal region; start viewpoints to their region
        let mut by_end_region: BTreeMap<&str, Vec<&SourceTask>> = BTreeMap::new();
        let mut start_regions: BTreeMap<&str, &str> = BTreeMap::new();
        let mut region_names: BTreeMap<&str, &str> = BTreeMap::new();
        for task in tasks {
            start_regions.insert(task.start_viewpoint()?, &task.start_region);
            region_names.insert(&task.start_region, &task.start_region_name);
            if let ([_], [region]) = (task.paths.as_slice(), task.end_regions.as_slice()) {
                by_end_region.entry(region).or_default().push(task);
            }
        }
        let regions: Vec<&str> = by_end_region.keys().copied().collect();

        let mut results = Vec::new();
        for start_task in tasks {
            let start_viewpoint = start_task.start_viewpoint()?;
            let Some(&start_region) = start_regions.get(start_viewpoint) else {
                continue;
            };
            let Some(near_pool) = by_end_region.get(start_region) else {
                continue;
            };
            let start = StartPose {
                viewpoint: start_viewpoint,
                region_name: region_names.get(start_region).copied().unwrap_or_default(),
                heading: start_task.heading,
            };

            for _ in 0..self.config.attempts_per_start {
                let (Some(near), Some(&far_region)) = (near_pool.choose(rng), regions.choose(rng)) else {
                    break;
                };
                if far_region == start_region {
                    stats.record(&CandidateOutcome::Rejected(Rejection::SameRegion));
                    continue;
                }
                let Some(far) = by_end_region.get(far_region).and_then(|pool| pool.choose(rng)) else {
                    continue;
                };
                let outcome = self.combine_two_tasks(near, far, start, rng)?;
                stats.record(&outcome);
                if let CandidateOutcome::Accepted(task) = outcome {
                    results.push(*task);
                    break;
                }
            }
            if results.len() >= self.config.per_house_limit {
                break;
            }
        }
        Ok(results)
    }

    /// Generates tasks for every house in `sources`, houses in parallel.
    ///
    /// Each house draws from its own RNG derived from the configured seed, so output
    /// is reproducible regardless of thread scheduling. The result is shuffled.
    pub fn generate(&self, sources: &[SourceTask]) -> Result<(Vec<Task>, GenerationStats), NavigationError> {
        let houses: Vec<(String, Vec<SourceTask>)> =
            group_by_scan(sources.iter().cloned(), |t| t.scan.as_str()).into_iter().collect();
        let scan_ids: Vec<&str> = houses.iter().map(|(scan, _)| scan.as_str()).collect();
        self.store.load_all(&scan_ids)?;

        let per_house: Vec<(Vec<Task>, GenerationStats)> = houses
            .par_iter()
            .enumerate()
            .map(|(i, (scan, tasks))| -> Result<(Vec<Task>, GenerationStats), NavigationError> {
                let mut rng = house_rng(self.config.seed, i);
                let mut stats = GenerationStats::default();
                let generated = self.generate_from_house(tasks, &mut rng, &mut stats)?;
                debug!(
                    "House {}: {} tasks from {} candidates",
                    scan,
                    generated.len(),
                    stats.candidates
                );
                Ok((generated, stats))
            })
            .collect::<Result<_, NavigationError>>()?;

        let mut all = Vec::new();
        let mut stats = GenerationStats::default();
        for (generated, house_stats) in per_house {
            all.extend(generated);
            stats = stats.merge(house_stats);
        }
        all.shuffle(&mut ChaCha8Rng::seed_from_u64(self.config.seed));
        info!(
            "Generated {} tasks over {} houses ({} candidates rejected)",
            all.len(),
            stats.houses,
            stats.rejected_total()
        );
        Ok((all, stats))
    }
}

fn house_rng(seed: u64, house: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed ^ (house as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
