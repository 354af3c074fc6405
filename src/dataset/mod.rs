//! Dataset records
//!
//! JSON shapes of navigation tasks, agent results and the original single-goal source
//! records, plus readers and writers for dataset splits.

pub mod transform;

pub use transform::{
    combine_datasets, group_by_scan, renumber, transform_source, TrajectoryStats,
};

use crate::navigation::ActionTriple;
use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Dataset errors
#[derive(Debug, Error)]
pub enum DatasetError {
    /// File could not be opened or written
    #[error("cannot access {}: {source}", .path.display())]
    Io {
        /// File concerned
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },
    /// File content is not the expected JSON
    #[error("malformed dataset file {}: {source}", .path.display())]
    Json {
        /// File concerned
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: serde_json::Error,
    },
    /// A record lacks a field an operation needs
    #[error("record {id} has no {field}")]
    MissingField {
        /// Instruction or path id
        id: String,
        /// Missing field
        field: &'static str,
    },
    /// Mixing proportion outside [0, 1]
    #[error("proportion {0} is outside [0, 1]")]
    InvalidProportion(f64),
    /// A sample larger than its source was requested
    #[error("requested {requested} records but only {available} are available")]
    NotEnoughRecords {
        /// Requested sample size
        requested: usize,
        /// Records available
        available: usize,
    },
}

/// Goal tiers of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Goals {
    /// First tier must be visited before the second
    Dual {
        /// First-priority goal viewpoints
        #[serde(rename = "first_goal_viewpoints")]
        first: Vec<String>,
        /// Second-priority goal viewpoints
        #[serde(rename = "second_goal_viewpoints")]
        second: Vec<String>,
    },
    /// One goal tier
    Single {
        /// Acceptable goal viewpoints
        #[serde(rename = "goal_viewpoints")]
        goals: Vec<String>,
    },
}

impl Goals {
    /// Whether the task has two tiers
    pub fn is_dual(&self) -> bool {
        matches!(self, Goals::Dual { .. })
    }

    /// Goals of the first (or only) tier
    pub fn first(&self) -> &[String] {
        match self {
            Goals::Dual { first, .. } => first,
            Goals::Single { goals } => goals,
        }
    }

    /// Goals of the second tier, if any
    pub fn second(&self) -> Option<&[String]> {
        match self {
            Goals::Dual { second, .. } => Some(second),
            Goals::Single { .. } => None,
        }
    }
}

/// One navigation task as stored in a dataset split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Instruction id, normalised to a string
    #[serde(deserialize_with = "id_from_any")]
    pub instr_id: String,
    /// Scan the task takes place in
    pub scan: String,
    /// Start viewpoint
    pub start_viewpoint: String,
    /// Initial heading in radians
    pub initial_heading: f64,
    /// Natural-language instruction
    #[serde(default)]
    pub instruction: String,
    /// Goal tiers
    #[serde(flatten)]
    pub goals: Goals,
    /// Reference action trajectories
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trajectories: Vec<Vec<ActionTriple>>,
    /// Reference node paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<Vec<String>>,
    /// Action count of the natural ordering (two-tier, implicit priority)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_path_length: Option<usize>,
    /// Action count of the reversed ordering (two-tier, implicit priority)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_path_length: Option<usize>,
    /// Region the task starts in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_region_name: Option<String>,
    /// Goal region of a single-tier task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_region_name: Option<String>,
    /// Goal region of the first tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_end_region_name: Option<String>,
    /// Goal region of the second tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_end_region_name: Option<String>,
    /// Target object of a single-tier task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_name: Option<String>,
    /// Target object of the first tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_object_name: Option<String>,
    /// Target object of the second tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_object_name: Option<String>,
}

impl Task {
    /// A bare task with no reference trajectories or metadata
    pub fn new(
        instr_id: impl Into<String>,
        scan: impl Into<String>,
        start_viewpoint: impl Into<String>,
        initial_heading: f64,
        goals: Goals,
    ) -> Self {
        Task {
            instr_id: instr_id.into(),
            scan: scan.into(),
            start_viewpoint: start_viewpoint.into(),
            initial_heading,
            instruction: String::new(),
            goals,
            trajectories: Vec::new(),
            paths: Vec::new(),
            short_path_length: None,
            long_path_length: None,
            start_region_name: None,
            end_region_name: None,
            first_end_region_name: None,
            second_end_region_name: None,
            object_name: None,
            first_object_name: None,
            second_object_name: None,
        }
    }

    /// Lengths of the reference trajectories
    pub fn trajectory_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.trajectories.iter().map(Vec::len)
    }
}

/// The original single-goal record that two-tier tasks are assembled from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTask {
    /// Path id
    #[serde(deserialize_with = "id_from_any")]
    pub path_id: String,
    /// Scan
    pub scan: String,
    /// Initial heading
    pub heading: f64,
    /// Instructions; the first is used
    pub instructions: Vec<String>,
    /// Reference paths, all starting at the same viewpoint
    pub paths: Vec<Vec<String>>,
    /// Start region index
    #[serde(deserialize_with = "id_from_any")]
    pub start_region: String,
    /// Start region name
    pub start_region_name: String,
    /// Region indices of the goals
    #[serde(deserialize_with = "ids_from_any")]
    pub end_regions: Vec<String>,
    /// Goal region name
    pub end_region_name: String,
    /// Target object name
    #[serde(default)]
    pub object_name: String,
}

impl SourceTask {
    /// First viewpoint of the first path
    pub fn start_viewpoint(&self) -> Result<&str, DatasetError> {
        self.paths
            .first()
            .and_then(|p| p.first())
            .map(String::as_str)
            .ok_or_else(|| DatasetError::MissingField {
                id: self.path_id.clone(),
                field: "paths",
            })
    }

    /// Last viewpoint of every path
    pub fn goal_viewpoints(&self) -> Vec<String> {
        self.paths.iter().filter_map(|p| p.last().cloned()).collect()
    }

    /// First instruction, if any
    pub fn instruction(&self) -> &str {
        self.instructions.first().map(String::as_str).unwrap_or("")
    }
}

/// One visited pose of a recorded trajectory, written as `[viewpoint, heading, elevation]`
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryPoint {
    /// Viewpoint id
    pub viewpoint: String,
    /// Heading in radians
    pub heading: f64,
    /// Elevation in radians
    pub elevation: f64,
}

impl TrajectoryPoint {
    /// Point at `viewpoint` with a level camera facing heading 0
    pub fn at(viewpoint: impl Into<String>) -> Self {
        TrajectoryPoint {
            viewpoint: viewpoint.into(),
            heading: 0.0,
            elevation: 0.0,
        }
    }
}

impl Serialize for TrajectoryPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.viewpoint, self.heading, self.elevation).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TrajectoryPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PointVisitor;

        impl<'de> Visitor<'de> for PointVisitor {
            type Value = TrajectoryPoint;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array starting with a viewpoint id")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let viewpoint: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let heading: Option<f64> = seq.next_element()?;
                let elevation: Option<f64> = seq.next_element()?;
                // Any further snapshot fields are not needed for scoring
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(TrajectoryPoint {
                    viewpoint,
                    heading: heading.unwrap_or(0.0),
                    elevation: elevation.unwrap_or(0.0),
                })
            }
        }

        deserializer.deserialize_seq(PointVisitor)
    }
}

/// One agent trajectory submitted for scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    /// Instruction id
    #[serde(deserialize_with = "id_from_any")]
    pub instr_id: String,
    /// Visited poses, starting at the start viewpoint
    pub trajectory: Vec<TrajectoryPoint>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnyId {
    Unsigned(u64),
    Signed(i64),
    Text(String),
}

impl From<AnyId> for String {
    fn from(id: AnyId) -> Self {
        match id {
            AnyId::Unsigned(v) => v.to_string(),
            AnyId::Signed(v) => v.to_string(),
            AnyId::Text(v) => v,
        }
    }
}

fn id_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    AnyId::deserialize(deserializer).map(String::from)
}

fn ids_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Vec::<AnyId>::deserialize(deserializer).map(|ids| ids.into_iter().map(String::from).collect())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), DatasetError> {
    let file = File::create(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// File of a named split: `<data_dir>/<prefix>_<split>.json`
pub fn split_path(data_dir: &Path, prefix: &str, split: &str) -> PathBuf {
    data_dir.join(format!("{}_{}.json", prefix, split))
}

/// Reads a task file
pub fn load_tasks(path: impl AsRef<Path>) -> Result<Vec<Task>, DatasetError> {
    let tasks: Vec<Task> = read_json(path.as_ref())?;
    log::info!("Loaded {} tasks from {}", tasks.len(), path.as_ref().display());
    Ok(tasks)
}

/// Reads and concatenates several named splits
pub fn load_splits<S: AsRef<str>>(
    data_dir: &Path,
    prefix: &str,
    splits: &[S],
) -> Result<Vec<Task>, DatasetError> {
    let mut tasks = Vec::new();
    for split in splits {
        tasks.extend(load_tasks(split_path(data_dir, prefix, split.as_ref()))?);
    }
    Ok(tasks)
}

/// Writes a task file
pub fn save_tasks(path: impl AsRef<Path>, tasks: &[Task]) -> Result<(), DatasetError> {
    write_json(path.as_ref(), tasks)?;
    log::info!("Wrote {} tasks to {}", tasks.len(), path.as_ref().display());
    Ok(())
}

/// Reads original single-goal records
pub fn load_source_tasks(path: impl AsRef<Path>) -> Result<Vec<SourceTask>, DatasetError> {
    read_json(path.as_ref())
}

/// Reads agent results
pub fn load_results(path: impl AsRef<Path>) -> Result<Vec<AgentResult>, DatasetError> {
    read_json(path.as_ref())
}

/// Writes agent results
pub fn save_results(path: impl AsRef<Path>, results: &[AgentResult]) -> Result<(), DatasetError> {
    write_json(path.as_ref(), results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_task_shapes_and_numeric_ids() {
        let json = r#"[
            {"instr_id": 17, "scan": "s", "start_viewpoint": "a", "initial_heading": 0.5,
             "instruction": "find a towel", "goal_viewpoints": ["b", "c"],
             "trajectories": [[[1, 0, 0], [0, 0, 0]]]},
            {"instr_id": "x_2", "scan": "s", "start_viewpoint": "a", "initial_heading": 0.0,
             "instruction": "", "first_goal_viewpoints": ["b"], "second_goal_viewpoints": ["c"],
             "short_path_length": 12, "long_path_length": 20}
        ]"#;
        let tasks: Vec<Task> = serde_json::from_str(json).unwrap();
        assert_eq!(tasks[0].instr_id, "17");
        assert_eq!(tasks[0].goals.first(), ["b".to_string(), "c".to_string()]);
        assert_eq!(tasks[0].trajectory_lengths().collect::<Vec<_>>(), vec![2]);
        assert!(tasks[1].goals.is_dual());
        assert_eq!(tasks[1].goals.second().unwrap(), ["c".to_string()]);
        assert_eq!(tasks[1].long_path_length, Some(20));
    }

    #[test]
    fn dual_task_serializes_flat_goal_fields() {
        let task = Task::new(
            "9",
            "s",
            "a",
            0.0,
            Goals::Dual {
                first: vec!["b".into()],
                second: vec!["c".into()],
            },
        );
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["first_goal_viewpoints"][0], "b");
        assert_eq!(value["second_goal_viewpoints"][0], "c");
        assert!(value.get("goal_viewpoints").is_none());
        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn trajectory_points_accept_extra_snapshot_fields() {
        let json = r#"{"instr_id": 3, "trajectory": [["a", 0.5, 0.0, {"view": 12}], ["b"]]}"#;
        let result: AgentResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.trajectory[0].heading, 0.5);
        assert_eq!(result.trajectory[1], TrajectoryPoint::at("b"));
    }
}
