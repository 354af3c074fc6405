// dataset/transform.rs
// Whole-dataset utilities: grouping by scan, converting original records into the
// task format, renumbering, mixing datasets and summarising trajectory lengths.

use super::{DatasetError, Goals, SourceTask, Task};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

/// Buckets `items` by scan id, preserving order within each scan
pub fn group_by_scan<T, F>(items: impl IntoIterator<Item = T>, scan_of: F) -> BTreeMap<String, Vec<T>>
where
    F: Fn(&T) -> &str,
{
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for item in items {
        let scan = scan_of(&item).to_string();
        groups.entry(scan).or_default().push(item);
    }
    groups
}

/// Rewrites an original record as a single-tier task
pub fn transform_source(source: &SourceTask) -> Result<Task, DatasetError> {
    if source.instructions.len() != 1 {
        log::warn!(
            "Record {} has {} instructions; keeping the first",
            source.path_id,
            source.instructions.len()
        );
    }
    let mut task = Task::new(
        source.path_id.clone(),
        source.scan.clone(),
        source.start_viewpoint()?,
        source.heading,
        Goals::Single {
            goals: source.goal_viewpoints(),
        },
    );
    task.instruction = source.instruction().to_string();
    task.paths = source.paths.clone();
    task.start_region_name = Some(source.start_region_name.clone());
    task.end_region_name = Some(source.end_region_name.clone());
    if !source.object_name.is_empty() {
        task.object_name = Some(source.object_name.clone());
    }
    Ok(task)
}

/// Assigns sequential instruction ids starting at `first`
pub fn renumber(tasks: &mut [Task], first: u64) {
    for (offset, task) in tasks.iter_mut().enumerate() {
        task.instr_id = (first + offset as u64).to_string();
    }
}

/// Draws `round(total * proportion)` tasks from `primary` and the rest from
/// `secondary`, without replacement, and shuffles the result
pub fn combine_datasets<R: Rng + ?Sized>(
    primary: &[Task],
    secondary: &[Task],
    proportion: f64,
    total: usize,
    rng: &mut R,
) -> Result<Vec<Task>, DatasetError> {
    if !(0.0..=1.0).contains(&proportion) {
        return Err(DatasetError::InvalidProportion(proportion));
    }
    let from_primary = (total as f64 * proportion).round() as usize;
    let from_secondary = total - from_primary;
    for (requested, available) in [
        (from_primary, primary.len()),
        (from_secondary, secondary.len()),
    ] {
        if requested > available {
            return Err(DatasetError::NotEnoughRecords { requested, available });
        }
    }

    let mut mixed: Vec<Task> = primary
        .choose_multiple(rng, from_primary)
        .chain(secondary.choose_multiple(rng, from_secondary))
        .cloned()
        .collect();
    mixed.shuffle(rng);
    Ok(mixed)
}

/// Summary of reference trajectory lengths across a dataset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryStats {
    /// Number of tasks
    pub tasks: usize,
    /// Single-tier tasks
    pub single_tier: usize,
    /// Two-tier tasks
    pub two_tier: usize,
    /// Number of reference trajectories
    pub trajectories: usize,
    /// Mean trajectory length (actions)
    pub mean_length: f64,
    /// Shortest trajectory
    pub min_length: usize,
    /// Longest trajectory
    pub max_length: usize,
    /// Trajectory counts per bucket of ten actions
    pub histogram: Vec<usize>,
}

impl TrajectoryStats {
    /// Collects statistics over `tasks`
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let lengths: Vec<usize> = tasks.iter().flat_map(Task::trajectory_lengths).collect();
        let two_tier = tasks.iter().filter(|t| t.goals.is_dual()).count();
        let mut histogram = Vec::new();
        for &len in &lengths {
            let bucket = len / 10;
            if histogram.len() <= bucket {
                histogram.resize(bucket + 1, 0);
            }
            histogram[bucket] += 1;
        }
        TrajectoryStats {
            tasks: tasks.len(),
            single_tier: tasks.len() - two_tier,
            two_tier,
            trajectories: lengths.len(),
            mean_length: if lengths.is_empty() {
                0.0
            } else {
                lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
            },
            min_length: lengths.iter().copied().min().unwrap_or(0),
            max_length: lengths.iter().copied().max().unwrap_or(0),
            histogram,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn task(id: &str, scan: &str, traj_lens: &[usize]) -> Task {
        let mut t = Task::new(id, scan, "a", 0.0, Goals::Single { goals: vec!["b".into()] });
        t.trajectories = traj_lens.iter().map(|&n| vec![(0, 0, 0); n]).collect();
        t
    }

    #[test]
    fn groups_preserve_order() {
        let groups = group_by_scan(
            vec![task("1", "y", &[]), task("2", "x", &[]), task("3", "y", &[])],
            |t| t.scan.as_str(),
        );
        let ids: Vec<_> = groups["y"].iter().map(|t| t.instr_id.as_str()).collect();
        assert_eq!(ids, ["1", "3"]);
        assert_eq!(groups.keys().collect::<Vec<_>>(), ["x", "y"]);
    }

    #[test]
    fn combine_respects_proportion() {
        let a: Vec<Task> = (0..10).map(|i| task(&format!("a{i}"), "s", &[])).collect();
        let b: Vec<Task> = (0..10).map(|i| task(&format!("b{i}"), "s", &[])).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mixed = combine_datasets(&a, &b, 0.3, 10, &mut rng).unwrap();
        assert_eq!(mixed.len(), 10);
        assert_eq!(mixed.iter().filter(|t| t.instr_id.starts_with('a')).count(), 3);
        assert!(matches!(
            combine_datasets(&a, &b, 0.5, 30, &mut rng),
            Err(DatasetError::NotEnoughRecords { .. })
        ));
    }

    #[test]
    fn stats_bucket_by_tens() {
        let stats = TrajectoryStats::from_tasks(&[task("1", "s", &[4, 12]), task("2", "s", &[19, 31])]);
        assert_eq!(stats.trajectories, 4);
        assert_eq!(stats.histogram, vec![1, 2, 0, 1]);
        assert_eq!(stats.min_length, 4);
        assert_eq!(stats.max_length, 31);
        assert!((stats.mean_length - 16.5).abs() < 1e-12);
    }
}
