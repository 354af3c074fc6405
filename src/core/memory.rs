// core/memory.rs

// Remembers observed trajectory lengths per task class and reduces them to the
// evaluation-time time budget: the upper ~95% confidence bound of the mean, capped at
// the maximum episode length. Reduced estimates persist to YAML so a training split's
// statistics can budget a validation split.

// Dependencies
use crate::budget::{BudgetError, TaskClassKey};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Thread-safe collection of trajectory lengths keyed by task class
#[derive(Debug, Default)]
pub struct TrajLenAccumulator {
    observations: Mutex<HashMap<TaskClassKey, Vec<usize>>>,
}

impl TrajLenAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends lengths observed for `key`
    pub fn record<I: IntoIterator<Item = usize>>(&self, key: TaskClassKey, lengths: I) {
        let mut observations = self.observations.lock().unwrap_or_else(PoisonError::into_inner);
        observations.entry(key).or_default().extend(lengths);
    }

    /// Number of task classes seen so far
    pub fn class_count(&self) -> usize {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Lengths observed for one class
    pub fn observations(&self, key: &TaskClassKey) -> Vec<usize> {
        self.observations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Reduces every class to `min(max_episode_length, mean + z * sem)`.
    ///
    /// The standard error is undefined below two observations; such classes take
    /// `max_episode_length` when `fallback_to_max` is set and fail otherwise.
    pub fn finalize(
        &self,
        max_episode_length: f64,
        z: f64,
        fallback_to_max: bool,
    ) -> Result<TrajLenEstimates, BudgetError> {
        let observations = self.observations.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = HashMap::with_capacity(observations.len());
        for (key, lengths) in observations.iter() {
            let estimate = match upper_confidence_bound(lengths, z) {
                Some(bound) => bound.min(max_episode_length),
                None if fallback_to_max => {
                    warn!(
                        "Task class {} has {} observation(s); using max episode length {}",
                        key,
                        lengths.len(),
                        max_episode_length
                    );
                    max_episode_length
                }
                None => {
                    return Err(BudgetError::UndefinedStandardError {
                        key: key.clone(),
                        observations: lengths.len(),
                    });
                }
            };
            values.insert(key.clone(), estimate);
        }
        info!("Reduced trajectory lengths for {} task classes", values.len());
        Ok(TrajLenEstimates {
            max_episode_length,
            values,
        })
    }
}

/// `mean + z * sem` with the sample (n - 1) standard deviation; `None` below two
/// observations
pub fn upper_confidence_bound(lengths: &[usize], z: f64) -> Option<f64> {
    if lengths.len() < 2 {
        return None;
    }
    let n = lengths.len() as f64;
    let mean = lengths.iter().map(|&l| l as f64).sum::<f64>() / n;
    let variance = lengths
        .iter()
        .map(|&l| (l as f64 - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    let bound = mean + z * (variance / n).sqrt();
    bound.is_finite().then_some(bound)
}

/// Reduced per-class time budget estimates
#[derive(Debug, Clone, PartialEq)]
pub struct TrajLenEstimates {
    max_episode_length: f64,
    values: HashMap<TaskClassKey, f64>,
}

#[derive(Serialize, Deserialize)]
struct EstimatesFile {
    max_episode_length: f64,
    estimates: Vec<EstimateEntry>,
}

#[derive(Serialize, Deserialize)]
struct EstimateEntry {
    key: TaskClassKey,
    estimate: f64,
}

impl TrajLenEstimates {
    /// Estimates with no classes; every lookup yields `max_episode_length`
    pub fn empty(max_episode_length: f64) -> Self {
        TrajLenEstimates {
            max_episode_length,
            values: HashMap::new(),
        }
    }

    /// Estimate for a class; classes never observed take the maximum episode length
    pub fn get(&self, key: &TaskClassKey) -> f64 {
        self.values
            .get(key)
            .copied()
            .unwrap_or(self.max_episode_length)
    }

    /// Whether `key` was observed
    pub fn contains(&self, key: &TaskClassKey) -> bool {
        self.values.contains_key(key)
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no class was observed
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cap applied to every estimate
    pub fn max_episode_length(&self) -> f64 {
        self.max_episode_length
    }

    /// Serializes estimates to a YAML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BudgetError> {
        let path = path.as_ref();
        let mut estimates: Vec<EstimateEntry> = self
            .values
            .iter()
            .map(|(key, &estimate)| EstimateEntry {
                key: key.clone(),
                estimate,
            })
            .collect();
        estimates.sort_by(|a, b| a.key.cmp(&b.key));
        let file = File::create(path).map_err(|e| BudgetError::Persist(e.to_string()))?;
        serde_yaml::to_writer(
            file,
            &EstimatesFile {
                max_episode_length: self.max_episode_length,
                estimates,
            },
        )
        .map_err(|e| BudgetError::Persist(e.to_string()))?;
        info!("Saved {} trajectory length estimates to {}", self.values.len(), path.display());
        Ok(())
    }

    /// Loads estimates from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BudgetError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| BudgetError::Persist(e.to_string()))?;
        let contents: EstimatesFile =
            serde_yaml::from_reader(file).map_err(|e| BudgetError::Persist(e.to_string()))?;
        info!(
            "Loaded {} trajectory length estimates from {}",
            contents.estimates.len(),
            path.display()
        );
        Ok(TrajLenEstimates {
            max_episode_length: contents.max_episode_length,
            values: contents
                .estimates
                .into_iter()
                .map(|e| (e.key, e.estimate))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(region: &str) -> TaskClassKey {
        TaskClassKey::Single {
            start_region: "kitchen".into(),
            target: region.into(),
        }
    }

    #[test]
    fn upper_bound_matches_sample_sem() {
        // mean 4, sample sd 2, sem 1
        let bound = upper_confidence_bound(&[2, 4, 6, 4, 2, 6], 1.95).unwrap();
        let sd = (16.0f64 / 5.0).sqrt();
        let expected = 4.0 + 1.95 * sd / 6.0f64.sqrt();
        assert!((bound - expected).abs() < 1e-12);
    }

    #[test]
    fn single_observation_falls_back_or_fails() {
        let acc = TrajLenAccumulator::new();
        acc.record(key("bath"), [7]);
        let est = acc.finalize(25.0, 1.95, true).unwrap();
        assert_eq!(est.get(&key("bath")), 25.0);
        assert!(matches!(
            acc.finalize(25.0, 1.95, false),
            Err(BudgetError::UndefinedStandardError { observations: 1, .. })
        ));
    }

    #[test]
    fn estimates_are_capped() {
        let acc = TrajLenAccumulator::new();
        acc.record(key("hall"), [40, 44, 48]);
        let est = acc.finalize(25.0, 1.95, false).unwrap();
        assert_eq!(est.get(&key("hall")), 25.0);
        assert_eq!(est.get(&key("never-seen")), 25.0);
    }

    #[test]
    fn yaml_persistence_keeps_every_class() {
        let acc = TrajLenAccumulator::new();
        acc.record(key("hall"), [10, 12]);
        acc.record(
            TaskClassKey::Dual {
                start_region: "kitchen".into(),
                first_target: "bath".into(),
                second_target: "hall".into(),
            },
            [20, 24, 22],
        );
        let est = acc.finalize(50.0, 1.95, false).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimates.yaml");
        est.save(&path).unwrap();
        assert_eq!(TrajLenEstimates::load(&path).unwrap(), est);
    }
}
