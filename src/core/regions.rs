// core/regions.rs

// Room labels per viewpoint, used for room-level success. Each scan has an optional
// `<scan>_regions.json` file mapping viewpoint id to a region name.

use super::graph::GraphLoadError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Viewpoint → region name for one scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionMap {
    regions: HashMap<String, String>,
}

impl RegionMap {
    /// Builds a map from (viewpoint, region) pairs
    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        RegionMap {
            regions: pairs.into_iter().map(|(a, b)| (a.into(), b.into())).collect(),
        }
    }

    /// Reads `<dir>/<scan>_regions.json`
    pub fn load(dir: &Path, scan_id: &str) -> Result<Self, GraphLoadError> {
        let path = region_path(dir, scan_id);
        let file = std::fs::File::open(&path).map_err(|source| GraphLoadError::Io {
            scan: scan_id.to_string(),
            path: path.clone(),
            source,
        })?;
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| {
            GraphLoadError::Parse {
                scan: scan_id.to_string(),
                source,
            }
        })
    }

    /// Region of a viewpoint, if labelled
    pub fn region_of(&self, viewpoint: &str) -> Option<&str> {
        self.regions.get(viewpoint).map(String::as_str)
    }

    /// The single region shared by all `viewpoints`; `None` when any is unlabelled or
    /// they disagree
    pub fn common_region<S: AsRef<str>>(&self, viewpoints: &[S]) -> Option<&str> {
        let mut region = None;
        for vp in viewpoints {
            let r = self.region_of(vp.as_ref())?;
            match region {
                None => region = Some(r),
                Some(prev) if prev != r => return None,
                Some(_) => {}
            }
        }
        region
    }
}

/// File holding a scan's region labels
pub fn region_path(dir: &Path, scan_id: &str) -> PathBuf {
    dir.join(format!("{}_regions.json", scan_id))
}
