//! Merge configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IndexlibError, Result};

fn default_true() -> bool {
    true
}

/// How source segments are grouped into merge plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MergeStrategyConfig {
    /// Merge every segment into one plan.
    Optimize {
        /// Split the output into segments of at most this many documents.
        #[serde(default)]
        max_doc_count_per_segment: Option<u32>,

        /// Carry a lone merged segment without deletions over unchanged.
        #[serde(default = "default_true")]
        skip_single_merged_segment: bool,
    },

    /// Merge the smallest segments until at most `max_segment_count` remain.
    Balance {
        max_segment_count: usize,
    },
}

impl Default for MergeStrategyConfig {
    fn default() -> Self {
        MergeStrategyConfig::Optimize {
            max_doc_count_per_segment: None,
            skip_single_merged_segment: true,
        }
    }
}

impl MergeStrategyConfig {
    pub fn is_optimize(&self) -> bool {
        matches!(self, MergeStrategyConfig::Optimize { .. })
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            MergeStrategyConfig::Optimize {
                max_doc_count_per_segment: Some(0),
                ..
            } => Err(IndexlibError::config(
                "optimize strategy: max_doc_count_per_segment must be positive",
            )),
            MergeStrategyConfig::Balance {
                max_segment_count: 0,
            } => Err(IndexlibError::config(
                "balance strategy: max_segment_count must be positive",
            )),
            _ => Ok(()),
        }
    }
}

/// Fan-out of a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelMergeConfig {
    /// Number of parallel reduce instances per index. 1 disables parallel
    /// merge items.
    pub instance_count: usize,

    /// Worker threads of the merge thread pool.
    pub thread_count: usize,
}

impl Default for ParallelMergeConfig {
    fn default() -> Self {
        ParallelMergeConfig {
            instance_count: 1,
            thread_count: num_cpus::get(),
        }
    }
}

/// Where the merged version takes its timestamp and locator from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionTimestampPolicy {
    /// The first source partition, in the order given.
    FirstSource,
    /// The source version with the newest timestamp.
    #[default]
    Latest,
}

/// Keep only documents whose numeric attribute lies in `[min, max]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFilterConfig {
    /// A numeric, single-value field stored in a pack attribute.
    pub field: String,

    /// Inclusive lower bound; unbounded when absent.
    #[serde(default)]
    pub min: Option<f64>,

    /// Inclusive upper bound; unbounded when absent.
    #[serde(default)]
    pub max: Option<f64>,
}

/// Configuration of a (multi-partition) merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Segment grouping.
    pub strategy: MergeStrategyConfig,

    /// Parallel reduce settings.
    pub parallel: ParallelMergeConfig,

    /// Timestamp and locator source of the merged version.
    pub version_timestamp_policy: VersionTimestampPolicy,

    /// Document filter. A filtered merge always rewrites every document.
    pub filter: Option<RangeFilterConfig>,
}

impl MergeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MergeConfig = serde_json::from_str(json)
            .map_err(|e| IndexlibError::config(format!("invalid merge config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            IndexlibError::file_io(format!("cannot read merge config {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.strategy.validate()?;
        if self.parallel.instance_count == 0 {
            return Err(IndexlibError::config("parallel.instance_count must be positive"));
        }
        if let Some(filter) = &self.filter {
            if let (Some(min), Some(max)) = (filter.min, filter.max) {
                if min > max {
                    return Err(IndexlibError::config(format!(
                        "filter on '{}' has min {min} above max {max}",
                        filter.field
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = MergeConfig::from_json("{}").unwrap();
        assert_eq!(config.strategy, MergeStrategyConfig::default());
        assert_eq!(config.parallel.instance_count, 1);
        assert_eq!(config.version_timestamp_policy, VersionTimestampPolicy::Latest);
        assert!(config.filter.is_none());
    }

    #[test]
    fn test_tagged_strategy() {
        let config = MergeConfig::from_json(
            r#"{"strategy": {"type": "balance", "max_segment_count": 3},
                "filter": {"field": "price", "max": 10}}"#,
        )
        .unwrap();
        assert_eq!(
            config.strategy,
            MergeStrategyConfig::Balance {
                max_segment_count: 3
            }
        );
        assert_eq!(config.filter.unwrap().max, Some(10.0));

        let config = MergeConfig::from_json(r#"{"strategy": {"type": "optimize"}}"#).unwrap();
        assert_eq!(config.strategy, MergeStrategyConfig::default());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            MergeConfig::from_json(r#"{"strategy": {"type": "balance", "max_segment_count": 0}}"#),
            Err(IndexlibError::Config(_))
        ));
        assert!(MergeConfig::from_json(r#"{"strategy": {"type": "shuffle"}}"#).is_err());
        assert!(MergeConfig::from_json(r#"{"filter": {"field": "f", "min": 5, "max": 1}}"#).is_err());
    }
}
