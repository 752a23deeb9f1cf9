use std::num::{NonZeroU32, NonZeroU64};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    cache::{Cache, IsCache, Scope},
    classify::{Classifier, OWNER_BIT},
    replace::{
        lru::LruSet,
        partition::{Partition, PartitionedSet},
    },
    snapshot::SnapshotKind,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("a set needs at least one way")]
    NoWays,
    #[error("set_bits = {0} exceeds 32")]
    SetBits(u32),
    #[error("set_bits + block_bits = {total} leaves no room below the owner bit {}", OWNER_BIT)]
    AddressBits { total: u32 },
    #[error("observed slice {slice} is not in 0..{slices}")]
    SliceOutOfRange { slice: usize, slices: usize },
    #[error("observed set {set} is not in 0..{sets}")]
    SetOutOfRange { set: usize, sets: usize },
    #[error("partition end_a={end_a}, begin_b={begin_b} does not fit in {ways} ways")]
    Partition {
        end_a: usize,
        begin_b: usize,
        ways: usize,
    },
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ObservedSet {
    pub slice: usize,
    pub set: usize,
}

/// How the two address streams are merged into one event sequence.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Schedule {
    /// One stream whose addresses already carry the owner mark.
    Single,
    /// `ratio` events of A, then one of B.
    FixedRatio { ratio: NonZeroU32 },
    /// Per-interval quotas, drawn in random order.
    Proportional {
        #[serde(default)]
        seed: u64,
    },
}

fn default_set_bits() -> u32 {
    11
}

fn default_block_bits() -> u32 {
    6
}

fn default_ways() -> usize {
    11
}

fn default_step() -> NonZeroU64 {
    NonZeroU64::MIN
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_set_bits")]
    pub set_bits: u32,
    #[serde(default = "default_block_bits")]
    pub block_bits: u32,
    #[serde(default = "default_ways")]
    pub ways: usize,
    #[serde(default)]
    pub sliced: bool,
    #[serde(default)]
    pub observe: Option<ObservedSet>,
    #[serde(default)]
    pub partition: Option<Partition>,
    #[serde(default = "default_step")]
    pub step: NonZeroU64,
    #[serde(default)]
    pub snapshot: SnapshotKind,
    pub schedule: Schedule,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ways == 0 {
            return Err(ConfigError::NoWays);
        }
        if self.set_bits > 32 {
            return Err(ConfigError::SetBits(self.set_bits));
        }
        let total = self.set_bits + self.block_bits;
        if total >= OWNER_BIT {
            return Err(ConfigError::AddressBits { total });
        }
        if let Some(ObservedSet { slice, set }) = self.observe {
            let slices = self.n_slices();
            if slice >= slices {
                return Err(ConfigError::SliceOutOfRange { slice, slices });
            }
            let sets = self.n_sets();
            if set >= sets {
                return Err(ConfigError::SetOutOfRange { set, sets });
            }
        }
        if let Some(Partition { end_a, begin_b }) = self.partition {
            if end_a >= self.ways || begin_b >= self.ways {
                return Err(ConfigError::Partition {
                    end_a,
                    begin_b,
                    ways: self.ways,
                });
            }
        }
        Ok(())
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.set_bits, self.block_bits, self.sliced)
    }

    pub fn n_sets(&self) -> usize {
        1 << self.set_bits
    }

    pub fn n_slices(&self) -> usize {
        self.classifier().n_slices()
    }

    pub fn scope(&self) -> Scope {
        match self.observe {
            Some(ObservedSet { slice, set }) => Scope::One { slice, set },
            None => Scope::All,
        }
    }

    pub fn overlap(&self) -> usize {
        self.partition.map_or(0, |p| p.overlap())
    }

    /// Events of a whole-cache interval count that reach the simulated
    /// scope: the per-set share when one set is observed, all of them
    /// otherwise.
    pub fn quota(&self, count: u64) -> u64 {
        match self.scope() {
            Scope::All => count,
            Scope::One { .. } => count / self.n_slices() as u64 / self.n_sets() as u64,
        }
    }

    pub fn to_cache(&self) -> Box<dyn IsCache> {
        let ways = self.ways;
        match self.partition {
            None => Box::new(Cache::new(
                "lru".to_string(),
                self.classifier(),
                self.scope(),
                ways,
                || LruSet::new(ways),
            )) as Box<dyn IsCache>,
            Some(partition) => Box::new(Cache::new(
                format!("lru_partitioned_{}", partition.overlap()),
                self.classifier(),
                self.scope(),
                ways,
                || PartitionedSet::new(ways, partition),
            )) as Box<dyn IsCache>,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_reference_geometry() {
        let config = Config::from_json(r#"{"schedule": {"mode": "single"}}"#).unwrap();
        assert_eq!(config.set_bits, 11);
        assert_eq!(config.block_bits, 6);
        assert_eq!(config.ways, 11);
        assert_eq!(config.step.get(), 1);
        assert_eq!(config.snapshot, SnapshotKind::PairedOccupancy);
        assert_eq!(config.scope(), Scope::All);
        assert_eq!(config.n_slices(), 1);
        assert_eq!(config.overlap(), 0);
    }

    #[test]
    fn parses_a_partitioned_observed_set() {
        let config = Config::from_json(
            r#"{
                "ways": 10,
                "sliced": true,
                "observe": {"slice": 7, "set": 2047},
                "partition": {"end_a": 5, "begin_b": 3},
                "step": 1000,
                "snapshot": "occupancy",
                "schedule": {"mode": "fixed_ratio", "ratio": 3}
            }"#,
        )
        .unwrap();
        assert_eq!(config.scope(), Scope::One { slice: 7, set: 2047 });
        assert_eq!(config.overlap(), 3);
        assert_eq!(
            config.schedule,
            Schedule::FixedRatio {
                ratio: NonZeroU32::new(3).unwrap()
            }
        );
        assert_eq!(config.to_cache().make_stats().misses, 0);
    }

    #[test]
    fn observed_set_quota_is_per_set() {
        let config = Config::from_json(
            r#"{
                "sliced": true,
                "observe": {"slice": 3, "set": 9},
                "schedule": {"mode": "proportional", "seed": 7}
            }"#,
        )
        .unwrap();
        assert_eq!(config.schedule, Schedule::Proportional { seed: 7 });
        assert_eq!(config.quota(8 * 2048 * 5 + 17), 5);
    }

    #[test]
    fn whole_cache_quota_keeps_the_interval_count() {
        let config =
            Config::from_json(r#"{"sliced": true, "schedule": {"mode": "proportional"}}"#).unwrap();
        assert_eq!(config.scope(), Scope::All);
        assert_eq!(config.quota(1_000_000), 1_000_000);
    }

    #[test]
    fn rejects_bad_geometry() {
        let err = |json: &str| Config::from_json(json).unwrap_err();

        assert!(matches!(
            err(r#"{"ways": 0, "schedule": {"mode": "single"}}"#),
            ConfigError::NoWays
        ));
        assert!(matches!(
            err(r#"{"set_bits": 30, "block_bits": 23, "schedule": {"mode": "single"}}"#),
            ConfigError::AddressBits { total: 53 }
        ));
        assert!(matches!(
            err(r#"{"set_bits": 33, "block_bits": 6, "schedule": {"mode": "single"}}"#),
            ConfigError::SetBits(33)
        ));
        assert!(matches!(
            err(r#"{"observe": {"slice": 1, "set": 0}, "schedule": {"mode": "single"}}"#),
            ConfigError::SliceOutOfRange { slice: 1, slices: 1 }
        ));
        assert!(matches!(
            err(r#"{"observe": {"slice": 0, "set": 2048}, "schedule": {"mode": "single"}}"#),
            ConfigError::SetOutOfRange { set: 2048, sets: 2048 }
        ));
        assert!(matches!(
            err(r#"{"ways": 10, "partition": {"end_a": 10, "begin_b": 3}, "schedule": {"mode": "single"}}"#),
            ConfigError::Partition { .. }
        ));
        assert!(matches!(
            err(r#"{"step": 0, "schedule": {"mode": "single"}}"#),
            ConfigError::Json(_)
        ));
        assert!(matches!(
            err(r#"{"schedule": {"mode": "fixed_ratio", "ratio": 0}}"#),
            ConfigError::Json(_)
        ));
        assert!(matches!(
            err(r#"{"way": 4, "schedule": {"mode": "single"}}"#),
            ConfigError::Json(_)
        ));
    }
}
