// ⚙️ Engine Configuration - Run parameters as data
// Every value a run depends on lives here and is passed explicitly.
// No global as-of date, no ambient exclusion sets.

use crate::error::{EngineError, EngineResult};
use crate::model::{Procedure, MONEY_TOLERANCE};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// INTEGRITY THRESHOLDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Claim flagged when split count exceeds this multiple of the baseline median
    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,

    /// Claims at or below this split count are never volume anomalies
    #[serde(default = "default_volume_floor")]
    pub volume_floor: usize,

    /// A balancing transfer needs 1-3 offsetting splits; more than this is suspect
    #[serde(default = "default_symmetry_repeat_count")]
    pub symmetry_repeat_count: usize,

    /// Multiple of the baseline median offsetting count that raises the symmetry threshold
    #[serde(default = "default_symmetry_multiplier")]
    pub symmetry_multiplier: f64,

    /// Trailing window the rolling baseline is drawn from
    #[serde(default = "default_baseline_window_days")]
    pub baseline_window_days: i64,

    /// Below this many comparable subjects the baseline is "insufficient data"
    #[serde(default = "default_min_baseline_samples")]
    pub min_baseline_samples: usize,
}

fn default_volume_multiplier() -> f64 {
    10.0
}

fn default_volume_floor() -> usize {
    25
}

fn default_symmetry_repeat_count() -> usize {
    6
}

fn default_symmetry_multiplier() -> f64 {
    3.0
}

fn default_baseline_window_days() -> i64 {
    365
}

fn default_min_baseline_samples() -> usize {
    5
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        IntegrityConfig {
            volume_multiplier: default_volume_multiplier(),
            volume_floor: default_volume_floor(),
            symmetry_repeat_count: default_symmetry_repeat_count(),
            symmetry_multiplier: default_symmetry_multiplier(),
            baseline_window_days: default_baseline_window_days(),
            min_baseline_samples: default_min_baseline_samples(),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reference date for balances and aging
    pub as_of_date: NaiveDate,

    /// Normalization window. Open start; end defaults to as_of_date.
    #[serde(default)]
    pub window_start: Option<NaiveDate>,

    #[serde(default)]
    pub window_end: Option<NaiveDate>,

    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    #[serde(default = "default_success_ratio")]
    pub success_ratio: f64,

    #[serde(default = "default_overpaid_ratio")]
    pub overpaid_ratio: f64,

    #[serde(default = "default_underpaid_ratio")]
    pub underpaid_ratio: f64,

    /// Codes removed from the success/failure denominator
    #[serde(default)]
    pub administrative_codes: BTreeSet<String>,

    #[serde(default)]
    pub integrity: IntegrityConfig,

    /// Abort when more than this fraction of procedures has no family
    #[serde(default = "default_max_missing_family_fraction")]
    pub max_missing_family_fraction: f64,

    #[serde(default = "default_require_fee_schedule")]
    pub require_fee_schedule: bool,

    /// Whole-run deadline
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

fn default_tolerance() -> f64 {
    MONEY_TOLERANCE
}

fn default_success_ratio() -> f64 {
    0.95
}

fn default_overpaid_ratio() -> f64 {
    1.05
}

fn default_underpaid_ratio() -> f64 {
    0.50
}

fn default_max_missing_family_fraction() -> f64 {
    0.10
}

fn default_require_fee_schedule() -> bool {
    true
}

impl EngineConfig {
    /// Default parameters anchored at `as_of_date`
    pub fn for_date(as_of_date: NaiveDate) -> Self {
        EngineConfig {
            as_of_date,
            window_start: None,
            window_end: None,
            tolerance: default_tolerance(),
            success_ratio: default_success_ratio(),
            overpaid_ratio: default_overpaid_ratio(),
            underpaid_ratio: default_underpaid_ratio(),
            administrative_codes: BTreeSet::new(),
            integrity: IntegrityConfig::default(),
            max_missing_family_fraction: default_max_missing_family_fraction(),
            require_fee_schedule: default_require_fee_schedule(),
            run_timeout_secs: None,
        }
    }

    /// Load configuration from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: EngineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        Ok(config)
    }

    pub fn with_administrative_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.administrative_codes
            .extend(codes.into_iter().map(Into::into));
        self
    }

    /// Inclusive bounds of the normalization window
    pub fn window(&self) -> (Option<NaiveDate>, NaiveDate) {
        (
            self.window_start,
            self.window_end.unwrap_or(self.as_of_date),
        )
    }

    pub fn is_administrative(&self, procedure: &Procedure) -> bool {
        procedure.is_administrative_under(&self.administrative_codes)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }

        if !(0.0 < self.underpaid_ratio
            && self.underpaid_ratio < self.success_ratio
            && self.success_ratio <= 1.0
            && 1.0 < self.overpaid_ratio)
        {
            return Err(EngineError::InvalidConfig(format!(
                "ratios must satisfy 0 < underpaid ({}) < success ({}) <= 1 < overpaid ({})",
                self.underpaid_ratio, self.success_ratio, self.overpaid_ratio
            )));
        }

        let (start, end) = self.window();
        if let Some(start) = start {
            if start > end {
                return Err(EngineError::InvalidConfig(format!(
                    "window start {} is after window end {}",
                    start, end
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.max_missing_family_fraction) {
            return Err(EngineError::InvalidConfig(format!(
                "max_missing_family_fraction must be within [0, 1], got {}",
                self.max_missing_family_fraction
            )));
        }

        let integrity = &self.integrity;
        if integrity.volume_multiplier < 1.0 || integrity.symmetry_multiplier < 1.0 {
            return Err(EngineError::InvalidConfig(
                "integrity multipliers must be at least 1.0".to_string(),
            ));
        }
        if integrity.symmetry_repeat_count == 0 || integrity.min_baseline_samples == 0 {
            return Err(EngineError::InvalidConfig(
                "symmetry_repeat_count and min_baseline_samples must be at least 1".to_string(),
            ));
        }
        if integrity.baseline_window_days <= 0 {
            return Err(EngineError::InvalidConfig(
                "baseline_window_days must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
