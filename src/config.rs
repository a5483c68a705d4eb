//! Sweep and trial configuration.
use crate::phenotype::prob_case_given_absent;
use crate::structure::MatrixFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Tolerance for the inclusive end of a floating-point range.
const RANGE_EPS: f64 = 1e-9;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid range for {name}: {reason}")]
    Range { name: &'static str, reason: String },
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Inclusive odds-ratio range.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OddsRatioRange {
    pub start: f64,
    pub step: f64,
    pub end: f64,
}

impl OddsRatioRange {
    /// Values computed as `start + i * step`, so long ranges do not accumulate drift.
    pub fn values(&self) -> Vec<f64> {
        let n = ((self.end - self.start) / self.step + RANGE_EPS).floor() as usize + 1;
        (0..n).map(|i| self.start + i as f64 * self.step).collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: String| Err(ConfigError::Range { name: "odds ratio", reason });
        if !(self.start.is_finite() && self.step.is_finite() && self.end.is_finite()) {
            return fail("bounds must be finite".into());
        }
        if self.start <= 0.0 {
            return fail(format!("start must be > 0, got {}", self.start));
        }
        if self.step <= 0.0 {
            return fail(format!("step must be > 0, got {}", self.step));
        }
        if self.end < self.start {
            return fail(format!("end {} is below start {}", self.end, self.start));
        }
        Ok(())
    }
}

/// Inclusive sample-size range.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SampleSizeRange {
    pub start: usize,
    pub step: usize,
    pub end: usize,
}

impl SampleSizeRange {
    pub fn values(&self) -> Vec<usize> {
        (self.start..=self.end).step_by(self.step).collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: String| Err(ConfigError::Range { name: "sample size", reason });
        if self.start == 0 {
            return fail("start must be at least 1".into());
        }
        if self.step == 0 {
            return fail("step must be at least 1".into());
        }
        if self.end < self.start {
            return fail(format!("end {} is below start {}", self.end, self.start));
        }
        Ok(())
    }
}

/// How to invoke the external association tool.
///
/// The command line is `<program> <pre_args..> -k <kmer_file> -p <pheno> --struct <structure>`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub program: PathBuf,
    /// Arguments placed before the fixed flags, e.g. a wrapper script
    pub pre_args: Vec<String>,
    pub kmer_file: PathBuf,
    /// Per-trial wall clock limit; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("./seer"),
            pre_args: Vec::new(),
            kmer_file: PathBuf::from("gene_kmers.txt.gz"),
            timeout: None,
        }
    }
}

/// Converts a timeout in seconds; zero or negative disables the limit.
pub fn timeout_from_secs(secs: f64) -> Result<Option<Duration>, ConfigError> {
    if secs.is_nan() {
        return Err(ConfigError::InvalidParameter("timeout must be a number".into()));
    }
    if secs <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|e| ConfigError::InvalidParameter(format!("timeout of {} seconds: {}", secs, e)))
}

/// Full configuration of one power sweep.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub odds_ratio: OddsRatioRange,
    pub sample_size: SampleSizeRange,
    /// Trials per (odds ratio, sample size) cell
    pub repeats: usize,
    /// Fraction of the population carrying the element
    pub maf: f64,
    /// Target case:control ratio (Sr)
    pub case_control_ratio: f64,
    pub tool: ToolConfig,
    /// Base seed; each trial uses `seed + cell index`
    pub seed: Option<u64>,
    /// Maximum concurrent trials
    pub threads: usize,
    /// Encoding of the staged structure matrix
    pub structure_format: MatrixFormat,
    /// Directory for staged files; system temp dir when `None`
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            odds_ratio: OddsRatioRange { start: 0.5, step: 1.0, end: 5.5 },
            sample_size: SampleSizeRange { start: 50, step: 50, end: 3000 },
            repeats: 100,
            maf: 0.25,
            case_control_ratio: 1.0,
            tool: ToolConfig::default(),
            seed: None,
            threads: 1,
            structure_format: MatrixFormat::Binary,
            scratch_dir: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.odds_ratio.validate()?;
        self.sample_size.validate()?;
        if self.repeats == 0 {
            return Err(ConfigError::InvalidParameter("repeats must be at least 1".into()));
        }
        if !(self.maf > 0.0 && self.maf < 1.0) {
            return Err(ConfigError::InvalidParameter(format!(
                "MAF must be in (0, 1), got {}",
                self.maf
            )));
        }
        if !(self.case_control_ratio > 0.0 && self.case_control_ratio.is_finite()) {
            return Err(ConfigError::InvalidParameter(format!(
                "case:control ratio must be > 0, got {}",
                self.case_control_ratio
            )));
        }
        if self.threads == 0 {
            return Err(ConfigError::InvalidParameter("threads must be at least 1".into()));
        }

        let saturated = self.saturated_odds_ratios();
        if !saturated.is_empty() {
            log::warn!(
                "P(case | absent) falls outside [0, 1] for odds ratios {:?} (MAF {}, Sr {}); \
                 labels in those cells saturate",
                saturated, self.maf, self.case_control_ratio
            );
        }
        Ok(())
    }

    /// Odds ratios of the grid whose case probability is not a valid probability.
    pub fn saturated_odds_ratios(&self) -> Vec<f64> {
        self.odds_ratio
            .values()
            .into_iter()
            .filter(|&or| {
                let p = prob_case_given_absent(or, self.maf, self.case_control_ratio);
                !(0.0..=1.0).contains(&p)
            })
            .collect()
    }

    /// Number of trials the sweep will run.
    pub fn total_trials(&self) -> usize {
        self.odds_ratio.values().len() * self.sample_size.values().len() * self.repeats
    }
}
