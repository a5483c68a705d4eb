//! # SEER-POWER Crate
//!
//! This library contains the simulation engine behind the `subsample-power` binary.
//! For each (odds ratio, sample size, repeat) cell it draws a subsample of a fixed
//! population, simulates a case/control phenotype, restricts the population
//! structure matrix to the same individuals, and runs an external association
//! tool on the staged files.

pub mod config;
pub mod io;
pub mod phenotype;
pub mod sampler;
pub mod structure;
pub mod sweep;
pub mod trial;

pub use config::{OddsRatioRange, SampleSizeRange, SimulationConfig, ToolConfig};
pub use io::{OutputSink, Population};
pub use structure::MatrixFormat;
pub use sweep::{
    generate_grid, run_sweep, summarize_power, write_power_summary, PowerPoint, TrialOutcome,
    SweepError, TrialParams, TrialResult, FAILURE_MARKER,
};
pub use trial::{TrialError, TrialExecutor, TrialRunner};

/// One individual of the source population.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Sample {
    /// Sample name as written to the phenotype file
    pub name: String,
    /// Whether the individual carries the simulated element
    pub element_present: bool,
}

impl Sample {
    pub fn new(name: &str, element_present: bool) -> Self {
        Self { name: name.into(), element_present }
    }
}
