//! Subsample Power: estimate the power of an association tool by simulation
//!
//! For every (odds ratio, sample size, repeat) cell this binary subsamples the
//! population roster, simulates a case/control phenotype, restricts the
//! population structure matrix to the same individuals, and runs the external
//! tool on the staged files. One `OR<TAB>n<TAB>repeat<TAB>result` row is
//! written per trial.

use clap::Parser;
use seer_power::config::{timeout_from_secs, ConfigError};
use seer_power::{
    io::open_output, run_sweep, summarize_power, write_power_summary, MatrixFormat,
    OddsRatioRange, Population, SampleSizeRange, SimulationConfig, ToolConfig, TrialRunner,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "subsample-power",
    version,
    about = "Estimates association-test power by subsampling a population under a simulated odds ratio"
)]
struct Cli {
    /// Population roster: one `<name> <0|1>` line per individual (element absent/present)
    roster_file: PathBuf,

    /// Population structure matrix, one row per roster entry (`.bin` = binary, otherwise text)
    structure_file: PathBuf,

    /// First odds ratio of the sweep
    #[arg(long, default_value_t = 0.5)]
    or_start: f64,

    /// Odds ratio increment
    #[arg(long, default_value_t = 1.0)]
    or_step: f64,

    /// Last odds ratio of the sweep (inclusive)
    #[arg(long, default_value_t = 5.5)]
    or_end: f64,

    /// Smallest sample size
    #[arg(long, default_value_t = 50)]
    samples_start: usize,

    /// Sample size increment
    #[arg(long, default_value_t = 50)]
    samples_step: usize,

    /// Largest sample size (inclusive)
    #[arg(long, default_value_t = 3000)]
    samples_end: usize,

    /// Trials per (odds ratio, sample size) cell
    #[arg(long, default_value_t = 100)]
    repeats: usize,

    /// Frequency of the simulated element in the population
    #[arg(long, default_value_t = 0.25)]
    maf: f64,

    /// Target ratio of cases to controls
    #[arg(long, default_value_t = 1.0)]
    case_control_ratio: f64,

    /// Association tool executable
    #[arg(long, default_value = "./seer")]
    tool: PathBuf,

    /// Extra argument passed to the tool before the fixed flags (repeatable)
    #[arg(long = "tool-arg", allow_hyphen_values = true)]
    tool_args: Vec<String>,

    /// k-mer/feature file passed to the tool with `-k`
    #[arg(long, default_value = "gene_kmers.txt.gz")]
    kmer_file: PathBuf,

    /// Per-trial time limit in seconds (0 waits indefinitely)
    #[arg(long, default_value_t = 0.0)]
    timeout_secs: f64,

    /// Random seed; drawn at random and logged when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Number of trials to run concurrently
    #[arg(long, default_value_t = 1)]
    n_threads: usize,

    /// Format of the staged structure matrix ('binary' or 'text')
    #[arg(long, default_value = "binary")]
    struct_format: MatrixFormat,

    /// Directory for staged phenotype and structure files
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Write result rows here instead of stdout (`.gz` is compressed)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Write a per-cell power table to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Scores above this count as a detection in the power table
    #[arg(long, default_value_t = 0)]
    hit_threshold: i64,
}

impl Cli {
    fn to_config(&self) -> Result<SimulationConfig, ConfigError> {
        let timeout = timeout_from_secs(self.timeout_secs)?;

        Ok(SimulationConfig {
            odds_ratio: OddsRatioRange { start: self.or_start, step: self.or_step, end: self.or_end },
            sample_size: SampleSizeRange {
                start: self.samples_start,
                step: self.samples_step,
                end: self.samples_end,
            },
            repeats: self.repeats,
            maf: self.maf,
            case_control_ratio: self.case_control_ratio,
            tool: ToolConfig {
                program: self.tool.clone(),
                pre_args: self.tool_args.clone(),
                kmer_file: self.kmer_file.clone(),
                timeout,
            },
            seed: self.seed,
            threads: self.n_threads,
            structure_format: self.struct_format,
            scratch_dir: self.scratch_dir.clone(),
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let config = cli.to_config()?;
    config.validate()?;
    log::info!("Starting power simulation");
    log::debug!("Configuration: {:?}", config);
    log::info!("Running up to {} trials concurrently", config.threads);

    // ===================================================================
    // 1. Load population roster and structure matrix
    // ===================================================================
    let population = Population::load(&cli.roster_file, &cli.structure_file)?;
    log::info!(
        "Population: {} samples, carrier frequency {:.3} (model MAF {})",
        population.len(),
        population.carriers() as f64 / population.len() as f64,
        config.maf
    );
    if config.sample_size.end > population.len() {
        log::warn!(
            "Sample sizes above {} exceed the population and will be reported as failed trials",
            population.len()
        );
    }

    // ===================================================================
    // 2. Run the sweep
    // ===================================================================
    let seed = config.seed.unwrap_or_else(rand::random);
    let runner = TrialRunner::new(&population, &config);
    let mut output = open_output(cli.output.as_deref())?;
    let results = run_sweep(&runner, &config, seed, &mut output)?;
    output.finish()?;

    // ===================================================================
    // 3. Optional power table
    // ===================================================================
    if let Some(summary_file) = &cli.summary {
        log::info!("Writing power summary to {:?}", summary_file);
        let points = summarize_power(&results, cli.hit_threshold);
        write_power_summary(BufWriter::new(File::create(summary_file)?), &points)?;
    }

    log::info!("Power simulation completed successfully.");
    Ok(())
}
