//! Module for driving the (odds ratio, sample size, repeat) sweep.
use crate::config::SimulationConfig;
use crate::trial::TrialExecutor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use thiserror::Error;

/// Cells dispatched per thread before their rows are written out.
const CHUNK_FACTOR: usize = 4;

/// Marker written in place of a score when a trial fails.
pub const FAILURE_MARKER: &str = "ERROR";

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Could not write results: {0}")]
    Output(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not build trial thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// One cell of the sweep grid.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct TrialParams {
    pub odds_ratio: f64,
    pub sample_size: usize,
    /// 1-based repeat index
    pub repeat: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    Score(i64),
    Failed(String),
}

impl fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialOutcome::Score(n) => write!(f, "{}", n),
            TrialOutcome::Failed(_) => f.write_str(FAILURE_MARKER),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialResult {
    pub params: TrialParams,
    pub outcome: TrialOutcome,
}

/// Enumerates the grid: odds ratio outermost, then sample size, then repeat.
pub fn generate_grid(config: &SimulationConfig) -> Vec<TrialParams> {
    let sample_sizes = config.sample_size.values();
    let mut grid = Vec::with_capacity(config.total_trials());

    for odds_ratio in config.odds_ratio.values() {
        for &sample_size in &sample_sizes {
            for repeat in 1..=config.repeats {
                grid.push(TrialParams { odds_ratio, sample_size, repeat });
            }
        }
    }

    grid
}

fn execute_cell<E: TrialExecutor>(executor: &E, params: &TrialParams, seed: u64) -> TrialResult {
    let mut rng = StdRng::seed_from_u64(seed);
    let outcome = match executor.run_trial(params.sample_size, params.odds_ratio, &mut rng) {
        Ok(score) => TrialOutcome::Score(score),
        Err(e) => {
            log::warn!(
                "Trial OR={} n={} repeat={} failed: {}",
                params.odds_ratio, params.sample_size, params.repeat, e
            );
            TrialOutcome::Failed(e.to_string())
        }
    };
    TrialResult { params: *params, outcome }
}

/// Runs every cell of the grid and streams `OR<TAB>n<TAB>repeat<TAB>result` rows.
///
/// Trials run on a dedicated rayon pool of `config.threads` workers, which
/// bounds the number of live tool processes. Cell `i` draws from a generator seeded
/// with `seed + i`, so the rows are identical for a given seed whatever the
/// thread count. Rows are written in grid order, one chunk at a time.
/// Failed trials are logged and written with the failure marker; only errors
/// writing the output abort the sweep.
pub fn run_sweep<E: TrialExecutor, W: Write + ?Sized>(
    executor: &E,
    config: &SimulationConfig,
    seed: u64,
    writer: &mut W,
) -> Result<Vec<TrialResult>, SweepError> {
    let grid = generate_grid(config);
    let total = grid.len();
    log::info!(
        "Running {} trials ({} odds ratios x {} sample sizes x {} repeats) with seed {}",
        total,
        config.odds_ratio.values().len(),
        config.sample_size.values().len(),
        config.repeats,
        seed
    );

    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.max(1))
        .thread_name(|i| format!("trial-{}", i))
        .build()?;
    let chunk_size = config.threads.max(1) * CHUNK_FACTOR;
    let mut results = Vec::with_capacity(total);

    for (chunk_idx, chunk) in grid.chunks(chunk_size).enumerate() {
        let offset = chunk_idx * chunk_size;
        let chunk_results: Vec<TrialResult> = pool.install(|| {
            chunk
                .par_iter()
                .enumerate()
                .map(|(i, params)| {
                    let cell_seed = seed.wrapping_add((offset + i) as u64);
                    execute_cell(executor, params, cell_seed)
                })
                .collect()
        });

        for result in &chunk_results {
            csv_writer.write_record([
                result.params.odds_ratio.to_string(),
                result.params.sample_size.to_string(),
                result.params.repeat.to_string(),
                result.outcome.to_string(),
            ])?;
        }
        csv_writer.flush()?;

        results.extend(chunk_results);
        log::debug!("Completed {}/{} trials", results.len(), total);
    }

    let failed = results
        .iter()
        .filter(|r| matches!(r.outcome, TrialOutcome::Failed(_)))
        .count();
    log::info!("Sweep finished: {} trials, {} failed", total, failed);

    Ok(results)
}

/// Detection rate of one (odds ratio, sample size) cell.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PowerPoint {
    pub odds_ratio: f64,
    pub sample_size: usize,
    pub successful: usize,
    pub failed: usize,
    pub detected: usize,
    /// `detected / successful`, empty when no trial succeeded
    pub power: Option<f64>,
}

/// Aggregates trial results into per-cell power, in grid order.
///
/// A successful trial counts as a detection when its score exceeds `hit_threshold`.
pub fn summarize_power(results: &[TrialResult], hit_threshold: i64) -> Vec<PowerPoint> {
    let mut points: Vec<PowerPoint> = Vec::new();
    let mut index: HashMap<(u64, usize), usize> = HashMap::new();

    for result in results {
        let key = (result.params.odds_ratio.to_bits(), result.params.sample_size);
        let slot = *index.entry(key).or_insert_with(|| {
            points.push(PowerPoint {
                odds_ratio: result.params.odds_ratio,
                sample_size: result.params.sample_size,
                successful: 0,
                failed: 0,
                detected: 0,
                power: None,
            });
            points.len() - 1
        });

        let point = &mut points[slot];
        match result.outcome {
            TrialOutcome::Score(score) => {
                point.successful += 1;
                if score > hit_threshold {
                    point.detected += 1;
                }
            }
            TrialOutcome::Failed(_) => point.failed += 1,
        }
    }

    for point in &mut points {
        if point.successful > 0 {
            point.power = Some(point.detected as f64 / point.successful as f64);
        }
    }

    points
}

/// Writes the power table as a headed TSV.
pub fn write_power_summary<W: Write>(writer: W, points: &[PowerPoint]) -> Result<(), csv::Error> {
    let mut csv_writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    for point in points {
        csv_writer.serialize(point)?;
    }
    csv_writer.flush()?;
    Ok(())
}
