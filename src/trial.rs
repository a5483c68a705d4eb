//! Module for running a single power-simulation trial.
//!
//! A trial subsamples the population, stages a phenotype file and a projected
//! structure matrix, runs the external association tool on them, and parses the
//! integer it prints. Staged files are `tempfile` paths that are removed when
//! they go out of scope, so every exit path cleans up.
use crate::config::SimulationConfig;
use crate::io::Population;
use crate::phenotype::{assign_phenotypes, prob_case_given_absent, write_phenotypes, PhenotypeRecord};
use crate::sampler::{reservoir_sample, SampleError};
use crate::structure::{project_rows, save_structure_matrix, StructureError};
use rand::rngs::StdRng;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempPath;
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Characters of tool output kept in error messages
const MAX_REPORTED_OUTPUT: usize = 200;

#[derive(Error, Debug)]
pub enum TrialError {
    #[error("Sampling error: {0}")]
    Sampling(#[from] SampleError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not write phenotype file: {0}")]
    Phenotype(#[from] csv::Error),
    #[error("Could not stage structure matrix: {0}")]
    Structure(#[from] StructureError),
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Tool exited with {status}: {stderr}")]
    ExitStatus { status: ExitStatus, stderr: String },
    #[error("Tool did not finish within {0:?}")]
    Timeout(Duration),
    #[error("Tool output is not an integer: {0:?}")]
    Parse(String),
}

/// Runs one trial for a given sample size and odds ratio.
///
/// All randomness comes from `rng`, so a trial is reproducible from its seed.
pub trait TrialExecutor: Sync {
    fn run_trial(
        &self,
        sample_size: usize,
        odds_ratio: f64,
        rng: &mut StdRng,
    ) -> Result<i64, TrialError>;
}

/// Trial executor backed by the external association tool.
pub struct TrialRunner<'a> {
    population: &'a Population,
    config: &'a SimulationConfig,
}

impl<'a> TrialRunner<'a> {
    pub fn new(population: &'a Population, config: &'a SimulationConfig) -> Self {
        Self { population, config }
    }

    fn scratch_dir(&self) -> PathBuf {
        self.config
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Writes the phenotype assignment to a fresh temp file.
    fn stage_phenotypes(&self, records: &[PhenotypeRecord]) -> Result<TempPath, TrialError> {
        let mut file = tempfile::Builder::new()
            .prefix("pheno_")
            .suffix(".txt")
            .tempfile_in(self.scratch_dir())?;
        write_phenotypes(BufWriter::new(file.as_file_mut()), records)?;
        Ok(file.into_temp_path())
    }

    /// Writes the structure rows of the sampled individuals to a fresh temp file.
    fn stage_structure(&self, indices: &[usize]) -> Result<TempPath, TrialError> {
        let projected = project_rows(self.population.structure(), indices)?;
        let format = self.config.structure_format;
        let path = tempfile::Builder::new()
            .prefix("struct_")
            .suffix(format.extension())
            .tempfile_in(self.scratch_dir())?
            .into_temp_path();
        save_structure_matrix(&path, &projected, format)?;
        Ok(path)
    }

    /// `<program> <pre_args..> -k <kmer_file> -p <pheno> --struct <structure>`
    pub fn build_command(&self, pheno_file: &Path, structure_file: &Path) -> Command {
        let tool = &self.config.tool;
        let mut command = Command::new(&tool.program);
        command
            .args(&tool.pre_args)
            .arg("-k")
            .arg(&tool.kmer_file)
            .arg("-p")
            .arg(pheno_file)
            .arg("--struct")
            .arg(structure_file);
        command
    }

    fn invoke_tool(&self, pheno_file: &Path, structure_file: &Path) -> Result<i64, TrialError> {
        let tool = &self.config.tool;
        let scratch = self.scratch_dir();

        // Output goes to anonymous temp files so a chatty tool cannot block on a full pipe
        let stdout_file = tempfile::tempfile_in(&scratch)?;
        let stderr_file = tempfile::tempfile_in(&scratch)?;

        let mut command = self.build_command(pheno_file, structure_file);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file.try_clone()?))
            .stderr(Stdio::from(stderr_file.try_clone()?));
        log::debug!("Running {:?}", command);

        let mut child = command.spawn().map_err(|e| TrialError::Spawn {
            program: tool.program.display().to_string(),
            source: e,
        })?;
        let status = wait_with_timeout(&mut child, tool.timeout)?;

        if !status.success() {
            let stderr = read_captured(stderr_file)?;
            return Err(TrialError::ExitStatus {
                status,
                stderr: truncate(stderr.lines().next().unwrap_or("").trim()),
            });
        }

        let stdout = read_captured(stdout_file)?;
        log::debug!("Tool output: {:?}", stdout.trim());
        parse_tool_output(&stdout)
    }
}

impl TrialExecutor for TrialRunner<'_> {
    fn run_trial(
        &self,
        sample_size: usize,
        odds_ratio: f64,
        rng: &mut StdRng,
    ) -> Result<i64, TrialError> {
        let indices = reservoir_sample(sample_size, self.population.len(), rng)?;
        log::debug!("Sampled {} of {} individuals", indices.len(), self.population.len());

        let p_absent = prob_case_given_absent(odds_ratio, self.config.maf, self.config.case_control_ratio);
        let records = assign_phenotypes(self.population.samples(), &indices, p_absent, rng);
        let n_cases = records.iter().filter(|r| r.label == 1).count();
        log::debug!(
            "OR {}: P(case | absent) = {:.4}, {} cases / {} controls",
            odds_ratio, p_absent, n_cases, records.len() - n_cases
        );

        let pheno_file = self.stage_phenotypes(&records)?;
        let structure_file = self.stage_structure(&indices)?;

        let result = self.invoke_tool(&pheno_file, &structure_file);

        remove_staged(pheno_file);
        remove_staged(structure_file);
        result
    }
}

/// Parses the tool's stdout as a single integer.
pub fn parse_tool_output(output: &str) -> Result<i64, TrialError> {
    let trimmed = output.trim();
    trimmed
        .parse::<i64>()
        .map_err(|_| TrialError::Parse(truncate(trimmed)))
}

fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus, TrialError> {
    let Some(limit) = timeout else {
        return Ok(child.wait()?);
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        let elapsed = start.elapsed();
        if elapsed >= limit {
            if let Err(e) = child.kill() {
                log::warn!("Failed to kill timed out tool (pid {}): {}", child.id(), e);
            }
            // Reap so the killed child does not linger as a zombie
            let _ = child.wait();
            return Err(TrialError::Timeout(limit));
        }
        std::thread::sleep(POLL_INTERVAL.min(limit - elapsed));
    }
}

fn read_captured(mut file: File) -> Result<String, TrialError> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_REPORTED_OUTPUT).collect()
}

fn remove_staged(path: TempPath) {
    let display = path.display().to_string();
    if let Err(e) = path.close() {
        log::warn!("Failed to remove staged file {}: {}", display, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Sample;
    use ndarray::array;
    use rand::SeedableRng;
    use std::ffi::OsStr;

    fn population() -> Population {
        let samples = vec![
            Sample::new("A", false),
            Sample::new("B", true),
            Sample::new("C", false),
            Sample::new("D", true),
        ];
        Population::new(samples, array![[0.0, 0.5], [1.0, 1.5], [2.0, 2.5], [3.0, 3.5]]).unwrap()
    }

    fn config_with_script(script: &str, scratch: &Path) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.tool.program = PathBuf::from("sh");
        config.tool.pre_args = vec!["-c".into(), script.into(), "tool".into()];
        config.scratch_dir = Some(scratch.to_path_buf());
        config
    }

    fn scratch_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_parse_tool_output() {
        assert_eq!(parse_tool_output("42\n").unwrap(), 42);
        assert_eq!(parse_tool_output("  -3 ").unwrap(), -3);
        assert!(matches!(parse_tool_output("Error: bad input"), Err(TrialError::Parse(_))));
        assert!(matches!(parse_tool_output(""), Err(TrialError::Parse(_))));
    }

    #[test]
    fn test_command_line_layout() {
        let pop = population();
        let mut config = SimulationConfig::default();
        config.tool.kmer_file = PathBuf::from("kmers.gz");
        let runner = TrialRunner::new(&pop, &config);
        let command = runner.build_command(Path::new("p.txt"), Path::new("s.bin"));

        assert_eq!(command.get_program(), OsStr::new("./seer"));
        let args: Vec<_> = command.get_args().collect();
        assert_eq!(args, ["-k", "kmers.gz", "-p", "p.txt", "--struct", "s.bin"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_trial_counts_phenotype_lines_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let pop = population();
        // $4 is the phenotype file
        let config = config_with_script("wc -l < \"$4\"", scratch.path());
        let runner = TrialRunner::new(&pop, &config);

        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(runner.run_trial(3, 2.0, &mut rng).unwrap(), 3);
        assert!(scratch_is_empty(scratch.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_staged_structure_matches_sampled_rows() {
        let scratch = tempfile::tempdir().unwrap();
        let pop = population();
        // Echo the first column of the staged text matrix, and the sampled names, to stderr via a failing exit
        let mut config = config_with_script(
            "cut -f1 \"$4\" | tr '\\n' ' ' >&2; cut -d' ' -f1 \"$6\" | tr '\\n' ' ' >&2; exit 3",
            scratch.path(),
        );
        config.structure_format = crate::MatrixFormat::Text;
        let runner = TrialRunner::new(&pop, &config);

        let mut rng = StdRng::seed_from_u64(9);
        let err = runner.run_trial(2, 1.0, &mut rng).unwrap_err();
        let stderr = match err {
            TrialError::ExitStatus { status, stderr } => {
                assert_eq!(status.code(), Some(3));
                stderr
            }
            other => panic!("unexpected error: {}", other),
        };

        let tokens: Vec<&str> = stderr.split_whitespace().collect();
        assert_eq!(tokens.len(), 4);
        let names = &tokens[..2];
        let first_col = &tokens[2..];
        for (name, value) in names.iter().zip(first_col) {
            let row = ["A", "B", "C", "D"].iter().position(|n| n == name).unwrap();
            assert_eq!(value.parse::<f64>().unwrap(), row as f64);
        }
        assert!(scratch_is_empty(scratch.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_integer_output_is_parse_error() {
        let scratch = tempfile::tempdir().unwrap();
        let pop = population();
        let config = config_with_script("echo 'no hits'", scratch.path());
        let runner = TrialRunner::new(&pop, &config);

        let err = runner.run_trial(2, 1.0, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, TrialError::Parse(ref s) if s == "no hits"));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_tool() {
        let scratch = tempfile::tempdir().unwrap();
        let pop = population();
        let mut config = config_with_script("sleep 5; echo 1", scratch.path());
        config.tool.timeout = Some(Duration::from_millis(200));
        let runner = TrialRunner::new(&pop, &config);

        let start = Instant::now();
        let err = runner.run_trial(2, 1.0, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, TrialError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let scratch = tempfile::tempdir().unwrap();
        let pop = population();
        let mut config = SimulationConfig::default();
        config.tool.program = PathBuf::from("/nonexistent/association-tool");
        config.scratch_dir = Some(scratch.path().to_path_buf());
        let runner = TrialRunner::new(&pop, &config);

        let err = runner.run_trial(2, 1.0, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, TrialError::Spawn { .. }));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_missing_scratch_dir_fails_staging() {
        let scratch = tempfile::tempdir().unwrap();
        let pop = population();
        let config = config_with_script("echo 1", &scratch.path().join("missing"));
        let runner = TrialRunner::new(&pop, &config);

        let err = runner.run_trial(2, 1.0, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, TrialError::Io(_)));
        assert!(scratch_is_empty(scratch.path()));
    }

    #[test]
    fn test_oversized_sample_fails_before_staging() {
        let scratch = tempfile::tempdir().unwrap();
        let pop = population();
        let config = config_with_script("echo 1", scratch.path());
        let runner = TrialRunner::new(&pop, &config);

        let err = runner.run_trial(5, 1.0, &mut StdRng::seed_from_u64(1)).unwrap_err();
        assert!(matches!(err, TrialError::Sampling(_)));
        assert!(scratch_is_empty(scratch.path()));
    }
}
