//! Module for handling I/O, roster loading, and roster/matrix alignment.
use crate::structure::{load_structure_matrix, StructureError};
use crate::Sample;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Structure matrix error: {0}")]
    Structure(#[from] StructureError),
    #[error("Malformed roster line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },
    #[error("Empty roster: {0}")]
    EmptyRoster(String),
    #[error("Data alignment error: {0}")]
    Alignment(String),
}

/// The read-only source population shared by every trial.
#[derive(Debug)]
pub struct Population {
    samples: Vec<Sample>,
    structure: Array2<f64>,
}

impl Population {
    /// Pairs a roster with its structure matrix; row `i` must describe sample `i`.
    pub fn new(samples: Vec<Sample>, structure: Array2<f64>) -> Result<Self, IoError> {
        if structure.nrows() != samples.len() {
            return Err(IoError::Alignment(format!(
                "Structure matrix has {} rows but roster has {} samples",
                structure.nrows(),
                samples.len()
            )));
        }
        Ok(Self { samples, structure })
    }

    /// Loads the roster and structure matrix from disk.
    pub fn load(roster_file: &Path, structure_file: &Path) -> Result<Self, IoError> {
        let samples = load_roster(roster_file)?;
        if !structure_file.exists() {
            return Err(IoError::NotFound(structure_file.to_string_lossy().into()));
        }
        let structure = load_structure_matrix(structure_file)?;
        Self::new(samples, structure)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn structure(&self) -> &Array2<f64> {
        &self.structure
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn carriers(&self) -> usize {
        self.samples.iter().filter(|s| s.element_present).count()
    }
}

/// Reads a `<name> <0|1>` roster, one individual per line.
pub fn load_roster(roster_file: &Path) -> Result<Vec<Sample>, IoError> {
    if !roster_file.exists() {
        return Err(IoError::NotFound(roster_file.to_string_lossy().into()));
    }
    log::info!("Loading population roster: {:?}", roster_file);

    let samples = read_roster(BufReader::new(File::open(roster_file)?))?;
    if samples.is_empty() {
        return Err(IoError::EmptyRoster(roster_file.to_string_lossy().into()));
    }

    log::info!(
        "Loaded {} samples ({} carry the element)",
        samples.len(),
        samples.iter().filter(|s| s.element_present).count()
    );
    Ok(samples)
}

pub fn read_roster<R: BufRead>(reader: R) -> Result<Vec<Sample>, IoError> {
    let mut samples = Vec::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        let malformed = |reason: String| IoError::MalformedLine { line: line_idx + 1, reason };

        match fields.as_slice() {
            [] => continue,
            [name, flag] => {
                let element_present = match *flag {
                    "0" => false,
                    "1" => true,
                    other => {
                        return Err(malformed(format!(
                            "presence flag for '{}' must be 0 or 1, got '{}'",
                            name, other
                        )))
                    }
                };
                samples.push(Sample::new(name, element_present));
            }
            _ => {
                return Err(malformed(format!(
                    "expected 2 whitespace-separated columns, found {}",
                    fields.len()
                )))
            }
        }
    }

    Ok(samples)
}

/// Destination for result rows.
///
/// Call `finish` once writing is done: for gzip output it writes the trailer
/// and reports any error doing so.
pub enum OutputSink {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
    Gzip(GzEncoder<File>),
}

impl OutputSink {
    pub fn finish(self) -> Result<(), IoError> {
        match self {
            OutputSink::Stdout(mut w) => w.flush()?,
            OutputSink::File(mut w) => w.flush()?,
            OutputSink::Gzip(encoder) => {
                encoder.finish()?;
            }
        }
        Ok(())
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            OutputSink::Stdout(w) => w.write(buf),
            OutputSink::File(w) => w.write(buf),
            OutputSink::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            OutputSink::Stdout(w) => w.flush(),
            OutputSink::File(w) => w.flush(),
            OutputSink::Gzip(w) => w.flush(),
        }
    }
}

/// Opens the result sink: stdout when no path is given, gzip for `.gz` paths.
pub fn open_output(path: Option<&Path>) -> Result<OutputSink, IoError> {
    match path {
        None => Ok(OutputSink::Stdout(BufWriter::new(std::io::stdout()))),
        Some(p) => {
            let file = File::create(p)?;
            if p.extension().and_then(|e| e.to_str()) == Some("gz") {
                log::info!("Writing gzip-compressed results to {:?}", p);
                Ok(OutputSink::Gzip(GzEncoder::new(file, Compression::default())))
            } else {
                log::info!("Writing results to {:?}", p);
                Ok(OutputSink::File(BufWriter::new(file)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_roster() {
        let input = "A 0\nB\t1\n\n  C 0  \nD 1\n";
        let samples = read_roster(Cursor::new(input)).unwrap();
        assert_eq!(
            samples,
            vec![
                Sample::new("A", false),
                Sample::new("B", true),
                Sample::new("C", false),
                Sample::new("D", true),
            ]
        );
    }

    #[test]
    fn test_read_roster_rejects_bad_flag() {
        let err = read_roster(Cursor::new("A 0\nB 2\n")).unwrap_err();
        assert!(matches!(err, IoError::MalformedLine { line: 2, .. }));
    }

    #[test]
    fn test_read_roster_rejects_missing_flag() {
        let err = read_roster(Cursor::new("A\n")).unwrap_err();
        assert!(matches!(err, IoError::MalformedLine { line: 1, .. }));
    }

    #[test]
    fn test_empty_roster_file() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(load_roster(file.path()), Err(IoError::EmptyRoster(_))));
    }

    #[test]
    fn test_missing_roster_file() {
        let err = load_roster(Path::new("/nonexistent/roster.txt")).unwrap_err();
        assert!(matches!(err, IoError::NotFound(_)));
    }

    #[test]
    fn test_population_alignment() {
        let samples = vec![Sample::new("A", false), Sample::new("B", true)];
        let err = Population::new(samples.clone(), array![[1.0], [2.0], [3.0]]).unwrap_err();
        assert!(matches!(err, IoError::Alignment(_)));

        let pop = Population::new(samples, array![[1.0], [2.0]]).unwrap();
        assert_eq!(pop.len(), 2);
        assert_eq!(pop.carriers(), 1);
    }

    #[test]
    fn test_population_load() {
        let mut roster = NamedTempFile::new().unwrap();
        writeln!(roster, "A 0\nB 1\nC 1").unwrap();
        let mut matrix = NamedTempFile::new().unwrap();
        writeln!(matrix, "0.1 0.2\n0.3 0.4\n0.5 0.6").unwrap();

        let pop = Population::load(roster.path(), matrix.path()).unwrap();
        assert_eq!(pop.len(), 3);
        assert_eq!(pop.structure().nrows(), 3);
    }

    #[test]
    fn test_gz_output_complete_after_finish() {
        let file = tempfile::Builder::new().suffix(".tsv.gz").tempfile().unwrap();
        let mut out = open_output(Some(file.path())).unwrap();
        assert!(matches!(out, OutputSink::Gzip(_)));
        writeln!(out, "1\t50\t1\t3").unwrap();
        out.finish().unwrap();

        let decoder = flate2::read::GzDecoder::new(File::open(file.path()).unwrap());
        let text = std::io::read_to_string(decoder).unwrap();
        assert_eq!(text, "1\t50\t1\t3\n");
    }

    #[test]
    fn test_plain_output_complete_after_finish() {
        let file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        let mut out = open_output(Some(file.path())).unwrap();
        assert!(matches!(out, OutputSink::File(_)));
        writeln!(out, "0.5\t50\t2\tERROR").unwrap();
        out.finish().unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "0.5\t50\t2\tERROR\n");
    }
}
