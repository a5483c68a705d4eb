//! Module for loading, row-projecting, and saving the population structure matrix
use ndarray::{Array2, Axis};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StructureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Binary matrix error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Malformed matrix at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("Row index {index} out of bounds for matrix with {rows} rows")]
    RowOutOfBounds { index: usize, rows: usize },
}

/// On-disk encodings for a structure matrix.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum MatrixFormat {
    /// bincode-serialized `Array2<f64>`
    Binary,
    /// Whitespace-delimited text, one row per line
    Text,
}

impl MatrixFormat {
    /// Binary for `.bin` files, text otherwise.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("bin") => MatrixFormat::Binary,
            _ => MatrixFormat::Text,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MatrixFormat::Binary => ".bin",
            MatrixFormat::Text => ".txt",
        }
    }
}

impl std::str::FromStr for MatrixFormat {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "binary" | "bin" | "b" => Ok(MatrixFormat::Binary),
            "text" | "txt" | "t" => Ok(MatrixFormat::Text),
            _ => Err("Unknown matrix format. Use 'binary' or 'text'."),
        }
    }
}

/// Loads a structure matrix, choosing the decoder from the file extension
pub fn load_structure_matrix(path: &Path) -> Result<Array2<f64>, StructureError> {
    let format = MatrixFormat::from_path(path);
    log::info!("Loading structure matrix from {:?} ({:?})", path, format);

    let reader = BufReader::new(File::open(path)?);
    let matrix = match format {
        MatrixFormat::Binary => bincode::deserialize_from(reader)?,
        MatrixFormat::Text => read_text_matrix(reader)?,
    };

    log::info!("Structure matrix loaded: {} x {}", matrix.nrows(), matrix.ncols());
    Ok(matrix)
}

/// Saves a structure matrix in the requested format
pub fn save_structure_matrix(
    path: &Path,
    matrix: &Array2<f64>,
    format: MatrixFormat,
) -> Result<(), StructureError> {
    let file = File::create(path)?;
    write_structure_matrix(BufWriter::new(file), matrix, format)
}

pub fn write_structure_matrix<W: Write>(
    mut writer: W,
    matrix: &Array2<f64>,
    format: MatrixFormat,
) -> Result<(), StructureError> {
    match format {
        MatrixFormat::Binary => bincode::serialize_into(&mut writer, matrix)?,
        MatrixFormat::Text => {
            for row in matrix.rows() {
                let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                writeln!(writer, "{}", line.join(" "))?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

fn read_text_matrix<R: BufRead>(reader: R) -> Result<Array2<f64>, StructureError> {
    let mut values = Vec::new();
    let mut n_cols: Option<usize> = None;
    let mut n_rows = 0;

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let row = line
            .split_whitespace()
            .map(|tok| tok.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| StructureError::Malformed {
                line: line_idx + 1,
                reason: e.to_string(),
            })?;

        match n_cols {
            None => n_cols = Some(row.len()),
            Some(expected) if expected != row.len() => {
                return Err(StructureError::Malformed {
                    line: line_idx + 1,
                    reason: format!("expected {} columns, found {}", expected, row.len()),
                });
            }
            _ => {}
        }

        values.extend(row);
        n_rows += 1;
    }

    Array2::from_shape_vec((n_rows, n_cols.unwrap_or(0)), values).map_err(|e| {
        StructureError::Malformed { line: n_rows, reason: e.to_string() }
    })
}

/// Restricts the matrix to `rows`, in the given order, values untouched.
pub fn project_rows(matrix: &Array2<f64>, rows: &[usize]) -> Result<Array2<f64>, StructureError> {
    if let Some(&index) = rows.iter().find(|&&r| r >= matrix.nrows()) {
        return Err(StructureError::RowOutOfBounds { index, rows: matrix.nrows() });
    }
    Ok(matrix.select(Axis(0), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn four_rows() -> Array2<f64> {
        array![
            [0.0, 0.1, 0.2],
            [1.0, 1.1, 1.2],
            [2.0, 2.1, 2.2],
            [3.0, 3.1, 3.2],
        ]
    }

    #[test]
    fn test_project_keeps_selected_rows_in_order() {
        let projected = project_rows(&four_rows(), &[3, 1]).unwrap();
        assert_eq!(projected, array![[3.0, 3.1, 3.2], [1.0, 1.1, 1.2]]);
    }

    #[test]
    fn test_project_out_of_bounds() {
        let err = project_rows(&four_rows(), &[0, 4]).unwrap_err();
        assert!(matches!(err, StructureError::RowOutOfBounds { index: 4, rows: 4 }));
    }

    #[test]
    fn test_binary_save_and_load() {
        let file = tempfile::Builder::new().suffix(".bin").tempfile().unwrap();
        save_structure_matrix(file.path(), &four_rows(), MatrixFormat::Binary).unwrap();
        assert_eq!(load_structure_matrix(file.path()).unwrap(), four_rows());
    }

    #[test]
    fn test_text_load() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1 2.5").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "3\t-4e-1").unwrap();
        let m = load_structure_matrix(file.path()).unwrap();
        assert_eq!(m, array![[1.0, 2.5], [3.0, -0.4]]);
    }

    #[test]
    fn test_text_ragged_rows_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1 2").unwrap();
        writeln!(file, "3").unwrap();
        let err = load_structure_matrix(file.path()).unwrap_err();
        assert!(matches!(err, StructureError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_text_write() {
        let mut buf = Vec::new();
        write_structure_matrix(&mut buf, &array![[1.0, 0.5], [2.0, 3.0]], MatrixFormat::Text)
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "1 0.5\n2 3\n");
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("binary".parse::<MatrixFormat>().unwrap(), MatrixFormat::Binary);
        assert_eq!("TXT".parse::<MatrixFormat>().unwrap(), MatrixFormat::Text);
        assert!("armadillo".parse::<MatrixFormat>().is_err());
    }
}
