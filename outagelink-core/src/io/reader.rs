//! Tabular reader: loads CSV or spreadsheet files into a polars frame.
//!
//! Dispatches on file extension. CSV bytes are decoded per the detected
//! encoding before parsing; XLS/XLSX inputs go through calamine, first
//! sheet only, with every cell stringified so header handling can happen
//! downstream. No header row is assumed unless the caller asks for one.

use calamine::{open_workbook_auto, Data, Reader};
use polars::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::encoding::{self, EncodingError};

/// Classified read failures.
///
/// An unsupported extension is a configuration error and fatal; the rest
/// describe the source file precisely enough for the caller to report a
/// useful message instead of a raw parser trace.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("no data: {0} is empty")]
    Empty(PathBuf),

    #[error("parsing error: {path} is malformed: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("unsupported file format: '{0}'")]
    UnsupportedFormat(String),

    #[error("unexpected error reading {path}: {reason}")]
    Unexpected { path: PathBuf, reason: String },
}

impl ReadError {
    pub(crate) fn from_io(path: &Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            ReadError::FileNotFound(path.to_path_buf())
        } else {
            ReadError::Unexpected {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }
        }
    }
}

/// Reader options. The financial loader reads headerless; the generic
/// contract treats the first row as data unless told otherwise.
#[derive(Debug, Clone, Copy)]
pub struct TableOptions {
    pub has_header: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self { has_header: false }
    }
}

/// Load a tabular file into a DataFrame, dispatching on extension.
pub fn read_table(path: &Path, opts: TableOptions) -> Result<DataFrame, ReadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => read_csv_table(path, opts),
        "xls" | "xlsx" => read_excel_table(path),
        other => Err(ReadError::UnsupportedFormat(other.to_string())),
    }
}

fn read_csv_table(path: &Path, opts: TableOptions) -> Result<DataFrame, ReadError> {
    let detected = encoding::detect(path)?;
    let bytes = std::fs::read(path).map_err(|e| ReadError::from_io(path, e))?;
    if bytes.is_empty() {
        return Err(ReadError::Empty(path.to_path_buf()));
    }
    let text = detected.decode(&bytes);

    let mut options = CsvReadOptions::default().with_has_header(opts.has_header);
    if !opts.has_header {
        // All-string schema: typing happens in the pipeline stages, not here.
        options = options.with_infer_schema_length(Some(0));
    }

    options
        .into_reader_with_file_handle(Cursor::new(text.into_bytes()))
        .finish()
        .map_err(|e| match e {
            PolarsError::NoData(_) => ReadError::Empty(path.to_path_buf()),
            other => ReadError::Parse {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })
}

fn read_excel_table(path: &Path) -> Result<DataFrame, ReadError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| match e {
        calamine::Error::Io(io) => ReadError::from_io(path, io),
        other => ReadError::Parse {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ReadError::Empty(path.to_path_buf()))?
        .map_err(|e| ReadError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let (height, width) = range.get_size();
    if height == 0 || width == 0 {
        return Err(ReadError::Empty(path.to_path_buf()));
    }

    // Column-major string cells under the same generated names polars uses
    // for headerless CSV, so both sources look identical downstream.
    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(height); width];
    for row in range.rows() {
        for (col_idx, column) in cells.iter_mut().enumerate() {
            column.push(row.get(col_idx).and_then(cell_to_string));
        }
    }

    let columns: Vec<Column> = cells
        .into_iter()
        .enumerate()
        .map(|(i, values)| Column::new(format!("column_{}", i + 1).into(), values))
        .collect();

    DataFrame::new(columns).map_err(|e| ReadError::Unexpected {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Stringify a spreadsheet cell. Empty cells and error markers (the `#NAME?`
/// family) become nulls, matching the `#`-prefix rule for CSV inputs.
fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(f) => Some(format!("{f}")),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => Some(format!("{}", dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, bytes: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn unsupported_extension_is_a_configuration_error() {
        let err = read_table(Path::new("data.parquet"), TableOptions::default()).unwrap_err();
        assert!(matches!(err, ReadError::UnsupportedFormat(ext) if ext == "parquet"));
    }

    #[test]
    fn missing_csv_reports_file_not_found() {
        let err = read_table(Path::new("no/such/data.csv"), TableOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            ReadError::Encoding(EncodingError::FileNotFound(_))
        ));
    }

    #[test]
    fn empty_csv_reports_empty() {
        let (_dir, path) = write_temp("empty.csv", b"");
        let err = read_table(&path, TableOptions::default()).unwrap_err();
        assert!(matches!(err, ReadError::Empty(_)));
    }

    #[test]
    fn headerless_csv_loads_all_string_with_generated_names() {
        let (_dir, path) = write_temp("data.csv", b"Company,CQ12023\nVerizon,5\n");
        let df = read_table(&path, TableOptions { has_header: false }).unwrap();

        assert_eq!(df.height(), 2);
        let names = df.get_column_names_str();
        assert_eq!(names, vec!["column_1", "column_2"]);
        // First row is data, not headers; every cell is a string.
        let first = df.column("column_1").unwrap().str().unwrap();
        assert_eq!(first.get(0), Some("Company"));
        let second = df.column("column_2").unwrap().str().unwrap();
        assert_eq!(second.get(1), Some("5"));
    }

    #[test]
    fn headered_csv_uses_first_row_as_columns() {
        let (_dir, path) = write_temp("data.csv", b"Company,Count\nVerizon,3\nCharter,1\n");
        let df = read_table(&path, TableOptions { has_header: true }).unwrap();

        assert_eq!(df.height(), 2);
        assert!(df.column("Company").is_ok());
        assert!(df.column("Count").is_ok());
    }

    #[test]
    fn windows_1252_csv_decodes_before_parsing() {
        // "Télécom" with 0xE9 in Windows-1252.
        let (_dir, path) = write_temp("data.csv", b"T\xE9l\xE9com,1\n");
        let df = read_table(&path, TableOptions { has_header: false }).unwrap();
        let first = df.column("column_1").unwrap().str().unwrap();
        assert_eq!(first.get(0), Some("Télécom"));
    }
}
