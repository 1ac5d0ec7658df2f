//! Linking the aggregated outage counts with the reshaped financial data.
//!
//! The join is an exact inner match on `(Company, Year, Quarter)` — a
//! format mismatch in any key drops the row silently rather than erroring.
//! Rows with any null are discarded, the measure is re-checked as numeric,
//! and the result is sorted by key and written as CSV without an index
//! column, overwriting any previous output.

use polars::prelude::*;
use std::path::Path;
use thiserror::Error;

use crate::config::{AliasTable, PrepOptions};
use crate::financial::{FinancialError, FinancialReshaper, MEASURE_COLUMN};
use crate::outage::{OutageError, OutageProcessor};

/// Join keys shared by both source-derived tables.
const LINK_KEYS: [&str; 3] = ["Company", "Year", "Quarter"];

/// Column order of the persisted output file.
const OUTPUT_COLUMNS: [&str; 5] = ["Company", "Year", "Quarter", "Count", "PP&E"];

#[derive(Debug, Error)]
pub enum LinkError {
    #[error(transparent)]
    Outage(#[from] OutageError),

    #[error(transparent)]
    Financial(#[from] FinancialError),

    #[error("no outage data survived filtering; nothing to link")]
    NoOutageData,

    #[error(transparent)]
    Frame(#[from] PolarsError),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv write error: {0}")]
    Csv(#[from] csv::Error),
}

/// Inner-join the two prepared frames, drop incomplete rows, and coerce the
/// measure column to numeric (dropping rows that fail).
pub fn link(outage: &DataFrame, financial: &DataFrame) -> Result<DataFrame, LinkError> {
    let joined = outage.inner_join(financial, LINK_KEYS, LINK_KEYS)?;
    let complete = drop_null_rows(&joined)?;
    let coerced = coerce_measure(complete)?;
    let sorted = coerced.sort(LINK_KEYS, SortMultipleOptions::default())?;
    println!("Data linked successfully.");
    Ok(sorted)
}

fn drop_null_rows(df: &DataFrame) -> PolarsResult<DataFrame> {
    if df.width() == 0 || df.height() == 0 {
        return Ok(df.clone());
    }
    let mut complete = df.get_columns()[0].as_materialized_series().is_not_null();
    for column in &df.get_columns()[1..] {
        complete = &complete & &column.as_materialized_series().is_not_null();
    }
    df.filter(&complete)
}

/// The financial pipeline already produces floats, but the output contract
/// requires the measure to be numeric and non-null regardless of what the
/// upstream frame held.
fn coerce_measure(df: DataFrame) -> PolarsResult<DataFrame> {
    let mut out = df;
    let measure = out.column(MEASURE_COLUMN)?;
    if measure.dtype() != &DataType::Float64 {
        let values = measure.str()?;
        let parsed: Float64Chunked = values
            .into_iter()
            .map(|cell| cell.and_then(|s| s.trim().parse::<f64>().ok()))
            .collect();
        out.with_column(parsed.with_name(MEASURE_COLUMN.into()).into_series())?;
    }
    let non_null: Vec<bool> = out
        .column(MEASURE_COLUMN)?
        .f64()?
        .into_iter()
        .map(|v| v.is_some())
        .collect();
    let mask = BooleanChunked::from_slice("measure_present".into(), &non_null);
    out.filter(&mask)
}

/// Serialize the linked frame to a CSV file at `path`, creating the parent
/// directory if absent and overwriting any existing file. No index column;
/// floats use Rust's shortest round-trip formatting so re-runs over
/// unchanged inputs are byte-identical.
pub fn save_csv(df: &DataFrame, path: &Path) -> Result<(), LinkError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(OUTPUT_COLUMNS)?;

    let companies = df.column("Company")?.str()?;
    let years = df.column("Year")?.i32()?;
    let quarters = df.column("Quarter")?.str()?;
    let counts = df.column("Count")?.u32()?;
    let measures = df.column(MEASURE_COLUMN)?.f64()?;

    for i in 0..df.height() {
        writer.write_record([
            companies.get(i).unwrap_or("").to_string(),
            years.get(i).unwrap_or_default().to_string(),
            quarters.get(i).unwrap_or("").to_string(),
            counts.get(i).unwrap_or_default().to_string(),
            format!("{}", measures.get(i).unwrap_or(f64::NAN)),
        ])?;
    }

    writer.flush().map_err(LinkError::Io)?;
    println!("Data saved successfully to {}.", path.display());
    Ok(())
}

/// End-to-end orchestration: aggregate outages, reshape financials, link.
#[derive(Debug)]
pub struct DataPreparer {
    linked: DataFrame,
}

impl DataPreparer {
    /// Run the full pipeline over the two source files.
    pub fn prepare(
        options: &PrepOptions,
        aliases: AliasTable,
        outage_path: &Path,
        financial_path: &Path,
    ) -> Result<Self, LinkError> {
        let mut outage =
            OutageProcessor::new(aliases.clone(), options.start_year, options.end_year);
        outage.load(outage_path)?;

        let mut financial = FinancialReshaper::new(aliases, options.normalize);
        let financial_df = financial.financial_data(financial_path)?;

        println!("Linking data...");
        let aggregated = outage.outage_frequency()?.ok_or(LinkError::NoOutageData)?;
        let linked = link(&aggregated, &financial_df)?;
        Ok(Self { linked })
    }

    /// The fully prepared, linked frame.
    pub fn data(&self) -> &DataFrame {
        &self.linked
    }

    /// Persist the linked frame.
    pub fn save_csv(&self, path: &Path) -> Result<(), LinkError> {
        save_csv(&self.linked, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outage_frame() -> DataFrame {
        df!(
            "Company" => &["AT&T Inc.", "Verizon Communications Inc."],
            "Year" => &[2022i32, 2022],
            "Quarter" => &["Q2", "Q2"],
            "Count" => &[3u32, 5],
        )
        .unwrap()
    }

    #[test]
    fn inner_join_requires_all_three_keys() {
        let financial = df!(
            "Company" => &["AT&T Inc.", "AT&T Inc.", "Verizon Communications Inc."],
            "Year" => &[2022i32, 2022, 2023],
            "Quarter" => &["Q2", "Q3", "Q2"],
            "PP&E" => &[7.5f64, 7.6, 5.0],
        )
        .unwrap();

        let linked = link(&outage_frame(), &financial).unwrap();

        // Only (AT&T, 2022, Q2) exists on both sides; Verizon's financial
        // row is 2023 and never joins.
        assert_eq!(linked.height(), 1);
        let companies = linked.column("Company").unwrap().str().unwrap();
        assert_eq!(companies.get(0), Some("AT&T Inc."));
        let counts = linked.column("Count").unwrap().u32().unwrap();
        assert_eq!(counts.get(0), Some(3));
        let measures = linked.column("PP&E").unwrap().f64().unwrap();
        assert_eq!(measures.get(0), Some(7.5));
    }

    #[test]
    fn quarter_format_mismatch_loses_rows_silently() {
        let financial = df!(
            "Company" => &["AT&T Inc."],
            "Year" => &[2022i32],
            "Quarter" => &["2"], // not "Q2"
            "PP&E" => &[7.5f64],
        )
        .unwrap();

        let linked = link(&outage_frame(), &financial).unwrap();
        assert_eq!(linked.height(), 0);
    }

    #[test]
    fn null_measures_are_dropped() {
        let financial = df!(
            "Company" => &["AT&T Inc.", "Verizon Communications Inc."],
            "Year" => &[2022i32, 2022],
            "Quarter" => &["Q2", "Q2"],
            "PP&E" => &[Some(7.5f64), None],
        )
        .unwrap();

        let linked = link(&outage_frame(), &financial).unwrap();
        assert_eq!(linked.height(), 1);
        let companies = linked.column("Company").unwrap().str().unwrap();
        assert_eq!(companies.get(0), Some("AT&T Inc."));
    }

    #[test]
    fn output_is_sorted_by_key() {
        let financial = df!(
            "Company" => &["Verizon Communications Inc.", "AT&T Inc."],
            "Year" => &[2022i32, 2022],
            "Quarter" => &["Q2", "Q2"],
            "PP&E" => &[5.0f64, 7.5],
        )
        .unwrap();

        let linked = link(&outage_frame(), &financial).unwrap();
        let companies = linked.column("Company").unwrap().str().unwrap();
        assert_eq!(companies.get(0), Some("AT&T Inc."));
        assert_eq!(companies.get(1), Some("Verizon Communications Inc."));
    }

    #[test]
    fn save_csv_writes_schema_without_index_and_is_idempotent() {
        let financial = df!(
            "Company" => &["AT&T Inc."],
            "Year" => &[2022i32],
            "Quarter" => &["Q2"],
            "PP&E" => &[7.5f64],
        )
        .unwrap();
        let linked = link(&outage_frame(), &financial).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prepared_data.csv");

        save_csv(&linked, &path).unwrap();
        let first = std::fs::read(&path).unwrap();
        save_csv(&linked, &path).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        let text = String::from_utf8(first).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Company,Year,Quarter,Count,PP&E"));
        assert_eq!(lines.next(), Some("AT&T Inc.,2022,Q2,3,7.5"));
        assert_eq!(lines.next(), None);
    }
}
