//! Outage incident aggregation.
//!
//! Streams the incident CSV in bounded batches, resolves company identity
//! through the alias table, filters to final reports inside the configured
//! year range, then aggregates to incident counts per
//! `(Company, Year, Quarter)`.
//!
//! Timestamp parsing tries an ordered list of known formats against the
//! whole batch; the first format that parses every value wins. If none
//! does, each value is parsed permissively and failures become nulls,
//! which the year-range predicate then excludes. Dropped rows are not
//! reported individually, only as the aggregate count shrinking.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

use crate::config::AliasTable;
use crate::io::encoding;
use crate::io::reader::ReadError;

/// Rows per processing batch. Bounds peak memory for large incident logs.
pub const BATCH_SIZE: usize = 10_000;

/// Fixed source column names — the external contract of the outage export.
pub const COL_COMPANY: &str = "u_company";
pub const COL_TIMESTAMP: &str = "u_incident_date_time";
pub const COL_STATUS: &str = "u_outage_report_status";

/// The one report status that counts as a confirmed outage.
const FINAL_STATUS: &str = "Final";

#[derive(Debug, Error)]
pub enum OutageError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("outage file is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Frame(#[from] PolarsError),
}

impl From<encoding::EncodingError> for OutageError {
    fn from(e: encoding::EncodingError) -> Self {
        OutageError::Read(ReadError::Encoding(e))
    }
}

/// One candidate timestamp layout. Date-only layouts gain a midnight time
/// so every strategy yields the same type.
#[derive(Debug, Clone, Copy)]
enum DateStrategy {
    DateTime(&'static str),
    DateOnly(&'static str),
}

impl DateStrategy {
    fn parse(self, raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        match self {
            DateStrategy::DateTime(fmt) => NaiveDateTime::parse_from_str(raw, fmt).ok(),
            DateStrategy::DateOnly(fmt) => NaiveDate::parse_from_str(raw, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
        }
    }
}

/// Candidate formats, tried in order. Order matters: the first format that
/// parses an entire batch is used for that batch.
const DATE_FORMATS: [DateStrategy; 4] = [
    DateStrategy::DateTime("%Y-%m-%d %H:%M:%S"),
    DateStrategy::DateTime("%d-%m-%Y %H:%M"),
    DateStrategy::DateOnly("%m/%d/%Y"),
    DateStrategy::DateOnly("%Y-%m-%d"),
];

/// Parse a batch's timestamp column.
///
/// Strict pass first: one format must account for every value. Otherwise
/// fall back to permissive per-value parsing, coercing failures to null.
fn convert_timestamps(values: &[&str]) -> Vec<Option<NaiveDateTime>> {
    for strategy in DATE_FORMATS {
        let parsed: Vec<Option<NaiveDateTime>> =
            values.iter().map(|v| strategy.parse(v)).collect();
        if parsed.iter().all(Option::is_some) {
            return parsed;
        }
    }
    values
        .iter()
        .map(|v| DATE_FORMATS.iter().find_map(|s| s.parse(v)))
        .collect()
}

/// A raw incident row, held only for the lifetime of its batch.
struct RawIncident {
    company: String,
    timestamp: String,
    status: String,
}

/// A row that survived all batch filters.
struct FilteredIncident {
    company: String,
    year: i32,
    quarter: u32,
}

fn calendar_quarter(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

/// Loads, filters and aggregates outage incident records.
pub struct OutageProcessor {
    aliases: AliasTable,
    start_year: i32,
    end_year: i32,
    data: Option<DataFrame>,
}

impl OutageProcessor {
    pub fn new(aliases: AliasTable, start_year: i32, end_year: i32) -> Self {
        Self {
            aliases,
            start_year,
            end_year,
            data: None,
        }
    }

    /// Read the incident file in [`BATCH_SIZE`] row batches, filter each
    /// batch, and combine the survivors into one frame with derived
    /// `Year` and `Quarter` columns.
    pub fn load(&mut self, path: &Path) -> Result<(), OutageError> {
        let detected = encoding::detect(path)?;
        let file = File::open(path).map_err(|e| ReadError::from_io(path, e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader.byte_headers()?.clone();
        let column_index = |name: &'static str| -> Result<usize, OutageError> {
            headers
                .iter()
                .position(|h| detected.decode(h) == name)
                .ok_or(OutageError::MissingColumn(name))
        };
        let company_idx = column_index(COL_COMPANY)?;
        let timestamp_idx = column_index(COL_TIMESTAMP)?;
        let status_idx = column_index(COL_STATUS)?;

        let mut survivors: Vec<FilteredIncident> = Vec::new();
        let mut batch: Vec<RawIncident> = Vec::with_capacity(BATCH_SIZE);

        for record in reader.byte_records() {
            let record = record?;
            let field = |idx: usize| {
                record
                    .get(idx)
                    .map(|bytes| detected.decode(bytes))
                    .unwrap_or_default()
            };
            batch.push(RawIncident {
                company: field(company_idx),
                timestamp: field(timestamp_idx),
                status: field(status_idx),
            });
            if batch.len() == BATCH_SIZE {
                self.filter_batch(&batch, &mut survivors);
                batch.clear();
            }
        }
        if !batch.is_empty() {
            self.filter_batch(&batch, &mut survivors);
        }

        self.data = Some(combine(&survivors)?);
        println!("Outage data loaded and processed successfully.");
        Ok(())
    }

    /// Apply the named per-batch predicates: timestamp parses, alias
    /// resolves to a canonical company, year in range, status is Final.
    fn filter_batch(&self, batch: &[RawIncident], survivors: &mut Vec<FilteredIncident>) {
        let raw_timestamps: Vec<&str> = batch.iter().map(|r| r.timestamp.as_str()).collect();
        let timestamps = convert_timestamps(&raw_timestamps);

        for (row, timestamp) in batch.iter().zip(timestamps) {
            let Some(timestamp) = timestamp else {
                continue;
            };
            let Some(company) = self.aliases.resolve(&row.company) else {
                continue;
            };
            if !self.in_year_range(timestamp.year()) {
                continue;
            }
            if !is_final_status(&row.status) {
                continue;
            }
            survivors.push(FilteredIncident {
                company: company.to_string(),
                year: timestamp.year(),
                quarter: calendar_quarter(timestamp.month()),
            });
        }
    }

    fn in_year_range(&self, year: i32) -> bool {
        (self.start_year..=self.end_year).contains(&year)
    }

    /// Incident counts per `(Company, Year, Quarter)`, sorted by key.
    ///
    /// Returns `Ok(None)` with a warning when nothing survived filtering —
    /// a recoverable "no data" signal, not an error.
    pub fn outage_frequency(&self) -> Result<Option<DataFrame>, OutageError> {
        let Some(data) = &self.data else {
            eprintln!("WARNING: outage data is not loaded; call load() first");
            return Ok(None);
        };
        if data.height() == 0 {
            eprintln!("WARNING: outage data is empty; nothing to aggregate");
            return Ok(None);
        }

        let companies = data.column("Company")?.str()?;
        let years = data.column("Year")?.i32()?;
        let quarters = data.column("Quarter")?.str()?;

        // BTreeMap keeps the output sorted, which makes re-runs over the
        // same inputs byte-identical when persisted.
        let mut counts: BTreeMap<(String, i32, String), u32> = BTreeMap::new();
        for i in 0..data.height() {
            if let (Some(company), Some(year), Some(quarter)) =
                (companies.get(i), years.get(i), quarters.get(i))
            {
                *counts
                    .entry((company.to_string(), year, quarter.to_string()))
                    .or_insert(0) += 1;
            }
        }

        let mut out_companies = Vec::with_capacity(counts.len());
        let mut out_years = Vec::with_capacity(counts.len());
        let mut out_quarters = Vec::with_capacity(counts.len());
        let mut out_counts = Vec::with_capacity(counts.len());
        for ((company, year, quarter), count) in counts {
            out_companies.push(company);
            out_years.push(year);
            out_quarters.push(quarter);
            out_counts.push(count);
        }

        let aggregated = DataFrame::new(vec![
            Column::new("Company".into(), out_companies),
            Column::new("Year".into(), out_years),
            Column::new("Quarter".into(), out_quarters),
            Column::new("Count".into(), out_counts),
        ])?;
        println!("Data aggregated and counted by company, year, and quarter.");
        Ok(Some(aggregated))
    }
}

fn is_final_status(status: &str) -> bool {
    status == FINAL_STATUS
}

/// Concatenate filtered rows into the combined frame with derived columns.
fn combine(rows: &[FilteredIncident]) -> PolarsResult<DataFrame> {
    let companies: Vec<&str> = rows.iter().map(|r| r.company.as_str()).collect();
    let years: Vec<i32> = rows.iter().map(|r| r.year).collect();
    let quarters: Vec<String> = rows.iter().map(|r| format!("Q{}", r.quarter)).collect();

    DataFrame::new(vec![
        Column::new("Company".into(), companies),
        Column::new("Year".into(), years),
        Column::new("Quarter".into(), quarters),
    ])
}
