//! Wide-to-long reshaping of quarterly financial (PP&E) exports.
//!
//! The source files carry one column per fiscal quarter (`CQ12023` style)
//! and frequently prepend metadata banners of variable depth above the real
//! header row. The reshaper runs a fixed stage order:
//!
//! raw load → header alignment → company formatting → quarter-column
//! filter → numeric conversion → unpivot → year/quarter extraction →
//! canonical-company filter
//!
//! Bad cells degrade to nulls and bad rows are dropped at the relevant
//! stage; only a structurally unusable file (no quarter columns at all)
//! aborts the run.

use polars::prelude::*;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

use crate::config::AliasTable;
use crate::io::reader::{self, ReadError, TableOptions};

/// Canonical name of the entity column after formatting.
pub const COMPANY_COLUMN: &str = "Company";
/// Alternate entity-name header some exports use.
pub const ENTITY_NAME_COLUMN: &str = "SP_ENTITY_NAME";
/// Entity-ID column dropped when present.
pub const ENTITY_ID_COLUMN: &str = "SP_ENTITY_ID";
/// Name of the measure column produced by the unpivot.
pub const MEASURE_COLUMN: &str = "PP&E";

/// Upper bound on header-promotion iterations during alignment.
pub const MAX_HEADER_SHIFTS: usize = 2;

/// Divisor applied when normalization is requested: base currency units
/// down to billions.
const NORMALIZE_DIVISOR: f64 = 1e9;

fn quarter_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^CQ\d{1,2}\d{4}$").expect("valid quarter-code pattern"))
}

fn parenthetical_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s*\([^)]+\)").expect("valid parenthetical pattern"))
}

/// Whether a column header is a quarter code such as `CQ12023`.
pub fn is_quarter_code(name: &str) -> bool {
    quarter_code_pattern().is_match(name)
}

#[derive(Debug, Error)]
pub enum FinancialError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("the financial data is in an invalid format: no usable quarter columns")]
    InvalidFormat,

    #[error("the financial data has no recognizable company column")]
    MissingCompanyColumn,

    #[error(transparent)]
    Frame(#[from] PolarsError),
}

/// Reshapes a wide financial export into long `(Company, Quarter, PP&E,
/// Year)` rows filtered to canonical companies.
pub struct FinancialReshaper {
    aliases: AliasTable,
    normalize: bool,
    data: Option<DataFrame>,
}

impl FinancialReshaper {
    pub fn new(aliases: AliasTable, normalize: bool) -> Self {
        Self {
            aliases,
            normalize,
            data: None,
        }
    }

    /// Load and reshape the export at `path`. The prepared frame is cached;
    /// repeated calls return the same data without re-reading the file.
    pub fn financial_data(&mut self, path: &Path) -> Result<DataFrame, FinancialError> {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }
        println!("Reading finance data from: {}", path.display());
        let df = self.build(path)?;
        self.data = Some(df.clone());
        println!("Finance data unpivoted successfully.");
        Ok(df)
    }

    fn build(&self, path: &Path) -> Result<DataFrame, FinancialError> {
        let raw = load_raw(path)?;
        let aligned = align_header(raw)?;
        let formatted = format_company(aligned)?;
        let filtered = filter_quarter_columns(formatted)?;
        let numeric = convert_numeric(filtered)?;
        let long = unpivot(numeric, self.normalize)?;
        let split = extract_year_quarter(long)?;
        filter_companies(split, &self.aliases)
    }
}

/// Stage 1: read the file headerless, then null out any cell whose text
/// begins with `#` — spreadsheet error markers exported as text.
fn load_raw(path: &Path) -> Result<DataFrame, FinancialError> {
    let df = reader::read_table(path, TableOptions { has_header: false })?;
    Ok(null_hash_markers(df)?)
}

fn null_hash_markers(df: DataFrame) -> PolarsResult<DataFrame> {
    let mut out = df;
    let names: Vec<String> = out
        .get_column_names_str()
        .into_iter()
        .map(str::to_string)
        .collect();
    for name in names {
        let values = out.column(&name)?.str()?;
        let cleaned: StringChunked = values
            .into_iter()
            .map(|cell| {
                cell.and_then(|s| {
                    if s.starts_with('#') {
                        None
                    } else {
                        Some(s.to_string())
                    }
                })
            })
            .collect();
        out.with_column(cleaned.with_name(name.as_str().into()).into_series())?;
    }
    Ok(out)
}

/// Alignment termination predicate: a `Company` column exists, or an
/// `SP_ENTITY_NAME` column exists and the leading cell of the first column
/// holds data.
fn header_aligned(df: &DataFrame) -> PolarsResult<bool> {
    let names = df.get_column_names_str();
    if names.contains(&COMPANY_COLUMN) {
        return Ok(true);
    }
    if !names.contains(&ENTITY_NAME_COLUMN) {
        return Ok(false);
    }
    let Some(first) = df.get_columns().first() else {
        return Ok(false);
    };
    Ok(first.str()?.get(0).is_some())
}

fn has_quarter_columns(df: &DataFrame) -> bool {
    df.get_column_names_str().iter().any(|n| is_quarter_code(n))
}

/// Stage 2: recover headers embedded in the data.
///
/// If neither a `Company` column nor any quarter-code column is present,
/// the true header row is assumed to sit below a metadata banner: drop
/// fully empty rows, then up to [`MAX_HEADER_SHIFTS`] times promote the
/// first remaining row to column headers — a missing header cell keeps the
/// prior column name — and drop that row, stopping early once
/// [`header_aligned`] holds.
fn align_header(df: DataFrame) -> Result<DataFrame, FinancialError> {
    if df.get_column_names_str().contains(&COMPANY_COLUMN) || has_quarter_columns(&df) {
        return Ok(df);
    }

    let mut out = drop_empty_rows(df)?;
    for _ in 0..MAX_HEADER_SHIFTS {
        if out.height() == 0 {
            break;
        }
        out = promote_first_row(out)?;
        if header_aligned(&out)? {
            break;
        }
    }
    Ok(out)
}

fn drop_empty_rows(df: DataFrame) -> PolarsResult<DataFrame> {
    if df.width() == 0 {
        return Ok(df);
    }
    let mut any_value = df.get_columns()[0].as_materialized_series().is_not_null();
    for column in &df.get_columns()[1..] {
        any_value = &any_value | &column.as_materialized_series().is_not_null();
    }
    df.filter(&any_value)
}

fn promote_first_row(df: DataFrame) -> PolarsResult<DataFrame> {
    let current: Vec<String> = df
        .get_column_names_str()
        .into_iter()
        .map(str::to_string)
        .collect();
    let mut promoted = Vec::with_capacity(current.len());
    for (column, name) in df.get_columns().iter().zip(&current) {
        let cell = column.str()?.get(0).map(str::to_string);
        promoted.push(cell.unwrap_or_else(|| name.clone()));
    }
    let mut out = df.slice(1, df.height().saturating_sub(1));
    out.set_column_names(promoted)?;
    Ok(out)
}

/// Stage 3: normalize the entity column — rename `SP_ENTITY_NAME` to
/// `Company`, drop `SP_ENTITY_ID`, strip parenthetical legal-entity
/// suffixes and surrounding whitespace from the company text.
fn format_company(df: DataFrame) -> Result<DataFrame, FinancialError> {
    let mut out = df;
    if out.get_column_names_str().contains(&ENTITY_NAME_COLUMN) {
        out.rename(ENTITY_NAME_COLUMN, COMPANY_COLUMN.into())?;
    }
    if out.get_column_names_str().contains(&ENTITY_ID_COLUMN) {
        out = out.drop(ENTITY_ID_COLUMN)?;
    }
    if !out.get_column_names_str().contains(&COMPANY_COLUMN) {
        return Err(FinancialError::MissingCompanyColumn);
    }

    let companies = out.column(COMPANY_COLUMN)?.str()?;
    let cleaned: StringChunked = companies
        .into_iter()
        .map(|cell| {
            cell.map(|s| {
                parenthetical_pattern()
                    .replace_all(s, "")
                    .trim()
                    .to_string()
            })
        })
        .collect();
    out.with_column(cleaned.with_name(COMPANY_COLUMN.into()).into_series())?;
    Ok(out)
}

/// Stage 4: keep `Company` plus columns whose names are quarter codes.
/// Fewer than two surviving columns means there is no quarter data at all,
/// which is fatal.
fn filter_quarter_columns(df: DataFrame) -> Result<DataFrame, FinancialError> {
    let keep: Vec<String> = df
        .get_column_names_str()
        .into_iter()
        .filter(|n| *n == COMPANY_COLUMN || is_quarter_code(n))
        .map(str::to_string)
        .collect();
    if keep.len() <= 1 {
        return Err(FinancialError::InvalidFormat);
    }
    Ok(df.select(keep)?)
}

/// Stage 5: coerce every quarter column to floating point; unconvertible
/// cells become null.
fn convert_numeric(df: DataFrame) -> PolarsResult<DataFrame> {
    let mut out = df;
    let names: Vec<String> = out
        .get_column_names_str()
        .into_iter()
        .filter(|n| *n != COMPANY_COLUMN)
        .map(str::to_string)
        .collect();
    for name in names {
        let values = out.column(&name)?.str()?;
        let parsed: Float64Chunked = values
            .into_iter()
            .map(|cell| cell.and_then(|s| s.trim().parse::<f64>().ok()))
            .collect();
        out.with_column(parsed.with_name(name.as_str().into()).into_series())?;
    }
    Ok(out)
}

/// Stage 6: melt the quarter columns into long form — one row per
/// `(Company, quarter-code)` pair — optionally rescaling the measure to
/// billions.
fn unpivot(df: DataFrame, normalize: bool) -> PolarsResult<DataFrame> {
    let quarter_columns: Vec<String> = df
        .get_column_names_str()
        .into_iter()
        .filter(|n| *n != COMPANY_COLUMN)
        .map(str::to_string)
        .collect();
    let companies = df.column(COMPANY_COLUMN)?.str()?;
    let height = df.height();

    let total = height * quarter_columns.len();
    let mut out_companies: Vec<Option<String>> = Vec::with_capacity(total);
    let mut out_quarters: Vec<String> = Vec::with_capacity(total);
    let mut out_values: Vec<Option<f64>> = Vec::with_capacity(total);

    for code in &quarter_columns {
        let values = df.column(code)?.f64()?;
        for i in 0..height {
            out_companies.push(companies.get(i).map(str::to_string));
            out_quarters.push(code.clone());
            out_values.push(values.get(i).map(|v| {
                if normalize {
                    v / NORMALIZE_DIVISOR
                } else {
                    v
                }
            }));
        }
    }

    DataFrame::new(vec![
        Column::new(COMPANY_COLUMN.into(), out_companies),
        Column::new("Quarter".into(), out_quarters),
        Column::new(MEASURE_COLUMN.into(), out_values),
    ])
}

/// Stage 7: split the quarter code into `Year` (last four characters as an
/// integer) and `Quarter` (characters 1–2, i.e. `"Q1".."Q4"`, matching the
/// outage side of the join and the downstream quarter table).
fn extract_year_quarter(df: DataFrame) -> PolarsResult<DataFrame> {
    let mut out = df;
    let codes = out.column("Quarter")?.str()?;

    let years: Int32Chunked = codes
        .into_iter()
        .map(|cell| {
            cell.and_then(|code| {
                code.get(code.len().saturating_sub(4)..)
                    .and_then(|y| y.parse::<i32>().ok())
            })
        })
        .collect();
    let quarters: StringChunked = codes
        .into_iter()
        .map(|cell| cell.and_then(|code| code.get(1..3)).map(str::to_string))
        .collect();

    out.with_column(years.with_name("Year".into()).into_series())?;
    out.with_column(quarters.with_name("Quarter".into()).into_series())?;
    Ok(out)
}

/// Stage 8: retain only rows whose (trimmed) company is a canonical alias
/// target.
fn filter_companies(df: DataFrame, aliases: &AliasTable) -> Result<DataFrame, FinancialError> {
    let companies = df.column(COMPANY_COLUMN)?.str()?;
    let mask: Vec<bool> = companies
        .into_iter()
        .map(|cell| cell.is_some_and(|s| aliases.is_canonical(s)))
        .collect();
    let mask = BooleanChunked::from_slice("canonical".into(), &mask);
    let mut out = df.filter(&mask)?;

    let trimmed: StringChunked = out
        .column(COMPANY_COLUMN)?
        .str()?
        .into_iter()
        .map(|cell| cell.map(|s| s.trim().to_string()))
        .collect();
    out.with_column(trimmed.with_name(COMPANY_COLUMN.into()).into_series())?;
    println!("Finance data filtered successfully.");
    Ok(out)
}
