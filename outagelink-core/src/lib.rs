//! OutageLink Core — preparation and linkage of outage and financial data.
//!
//! This crate turns two inconsistently formatted exports — telecom outage
//! incident logs and wide-format quarterly PP&E figures — into one clean
//! analytic table keyed by `(Company, Year, Quarter)`:
//! - Byte-level encoding detection and decoding for CSV inputs
//! - A tabular reader dispatching on file extension (CSV, XLS/XLSX)
//! - Batched outage aggregation with alias-based company resolution
//! - Wide-to-long financial reshaping with header repair
//! - An inner-join linker that persists the final table as CSV

pub mod config;
pub mod financial;
pub mod io;
pub mod link;
pub mod outage;
