//! File input: encoding detection and tabular reading.

pub mod encoding;
pub mod reader;

pub use encoding::{detect, DetectedEncoding, EncodingError};
pub use reader::{read_table, ReadError, TableOptions};
