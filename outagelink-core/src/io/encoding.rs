//! Byte-level text encoding detection.
//!
//! The source exports come from several tools; some write UTF-8, some
//! Windows-1252 (the usual Excel CSV export encoding). Detection samples a
//! bounded prefix of the file: valid UTF-8 wins, anything else falls back
//! to Windows-1252, which decodes every byte sequence.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// How many bytes of the file are sampled for detection.
pub const SAMPLE_LEN: usize = 100_000;

/// Errors from the detection read. Detection never panics; callers decide
/// whether a failed sniff aborts their pipeline.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Best-guess text encoding of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedEncoding {
    Utf8,
    Utf8Bom,
    Windows1252,
}

impl DetectedEncoding {
    pub fn encoding(self) -> &'static Encoding {
        match self {
            DetectedEncoding::Utf8 | DetectedEncoding::Utf8Bom => UTF_8,
            DetectedEncoding::Windows1252 => WINDOWS_1252,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DetectedEncoding::Utf8 => "utf-8",
            DetectedEncoding::Utf8Bom => "utf-8-sig",
            DetectedEncoding::Windows1252 => "windows-1252",
        }
    }

    /// Decode raw bytes to a string, stripping a leading BOM if present and
    /// substituting replacement characters for malformed sequences.
    pub fn decode(self, bytes: &[u8]) -> String {
        let (text, _, _) = self.encoding().decode(bytes);
        text.into_owned()
    }
}

/// Sniff the encoding of a file from its first [`SAMPLE_LEN`] bytes.
pub fn detect(path: &Path) -> Result<DetectedEncoding, EncodingError> {
    let file = File::open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            EncodingError::FileNotFound(path.to_path_buf())
        } else {
            EncodingError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let mut sample = Vec::with_capacity(SAMPLE_LEN.min(8192));
    file.take(SAMPLE_LEN as u64)
        .read_to_end(&mut sample)
        .map_err(|source| EncodingError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    // A full-length sample may have cut a multi-byte sequence short.
    let truncated = sample.len() == SAMPLE_LEN;
    Ok(classify(&sample, truncated))
}

fn classify(sample: &[u8], truncated: bool) -> DetectedEncoding {
    if sample.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return DetectedEncoding::Utf8Bom;
    }
    match std::str::from_utf8(sample) {
        Ok(_) => DetectedEncoding::Utf8,
        // An incomplete sequence at the very end of a truncated sample is
        // still UTF-8; a hard error anywhere else is not.
        Err(e) if truncated && e.error_len().is_none() => DetectedEncoding::Utf8,
        Err(_) => DetectedEncoding::Windows1252,
    }
}
