//! Injected read-only configuration: the company alias table, the quarter
//! date table, and the options controlling a preparation run.
//!
//! The alias table is deliberately a value handed to each component at
//! construction rather than a process global, so tests can substitute
//! fixtures and operators can onboard new source companies from a TOML
//! file without touching code.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Built-in alias pairs: raw/legacy label as it appears in outage reports
/// mapped to the canonical company name used as the join key.
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("VERIZON WIRELESS", "Verizon Communications Inc."),
    ("COMCAST BUSINESS COMMUNICATIONS, LLC", "Comcast Corporation"),
    ("GCI", "GCI Liberty, Inc."),
    ("AT&T INC", "AT&T Inc."),
    ("TIME WARNER CABLE", "Comcast Corporation"),
    ("COMCAST IP PHONE, LLC", "Comcast Corporation"),
    ("COMCAST PHONE, LLC", "Comcast Corporation"),
    ("LEVEL 3 COMMUNICATIONS, LLC", "Lumen Technologies, Inc."),
    ("CHARTER", "Charter Communications, Inc."),
    ("T-MOBILE", "T-Mobile US, Inc."),
    ("XO COMMUNICATIONS", "Allegiance Telecom, Inc."),
    ("US CELLULAR", "United States Cellular Corporation"),
    ("VERIZON BUSINESS", "Verizon Communications Inc."),
    ("LUMEN", "Lumen Technologies, Inc."),
    ("AT&T Mobility", "AT&T Inc."),
    ("VERIZON", "Verizon Communications Inc."),
    ("TDS TELECOM", "Telephone and Data Systems, Inc."),
    ("QCC - QWEST COMMUNICATIONS CORP.", "Qwest Communications International Inc."),
    ("FRONTIER COMMUNICATIONS", "Frontier Communications Parent, Inc."),
];

/// Short display labels for canonical names, used by the downstream
/// visualization layer.
const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("AT&T Inc.", "AT&T"),
    ("Charter Communications, Inc.", "Charter"),
    ("Comcast Corporation", "Comcast"),
    ("Frontier Communications Parent, Inc.", "Frontier"),
    ("Lumen Technologies, Inc.", "Lumen"),
    ("T-Mobile US, Inc.", "T-Mobile"),
    ("Telephone and Data Systems, Inc.", "TDS"),
    ("United States Cellular Corporation", "US Cellular"),
    ("Verizon Communications Inc.", "Verizon"),
];

/// Errors loading an alias table from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read alias file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid alias file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// On-disk shape of an alias override file.
#[derive(Debug, Deserialize)]
struct AliasFile {
    aliases: BTreeMap<String, String>,
}

/// Mapping from raw company labels to canonical company names.
///
/// Lookups trim surrounding whitespace but are otherwise exact, matching
/// how the source exports vary. The canonical value set doubles as the
/// membership filter applied on both sides of the link.
#[derive(Debug, Clone)]
pub struct AliasTable {
    map: BTreeMap<String, String>,
    canonical: BTreeSet<String>,
}

impl AliasTable {
    pub fn new(map: BTreeMap<String, String>) -> Self {
        let canonical = map.values().cloned().collect();
        Self { map, canonical }
    }

    /// The built-in table covering the telecom carriers in the FCC outage
    /// reports this pipeline was written for.
    pub fn default_telecom() -> Self {
        Self::new(
            DEFAULT_ALIASES
                .iter()
                .map(|(raw, canonical)| (raw.to_string(), canonical.to_string()))
                .collect(),
        )
    }

    /// Load a replacement table from a TOML file with an `[aliases]` map.
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: AliasFile = toml::from_str(&text)?;
        Ok(Self::new(file.aliases))
    }

    /// Resolve a raw label to its canonical name, trimming whitespace.
    /// Unknown labels resolve to `None` and are excluded downstream.
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        self.map.get(raw.trim()).map(String::as_str)
    }

    /// Whether a name (after trimming) is a canonical alias target.
    pub fn is_canonical(&self, name: &str) -> bool {
        self.canonical.contains(name.trim())
    }

    pub fn canonical_names(&self) -> impl Iterator<Item = &str> {
        self.canonical.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Fixed mapping from quarter label to the month-day string used to
/// synthesize a representative calendar date for a fiscal quarter.
pub struct QuarterTable;

impl QuarterTable {
    const STARTS: &'static [(&'static str, u32, u32)] = &[
        ("Q1", 1, 1),
        ("Q2", 4, 1),
        ("Q3", 7, 1),
        ("Q4", 10, 1),
    ];

    /// Month-day string for a quarter label, e.g. `"Q2"` → `"04-01"`.
    pub fn month_day(quarter: &str) -> Option<String> {
        Self::STARTS
            .iter()
            .find(|(label, _, _)| *label == quarter)
            .map(|(_, month, day)| format!("{month:02}-{day:02}"))
    }

    /// Representative date for a `(year, quarter)` pair, the field the
    /// downstream consumer re-derives from the output file.
    pub fn quarter_date(year: i32, quarter: &str) -> Option<chrono::NaiveDate> {
        Self::STARTS
            .iter()
            .find(|(label, _, _)| *label == quarter)
            .and_then(|(_, month, day)| chrono::NaiveDate::from_ymd_opt(year, *month, *day))
    }
}

/// Short display label for a canonical company name.
pub fn display_name(canonical: &str) -> Option<&'static str> {
    DISPLAY_NAMES
        .iter()
        .find(|(full, _)| *full == canonical)
        .map(|(_, short)| *short)
}

/// Options for one preparation run.
#[derive(Debug, Clone)]
pub struct PrepOptions {
    /// First incident year kept, inclusive.
    pub start_year: i32,
    /// Last incident year kept, inclusive.
    pub end_year: i32,
    /// Rescale PP&E from base currency units to billions (divide by 1e9).
    pub normalize: bool,
}

impl Default for PrepOptions {
    fn default() -> Self {
        Self {
            start_year: 2021,
            end_year: 2023,
            normalize: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_trims_whitespace() {
        let aliases = AliasTable::default_telecom();
        assert_eq!(
            aliases.resolve(" VERIZON WIRELESS "),
            Some("Verizon Communications Inc.")
        );
        assert_eq!(
            aliases.resolve("VERIZON WIRELESS"),
            Some("Verizon Communications Inc.")
        );
    }

    #[test]
    fn unknown_label_resolves_to_none() {
        let aliases = AliasTable::default_telecom();
        assert_eq!(aliases.resolve("ACME TELECOM"), None);
    }

    #[test]
    fn canonical_set_is_deduplicated() {
        let aliases = AliasTable::default_telecom();
        // Several raw labels map to Comcast; the canonical set holds it once.
        let comcast = aliases
            .canonical_names()
            .filter(|n| *n == "Comcast Corporation")
            .count();
        assert_eq!(comcast, 1);
        assert!(aliases.is_canonical(" Comcast Corporation "));
        assert!(!aliases.is_canonical("COMCAST PHONE, LLC"));
    }

    #[test]
    fn alias_table_loads_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.toml");
        std::fs::write(
            &path,
            "[aliases]\n\"ACME WIRELESS\" = \"Acme Corp.\"\nACME = \"Acme Corp.\"\n",
        )
        .unwrap();

        let aliases = AliasTable::from_toml_path(&path).unwrap();
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases.resolve("ACME"), Some("Acme Corp."));
        assert!(aliases.is_canonical("Acme Corp."));
    }

    #[test]
    fn alias_table_load_missing_file_errors() {
        let err = AliasTable::from_toml_path(Path::new("no/such/aliases.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn quarter_table_covers_all_quarters() {
        assert_eq!(QuarterTable::month_day("Q1").as_deref(), Some("01-01"));
        assert_eq!(QuarterTable::month_day("Q2").as_deref(), Some("04-01"));
        assert_eq!(QuarterTable::month_day("Q3").as_deref(), Some("07-01"));
        assert_eq!(QuarterTable::month_day("Q4").as_deref(), Some("10-01"));
        assert_eq!(QuarterTable::month_day("Q5"), None);

        assert_eq!(
            QuarterTable::quarter_date(2022, "Q3"),
            chrono::NaiveDate::from_ymd_opt(2022, 7, 1)
        );
    }

    #[test]
    fn display_names_cover_canonical_carriers() {
        assert_eq!(display_name("AT&T Inc."), Some("AT&T"));
        assert_eq!(display_name("Verizon Communications Inc."), Some("Verizon"));
        assert_eq!(display_name("Unknown Co."), None);
    }
}
