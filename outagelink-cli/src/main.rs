//! OutageLink CLI — prepare outage and PP&E data files for visualization.
//!
//! Reads the outage incident log and the wide quarterly financial export
//! from a data directory, runs the preparation and linkage pipeline, and
//! writes the linked table back into that directory as CSV.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use outagelink_core::config::{AliasTable, PrepOptions};
use outagelink_core::io::encoding::EncodingError;
use outagelink_core::io::reader::ReadError;

#[derive(Parser)]
#[command(
    name = "outagelink",
    about = "Prepare outage and PP&E data files for visualization"
)]
struct Cli {
    /// Directory where all the data files are stored.
    #[arg(long, default_value = "datasets")]
    directory: PathBuf,

    /// Filename of the outage data file.
    #[arg(long)]
    outage_file: String,

    /// Filename of the property, plant, and equipment data file.
    #[arg(long)]
    ppe_file: String,

    /// First incident year to keep, inclusive.
    #[arg(long, default_value_t = 2021)]
    start_year: i32,

    /// Last incident year to keep, inclusive.
    #[arg(long, default_value_t = 2023)]
    end_year: i32,

    /// Keep PP&E in base currency units instead of rescaling to billions.
    #[arg(long, default_value_t = false)]
    raw: bool,

    /// Output filename, written under the data directory.
    #[arg(long, default_value = "prepared_data.csv")]
    output_file: String,

    /// TOML file with an [aliases] table replacing the built-in company
    /// alias mapping.
    #[arg(long)]
    aliases: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("Error: {err:#}");
        if is_missing_file(&err) {
            eprintln!(
                "Failed to find one or more specified files. \
                 Please check the file paths and names."
            );
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let aliases = match &cli.aliases {
        Some(path) => AliasTable::from_toml_path(path)
            .with_context(|| format!("loading alias table from {}", path.display()))?,
        None => AliasTable::default_telecom(),
    };

    let options = PrepOptions {
        start_year: cli.start_year,
        end_year: cli.end_year,
        normalize: !cli.raw,
    };

    let outage_path = cli.directory.join(&cli.outage_file);
    let ppe_path = cli.directory.join(&cli.ppe_file);

    let prepared = outagelink_core::link::DataPreparer::prepare(
        &options,
        aliases,
        &outage_path,
        &ppe_path,
    )?;

    let output_path = cli.directory.join(&cli.output_file);
    prepared.save_csv(&output_path)?;
    println!(
        "Data has been prepared and saved in {}.",
        cli.directory.display()
    );
    Ok(())
}

/// Whether any cause in the error chain is a missing input file.
fn is_missing_file(err: &anyhow::Error) -> bool {
    use outagelink_core::financial::FinancialError;
    use outagelink_core::link::LinkError;
    use outagelink_core::outage::OutageError;

    fn read_is_missing(read: &ReadError) -> bool {
        matches!(
            read,
            ReadError::FileNotFound(_) | ReadError::Encoding(EncodingError::FileNotFound(_))
        )
    }

    err.chain().any(|cause| {
        if let Some(link) = cause.downcast_ref::<LinkError>() {
            return match link {
                LinkError::Outage(OutageError::Read(read)) => read_is_missing(read),
                LinkError::Financial(FinancialError::Read(read)) => read_is_missing(read),
                _ => false,
            };
        }
        cause
            .downcast_ref::<ReadError>()
            .is_some_and(read_is_missing)
    })
}
