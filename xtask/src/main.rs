// Desktop/tooling crate: unwrap/expect/panic acceptable in non-embedded code.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod check;
mod coverage;
mod doc;
mod image_crc;
mod test;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Gas monitor self-test development tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the no_std library builds, the emulator build, clippy and formatting
    Check,
    /// Run all tests (unit, integration, and doc)
    Test {
        /// Run only unit tests
        #[arg(long)]
        unit: bool,
        /// Run only integration tests
        #[arg(long)]
        integration: bool,
        /// Proptest cases per property (PROPTEST_CASES)
        #[arg(long)]
        cases: Option<u32>,
    },
    /// Build and optionally open documentation
    Doc {
        /// Open documentation in browser
        #[arg(long)]
        open: bool,
    },
    /// Compute the flash checksum of a firmware image and optionally embed it
    ImageCrc {
        /// Raw binary image, starting at flash address 0
        image: PathBuf,
        /// CRC-16/CCITT instead of CRC-32
        #[arg(long)]
        crc16: bool,
        /// Checksummed length in bytes (default: the reference flash region)
        #[arg(long, value_parser = image_crc::parse_number)]
        length: Option<u32>,
        /// Flash address of the stored checksum (default: the reference store address)
        #[arg(long, value_parser = image_crc::parse_number)]
        store: Option<u32>,
        /// Write the patched image here
        #[arg(long)]
        patch: Option<PathBuf>,
    },
    /// Print SRAM coverage, fault detection interval and watchdog window
    Coverage {
        /// Main-loop period in milliseconds
        #[arg(long, default_value_t = 10)]
        period_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => check::run(),
        Commands::Test {
            unit,
            integration,
            cases,
        } => test::run(unit, integration, cases),
        Commands::Doc { open } => doc::run(open),
        Commands::ImageCrc {
            image,
            crc16,
            length,
            store,
            patch,
        } => image_crc::run(&image_crc::ImageCrcArgs {
            image,
            crc16,
            length,
            store,
            patch,
        }),
        Commands::Coverage { period_ms } => coverage::run(period_ms),
    }
}
