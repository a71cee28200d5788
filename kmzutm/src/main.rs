//! kmzutm CLI - KMZ folders to per-category UTM shapefiles

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use kmzutm::collect::global_variables::DEFAULT_OUTPUT_PATH;
use kmzutm::geometric::category::CategoryReport;
use kmzutm::KmzConverter;

#[derive(Parser)]
#[command(name = "kmzutm")]
#[command(author, version, about = "Split a KMZ into one UTM shapefile per folder", long_about = None)]
struct Cli {
    /// Input .kmz archive (or bare .kml file)
    input: PathBuf,

    /// Reference year, used as output file prefix
    #[arg(short, long)]
    year: i32,

    /// Output directory for the shapefiles
    #[arg(short, long, default_value = DEFAULT_OUTPUT_PATH)]
    output_dir: PathBuf,

    /// Keep the extracted KML in the output directory
    #[arg(long)]
    keep_kml: bool,

    /// List categories and target CRS without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Write a JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

#[cfg(feature = "indicatif")]
fn progress_reporter() -> impl FnMut(usize, usize, &CategoryReport) {
    use indicatif::{ProgressBar, ProgressStyle};

    let mut bar: Option<ProgressBar> = None;
    move |done, total, report| {
        let pb = bar.get_or_insert_with(|| {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar().template("{bar:30.green} {pos}/{len} {msg}") {
                pb.set_style(style);
            }
            pb
        });
        pb.set_message(report.category.clone());
        pb.set_position(done as u64);
        if done == total {
            pb.finish_and_clear();
        }
    }
}

#[cfg(not(feature = "indicatif"))]
fn progress_reporter() -> impl FnMut(usize, usize, &CategoryReport) {
    |_, _, _| {}
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let start = Instant::now();
    let mut converter = KmzConverter::new(
        &cli.input,
        Some(cli.output_dir.to_string_lossy().to_string()),
        cli.year,
    );
    converter.set_keep_kml(cli.keep_kml);
    converter.set_dry_run(cli.dry_run);

    let report = converter
        .run_with_progress(progress_reporter())
        .with_context(|| format!("Failed to convert {}", cli.input.display()))?;

    if let Some(path) = &cli.report {
        report.to_json_file(path)?;
        info!("Report written to {}", path.display());
    }

    println!(
        "{} categories, {} files written, {} skipped",
        report.categories.len(),
        report.saved_files().len(),
        report.skipped()
    );
    println!("  Processing time: {:.2?}", start.elapsed());

    Ok(())
}
