//! Serialized-bitmap inspection CLI
//!
//! Command-line tool for examining serialized bitmap files: parses each
//! file as a zero-copy view and reports cardinality and the container
//! breakdown, without materializing the set.

use clap::{Parser, ValueEnum};
use roaring32::{ImmutableBitmap, RoaringBitmap};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

/// Inspect serialized roaring bitmaps.
///
/// Parses each file as a read-only view and prints the container
/// breakdown and cardinality.
#[derive(Parser, Debug)]
#[command(name = "roaring32-inspect")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file(s) to inspect
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// Cross-check the view against a full materialization
    #[arg(long)]
    verify: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Per-file statistics gathered from the view.
#[derive(Debug, serde::Serialize)]
struct Stats {
    file: String,
    bytes: usize,
    cardinality: u64,
    containers: usize,
    array_containers: usize,
    bitmap_containers: usize,
    run_containers: usize,
    min: Option<u32>,
    max: Option<u32>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("roaring32=debug,roaring32_inspect=debug")
            .init();
    }

    let mut success = true;
    for path in &args.files {
        match inspect_file(path, &args) {
            Ok(()) => {}
            Err(e) => {
                eprintln!("Error inspecting {}: {}", path.display(), e);
                success = false;
            }
        }
    }

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn inspect_file(path: &PathBuf, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(path)?;
    debug!(bytes = data.len(), "read file");
    let view = ImmutableBitmap::from_buffer(&data)?;
    let stats = collect_stats(path, &data, &view);
    debug!(containers = stats.containers, "parsed view");

    if args.verify {
        verify(&data, &view)?;
    }

    match args.format {
        OutputFormat::Human => print_human(&stats, args),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
    }
    Ok(())
}

fn collect_stats(path: &PathBuf, data: &[u8], view: &ImmutableBitmap<'_>) -> Stats {
    let mut array_containers = 0;
    let mut bitmap_containers = 0;
    let mut run_containers = 0;
    for i in 0..view.container_count() {
        if view.is_run_at(i) {
            run_containers += 1;
        } else if (view.card_minus_one_at(i) as usize) < roaring32::ARRAY_DEFAULT_MAX_SIZE {
            array_containers += 1;
        } else {
            bitmap_containers += 1;
        }
    }

    let min = if view.is_empty() {
        None
    } else {
        let first = view.container_view_at(0);
        (0..=u16::MAX)
            .find(|&low| first.contains(low))
            .map(|low| (u32::from(view.key_at(0)) << 16) | u32::from(low))
    };
    let max = if view.is_empty() {
        None
    } else {
        let i = view.container_count() - 1;
        let last = view.container_view_at(i);
        (0..=u16::MAX)
            .rev()
            .find(|&low| last.contains(low))
            .map(|low| (u32::from(view.key_at(i)) << 16) | u32::from(low))
    };

    Stats {
        file: path.display().to_string(),
        bytes: data.len(),
        cardinality: view.cardinality(),
        containers: view.container_count(),
        array_containers,
        bitmap_containers,
        run_containers,
        min,
        max,
    }
}

fn verify(data: &[u8], view: &ImmutableBitmap<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let materialized = RoaringBitmap::from_buffer(data)?;
    if materialized.cardinality() != view.cardinality() {
        return Err(format!(
            "cardinality mismatch: view {} vs materialized {}",
            view.cardinality(),
            materialized.cardinality()
        )
        .into());
    }
    debug!("verification passed");
    Ok(())
}

fn print_human(stats: &Stats, args: &Args) {
    println!("File: {}", stats.file);
    println!("  Size:        {} bytes", stats.bytes);
    println!("  Cardinality: {}", stats.cardinality);
    println!("  Containers:  {}", stats.containers);
    println!(
        "    array: {}, bitmap: {}, run: {}",
        stats.array_containers, stats.bitmap_containers, stats.run_containers
    );
    if args.verbose {
        if let (Some(min), Some(max)) = (stats.min, stats.max) {
            println!("  Range:       {min} ..= {max}");
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["roaring32-inspect", "a.bin"]).unwrap();
        assert_eq!(args.files.len(), 1);
        assert!(!args.verify);
    }

    #[test]
    fn test_format_option() {
        let args = Args::try_parse_from(["roaring32-inspect", "-f", "json", "a.bin"]).unwrap();
        assert!(matches!(args.format, OutputFormat::Json));
    }
}
