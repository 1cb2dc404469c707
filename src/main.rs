use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use xisfcodec::file::{self, SaveOptions};
use xisfcodec::preamble::DEFAULT_ATTACHMENT_BUDGET;
use xisfcodec::{ChecksumType, CompressionType, ImageMetaData, LoadWarning, PixelData};

#[derive(Parser)]
#[command(name = "xisf", version, about = "Inspect, verify and re-encode monolithic XISF images")]
struct Cli {
    /// Log codec and layout decisions (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields and image metadata
    Info {
        input: PathBuf,
        /// Print a JSON document instead of text
        #[arg(long)]
        json: bool,
    },
    /// Decode the image and report checksum / size anomalies
    Verify {
        input: PathBuf,
    },
    /// Re-encode an image as 16-bit with new data block options
    Convert {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Codec: none (default), lz4, lz4hc, zlib
        #[arg(short, long, default_value = "none", value_parser = parse_codec)]
        compression: CompressionType,
        /// Compression level (zlib 0-9, lz4hc 1-12; ignored for lz4)
        #[arg(short, long, default_value = "6")]
        level: i32,
        /// Byte-shuffle samples before compressing
        #[arg(short, long)]
        shuffle: bool,
        /// Checksum: none (default), sha-1, sha-256, sha-512, sha3-256, sha3-512
        #[arg(long, default_value = "none", value_parser = parse_checksum)]
        checksum: ChecksumType,
        /// Header bytes reserved for data block attributes
        #[arg(long, default_value_t = DEFAULT_ATTACHMENT_BUDGET)]
        budget: usize,
    },
}

#[derive(Serialize)]
struct InfoReport {
    geometry:      String,
    sample_format: Option<String>,
    compression:   Option<String>,
    checksum:      Option<String>,
    location:      Option<String>,
    metadata:      ImageMetaData,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let header = file::read_header(&input)?;
            let image = header.image()?;
            let report = InfoReport {
                geometry:      header.geometry()?.to_string(),
                sample_format: image.attr("sampleFormat").map(str::to_owned),
                compression:   image.attr("compression").map(str::to_owned),
                checksum:      image.attr("checksum").map(str::to_owned),
                location:      image.attr("location").map(str::to_owned),
                metadata:      ImageMetaData::from_header(&header).unwrap_or_default(),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("── XISF image ───────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Geometry       {}", report.geometry);
            println!("  Sample format  {}", report.sample_format.as_deref().unwrap_or("—"));
            println!("  Compression    {}", report.compression.as_deref().unwrap_or("none"));
            println!("  Checksum       {}", report.checksum.as_deref().unwrap_or("none"));
            println!("  Location       {}", report.location.as_deref().unwrap_or("—"));
            let meta = &report.metadata;
            if let Some(v) = &meta.object_name   { println!("  Object         {v}"); }
            if let Some(v) = meta.exposure_time  { println!("  Exposure       {v} s"); }
            if let Some(v) = &meta.camera        { println!("  Camera         {v}"); }
            if let Some(v) = &meta.filter        { println!("  Filter         {v}"); }
            if let Some(v) = &meta.bayer_pattern { println!("  Bayer pattern  {v}"); }
            println!("  FITS keywords  {}", meta.keywords.len());
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { input } => {
            let loaded = file::load(&input, false)?;
            println!(
                "{}: {}x{} {} decoded",
                input.display(),
                loaded.pixels.width,
                loaded.pixels.height,
                loaded.source_format
            );
            let data_warnings: Vec<&LoadWarning> = loaded
                .warnings
                .iter()
                .filter(|w| !matches!(w, LoadWarning::MetadataUnavailable(_)))
                .collect();
            for w in &loaded.warnings {
                println!("  warning: {w}");
            }
            if !data_warnings.is_empty() {
                std::process::exit(1);
            }
            println!("  OK");
        }

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, compression, level, shuffle, checksum, budget } => {
            let loaded = file::load(&input, false)?;
            for w in &loaded.warnings {
                eprintln!("warning: {w}");
            }
            let opts = SaveOptions {
                compression,
                compression_level: level,
                byte_shuffling:    shuffle,
                checksum,
                attachment_budget: budget,
            };
            let pixels = loaded.pixels;
            let block = file::save_image(
                &output,
                pixels.width,
                pixels.height,
                &PixelData::UInt16(pixels.data),
                &loaded.metadata,
                &opts,
            )?;
            println!(
                "Wrote {} ({} → {} B, codec {}, checksum {})",
                output.display(),
                block.uncompressed_size(),
                block.stored_size(),
                block.codec_name(),
                block.checksum_name()
            );
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_codec(s: &str) -> Result<CompressionType, String> {
    CompressionType::from_name(s).ok_or_else(|| format!("unknown codec '{s}'"))
}

fn parse_checksum(s: &str) -> Result<ChecksumType, String> {
    ChecksumType::from_name(s).ok_or_else(|| format!("unknown checksum type '{s}'"))
}
