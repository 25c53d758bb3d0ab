mod cli;

use cmafkit::backup::{self, InPlace};
use cmafkit::{batch, config};
use cmafkit_media::{filters, resegment, TrackModel};
use cmafkit_verify::{Badness, Verifier};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "cmafkit=trace,cmafkit_media=debug,cmafkit_verify=debug".to_string()
        } else {
            "cmafkit=info,cmafkit_media=info,cmafkit_verify=info".to_string()
        }
    });

    // Logs go to stderr so command output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = config::load_config_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Resegment {
            input,
            output,
            duration,
            skip_sidx,
        } => resegment_file(&input, output.as_deref(), duration, skip_sidx, &config),
        Commands::Verify { paths } => {
            let badness = verify_assets(&paths, &config)?;
            if !badness.is_empty() {
                std::process::exit(i32::from(badness.bits()));
            }
            Ok(())
        }
        Commands::Info { file, json } => show_info(&file, json),
        Commands::ShiftTfdt {
            offset,
            sequence_number,
            files,
        } => filter_files(&files, config.resegment.backup, |data| {
            filters::shift_decode_time(data, offset, sequence_number)
        }),
        Commands::StripSidx { files } => filter_files(&files, config.resegment.backup, filters::strip_index),
        Commands::LiveInit { files } => filter_files(&files, config.resegment.backup, filters::make_live_init),
        Commands::ShiftCto { files } => {
            filter_files(&files, config.resegment.backup, filters::shift_composition_offsets)
        }
        Commands::FixSyncFlags { files } => {
            filter_files(&files, config.resegment.backup, filters::mark_non_sync_samples)
        }
        Commands::Brands {
            input,
            output,
            major,
            compatible,
            minor_version,
        } => change_brands(&input, &output, &major, minor_version, &compatible),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn resegment_file(
    input: &Path,
    output: Option<&Path>,
    duration: Option<u64>,
    skip_sidx: bool,
    config: &config::Config,
) -> Result<()> {
    let mut options = config.resegment.options();
    if let Some(ms) = duration {
        if ms == 0 {
            anyhow::bail!("Segment duration must be greater than 0");
        }
        options.target_ms = ms;
    }
    if skip_sidx {
        options.write_sidx = false;
    }

    let data = read_file(input)?;
    let result = resegment(&data, &options).with_context(|| format!("Failed to resegment {:?}", input))?;
    println!("Generated {} segments of at least {} ms", result.plans.len(), options.target_ms);

    match output {
        Some(output) if same_file(input, output) => {
            if let InPlace::Written { backup: Some(backup) } =
                backup::replace_in_place(input, &data, &result.data, config.resegment.backup)?
            {
                println!("Backup: {}", backup.display());
            }
        }
        Some(output) => {
            std::fs::write(output, &result.data).with_context(|| format!("Failed to write {:?}", output))?;
        }
        None => println!("No output file given, nothing written"),
    }

    if let Some(range) = result.index_range {
        println!("indexRange={}", range);
    }
    Ok(())
}

fn verify_assets(paths: &[PathBuf], config: &config::Config) -> Result<Badness> {
    let manifests = batch::find_manifests(paths);
    if manifests.is_empty() {
        anyhow::bail!("No manifests found");
    }
    tracing::info!("Checking {} assets", manifests.len());

    let verifier = Verifier::new(config.verify.options());
    let reports = batch::run_parallel(&manifests, config.batch.workers, |path| verifier.check_asset(path))?;

    let mut badness = Badness::empty();
    for report in &reports {
        println!("{}", report.summary());
        badness |= report.badness;
    }
    Ok(badness)
}

fn show_info(file: &Path, json: bool) -> Result<()> {
    let data = read_file(file)?;
    let model = TrackModel::extract(&data).with_context(|| format!("Failed to parse {:?}", file))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&model)?);
        return Ok(());
    }

    let timescale = model.timescale().max(1) as f64;
    println!("File: {}", file.display());
    println!("Track ID: {}", model.track_id);
    if let Some(handler) = &model.handler_type {
        println!("Handler: {}", handler);
    }
    println!("Timescale: {}", model.timescale());
    println!("Samples: {}", model.samples.len());
    println!("Duration: {:.3}s", model.total_duration() as f64 / timescale);

    println!("\nFragments: {}", model.fragments.len());
    for (i, fragment) in model.fragments.iter().enumerate() {
        println!(
            "  [{}] seq={} tfdt={} dur={:.3}s samples={} bytes={}",
            i,
            fragment.sequence_number,
            fragment.base_decode_time,
            fragment.duration as f64 / timescale,
            fragment.sample_range.len(),
            fragment.byte_size()
        );
    }
    for (i, expected, found) in model.timeline_gaps() {
        println!("  tfdt gap before [{}]: expected {}, found {}", i, expected, found);
    }

    match &model.index {
        Some(index) => {
            println!(
                "\nIndex: {} references, timescale {}, earliest presentation time {}",
                index.segments.len(),
                index.timescale,
                index.earliest_presentation_time
            );
            if let Err(e) = index.check_profile() {
                println!("  Not DASH-OnDemand: {}", e);
            }
        }
        None => println!("\nIndex: none"),
    }

    Ok(())
}

fn filter_files<F>(files: &[PathBuf], make_backup: bool, edit: F) -> Result<()>
where
    F: Fn(&[u8]) -> cmafkit_media::Result<Vec<u8>>,
{
    let mut failed = 0;
    for file in files {
        let outcome = read_file(file).and_then(|data| {
            let output = edit(&data).with_context(|| format!("Failed to process {:?}", file))?;
            backup::replace_in_place(file, &data, &output, make_backup)
        });
        match outcome {
            Ok(InPlace::Unchanged) => println!("{}: unchanged", file.display()),
            Ok(InPlace::Written { backup: Some(backup) }) => {
                println!("{}: updated, backup {}", file.display(), backup.display())
            }
            Ok(InPlace::Written { backup: None }) => println!("{}: updated", file.display()),
            Err(e) => {
                tracing::error!("{}: {:#}", file.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, files.len());
    }
    Ok(())
}

fn fourcc(brand: &str) -> Result<[u8; 4]> {
    brand
        .as_bytes()
        .try_into()
        .map_err(|_| anyhow::anyhow!("Brand {:?} is not four bytes", brand))
}

fn change_brands(input: &Path, output: &Path, major: &str, minor_version: u32, compatible: &[String]) -> Result<()> {
    let major = fourcc(major)?;
    let compatible = compatible.iter().map(|b| fourcc(b)).collect::<Result<Vec<_>>>()?;

    let data = read_file(input)?;
    let result = filters::rewrite_brands(&data, major, minor_version, &compatible)
        .with_context(|| format!("Failed to rewrite brands of {:?}", input))?;
    std::fs::write(output, result).with_context(|| format!("Failed to write {:?}", output))?;
    Ok(())
}
