use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cmafkit")]
#[command(author, version, about = "Resegment and verify fragmented CMAF / DASH-OnDemand tracks")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Re-cut a CMAF track into longer segments and write a new sidx
    Resegment {
        /// Input CMAF track file
        #[arg(short, long, required = true)]
        input: PathBuf,

        /// Output file (may equal the input; nothing is written if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Minimum segment duration in milliseconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Do not write a sidx box to the output
        #[arg(short, long)]
        skip_sidx: bool,
    },

    /// Check DASH-OnDemand assets; the exit code is the combined badness
    Verify {
        /// Manifests, or directories to search for *.mpd
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show the fragment and index layout of a track file
    Info {
        /// Track file
        #[arg(required = true)]
        file: PathBuf,

        /// Output the full track model as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add an offset to every tfdt decode time (drops the sidx)
    ShiftTfdt {
        /// Offset in track timescale units
        #[arg(long, allow_hyphen_values = true)]
        offset: i64,

        /// Also set the fragment sequence number
        #[arg(long)]
        sequence_number: Option<u32>,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Remove the sidx box
    StripSidx {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Mark the durations of an init segment as unknown, for live use
    LiveInit {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Shift composition time offsets so each run starts at 0
    ShiftCto {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Set the non-sync bit on samples that are not sync samples
    FixSyncFlags {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Replace the ftyp brands
    Brands {
        /// Input file
        input: PathBuf,

        /// Output file
        output: PathBuf,

        /// Major brand (four characters)
        major: String,

        /// Compatible brands (four characters each)
        compatible: Vec<String>,

        /// Minor version
        #[arg(long, default_value_t = 0)]
        minor_version: u32,
    },
}
