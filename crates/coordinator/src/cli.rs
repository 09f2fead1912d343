use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use filters::{FilterKind, OutputFormat};
use ipc::ResourceNames;
use std::path::PathBuf;
use worker::WorkerSettings;

/// Batch image filtering over a pool of worker processes
#[derive(Parser, Debug, Clone)]
#[command(
    name = "imgpool",
    version,
    about = "Apply image filters to a directory using a pool of worker processes",
    after_help = "Every option can also be set through the environment variable named in its help.\n\
                  Flags take precedence over the environment.",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one pool member (started by the coordinator)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Coordinator overrides. Unset flags fall back to the environment.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Directory scanned for input images [env: INPUT_DIR]
    #[arg(short, long, value_name = "DIR")]
    pub input_dir: Option<PathBuf>,

    /// Directory receiving filter outputs [env: OUTPUT_DIR]
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Number of worker processes [env: POOL_SIZE]
    #[arg(short = 'w', long, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Task queue capacity, at least the worker count [env: QUEUE_CAPACITY]
    #[arg(long, value_name = "NUM")]
    pub queue_capacity: Option<usize>,

    /// Concurrent decodes across the pool [env: IO_PERMITS]
    #[arg(long, value_name = "NUM")]
    pub io_permits: Option<u32>,

    /// Comma separated filters: grayscale, blur, resize [env: FILTERS]
    #[arg(short, long, value_name = "LIST")]
    pub filters: Option<String>,

    /// Output format: jpeg, png or bmp [env: OUTPUT_FORMAT]
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG output quality, 1 to 100 [env: JPEG_QUALITY]
    #[arg(long, value_name = "NUM")]
    pub jpeg_quality: Option<u8>,

    /// Progress refresh interval in milliseconds [env: POLL_INTERVAL_MS]
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Prefix of the named IPC resources [env: IPC_PREFIX]
    #[arg(long, value_name = "PREFIX")]
    pub ipc_prefix: Option<String>,
}

/// Worker process command line, produced by `WorkerSettings::to_args`.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    #[arg(long)]
    pub slot: usize,

    #[arg(long)]
    pub ipc_prefix: String,

    #[arg(long)]
    pub input_dir: PathBuf,

    #[arg(long)]
    pub output_dir: PathBuf,

    #[arg(long)]
    pub filters: String,

    #[arg(long)]
    pub format: String,

    #[arg(long)]
    pub jpeg_quality: Option<u8>,
}

impl WorkerArgs {
    pub fn into_settings(self) -> anyhow::Result<WorkerSettings> {
        let names = ResourceNames::with_prefix(&self.ipc_prefix).context("Invalid IPC prefix")?;
        let filters = FilterKind::parse_list(&self.filters)?;
        let mut format: OutputFormat = self.format.parse()?;
        if let Some(quality) = self.jpeg_quality {
            format = format.with_quality(quality)?;
        }

        Ok(WorkerSettings {
            slot: self.slot,
            names,
            input_dir: self.input_dir,
            output_dir: self.output_dir,
            filters,
            format,
        })
    }
}
