//! The `prostox process` command.
//!
//! Discovers images, runs them through the orchestrator in paced groups,
//! optionally retries failures, then exports the finished items.

mod batch;
pub mod types;

pub use types::OutputFormat;

use clap::Args;
use prostox_core::export::{self, ExportFormat};
use prostox_core::{
    AdapterRegistry, BatchError, BatchOptions, Config, FileDiscovery, ItemRegistry, ModelId,
    Orchestrator,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use batch::{print_summary, run_pass, Pass};

/// Arguments for the `process` command.
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Image file or directory to process
    #[arg(required = true)]
    pub input: PathBuf,

    /// Model to generate metadata with (see `prostox models`)
    #[arg(short, long, default_value = "gemini-2.0-flash")]
    pub model: ModelId,

    /// Output file or directory (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Export format
    #[arg(short, long, value_enum, default_value = "csv")]
    pub format: OutputFormat,

    /// Images sent concurrently per group (overrides config)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pause between groups in milliseconds (overrides config)
    #[arg(long)]
    pub pacing_ms: Option<u64>,

    /// Extra rounds for failed images after the first pass
    #[arg(long, default_value = "0")]
    pub retry_failed: u32,
}

/// Execute the process command.
pub async fn execute(args: ProcessArgs, config: Config) -> anyhow::Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input path does not exist: {}", args.input.display());
    }
    let options = batch_options(&config, &args)?;

    let files = FileDiscovery::new(config.processing.clone()).discover(&args.input);
    if files.is_empty() {
        anyhow::bail!(
            "No supported images found at {} (formats: {})",
            args.input.display(),
            config.processing.supported_formats.join(", ")
        );
    }
    tracing::info!(
        "Found {} image(s), {:.1} MB",
        files.len(),
        FileDiscovery::total_size(&files) as f64 / 1_000_000.0
    );

    let registry = Arc::new(ItemRegistry::new());
    for file in &files {
        registry.add_path(&file.path);
    }

    let credentials = Arc::new(super::open_credentials(&config)?);
    let adapters = Arc::new(AdapterRegistry::from_config(&config.providers));
    let pacing = options.pacing_delay;
    let orchestrator = Orchestrator::new(registry.clone(), credentials, adapters, options);

    let start = Instant::now();
    let eligible = registry.stats().eligible();
    match run_pass(&orchestrator, args.model, Pass::Initial, eligible).await {
        Ok(_) => {}
        Err(BatchError::CredentialRequired(model)) => anyhow::bail!(
            "API key required for {model}. Add one with `prostox keys add {model}` \
             or activate a stored key with `prostox keys activate <id>`."
        ),
        Err(e) => return Err(e.into()),
    }

    let rounds = retry_rounds(&orchestrator, &registry, args.model, args.retry_failed, pacing).await?;
    print_summary(&registry, args.model, start.elapsed(), rounds);

    let format = ExportFormat::from(args.format);
    let output = args.output.as_deref().map(|path| output_path(path, format));
    match write_output(&registry, output.as_deref(), format) {
        Ok(count) => {
            if let Some(path) = &output {
                tracing::info!("Exported {count} record(s) to {}", path.display());
            }
            Ok(())
        }
        Err(e) => match e.downcast_ref::<prostox_core::ExportError>() {
            Some(prostox_core::ExportError::NothingToExport) => {
                anyhow::bail!("No images were processed successfully; nothing to export")
            }
            _ => Err(e),
        },
    }
}

/// Config batch settings with CLI overrides applied.
fn batch_options(config: &Config, args: &ProcessArgs) -> anyhow::Result<BatchOptions> {
    let mut options = BatchOptions::from(&config.batch);
    if let Some(size) = args.batch_size {
        if size == 0 {
            anyhow::bail!("--batch-size must be at least 1");
        }
        options.batch_size = size;
    }
    if let Some(ms) = args.pacing_ms {
        options.pacing_delay = Duration::from_millis(ms);
    }
    Ok(options)
}

/// Retry failed items up to `max_rounds` times. Returns the rounds run.
async fn retry_rounds(
    orchestrator: &Orchestrator,
    registry: &ItemRegistry,
    model: ModelId,
    max_rounds: u32,
    pacing: Duration,
) -> anyhow::Result<u32> {
    let mut rounds = 0;
    for round in 1..=max_rounds {
        let failed = registry.stats().error;
        if failed == 0 {
            break;
        }
        tracing::info!("Retry round {round}/{max_rounds}: {failed} failed image(s)");
        tokio::time::sleep(pacing).await;
        match run_pass(orchestrator, model, Pass::Retry(round), failed).await {
            Ok(_) => rounds = round,
            Err(BatchError::NoWorkItems) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(rounds)
}

/// An existing directory gets the format's default file name inside it.
fn output_path(path: &Path, format: ExportFormat) -> PathBuf {
    if path.is_dir() {
        path.join(format.default_file_name())
    } else {
        path.to_path_buf()
    }
}

/// Export done items to `output`, or stdout when absent.
fn write_output(
    registry: &ItemRegistry,
    output: Option<&Path>,
    format: ExportFormat,
) -> anyhow::Result<usize> {
    let items = registry.snapshot();
    if registry.stats().done == 0 {
        return Err(prostox_core::ExportError::NothingToExport.into());
    }
    let count = match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            export::write_export(BufWriter::new(File::create(path)?), &items, format)?
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            let count = export::write_export(&mut lock, &items, format)?;
            if format == ExportFormat::Csv {
                writeln!(lock)?;
            }
            count
        }
    };
    Ok(count)
}
