//! CLI binary for pdf2md-worker.
//!
//! A thin shim over the library: maps flags and environment variables onto
//! `WorkerConfig`, then either serves a job stream or converts one file.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2md_worker::{
    cancel_on_shutdown, queue, spawn_worker_pool, CacheHit, CleanupPolicy, DocumentConverter,
    ModelBackend, Pipeline, PipelineProgress, StorageConfig, WorkerConfig,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar for `convert`. The length is set once extraction reports
/// the page count.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgress for CliProgress {
    fn on_job_start(&self, document: &str, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        self.bar.set_prefix("Converting");
        self.bar.set_message(document.to_string());
    }

    fn on_page_start(&self, page: usize, _total: usize) {
        self.bar.set_message(format!("page {page}"));
    }

    fn on_page_complete(&self, page: usize, total: usize, markdown_len: usize, hit: CacheHit) {
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            green("✓"),
            page,
            total,
            dim(&format!("{markdown_len:>5} chars")),
            dim(&hit.to_string()),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, total: usize, error: &str) {
        self.bar.println(format!("  {} Page {:>3}/{:<3}  {}", red("✗"), page, total, red(error)));
    }

    fn on_job_complete(&self, _document: &str, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {} pages converted", green("✔"), total_pages);
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

/// Turn PDFs into reconciled Markdown with parsed text and a vision model.
#[derive(Parser, Debug)]
#[command(name = "pdf2md-worker", version, color = clap::ColorChoice::Auto)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker pool over newline-delimited JSON job descriptors.
    ///
    /// One JSON report per finished job is written to stdout.
    Serve {
        /// Read descriptors from this file instead of stdin.
        #[arg(long, env = "PDF2MD_JOBS_FILE")]
        jobs: Option<PathBuf>,

        /// Number of jobs processed at once.
        #[arg(short, long, env = "WORKER_CONCURRENCY", default_value_t = 2)]
        concurrency: usize,

        /// Also upload every intermediate file under the output prefix.
        #[arg(long, env = "PDF2MD_PUBLISH_ARTIFACTS")]
        publish_artifacts: bool,
    },

    /// Convert one local PDF.
    Convert {
        /// PDF file to convert.
        input: PathBuf,

        /// Write Markdown to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Disable the progress bar.
        #[arg(long, env = "PDF2MD_NO_PROGRESS")]
        no_progress: bool,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Base URL of the /api/generate service.
    #[arg(long, global = true, env = "OLLAMA_BASE_URL", default_value = pdf2md_worker::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// Use an edgequake-llm provider (openai, anthropic, gemini, ...) instead
    /// of the /api/generate service.
    #[arg(long, global = true, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Model for the page-image transcription.
    #[arg(long, global = true, env = "PDF2MD_VISION_MODEL", default_value = pdf2md_worker::config::DEFAULT_MODEL)]
    vision_model: String,

    /// Model for reconciliation. Defaults to the vision model.
    #[arg(long, global = true, env = "PDF2MD_TEXT_MODEL")]
    text_model: Option<String>,

    #[arg(long, global = true, env = "PDF2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    #[arg(long, global = true, env = "PDF2MD_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Per-request model timeout in seconds (default: none).
    #[arg(long, global = true, env = "PDF2MD_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Parent directory for per-job workspaces.
    #[arg(long, global = true, env = "PDF2MD_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// When to delete a job's workspace.
    #[arg(long, global = true, env = "PDF2MD_CLEANUP", value_enum, default_value = "on-success")]
    cleanup: CleanupArg,

    /// Longest rendered image edge in pixels.
    #[arg(long, global = true, env = "PDF2MD_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Directory containing libpdfium; the system library is used otherwise.
    #[arg(long, global = true, env = "PDFIUM_LIB_DIR")]
    pdfium_lib_dir: Option<PathBuf>,

    /// Serve buckets from sub-directories of this directory instead of S3.
    #[arg(long, global = true, env = "PDF2MD_LOCAL_STORAGE")]
    local_storage: Option<PathBuf>,

    /// S3-compatible endpoint, e.g. http://minio:9000.
    #[arg(long, global = true, env = "S3_HOST")]
    s3_endpoint: Option<String>,

    #[arg(long, global = true, env = "S3_REGION", default_value = "eu-north-1")]
    s3_region: String,

    #[arg(long, global = true, env = "S3_ACCESS_KEY", hide_env_values = true)]
    s3_access_key: Option<String>,

    #[arg(long, global = true, env = "S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    s3_secret_key: Option<String>,

    /// Verbose logging.
    #[arg(short, long, global = true, env = "PDF2MD_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true, env = "PDF2MD_QUIET")]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CleanupArg {
    Keep,
    OnSuccess,
    Always,
}

impl From<CleanupArg> for CleanupPolicy {
    fn from(v: CleanupArg) -> Self {
        match v {
            CleanupArg::Keep => CleanupPolicy::Keep,
            CleanupArg::OnSuccess => CleanupPolicy::RemoveOnSuccess,
            CleanupArg::Always => CleanupPolicy::Always,
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.common.verbose {
        "debug"
    } else if cli.common.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            jobs,
            concurrency,
            publish_artifacts,
        } => {
            let config = build_config(&cli.common, concurrency, publish_artifacts)?;
            serve(config, jobs).await
        }
        Command::Convert {
            input,
            output,
            no_progress,
        } => {
            let config = build_config(&cli.common, 1, false)?;
            let show_progress = !no_progress && !cli.common.quiet;
            convert(config, input, output, show_progress).await
        }
    }
}

/// Map CLI args to `WorkerConfig`.
fn build_config(args: &CommonArgs, concurrency: usize, publish_artifacts: bool) -> Result<WorkerConfig> {
    let backend = match &args.provider {
        Some(name) => ModelBackend::Provider { name: name.clone() },
        None => ModelBackend::Generate {
            base_url: args.base_url.clone(),
        },
    };
    let storage = StorageConfig {
        local_root: args.local_storage.clone(),
        endpoint: args.s3_endpoint.clone(),
        region: args.s3_region.clone(),
        access_key_id: args.s3_access_key.clone(),
        secret_access_key: args.s3_secret_key.clone(),
        allow_http: args
            .s3_endpoint
            .as_deref()
            .is_some_and(|e| e.starts_with("http://")),
    };

    let mut builder = WorkerConfig::builder()
        .concurrency(concurrency)
        .model_backend(backend)
        .vision_model(&args.vision_model)
        .text_model(args.text_model.as_deref().unwrap_or(&args.vision_model))
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .request_timeout_secs(args.request_timeout)
        .storage(storage)
        .cleanup(args.cleanup.into())
        .max_rendered_pixels(args.max_pixels)
        .publish_artifacts(publish_artifacts);
    if let Some(ref root) = args.workspace_root {
        builder = builder.workspace_root(root);
    }
    if let Some(ref dir) = args.pdfium_lib_dir {
        builder = builder.pdfium_lib_dir(dir);
    }
    builder.build().context("Invalid configuration")
}

async fn serve(config: WorkerConfig, jobs_file: Option<PathBuf>) -> Result<()> {
    let concurrency = config.concurrency;
    let pipeline = Arc::new(Pipeline::from_config(config).context("Failed to set up model backend")?);
    let cancel = CancellationToken::new();

    cancel_on_shutdown(cancel.clone()).context("Failed to install shutdown signal handlers")?;

    let pool = spawn_worker_pool(pipeline, concurrency, cancel.clone());

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match jobs_file {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let input = tokio::spawn(queue::read_job_lines(reader, pool.jobs, pool.rejected, cancel));

    let mut reports = pool.reports;
    let (mut completed, mut failed) = (0usize, 0usize);
    while let Some(report) = reports.recv().await {
        if report.is_success() {
            completed += 1;
        } else {
            failed += 1;
        }
        let line = serde_json::to_string(&report).context("Failed to serialise report")?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}").context("Failed to write report")?;
        stdout.flush().ok();
    }

    match input.await {
        Ok(Ok(queued)) => info!("Read {} job descriptors", queued),
        Ok(Err(e)) => error!("Reading job descriptors failed: {}", e),
        Err(e) => error!("Input task failed: {}", e),
    }
    pool.handle.await.context("Worker pool task failed")?;
    info!("{} jobs completed, {} failed", completed, failed);
    Ok(())
}

async fn convert(
    config: WorkerConfig,
    input: PathBuf,
    output: Option<PathBuf>,
    show_progress: bool,
) -> Result<()> {
    let mut converter = DocumentConverter::from_config(&config).context("Failed to set up model backend")?;
    if show_progress {
        converter = converter.with_progress(CliProgress::new());
    }

    match output {
        Some(path) => {
            converter
                .convert_file(&input, &path, &config.workspace)
                .await
                .context("Conversion failed")?;
        }
        None => {
            let tmp = tempfile::tempdir().context("Failed to create temp dir")?;
            let out_path = tmp.path().join("out.md");
            let conversion = converter
                .convert_file(&input, &out_path, &config.workspace)
                .await
                .context("Conversion failed")?;
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(conversion.markdown.as_bytes())
                .context("Failed to write to stdout")?;
            if !conversion.markdown.ends_with('\n') {
                stdout.write_all(b"\n").ok();
            }
        }
    }
    Ok(())
}
