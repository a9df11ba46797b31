//! CLI binary for edgequake-doc2md.
//!
//! A thin shim over the library crate: `serve` runs the HTTP API, `convert`
//! turns one file or URL into Markdown, `batch` converts a whole ZIP archive
//! with a live progress bar.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_doc2md::server::{start_server, AppState};
use edgequake_doc2md::{
    convert_document, BatchProgressCallback, BatchStatus, ConverterRegistry, Dispatcher,
    Doc2MdService, MemberStatus, ServiceConfig, VisionConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders one progress bar per batch run plus a log line per member.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Extracting archive…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed(&self, filename: &str) -> String {
        let ms = self
            .start_times
            .lock()
            .map(|mut t| t.remove(filename))
            .ok()
            .flatten()
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, _batch_id: &str, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting conversion of {total} file(s)…"))
        ));
    }

    fn on_member_start(&self, _batch_id: &str, filename: &str, _index: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(filename.to_string(), Instant::now());
        }
        self.bar.set_message(filename.to_string());
    }

    fn on_member_complete(&self, _batch_id: &str, filename: &str, index: usize, total: usize) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<40}  {}",
            green("✓"),
            index + 1,
            total,
            filename,
            self.elapsed(filename),
        ));
        self.bar.inc(1);
    }

    fn on_member_error(&self, _batch_id: &str, filename: &str, index: usize, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}      {:<40}  {}  {}",
            red("✗"),
            index + 1,
            filename,
            red(&msg),
            self.elapsed(filename),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, _batch_id: &str, completed: usize, failed: usize) {
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} file(s) converted", green("✔"), bold(&completed.to_string()));
        } else {
            eprintln!(
                "{} {}/{} file(s) converted  ({} failed)",
                if completed == 0 { red("✘") } else { cyan("⚠") },
                bold(&completed.to_string()),
                completed + failed,
                red(&failed.to_string()),
            );
        }
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP API on port 5000
  doc2md serve --addr 0.0.0.0:5000 --data-dir /var/lib/doc2md

  # Convert one file (stdout)
  doc2md convert report.docx

  # Convert a URL to a file
  doc2md convert https://example.com/paper.pdf -o paper.md

  # Convert every document in an archive
  doc2md batch docs.zip --out-dir md/

  # Only some members of an encrypted archive
  doc2md batch secret.zip --password hunter2 --files a.pdf --files b.xlsx

SUPPORTED FORMATS:
  pdf     .pdf                      vision LLM, text layer as fallback
  word    .docx .doc
  excel   .xlsx .xls
  ppt     .pptx .ppt
  image   .jpg .jpeg .png .gif .bmp vision LLM when configured
  audio   .mp3 .wav .flac …         metadata only
  video   .mp4 .mov .mkv …          metadata only
  html    .html .htm
  csv     .csv
  json    .json
  xml     .xml

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory holding libpdfium
  RUST_LOG                Log filter (overrides --verbose / --quiet)
"#;

/// Convert documents and ZIP archives to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "doc2md",
    version,
    about = "Convert documents and ZIP archives to Markdown",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOC2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOC2MD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "DOC2MD_ADDR", default_value = "127.0.0.1:5000")]
        addr: String,

        #[command(flatten)]
        service: ServiceArgs,

        #[command(flatten)]
        vision: VisionArgs,
    },

    /// Convert one local file or HTTP(S) URL.
    Convert {
        /// Local file path or HTTP/HTTPS URL.
        input: String,

        /// Write Markdown to this file instead of stdout.
        #[arg(short, long, env = "DOC2MD_OUTPUT")]
        output: Option<PathBuf>,

        /// Output JSON (name, format, markdown, note) instead of Markdown.
        #[arg(long, env = "DOC2MD_JSON")]
        json: bool,

        /// Per-file converter timeout in seconds.
        #[arg(long, env = "DOC2MD_CONVERT_TIMEOUT")]
        convert_timeout: Option<u64>,

        /// HTTP download timeout in seconds.
        #[arg(long, env = "DOC2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
        download_timeout: u64,

        #[command(flatten)]
        vision: VisionArgs,
    },

    /// Extract a ZIP archive and convert its members.
    Batch {
        /// Path to the .zip archive.
        archive: PathBuf,

        /// Archive password for encrypted entries.
        #[arg(long, env = "DOC2MD_ZIP_PASSWORD")]
        password: Option<String>,

        /// Convert only these members (extracted names). Repeatable.
        #[arg(long = "files", value_name = "NAME")]
        files: Vec<String>,

        /// Write Markdown files here instead of `<data-dir>/downloads`.
        #[arg(long, env = "DOC2MD_OUT_DIR")]
        out_dir: Option<PathBuf>,

        /// Disable progress bar.
        #[arg(long, env = "DOC2MD_NO_PROGRESS")]
        no_progress: bool,

        /// Keep the extraction directory after conversion.
        #[arg(long)]
        keep_files: bool,

        #[command(flatten)]
        service: ServiceArgs,

        #[command(flatten)]
        vision: VisionArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct ServiceArgs {
    /// Root for uploads/, downloads/, work/ and the JSON state files.
    #[arg(long, env = "DOC2MD_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Largest accepted upload in MiB.
    #[arg(long, env = "DOC2MD_MAX_UPLOAD_MB", default_value_t = 100)]
    max_upload_mb: u64,

    /// Number of history records kept.
    #[arg(long, env = "DOC2MD_HISTORY_CAP", default_value_t = 100)]
    history_cap: usize,

    /// Batch conversions allowed to run at the same time.
    #[arg(long, env = "DOC2MD_MAX_CONCURRENT_BATCHES", default_value_t = 2)]
    max_concurrent_batches: usize,

    /// Per-file converter timeout in seconds.
    #[arg(long, env = "DOC2MD_CONVERT_TIMEOUT")]
    convert_timeout: Option<u64>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOC2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Args, Debug, Clone)]
struct VisionArgs {
    /// Vision LLM model ID (e.g. gpt-4.1-nano, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DOC2MD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens per page or image.
    #[arg(long, env = "DOC2MD_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Retries per LLM call.
    #[arg(long, env = "DOC2MD_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Convert only the first N pages of each PDF.
    #[arg(long, env = "DOC2MD_MAX_PAGES")]
    max_pages: Option<usize>,

    /// Concurrent LLM calls per PDF.
    #[arg(long, env = "DOC2MD_PAGE_CONCURRENCY", default_value_t = 4)]
    page_concurrency: usize,

    /// Path to a text file containing a custom PDF system prompt.
    #[arg(long, env = "DOC2MD_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Directory containing the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Describe images by metadata only, without the vision LLM.
    #[arg(long, env = "DOC2MD_NO_IMAGE_OCR")]
    no_image_ocr: bool,
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The progress bar gives all the feedback that matters during a batch.
    let show_progress = !cli.quiet
        && matches!(&cli.command, Command::Batch { no_progress, .. } if !no_progress);
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            addr,
            service,
            vision,
        } => {
            let config = build_config(&service, &vision, None).await?;
            let service = Doc2MdService::new(config).context("Failed to start service")?;
            if !cli.quiet {
                eprintln!("{} doc2md listening on {}", cyan("◆"), bold(&addr));
            }
            start_server(&addr, AppState::new(service))
                .await
                .with_context(|| format!("Server on {addr} failed"))?;
        }

        Command::Convert {
            input,
            output,
            json,
            convert_timeout,
            download_timeout,
            vision,
        } => {
            let vision = build_vision(&vision).await?;
            let dispatcher = Dispatcher::new(ConverterRegistry::with_defaults(&vision))
                .with_timeout(convert_timeout.map(Duration::from_secs));
            let doc = convert_document(&input, &dispatcher, download_timeout)
                .await
                .context("Conversion failed")?;

            if json {
                let value = serde_json::json!({
                    "name": doc.name,
                    "format": doc.format,
                    "markdown": doc.markdown,
                    "note": doc.note,
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value).context("Failed to serialise output")?
                );
            } else if let Some(ref path) = output {
                tokio::fs::write(path, &doc.markdown)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                if !cli.quiet {
                    eprintln!("{}  {}  →  {}", green("✔"), doc.name, bold(&path.display().to_string()));
                }
            } else {
                let stdout = io::stdout();
                let mut handle = stdout.lock();
                handle
                    .write_all(doc.markdown.as_bytes())
                    .context("Failed to write to stdout")?;
                if !doc.markdown.ends_with('\n') {
                    handle.write_all(b"\n").ok();
                }
            }
            if let (Some(note), false) = (&doc.note, cli.quiet) {
                eprintln!("{} {}", cyan("⚠"), note);
            }
        }

        Command::Batch {
            archive,
            password,
            files,
            out_dir,
            no_progress: _,
            keep_files,
            service,
            vision,
        } => {
            let config = build_config(&service, &vision, out_dir).await?;
            let mut svc = Doc2MdService::new(config).context("Failed to start service")?;
            if show_progress {
                svc = svc.with_progress(CliProgressCallback::new());
            }
            run_batch(&svc, &archive, password, files, keep_files, cli.quiet).await?;
        }
    }

    Ok(())
}

/// Upload → extract → convert one archive and print a per-member summary.
async fn run_batch(
    svc: &Doc2MdService,
    archive: &std::path::Path,
    password: Option<String>,
    files: Vec<String>,
    keep_files: bool,
    quiet: bool,
) -> Result<()> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = tokio::fs::read(archive)
        .await
        .with_context(|| format!("Failed to read {}", archive.display()))?;

    let batches = svc.batches();
    let receipt = batches
        .upload(&name, &bytes, password)
        .await
        .context("Upload failed")?;
    let summary = batches
        .extract(&receipt.batch_id)
        .await
        .context("Extraction failed")?;
    if !quiet {
        eprintln!(
            "{} {}: {} file(s), {} failed to extract",
            cyan("◆"),
            bold(&receipt.archive_name),
            summary.total_files,
            summary.failed_files,
        );
        for member in summary.files.iter().filter(|m| !m.is_extracted()) {
            eprintln!(
                "  {} {}  {}",
                red("✗"),
                member.filename,
                red(member.error.as_deref().unwrap_or("not extracted")),
            );
        }
    }

    let selection = Some(files).filter(|f| !f.is_empty());
    batches
        .start_conversion(&receipt.batch_id, selection)
        .await
        .context("Conversion failed to start")?
        .join()
        .await;

    let job = batches.status(&receipt.batch_id)?;
    if !quiet {
        for member in &job.members {
            match member.conversion_status {
                Some(MemberStatus::Completed) => {
                    let path = member
                        .markdown_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    let note = member
                        .conversion_error
                        .as_deref()
                        .map(|e| format!("  {}", dim(e)))
                        .unwrap_or_default();
                    println!("{}  {}  →  {}{}", green("✓"), member.filename(), path, note);
                }
                Some(MemberStatus::Failed) => println!(
                    "{}  {}  {}",
                    red("✗"),
                    member.filename(),
                    red(member.conversion_error.as_deref().unwrap_or("failed")),
                ),
                _ => {}
            }
        }
    }

    if !keep_files {
        batches
            .cleanup(&receipt.batch_id)
            .await
            .context("Failed to remove extracted files")?;
    }

    if job.status != BatchStatus::Completed {
        anyhow::bail!(
            "batch {} ended '{}': {}",
            job.batch_id,
            job.status,
            job.error.unwrap_or_default()
        );
    }
    Ok(())
}

// ── Config mapping ───────────────────────────────────────────────────────────

async fn build_vision(args: &VisionArgs) -> Result<VisionConfig> {
    let mut vision = VisionConfig::default()
        .with_temperature(args.temperature)
        .with_max_retries(args.max_retries)
        .with_page_concurrency(args.page_concurrency)
        .with_max_pages(args.max_pages)
        .with_image_ocr(!args.no_image_ocr);
    if let Some(ref model) = args.model {
        vision = vision.with_model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        vision = vision.with_provider_name(provider.clone());
    }
    if let Some(ref dir) = args.pdfium_lib_path {
        vision = vision.with_pdfium_lib_path(dir.clone());
    }
    vision.max_tokens = args.max_tokens;
    if let Some(ref path) = args.system_prompt {
        vision.system_prompt = Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        );
    }
    Ok(vision)
}

async fn build_config(
    service: &ServiceArgs,
    vision: &VisionArgs,
    out_dir: Option<PathBuf>,
) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .data_dir(&service.data_dir)
        .max_upload_bytes(service.max_upload_mb.saturating_mul(1024 * 1024))
        .history_cap(service.history_cap)
        .max_concurrent_batches(service.max_concurrent_batches)
        .convert_timeout_secs(service.convert_timeout)
        .download_timeout_secs(service.download_timeout)
        .vision(build_vision(vision).await?);
    if let Some(dir) = out_dir {
        builder = builder.download_dir(dir);
    }
    builder.build().context("Invalid configuration")
}
