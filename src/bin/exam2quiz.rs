//! CLI binary for edgequake-exam2quiz.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! builds the long-lived handles (database, blob store, model) once and
//! dispatches to a subcommand.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_exam2quiz::pipeline::input::paper_name_from_input;
use edgequake_exam2quiz::{
    extract_paper, label_stored_questions, render_paper, BlobStore, Database, Embedder,
    ExtractionProgressCallback, LlmEmbedder, LlmVisionModel, LocalBlobStore, PaperInfo,
    PipelineConfig, PipelineDeps, ProgressCallback, RunKind, TopicLabel,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
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

/// Live progress bar over the pages of one run; reset for the re-run.
struct CliProgressCallback {
    bar: ProgressBar,
    page_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            page_started: Mutex::new(None),
        })
    }

    fn page_elapsed(&self) -> f64 {
        self.page_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, run: RunKind, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(match run {
            RunKind::Primary => "Extracting",
            RunKind::Rerun => "Re-running",
        });
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting {run} extraction of {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        if let Ok(mut t) = self.page_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total_pages: usize, questions: usize) {
        let elapsed = self.page_elapsed();
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<14}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{questions:>3} questions")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let elapsed = self.page_elapsed();
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total_pages,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.finish_and_clear();
    }

    fn on_run_complete(&self, run: RunKind, questions: usize) {
        self.bar.println(format!(
            "{} {} run: {} questions",
            green("✔"),
            run,
            bold(&questions.to_string())
        ));
    }

    fn on_rerun_wait(&self, delay_secs: u64) {
        self.bar.set_prefix("Waiting");
        self.bar
            .set_message(format!("{delay_secs}s before the re-run"));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a paper into the question bank
  exam2quiz extract prelim.pdf --subject Science --banding Standard --level P6

  # Second pass merged into the first, then JSON summary on stdout
  exam2quiz extract prelim.pdf --subject Science --banding Standard --level P6 --rerun --json

  # Render and upload pages only
  exam2quiz render https://example.org/prelim.pdf --subject Maths --banding Foundation --level P5

  # Topic catalog and labelling
  exam2quiz topics add --subject Science --topic Magnets --description "poles and attraction"
  exam2quiz label --subject Science

  # HTTP API
  exam2quiz serve --bind 0.0.0.0:8080

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  EXAM2QUIZ_DB            SQLite database path
  EXAM2QUIZ_STORE_DIR     Blob store directory
  EXAM2QUIZ_PUBLIC_URL    Public base URL of the blob store
  EXAM2QUIZ_BIND          Server listen address
  PDFIUM_LIB_PATH         Path to libpdfium (or its directory)
"#;

/// Digitise PDF exam papers into a tagged quiz question bank.
#[derive(Parser, Debug)]
#[command(
    name = "exam2quiz",
    version,
    about = "Digitise PDF exam papers into tagged quiz questions using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// SQLite database path.
    #[arg(long, global = true, env = "EXAM2QUIZ_DB", default_value = "exam2quiz.db")]
    db: PathBuf,

    /// Directory of the local blob store.
    #[arg(long, global = true, env = "EXAM2QUIZ_STORE_DIR", default_value = "blobs")]
    store_dir: PathBuf,

    /// Public base URL under which blobs are served.
    #[arg(
        long,
        global = true,
        env = "EXAM2QUIZ_PUBLIC_URL",
        default_value = "http://localhost:8080/files"
    )]
    public_url: String,

    /// S3 bucket; switches the blob store to S3.
    #[cfg(feature = "s3")]
    #[arg(long, global = true, env = "EXAM2QUIZ_S3_BUCKET")]
    s3_bucket: Option<String>,

    #[cfg(feature = "s3")]
    #[arg(long, global = true, env = "EXAM2QUIZ_S3_ENDPOINT", default_value = "https://s3.amazonaws.com")]
    s3_endpoint: String,

    #[cfg(feature = "s3")]
    #[arg(long, global = true, env = "EXAM2QUIZ_S3_REGION")]
    s3_region: Option<String>,

    #[cfg(feature = "s3")]
    #[arg(long, global = true, env = "EXAM2QUIZ_S3_ACCESS_KEY_ID", default_value = "")]
    s3_access_key_id: String,

    #[cfg(feature = "s3")]
    #[arg(long, global = true, env = "EXAM2QUIZ_S3_SECRET_ACCESS_KEY", default_value = "", hide_env_values = true)]
    s3_secret_access_key: String,

    /// Path-style S3 addressing (MinIO).
    #[cfg(feature = "s3")]
    #[arg(long, global = true, env = "EXAM2QUIZ_S3_PATH_STYLE")]
    s3_path_style: bool,

    /// LLM model ID (e.g. gpt-4.1, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, global = true, env = "EXAM2QUIZ_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Max LLM output tokens per call.
    #[arg(long, global = true, env = "EXAM2QUIZ_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "EXAM2QUIZ_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "EXAM2QUIZ_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "EXAM2QUIZ_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// PDF user password for encrypted papers.
    #[arg(long, global = true, env = "EXAM2QUIZ_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Disable progress bar.
    #[arg(long, global = true, env = "EXAM2QUIZ_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "EXAM2QUIZ_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "EXAM2QUIZ_QUIET")]
    quiet: bool,
}

#[derive(Args, Debug)]
struct PaperArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Paper name; defaults to the input's file stem.
    #[arg(long)]
    paper_name: Option<String>,

    #[arg(long)]
    subject: String,

    #[arg(long)]
    banding: String,

    #[arg(long)]
    level: String,
}

impl PaperArgs {
    fn paper_info(&self) -> PaperInfo {
        let name = self
            .paper_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| paper_name_from_input(&self.input));
        PaperInfo::new(name, &self.subject, &self.banding, &self.level)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract questions from a paper and store them.
    Extract {
        #[command(flatten)]
        paper: PaperArgs,

        /// Run the extraction twice and merge the results.
        #[arg(long, env = "EXAM2QUIZ_RERUN")]
        rerun: bool,

        /// Seconds to wait between the two runs.
        #[arg(long, env = "EXAM2QUIZ_RERUN_DELAY", default_value_t = 60)]
        rerun_delay: u64,

        /// Skip topic labelling.
        #[arg(long)]
        no_label: bool,

        /// Path to a text file overriding the bounding-box prompt.
        #[arg(long, env = "EXAM2QUIZ_BOUNDING_BOX_PROMPT")]
        bounding_box_prompt: Option<PathBuf>,

        /// Path to a text file overriding the question prompt.
        #[arg(long, env = "EXAM2QUIZ_QUESTION_PROMPT")]
        question_prompt: Option<PathBuf>,

        /// Print the full extraction output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Render a paper and upload its page images.
    Render {
        #[command(flatten)]
        paper: PaperArgs,
    },
    /// Label stored questions of a subject that have no topic yet.
    Label {
        #[arg(long)]
        subject: String,
    },
    /// Manage the topic catalog.
    Topics {
        #[command(subcommand)]
        action: TopicsCommand,
    },
    /// Run the HTTP API.
    #[cfg(feature = "server")]
    Serve {
        /// Listen address.
        #[arg(long, env = "EXAM2QUIZ_BIND", default_value = "127.0.0.1:8080")]
        bind: std::net::SocketAddr,
    },
}

#[derive(Subcommand, Debug)]
enum TopicsCommand {
    /// Add a catalog entry, or update its description.
    Add {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "")]
        sub_topic: String,
        #[arg(long)]
        description: String,
    },
    /// List catalog entries.
    List {
        #[arg(long)]
        subject: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    let interactive = matches!(cli.command, Command::Extract { json: false, .. });
    let show_progress = interactive && !g.quiet && !g.no_progress;
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || show_progress {
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

    let db = Database::open(&g.db)
        .with_context(|| format!("Failed to open database {}", g.db.display()))?;

    match cli.command {
        Command::Extract {
            ref paper,
            rerun,
            rerun_delay,
            no_label,
            ref bounding_box_prompt,
            ref question_prompt,
            json,
        } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
            } else {
                None
            };
            let mut config = build_config(g, progress)?;
            config.rerun = rerun;
            config.rerun_delay_secs = rerun_delay;
            config.label_topics = !no_label;
            config.bounding_box_prompt = read_prompt(bounding_box_prompt.as_ref()).await?;
            config.question_prompt = read_prompt(question_prompt.as_ref()).await?;

            let deps = build_deps(g, &config, db, !no_label)?;
            let info = paper.paper_info();
            let output = extract_paper(&paper.input, &info, &config, &deps)
                .await
                .context("Extraction failed")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&output).context("Failed to serialise output")?
                );
            } else if !g.quiet {
                let s = &output.stats;
                eprintln!(
                    "{}  {} questions from {} pages  {}ms  →  {}",
                    green("✔"),
                    bold(&s.questions.to_string()),
                    s.pages,
                    s.duration_ms,
                    bold(&output.paper_key),
                );
                eprintln!(
                    "   {} stored  /  {} already present  /  {} labelled  /  {} crops",
                    dim(&s.stored.to_string()),
                    dim(&s.already_present.to_string()),
                    dim(&s.labelled.to_string()),
                    dim(&s.crops.to_string()),
                );
                for conflict in &output.consolidation.conflicts {
                    eprintln!(
                        "   {} Q{} answer key {:?} replaced by {:?}",
                        cyan("⚠"),
                        conflict.question_number,
                        conflict.replaced,
                        conflict.kept
                    );
                }
                if let Some(ref merge) = output.merge {
                    for issue in &merge.inconsistencies {
                        eprintln!("   {} merge: {:?}", cyan("⚠"), issue);
                    }
                }
            }
        }

        Command::Render { ref paper } => {
            let config = build_config(g, None)?;
            let store = build_store(g)?;
            let rendered = render_paper(&paper.input, &paper.paper_info(), &config, store.as_ref())
                .await
                .context("Rendering failed")?;
            for url in &rendered.page_urls {
                println!("{url}");
            }
            if !g.quiet {
                eprintln!(
                    "{} {} pages uploaded for {}",
                    green("✔"),
                    rendered.page_urls.len(),
                    bold(&rendered.paper_key)
                );
            }
        }

        Command::Label { ref subject } => {
            let config = build_config(g, None)?;
            let embedder =
                LlmEmbedder::from_env().context("No embedding provider is configured")?;
            let report = label_stored_questions(&db, &embedder, subject, &config.label_retry)
                .await
                .context("Labelling failed")?;
            for a in &report.assigned {
                println!("Q{}\t{}\t{:.3}", a.question_number, a.topic, a.score);
            }
            if !g.quiet {
                eprintln!(
                    "{} {} labelled, {} skipped",
                    green("✔"),
                    report.assigned.len(),
                    report.skipped.len()
                );
            }
        }

        Command::Topics { ref action } => match action {
            TopicsCommand::Add {
                subject,
                topic,
                sub_topic,
                description,
            } => {
                let stored = db
                    .upsert_topic(TopicLabel {
                        id: None,
                        subject: subject.clone(),
                        topic: topic.clone(),
                        sub_topic: sub_topic.clone(),
                        description: description.clone(),
                    })
                    .await
                    .context("Failed to save topic")?;
                println!("{}", stored.id.unwrap_or_default());
            }
            TopicsCommand::List { subject } => {
                let topics = db
                    .list_topics(subject.as_deref())
                    .await
                    .context("Failed to list topics")?;
                for t in topics {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        t.id.unwrap_or_default(),
                        t.subject,
                        t.topic,
                        t.sub_topic,
                        t.description
                    );
                }
            }
        },

        #[cfg(feature = "server")]
        Command::Serve { bind } => {
            let config = build_config(g, None)?;
            let deps = build_deps(g, &config, db, true)?;
            let state = edgequake_exam2quiz::server::AppState::new(deps, config);
            edgequake_exam2quiz::server::serve(state, bind)
                .await
                .context("Server failed")?;
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(g.dpi)
        .max_tokens(g.max_tokens)
        .temperature(g.temperature)
        .api_timeout_secs(g.api_timeout)
        .download_timeout_secs(g.download_timeout);
    if let Some(ref model) = g.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = g.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = g.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

async fn read_prompt(path: Option<&PathBuf>) -> Result<Option<String>> {
    match path {
        Some(path) => Ok(Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        )),
        None => Ok(None),
    }
}

fn build_store(g: &GlobalArgs) -> Result<Arc<dyn BlobStore>> {
    #[cfg(feature = "s3")]
    if let Some(ref bucket) = g.s3_bucket {
        let store = edgequake_exam2quiz::S3BlobStore::new(edgequake_exam2quiz::S3Config {
            endpoint: g.s3_endpoint.clone(),
            bucket: bucket.clone(),
            region: g.s3_region.clone(),
            access_key_id: g.s3_access_key_id.clone(),
            secret_access_key: g.s3_secret_access_key.clone(),
            path_style: g.s3_path_style,
            public_base_url: None,
        })
        .context("Invalid S3 configuration")?;
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(LocalBlobStore::new(
        g.store_dir.clone(),
        g.public_url.clone(),
    )))
}

fn build_deps(
    g: &GlobalArgs,
    config: &PipelineConfig,
    db: Database,
    want_embedder: bool,
) -> Result<PipelineDeps> {
    let model = LlmVisionModel::from_config(config).context("Failed to initialise LLM provider")?;
    let embedder: Option<Arc<dyn Embedder>> = if want_embedder {
        match LlmEmbedder::from_env() {
            Ok(e) => Some(Arc::new(e)),
            Err(e) => {
                tracing::warn!("Topic labelling disabled: {}", e);
                None
            }
        }
    } else {
        None
    };
    Ok(PipelineDeps {
        model: Arc::new(model),
        embedder,
        store: build_store(g)?,
        db,
    })
}
