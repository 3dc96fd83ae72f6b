//! lessongen CLI
//!
//! Generates Python lessons, scores existing ones, and serves the polling API.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use lesson_orchestrator::{
    create_router, score_lesson, AppState, CancelFlag, Config, Difficulty, GenerationOutcome,
    GenerationRequest, Orchestrator, ProgressSink, QualityReport, RunHooks, TopicResult,
    TopicStatus, CONFIG_FILE_NAME,
};
use lesson_report::{
    json::JsonGenerator, ContentSummary, MarkdownGenerator, QualitySummary, ReportGenerator,
    ReportInput, TopicReport,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 8000;

/// Default bind address for the HTTP API server.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Score below which `validate` exits non-zero.
const VALIDATE_PASS_SCORE: f64 = 0.6;

/// Report file names written next to the generated topics.
const MARKDOWN_REPORT_FILE: &str = "generation_report.md";
const JSON_REPORT_FILE: &str = "generation_report.json";

/// lessongen - Python lesson generator
///
/// Builds multi-module Python lessons (examples, exercises, solutions, tests)
/// from a topic name, using an AI text service or deterministic content.
#[derive(Parser, Debug)]
#[command(name = "lessongen")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate lessons for one or more topics
    Create(CreateArgs),

    /// Score an existing lesson directory
    Validate {
        /// Lesson root (the topic directory)
        #[arg(value_name = "PATH")]
        path: PathBuf,

        /// Print the quality report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Path to configuration file (default: lessongen.json in current directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Write a default lessongen.json
    InitConfig {
        /// Where to write the file
        #[arg(value_name = "FILE", default_value = CONFIG_FILE_NAME)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Topic names, e.g. "Python Fundamentals"
    #[arg(value_name = "TOPIC", required = true)]
    topics: Vec<String>,

    /// Modules per topic (1-10)
    #[arg(short, long, default_value_t = 3)]
    modules: u32,

    /// beginner, intermediate or advanced
    #[arg(short, long, default_value = "beginner", value_parser = parse_difficulty)]
    difficulty: Difficulty,

    /// Use deterministic content only
    #[arg(long)]
    no_ai: bool,

    /// Fail a topic when AI content cannot be produced
    #[arg(long, conflicts_with = "lenient")]
    strict: bool,

    /// Substitute deterministic content when AI content cannot be produced
    #[arg(long)]
    lenient: bool,

    /// Use the cheaper model and shorter completions
    #[arg(long)]
    cost_efficient: bool,

    /// Topics generated in parallel (1-8)
    #[arg(short, long)]
    workers: Option<u32>,

    /// Directory of custom `<slot>.tmpl` templates
    #[arg(long, value_name = "DIR")]
    templates: Option<PathBuf>,

    /// Existing lesson to infer templates from
    #[arg(long, value_name = "DIR")]
    reference: Option<PathBuf>,

    /// Output directory (default: outputDir from the configuration)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Path to configuration file (default: lessongen.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn parse_difficulty(value: &str) -> Result<Difficulty, String> {
    Difficulty::parse(value).ok_or_else(|| {
        format!("unknown difficulty '{value}' (expected beginner, intermediate or advanced)")
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Command::Create(args) => run_create(args).await,
        Command::Validate { path, json } => run_validate(&path, json).await,
        Command::Serve { port, host, config } => run_serve(&host, port, config.as_deref()).await,
        Command::InitConfig { path, force } => run_init_config(&path, force),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

// ============================================================================
// create
// ============================================================================

/// Prints progress lines as the run advances.
struct ConsoleProgress;

#[async_trait]
impl ProgressSink for ConsoleProgress {
    async fn report(&self, step: &str, percent: u8) {
        println!("[{percent:>3}%] {step}");
    }
}

async fn run_create(args: CreateArgs) -> anyhow::Result<ExitCode> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut request = GenerationRequest::new(args.topics)
        .with_modules(args.modules)
        .with_difficulty(args.difficulty)
        .with_ai(!args.no_ai);
    request.cost_efficient = args.cost_efficient;
    if args.strict {
        request = request.with_strict(true);
    } else if args.lenient {
        request = request.with_strict(false);
    }
    if let Some(dir) = args.templates {
        request = request.with_templates_dir(dir);
    }
    if let Some(dir) = args.reference {
        request = request.with_reference_dir(dir);
    }

    let output_root = args
        .output
        .unwrap_or_else(|| PathBuf::from(&config.output_dir));

    print_plan(&request, &output_root, &config);

    let cancel = CancelFlag::new();
    let hooks = RunHooks::new()
        .with_progress(Arc::new(ConsoleProgress))
        .with_cancel(cancel.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            cancel.cancel();
        }
    });

    let orchestrator = Orchestrator::new(config.clone());
    let outcome = orchestrator
        .run(&request, &output_root, &hooks)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    print_outcome(&outcome);
    write_reports(&outcome, &request, &config)?;

    if outcome.failed().next().is_some() {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&Path>) -> anyhow::Result<Config> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn print_plan(request: &GenerationRequest, output_root: &Path, config: &Config) {
    println!("Generating {} topic(s)", request.topics.len());
    println!("  Difficulty: {}", request.difficulty);
    println!("  Modules:    {}", request.modules);
    println!(
        "  Content:    {}",
        if request.ai { "AI" } else { "deterministic" }
    );
    println!("  Workers:    {}", config.workers);
    println!("  Output:     {}", output_root.display());
    println!();
}

fn print_outcome(outcome: &GenerationOutcome) {
    println!();
    for topic in &outcome.topics {
        match topic.status {
            TopicStatus::Completed => {
                let score = topic.quality.as_ref().map_or(0.0, |q| q.score);
                println!(
                    "  ok    {} -> {} ({} files, quality {score:.2})",
                    topic.name,
                    topic.path.display(),
                    topic.files_written
                );
            }
            TopicStatus::Failed => {
                println!(
                    "  FAIL  {}: {}",
                    topic.name,
                    topic.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    println!();
    println!(
        "{} of {} topic(s) generated in {:.1}s",
        outcome.completed().count(),
        outcome.topics.len(),
        outcome.duration_secs()
    );
    if outcome.content.fallbacks > 0 {
        println!(
            "{} slot(s) used fallback content after AI failures",
            outcome.content.fallbacks
        );
    }
}

/// Writes Markdown and JSON reports into the output root.
fn write_reports(
    outcome: &GenerationOutcome,
    request: &GenerationRequest,
    config: &Config,
) -> anyhow::Result<()> {
    if !outcome.output_root.is_dir() {
        return Ok(());
    }

    let input = create_report_input(outcome, request, config);
    let report = ReportGenerator::new(input)
        .generate()
        .map_err(|e| anyhow::anyhow!("Failed to build report: {e}"))?;

    let markdown_path = outcome.output_root.join(MARKDOWN_REPORT_FILE);
    std::fs::write(&markdown_path, MarkdownGenerator::new(&report).generate()).map_err(|e| {
        anyhow::anyhow!(
            "Failed to write report to '{}': {e}\n\nSuggestion: Check that the output directory is writable",
            markdown_path.display()
        )
    })?;

    let json_path = outcome.output_root.join(JSON_REPORT_FILE);
    JsonGenerator::new(&report)
        .write_to_file(&json_path, true)
        .map_err(|e| anyhow::anyhow!("Failed to write report to '{}': {e}", json_path.display()))?;

    println!("Reports written to {}", markdown_path.display());
    Ok(())
}

/// Creates a `ReportInput` from the generation outcome.
fn create_report_input(
    outcome: &GenerationOutcome,
    request: &GenerationRequest,
    config: &Config,
) -> ReportInput {
    ReportInput {
        title: request.topics.join(", "),
        output_root: outcome.output_root.display().to_string(),
        provider: outcome.provider.clone(),
        modules_per_topic: request.modules,
        duration_seconds: u64::try_from((outcome.finished_at - outcome.started_at).num_seconds())
            .unwrap_or(0),
        min_quality_score: config.min_quality_score,
        topics: outcome.topics.iter().map(convert_topic).collect(),
        content: ContentSummary {
            ai_calls: outcome.content.ai_calls,
            cache_hits: outcome.content.cache_hits,
            fallbacks: outcome.content.fallbacks,
        },
        templates: outcome
            .templates
            .iter()
            .map(|(slot, source)| (slot.clone(), source.to_string()))
            .collect(),
    }
}

fn convert_topic(topic: &TopicResult) -> TopicReport {
    TopicReport {
        name: topic.name.clone(),
        slug: topic.slug.clone(),
        path: topic.path.display().to_string(),
        status: match topic.status {
            TopicStatus::Completed => lesson_report::TopicStatus::Completed,
            TopicStatus::Failed => lesson_report::TopicStatus::Failed,
        },
        modules: topic.modules.len(),
        files_written: topic.files_written,
        quality: topic.quality.as_ref().map(convert_quality),
        error: topic.error.clone(),
    }
}

fn convert_quality(report: &QualityReport) -> QualitySummary {
    QualitySummary {
        score: report.score,
        factors: report.factors.clone(),
        issues: report.issues.clone(),
    }
}

// ============================================================================
// validate
// ============================================================================

async fn run_validate(path: &Path, json: bool) -> anyhow::Result<ExitCode> {
    let root = path.to_path_buf();
    let report = tokio::task::spawn_blocking(move || score_lesson(&root, None))
        .await
        .map_err(|e| anyhow::anyhow!("Scoring task failed: {e}"))?
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_quality(path, &report);
    }

    if report.passes(VALIDATE_PASS_SCORE) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn print_quality(path: &Path, report: &QualityReport) {
    println!("Quality report for {}", path.display());
    println!();
    println!("  Score: {:.2}", report.score);
    for (name, value) in &report.factors {
        println!("  {name:<13} {value:.2}");
    }
    if !report.metrics.is_empty() {
        println!();
        for (name, value) in &report.metrics {
            println!("  {name:<13} {value}");
        }
    }
    if !report.issues.is_empty() {
        println!();
        println!("Issues:");
        for issue in &report.issues {
            println!("  - {issue}");
        }
    }
    println!();
    if report.passes(VALIDATE_PASS_SCORE) {
        println!("PASS (threshold {VALIDATE_PASS_SCORE:.2})");
    } else {
        println!("FAIL (threshold {VALIDATE_PASS_SCORE:.2})");
    }
}

// ============================================================================
// serve
// ============================================================================

async fn run_serve(host: &str, port: u16, config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = load_config(config_path)?;
    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        anyhow::anyhow!("Invalid address '{host}:{port}': {e}\n\nSuggestion: Use an IP address such as 127.0.0.1 for --host")
    })?;

    tracing::info!(
        output_dir = %config.output_dir,
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Starting API server"
    );
    let router = create_router(AppState::new(config));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!("HTTP API server running on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// init-config
// ============================================================================

fn run_init_config(path: &Path, force: bool) -> anyhow::Result<ExitCode> {
    if path.exists() && !force {
        anyhow::bail!(
            "'{}' already exists\n\nSuggestion: Pass --force to overwrite it",
            path.display()
        );
    }

    let contents = Config::default()
        .to_json_pretty()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    std::fs::write(path, contents + "\n")
        .map_err(|e| anyhow::anyhow!("Failed to write '{}': {e}", path.display()))?;

    println!("Wrote default configuration to {}", path.display());
    Ok(ExitCode::SUCCESS)
}
