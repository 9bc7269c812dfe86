//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use coursebase_core::pipeline::{InitializeReport, InitializeRequest, ProgressReporter};
use coursebase_core::providers::{build_index, lms_credential, open_state};
use coursebase_core::{Orchestrator, PipelineSettings, Providers, course_graph, outcome_of, query_course};
use coursebase_shared::{AppConfig, init_config, load_config, load_config_from};
use coursebase_storage::CourseStateStore;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// coursebase: turn LMS course files into a queryable course knowledge base.
#[derive(Parser)]
#[command(
    name = "coursebase",
    version,
    about = "Initialize LMS courses into a retrieval corpus and topic knowledge graph.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.coursebase/coursebase.toml).
    #[arg(long, global = true, env = "COURSEBASE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the initialization pipeline for a course.
    Init {
        /// LMS course ID.
        #[arg(long)]
        course_id: String,

        /// Topics, separated by commas or newlines.
        #[arg(long, default_value = "")]
        topics: String,

        /// Print the `{status, corpus_id, ...}` outcome as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the lifecycle state of a course.
    Status {
        #[arg(long)]
        course_id: String,
    },

    /// Print the full course document as JSON.
    Show {
        #[arg(long)]
        course_id: String,
    },

    /// Ask a question against an initialized course.
    Query {
        #[arg(long)]
        course_id: String,

        #[arg(long)]
        question: String,
    },

    /// Print the knowledge graph of a course as JSON.
    Graph {
        #[arg(long)]
        course_id: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "coursebase=info",
        1 => "coursebase=debug",
        _ => "coursebase=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    let config = || -> Result<AppConfig> {
        Ok(match &config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        })
    };

    match cli.command {
        Command::Init {
            course_id,
            topics,
            json,
        } => cmd_init(&config()?, &course_id, &topics, json).await,
        Command::Status { course_id } => cmd_status(&config()?, &course_id).await,
        Command::Show { course_id } => cmd_show(&config()?, &course_id).await,
        Command::Query {
            course_id,
            question,
        } => cmd_query(&config()?, &course_id, &question).await,
        Command::Graph { course_id } => cmd_graph(&config()?, &course_id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config()?).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_init(config: &AppConfig, course_id: &str, topics: &str, json: bool) -> Result<()> {
    info!(course_id, "initializing course");

    let credential = match lms_credential(config) {
        Ok(credential) => Some(credential),
        Err(e) => {
            warn!(error = %e, "LMS token unavailable");
            None
        }
    };
    let request = InitializeRequest {
        course_id: course_id.to_string(),
        topics: topics.to_string(),
        credential,
    };

    let reporter = CliProgress::new(!json);
    let result = match Providers::from_config(config).await {
        Ok(providers) => {
            let orchestrator = Orchestrator::new(providers, PipelineSettings::from(&config.pipeline));
            orchestrator.initialize_course(&request, &reporter).await
        }
        Err(e) => Err(e),
    };
    reporter.finish();

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome_of(&result))?);
        return result.map(|_| ()).map_err(|e| eyre!("initialization failed: {e}"));
    }

    let report = result?;
    println!();
    println!("  Course initialized successfully!");
    println!("  Course:   {}", report.course_id);
    println!("  Corpus:   {}", report.corpus_id);
    println!("  Files:    {} listed, {} uploaded", report.files_count, report.uploaded_count);
    for failure in &report.upload_failures {
        println!("            skipped {} ({})", failure.display_name, failure.error);
    }
    println!("  Topics:   {}", report.topics.join(", "));
    println!("  Graph:    {} nodes, {} edges", report.graph_nodes, report.graph_edges);
    for warning in &report.cleanup_warnings {
        println!("  Warning:  {warning}");
    }
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_status(config: &AppConfig, course_id: &str) -> Result<()> {
    let state = open_state(config).await?;
    let status = state.get_state(course_id).await?;
    println!("{course_id}: {status}");
    Ok(())
}

async fn cmd_show(config: &AppConfig, course_id: &str) -> Result<()> {
    let state = open_state(config).await?;
    match state.read(course_id).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("{course_id}: NEEDS_INIT (no course document)"),
    }
    Ok(())
}

async fn cmd_query(config: &AppConfig, course_id: &str, question: &str) -> Result<()> {
    let state = open_state(config).await?;
    let index = build_index(config)?;
    let answer = query_course(state.as_ref(), index.as_ref(), course_id, question).await?;

    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources:");
        for source in &answer.sources {
            println!("  - {source}");
        }
    }
    Ok(())
}

async fn cmd_graph(config: &AppConfig, course_id: &str) -> Result<()> {
    let state = open_state(config).await?;
    let graph = course_graph(state.as_ref(), course_id).await?;
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                spinner: ProgressBar::hidden(),
            };
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn file_staged(&self, name: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Staged [{current}/{total}] {name}"));
    }

    fn file_uploaded(&self, name: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Uploaded [{current}/{total}] {name}"));
    }

    fn done(&self, _report: &InitializeReport) {
        self.spinner.finish_and_clear();
    }
}
