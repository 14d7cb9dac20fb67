//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use exposecast_core::{Pipeline, TaskRunner};
use exposecast_crm::HubSpotClient;
use exposecast_document::{PdfTextExtractor, allowed_file};
use exposecast_llm::OpenAiClient;
use exposecast_shared::{AppConfig, Progress, init_config, load_config, load_config_from};
use exposecast_storage::TaskStore;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

/// How often `run` polls the task store.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// exposecast: turn real-estate exposés into targeted CRM campaigns.
#[derive(Parser)]
#[command(
    name = "exposecast",
    version,
    about = "Extract key facts from real-estate exposés, pick a CRM audience and draft the marketing email.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.exposecast/exposecast.toml.
    #[arg(long, global = true, env = "EXPOSECAST_CONFIG")]
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
    /// Serve the upload page and the upload/progress HTTP API.
    Serve {
        /// Socket address to bind (overrides [server] bind).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one exposé through the pipeline and print the result.
    Run {
        /// Path to the exposé PDF.
        pdf: PathBuf,

        /// Print the full result as JSON instead of a summary.
        #[arg(long)]
        json: bool,
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
        0 => "exposecast=info",
        1 => "exposecast=debug",
        _ => "exposecast=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Serve { bind } => cmd_serve(config_path.as_deref(), bind).await,
        Command::Run { pdf, json } => cmd_run(config_path.as_deref(), &pdf, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Wire the production collaborators into a runner.
fn build_runner(config: &AppConfig) -> Result<Arc<TaskRunner>> {
    let model = OpenAiClient::from_config(&config.llm)?;
    let crm = HubSpotClient::from_config(&config.crm)?;

    let pipeline = Pipeline::new(
        Arc::new(model),
        Arc::new(crm),
        Arc::new(PdfTextExtractor),
        Arc::new(TaskStore::new()),
        config.pipeline.clone(),
    );
    Ok(Arc::new(TaskRunner::new(pipeline)))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_serve(config_path: Option<&Path>, bind: Option<String>) -> Result<()> {
    let mut config = resolve_config(config_path)?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    let runner = build_runner(&config)?;
    let sweeper = runner
        .store()
        .spawn_sweeper(config.tasks.retention(), config.tasks.sweep_interval());

    info!(
        bind = %config.server.bind,
        model = %config.llm.model,
        max_concurrent = config.pipeline.max_concurrent,
        max_queued = config.pipeline.max_queued,
        "starting server"
    );

    let served = exposecast_api::serve(&config.server, runner).await;
    sweeper.abort();
    served?;
    Ok(())
}

async fn cmd_run(config_path: Option<&Path>, pdf: &Path, json: bool) -> Result<()> {
    let filename = pdf
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    if !allowed_file(&filename) {
        return Err(eyre!("'{}' is not a PDF file", pdf.display()));
    }

    let config = resolve_config(config_path)?;
    let document = std::fs::read(pdf).map_err(|e| eyre!("cannot read '{}': {e}", pdf.display()))?;

    let runner = build_runner(&config)?;
    let start = Instant::now();
    let task_id = runner.submit(document)?;
    info!(%task_id, file = %pdf.display(), "processing exposé");

    let reporter = CliProgress::new();
    let progress = loop {
        let progress = runner.store().get_progress(&task_id);
        reporter.update(&progress);
        if progress.is_terminal() {
            break progress;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    reporter.finish();

    let result = runner.store().get_result(&task_id);
    if progress.is_error() {
        return Err(eyre!("{}", progress.status));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let address = &result.key_facts.address;
    let render = |value: &Option<exposecast_shared::FactValue>| {
        value
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| exposecast_shared::MISSING.to_string())
    };

    println!();
    println!("  Exposé processed!");
    println!("  Task:      {task_id}");
    println!(
        "  Address:   {} {}, {} {}",
        render(&address.street),
        render(&address.house_number),
        render(&address.postal_code),
        render(&address.city)
    );
    println!("  Price:     {}", render(&result.key_facts.purchase_price));
    println!(
        "  List:      {} ({})",
        result.selected_list,
        result.selected_list_id.as_deref().unwrap_or("no match")
    );
    println!("  Contacts:  {}", result.selected_contacts.len());
    println!("  Companies: {}", result.selected_companies.len());
    println!("  Curated:   {}", result.curated_member.join(", "));
    println!("  Time:      {:.1}s", start.elapsed().as_secs_f64());
    println!();
    println!("{}", result.email);
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner mirroring the task's stage and percent.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn update(&self, progress: &Progress) {
        self.spinner
            .set_message(format!("{:>3}% {}", progress.percent, progress.status));
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}
