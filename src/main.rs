//! Prism - research run client
//!
//! Submits research queries, renders the live timeline and keeps an archive
//! of finished runs.

use clap::{Parser, Subcommand};
use prism::{
    health::{HealthNotification, HealthPoller, StatusCache},
    log_error, log_info, log_warn, logging,
    run::{RunOutcome, RunPhase, RunUpdate},
    settings::{AgentModelKey, ClarificationMode, ModelConfigUpdate},
    ApiClient, ApiKeys, AppConfig, Archive, Database, KeyValueStore, RunController, RunRecord,
    SettingsStore, StreamSession,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a research query and stream its progress
    Research {
        /// Research question
        query: String,
        /// Run id (an archived id is replayed without contacting the server)
        #[arg(long)]
        id: Option<Uuid>,
    },
    /// Browse archived runs
    History {
        #[command(subcommand)]
        cmd: HistoryCmd,
    },
    /// Check backend and LLM API health once
    Status,
    /// Send Google search credentials to the research service
    Keys {
        #[arg(long)]
        google_api_key: String,
        #[arg(long)]
        google_cx_id: String,
    },
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        cmd: SettingsCmd,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List archived runs, newest first
    List {
        /// Case-insensitive substring of the query
        #[arg(long)]
        filter: Option<String>,
    },
    /// Show one archived run
    Show { id: Uuid },
    /// Delete one archived run
    Delete { id: Uuid },
    /// Delete every archived run
    Clear,
    /// List runs that were started but never archived
    Pending,
}

#[derive(Subcommand, Debug)]
enum SettingsCmd {
    Show,
    /// Configure the model used by one agent slot
    Model {
        /// prism-reasoning-core, prism-researcher-default, prism-summarizer-large-context or prism-coder-agent
        key: AgentModelKey,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
    },
    /// agent, always_ask or never_ask
    Clarification { mode: ClarificationMode },
}

#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(version)]
#[command(about = "Research run client", long_about = None)]
struct Args {
    /// Configuration file path (overrides defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;
    init_logging(args.verbose, config.debug);
    if let Err(e) = logging::init_logger(config.data_dir.as_deref()) {
        tracing::warn!("File logging disabled: {}", e);
    }

    let db_path = config.database_path();
    tracing::debug!("Opening database at {:?}", db_path);
    let store: Arc<dyn KeyValueStore> = Arc::new(Database::new(&db_path).await?);

    match args.command {
        Command::Research { query, id } => research(&config, store, query, id).await,
        Command::History { cmd } => history(store, cmd).await,
        Command::Status => status(&config, store).await,
        Command::Keys {
            google_api_key,
            google_cx_id,
        } => {
            let settings = SettingsStore::load(store).await?;
            settings.set_google_keys(&google_api_key, &google_cx_id).await?;
            let message = ApiClient::new(&config)
                .update_api_keys(&ApiKeys {
                    google_api_key,
                    google_cx_id,
                })
                .await?;
            println!("{}", message);
            Ok(())
        }
        Command::Settings { cmd } => settings(store, cmd).await,
    }
}

fn init_logging(verbose: bool, debug_mode: bool) {
    if debug_mode {
        logging::set_debug_mode(true);
    }

    let filter = if verbose || debug_mode {
        "prism=debug,info"
    } else {
        "prism=info,warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn health_poller(
    config: &AppConfig,
    api: &ApiClient,
    cache: StatusCache,
    notifications: mpsc::UnboundedSender<HealthNotification>,
) -> HealthPoller {
    HealthPoller::from_config(&config.health, cache, notifications)
        .with_probe(Arc::new(api.backend_probe()))
        .with_probe(Arc::new(api.llm_probe()))
}

async fn research(
    config: &AppConfig,
    store: Arc<dyn KeyValueStore>,
    query: String,
    id: Option<Uuid>,
) -> anyhow::Result<()> {
    let api = ApiClient::new(config);
    let shutdown = CancellationToken::new();

    // Health monitoring runs for the whole process, independent of the run.
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let cache = StatusCache::new_session(store.clone()).await?;
    let poller = health_poller(config, &api, cache, notify_tx).spawn(shutdown.clone());
    tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            log_warn!("{}", notification.message());
            eprintln!("* {}", notification.message());
        }
    });

    let session = StreamSession::new(api.client().clone(), api.research_stream_url());
    tracing::debug!("Research stream endpoint: {}", session.endpoint());
    let controller = RunController::new(
        Arc::new(session),
        Archive::load(store.clone()).await?,
        SettingsStore::load(store).await?,
    );

    let run_cancel = shutdown.child_token();
    let ctrl_c_cancel = run_cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let (tx, mut rx) = mpsc::channel::<RunUpdate>(64);
    let renderer = tokio::spawn(async move {
        let mut view = TimelineView::default();
        while let Some(update) = rx.recv().await {
            view.render(&update);
        }
    });

    let run_id = id.unwrap_or_else(Uuid::new_v4);
    log_info!("Run {} started: {}", run_id, query);
    let outcome = controller.start(run_id, &query, run_cancel, tx).await;

    let _ = renderer.await;
    shutdown.cancel();
    let _ = poller.await;

    match outcome? {
        RunOutcome::Completed(record) => {
            log_info!("Run {} completed with {} steps", run_id, record.history.len());
            print_report(&record);
        }
        RunOutcome::Failed { detail } => {
            log_error!("Run {} failed: {}", run_id, detail);
            anyhow::bail!("{}", detail);
        }
        RunOutcome::Cancelled => {
            log_info!("Run {} cancelled", run_id);
        }
    }

    Ok(())
}

/// Prints each completed step once and the activity line whenever it changes.
#[derive(Default)]
struct TimelineView {
    printed_steps: usize,
    last_activity: Option<&'static str>,
}

impl TimelineView {
    fn render(&mut self, update: &RunUpdate) {
        for step in update.timeline.completed.iter().skip(self.printed_steps) {
            let summaries = step.output.summaries.as_ref().map_or(0, Vec::len);
            println!(
                "[{}] {} (task {}): {}{}",
                step.unique_id,
                step.agent,
                step.task_id,
                step.prompt,
                if summaries > 0 {
                    format!(" - {} sources", summaries)
                } else {
                    String::new()
                }
            );
        }
        self.printed_steps = update.timeline.completed.len();

        match &update.phase {
            RunPhase::Streaming if self.last_activity != Some(update.activity) => {
                eprintln!("... {}", update.activity);
                self.last_activity = Some(update.activity);
            }
            RunPhase::Cancelled => eprintln!("Research cancelled."),
            _ => {}
        }
    }
}

fn print_report(record: &RunRecord) {
    println!();
    println!("# {}", record.query);
    println!();
    println!("{}", record.final_report.report);
    for url in &record.final_report.image_urls {
        println!("![image]({})", url);
    }
}

async fn history(store: Arc<dyn KeyValueStore>, cmd: HistoryCmd) -> anyhow::Result<()> {
    let archive = Archive::load(store).await?;

    match cmd {
        HistoryCmd::List { filter } => {
            let records = archive.list(filter.as_deref()).await;
            if records.is_empty() {
                println!("No archived runs.");
            }
            for record in records {
                println!(
                    "{}  {}  {}",
                    record.id,
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.query
                );
            }
        }
        HistoryCmd::Show { id } => match archive.get(id).await {
            Some(record) => {
                for step in &record.history {
                    println!("[{}] {}: {}", step.unique_id, step.agent, step.prompt);
                    if let Some(code) = &step.output.code {
                        println!("    code: {}", code);
                    }
                    for summary in step.output.summaries.iter().flatten() {
                        println!(
                            "    {} ({:.2}) {}",
                            summary.title, summary.relevance_score, summary.url
                        );
                    }
                }
                print_report(&record);
            }
            None => anyhow::bail!("No archived run with id {}", id),
        },
        HistoryCmd::Delete { id } => {
            if archive.delete(id).await? {
                println!("Deleted {}", id);
            } else {
                anyhow::bail!("No archived run with id {}", id);
            }
        }
        HistoryCmd::Clear => {
            archive.clear().await?;
            println!("Archive cleared.");
        }
        HistoryCmd::Pending => {
            for (id, query) in archive.pending().await {
                println!("{}  {}", id, query);
            }
        }
    }

    Ok(())
}

async fn status(config: &AppConfig, store: Arc<dyn KeyValueStore>) -> anyhow::Result<()> {
    let api = ApiClient::new(config);
    let (tx, _rx) = mpsc::unbounded_channel();
    let cache = StatusCache::load(store).await?;
    let poller = health_poller(config, &api, cache, tx);

    for (service, status) in poller.poll_once().await {
        let latency = status
            .latency_ms
            .map(|ms| format!("{} ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!("{:<16} {:<9} {}", service.display_name(), status.classification, latency);
    }

    Ok(())
}

async fn settings(store: Arc<dyn KeyValueStore>, cmd: SettingsCmd) -> anyhow::Result<()> {
    let settings = SettingsStore::load(store).await?;

    match cmd {
        SettingsCmd::Show => {
            let snapshot = settings.snapshot().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        SettingsCmd::Model {
            key,
            provider,
            model,
            api_key,
            base_url,
        } => {
            settings
                .set_model_config(
                    key,
                    ModelConfigUpdate {
                        provider,
                        model,
                        api_key,
                        base_url,
                    },
                )
                .await?;
            println!("Updated {}", key);
        }
        SettingsCmd::Clarification { mode } => {
            settings.set_clarification_mode(mode).await?;
            println!("Clarification mode set to {:?}", mode);
        }
    }

    Ok(())
}
