use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use intake_agent::{
    Backend, ChatCompletionsClient, ConfirmPolicy, ConsoleCapture, ConsolePlayback, Conversation,
    ConversationSession, DelegatedEngine, DocumentStore, EngineKind, Engines, FileSessionStore,
    GatewayConfig, IntakeConfig, IntakeService, PersistenceAdapter, RecordedEvent, RuleEngine,
    TextRenderer, VoiceSession, replay, server,
};

#[derive(Parser)]
#[command(name = "intake-agent")]
#[command(author, version, about = "Voice-driven medical intake assistant", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct CoreArgs {
    /// Directory for session records and rendered reports
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Conversation engine for new sessions
    #[arg(long, value_enum, default_value = "rules")]
    engine: EngineKind,

    /// How answers to "anything else?" are classified
    #[arg(long, value_enum, default_value = "keyword")]
    confirm_policy: ConfirmPolicy,

    /// Silence (ms) after an interim transcript before it counts as final
    #[arg(long, default_value = "2000")]
    debounce_ms: u64,

    /// Prefix for document URLs returned to clients
    #[arg(long, default_value = "")]
    public_base_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        #[command(flatten)]
        core: CoreArgs,
    },

    /// Run a console voice session (stdin as speech, stdout as playback)
    Chat {
        #[command(flatten)]
        core: CoreArgs,
    },

    /// Replay a recorded capture stream through a fresh session
    Replay {
        /// JSON array of {text, is_final, at_ms}
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        core: CoreArgs,
    },

    /// List stored sessions, newest first
    History {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },

    /// Print the stored report of a session
    Show {
        #[arg(short, long)]
        session: String,

        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Serve { bind, core } => serve(bind, core).await,
        Commands::Chat { core } => chat(core).await,
        Commands::Replay { input, core } => replay_recording(input, core).await,
        Commands::History { data_dir } => history(data_dir).await,
        Commands::Show { session, data_dir } => show(session, data_dir).await,
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

impl CoreArgs {
    fn config(&self) -> IntakeConfig {
        IntakeConfig {
            data_dir: self.data_dir.clone(),
            engine: self.engine,
            confirm_policy: self.confirm_policy,
            debounce_window: std::time::Duration::from_millis(self.debounce_ms),
            public_base_url: self.public_base_url.clone(),
            ..Default::default()
        }
    }
}

async fn build(config: IntakeConfig) -> Result<(Backend, Engines)> {
    let store = FileSessionStore::new(config.sessions_dir())
        .await
        .context("Failed to open session store")?;
    let documents = DocumentStore::new(config.reports_dir())
        .await
        .context("Failed to open document store")?;

    let gateway_config = GatewayConfig::from_env();
    if gateway_config.api_key.is_none() {
        warn!("INTAKE_LLM_API_KEY not set; the offline triage generator will answer");
    }
    let gateway = Arc::new(
        ChatCompletionsClient::new(gateway_config).context("Failed to build LLM client")?,
    );

    let engines = Engines {
        rules: Arc::new(RuleEngine::new(
            config.confirm_policy,
            config.default_language.clone(),
        )),
        delegated: Arc::new(DelegatedEngine::new(gateway.clone(), config.confirm_policy)),
    };
    let backend = Backend {
        persistence: PersistenceAdapter::new(Arc::new(store)),
        documents: Arc::new(documents),
        renderer: Arc::new(TextRenderer),
        gateway,
        config: Arc::new(config),
    };
    Ok((backend, engines))
}

async fn serve(bind: SocketAddr, core: CoreArgs) -> Result<()> {
    let (backend, engines) = build(core.config()).await?;
    info!("Data directory {:?}, engine {:?}", backend.config.data_dir, backend.config.engine);
    let service = Arc::new(IntakeService::new(backend, engines));
    server::serve(service, bind).await
}

fn new_conversation(backend: &Backend, engines: &Engines) -> Conversation {
    let config = &backend.config;
    let session = ConversationSession::new(config.engine, config.default_language.clone());
    Conversation::new(session, engines.get(config.engine), backend.clone())
}

async fn chat(core: CoreArgs) -> Result<()> {
    let (backend, engines) = build(core.config()).await?;
    let conversation = new_conversation(&backend, &engines);

    let (control_tx, control_rx) = mpsc::channel(1);
    let session = VoiceSession::new(
        conversation,
        ConsoleCapture::default(),
        ConsolePlayback,
        backend.config.debounce_window,
        backend.config.playback_timeout,
        control_rx,
    );

    let mut run = tokio::spawn(session.run());
    let summary = tokio::select! {
        joined = &mut run => joined.context("Voice session task failed")??,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping session");
            control_tx.send(intake_agent::runtime::VoiceControl::Stop).await.ok();
            run.await.context("Voice session task failed")??
        }
    };

    info!(
        "Session {} finished after {} turns ({:?}, stage {})",
        summary.session_id, summary.turns, summary.reason, summary.stage
    );
    Ok(())
}

async fn replay_recording(input: PathBuf, core: CoreArgs) -> Result<()> {
    let raw = tokio::fs::read_to_string(&input)
        .await
        .with_context(|| format!("Failed to read {:?}", input))?;
    let events: Vec<RecordedEvent> =
        serde_json::from_str(&raw).context("Failed to parse recorded events")?;
    info!("Loaded {} capture events from {:?}", events.len(), input);

    let (backend, engines) = build(core.config()).await?;
    let mut conversation = new_conversation(&backend, &engines);
    let opening = conversation.start().await;
    println!("[start] assistant> {}", opening.reply_text);

    let steps = replay(&mut conversation, &events, backend.config.debounce_window).await;
    for step in &steps {
        println!("[{:>6}ms] patient> {}", step.at_ms, step.utterance);
        match &step.outcome {
            Ok(turn) => println!("          assistant> {}", turn.reply_text),
            Err(e) => println!("          error> {}", e),
        }
    }

    let session = conversation.session();
    println!();
    println!("Session {} ended in stage {}", session.session_id, session.stage);
    if let Some(document) = conversation.document() {
        println!("Report document: {}", document.url);
    }
    Ok(())
}

async fn history(data_dir: PathBuf) -> Result<()> {
    let store = FileSessionStore::new(data_dir.join("sessions"))
        .await
        .context("Failed to open session store")?;
    let persistence = PersistenceAdapter::new(Arc::new(store));
    let summaries = persistence.summaries().await.context("Failed to list sessions")?;

    println!("Sessions");
    println!("========");
    if summaries.is_empty() {
        println!("(none)");
    }
    for summary in &summaries {
        println!(
            "{}  {}  {:<12}  {:<20}  report={}  {}",
            summary.updated_at.format("%Y-%m-%d %H:%M"),
            summary.session_id,
            summary.stage.as_str(),
            summary.chief_complaint.as_deref().unwrap_or("-"),
            if summary.has_report { "yes" } else { "no" },
            summary.excerpt.as_deref().unwrap_or(""),
        );
    }
    Ok(())
}

async fn show(session: String, data_dir: PathBuf) -> Result<()> {
    let store = FileSessionStore::new(data_dir.join("sessions"))
        .await
        .context("Failed to open session store")?;
    let persistence = PersistenceAdapter::new(Arc::new(store));
    let record = persistence
        .load(&session)
        .await
        .with_context(|| format!("Failed to load session {}", session))?;

    let report = record
        .report
        .as_ref()
        .with_context(|| format!("Session {} has no report yet", session))?;
    print!("{}", TextRenderer.format(report, &record.session_id));
    if let Some(document) = &record.document {
        println!();
        println!("Document: {}", document.url);
    }
    Ok(())
}
