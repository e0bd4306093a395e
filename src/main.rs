use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc::UnboundedSender;

mod app;
mod attachment;
mod client;
mod config;
mod conversation;
mod handler;
mod markdown;
mod tui;
mod ui;

use app::App;
use client::AgentClient;
use config::Config;
use tui::{AppEvent, EventHandler, Tui};

#[derive(Parser)]
#[command(name = "ragchat")]
#[command(about = "Terminal chat client for a streaming agentic RAG backend")]
struct Cli {
    /// Backend base URL (overrides RAGCHAT_BACKEND_URL and the config file)
    #[arg(long)]
    backend: Option<String>,

    /// Model name forwarded to the backend with each request
    #[arg(short, long)]
    model: Option<String>,

    /// System prompt to seed the conversation with
    #[arg(long)]
    system: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|_| Config::new());

    let backend_url = config.resolve_backend_url(cli.backend.as_deref());
    let model = cli.model.clone().or_else(|| config.default_model.clone());
    if let Some(ref m) = cli.model {
        let _ = Config::save_default_model(m);
    }

    tracing::info!(%backend_url, ?model, "starting");

    let mut app = App::new(AgentClient::new(&backend_url), model, cli.system.clone());

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = EventHandler::new();
    let tx = events.sender();

    let result = run(&mut terminal, &mut app, &mut events, &tx).await;

    tui::restore()?;
    result
}

async fn run(
    terminal: &mut Tui,
    app: &mut App,
    events: &mut EventHandler,
    tx: &UnboundedSender<AppEvent>,
) -> Result<()> {
    loop {
        terminal.draw(|frame| ui::draw(frame, app))?;

        let Some(event) = events.next().await else {
            break;
        };
        handler::handle_event(app, event, tx).await?;

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// File-based tracing so log output never corrupts the TUI. Filter comes from
/// RAGCHAT_LOG (defaults to warn).
fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let Ok(log_path) = Config::log_path() else {
        return;
    };
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(log_file) = std::fs::File::create(&log_path) else {
        return;
    };

    let filter = EnvFilter::try_from_env("RAGCHAT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();
}
