use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use serde_json::json;
use terra_core::api::{ApiClient, build_http_client};
use terra_core::history::{HistoryEvent, HistorySink, HistorySync};
use terra_core::session::SessionManager;
use terra_core::store::SqliteStore;

#[derive(Debug, Parser)]
#[command(name = "terra")]
#[command(about = "Terra image generation backend CLI for testing and scripting")]
struct Cli {
    /// State directory (the credential database persists here between runs)
    #[arg(long, default_value = ".terra-cli")]
    state_dir: PathBuf,

    /// Backend base URL
    #[arg(long, env = "TERRA_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 15)]
    timeout_secs: u64,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store a token pair obtained from the login flow
    Login {
        #[arg(long)]
        access_token: String,

        #[arg(long)]
        refresh_token: String,
    },

    /// Forget the stored credential
    Logout,

    /// Show whether a credential is stored
    Status,

    /// Exchange the refresh token for a new access token
    Refresh,

    /// List generation models
    Models,

    /// Start a generation batch
    Generate {
        #[arg(long)]
        prompt: String,

        /// Model id (see `models`)
        #[arg(long)]
        model: String,

        /// Images to generate (1-3)
        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Show generation history (pending first)
    History {
        /// Only show one generation batch
        #[arg(long)]
        request_id: Option<String>,

        /// Keep polling and print every change until interrupted
        #[arg(long)]
        watch: bool,

        /// Poll interval for --watch
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.state_dir)
        .with_context(|| format!("create state dir {}", cli.state_dir.display()))?;

    let api = open(&cli)?;
    match &cli.cmd {
        Command::Login {
            access_token,
            refresh_token,
        } => cmd_login(&api, access_token, refresh_token),
        Command::Logout => cmd_logout(&api),
        Command::Status => cmd_status(&api),
        Command::Refresh => cmd_refresh(&api).await,
        Command::Models => cmd_models(&api).await,
        Command::Generate {
            prompt,
            model,
            count,
        } => cmd_generate(&api, prompt, model, *count).await,
        Command::History {
            request_id,
            watch,
            interval_secs,
        } => {
            if *watch {
                cmd_history_watch(&api, request_id.clone(), *interval_secs).await
            } else {
                cmd_history(&api, request_id.as_deref()).await
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn open(cli: &Cli) -> anyhow::Result<ApiClient> {
    let store = SqliteStore::open(&cli.state_dir)
        .with_context(|| format!("open credential store in {}", cli.state_dir.display()))?;
    let http = build_http_client(Duration::from_secs(cli.timeout_secs.max(1)))
        .context("build http client")?;
    let session = Arc::new(SessionManager::new(Arc::new(store), http.clone(), &cli.server));
    session.restore_session();
    Ok(ApiClient::new(http, &cli.server, session))
}

fn require_login(api: &ApiClient) -> anyhow::Result<()> {
    if api.session().access_token().is_none() {
        return Err(anyhow!("not logged in; run `terra login` first"));
    }
    Ok(())
}

fn print(v: serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(&v).expect("json encode"));
}

// ── Commands ────────────────────────────────────────────────────────────────

fn cmd_login(api: &ApiClient, access_token: &str, refresh_token: &str) -> anyhow::Result<()> {
    let (access_token, refresh_token) = (access_token.trim(), refresh_token.trim());
    if access_token.is_empty() || refresh_token.is_empty() {
        return Err(anyhow!("both --access-token and --refresh-token are required"));
    }
    api.session()
        .complete_login(access_token, refresh_token)
        .context("persist credential")?;
    print(json!({ "logged_in": true }));
    Ok(())
}

fn cmd_logout(api: &ApiClient) -> anyhow::Result<()> {
    api.session().logout();
    print(json!({ "logged_in": false }));
    Ok(())
}

fn cmd_status(api: &ApiClient) -> anyhow::Result<()> {
    print(json!({
        "logged_in": api.session().access_token().is_some(),
    }));
    Ok(())
}

async fn cmd_refresh(api: &ApiClient) -> anyhow::Result<()> {
    require_login(api)?;
    if !api.session().refresh().await {
        return Err(anyhow!("token refresh failed"));
    }
    print(json!({ "refreshed": true }));
    Ok(())
}

async fn cmd_models(api: &ApiClient) -> anyhow::Result<()> {
    let models = api.fetch_models().await.context("fetch models")?;
    let out: Vec<serde_json::Value> = models
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "name": m.name,
                "description": m.description,
                "image_url": m.image_url,
            })
        })
        .collect();
    print(json!({ "models": out }));
    Ok(())
}

async fn cmd_generate(api: &ApiClient, prompt: &str, model: &str, count: u32) -> anyhow::Result<()> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(anyhow!("--prompt must not be empty"));
    }
    let request_id = api
        .submit_generation(prompt, model, count.clamp(1, 3))
        .await
        .context("submit generation")?;
    print(json!({ "request_id": request_id }));
    Ok(())
}

async fn cmd_history(api: &ApiClient, request_id: Option<&str>) -> anyhow::Result<()> {
    let items = api.fetch_history(request_id).await.context("fetch history")?;
    let snapshot = terra_core::history::HistorySnapshot::from_server(items);
    print(json!({ "images": snapshot.items() }));
    Ok(())
}

async fn cmd_history_watch(
    api: &ApiClient,
    request_id: Option<String>,
    interval_secs: u64,
) -> anyhow::Result<()> {
    require_login(api)?;

    let (expired_tx, mut expired_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let sink: HistorySink = Arc::new(move |event| match event {
        HistoryEvent::Changed { snapshot, .. } => {
            let line = json!({
                "type": "history",
                "images": snapshot.items(),
            });
            println!("{}", serde_json::to_string(&line).expect("json encode"));
        }
        HistoryEvent::SessionExpired { .. } => {
            let _ = expired_tx.send(());
        }
    });

    let sync = HistorySync::new(
        api.clone(),
        Duration::from_secs(interval_secs.max(1)),
        sink,
    );
    tracing::warn!(filter = ?request_id, interval_secs, "watching history (ctrl-c to stop)");
    sync.start(&tokio::runtime::Handle::current(), request_id);

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => Ok(()),
        _ = expired_rx.recv() => Err(anyhow!("session expired; log in again")),
    };
    sync.stop();
    tracing::info!("history watch stopped");
    result
}
