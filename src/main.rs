use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transcript_agent::{create_router, AppState, Collaborators, Config, TranscriptService};

#[derive(Debug, Parser)]
#[command(name = "transcript-agent", about = "Transcript question-answering service")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/transcript-agent")]
    config: String,

    /// Override the bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        cfg.service.http.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Conversations: {}", cfg.storage.conversations_dir.display());
    info!("Transcript cache: {}", cfg.storage.transcripts_dir.display());

    let collaborators = Collaborators::from_config(&cfg)?;
    let service = TranscriptService::new(&cfg, collaborators).await?;
    let state = AppState::new(service).with_upload_limit_mb(cfg.service.http.max_upload_mb);
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
