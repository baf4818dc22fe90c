use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voicecall::{create_router, AppState, CallMachine, Config, Translator};

/// Voice-call front end for a conversational dialogue backend
#[derive(Parser, Debug)]
#[command(name = "voicecall", version, about)]
struct Args {
    /// Configuration file (toml, yaml or json)
    #[arg(short, long)]
    config: Option<String>,

    /// Address for the control API
    #[arg(long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Capture source: mic, silence, or a WAV file path
    #[arg(short, long)]
    input: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut cfg = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        cfg.service.http.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }
    if let Some(input) = args.input {
        cfg.audio.input = input;
    }
    cfg.validate()?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Dialogue backend: {}", cfg.dialogue.url);
    info!("Recognition: {:?} at {}", cfg.recognition.transport, cfg.recognition.url);
    info!("Capture: {}, playback: {:?}", cfg.audio.input, cfg.playback.output);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let translator = Translator::new(&cfg.translation);
    let call = CallMachine::spawn_from_config(cfg)?;

    let app = create_router(AppState::new(call, translator));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Control API listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
