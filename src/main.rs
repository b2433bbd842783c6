use anyhow::Result;
use clap::Parser;
use globecast_mesh::media::LoopbackRegistry;
use globecast_mesh::session::{Orchestrator, SessionConfig, SessionContext};
use globecast_mesh::signaling::NatsTransport;
use globecast_mesh::speech::NatsSpeechClient;
use globecast_mesh::{create_router, AppState, Config};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "globecast-mesh", about = "Mesh meeting client core")]
struct Args {
    /// Config file path (without extension)
    #[arg(short, long, default_value = "config/globecast-mesh")]
    config: String,

    /// Override the NATS URL from the config file
    #[arg(long)]
    nats_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config).unwrap_or_else(|e| {
        info!("No config loaded ({}), using defaults", e);
        Config::default()
    });
    if let Some(url) = args.nats_url {
        cfg.signaling.nats_url = url;
    }

    info!("GlobeCast Mesh v0.1.0");
    info!("Loaded config: {}", cfg.service.name);
    info!("NATS: {}", cfg.signaling.nats_url);

    let session_config = SessionConfig::from_config(&cfg);

    let signaling = NatsTransport::connect(
        &cfg.signaling.nats_url,
        Duration::from_secs(cfg.signaling.presence_grace_secs),
    )
    .await?;
    let speech =
        NatsSpeechClient::connect(&cfg.signaling.nats_url, &session_config.self_id).await?;

    // Loopback media transport: real deployments swap in a WebRTC-backed
    // implementation of MediaTransport here.
    let media = LoopbackRegistry::new().transport_for(&session_config.self_id);
    let audio = globecast_mesh::audio::SyntheticAudioFactory::silence();

    let context = SessionContext::new(
        Arc::new(signaling),
        Arc::new(media),
        Arc::new(speech),
        Arc::new(audio),
    );
    let orchestrator = Orchestrator::new(session_config, context);

    let state = AppState::new(orchestrator);
    let router = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
