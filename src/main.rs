#![cfg_attr(not(test), deny(clippy::panic))]

use std::net::SocketAddr;

use clap::Parser;
use quiz_room_server::server::QuizServer;
use quiz_room_server::{config, gateway, logging};

/// Quiz Room -- realtime WebSocket server for live multiplayer quizzes
#[derive(Parser, Debug)]
#[command(name = "quiz-room-server")]
#[command(about = "Realtime WebSocket quiz room server")]
#[command(version)]
struct Cli {
    /// Check the configuration and exit without starting the server.
    /// Handy in CI pipelines and pre-deploy checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Dump the effective configuration as JSON and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // config.json if present, environment overrides on top, defaults
    // otherwise.
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let validation_result = config::validate(&cfg);
    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Storage backend: {}", cfg.database.backend_name());
                println!("  Ping interval: {}s", cfg.server.ping_interval_secs);
                println!("  Read idle timeout: {}s", cfg.server.read_idle_timeout_secs);
                println!("  Send queue capacity: {}", cfg.server.send_queue_capacity);
                println!(
                    "  Ended room grace: {}s",
                    cfg.server.ended_room_grace_secs
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }
    validation_result.map_err(|e| anyhow::anyhow!("invalid configuration:\n{e}"))?;

    logging::init_with_config(&cfg.logging);

    let port = cfg.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, backend = cfg.database.backend_name(), "Starting quiz room server");

    let cors_origins = cfg.security.cors_origins.clone();
    let server = QuizServer::new(cfg).await?;

    let app = gateway::create_router(&cors_origins).with_state(server);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        cors_origins = %cors_origins,
        "Server started - WebSocket: /ws, Health: /health, Metrics: /metrics"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
