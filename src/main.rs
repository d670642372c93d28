use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use broker::models::{Provider, ProviderMetadata};
use broker::store::PgTokenRepository;
use broker::{api, config, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::AuthUrl { location }) => {
            let state = AppState::from_config(cfg).await?;
            let metadata = ProviderMetadata {
                location,
                ..Default::default()
            };
            let url = state.tokens.authorization_url(Provider::Zoho, &metadata)?;
            println!("{}", url);
            Ok(())
        }
        Some(cli::Commands::Token { command }) => {
            let state = AppState::from_config(cfg).await?;
            handle_token_command(command, &state).await
        }
        Some(cli::Commands::Migrate) => {
            let url = cfg
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set to run migrations")?;
            let repo = PgTokenRepository::connect(url).await?;
            repo.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Console logging (JSON when BROKER_LOG_FORMAT=json) plus an OTLP exporter
/// when OTEL_EXPORTER_OTLP_ENDPOINT is set.
fn init_tracing() {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "oauth-broker"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("failed to install OpenTelemetry tracer: {}", e);
                None
            }
        }
    } else {
        None
    };

    let json = std::env::var("BROKER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "broker=debug,tower_http=info".into()),
        ))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(telemetry_layer)
        .init();
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(cfg).await?);

    match state.tokens.status(Provider::Zoho).await {
        Ok(status) => tracing::info!(
            expires_at = %status.expires_at,
            region = status.region.as_deref().unwrap_or("default"),
            "active Zoho token found"
        ),
        Err(_) => tracing::warn!("no active Zoho token; visit /api/zoho/initiate-auth to authorize"),
    }

    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("oauth broker listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
    opentelemetry::global::shutdown_tracer_provider();
}

async fn handle_token_command(cmd: cli::TokenCommands, state: &AppState) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Status => {
            let status = state.tokens.status(Provider::Zoho).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        cli::TokenCommands::Refresh => {
            let record = state.tokens.force_refresh(Provider::Zoho).await?;
            println!("Token refreshed.");
            println!("  Expires: {}", record.expires_at);
        }
        cli::TokenCommands::Show => {
            let token = state.tokens.get_valid_token(Provider::Zoho).await?;
            println!("{}", token);
        }
        cli::TokenCommands::Deactivate => {
            state.tokens.deactivate(Provider::Zoho).await?;
            println!("Token deactivated.");
        }
    }
    Ok(())
}
