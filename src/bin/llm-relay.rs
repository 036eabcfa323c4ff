use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use llm_relay::gateway::telemetry;
use llm_relay::{Env, Gateway, GatewayConfig, GatewayHttpState};

/// Chat/completions relay with document ingestion, caching and streaming.
#[derive(Debug, Parser)]
#[command(name = "llm-relay", version)]
struct Args {
    /// JSON or TOML config file; defaults apply when omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "HOST:PORT", default_value = "127.0.0.1:8080")]
    listen: String,

    /// `.env` file consulted before the process environment.
    #[arg(long, value_name = "PATH")]
    dotenv: Option<PathBuf>,

    #[arg(long)]
    json_logs: bool,

    /// Export spans over OTLP (requires the `otel` feature).
    #[arg(long)]
    otel: bool,

    #[arg(long, value_name = "URL", requires = "otel")]
    otel_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    #[cfg(feature = "otel")]
    let _otel_guard = if args.otel {
        Some(telemetry::init_tracing_with_otel(
            "llm-relay",
            args.otel_endpoint.as_deref(),
            args.json_logs,
        )?)
    } else {
        telemetry::init_tracing(args.json_logs)?;
        None
    };
    #[cfg(not(feature = "otel"))]
    {
        if args.otel || args.otel_endpoint.is_some() {
            return Err("--otel requires building with the `otel` feature".into());
        }
        telemetry::init_tracing(args.json_logs)?;
    }

    let config = match args.config.as_deref() {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    let env = match args.dotenv.as_deref() {
        Some(path) => Env::from_dotenv_file(path)?,
        None => Env::from_process(),
    };

    let gateway = Gateway::from_env(config, &env)?;
    tracing::info!(
        listen = %args.listen,
        upstream = %gateway.config().upstream.base_url,
        uploads = %gateway.config().uploads.dir.display(),
        "starting llm-relay"
    );

    let gateway = Arc::new(gateway);
    let app = llm_relay::gateway::router(GatewayHttpState::from_shared(gateway.clone()));
    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM, then ends in-flight streaming relays so the server can drain.
async fn shutdown_signal(gateway: Arc<Gateway>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested; closing streaming relays");
    gateway.shutdown();
}
