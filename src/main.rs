use std::sync::Arc;

use tabulate::interface::ReportInterface;
use tabulate::server;
use tabulate::settings::Settings;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tabulate=info")))
        .init();
    if let Err(e) = run(std::env::args().nth(1)).await {
        error!(error = %e, "tabulate stopped");
        std::process::exit(1);
    }
}

async fn run(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(config_path.as_deref())?;
    let interface = Arc::new(ReportInterface::open(&settings)?);
    let listener = tokio::net::TcpListener::bind(&settings.listen).await?;
    info!(
        listen = %settings.listen,
        timeout_secs = settings.script_timeout_secs,
        "serving reports"
    );
    axum::serve(listener, server::router(interface))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
