//! Provisioner control plane.
//!
//! This is the entry point for the `provisioner-control` binary. It loads
//! the run configuration, starts the admin HTTP surface and runs the
//! service until it is stopped or interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use provisioner_control::{
    router, shutdown, IdleConsumerFactory, RunConfiguration, Service, ShutdownTrigger,
};
use provisioner_platform::HttpPlatform;

/// Provisioner control plane.
#[derive(Parser, Debug)]
#[command(name = "provisioner-control")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML run configuration.
    #[arg(long, env = "PROVISIONER_CONFIG")]
    config: PathBuf,

    /// Address the admin HTTP surface listens on.
    #[arg(long, env = "ADMIN_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    admin_addr: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,provisioner=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(args).await {
        Ok(()) => {
            tracing::info!("Provisioner exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Provisioner failed");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(config = %args.config.display(), "Starting provisioner control plane");

    let config = RunConfiguration::from_file(&args.config)?;
    tracing::info!(
        platform = %config.platform.host,
        api_version = %config.platform.api_version,
        broker = %config.broker.host,
        listeners = config.service.listeners,
        "Configuration loaded"
    );

    let platform = Arc::new(HttpPlatform::new(config.platform.clone())?);
    let service = Arc::new(
        Service::new(config, platform, Arc::new(IdleConsumerFactory))
            .with_config_path(args.config),
    );

    let (trigger, shutdown) = shutdown::channel();
    let trigger = Arc::new(trigger);
    tokio::spawn(interrupt_on_signal(Arc::clone(&trigger)));

    // Start admin HTTP server
    let listener = tokio::net::TcpListener::bind(&args.admin_addr).await?;
    tracing::info!(listen_addr = %args.admin_addr, "Starting admin HTTP server");
    let app = router(Arc::clone(&service));
    let admin = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Admin HTTP server failed");
            trigger.trigger();
        }
    });

    let result = service.run(shutdown).await;
    admin.abort();
    result?;
    Ok(())
}

async fn interrupt_on_signal(trigger: Arc<ShutdownTrigger>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::warn!("Interrupt received, shutting down");
    trigger.trigger();
}
