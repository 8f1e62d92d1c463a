use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use webapi_core::hosting::HostEnvironment;
use webapi_host::config::{Settings, ENVIRONMENT_VAR};
use webapi_host::logging::setup_logging;
use webapi_host::startup::Startup;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let environment = HostEnvironment::from_env_var(ENVIRONMENT_VAR);
    setup_logging(&environment)?;

    if let Err(e) = run(environment).await {
        error!("Host terminated: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(environment: HostEnvironment) -> anyhow::Result<()> {
    let settings = Settings::load(&environment)?;
    let server = settings.server()?;
    let startup = Startup::new(settings, environment)?;

    let services = startup.configure_services().await?;
    let app = startup.configure(&services)?;

    services.hosted_services.start_all().await?;

    let address = server.listen_address();
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            services.hosted_services.stop_all().await;
            return Err(e).with_context(|| format!("Failed to bind {}", address));
        }
    };
    info!("Listening on {}", address);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    services.hosted_services.stop_all().await;
    served.context("Server error")?;
    info!("Host stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
