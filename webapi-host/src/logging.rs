use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use webapi_core::hosting::HostEnvironment;

const DEFAULT_FILTER: &str = "webapi_host=info,webapi_core=info,tower_http=info";

/// Human-readable output in development, JSON lines elsewhere. `RUST_LOG`
/// overrides the default filter.
pub fn setup_logging(environment: &HostEnvironment) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if environment.is_development() {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    }

    info!("Logging initialized for {} environment", environment.name);
    Ok(())
}
