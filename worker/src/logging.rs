use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Installs the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool, json: bool) -> anyhow::Result<()> {
    let default_filter = if verbose {
        "convertbuddy=debug,convertbuddy_worker=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Library code logs through the `log` facade
    tracing_log::LogTracer::init()?;

    let registry = Registry::default().with(filter);
    if json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))?;
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer()))?;
    }

    Ok(())
}
