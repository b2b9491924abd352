use tracing_subscriber::EnvFilter;

/// Installs the JSON subscriber. Later calls in the same process are no-ops.
pub fn init(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = service_name, "logging initialized");
    }
}
