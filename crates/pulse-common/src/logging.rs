use tracing_subscriber::EnvFilter;

use crate::PulseConfig;

// stderr, so stdout stays free for the run report.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn init_from_config(config: &PulseConfig) {
    init(&config.log_level);
}
