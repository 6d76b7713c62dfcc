//! Logging setup
//!
//! Terraform captures provider stderr, so logs go there. The filter comes
//! from `TF_LOG_PROVIDER_LXD`, then `RUST_LOG`, then defaults to `info`.

use tracing_subscriber::EnvFilter;

/// Variable Terraform users set to control this provider's log level
pub const LOG_ENV: &str = "TF_LOG_PROVIDER_LXD";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber unless one is already installed
pub fn try_init_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
