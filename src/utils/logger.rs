//! Tracing subscriber setup
//!
//! `RUST_LOG` replaces the built-in directives entirely.

use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset; kube client chatter stays quiet
/// unless verbose
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "kubevirt_e2e=debug,kube=info"
    } else {
        "kubevirt_e2e=info,kube=warn"
    }
}

/// Filter from `rust_log` when it parses, else from the default directives
pub fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(verbose)))
}

pub fn init_logger(verbose: bool) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, rust_log.as_deref()))
        .with_target(false)
        .compact()
        .init();
}
