//! Subscriber setup. Built once in `main` from the parsed [`Cli`].

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::cli::{Cli, LogFormat};

pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
const DEFAULT_LEVEL: &str = "warn";

/// Filter directive for the given `-v` count and `LOG_LEVEL` value.
/// Flags win over the environment; without either only warnings are shown.
pub fn level_directive(verbose: u8, env_level: Option<&str>) -> String {
    match verbose {
        0 => env_level
            .map(str::trim)
            .filter(|level| !level.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(|| DEFAULT_LEVEL.to_owned()),
        1 => "info".to_owned(),
        _ => "debug".to_owned(),
    }
}

pub fn build_filter(verbose: u8, env_level: Option<&str>) -> EnvFilter {
    let directive = level_directive(verbose, env_level);
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

pub fn init(cli: &Cli) {
    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
    let filter = build_filter(cli.verbose, env_level.as_deref());

    let fmt_layer = match cli.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .init();
}
