//! Logging, metrics and error reporting setup.

use std::env;
use std::io::IsTerminal;

use secrecy::ExposeSecret;
use sentry::integrations::tracing as sentry_tracing;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{Config, LogFormat};

/// Prefix of all metric names emitted by the server.
const METRICS_PREFIX: &str = "uploader.";

/// Initializes the Datadog metrics sink if an API key is configured.
///
/// Without a sink, the metric macros throughout the crates are no-ops. The returned flusher must be
/// flushed before the process exits to submit buffered metrics.
pub fn init_metrics(config: &Config) -> std::io::Result<Option<merni::DatadogFlusher>> {
    let Some(api_key) = config.metrics.datadog_key.as_ref() else {
        return Ok(None);
    };

    let mut builder = merni::datadog(api_key.expose_secret().as_str()).prefix(METRICS_PREFIX);
    for (key, value) in &config.metrics.tags {
        builder = builder.global_tag(key, value);
    }
    builder.try_init().map(Some)
}

/// Initializes Sentry if a DSN is configured.
///
/// The returned guard flushes pending events when dropped and must be kept alive for the lifetime
/// of the process.
pub fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let sentry_config = &config.sentry;
    let dsn = sentry_config.dsn.as_ref()?;

    Some(sentry::init(sentry::ClientOptions {
        dsn: dsn.expose_secret().as_str().parse().ok(),
        environment: sentry_config.environment.clone(),
        server_name: sentry_config.server_name.clone(),
        sample_rate: sentry_config.sample_rate,
        traces_sample_rate: sentry_config.traces_sample_rate,
        debug: sentry_config.debug,
        release: sentry::release_name!(),
        ..Default::default()
    }))
}

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    // Same as the default filter, except it converts warnings into events
    // and drops everything below INFO.
    let sentry_layer = config.sentry.is_enabled().then(|| {
        sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
            Level::ERROR | Level::WARN => sentry_tracing::EventFilter::Event,
            Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
            Level::DEBUG | Level::TRACE => sentry_tracing::EventFilter::Ignore,
        })
    });

    let (level, env_filter) = parse_rust_log(config.logging.level);

    let format = match (config.logging.format, std::io::stderr().is_terminal()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .pretty()
            .boxed(),
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_ansi(false)
            .boxed(),
        (LogFormat::Json, _) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .json()
            .flatten_event(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(sentry_layer)
        .with(env_filter)
        .init();
}

/// Determines the effective log level and per-crate filter.
///
/// A plain level in `RUST_LOG` overrides the configured level. Any other `RUST_LOG` value is used
/// literally as the filter.
pub fn parse_rust_log(configured: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => configured,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        tower_http=TRACE,\
        uploader=TRACE,\
        uploader_server=TRACE,\
        uploader_service=TRACE,\
        ",
    );

    (level, env_filter)
}
