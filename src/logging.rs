//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter`, a
//! [`SamplingLayer`] and a JSON or pretty formatter. Everything is driven by
//! [`LogConfig`], usually read from the environment:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `BRRTF_LOG_LEVEL` | `trace`..`error` (`RUST_LOG` wins when set) | `info` |
//! | `BRRTF_LOG_FORMAT` | `json` or `pretty` | `json` |
//! | `BRRTF_LOG_SAMPLING_MODE` | `all`, `error-only`, `sampled` | `all` |
//! | `BRRTF_LOG_SAMPLING_RATE` | fraction kept in `sampled` mode | `0.1` |
//! | `BRRTF_LOG_ASYNC` | write through a background thread | `false` |
//! | `BRRTF_LOG_TARGET_FILTER` | extra comma separated directives | none |
//! | `BRRTF_LOG_INCLUDE_LOCATION` | add file and line | `false` |

use anyhow::{Context, Result};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{Event, Level, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Anything other than `pretty` means JSON.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

/// Which events reach the formatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    All,
    /// WARN and ERROR only.
    ErrorOnly,
    /// Every WARN and ERROR, plus a fraction of everything else.
    Sampled,
}

impl SamplingMode {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "error-only" | "error_only" => SamplingMode::ErrorOnly,
            "sampled" => SamplingMode::Sampled,
            _ => SamplingMode::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_level: String,
    pub format: LogFormat,
    pub sampling_mode: SamplingMode,
    /// Fraction (0.0-1.0) kept in [`SamplingMode::Sampled`].
    pub sampling_rate: f64,
    pub async_logging: bool,
    /// Extra filter directives, comma separated.
    pub target_filter: Option<String>,
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            format: LogFormat::Json,
            sampling_mode: SamplingMode::All,
            sampling_rate: 0.1,
            async_logging: false,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: env::var("BRRTF_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: env::var("BRRTF_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.format),
            sampling_mode: env::var("BRRTF_LOG_SAMPLING_MODE")
                .map(|s| SamplingMode::parse(&s))
                .unwrap_or(defaults.sampling_mode),
            sampling_rate: env::var("BRRTF_LOG_SAMPLING_RATE")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.sampling_rate),
            async_logging: env::var("BRRTF_LOG_ASYNC")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.async_logging),
            target_filter: env::var("BRRTF_LOG_TARGET_FILTER").ok(),
            include_location: env::var("BRRTF_LOG_INCLUDE_LOCATION")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.include_location),
        }
    }

    /// Verbose, human readable, synchronous.
    #[must_use]
    pub fn default_dev() -> Self {
        Self {
            log_level: "debug".to_owned(),
            format: LogFormat::Pretty,
            sampling_mode: SamplingMode::All,
            sampling_rate: 1.0,
            async_logging: false,
            target_filter: None,
            include_location: true,
        }
    }

    /// JSON, sampled, written off the request path.
    #[must_use]
    pub fn default_prod() -> Self {
        Self {
            log_level: "info".to_owned(),
            format: LogFormat::Json,
            sampling_mode: SamplingMode::Sampled,
            sampling_rate: 0.1,
            async_logging: true,
            target_filter: None,
            include_location: false,
        }
    }

    fn level(&self) -> Level {
        match self.log_level.trim().to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Drops events according to a [`SamplingMode`].
pub struct SamplingLayer {
    mode: SamplingMode,
    interval: u64,
    counter: AtomicU64,
}

impl SamplingLayer {
    #[must_use]
    pub fn new(mode: SamplingMode, sampling_rate: f64) -> Self {
        let rate = sampling_rate.clamp(0.0, 1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let interval = if rate > 0.0 { (1.0 / rate).round() as u64 } else { 0 };
        Self {
            mode,
            interval,
            counter: AtomicU64::new(0),
        }
    }

    fn should_sample(&self, metadata: &Metadata<'_>) -> bool {
        let important = matches!(*metadata.level(), Level::WARN | Level::ERROR);
        match self.mode {
            SamplingMode::All => true,
            SamplingMode::ErrorOnly => important,
            SamplingMode::Sampled => {
                if important || metadata.is_span() {
                    return true;
                }
                let count = self.counter.fetch_add(1, Ordering::Relaxed);
                self.interval > 0 && count % self.interval == 0
            }
        }
    }
}

impl<S> Layer<S> for SamplingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn enabled(&self, metadata: &Metadata<'_>, _ctx: LayerContext<'_, S>) -> bool {
        self.should_sample(metadata)
    }

    fn on_event(&self, _event: &Event<'_>, _ctx: LayerContext<'_, S>) {}
}

/// Install the global subscriber.
///
/// With async logging the returned guard owns the background writer; keep it
/// alive until shutdown or buffered lines are lost.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging_with_config(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level().as_str()));
    if let Some(target_filter) = &config.target_filter {
        for directive in target_filter.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            match directive.parse() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(e) => eprintln!("Ignoring invalid log filter directive {directive}: {e}"),
            }
        }
    }

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(SamplingLayer::new(config.sampling_mode, config.sampling_rate));

    let (writer, guard) = if config.async_logging {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer), Some(guard))
    } else {
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout), None)
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    registry
        .with(fmt_layer)
        .try_init()
        .context("failed to initialize logging")?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::callsite::{Callsite, Identifier};
    use tracing::field::FieldSet;
    use tracing::metadata::Kind;
    use tracing::subscriber::Interest;

    struct TestCallsite;

    impl Callsite for TestCallsite {
        fn set_interest(&self, _interest: Interest) {}

        fn metadata(&self) -> &Metadata<'_> {
            unimplemented!()
        }
    }

    static CALLSITE: TestCallsite = TestCallsite;

    fn metadata(level: Level) -> Metadata<'static> {
        Metadata::new(
            "event",
            "brrtframe::test",
            level,
            None,
            None,
            None,
            FieldSet::new(&[], Identifier(&CALLSITE)),
            Kind::EVENT,
        )
    }

    #[test]
    fn test_parsers_fall_back() {
        assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
        assert_eq!(SamplingMode::parse("error_only"), SamplingMode::ErrorOnly);
        assert_eq!(SamplingMode::parse("sampled"), SamplingMode::Sampled);
        assert_eq!(SamplingMode::parse("???"), SamplingMode::All);
    }

    #[test]
    fn test_presets() {
        let dev = LogConfig::default_dev();
        assert_eq!(dev.format, LogFormat::Pretty);
        assert_eq!(dev.level(), Level::DEBUG);
        let prod = LogConfig::default_prod();
        assert!(prod.async_logging);
        assert_eq!(prod.sampling_mode, SamplingMode::Sampled);
        assert_eq!(LogConfig::default().level(), Level::INFO);
    }

    #[test]
    fn test_error_only_keeps_warnings() {
        let layer = SamplingLayer::new(SamplingMode::ErrorOnly, 1.0);
        assert!(layer.should_sample(&metadata(Level::WARN)));
        assert!(layer.should_sample(&metadata(Level::ERROR)));
        assert!(!layer.should_sample(&metadata(Level::INFO)));
    }

    #[test]
    fn test_sampled_mode_respects_rate() {
        let layer = SamplingLayer::new(SamplingMode::Sampled, 0.25);
        let kept = (0..100)
            .filter(|_| layer.should_sample(&metadata(Level::INFO)))
            .count();
        assert_eq!(kept, 25);
        assert!(layer.should_sample(&metadata(Level::ERROR)));

        let none = SamplingLayer::new(SamplingMode::Sampled, 0.0);
        assert!(!none.should_sample(&metadata(Level::DEBUG)));
        assert!(none.should_sample(&metadata(Level::WARN)));
    }
}
