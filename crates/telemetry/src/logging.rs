use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable format (default for development)
    #[default]
    Pretty,
    /// Compact text format
    Compact,
    /// JSON format for log aggregation systems
    Json,
}

impl LogFormat {
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }

    /// Parse log format from the `LOG_FORMAT` environment variable
    pub fn from_env() -> Self {
        Self::parse(&env::var("LOG_FORMAT").unwrap_or_default())
    }
}

/// Configuration for structured logging
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    pub service_name: String,
    pub service_version: String,
    /// Deployment environment (dev/staging/production)
    pub environment: String,
    /// Emit span open/close events
    pub enable_span_events: bool,
    /// Directory for a daily rolling JSON log file, in addition to stdout
    pub log_dir: Option<String>,
}

impl LogConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        let log_to_file = env::var("LOG_TO_FILE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        Self {
            format: LogFormat::from_env(),
            service_name: service_name.into(),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            enable_span_events: env::var("LOG_SPAN_EVENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            log_dir: if log_to_file {
                Some(env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()))
            } else {
                None
            },
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_span_events(mut self, enable: bool) -> Self {
        self.enable_span_events = enable;
        self
    }

    pub fn with_file_logging(mut self, log_dir: impl Into<String>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.enable_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Build the filter from an explicit `RUST_LOG` value.
///
/// Quiet defaults for noisy dependencies only apply when no usable value is given.
fn filter_from(rust_log: Option<&str>) -> EnvFilter {
    if let Some(filter) = rust_log
        .filter(|spec| !spec.trim().is_empty())
        .and_then(|spec| EnvFilter::try_new(spec).ok())
    {
        return filter;
    }

    let mut filter = EnvFilter::new("info");
    for directive in ["hyper=warn", "tokio=warn", "sqlx=warn", "ort=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn env_filter() -> EnvFilter {
    filter_from(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())
}

/// Initialize structured logging with the given configuration.
///
/// The returned guard flushes the file appender when dropped; keep it alive
/// for the lifetime of the process. Returns `None` when file logging is off.
pub fn init_structured_logging(config: LogConfig) -> Option<WorkerGuard> {
    let span_events = config.span_events();

    let stdout_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_target(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_target(true)
            .with_line_number(true)
            .boxed(),
    };

    let (file_layer, guard) = match config.log_dir.as_deref() {
        Some(log_dir) => {
            let file_name = format!("{}.log", config.service_name);
            let appender = tracing_appender::rolling::daily(log_dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_span_events(config.span_events())
                .with_writer(non_blocking)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let result = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = result {
        // A subscriber is already installed (e.g. by a test harness)
        tracing::debug!(error = %e, "logging already initialized");
        return guard;
    }

    tracing::info!(
        service.name = %config.service_name,
        service.version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        file_logging = config.log_dir.is_some(),
        "structured logging initialized"
    );

    guard
}

/// Initialize logging from the environment for the named service
pub fn init_with_service(service_name: impl Into<String>) -> Option<WorkerGuard> {
    init_structured_logging(LogConfig::new(service_name))
}
