//! Tracing setup.
//!
//! Configured from the environment:
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `LOG_FORMAT` | `json`, `pretty` | `json` in production, else `pretty` |
//! | `LOG_OUTPUT` | `stdout`, `stderr`, `file` | `stderr` |
//! | `LOG_DIR` | directory for `file` output | `logs` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP gRPC endpoint | unset (no export) |
//! | `ENVIRONMENT` / `ENV` | deployment name | `development` |
//!
//! `RUST_LOG` overrides the default level filter.

use anyhow::{Context, Result};
use opentelemetry::{KeyValue, trace::TraceError};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::Tracer};
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
const LOG_FILE_NAME: &str = "sales-analytics.log";
const OTLP_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reports slower than this are logged at warn level.
pub const SLOW_REPORT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rolling file in this directory
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    pub environment: String,
    pub otlp_endpoint: Option<String>,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("ENV"))
            .unwrap_or_else(|| "development".to_string());

        let format = match lookup("LOG_FORMAT").map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            Some("pretty") => LogFormat::Pretty,
            _ if is_production(&environment) => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let output = match lookup("LOG_OUTPUT").map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("stdout") => LogOutput::Stdout,
            Some("file") => LogOutput::File(
                lookup("LOG_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("logs")),
            ),
            _ => LogOutput::Stderr,
        };

        let otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty());

        Self {
            format,
            output,
            environment,
            otlp_endpoint,
        }
    }

    fn default_filter(&self) -> EnvFilter {
        let level = if is_production(&self.environment) {
            "info"
        } else {
            "debug"
        };
        EnvFilter::new(format!(
            "{level},hyper=info,tower=info,tower_http=info,sqlx=warn"
        ))
    }
}

fn is_production(environment: &str) -> bool {
    matches!(environment, "production" | "prod")
}

/// Installs the global subscriber. The returned guard flushes buffered log
/// lines when dropped and must live until the process exits.
pub fn init_logging(config: LoggingConfig) -> Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.default_filter());

    let (writer, guard) = match &config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
        LogOutput::File(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, LOG_FILE_NAME))
        }
    };

    let fmt_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_thread_ids(false)
            .boxed(),
    };

    // The subscriber is not installed yet, so export failures go to stderr.
    let otel_layer = config.otlp_endpoint.as_deref().and_then(|endpoint| {
        match otlp_tracer(endpoint, &config.environment) {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(error) => {
                eprintln!("warning: OTLP export to {endpoint} disabled: {error}");
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::info!(
        service = SERVICE_NAME,
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        format = ?config.format,
        otlp = config.otlp_endpoint.is_some(),
        "logging initialized"
    );

    Ok(guard)
}

fn otlp_tracer(endpoint: &str, environment: &str) -> Result<Tracer, TraceError> {
    let resource = Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            SERVICE_NAME,
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
        KeyValue::new("deployment.environment", environment.to_string()),
    ]);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(OTLP_EXPORT_TIMEOUT),
        )
        .with_trace_config(opentelemetry_sdk::trace::Config::default().with_resource(resource))
        .install_batch(opentelemetry_sdk::runtime::Tokio)
}

/// Flushes pending spans to the OTLP collector.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Span wrapping one report request. Query fields are recorded once parsed;
/// `rows` once the partitions have been read.
pub fn report_span(report: &'static str) -> tracing::Span {
    tracing::info_span!(
        "report",
        report,
        year = tracing::field::Empty,
        country = tracing::field::Empty,
        rows = tracing::field::Empty,
    )
}

pub fn log_report_duration(report: &'static str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    if elapsed >= SLOW_REPORT {
        tracing::warn!(report, elapsed_ms, "slow report");
    } else {
        tracing::debug!(report, elapsed_ms, "report finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> LoggingConfig {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        LoggingConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn development_defaults() {
        let config = config(&[]);
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.output, LogOutput::Stderr);
        assert_eq!(config.environment, "development");
        assert_eq!(config.otlp_endpoint, None);
    }

    #[test]
    fn production_logs_json_unless_overridden() {
        assert_eq!(config(&[("ENVIRONMENT", "production")]).format, LogFormat::Json);
        assert_eq!(config(&[("ENV", "prod")]).format, LogFormat::Json);
        assert_eq!(
            config(&[("ENVIRONMENT", "prod"), ("LOG_FORMAT", "PRETTY")]).format,
            LogFormat::Pretty
        );
    }

    #[test]
    fn file_output_uses_log_dir() {
        let config = config(&[("LOG_OUTPUT", "file"), ("LOG_DIR", "/var/log/analytics")]);
        assert_eq!(
            config.output,
            LogOutput::File(PathBuf::from("/var/log/analytics"))
        );
    }

    #[test]
    fn blank_otlp_endpoint_disables_export() {
        assert_eq!(config(&[("OTEL_EXPORTER_OTLP_ENDPOINT", " ")]).otlp_endpoint, None);
        assert_eq!(
            config(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317")])
                .otlp_endpoint
                .as_deref(),
            Some("http://collector:4317")
        );
    }

    #[test]
    fn report_span_accepts_late_fields() {
        let span = report_span("top_products");
        span.record("year", "2023");
        span.record("rows", 3_u64);
        let _entered = span.enter();
        log_report_duration("top_products", Duration::from_millis(5));
    }
}
