use crate::error::AnalyticsError;
use crate::fetch::FetchPolicy;
use crate::partition::{DEFAULT_FIRST_YEAR, DEFAULT_LAST_YEAR, PartitionResolver};
use crate::report::ReportSettings;
use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:5000";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REQUEST_DEADLINE_MS: u64 = 30_000;
const DEFAULT_PRICE_COLUMN: &str = "price";
const DEFAULT_CORS_ORIGINS: &[&str] = &["http://localhost:5173"];
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Connection parameters for the order database.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_bind_address: SocketAddr,
    pub database: DatabaseConfig,
    pub max_connections: u32,
    pub fetch_timeout: Duration,
    pub request_deadline: Duration,
    pub supported_years: RangeInclusive<i32>,
    pub price_column: String,
    pub cors_origins: Vec<String>,
    pub graceful_shutdown_timeout_secs: u64,
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            http_bind: cli_http_bind,
            db_host: cli_db_host,
            db_port: cli_db_port,
            db_user: cli_db_user,
            db_password: cli_db_password,
            db_name: cli_db_name,
            max_connections: cli_max_connections,
            fetch_timeout_ms: cli_fetch_timeout_ms,
            request_deadline_ms: cli_request_deadline_ms,
            first_year: cli_first_year,
            last_year: cli_last_year,
            price_column: cli_price_column,
            cors_origins: cli_cors_origins,
            graceful_shutdown_timeout_secs: cli_shutdown_timeout,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            http_bind: file_http_bind,
            database: file_database,
            max_connections: file_max_connections,
            fetch_timeout_ms: file_fetch_timeout_ms,
            request_deadline_ms: file_request_deadline_ms,
            first_year: file_first_year,
            last_year: file_last_year,
            price_column: file_price_column,
            cors_origins: file_cors_origins,
            graceful_shutdown_timeout_secs: file_shutdown_timeout,
        } = file_config;
        let file_database = file_database.unwrap_or_default();

        let database = resolve_database(
            cli_db_host.or(file_database.host),
            cli_db_port.or(file_database.port),
            cli_db_user.or(file_database.user),
            cli_db_password.or(file_database.password),
            cli_db_name.or(file_database.name),
        )?;

        let http_bind_address = match cli_http_bind.or(file_http_bind) {
            Some(address) => address,
            None => DEFAULT_HTTP_BIND
                .parse()
                .context("default bind address must parse")?,
        };

        let max_connections = cli_max_connections
            .or(file_max_connections)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);

        let fetch_timeout = Duration::from_millis(
            cli_fetch_timeout_ms
                .or(file_fetch_timeout_ms)
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_MS),
        );
        let request_deadline = Duration::from_millis(
            cli_request_deadline_ms
                .or(file_request_deadline_ms)
                .unwrap_or(DEFAULT_REQUEST_DEADLINE_MS),
        );

        let first_year = cli_first_year
            .or(file_first_year)
            .unwrap_or(DEFAULT_FIRST_YEAR);
        let last_year = cli_last_year.or(file_last_year).unwrap_or(DEFAULT_LAST_YEAR);

        let price_column = cli_price_column
            .or(file_price_column)
            .unwrap_or_else(|| DEFAULT_PRICE_COLUMN.to_string())
            .trim()
            .to_string();

        let mut cors_origins = cli_cors_origins
            .or(file_cors_origins)
            .unwrap_or_else(|| {
                DEFAULT_CORS_ORIGINS
                    .iter()
                    .map(|origin| (*origin).to_string())
                    .collect()
            })
            .into_iter()
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect::<Vec<_>>();
        cors_origins.dedup();

        let graceful_shutdown_timeout_secs = cli_shutdown_timeout
            .or(file_shutdown_timeout)
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        Ok(Self {
            http_bind_address,
            database,
            max_connections,
            fetch_timeout,
            request_deadline,
            supported_years: first_year..=last_year,
            price_column,
            cors_origins,
            graceful_shutdown_timeout_secs,
        })
    }

    /// Checks invariants that must hold before the server starts.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.supported_years.start() <= self.supported_years.end(),
            "first year {} is after last year {}",
            self.supported_years.start(),
            self.supported_years.end()
        );
        anyhow::ensure!(
            !self.fetch_timeout.is_zero(),
            "fetch timeout must be greater than zero"
        );
        anyhow::ensure!(
            self.request_deadline >= self.fetch_timeout,
            "request deadline ({}ms) must be at least the fetch timeout ({}ms)",
            self.request_deadline.as_millis(),
            self.fetch_timeout.as_millis()
        );
        anyhow::ensure!(
            is_plain_identifier(&self.price_column),
            "price column {:?} is not a plain column name",
            self.price_column
        );
        for origin in &self.cors_origins {
            anyhow::ensure!(
                origin.starts_with("http://") || origin.starts_with("https://"),
                "CORS origin {:?} must start with http:// or https://",
                origin
            );
        }
        Ok(())
    }

    pub fn report_settings(&self) -> ReportSettings {
        ReportSettings {
            resolver: PartitionResolver::new(self.supported_years.clone()),
            fetch_policy: FetchPolicy {
                fetch_timeout: self.fetch_timeout,
                request_deadline: self.request_deadline,
            },
            price_column: self.price_column.clone(),
        }
    }
}

fn resolve_database(
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    name: Option<String>,
) -> Result<DatabaseConfig> {
    let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
    let missing = [
        ("DB_HOST", present(&host)),
        ("DB_PORT", port.is_some()),
        ("DB_USER", present(&user)),
        ("DB_PASSWORD", present(&password)),
        ("DB_NAME", present(&name)),
    ]
    .into_iter()
    .filter(|(_, present)| !present)
    .map(|(variable, _)| variable)
    .collect::<Vec<_>>();

    match (host, port, user, password, name) {
        (Some(host), Some(port), Some(user), Some(password), Some(name)) if missing.is_empty() => {
            Ok(DatabaseConfig {
                host,
                port,
                user,
                password,
                name,
            })
        }
        _ => Err(AnalyticsError::Configuration(format!(
            "missing required database settings: {}",
            missing.join(", ")
        ))
        .into()),
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "sales-analytics",
    about = "Sales analytics report service",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "SALES_ANALYTICS_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(long, env = "DB_HOST", value_name = "HOST", help = "Database host")]
    pub db_host: Option<String>,

    #[arg(long, env = "DB_PORT", value_name = "PORT", help = "Database port")]
    pub db_port: Option<u16>,

    #[arg(long, env = "DB_USER", value_name = "USER", help = "Database user")]
    pub db_user: Option<String>,

    #[arg(
        long,
        env = "DB_PASSWORD",
        value_name = "PASSWORD",
        hide_env_values = true,
        help = "Database password"
    )]
    pub db_password: Option<String>,

    #[arg(long, env = "DB_NAME", value_name = "NAME", help = "Database name")]
    pub db_name: Option<String>,

    #[arg(
        long,
        env = "SALES_ANALYTICS_MAX_CONNECTIONS",
        value_name = "N",
        help = "Maximum pooled database connections"
    )]
    pub max_connections: Option<u32>,

    #[arg(
        long,
        env = "SALES_ANALYTICS_FETCH_TIMEOUT_MS",
        value_name = "MS",
        help = "Time budget for a single partition fetch"
    )]
    pub fetch_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "SALES_ANALYTICS_REQUEST_DEADLINE_MS",
        value_name = "MS",
        help = "Time budget for all partition fetches of one report"
    )]
    pub request_deadline_ms: Option<u64>,

    #[arg(
        long,
        env = "SALES_ANALYTICS_FIRST_YEAR",
        value_name = "YEAR",
        allow_negative_numbers = true,
        help = "First year covered by year=all"
    )]
    pub first_year: Option<i32>,

    #[arg(
        long,
        env = "SALES_ANALYTICS_LAST_YEAR",
        value_name = "YEAR",
        allow_negative_numbers = true,
        help = "Last year covered by year=all"
    )]
    pub last_year: Option<i32>,

    #[arg(
        long,
        env = "SALES_ANALYTICS_PRICE_COLUMN",
        value_name = "COLUMN",
        help = "Unit price column of the order line item tables"
    )]
    pub price_column: Option<String>,

    #[arg(
        long,
        env = "SALES_ANALYTICS_CORS_ORIGINS",
        value_name = "ORIGIN",
        value_delimiter = ',',
        help = "Comma-separated list of browser origins allowed to call /api"
    )]
    pub cors_origins: Option<Vec<String>>,

    #[arg(
        long,
        env = "SALES_ANALYTICS_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Maximum time spent on graceful shutdown"
    )]
    pub graceful_shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialDatabase {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    http_bind: Option<SocketAddr>,
    database: Option<PartialDatabase>,
    max_connections: Option<u32>,
    fetch_timeout_ms: Option<u64>,
    request_deadline_ms: Option<u64>,
    first_year: Option<i32>,
    last_year: Option<i32>,
    price_column: Option<String>,
    cors_origins: Option<Vec<String>>,
    graceful_shutdown_timeout_secs: Option<u64>,
}

/// Names an explicit `.env` file; otherwise one is searched for from the
/// working directory upwards.
pub const ENV_FILE_VAR: &str = "SALES_ANALYTICS_ENV_FILE";

/// Loads `KEY=value` lines into the process environment so that the `DB_*`
/// and `SALES_ANALYTICS_*` fallbacks of [`CliArgs`] see them. Variables that
/// are already set win. A missing default `.env` is not an error; a missing
/// explicit file is.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("failed to load env file {:?}", path))?;
            Ok(Some(path.to_path_buf()))
        }
        None => match dotenvy::dotenv() {
            Ok(found) => Ok(Some(found)),
            Err(error) if error.not_found() => Ok(None),
            Err(error) => Err(error).context("failed to load .env file"),
        },
    }
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
