use clap::Parser;
use sales_analytics::config::{ENV_FILE_VAR, load_env_file};
use sales_analytics::{
    CliArgs, LoggingConfig, ServerConfig, init_logging, run_server, shutdown_telemetry,
};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before anything reads the environment.
    let env_file = std::env::var_os(ENV_FILE_VAR).map(PathBuf::from);
    let loaded_env = load_env_file(env_file.as_deref())?;

    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;
    if let Some(path) = &loaded_env {
        tracing::info!(path = %path.display(), "loaded environment file");
    }

    let cli = CliArgs::parse();
    let config = ServerConfig::from_args(cli)?;

    // Fail fast on bad configuration before touching the database.
    config.validate()?;

    let result = run_server(config).await;

    // Flush traces before exit.
    shutdown_telemetry();

    result
}
