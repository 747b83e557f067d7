use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tracing::info;

use ::config::{Config, Environment, File, FileFormat, Source};

use super::BacktestConfig;

/// Prefix for environment overrides, e.g. `BACKTEST__INITIAL_BALANCE=5000` or
/// `BACKTEST__STRATEGY__FAST_PERIOD=12`.
pub const ENV_PREFIX: &str = "BACKTEST";

fn env_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// Loads a TOML run configuration layered with `BACKTEST__*` overrides and
/// validates it.
pub fn load_backtest_config<P: AsRef<Path>>(path: P) -> Result<BacktestConfig> {
    let path = path.as_ref();
    let config = build(File::from(path).format(FileFormat::Toml), Some(env_overrides()))
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    info!("Loaded {} config for {} from {}", config.strategy, config.symbol, path.display());
    Ok(config)
}

fn build<S>(document: S, env: Option<Environment>) -> Result<BacktestConfig>
where
    S: Source + Send + Sync + 'static,
{
    let mut builder = Config::builder().add_source(document);
    if let Some(env) = env {
        builder = builder.add_source(env);
    }
    let settings = builder.build().context("Failed to read config")?;
    let config: BacktestConfig = settings.try_deserialize().context("Failed to parse config")?;
    validated(config)
}

fn validated(config: BacktestConfig) -> Result<BacktestConfig> {
    config
        .validate()
        .map_err(|errors| anyhow!("{}", errors.join("; ")))?;
    Ok(config)
}
