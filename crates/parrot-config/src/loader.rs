use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::ParrotConfig;

/// Resolve the config path: explicit path > PARROT_CONFIG env >
/// `~/.parrot/parrot.toml`.
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var("PARROT_CONFIG") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parrot")
        .join("parrot.toml")
}

/// Load the config from disk, falling back to defaults when the file is
/// missing. Validation warnings are logged; hard errors fail the load.
pub fn load(path: Option<&Path>) -> parrot_core::Result<ParrotConfig> {
    let config_path = resolve_path(path);
    let config = if config_path.exists() {
        info!(?config_path, "loading configuration");
        let raw = std::fs::read_to_string(&config_path)?;
        toml::from_str::<ParrotConfig>(&raw).map_err(|e| {
            parrot_core::ParrotError::Config(format!(
                "failed to parse {}: {}",
                config_path.display(),
                e
            ))
        })?
    } else {
        warn!(?config_path, "config file not found, using defaults");
        ParrotConfig::default()
    };

    let config = apply_env_overrides(config);

    match config.validate() {
        Ok(warnings) => {
            for w in &warnings {
                warn!("{}", w);
            }
        }
        Err(e) => {
            return Err(parrot_core::ParrotError::Config(e));
        }
    }

    Ok(config)
}

/// Env var overrides. The token env var fills in only when the config
/// file doesn't set one: config file takes priority, env is fallback.
fn apply_env_overrides(mut config: ParrotConfig) -> ParrotConfig {
    if config.bot.token.is_none()
        && let Ok(v) = std::env::var("PARROT_TOKEN")
    {
        config.bot.token = Some(v);
    }
    if let Ok(v) = std::env::var("PARROT_LOG_LEVEL") {
        config.logging.level = v;
    }
    config
}
