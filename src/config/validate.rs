// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, WardenError};
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = WardenError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_service(&raw)?;
        validate_daemon(&raw)?;
        let retry_delay = duration_field("[daemon].retry_delay", &raw.daemon.retry_delay)?;
        let poll_interval = validate_update(&raw)?;
        Ok(ConfigFile::new_unchecked(
            raw.service,
            raw.daemon,
            raw.update,
            retry_delay,
            poll_interval,
        ))
    }
}

fn validate_service(cfg: &RawConfigFile) -> Result<()> {
    if cfg.service.installed_version.trim().is_empty() {
        return Err(WardenError::ConfigError(
            "[service].installed_version must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_daemon(cfg: &RawConfigFile) -> Result<()> {
    if cfg.daemon.cmd.is_empty() || cfg.daemon.cmd[0].trim().is_empty() {
        return Err(WardenError::ConfigError(
            "[daemon].cmd must name a program".to_string(),
        ));
    }
    if cfg.daemon.tag.trim().is_empty() {
        return Err(WardenError::ConfigError(
            "[daemon].tag must not be empty".to_string(),
        ));
    }
    if cfg.daemon.payload_env.as_deref().is_some_and(|v| v.trim().is_empty()) {
        return Err(WardenError::ConfigError(
            "[daemon].payload_env must not be empty when set".to_string(),
        ));
    }
    Ok(())
}

/// Returns the parsed poll interval (default when there is no `[update]`).
fn validate_update(cfg: &RawConfigFile) -> Result<Duration> {
    let Some(update) = &cfg.update else {
        return Ok(Duration::from_secs(1));
    };

    if !update.file_name.contains("{version}") {
        return Err(WardenError::ConfigError(format!(
            "[update].file_name must contain a {{version}} placeholder (got '{}')",
            update.file_name
        )));
    }
    if update.download_uri.trim().is_empty() {
        return Err(WardenError::ConfigError(
            "[update].download_uri must not be empty".to_string(),
        ));
    }

    let interval = duration_field("[update].poll_interval", &update.poll_interval)?;
    if interval.is_zero() {
        return Err(WardenError::ConfigError(
            "[update].poll_interval must be greater than zero".to_string(),
        ));
    }
    Ok(interval)
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| WardenError::ConfigError(format!("{field}: {e}")))
}
