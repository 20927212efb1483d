// src/host/resolver.rs

use anyhow::Result;

use crate::config::ConfigFile;
use crate::supervisor::SubprocessSpec;

/// Maps a start payload to the job that should run.
pub trait JobResolver: Send + Sync {
    /// Daemon to supervise for this payload.
    fn resolve_daemon_spec(&self, payload: Option<&str>) -> Result<SubprocessSpec>;

    /// Package version this payload asks for, if it names one.
    fn resolve_version(&self, _payload: Option<&str>) -> Option<String> {
        None
    }

    /// File name the package for `version` is downloaded to.
    fn update_file_name(&self, _version: &str) -> Option<String> {
        None
    }

    /// Where the package for `version` is downloaded from.
    fn update_download_uri(&self, _version: &str) -> Option<String> {
        None
    }
}

/// Resolver driven by the `[daemon]` and `[update]` config sections.
///
/// - The daemon spec is the configured one; when `payload_env` is set the
///   payload is exported to the daemon under that name, so a new payload
///   means a different daemon.
/// - The requested version is the `version` query parameter of the payload
///   (`warden://run?version=2.0`).
/// - `{version}` in `file_name` / `download_uri` is replaced by the version.
///   Versions that could escape the download directory resolve to no
///   package at all.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config: ConfigFile,
}

impl ConfigResolver {
    pub fn new(config: ConfigFile) -> Self {
        Self { config }
    }
}

impl JobResolver for ConfigResolver {
    fn resolve_daemon_spec(&self, payload: Option<&str>) -> Result<SubprocessSpec> {
        let mut builder = self.config.daemon_spec_builder();
        if let (Some(payload), Some(var)) = (payload, self.config.daemon.payload_env.as_ref()) {
            builder = builder.env(var.clone(), payload);
        }
        Ok(builder.build()?)
    }

    fn resolve_version(&self, payload: Option<&str>) -> Option<String> {
        payload.and_then(|p| payload_param(p, "version"))
    }

    fn update_file_name(&self, version: &str) -> Option<String> {
        let update = self.config.update.as_ref()?;
        is_plain_version(version).then(|| update.file_name.replace("{version}", version))
    }

    fn update_download_uri(&self, version: &str) -> Option<String> {
        let update = self.config.update.as_ref()?;
        is_plain_version(version).then(|| update.download_uri.replace("{version}", version))
    }
}

/// A version that is safe to splice into a path: no separators, no `..`.
fn is_plain_version(version: &str) -> bool {
    !version.is_empty()
        && !version.contains(['/', '\\'])
        && !version.contains("..")
        && !version.chars().any(char::is_control)
}

/// Value of a `key=value` query parameter in a deep-link style payload.
///
/// The query is whatever follows the first `?`; a payload without `?` is
/// treated as a bare query string.
pub fn payload_param(payload: &str, key: &str) -> Option<String> {
    let query = payload.split_once('?').map_or(payload, |(_, q)| q);
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}
