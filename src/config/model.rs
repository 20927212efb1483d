// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::supervisor::{SubprocessSpec, SubprocessSpecBuilder};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [service]
/// installed_version = "1.0.0"
///
/// [daemon]
/// cmd = ["bin/server", "--port", "8080"]
/// retries = 3
/// retry_delay = "2s"
/// exit_end = [0]
///
/// [update]
/// download_uri = "file:///srv/releases/app-{version}.pkg"
/// file_name = "app-{version}.pkg"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub service: ServiceSection,

    pub daemon: DaemonSection,

    /// Without an `[update]` section requested versions are never fetched.
    #[serde(default)]
    pub update: Option<UpdateSection>,
}

/// `[service]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    /// Version of the package currently installed.
    #[serde(default = "default_installed_version")]
    pub installed_version: String,

    /// Holds the persisted payload, the staging marker and, by default,
    /// downloads and installed packages.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Exit once the active job stops on its own.
    #[serde(default = "default_true")]
    pub exit_when_stopped: bool,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            installed_version: default_installed_version(),
            state_dir: default_state_dir(),
            exit_when_stopped: true,
        }
    }
}

/// `[daemon]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSection {
    #[serde(default = "default_tag")]
    pub tag: String,

    pub cmd: Vec<String>,

    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,

    #[serde(default)]
    pub exit_end: Vec<i32>,

    #[serde(default)]
    pub exit_skip: Vec<i32>,

    #[serde(default)]
    pub exit_start: Vec<i32>,

    /// Root of the bundled asset tree.
    #[serde(default)]
    pub assets_dir: Option<PathBuf>,

    /// Asset node (relative to `assets_dir`) to destination path.
    #[serde(default)]
    pub assets: BTreeMap<String, PathBuf>,

    /// Environment variable the start payload is exported under.
    #[serde(default)]
    pub payload_env: Option<String>,
}

/// `[update]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSection {
    #[serde(default)]
    pub download_dir: Option<PathBuf>,

    #[serde(default)]
    pub install_dir: Option<PathBuf>,

    /// `{version}` is replaced by the requested version.
    pub download_uri: String,

    /// `{version}` is replaced by the requested version.
    pub file_name: String,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default)]
    pub title: Option<String>,
}

fn default_installed_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".warden")
}

fn default_true() -> bool {
    true
}

fn default_tag() -> String {
    "daemon".to_string()
}

fn default_retry_delay() -> String {
    "0s".to_string()
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

/// Validated configuration.
///
/// Built from a [`RawConfigFile`] through `TryFrom`; durations are parsed
/// once here.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub service: ServiceSection,
    pub daemon: DaemonSection,
    pub update: Option<UpdateSection>,
    retry_delay: Duration,
    poll_interval: Duration,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        service: ServiceSection,
        daemon: DaemonSection,
        update: Option<UpdateSection>,
        retry_delay: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            service,
            daemon,
            update,
            retry_delay,
            poll_interval,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Builder pre-filled from `[daemon]`.
    pub fn daemon_spec_builder(&self) -> SubprocessSpecBuilder {
        let d = &self.daemon;
        let mut builder = SubprocessSpec::builder(d.cmd.iter().cloned())
            .tag(d.tag.clone())
            .retries(d.retries)
            .retry_delay(self.retry_delay)
            .end_codes(d.exit_end.iter().copied())
            .skip_codes(d.exit_skip.iter().copied())
            .start_codes(d.exit_start.iter().copied());
        if let Some(cwd) = &d.cwd {
            builder = builder.cwd(cwd.clone());
        }
        for (key, value) in &d.env {
            builder = builder.env(key.clone(), value.clone());
        }
        for (source, destination) in &d.assets {
            builder = builder.asset(source.clone(), destination.clone());
        }
        builder
    }

    pub fn asset_marker(&self) -> PathBuf {
        self.service.state_dir.join("assets.staged")
    }

    pub fn payload_path(&self) -> PathBuf {
        self.service.state_dir.join("payload")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.update
            .as_ref()
            .and_then(|u| u.download_dir.clone())
            .unwrap_or_else(|| self.service.state_dir.join("downloads"))
    }

    pub fn install_dir(&self) -> PathBuf {
        self.update
            .as_ref()
            .and_then(|u| u.install_dir.clone())
            .unwrap_or_else(|| self.service.state_dir.join("installed"))
    }

    pub fn update_title(&self) -> String {
        self.update
            .as_ref()
            .and_then(|u| u.title.clone())
            .unwrap_or_else(|| "warden".to_string())
    }
}
