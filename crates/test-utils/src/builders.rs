#![allow(dead_code)]

use std::collections::BTreeMap;

use warden::config::{ConfigFile, DaemonSection, RawConfigFile, ServiceSection, UpdateSection};
use warden::supervisor::{SubprocessSpec, SubprocessSpecBuilder};

/// Spec builder for `/bin/sh -c <script>`.
pub fn sh(script: &str) -> SubprocessSpecBuilder {
    SubprocessSpec::builder(["/bin/sh", "-c", script])
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(cmd: &[&str]) -> Self {
        Self {
            config: RawConfigFile {
                service: ServiceSection::default(),
                daemon: DaemonSection {
                    tag: "daemon".to_string(),
                    cmd: cmd.iter().map(|s| s.to_string()).collect(),
                    cwd: None,
                    env: BTreeMap::new(),
                    retries: 0,
                    retry_delay: "0s".to_string(),
                    exit_end: Vec::new(),
                    exit_skip: Vec::new(),
                    exit_start: Vec::new(),
                    assets_dir: None,
                    assets: BTreeMap::new(),
                    payload_env: None,
                },
                update: None,
            },
        }
    }

    pub fn installed_version(mut self, version: &str) -> Self {
        self.config.service.installed_version = version.to_string();
        self
    }

    pub fn payload_env(mut self, var: &str) -> Self {
        self.config.daemon.payload_env = Some(var.to_string());
        self
    }

    pub fn retries(mut self, retries: u32, delay: &str) -> Self {
        self.config.daemon.retries = retries;
        self.config.daemon.retry_delay = delay.to_string();
        self
    }

    pub fn update(mut self, download_uri: &str, file_name: &str) -> Self {
        self.config.update = Some(UpdateSection {
            download_dir: None,
            install_dir: None,
            download_uri: download_uri.to_string(),
            file_name: file_name.to_string(),
            poll_interval: "1s".to_string(),
            title: None,
        });
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}
