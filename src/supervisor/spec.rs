// src/supervisor/spec.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{Result, WardenError};

use super::policy::ExitCodePolicy;

/// Everything needed to supervise one daemon.
///
/// Immutable once built. Equality is structural: two specs that compare
/// equal describe the same daemon, which is how redundant start requests
/// are detected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubprocessSpec {
    tag: String,
    cmd: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    assets: BTreeMap<String, PathBuf>,
    exit_codes: ExitCodePolicy,
    retries: u32,
    retry_delay: Duration,
}

impl SubprocessSpec {
    pub fn builder<I, S>(cmd: I) -> SubprocessSpecBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SubprocessSpecBuilder::new(cmd)
    }

    /// Tag attached to every output line of the subprocess.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn cmd(&self) -> &[String] {
        &self.cmd
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Environment overrides merged over the inherited environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Asset source node -> staging destination.
    pub fn assets(&self) -> &BTreeMap<String, PathBuf> {
        &self.assets
    }

    pub fn exit_codes(&self) -> &ExitCodePolicy {
        &self.exit_codes
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }
}

/// Builder for [`SubprocessSpec`].
#[derive(Debug, Clone)]
pub struct SubprocessSpecBuilder {
    spec: SubprocessSpec,
}

impl SubprocessSpecBuilder {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            spec: SubprocessSpec {
                tag: "subprocess".to_string(),
                cmd: cmd.into_iter().map(Into::into).collect(),
                cwd: None,
                env: BTreeMap::new(),
                assets: BTreeMap::new(),
                exit_codes: ExitCodePolicy::default(),
                retries: 0,
                retry_delay: Duration::ZERO,
            },
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.spec.tag = tag.into();
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.spec.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    pub fn asset(mut self, source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        self.spec.assets.insert(source.into(), destination.into());
        self
    }

    pub fn end_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.spec.exit_codes.end.extend(codes);
        self
    }

    pub fn skip_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.spec.exit_codes.skip.extend(codes);
        self
    }

    pub fn start_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.spec.exit_codes.start.extend(codes);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.spec.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.spec.retry_delay = delay;
        self
    }

    pub fn build(self) -> Result<SubprocessSpec> {
        if self.spec.cmd.is_empty() || self.spec.cmd[0].trim().is_empty() {
            return Err(WardenError::ConfigError(
                "subprocess command must name a program".to_string(),
            ));
        }
        if self.spec.tag.trim().is_empty() {
            return Err(WardenError::ConfigError(
                "subprocess tag must not be empty".to_string(),
            ));
        }
        Ok(self.spec)
    }
}
