//! Configuration loading and validation.
//!
//! The config file is a single JSON document with one `master` account, a
//! `slaves` array of replica accounts, and a `settings` block. Everything
//! that can be rejected before the loop starts is rejected here.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::AccountProfile;

/// Copy-loop behavior from the `settings` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master poll cadence in milliseconds
    pub poll_interval_ms: u64,

    /// Mirror stop-loss levels onto replicas
    pub copy_stop_loss: bool,

    /// Mirror take-profit levels onto replicas
    pub copy_take_profit: bool,

    /// Accepted for file compatibility; pending orders are not mirrored
    pub copy_pending_orders: bool,

    /// Attempts per operation per replica before giving up
    pub max_retries: u32,

    /// Delay between attempts, except after requotes
    pub retry_delay_ms: u64,

    /// Venue login budget per session
    pub connect_timeout_ms: u64,

    /// Default log level, overridable from the CLI
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            copy_stop_loss: true,
            copy_take_profit: true,
            copy_pending_orders: false,
            max_retries: 3,
            retry_delay_ms: 200,
            connect_timeout_ms: 10_000,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// The whole config file: one master, any number of replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub master: AccountProfile,

    #[serde(rename = "slaves", default)]
    pub replicas: Vec<AccountProfile>,

    #[serde(default)]
    pub settings: Settings,
}

impl Config {
    /// Parse and validate a config document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut config: Config = serde_json::from_str(raw).context("Failed to parse config")?;
        config.finalize()?;
        Ok(config)
    }

    /// Load and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn enabled_replicas(&self) -> impl Iterator<Item = &AccountProfile> {
        self.replicas.iter().filter(|r| r.enabled)
    }

    fn finalize(&mut self) -> Result<()> {
        if self.master.name.is_empty() {
            self.master.name = "master".to_string();
        }
        for (i, replica) in self.replicas.iter_mut().enumerate() {
            if replica.name.is_empty() {
                replica.name = format!("replica-{}", i + 1);
            }
        }

        resolve_password(&mut self.master)?;
        for replica in self.replicas.iter_mut().filter(|r| r.enabled) {
            resolve_password(replica)?;
        }

        self.validate()
    }

    fn validate(&self) -> Result<()> {
        validate_account(&self.master)?;

        if !self.replicas.iter().any(|r| r.enabled) {
            bail!("No enabled replica accounts configured");
        }

        for replica in self.enabled_replicas() {
            validate_account(replica)?;
            if replica.sizing_value <= Decimal::ZERO {
                bail!("Account {}: lot_value must be positive", replica.name);
            }
            if replica.login == self.master.login && replica.endpoint == self.master.endpoint {
                bail!("Account {} would copy the master onto itself", replica.name);
            }
        }

        if self.settings.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }
        if self.settings.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }

        Ok(())
    }
}

/// Fill in the password from its env var when the file leaves it out.
fn resolve_password(profile: &mut AccountProfile) -> Result<()> {
    if profile.password.is_empty() {
        if let Some(var) = &profile.password_env {
            profile.password = std::env::var(var)
                .with_context(|| format!("Account {}: env var {} not set", profile.name, var))?;
        }
    }
    if profile.password.is_empty() {
        bail!("Account {}: no password configured", profile.name);
    }
    Ok(())
}

fn validate_account(profile: &AccountProfile) -> Result<()> {
    if profile.login == 0 {
        bail!("Account {}: login must be set", profile.name);
    }
    if profile.server.is_empty() {
        bail!("Account {}: server must be set", profile.name);
    }
    if profile.endpoint.is_empty() {
        bail!("Account {}: endpoint must be set", profile.name);
    }
    Ok(())
}
