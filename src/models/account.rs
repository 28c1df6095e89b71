//! Account profiles and per-account lot sizing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a replica account sizes its copy of a master position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// Scale the master volume by `lot_value`
    Multiplier,
    /// Ignore the master volume and always use `lot_value` lots
    Fixed,
}

impl SizingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizingMode::Multiplier => "multiplier",
            SizingMode::Fixed => "fixed",
        }
    }
}

impl Default for SizingMode {
    fn default() -> Self {
        SizingMode::Multiplier
    }
}

/// Credentials and sizing policy for one account.
///
/// Profiles are built once at startup from the config file and never change
/// during a run. The same type serves the master and the replicas; the
/// sizing fields are simply unused on the master side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Label used in log lines and reports
    #[serde(default)]
    pub name: String,

    /// Venue login number
    pub login: u64,

    /// Venue password; may instead come from the env var named by
    /// `password_env`
    #[serde(default)]
    pub password: String,

    /// Environment variable to read the password from when `password` is
    /// empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Venue server name, e.g. "Broker-Demo"
    pub server: String,

    /// Base URL of the terminal bridge serving this account
    pub endpoint: String,

    /// Disabled replicas stay in the config but receive no operations
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sizing mode for replicated opens
    #[serde(rename = "lot_mode", default)]
    pub sizing: SizingMode,

    /// Multiplier factor or fixed lot count, depending on `lot_mode`
    #[serde(rename = "lot_value", default = "default_sizing_value")]
    pub sizing_value: Decimal,
}

impl AccountProfile {
    /// Lot size this replica should open for a master position of
    /// `master_volume` lots, rounded to the venue's two-decimal lot step
    /// (round half to even).
    ///
    /// A result of zero or less is a legitimate outcome and means the
    /// position is too small to mirror on this account.
    pub fn replica_volume(&self, master_volume: Decimal) -> Decimal {
        let raw = match self.sizing {
            SizingMode::Multiplier => master_volume * self.sizing_value,
            SizingMode::Fixed => self.sizing_value,
        };
        raw.round_dp(2)
    }

    /// Human-readable sizing description for reports, e.g. "multiplier x0.5".
    pub fn sizing_label(&self) -> String {
        match self.sizing {
            SizingMode::Multiplier => format!("multiplier x{}", self.sizing_value),
            SizingMode::Fixed => format!("fixed {} lots", self.sizing_value),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sizing_value() -> Decimal {
    Decimal::ONE
}
