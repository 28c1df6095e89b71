//! Result of applying one signal to one replica account.

use std::fmt;

use crate::models::{AccountProfile, SignalKind};

/// Terminal state of one (signal, replica) application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStatus {
    /// The replica now reflects the master's change
    Success,
    /// All attempts failed; the replica was left as it was
    Failed,
    /// Nothing to do on this replica (zero volume, no mirrored position,
    /// or already mirrored)
    Skipped,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Success => "SUCCESS",
            CopyStatus::Failed => "FAILED",
            CopyStatus::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened when one signal was applied to one replica.
///
/// Outcomes exist for logging and counter folding only; they are never
/// persisted or fed back into the decision logic.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    /// Replica label from the config
    pub replica: String,

    /// Replica login, disambiguates identically named accounts in logs
    pub login: u64,

    /// Which operation was applied
    pub kind: SignalKind,

    /// Master ticket the signal originated from
    pub origin_ticket: u64,

    pub symbol: String,

    /// Replica ticket the operation created or touched
    pub replica_ticket: Option<u64>,

    pub status: CopyStatus,

    /// Error text on failure, skip reason on skip
    pub detail: Option<String>,
}

impl CopyOutcome {
    pub fn success(
        profile: &AccountProfile,
        kind: SignalKind,
        origin_ticket: u64,
        symbol: &str,
        replica_ticket: Option<u64>,
    ) -> Self {
        Self {
            replica: profile.name.clone(),
            login: profile.login,
            kind,
            origin_ticket,
            symbol: symbol.to_string(),
            replica_ticket,
            status: CopyStatus::Success,
            detail: None,
        }
    }

    pub fn failed(
        profile: &AccountProfile,
        kind: SignalKind,
        origin_ticket: u64,
        symbol: &str,
        error: impl Into<String>,
    ) -> Self {
        Self {
            replica: profile.name.clone(),
            login: profile.login,
            kind,
            origin_ticket,
            symbol: symbol.to_string(),
            replica_ticket: None,
            status: CopyStatus::Failed,
            detail: Some(error.into()),
        }
    }

    pub fn skipped(
        profile: &AccountProfile,
        kind: SignalKind,
        origin_ticket: u64,
        symbol: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            replica: profile.name.clone(),
            login: profile.login,
            kind,
            origin_ticket,
            symbol: symbol.to_string(),
            replica_ticket: None,
            status: CopyStatus::Skipped,
            detail: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CopyStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SizingMode;
    use rust_decimal_macros::dec;

    #[test]
    fn test_outcome_constructors() {
        let profile = AccountProfile {
            name: "replica-1".to_string(),
            login: 2001,
            password: String::new(),
            password_env: None,
            server: "Broker-Demo".to_string(),
            endpoint: "http://127.0.0.1:9101".to_string(),
            enabled: true,
            sizing: SizingMode::Multiplier,
            sizing_value: dec!(1.0),
        };

        let ok = CopyOutcome::success(&profile, SignalKind::Open, 42, "EURUSD", Some(9001));
        assert!(ok.is_success());
        assert_eq!(ok.replica_ticket, Some(9001));
        assert_eq!(ok.login, 2001);

        let skip = CopyOutcome::skipped(&profile, SignalKind::Close, 42, "EURUSD", "not mirrored");
        assert_eq!(skip.status, CopyStatus::Skipped);
        assert_eq!(skip.detail.as_deref(), Some("not mirrored"));
        assert!(!skip.is_success());
    }
}
