//! Gateway boundary between the copier and the trading venue.
//!
//! Everything venue-specific lives behind [`Gateway`] and
//! [`GatewaySession`]: the copier core only ever sees positions, tickets,
//! and typed failure kinds. Every operation here is single-attempt; the
//! retry policy belongs to the caller.

mod bridge;
mod sim;

pub use bridge::BridgeGateway;
pub use sim::{SimBehavior, SimGateway};

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{AccountProfile, Position, Side};

/// Order execution mode, in the venue's wire spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillMode {
    /// Immediate-or-cancel
    Ioc,
    /// Fill-or-kill
    Fok,
    /// Resting order, venue decides the fill
    Return,
}

impl FillMode {
    /// Modes in preference order. Brokers differ in which modes they
    /// accept, so execution starts at the first and falls through on
    /// unsupported-fill rejections.
    pub const PREFERENCE: [FillMode; 3] = [FillMode::Ioc, FillMode::Fok, FillMode::Return];

    pub fn as_str(&self) -> &'static str {
        match self {
            FillMode::Ioc => "IOC",
            FillMode::Fok => "FOK",
            FillMode::Return => "RETURN",
        }
    }

    /// The next mode to try after this one is rejected, if any remain.
    pub fn next(&self) -> Option<FillMode> {
        let idx = Self::PREFERENCE.iter().position(|m| m == self)?;
        Self::PREFERENCE.get(idx + 1).copied()
    }
}

/// Why a gateway operation failed. The copier's retry loop switches on
/// these kinds, so each one encodes a distinct recovery strategy.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Bridge unreachable, timed out, or spoke garbage
    #[error("transport error: {0}")]
    Transport(String),

    /// The venue refused the login or the session died
    #[error("session error: {0}")]
    Session(String),

    /// Price moved before the order hit the book; a retry reads a fresh
    /// price, so no delay is warranted
    #[error("requote")]
    Requote,

    /// The venue does not accept this execution mode for the instrument
    #[error("fill mode {} not supported", .0.as_str())]
    UnsupportedFill(FillMode),

    /// Any other venue-side refusal
    #[error("rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_requote(&self) -> bool {
        matches!(self, GatewayError::Requote)
    }

    pub fn unsupported_fill(&self) -> Option<FillMode> {
        match self {
            GatewayError::UnsupportedFill(mode) => Some(*mode),
            _ => None,
        }
    }
}

/// Parameters for opening a position on a replica.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: Decimal,
    /// Zero means no stop-loss
    pub stop_loss: Decimal,
    /// Zero means no take-profit
    pub take_profit: Decimal,
    /// Carries the correlation tag
    pub comment: String,
    pub fill: FillMode,
}

/// Factory for venue sessions, one per configured account endpoint.
///
/// Implementations are shared across the whole run as `Arc<dyn Gateway>`;
/// all per-account state lives in the session.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Whether this gateway can work at all. Resolved once at startup;
    /// no operation should be attempted against an unavailable gateway.
    fn available(&self) -> bool;

    /// Log in to one account. The session borrows nothing from the
    /// profile and must be disconnected by the caller.
    async fn connect(
        &self,
        profile: &AccountProfile,
        timeout: Duration,
    ) -> Result<Box<dyn GatewaySession>, GatewayError>;
}

/// One logged-in account. Sessions are short-lived: connect, a few
/// operations, disconnect. They are never held across polling cycles.
#[async_trait]
pub trait GatewaySession: Send {
    /// Every currently open market position on the account.
    async fn open_positions(&mut self) -> Result<Vec<Position>, GatewayError>;

    /// Place a market order; returns the venue ticket of the new position.
    async fn open(&mut self, req: &OpenRequest) -> Result<u64, GatewayError>;

    /// Close an open position at market.
    async fn close(&mut self, target: &Position, fill: FillMode) -> Result<(), GatewayError>;

    /// Re-point stop-loss and take-profit on an open position.
    async fn modify(
        &mut self,
        ticket: u64,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<(), GatewayError>;

    /// Log out. Failures are swallowed; there is nothing useful a caller
    /// can do about a failed logout.
    async fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_mode_fallthrough_order() {
        assert_eq!(FillMode::Ioc.next(), Some(FillMode::Fok));
        assert_eq!(FillMode::Fok.next(), Some(FillMode::Return));
        assert_eq!(FillMode::Return.next(), None);
    }

    #[test]
    fn test_fill_mode_wire_spelling() {
        assert_eq!(serde_json::to_string(&FillMode::Ioc).unwrap(), "\"IOC\"");
        assert_eq!(
            serde_json::from_str::<FillMode>("\"RETURN\"").unwrap(),
            FillMode::Return
        );
    }

    #[test]
    fn test_error_kinds() {
        assert!(GatewayError::Requote.is_requote());
        assert!(!GatewayError::Transport("down".into()).is_requote());

        let err = GatewayError::UnsupportedFill(FillMode::Fok);
        assert_eq!(err.unsupported_fill(), Some(FillMode::Fok));
        assert_eq!(err.to_string(), "fill mode FOK not supported");

        assert_eq!(
            GatewayError::Session("bad password".into()).to_string(),
            "session error: bad password"
        );
    }
}
