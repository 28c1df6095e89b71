//! Trade signals produced by snapshot differencing.

use std::fmt;

use rust_decimal::Decimal;

use crate::models::Side;

/// Discriminant of a [`Signal`], used for log lines and counter folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Open,
    Close,
    Modify,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Open => "open",
            SignalKind::Close => "close",
            SignalKind::Modify => "modify",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One replicable change observed on the master account.
///
/// Signals carry everything a replica needs, so downstream code never has
/// to reach back into the master snapshot. `ticket` always refers to the
/// master's ticket; replica tickets are correlated through the comment tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A position appeared on the master.
    Open {
        ticket: u64,
        symbol: String,
        side: Side,
        volume: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    },

    /// A position disappeared from the master.
    Close { ticket: u64, symbol: String },

    /// Stop-loss or take-profit moved on a surviving master position.
    Modify {
        ticket: u64,
        symbol: String,
        stop_loss: Decimal,
        take_profit: Decimal,
    },
}

impl Signal {
    /// The master ticket this signal originates from.
    pub fn ticket(&self) -> u64 {
        match self {
            Signal::Open { ticket, .. }
            | Signal::Close { ticket, .. }
            | Signal::Modify { ticket, .. } => *ticket,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Signal::Open { symbol, .. }
            | Signal::Close { symbol, .. }
            | Signal::Modify { symbol, .. } => symbol,
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Open { .. } => SignalKind::Open,
            Signal::Close { .. } => SignalKind::Close,
            Signal::Modify { .. } => SignalKind::Modify,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_accessors() {
        let open = Signal::Open {
            ticket: 42,
            symbol: "GBPUSD".to_string(),
            side: Side::Sell,
            volume: dec!(0.5),
            stop_loss: dec!(1.30),
            take_profit: dec!(1.25),
        };
        assert_eq!(open.ticket(), 42);
        assert_eq!(open.symbol(), "GBPUSD");
        assert_eq!(open.kind(), SignalKind::Open);

        let close = Signal::Close {
            ticket: 7,
            symbol: "EURUSD".to_string(),
        };
        assert_eq!(close.ticket(), 7);
        assert_eq!(close.kind(), SignalKind::Close);

        let modify = Signal::Modify {
            ticket: 9,
            symbol: "EURUSD".to_string(),
            stop_loss: dec!(1.10),
            take_profit: dec!(0),
        };
        assert_eq!(modify.kind(), SignalKind::Modify);
        assert_eq!(modify.kind().as_str(), "modify");
    }
}
