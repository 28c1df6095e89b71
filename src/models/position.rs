//! Position model representing one open market position on one account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Absolute tolerance for stop-loss/take-profit comparisons.
///
/// Terminals report prices with float representation jitter well below any
/// real price step; deltas under this threshold are never treated as a
/// modification.
pub const PRICE_TOLERANCE: Decimal = dec!(0.000001);

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// The order direction that closes a position on this side.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Snapshot of one open market position.
///
/// Positions are value objects: the venue reports a fresh snapshot every
/// poll and a new `Position` replaces the old one whenever anything changed.
/// `ticket` is unique within one account, not globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Venue-issued position identifier
    pub ticket: u64,

    /// Instrument symbol, e.g. "EURUSD"
    pub symbol: String,

    /// Position direction
    pub side: Side,

    /// Lot size (always positive)
    pub volume: Decimal,

    /// Fill price at open
    pub open_price: Decimal,

    /// Stop-loss price; zero means not set
    pub stop_loss: Decimal,

    /// Take-profit price; zero means not set
    pub take_profit: Decimal,

    /// Free-text comment; carries the correlation tag on replica positions
    #[serde(default)]
    pub comment: String,

    /// When the position was opened on the venue
    pub open_time: DateTime<Utc>,
}

impl Position {
    /// Whether stop-loss or take-profit moved beyond the price tolerance.
    ///
    /// Volume and open-price deltas are deliberately ignored: a partial fill
    /// is not a modification of protective levels.
    pub fn sl_tp_changed(&self, other: &Position) -> bool {
        (self.stop_loss - other.stop_loss).abs() > PRICE_TOLERANCE
            || (self.take_profit - other.take_profit).abs() > PRICE_TOLERANCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(stop_loss: Decimal, take_profit: Decimal) -> Position {
        Position {
            ticket: 1001,
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: dec!(1.0),
            open_price: dec!(1.1000),
            stop_loss,
            take_profit,
            comment: String::new(),
            open_time: Utc::now(),
        }
    }

    #[test]
    fn test_sl_change_above_tolerance() {
        let before = position(dec!(1.2000), dec!(0));
        let after = position(dec!(1.2050), dec!(0));
        assert!(after.sl_tp_changed(&before));
    }

    #[test]
    fn test_jitter_below_tolerance_ignored() {
        let before = position(dec!(1.2000), dec!(1.2500));
        let after = position(dec!(1.2000000001), dec!(1.2500));
        assert!(!after.sl_tp_changed(&before));
    }

    #[test]
    fn test_tp_change_detected_independently() {
        let before = position(dec!(1.1950), dec!(1.2500));
        let after = position(dec!(1.1950), dec!(1.2600));
        assert!(after.sl_tp_changed(&before));
    }

    #[test]
    fn test_volume_change_is_not_a_modification() {
        let mut before = position(dec!(1.1950), dec!(1.2500));
        let mut after = before.clone();
        before.volume = dec!(2.0);
        after.volume = dec!(1.5);
        assert!(!after.sl_tp_changed(&before));
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
        assert_eq!(Side::Buy.as_str(), "BUY");
    }
}
