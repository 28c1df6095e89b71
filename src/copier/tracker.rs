//! Change detection between consecutive master snapshots.

use std::collections::BTreeMap;

use crate::models::{Position, Signal};

/// Tracks the last-seen set of master positions and turns each fresh
/// snapshot into the signals that explain the difference.
///
/// The retained map is the only state in the whole detection pipeline.
/// It is keyed by ticket; `BTreeMap` iteration gives every signal group a
/// deterministic ticket-ascending order.
#[derive(Debug, Default)]
pub struct PositionTracker {
    last_seen: BTreeMap<u64, Position>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            last_seen: BTreeMap::new(),
        }
    }

    /// Diff a fresh snapshot against the retained one and emit signals:
    /// opens first, then closes, then modifies, each group ticket-ascending.
    ///
    /// The retained snapshot is replaced wholesale afterwards, never
    /// patched, so a signal is emitted exactly once no matter what the
    /// consumer does with it.
    pub fn compute_signals(&mut self, snapshot: Vec<Position>) -> Vec<Signal> {
        let current: BTreeMap<u64, Position> =
            snapshot.into_iter().map(|p| (p.ticket, p)).collect();

        let mut signals = Vec::new();

        for (ticket, pos) in &current {
            if !self.last_seen.contains_key(ticket) {
                signals.push(Signal::Open {
                    ticket: *ticket,
                    symbol: pos.symbol.clone(),
                    side: pos.side,
                    volume: pos.volume,
                    stop_loss: pos.stop_loss,
                    take_profit: pos.take_profit,
                });
            }
        }

        for (ticket, pos) in &self.last_seen {
            if !current.contains_key(ticket) {
                signals.push(Signal::Close {
                    ticket: *ticket,
                    symbol: pos.symbol.clone(),
                });
            }
        }

        for (ticket, pos) in &current {
            if let Some(prev) = self.last_seen.get(ticket) {
                if pos.sl_tp_changed(prev) {
                    signals.push(Signal::Modify {
                        ticket: *ticket,
                        symbol: pos.symbol.clone(),
                        stop_loss: pos.stop_loss,
                        take_profit: pos.take_profit,
                    });
                }
            }
        }

        self.last_seen = current;
        signals
    }

    /// Seed the baseline without emitting signals. Positions already open
    /// when tracking starts are adopted as-is instead of being replayed.
    pub fn prime(&mut self, snapshot: Vec<Position>) {
        self.last_seen = snapshot.into_iter().map(|p| (p.ticket, p)).collect();
    }

    /// Forget the baseline. The next snapshot reports every open master
    /// position as an Open again.
    pub fn reset(&mut self) {
        self.last_seen.clear();
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, SignalKind};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn pos(ticket: u64, symbol: &str, sl: Decimal, tp: Decimal) -> Position {
        Position {
            ticket,
            symbol: symbol.to_string(),
            side: Side::Buy,
            volume: dec!(1.0),
            open_price: dec!(1.1000),
            stop_loss: sl,
            take_profit: tp,
            comment: String::new(),
            open_time: Utc::now(),
        }
    }

    #[test]
    fn test_first_snapshot_emits_opens() {
        let mut tracker = PositionTracker::new();
        let signals = tracker.compute_signals(vec![
            pos(2, "GBPUSD", dec!(0), dec!(0)),
            pos(1, "EURUSD", dec!(1.09), dec!(1.12)),
        ]);

        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].ticket(), 1);
        assert_eq!(signals[1].ticket(), 2);
        assert!(signals.iter().all(|s| s.kind() == SignalKind::Open));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_identical_snapshot_is_a_noop() {
        let mut tracker = PositionTracker::new();
        let snapshot = vec![pos(1, "EURUSD", dec!(1.09), dec!(1.12))];
        tracker.compute_signals(snapshot.clone());

        let signals = tracker.compute_signals(snapshot);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_missing_ticket_emits_close() {
        let mut tracker = PositionTracker::new();
        tracker.compute_signals(vec![
            pos(1, "EURUSD", dec!(0), dec!(0)),
            pos(2, "GBPUSD", dec!(0), dec!(0)),
        ]);

        let signals = tracker.compute_signals(vec![pos(2, "GBPUSD", dec!(0), dec!(0))]);
        assert_eq!(
            signals,
            vec![Signal::Close {
                ticket: 1,
                symbol: "EURUSD".to_string(),
            }]
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_sl_tp_move_emits_modify_with_new_levels() {
        let mut tracker = PositionTracker::new();
        tracker.compute_signals(vec![pos(1, "EURUSD", dec!(1.0900), dec!(1.1200))]);

        let signals = tracker.compute_signals(vec![pos(1, "EURUSD", dec!(1.0950), dec!(1.1200))]);
        assert_eq!(
            signals,
            vec![Signal::Modify {
                ticket: 1,
                symbol: "EURUSD".to_string(),
                stop_loss: dec!(1.0950),
                take_profit: dec!(1.1200),
            }]
        );
    }

    #[test]
    fn test_jitter_below_tolerance_emits_nothing() {
        let mut tracker = PositionTracker::new();
        tracker.compute_signals(vec![pos(1, "EURUSD", dec!(1.0900), dec!(1.1200))]);

        let signals =
            tracker.compute_signals(vec![pos(1, "EURUSD", dec!(1.0900000004), dec!(1.1200))]);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_volume_change_emits_nothing() {
        let mut tracker = PositionTracker::new();
        tracker.compute_signals(vec![pos(1, "EURUSD", dec!(1.09), dec!(1.12))]);

        let mut shrunk = pos(1, "EURUSD", dec!(1.09), dec!(1.12));
        shrunk.volume = dec!(0.4);
        let signals = tracker.compute_signals(vec![shrunk]);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_mixed_cycle_orders_opens_closes_modifies() {
        let mut tracker = PositionTracker::new();
        tracker.compute_signals(vec![
            pos(10, "EURUSD", dec!(1.09), dec!(1.12)),
            pos(20, "GBPUSD", dec!(1.25), dec!(1.30)),
        ]);

        // 10 closes, 20 moves its SL, 5 and 30 are new
        let signals = tracker.compute_signals(vec![
            pos(30, "USDJPY", dec!(0), dec!(0)),
            pos(20, "GBPUSD", dec!(1.26), dec!(1.30)),
            pos(5, "AUDUSD", dec!(0), dec!(0)),
        ]);

        let kinds: Vec<_> = signals.iter().map(|s| (s.kind(), s.ticket())).collect();
        assert_eq!(
            kinds,
            vec![
                (SignalKind::Open, 5),
                (SignalKind::Open, 30),
                (SignalKind::Close, 10),
                (SignalKind::Modify, 20),
            ]
        );
    }

    #[test]
    fn test_reset_replays_opens() {
        let mut tracker = PositionTracker::new();
        let snapshot = vec![pos(1, "EURUSD", dec!(0), dec!(0))];
        tracker.compute_signals(snapshot.clone());
        assert!(!tracker.is_empty());

        tracker.reset();
        assert!(tracker.is_empty());

        let signals = tracker.compute_signals(snapshot);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind(), SignalKind::Open);
    }

    #[test]
    fn test_prime_adopts_without_signals() {
        let mut tracker = PositionTracker::new();
        let snapshot = vec![pos(1, "EURUSD", dec!(0), dec!(0))];
        tracker.prime(snapshot.clone());
        assert_eq!(tracker.len(), 1);

        let signals = tracker.compute_signals(snapshot);
        assert!(signals.is_empty());
    }
}
