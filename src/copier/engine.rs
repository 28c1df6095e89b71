//! Replication engine: the copy loop that keeps replicas tracking the master.
//!
//! Handles:
//! - Polling the master account for its open positions
//! - Diffing consecutive snapshots into open/close/modify signals
//! - Applying every signal to every enabled replica with bounded retries
//! - Folding per-replica outcomes into lifetime counters

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::copier::correlate;
use crate::copier::PositionTracker;
use crate::gateway::{FillMode, Gateway, GatewayError, GatewaySession, OpenRequest};
use crate::models::{
    AccountProfile, CopyOutcome, CopyStatus, Position, Signal, SignalKind, PRICE_TOLERANCE,
};

/// One replica account and the gateway that reaches it.
pub struct Replica {
    pub profile: AccountProfile,
    pub gateway: Arc<dyn Gateway>,
}

/// Lifetime counters for one run.
#[derive(Debug, Clone)]
pub struct CopyStats {
    pub opens: u64,
    pub closes: u64,
    pub modifies: u64,
    pub errors: u64,
    pub cycles: u64,
    pub started_at: DateTime<Utc>,
}

impl CopyStats {
    pub fn new() -> Self {
        Self {
            opens: 0,
            closes: 0,
            modifies: 0,
            errors: 0,
            cycles: 0,
            started_at: Utc::now(),
        }
    }
}

impl Default for CopyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CopyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uptime = (Utc::now() - self.started_at).num_seconds();
        writeln!(f, "=== Copier Statistics ===")?;
        writeln!(f, "Uptime:   {}s", uptime)?;
        writeln!(f, "Cycles:   {}", self.cycles)?;
        writeln!(f, "Opens:    {}", self.opens)?;
        writeln!(f, "Closes:   {}", self.closes)?;
        writeln!(f, "Modifies: {}", self.modifies)?;
        writeln!(f, "Errors:   {}", self.errors)?;
        Ok(())
    }
}

/// Attempt bookkeeping for one (signal, replica) application.
///
/// Requotes consume an attempt but no delay, since the venue reads a fresh
/// price on the next call anyway. An unsupported fill mode consumes no
/// attempt: the order never reached the book, only the mode advances. The
/// learned mode then sticks for the rest of the application.
struct RetryState<'a> {
    max: u32,
    used: u32,
    fill: FillMode,
    delay: Duration,
    replica: &'a str,
}

impl<'a> RetryState<'a> {
    fn new(settings: &Settings, replica: &'a str) -> Self {
        Self {
            max: settings.max_retries,
            used: 0,
            fill: FillMode::PREFERENCE[0],
            delay: settings.retry_delay(),
            replica,
        }
    }

    /// Digest one failure. Returns whether another attempt should be made,
    /// sleeping first when the failure kind warrants it.
    async fn retry_after(&mut self, err: &GatewayError) -> bool {
        match err {
            GatewayError::UnsupportedFill(mode) => match mode.next() {
                Some(next) => {
                    warn!(
                        replica = self.replica,
                        from = mode.as_str(),
                        to = next.as_str(),
                        "Fill mode unsupported, trying the next one"
                    );
                    self.fill = next;
                    true
                }
                None => false,
            },
            GatewayError::Requote => {
                self.used += 1;
                if self.used >= self.max {
                    return false;
                }
                debug!(
                    replica = self.replica,
                    attempt = self.used,
                    "Requoted, retrying at a fresh price"
                );
                true
            }
            other => {
                self.used += 1;
                if self.used >= self.max {
                    return false;
                }
                warn!(
                    replica = self.replica,
                    error = %other,
                    attempt = self.used,
                    "Attempt failed, retrying"
                );
                sleep(self.delay).await;
                true
            }
        }
    }
}

/// The replication orchestrator.
///
/// Owns the change detector, the per-account gateways, and the counters.
/// Everything that can go wrong during a cycle is contained at (signal,
/// replica) scope or, for master polls, at cycle scope; nothing inside the
/// loop terminates the run.
pub struct Copier {
    master: AccountProfile,
    master_gateway: Arc<dyn Gateway>,
    replicas: Vec<Replica>,
    settings: Settings,
    tracker: PositionTracker,
    stats: CopyStats,
    shutdown: Arc<AtomicBool>,
}

impl Copier {
    pub fn new(
        master: AccountProfile,
        master_gateway: Arc<dyn Gateway>,
        replicas: Vec<Replica>,
        settings: Settings,
    ) -> Self {
        Self {
            master,
            master_gateway,
            replicas,
            settings,
            tracker: PositionTracker::new(),
            stats: CopyStats::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> &CopyStats {
        &self.stats
    }

    /// Main run loop. Polls at a fixed cadence until shutdown is
    /// requested; the flag is only observed between cycles, so a cycle
    /// that has started always finishes.
    pub async fn run(&mut self) -> Result<()> {
        if !self.master_gateway.available() {
            bail!("Master gateway is not available");
        }
        for replica in &self.replicas {
            if !replica.gateway.available() {
                bail!("Gateway for replica {} is not available", replica.profile.name);
            }
        }

        if self.settings.copy_pending_orders {
            warn!("copy_pending_orders is set, but only open market positions are copied");
        }

        info!(
            master = self.master.login,
            replicas = self.replicas.len(),
            poll_interval_ms = self.settings.poll_interval_ms,
            "Starting copy loop"
        );

        let mut poll_interval = interval(self.settings.poll_interval());

        // Register shutdown handler
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        });

        while !self.shutdown.load(Ordering::SeqCst) {
            poll_interval.tick().await;

            if let Err(e) = self.run_cycle().await {
                warn!(error = %e, "Cycle aborted");
            }
        }

        info!(cycles = self.stats.cycles, "Copy loop stopped");
        Ok(())
    }

    /// One polling cycle. An error means the master could not be read;
    /// the baseline is left untouched so the next cycle sees the same
    /// diff this one would have.
    pub async fn run_cycle(&mut self) -> Result<()> {
        self.stats.cycles += 1;

        // 1. Fresh master snapshot
        let snapshot = self.poll_master().await.context("Master poll failed")?;

        // 2. Diff against the previous cycle
        let open_count = snapshot.len();
        let signals = self.tracker.compute_signals(snapshot);
        if signals.is_empty() {
            debug!(open_positions = open_count, "No master changes");
            return Ok(());
        }

        info!(
            signals = signals.len(),
            open_positions = open_count,
            "Master book changed"
        );

        // 3. Apply every signal to every replica, replicas in config order
        for signal in &signals {
            info!(
                kind = %signal.kind(),
                origin = signal.ticket(),
                symbol = %signal.symbol(),
                "Replicating signal"
            );

            let mut outcomes = Vec::with_capacity(self.replicas.len());
            for replica in &self.replicas {
                outcomes.push(self.apply_to_replica(signal, replica).await);
            }

            // 4. Fold outcomes into the lifetime counters
            for outcome in outcomes {
                self.record_outcome(outcome);
            }
        }

        Ok(())
    }

    /// Read the master's open positions through a throwaway session.
    async fn poll_master(&self) -> Result<Vec<Position>, GatewayError> {
        let mut session = self
            .master_gateway
            .connect(&self.master, self.settings.connect_timeout())
            .await?;
        let snapshot = session.open_positions().await;
        session.disconnect().await;
        snapshot
    }

    /// Apply one signal to one replica. Never fails: any fault becomes a
    /// Failed outcome, so one replica can never affect another.
    async fn apply_to_replica(&self, signal: &Signal, replica: &Replica) -> CopyOutcome {
        // Sizing can rule an open out before any session is spent on it
        if let Signal::Open { ticket, symbol, volume, .. } = signal {
            let lot = replica.profile.replica_volume(*volume);
            if lot <= Decimal::ZERO {
                return CopyOutcome::skipped(
                    &replica.profile,
                    SignalKind::Open,
                    *ticket,
                    symbol,
                    format!("sized volume {} is not tradable", lot),
                );
            }
        }

        match self.try_apply(signal, replica).await {
            Ok(outcome) => outcome,
            // Session-level faults (login refused, book unreadable) land here
            Err(e) => CopyOutcome::failed(
                &replica.profile,
                signal.kind(),
                signal.ticket(),
                signal.symbol(),
                e.to_string(),
            ),
        }
    }

    /// Connect, apply, disconnect. Exactly one session is live at a time.
    async fn try_apply(
        &self,
        signal: &Signal,
        replica: &Replica,
    ) -> Result<CopyOutcome, GatewayError> {
        let profile = &replica.profile;
        let mut session = replica
            .gateway
            .connect(profile, self.settings.connect_timeout())
            .await?;

        let outcome = match signal {
            Signal::Open {
                ticket,
                symbol,
                side,
                volume,
                stop_loss,
                take_profit,
            } => {
                let request = OpenRequest {
                    symbol: symbol.clone(),
                    side: *side,
                    volume: profile.replica_volume(*volume),
                    stop_loss: if self.settings.copy_stop_loss {
                        *stop_loss
                    } else {
                        Decimal::ZERO
                    },
                    take_profit: if self.settings.copy_take_profit {
                        *take_profit
                    } else {
                        Decimal::ZERO
                    },
                    comment: correlate::tag_for(*ticket),
                    fill: FillMode::PREFERENCE[0],
                };
                self.apply_open(session.as_mut(), profile, *ticket, request)
                    .await
            }
            Signal::Close { ticket, symbol } => {
                self.apply_close(session.as_mut(), profile, *ticket, symbol)
                    .await
            }
            Signal::Modify {
                ticket,
                symbol,
                stop_loss,
                take_profit,
            } => {
                self.apply_modify(
                    session.as_mut(),
                    profile,
                    *ticket,
                    symbol,
                    *stop_loss,
                    *take_profit,
                )
                .await
            }
        };

        session.disconnect().await;
        outcome
    }

    async fn apply_open(
        &self,
        session: &mut dyn GatewaySession,
        profile: &AccountProfile,
        origin: u64,
        mut request: OpenRequest,
    ) -> Result<CopyOutcome, GatewayError> {
        // A tag already on the book means this master position was mirrored
        // before, by an earlier run or a replayed signal
        let book = session.open_positions().await?;
        if let Some(existing) = correlate::find_mirrored(&book, origin) {
            return Ok(CopyOutcome::skipped(
                profile,
                SignalKind::Open,
                origin,
                &request.symbol,
                format!("already mirrored as ticket {}", existing.ticket),
            ));
        }

        let mut retry = RetryState::new(&self.settings, &profile.name);
        loop {
            request.fill = retry.fill;
            match session.open(&request).await {
                Ok(ticket) => {
                    return Ok(CopyOutcome::success(
                        profile,
                        SignalKind::Open,
                        origin,
                        &request.symbol,
                        Some(ticket),
                    ));
                }
                Err(e) => {
                    if !retry.retry_after(&e).await {
                        return Ok(CopyOutcome::failed(
                            profile,
                            SignalKind::Open,
                            origin,
                            &request.symbol,
                            e.to_string(),
                        ));
                    }
                }
            }
        }
    }

    async fn apply_close(
        &self,
        session: &mut dyn GatewaySession,
        profile: &AccountProfile,
        origin: u64,
        symbol: &str,
    ) -> Result<CopyOutcome, GatewayError> {
        let book = session.open_positions().await?;
        let Some(target) = correlate::find_mirrored(&book, origin) else {
            // Closed by hand on the replica, or the open never succeeded
            return Ok(CopyOutcome::skipped(
                profile,
                SignalKind::Close,
                origin,
                symbol,
                "no mirrored position",
            ));
        };

        let mut retry = RetryState::new(&self.settings, &profile.name);
        loop {
            match session.close(target, retry.fill).await {
                Ok(()) => {
                    return Ok(CopyOutcome::success(
                        profile,
                        SignalKind::Close,
                        origin,
                        symbol,
                        Some(target.ticket),
                    ));
                }
                Err(e) => {
                    if !retry.retry_after(&e).await {
                        return Ok(CopyOutcome::failed(
                            profile,
                            SignalKind::Close,
                            origin,
                            symbol,
                            e.to_string(),
                        ));
                    }
                }
            }
        }
    }

    async fn apply_modify(
        &self,
        session: &mut dyn GatewaySession,
        profile: &AccountProfile,
        origin: u64,
        symbol: &str,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<CopyOutcome, GatewayError> {
        let book = session.open_positions().await?;
        let Some(target) = correlate::find_mirrored(&book, origin) else {
            return Ok(CopyOutcome::skipped(
                profile,
                SignalKind::Modify,
                origin,
                symbol,
                "no mirrored position",
            ));
        };

        // An uncopied level keeps whatever the replica has now
        let new_sl = if self.settings.copy_stop_loss {
            stop_loss
        } else {
            target.stop_loss
        };
        let new_tp = if self.settings.copy_take_profit {
            take_profit
        } else {
            target.take_profit
        };

        if (new_sl - target.stop_loss).abs() <= PRICE_TOLERANCE
            && (new_tp - target.take_profit).abs() <= PRICE_TOLERANCE
        {
            return Ok(CopyOutcome::skipped(
                profile,
                SignalKind::Modify,
                origin,
                symbol,
                "levels already match",
            ));
        }

        let mut retry = RetryState::new(&self.settings, &profile.name);
        loop {
            match session.modify(target.ticket, new_sl, new_tp).await {
                Ok(()) => {
                    return Ok(CopyOutcome::success(
                        profile,
                        SignalKind::Modify,
                        origin,
                        symbol,
                        Some(target.ticket),
                    ));
                }
                Err(e) => {
                    if !retry.retry_after(&e).await {
                        return Ok(CopyOutcome::failed(
                            profile,
                            SignalKind::Modify,
                            origin,
                            symbol,
                            e.to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Log an outcome and fold it into the counters. Successes count under
    /// their kind, failures under errors, skips under nothing.
    fn record_outcome(&mut self, outcome: CopyOutcome) {
        match outcome.status {
            CopyStatus::Success => {
                match outcome.kind {
                    SignalKind::Open => self.stats.opens += 1,
                    SignalKind::Close => self.stats.closes += 1,
                    SignalKind::Modify => self.stats.modifies += 1,
                }
                info!(
                    replica = %outcome.replica,
                    login = outcome.login,
                    kind = %outcome.kind,
                    origin = outcome.origin_ticket,
                    ticket = ?outcome.replica_ticket,
                    symbol = %outcome.symbol,
                    "Copy succeeded"
                );
            }
            CopyStatus::Failed => {
                self.stats.errors += 1;
                warn!(
                    replica = %outcome.replica,
                    login = outcome.login,
                    kind = %outcome.kind,
                    origin = outcome.origin_ticket,
                    symbol = %outcome.symbol,
                    error = outcome.detail.as_deref().unwrap_or("unknown"),
                    "Copy failed"
                );
            }
            CopyStatus::Skipped => {
                debug!(
                    replica = %outcome.replica,
                    kind = %outcome.kind,
                    origin = outcome.origin_ticket,
                    reason = outcome.detail.as_deref().unwrap_or(""),
                    "Copy skipped"
                );
            }
        }
    }
}
