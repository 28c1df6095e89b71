//! In-memory venue used by dry runs and tests.
//!
//! Behaves like a tiny broker: per-login position books, venue-issued
//! tickets, and injectable failure behavior so every recovery path in the
//! copier can be exercised without a terminal.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::models::{AccountProfile, Position};

use super::{FillMode, Gateway, GatewayError, GatewaySession, OpenRequest};

/// Failure injection knobs. Everything defaults to off, which makes the
/// sim a well-behaved venue that fills everything instantly.
#[derive(Debug, Clone, Default)]
pub struct SimBehavior {
    /// Refuse every login
    pub fail_connect: bool,

    /// Requote this many orders before letting one fill
    pub requotes_before_fill: u32,

    /// Execution modes the venue pretends not to support
    pub rejected_fills: Vec<FillMode>,

    /// Reject every open / close / modify outright
    pub fail_opens: bool,
    pub fail_closes: bool,
    pub fail_modifies: bool,
}

#[derive(Debug, Default)]
struct SimAccount {
    positions: BTreeMap<u64, Position>,
    last_ticket: u64,
}

impl SimAccount {
    fn take_ticket(&mut self) -> u64 {
        self.last_ticket += 1;
        self.last_ticket
    }
}

/// Gateway backed by in-memory accounts instead of a terminal bridge.
pub struct SimGateway {
    accounts: Arc<Mutex<HashMap<u64, SimAccount>>>,
    behavior: SimBehavior,
    requotes_left: Arc<Mutex<u32>>,
}

impl SimGateway {
    pub fn new() -> Self {
        Self::with_behavior(SimBehavior::default())
    }

    pub fn with_behavior(behavior: SimBehavior) -> Self {
        let requotes_left = behavior.requotes_before_fill;
        Self {
            accounts: Arc::new(Mutex::new(HashMap::new())),
            behavior,
            requotes_left: Arc::new(Mutex::new(requotes_left)),
        }
    }

    /// Place a position directly on an account's book, bypassing order
    /// flow. Used to stage scenarios.
    pub async fn seed_position(&self, login: u64, position: Position) {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.entry(login).or_default();
        account.last_ticket = account.last_ticket.max(position.ticket);
        account.positions.insert(position.ticket, position);
    }

    /// Drop a position from an account's book, as if closed manually.
    pub async fn remove_position(&self, login: u64, ticket: u64) {
        let mut accounts = self.accounts.lock().await;
        if let Some(account) = accounts.get_mut(&login) {
            account.positions.remove(&ticket);
        }
    }

    /// Current book of one account, ticket-ascending.
    pub async fn positions(&self, login: u64) -> Vec<Position> {
        let accounts = self.accounts.lock().await;
        accounts
            .get(&login)
            .map(|a| a.positions.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for SimGateway {
    fn available(&self) -> bool {
        true
    }

    async fn connect(
        &self,
        profile: &AccountProfile,
        _timeout: Duration,
    ) -> Result<Box<dyn GatewaySession>, GatewayError> {
        if self.behavior.fail_connect {
            return Err(GatewayError::Session("simulated login refusal".to_string()));
        }

        Ok(Box::new(SimSession {
            login: profile.login,
            accounts: Arc::clone(&self.accounts),
            behavior: self.behavior.clone(),
            requotes_left: Arc::clone(&self.requotes_left),
        }))
    }
}

struct SimSession {
    login: u64,
    accounts: Arc<Mutex<HashMap<u64, SimAccount>>>,
    behavior: SimBehavior,
    requotes_left: Arc<Mutex<u32>>,
}

impl SimSession {
    /// Mode validation happens before quoting, like a real venue.
    fn check_fill(&self, fill: FillMode) -> Result<(), GatewayError> {
        if self.behavior.rejected_fills.contains(&fill) {
            return Err(GatewayError::UnsupportedFill(fill));
        }
        Ok(())
    }

    async fn check_requote(&self) -> Result<(), GatewayError> {
        let mut left = self.requotes_left.lock().await;
        if *left > 0 {
            *left -= 1;
            return Err(GatewayError::Requote);
        }
        Ok(())
    }
}

#[async_trait]
impl GatewaySession for SimSession {
    async fn open_positions(&mut self) -> Result<Vec<Position>, GatewayError> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .get(&self.login)
            .map(|a| a.positions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn open(&mut self, req: &OpenRequest) -> Result<u64, GatewayError> {
        if self.behavior.fail_opens {
            return Err(GatewayError::Rejected("simulated open failure".to_string()));
        }
        self.check_fill(req.fill)?;
        self.check_requote().await?;

        let mut accounts = self.accounts.lock().await;
        let account = accounts.entry(self.login).or_default();
        let ticket = account.take_ticket();

        account.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: req.symbol.clone(),
                side: req.side,
                volume: req.volume,
                // The sim has no market data; fills land at a synthetic price
                open_price: Decimal::ONE,
                stop_loss: req.stop_loss,
                take_profit: req.take_profit,
                comment: req.comment.clone(),
                open_time: Utc::now(),
            },
        );

        Ok(ticket)
    }

    async fn close(&mut self, target: &Position, fill: FillMode) -> Result<(), GatewayError> {
        if self.behavior.fail_closes {
            return Err(GatewayError::Rejected(
                "simulated close failure".to_string(),
            ));
        }
        self.check_fill(fill)?;
        self.check_requote().await?;

        let mut accounts = self.accounts.lock().await;
        let account = accounts.entry(self.login).or_default();
        if account.positions.remove(&target.ticket).is_none() {
            return Err(GatewayError::Rejected(format!(
                "position {} not found",
                target.ticket
            )));
        }
        Ok(())
    }

    async fn modify(
        &mut self,
        ticket: u64,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<(), GatewayError> {
        if self.behavior.fail_modifies {
            return Err(GatewayError::Rejected(
                "simulated modify failure".to_string(),
            ));
        }

        let mut accounts = self.accounts.lock().await;
        let account = accounts.entry(self.login).or_default();
        match account.positions.get_mut(&ticket) {
            Some(position) => {
                position.stop_loss = stop_loss;
                position.take_profit = take_profit;
                Ok(())
            }
            None => Err(GatewayError::Rejected(format!(
                "position {} not found",
                ticket
            ))),
        }
    }

    async fn disconnect(&mut self) {}
}
