//! Refresh loop: periodic re-aggregation as a cancellable background task.
//!
//! Startup waits `provider_delay`, connects the current account, then refreshes every
//! `refresh_interval`. An account change re-runs connect and restarts the period. Ticks
//! that land while a transaction is awaiting confirmation are skipped. Dropping the
//! handle does not stop the task; call `cancel` or `shutdown`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::{AccountProvider, ChainReader, TransactionSubmitter};
use crate::client::PresaleClient;
use crate::session::LoopState;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub refresh_interval: Duration,
    pub provider_delay: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            provider_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollerError {
    #[error("refresh interval must be non-zero")]
    ZeroInterval,
}

pub struct PollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancels the loop and waits for it to exit.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.cancel.cancel();
        self.join.await
    }
}

/// Starts the loop. It also stops when the client's shutdown token fires.
pub fn spawn<R, S, A>(
    client: Arc<PresaleClient<R, S>>,
    accounts: Arc<A>,
    cfg: PollerConfig,
) -> Result<PollerHandle, PollerError>
where
    R: ChainReader,
    S: TransactionSubmitter,
    A: AccountProvider,
{
    if cfg.refresh_interval.is_zero() {
        return Err(PollerError::ZeroInterval);
    }
    let cancel = client.shutdown_token().child_token();
    let join = tokio::spawn(run(client, accounts, cfg, cancel.clone()));
    Ok(PollerHandle { cancel, join })
}

async fn run<R, S, A>(
    client: Arc<PresaleClient<R, S>>,
    accounts: Arc<A>,
    cfg: PollerConfig,
    cancel: CancellationToken,
) where
    R: ChainReader,
    S: TransactionSubmitter,
    A: AccountProvider,
{
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = sleep(cfg.provider_delay) => {}
    }

    let mut rx = accounts.watch_accounts();
    let initial = *rx.borrow_and_update();
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = client.connect(initial) => {}
    }

    let period = cfg.refresh_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut accounts_open = true;
    info!(?period, "refresh loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed(), if accounts_open => {
                if changed.is_err() {
                    warn!("account provider gone; keeping current account");
                    accounts_open = false;
                    continue;
                }
                let account = *rx.borrow_and_update();
                info!(?account, "account changed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = client.connect(account) => {}
                }
                ticker.reset();
            }
            _ = ticker.tick() => {
                let session = client.session();
                if session.loop_state() == LoopState::AwaitingConfirmation {
                    debug!("awaiting confirmation; tick skipped");
                    continue;
                }
                if session.account().is_none() {
                    continue;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = client.refresh() => debug!(?outcome, "tick"),
                }
            }
        }
    }
    info!("refresh loop stopped");
}
