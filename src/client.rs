//! Presale client: the aggregator and the transaction submitter composed over one session.
//!
//! Refreshes never fail towards the caller: an aggregation error is logged, published as
//! `SessionEvent::RefreshFailed` and the previous snapshot stays in place. Submissions
//! (approve / deposit / claim) do fail, and a failed submission leaves no trace in the
//! transaction log.

use std::sync::Arc;
use std::time::Duration;

use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, TxHash, U256};
use serde::Serialize;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::aggregator::{SaleAggregator, SaleContracts, SnapshotError};
use crate::amounts::{validate_purchase, DepositError};
use crate::chain::{
    desk_abi, encode_call, ChainError, ChainReader, Method, TransactionSubmitter, TxRequest,
    TxStatus,
};
use crate::session::{LoopState, Session, SessionEvent, TransactionRecord};
use crate::units::{biguint_to_u256, u256_to_biguint, UnitsError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no account connected")]
    NoAccount,
    #[error(transparent)]
    Deposit(#[from] DepositError),
    #[error("sale price is not known yet")]
    PriceUnavailable,
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Units(#[from] UnitsError),
    #[error("transaction {hash:?} not included after {waited:?}")]
    ConfirmationTimeout { hash: TxHash, waited: Duration },
    #[error("shutting down")]
    Cancelled,
}

/// Delays used by the client.
#[derive(Debug, Clone)]
pub struct ClientTiming {
    /// Wait after an account connects before the first read.
    pub settle_delay: Duration,
    /// Inclusion poll period.
    pub confirmation_interval: Duration,
    /// `None` waits for inclusion indefinitely.
    pub confirmation_timeout: Option<Duration>,
}

impl Default for ClientTiming {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            confirmation_interval: Duration::from_secs(1),
            confirmation_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied { seq: u64 },
    /// A newer refresh landed first.
    Superseded { seq: u64 },
    Failed,
    NoAccount,
}

/// A transaction that made it into a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub hash: TxHash,
    pub label: String,
    pub block: u64,
}

pub struct PresaleClient<R: ChainReader, S: TransactionSubmitter> {
    session: Arc<Session>,
    aggregator: SaleAggregator<R>,
    submitter: Arc<S>,
    abi: Abi,
    timing: ClientTiming,
    shutdown: CancellationToken,
}

impl<R, S> PresaleClient<R, S>
where
    R: ChainReader,
    S: TransactionSubmitter,
{
    pub fn new(
        reader: Arc<R>,
        submitter: Arc<S>,
        contracts: SaleContracts,
        timing: ClientTiming,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            session: Arc::new(Session::new(contracts.sale)),
            aggregator: SaleAggregator::new(reader, contracts),
            submitter,
            abi: desk_abi()?,
            timing,
            shutdown: CancellationToken::new(),
        })
    }

    /// Ties pending waits to `token`.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// One aggregation pass plus the payment balance. Never returns an error.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(account) = self.session.account() else {
            return RefreshOutcome::NoAccount;
        };
        let seq = self.session.begin_refresh();
        let owns_state = self
            .session
            .transition(LoopState::Idle, LoopState::Refreshing);

        let (snapshot, balance) = tokio::join!(
            self.aggregator.fetch(account),
            self.aggregator.payment_balance(account)
        );

        let outcome = match snapshot {
            Ok(snap) if self.session.account() != Some(account) => {
                debug!(seq, ?snap.address, "account changed during refresh; dropped");
                RefreshOutcome::Superseded { seq }
            }
            Ok(snap) => {
                if self.session.apply_snapshot(seq, snap) {
                    RefreshOutcome::Applied { seq }
                } else {
                    RefreshOutcome::Superseded { seq }
                }
            }
            Err(e) => {
                warn!(seq, error = %e, "refresh failed; keeping previous snapshot");
                self.session.emit(SessionEvent::RefreshFailed {
                    error: e.to_string(),
                });
                RefreshOutcome::Failed
            }
        };
        match balance {
            Ok(b) if self.session.account() == Some(account) => self.session.set_payment_balance(b),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "payment balance read failed"),
        }

        if owns_state {
            self.session
                .transition(LoopState::Refreshing, LoopState::Idle);
        }
        outcome
    }

    /// Re-evaluates the allowance flag; `None` when it could not be read.
    pub async fn check_allowance(&self) -> Option<bool> {
        let account = self.session.account()?;
        let snap = self.session.snapshot();
        match self.aggregator.allowance_ok(account, &snap).await {
            Ok(approved) => {
                self.session.set_approved(approved);
                Some(approved)
            }
            Err(e) => {
                warn!(error = %e, "allowance check failed");
                None
            }
        }
    }

    /// Switches to `account` and loads its state; `None` disconnects.
    #[instrument(skip(self))]
    pub async fn connect(&self, account: Option<Address>) -> RefreshOutcome {
        self.session.set_account(account);
        if account.is_none() {
            self.session.set_loading(false);
            return RefreshOutcome::NoAccount;
        }
        self.session.set_loading(true);
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                self.session.set_loading(false);
                return RefreshOutcome::Failed;
            }
            _ = sleep(self.timing.settle_delay) => {}
        }
        let outcome = self.refresh().await;
        self.check_allowance().await;
        self.session.set_loading(false);
        info!(?account, ?outcome, "account connected");
        outcome
    }

    /// Infinite payment-token approval for the sale contract.
    pub async fn approve(&self) -> Result<Confirmation, ClientError> {
        let contracts = self.aggregator.contracts();
        let data = encode_call(
            &self.abi,
            Method::Approve,
            &[Token::Address(contracts.sale), Token::Uint(U256::MAX)],
        )?;
        let label = format!("Approve {}", contracts.payment_token.symbol);
        self.send_transaction(contracts.payment_token.address, data, label)
            .await
    }

    /// Buys sale tokens for the payment amount in `input`.
    pub async fn deposit(&self, input: &str) -> Result<Confirmation, ClientError> {
        let contracts = self.aggregator.contracts();
        let snap = self.session.snapshot();
        let pay = validate_purchase(input, &self.session.payment_balance(), &snap)?;
        if snap.price.is_zero() {
            return Err(ClientError::PriceUnavailable);
        }

        let pay_decimals = contracts.payment_token.decimals;
        let pay_base = pay.trunc(pay_decimals).to_base_units(pay_decimals)?;
        let sale_base = biguint_to_u256(&(pay_base / u256_to_biguint(snap.price)))?;
        debug!(%pay, %sale_base, "purchase computed");

        let data = encode_call(&self.abi, Method::BuyTokens, &[Token::Uint(sale_base)])?;
        let label = format!("Invest {pay} {}", contracts.payment_token.symbol);
        self.send_transaction(contracts.sale, data, label).await
    }

    pub async fn claim(&self) -> Result<Confirmation, ClientError> {
        let contracts = self.aggregator.contracts();
        let data = encode_call(&self.abi, Method::ClaimTokens, &[])?;
        let label = format!("Claim {}", contracts.sale_token.symbol);
        self.send_transaction(contracts.sale, data, label).await
    }

    /// Submits, records and waits for inclusion. Loading stays on for the whole wait.
    #[instrument(skip(self, data))]
    pub async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        label: String,
    ) -> Result<Confirmation, ClientError> {
        let from = self.session.account().ok_or(ClientError::NoAccount)?;
        self.session.set_loading(true);

        let hash = match self
            .submitter
            .send_transaction(TxRequest { from, to, data })
            .await
        {
            Ok(hash) => hash,
            Err(e) => {
                warn!(%label, error = %e, "transaction failed");
                self.session.set_loading(false);
                self.session.emit(SessionEvent::TransactionFailed {
                    label,
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };

        info!(?hash, %label, "transaction sent");
        self.session.record_transaction(TransactionRecord {
            hash,
            label: label.clone(),
        });
        self.session.set_loop_state(LoopState::AwaitingConfirmation);

        let waited = self.wait_for_confirmation(hash).await;
        self.session.set_loop_state(LoopState::Idle);

        let result = match waited {
            Ok(block) => {
                self.session
                    .emit(SessionEvent::TransactionConfirmed { hash, block });
                self.check_allowance().await;
                Ok(Confirmation { hash, label, block })
            }
            Err(e) => Err(e),
        };
        self.session.set_loading(false);
        result
    }

    /// Polls inclusion of `hash` until it lands in a block, times out or the client shuts down.
    pub async fn wait_for_confirmation(&self, hash: TxHash) -> Result<u64, ClientError> {
        let started = Instant::now();
        let poll = async {
            loop {
                match self.submitter.transaction_status(hash).await {
                    Ok(TxStatus::Included { block }) => return block,
                    Ok(TxStatus::Pending) => {}
                    Err(e) => debug!(?hash, error = %e, "status lookup failed; still waiting"),
                }
                sleep(self.timing.confirmation_interval).await;
            }
        };

        let bounded = async {
            match self.timing.confirmation_timeout {
                Some(limit) => tokio::time::timeout(limit, poll).await.map_err(|_| {
                    ClientError::ConfirmationTimeout {
                        hash,
                        waited: started.elapsed(),
                    }
                }),
                None => Ok(poll.await),
            }
        };

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(ClientError::Cancelled),
            res = bounded => {
                if let Ok(block) = &res {
                    info!(?hash, block, "transaction confirmed");
                }
                res
            }
        }
    }
}
