//! Aethernova presale desk.
//!
//! Architecture:
//! - `chain` defines the capabilities the desk consumes (`ChainReader`,
//!   `TransactionSubmitter`, `AccountProvider`) with a JSON-RPC and an in-memory implementation.
//! - `aggregator` turns one batch of concurrent reads into an immutable `SaleSnapshot`.
//! - `eligibility` and `amounts` are pure: predicates and the linked payment/sale amounts.
//! - `session` holds the mutable session state; `client` drives refreshes and transactions
//!   over it; `poller` keeps it fresh on a fixed period.
//! - `units` converts between base units and display amounts without floating point.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unused_must_use)]

pub mod aggregator;
pub mod amounts;
pub mod chain;
pub mod client;
pub mod config;
pub mod eligibility;
pub mod poller;
pub mod session;
pub mod snapshot;
pub mod telemetry;
pub mod units;

/// Prelude for embedding the desk.
pub mod prelude {
    pub use super::aggregator::{SaleAggregator, SaleContracts, SnapshotError, TokenInfo};
    pub use super::amounts::{AmountForm, AmountPair, DepositError};
    pub use super::chain::{
        AccountProvider, AccountSlot, ChainError, ChainReader, TransactionSubmitter, TxStatus,
    };
    pub use super::client::{ClientError, ClientTiming, Confirmation, PresaleClient, RefreshOutcome};
    pub use super::eligibility::{Eligibility, EligibilityContext};
    pub use super::poller::{PollerConfig, PollerError, PollerHandle};
    pub use super::session::{LoopState, Session, SessionEvent, TransactionRecord};
    pub use super::snapshot::{SalePhase, SaleSnapshot};
    pub use super::units::{to_base_units, to_display_units, Decimal, UnitsError};
}
