//! Sale snapshot: one consistent view of the sale for the connected account.
//!
//! `SaleReads` is the strictly typed record of every raw value the aggregator
//! fetched; `SaleSnapshot::from_reads` turns it into human-scale amounts:
//! - price in quote = raw price * 10^sale_decimals / 10^payment_decimals,
//!   raw price taken from the public or private field depending on the phase;
//! - a cap below `CLOSED_CAP_THRESHOLD` means "not configured": closed, cap shown as the threshold.

use ethers::types::{Address, U256};
use num_bigint::BigUint;
use serde::Serialize;

use crate::units::{u256_to_biguint, Decimal};

/// Caps below this value (in display units) mark the sale as not yet configured.
pub const CLOSED_CAP_THRESHOLD: u64 = 100_000;

/// Amount buyable substituted when the contract rejects the read.
pub const AMOUNT_BUYABLE_FALLBACK: u64 = 200;

/// Decimal counts of the two tokens involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenDecimals {
    pub sale: u32,
    pub payment: u32,
}

/// Sale phase; exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SalePhase {
    Private,
    Public,
}

/// Raw values read from the sale contract for one account (base units).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleReads {
    pub private_price: U256,
    pub public_price: U256,
    pub public_sale: bool,
    pub max_private_per_account: U256,
    pub max_public_per_account: U256,
    pub max_sold: U256,
    pub sold: U256,
    pub whitelisted: bool,
    /// `None` when the contract rejected the read.
    pub amount_buyable: Option<U256>,
    pub claimable: bool,
    pub invested: U256,
    pub sale_token: Address,
}

/// Immutable view of the sale, replaced wholesale on every successful refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleSnapshot {
    pub address: Address,
    pub sale_token: Address,
    pub phase: SalePhase,
    /// Active raw price: payment base units per sale base unit.
    pub price: U256,
    pub price_in_quote: Decimal,
    pub max_sold: Decimal,
    pub sold: Decimal,
    pub deposited: Decimal,
    pub amount_buyable: Decimal,
    pub max_per_account_private: Decimal,
    pub max_per_account_public: Decimal,
    pub is_whitelisted: bool,
    pub is_closed: bool,
    pub is_claim_period: bool,
}

impl SaleSnapshot {
    /// Placeholder before the first successful refresh; every predicate reads false on it.
    pub fn unset(address: Address) -> Self {
        let (max_sold, is_closed) = normalize_cap(Decimal::zero());
        Self {
            address,
            sale_token: Address::zero(),
            phase: SalePhase::Private,
            price: U256::zero(),
            price_in_quote: Decimal::zero(),
            max_sold,
            sold: Decimal::zero(),
            deposited: Decimal::zero(),
            amount_buyable: Decimal::zero(),
            max_per_account_private: Decimal::zero(),
            max_per_account_public: Decimal::zero(),
            is_whitelisted: false,
            is_closed,
            is_claim_period: false,
        }
    }

    pub fn from_reads(address: Address, reads: &SaleReads, decimals: TokenDecimals) -> Self {
        let phase = if reads.public_sale {
            SalePhase::Public
        } else {
            SalePhase::Private
        };
        let price = match phase {
            SalePhase::Public => reads.public_price,
            SalePhase::Private => reads.private_price,
        };
        let display = |v: U256| Decimal::from_u256(v, decimals.sale);
        let (max_sold, is_closed) = normalize_cap(display(reads.max_sold));
        let amount_buyable = reads
            .amount_buyable
            .map(display)
            .unwrap_or_else(|| Decimal::from_integer(AMOUNT_BUYABLE_FALLBACK));

        Self {
            address,
            sale_token: reads.sale_token,
            phase,
            price,
            price_in_quote: price_in_quote(price, decimals),
            max_sold,
            sold: display(reads.sold),
            deposited: display(reads.invested),
            amount_buyable,
            max_per_account_private: display(reads.max_private_per_account),
            max_per_account_public: display(reads.max_public_per_account),
            is_whitelisted: reads.whitelisted,
            is_closed,
            is_claim_period: reads.claimable,
        }
    }

    pub fn is_public_phase(&self) -> bool {
        self.phase == SalePhase::Public
    }

    pub fn is_private_phase(&self) -> bool {
        self.phase == SalePhase::Private
    }

    /// Per-account cap of the current phase.
    pub fn phase_cap(&self) -> &Decimal {
        match self.phase {
            SalePhase::Private => &self.max_per_account_private,
            SalePhase::Public => &self.max_per_account_public,
        }
    }
}

/// `raw * 10^sale / 10^payment`, exact.
pub fn price_in_quote(raw: U256, decimals: TokenDecimals) -> Decimal {
    let scaled = u256_to_biguint(raw) * BigUint::from(10u32).pow(decimals.sale);
    Decimal::from_base_units(scaled, decimals.payment)
}

/// Returns `(displayed cap, is_closed)`.
fn normalize_cap(cap: Decimal) -> (Decimal, bool) {
    let threshold = Decimal::from_integer(CLOSED_CAP_THRESHOLD);
    if cap < threshold {
        (threshold, true)
    } else {
        (cap, false)
    }
}
