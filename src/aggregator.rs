//! Sale state aggregator.
//!
//! One refresh = one batch of independent reads against the sale contract, issued
//! concurrently and combined into a `SaleSnapshot` only after all of them resolve.
//! `amountBuyable` is the single read allowed to fail: it falls back to a fixed
//! default instead of failing the batch.

use std::sync::Arc;

use ethers::types::{Address, U256};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::chain::{ChainError, ChainReader, Method, ReadCall};
use crate::snapshot::{SaleReads, SaleSnapshot, TokenDecimals};
use crate::units::{biguint_to_u256, u256_to_biguint, Decimal, UnitsError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("amount conversion failed: {0}")]
    Units(#[from] UnitsError),
}

/// A token the desk deals with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub decimals: u32,
    pub symbol: String,
}

/// Addresses and token metadata of one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleContracts {
    pub sale: Address,
    pub sale_token: TokenInfo,
    pub payment_token: TokenInfo,
}

impl SaleContracts {
    pub fn decimals(&self) -> TokenDecimals {
        TokenDecimals {
            sale: self.sale_token.decimals,
            payment: self.payment_token.decimals,
        }
    }
}

pub struct SaleAggregator<R: ChainReader> {
    reader: Arc<R>,
    contracts: SaleContracts,
}

impl<R: ChainReader> SaleAggregator<R> {
    pub fn new(reader: Arc<R>, contracts: SaleContracts) -> Self {
        Self { reader, contracts }
    }

    pub fn contracts(&self) -> &SaleContracts {
        &self.contracts
    }

    /// Reads everything the snapshot needs for `account`.
    #[instrument(skip(self), fields(sale = ?self.contracts.sale))]
    pub async fn fetch_reads(&self, account: Address) -> Result<SaleReads, SnapshotError> {
        let sale = self.contracts.sale;
        let r = &*self.reader;
        let call = |m: Method| ReadCall::new(sale, m);

        let (
            private_price,
            public_price,
            public_sale,
            max_private_per_account,
            max_public_per_account,
            max_sold,
            sold,
            whitelisted,
            amount_buyable,
            claimable,
            invested,
            sale_token,
        ) = tokio::try_join!(
            r.read_uint(call(Method::PrivateSalePrice)),
            r.read_uint(call(Method::PublicSalePrice)),
            r.read_bool(call(Method::PublicSale)),
            r.read_uint(call(Method::MaxPrivateSalePerAccount)),
            r.read_uint(call(Method::MaxPublicSalePerAccount)),
            r.read_uint(call(Method::MaxSold)),
            r.read_uint(call(Method::Sold)),
            r.read_bool(call(Method::ApprovedBuyers).arg(account)),
            async {
                // a reverting amountBuyable is degraded, not fatal
                Ok::<_, ChainError>(
                    match r.read_uint(call(Method::AmountBuyable).arg(account)).await {
                        Ok(v) => Some(v),
                        Err(e) => {
                            warn!(error = %e, "amountBuyable unavailable; using fallback");
                            None
                        }
                    },
                )
            },
            r.read_bool(call(Method::IsClaimable)),
            r.read_uint(call(Method::Invested).arg(account)),
            r.read_address(call(Method::SaleToken)),
        )?;

        Ok(SaleReads {
            private_price,
            public_price,
            public_sale,
            max_private_per_account,
            max_public_per_account,
            max_sold,
            sold,
            whitelisted,
            amount_buyable,
            claimable,
            invested,
            sale_token,
        })
    }

    /// One complete snapshot for `account`.
    pub async fn fetch(&self, account: Address) -> Result<SaleSnapshot, SnapshotError> {
        let reads = self.fetch_reads(account).await?;
        let snap = SaleSnapshot::from_reads(self.contracts.sale, &reads, self.contracts.decimals());
        debug!(phase = ?snap.phase, closed = snap.is_closed, "snapshot built");
        Ok(snap)
    }

    /// Payment-token balance of `account`, in display units.
    pub async fn payment_balance(&self, account: Address) -> Result<Decimal, SnapshotError> {
        let token = &self.contracts.payment_token;
        let raw = self
            .reader
            .read_uint(ReadCall::new(token.address, Method::BalanceOf).arg(account))
            .await?;
        Ok(Decimal::from_u256(raw, token.decimals))
    }

    /// Raw payment-token allowance granted by `account` to the sale contract.
    pub async fn allowance(&self, account: Address) -> Result<U256, SnapshotError> {
        let token = self.contracts.payment_token.address;
        Ok(self
            .reader
            .read_uint(
                ReadCall::new(token, Method::Allowance)
                    .arg(account)
                    .arg(self.contracts.sale),
            )
            .await?)
    }

    /// `allowance >= toBaseUnits(amountBuyable, saleDecimals) * rawPrice`.
    pub async fn allowance_ok(
        &self,
        account: Address,
        snap: &SaleSnapshot,
    ) -> Result<bool, SnapshotError> {
        let allowance = self.allowance(account).await?;
        let required = required_allowance(snap, self.contracts.sale_token.decimals)?;
        Ok(allowance >= required)
    }
}

/// Payment base units needed to buy the snapshot's amount-buyable.
pub fn required_allowance(snap: &SaleSnapshot, sale_decimals: u32) -> Result<U256, UnitsError> {
    let sale_base = snap.amount_buyable.trunc(sale_decimals).to_base_units(sale_decimals)?;
    let price = u256_to_biguint(snap.price);
    // saturate: anything above 2^256-1 can only be covered by an infinite approval
    Ok(biguint_to_u256(&(sale_base * price)).unwrap_or(U256::MAX))
}
