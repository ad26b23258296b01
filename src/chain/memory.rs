//! In-memory chain for tests and local development.
//!
//! Reads are answered from a per-method value table; any method can be made to
//! fail, or the whole node can be taken "offline". Submitted transactions stay
//! pending until `include` (or `include_after_polls`) puts them into a block.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use ethers::types::{Address, TxHash, U256};
use parking_lot::Mutex;

use super::{
    ChainError, ChainReader, Method, RawValue, ReadCall, TransactionSubmitter, TxRequest, TxStatus,
};

/// Raw sale state as the contracts would report it (base units).
#[derive(Debug, Clone)]
pub struct SaleSeed {
    pub private_price: U256,
    pub public_price: U256,
    pub public_sale: bool,
    pub max_private: U256,
    pub max_public: U256,
    pub max_sold: U256,
    pub sold: U256,
    pub whitelisted: bool,
    pub amount_buyable: Option<U256>,
    pub claimable: bool,
    pub invested: U256,
    pub sale_token: Address,
    pub balance: U256,
    pub allowance: U256,
}

impl Default for SaleSeed {
    fn default() -> Self {
        Self {
            private_price: U256::zero(),
            public_price: U256::zero(),
            public_sale: false,
            max_private: U256::zero(),
            max_public: U256::zero(),
            max_sold: U256::zero(),
            sold: U256::zero(),
            whitelisted: false,
            amount_buyable: None,
            claimable: false,
            invested: U256::zero(),
            sale_token: Address::zero(),
            balance: U256::zero(),
            allowance: U256::zero(),
        }
    }
}

#[derive(Default)]
struct Inner {
    values: HashMap<Method, RawValue>,
    failing: HashSet<Method>,
    offline: Option<String>,
    reads: Vec<ReadCall>,
    submitted: Vec<TxRequest>,
    statuses: HashMap<TxHash, TxStatus>,
    polls: HashMap<TxHash, u32>,
    include_after: Option<u32>,
    reject_next: Option<String>,
    nonce: u64,
    block: u64,
}

#[derive(Default)]
pub struct MemoryChain {
    inner: Mutex<Inner>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(seed: SaleSeed) -> Self {
        let chain = Self::new();
        chain.seed(seed);
        chain
    }

    /// Replaces every sale/token value with `seed`.
    pub fn seed(&self, seed: SaleSeed) {
        self.set(Method::PrivateSalePrice, RawValue::Uint(seed.private_price));
        self.set(Method::PublicSalePrice, RawValue::Uint(seed.public_price));
        self.set(Method::PublicSale, RawValue::Bool(seed.public_sale));
        self.set(Method::MaxPrivateSalePerAccount, RawValue::Uint(seed.max_private));
        self.set(Method::MaxPublicSalePerAccount, RawValue::Uint(seed.max_public));
        self.set(Method::MaxSold, RawValue::Uint(seed.max_sold));
        self.set(Method::Sold, RawValue::Uint(seed.sold));
        self.set(Method::ApprovedBuyers, RawValue::Bool(seed.whitelisted));
        self.set(Method::IsClaimable, RawValue::Bool(seed.claimable));
        self.set(Method::Invested, RawValue::Uint(seed.invested));
        self.set(Method::SaleToken, RawValue::Address(seed.sale_token));
        self.set(Method::BalanceOf, RawValue::Uint(seed.balance));
        self.set(Method::Allowance, RawValue::Uint(seed.allowance));
        match seed.amount_buyable {
            Some(v) => {
                self.set(Method::AmountBuyable, RawValue::Uint(v));
                self.heal(Method::AmountBuyable);
            }
            None => self.fail(Method::AmountBuyable),
        }
    }

    pub fn set(&self, method: Method, value: RawValue) {
        self.inner.lock().values.insert(method, value);
    }

    pub fn set_uint(&self, method: Method, value: U256) {
        self.set(method, RawValue::Uint(value));
    }

    pub fn set_bool(&self, method: Method, value: bool) {
        self.set(method, RawValue::Bool(value));
    }

    /// Makes reads of `method` fail (as a reverting call would).
    pub fn fail(&self, method: Method) {
        self.inner.lock().failing.insert(method);
    }

    pub fn heal(&self, method: Method) {
        self.inner.lock().failing.remove(&method);
    }

    /// Every read fails with a transport error until `go_online`.
    pub fn go_offline(&self, reason: &str) {
        self.inner.lock().offline = Some(reason.to_string());
    }

    pub fn go_online(&self) {
        self.inner.lock().offline = None;
    }

    pub fn reject_next_submission(&self, reason: &str) {
        self.inner.lock().reject_next = Some(reason.to_string());
    }

    /// Puts `hash` into `block`.
    pub fn include(&self, hash: TxHash, block: u64) {
        self.inner
            .lock()
            .statuses
            .insert(hash, TxStatus::Included { block });
    }

    /// Submitted transactions get included after `polls` status lookups.
    pub fn include_after_polls(&self, polls: u32) {
        self.inner.lock().include_after = Some(polls);
    }

    pub fn submitted(&self) -> Vec<TxRequest> {
        self.inner.lock().submitted.clone()
    }

    pub fn reads(&self) -> Vec<ReadCall> {
        self.inner.lock().reads.clone()
    }

    pub fn status_polls(&self, hash: TxHash) -> u32 {
        self.inner.lock().polls.get(&hash).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ChainReader for MemoryChain {
    async fn read(&self, call: ReadCall) -> Result<RawValue, ChainError> {
        let mut inner = self.inner.lock();
        inner.reads.push(call.clone());
        if let Some(reason) = &inner.offline {
            return Err(ChainError::Transport(reason.clone()));
        }
        if inner.failing.contains(&call.method) {
            return Err(ChainError::Call {
                method: call.method.name(),
                reason: "execution reverted".into(),
            });
        }
        inner
            .values
            .get(&call.method)
            .cloned()
            .ok_or_else(|| ChainError::Call {
                method: call.method.name(),
                reason: "no value seeded".into(),
            })
    }
}

#[async_trait]
impl TransactionSubmitter for MemoryChain {
    async fn send_transaction(&self, req: TxRequest) -> Result<TxHash, ChainError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.reject_next.take() {
            return Err(ChainError::Rejected(reason));
        }
        inner.nonce += 1;
        let hash = TxHash::from_low_u64_be(inner.nonce);
        inner.submitted.push(req);
        inner.statuses.insert(hash, TxStatus::Pending);
        Ok(hash)
    }

    async fn transaction_status(&self, hash: TxHash) -> Result<TxStatus, ChainError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.offline {
            return Err(ChainError::Transport(reason.clone()));
        }
        let polls = {
            let p = inner.polls.entry(hash).or_insert(0);
            *p += 1;
            *p
        };
        let status = inner.statuses.get(&hash).copied().unwrap_or(TxStatus::Pending);
        if status == TxStatus::Pending {
            if let Some(after) = inner.include_after {
                if polls >= after {
                    inner.block += 1;
                    let included = TxStatus::Included { block: inner.block };
                    inner.statuses.insert(hash, included);
                    return Ok(included);
                }
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_follow_seed_and_failures() {
        let chain = MemoryChain::seeded(SaleSeed {
            sold: U256::from(5),
            ..SaleSeed::default()
        });
        let sale = Address::repeat_byte(1);
        assert_eq!(
            chain.read_uint(ReadCall::new(sale, Method::Sold)).await.unwrap(),
            U256::from(5)
        );
        assert!(chain
            .read_uint(ReadCall::new(sale, Method::AmountBuyable))
            .await
            .is_err());

        chain.go_offline("down");
        assert!(matches!(
            chain.read(ReadCall::new(sale, Method::Sold)).await,
            Err(ChainError::Transport(_))
        ));
        assert_eq!(chain.reads().len(), 3);
    }

    #[tokio::test]
    async fn transactions_stay_pending_until_included() {
        let chain = MemoryChain::new();
        let req = TxRequest {
            from: Address::repeat_byte(2),
            to: Address::repeat_byte(3),
            data: Default::default(),
        };
        let hash = chain.send_transaction(req).await.unwrap();
        assert_eq!(chain.transaction_status(hash).await.unwrap(), TxStatus::Pending);
        chain.include(hash, 77);
        assert_eq!(
            chain.transaction_status(hash).await.unwrap(),
            TxStatus::Included { block: 77 }
        );
        assert_eq!(chain.status_polls(hash), 2);
    }
}
