//! Chain capabilities consumed by the presale core.
//!
//! Architecture:
//! - `ChainReader` performs read-only contract calls keyed by `Method`.
//! - `TransactionSubmitter` sends `{from, to, data}` requests and reports inclusion.
//! - `AccountProvider` exposes the connected account and its change notifications.
//!
//! Values cross the boundary as `RawValue` and are checked against the method's
//! declared output kind right here, so malformed data never reaches the aggregator.
//!
//! Implementations: `eth::EthChain` (JSON-RPC node) and `memory::MemoryChain` (tests/dev).

pub mod eth;
pub mod memory;

use async_trait::async_trait;
use ethers::abi::{parse_abi, Abi, Token};
use ethers::types::{Address, Bytes, TxHash, U256};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("call `{method}` failed: {reason}")]
    Call { method: &'static str, reason: String },
    #[error("`{method}` returned {got}, expected {expected:?}")]
    Schema {
        method: &'static str,
        expected: ValueKind,
        got: String,
    },
    #[error("abi: {0}")]
    Abi(String),
    #[error("chain id mismatch: expected {expected}, got {got}")]
    ChainIdMismatch { expected: u64, got: u64 },
    #[error("submission rejected: {0}")]
    Rejected(String),
}

/// Output kind declared for a read method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Uint,
    Bool,
    Address,
    None,
}

/// Contract methods used by the desk (sale contract + ERC-20 payment token).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    PrivateSalePrice,
    PublicSalePrice,
    PublicSale,
    MaxPrivateSalePerAccount,
    MaxPublicSalePerAccount,
    MaxSold,
    Sold,
    ApprovedBuyers,
    AmountBuyable,
    IsClaimable,
    Invested,
    SaleToken,
    BuyTokens,
    ClaimTokens,
    BalanceOf,
    Allowance,
    Approve,
}

impl Method {
    pub const ALL: [Method; 17] = [
        Method::PrivateSalePrice,
        Method::PublicSalePrice,
        Method::PublicSale,
        Method::MaxPrivateSalePerAccount,
        Method::MaxPublicSalePerAccount,
        Method::MaxSold,
        Method::Sold,
        Method::ApprovedBuyers,
        Method::AmountBuyable,
        Method::IsClaimable,
        Method::Invested,
        Method::SaleToken,
        Method::BuyTokens,
        Method::ClaimTokens,
        Method::BalanceOf,
        Method::Allowance,
        Method::Approve,
    ];

    /// On-chain function name.
    pub fn name(self) -> &'static str {
        match self {
            Method::PrivateSalePrice => "privateSalePrice",
            Method::PublicSalePrice => "publicSalePrice",
            Method::PublicSale => "publicSale",
            Method::MaxPrivateSalePerAccount => "MAX_PRIVATE_SALE_PER_ACCOUNT",
            Method::MaxPublicSalePerAccount => "MAX_PUBLIC_SALE_PER_ACCOUNT",
            Method::MaxSold => "MAX_SOLD",
            Method::Sold => "sold",
            Method::ApprovedBuyers => "approvedBuyers",
            Method::AmountBuyable => "amountBuyable",
            Method::IsClaimable => "isClaimable",
            Method::Invested => "invested",
            Method::SaleToken => "INDEX",
            Method::BuyTokens => "buyINDEX",
            Method::ClaimTokens => "claimINDEX",
            Method::BalanceOf => "balanceOf",
            Method::Allowance => "allowance",
            Method::Approve => "approve",
        }
    }

    /// Human-readable ABI line.
    pub fn signature(self) -> &'static str {
        match self {
            Method::PrivateSalePrice => "function privateSalePrice() view returns (uint256)",
            Method::PublicSalePrice => "function publicSalePrice() view returns (uint256)",
            Method::PublicSale => "function publicSale() view returns (bool)",
            Method::MaxPrivateSalePerAccount => {
                "function MAX_PRIVATE_SALE_PER_ACCOUNT() view returns (uint256)"
            }
            Method::MaxPublicSalePerAccount => {
                "function MAX_PUBLIC_SALE_PER_ACCOUNT() view returns (uint256)"
            }
            Method::MaxSold => "function MAX_SOLD() view returns (uint256)",
            Method::Sold => "function sold() view returns (uint256)",
            Method::ApprovedBuyers => "function approvedBuyers(address) view returns (bool)",
            Method::AmountBuyable => "function amountBuyable(address) view returns (uint256)",
            Method::IsClaimable => "function isClaimable() view returns (bool)",
            Method::Invested => "function invested(address) view returns (uint256)",
            Method::SaleToken => "function INDEX() view returns (address)",
            Method::BuyTokens => "function buyINDEX(uint256 amount)",
            Method::ClaimTokens => "function claimINDEX()",
            Method::BalanceOf => "function balanceOf(address) view returns (uint256)",
            Method::Allowance => "function allowance(address,address) view returns (uint256)",
            Method::Approve => "function approve(address spender, uint256 value) returns (bool)",
        }
    }

    pub fn output(self) -> ValueKind {
        match self {
            Method::PublicSale | Method::ApprovedBuyers | Method::IsClaimable => ValueKind::Bool,
            Method::SaleToken => ValueKind::Address,
            Method::BuyTokens | Method::ClaimTokens | Method::Approve => ValueKind::None,
            _ => ValueKind::Uint,
        }
    }
}

/// Builds the ABI covering every `Method`.
pub fn desk_abi() -> Result<Abi, ChainError> {
    let lines: Vec<&str> = Method::ALL.iter().map(|m| m.signature()).collect();
    parse_abi(&lines).map_err(|e| ChainError::Abi(e.to_string()))
}

/// ABI-encodes a call to `method` with `args`.
pub fn encode_call(abi: &Abi, method: Method, args: &[Token]) -> Result<Bytes, ChainError> {
    let function = abi
        .function(method.name())
        .map_err(|e| ChainError::Abi(e.to_string()))?;
    let data = function
        .encode_input(args)
        .map_err(|e| ChainError::Abi(format!("{}: {e}", method.name())))?;
    Ok(Bytes::from(data))
}

/// Raw value returned by a read, before schema checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Uint(U256),
    Bool(bool),
    Address(Address),
}

impl RawValue {
    fn describe(&self) -> String {
        match self {
            RawValue::Uint(v) => format!("uint {v}"),
            RawValue::Bool(v) => format!("bool {v}"),
            RawValue::Address(v) => format!("address {v:?}"),
        }
    }

    pub fn into_uint(self, method: Method) -> Result<U256, ChainError> {
        match self {
            RawValue::Uint(v) => Ok(v),
            other => Err(schema_error(method, ValueKind::Uint, &other)),
        }
    }

    pub fn into_bool(self, method: Method) -> Result<bool, ChainError> {
        match self {
            RawValue::Bool(v) => Ok(v),
            other => Err(schema_error(method, ValueKind::Bool, &other)),
        }
    }

    pub fn into_address(self, method: Method) -> Result<Address, ChainError> {
        match self {
            RawValue::Address(v) => Ok(v),
            other => Err(schema_error(method, ValueKind::Address, &other)),
        }
    }
}

fn schema_error(method: Method, expected: ValueKind, got: &RawValue) -> ChainError {
    ChainError::Schema {
        method: method.name(),
        expected,
        got: got.describe(),
    }
}

/// Read-only call: `method(args..)` on `contract`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCall {
    pub contract: Address,
    pub method: Method,
    pub args: Vec<Address>,
}

impl ReadCall {
    pub fn new(contract: Address, method: Method) -> Self {
        Self {
            contract,
            method,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, a: Address) -> Self {
        self.args.push(a);
        self
    }
}

#[async_trait]
pub trait ChainReader: Send + Sync + 'static {
    async fn read(&self, call: ReadCall) -> Result<RawValue, ChainError>;

    async fn read_uint(&self, call: ReadCall) -> Result<U256, ChainError> {
        let method = call.method;
        self.read(call).await?.into_uint(method)
    }

    async fn read_bool(&self, call: ReadCall) -> Result<bool, ChainError> {
        let method = call.method;
        self.read(call).await?.into_bool(method)
    }

    async fn read_address(&self, call: ReadCall) -> Result<Address, ChainError> {
        let method = call.method;
        self.read(call).await?.into_address(method)
    }
}

/// Transaction request `{from, to, data}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

/// Inclusion status of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxStatus {
    /// Unknown to the node or not yet in a block.
    Pending,
    Included { block: u64 },
}

#[async_trait]
pub trait TransactionSubmitter: Send + Sync + 'static {
    async fn send_transaction(&self, req: TxRequest) -> Result<TxHash, ChainError>;
    async fn transaction_status(&self, hash: TxHash) -> Result<TxStatus, ChainError>;
}

/// Connected account and its change notifications.
pub trait AccountProvider: Send + Sync + 'static {
    fn watch_accounts(&self) -> watch::Receiver<Option<Address>>;
}

/// `AccountProvider` backed by a watch channel; the owner pushes changes with `set`.
pub struct AccountSlot {
    tx: watch::Sender<Option<Address>>,
}

impl AccountSlot {
    pub fn new(initial: Option<Address>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, account: Option<Address>) {
        self.tx.send_replace(account);
    }
}

impl AccountProvider for AccountSlot {
    fn watch_accounts(&self) -> watch::Receiver<Option<Address>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_covers_every_method() {
        let abi = desk_abi().unwrap();
        for m in Method::ALL {
            assert!(abi.function(m.name()).is_ok(), "missing {}", m.name());
        }
    }

    #[test]
    fn encodes_known_selectors() {
        let abi = desk_abi().unwrap();
        let data = encode_call(
            &abi,
            Method::Approve,
            &[Token::Address(Address::repeat_byte(1)), Token::Uint(U256::MAX)],
        )
        .unwrap();
        // approve(address,uint256)
        assert_eq!(&data[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(data.len(), 4 + 64);

        let claim = encode_call(&abi, Method::ClaimTokens, &[]).unwrap();
        assert_eq!(claim.len(), 4);
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let err = RawValue::Bool(true).into_uint(Method::Sold).unwrap_err();
        assert!(matches!(
            err,
            ChainError::Schema { method: "sold", expected: ValueKind::Uint, .. }
        ));
        assert_eq!(
            RawValue::Uint(U256::from(7)).into_uint(Method::Sold).unwrap(),
            U256::from(7)
        );
    }

    #[test]
    fn account_slot_notifies() {
        let slot = AccountSlot::new(None);
        let mut rx = slot.watch_accounts();
        slot.set(Some(Address::repeat_byte(9)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Some(Address::repeat_byte(9)));
    }
}
