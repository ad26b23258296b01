//! EVM JSON-RPC adapter for the presale desk.
//!
//! Features:
//! - HTTP Provider (polling) for reads, submissions and inclusion lookups.
//! - ChainId verification at connect time, retried with exponential backoff.
//! - Reads encoded/decoded through the human-readable desk ABI (no codegen).
//! - Sends via `eth_sendTransaction`: the node (or wallet behind it) owns the key.
//! - Structured logging via `tracing`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use ethers::{
    abi::{Abi, Token},
    middleware::Middleware,
    providers::{Http, Provider, ProviderError},
    types::{transaction::eip2718::TypedTransaction, Address, TransactionRequest, TxHash},
};
use tracing::{debug, info, instrument, warn};

use super::{
    desk_abi, encode_call, ChainError, ChainReader, RawValue, ReadCall, TransactionSubmitter,
    TxRequest, TxStatus, ValueKind,
};

impl From<ProviderError> for ChainError {
    fn from(e: ProviderError) -> Self {
        ChainError::Transport(e.to_string())
    }
}

/// JSON-RPC backed chain.
pub struct EthChain {
    provider: Arc<Provider<Http>>,
    abi: Arc<Abi>,
}

impl EthChain {
    /// Connects to `rpc_url` and, if requested, verifies the chain id.
    pub async fn connect(
        rpc_url: &str,
        expected_chain_id: Option<u64>,
        max_elapsed: Duration,
    ) -> Result<Self, ChainError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| ChainError::Transport(format!("bad rpc url `{rpc_url}`: {e}")))?;
        let provider = Arc::new(provider);

        if let Some(expected) = expected_chain_id {
            let policy = ExponentialBackoff {
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(8),
                max_elapsed_time: Some(max_elapsed),
                ..ExponentialBackoff::default()
            };
            let got = retry(policy, || {
                let p = provider.clone();
                async move {
                    p.get_chainid().await.map_err(|e| {
                        warn!(error = %e, "get_chainid failed; retrying");
                        backoff::Error::transient(e)
                    })
                }
            })
            .await?
            .as_u64();
            if got != expected {
                return Err(ChainError::ChainIdMismatch { expected, got });
            }
            info!(chain_id = got, "rpc endpoint verified");
        }

        Ok(Self {
            provider,
            abi: Arc::new(desk_abi()?),
        })
    }

    /// Accounts managed by the node (first one is the default sender).
    pub async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        Ok(self.provider.get_accounts().await?)
    }
}

#[async_trait]
impl ChainReader for EthChain {
    #[instrument(skip_all, fields(method = call.method.name()))]
    async fn read(&self, call: ReadCall) -> Result<RawValue, ChainError> {
        let method = call.method;
        let args: Vec<Token> = call.args.iter().copied().map(Token::Address).collect();
        let data = encode_call(&self.abi, method, &args)?;
        let tx: TypedTransaction = TransactionRequest::new().to(call.contract).data(data).into();

        let out = self
            .provider
            .call(&tx, None)
            .await
            .map_err(|e| ChainError::Call {
                method: method.name(),
                reason: e.to_string(),
            })?;

        let function = self
            .abi
            .function(method.name())
            .map_err(|e| ChainError::Abi(e.to_string()))?;
        let tokens = function
            .decode_output(&out)
            .map_err(|e| ChainError::Abi(format!("{}: {e}", method.name())))?;
        debug!(bytes = out.len(), "call decoded");

        match (method.output(), tokens.into_iter().next()) {
            (ValueKind::Uint, Some(Token::Uint(v))) => Ok(RawValue::Uint(v)),
            (ValueKind::Bool, Some(Token::Bool(v))) => Ok(RawValue::Bool(v)),
            (ValueKind::Address, Some(Token::Address(v))) => Ok(RawValue::Address(v)),
            (expected, got) => Err(ChainError::Schema {
                method: method.name(),
                expected,
                got: format!("{got:?}"),
            }),
        }
    }
}

#[async_trait]
impl TransactionSubmitter for EthChain {
    #[instrument(skip_all, fields(to = ?req.to))]
    async fn send_transaction(&self, req: TxRequest) -> Result<TxHash, ChainError> {
        let tx = TransactionRequest::new()
            .from(req.from)
            .to(req.to)
            .data(req.data);
        let pending = self
            .provider
            .send_transaction(tx, None)
            .await
            .map_err(|e| ChainError::Rejected(e.to_string()))?;
        let hash = pending.tx_hash();
        info!(?hash, "transaction sent");
        Ok(hash)
    }

    async fn transaction_status(&self, hash: TxHash) -> Result<TxStatus, ChainError> {
        let tx = self.provider.get_transaction(hash).await?;
        Ok(match tx.and_then(|t| t.block_number) {
            Some(n) => TxStatus::Included { block: n.as_u64() },
            None => TxStatus::Pending,
        })
    }
}
