//! Chain access seams
//!
//! `ChainClient` covers side-effect free reads (`eth_call`, balances),
//! `TransactionSender` covers signed submissions. `RpcChain` implements both
//! on top of an alloy HTTP provider; tests swap in an in-memory chain.

use alloy_network::{EthereumWallet, ReceiptResponse};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_provider::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy_rpc_types::TransactionRequest;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{ChainError, ChainResult};

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Plain `eth_call` against `target`
    async fn call(&self, target: Address, data: Bytes) -> ChainResult<Bytes>;

    /// Native coin balance in wei
    async fn native_balance(&self, account: Address) -> ChainResult<U256>;
}

#[async_trait]
pub trait TransactionSender: Send + Sync {
    /// Sign and broadcast; resolves once the node accepted the transaction
    async fn send(&self, target: Address, data: Bytes) -> ChainResult<TxHash>;

    /// Resolves once the transaction is included; a failed receipt is a revert
    async fn wait_for_inclusion(&self, hash: TxHash) -> ChainResult<()>;
}

// ============================================
// ALLOY RPC IMPLEMENTATION
// ============================================

pub struct RpcChain {
    provider: DynProvider,
    signer_address: Option<Address>,
}

impl RpcChain {
    /// Read-only connection
    pub fn connect(rpc_url: &str) -> ChainResult<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::invalid(format!("bad RPC url {}: {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        debug!("Connected read-only provider to {}", rpc_url);

        Ok(Self {
            provider,
            signer_address: None,
        })
    }

    /// Connection that can also sign with `private_key`
    pub fn connect_with_signer(rpc_url: &str, private_key: &str, chain_id: u64) -> ChainResult<Self> {
        let signer = PrivateKeySigner::from_str(private_key.trim_start_matches("0x"))
            .map_err(|e| ChainError::invalid(format!("bad private key: {}", e)))?
            .with_chain_id(Some(chain_id));
        let address = signer.address();

        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::invalid(format!("bad RPC url {}: {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        info!("✓ Signer loaded: {:?}", address);

        Ok(Self {
            provider,
            signer_address: Some(address),
        })
    }

    pub fn signer_address(&self) -> Option<Address> {
        self.signer_address
    }
}

#[async_trait]
impl ChainClient for RpcChain {
    async fn call(&self, target: Address, data: Bytes) -> ChainResult<Bytes> {
        let tx = TransactionRequest::default().to(target).input(data.into());
        self.provider.call(tx).await.map_err(ChainError::from)
    }

    async fn native_balance(&self, account: Address) -> ChainResult<U256> {
        self.provider.get_balance(account).await.map_err(ChainError::from)
    }
}

#[async_trait]
impl TransactionSender for RpcChain {
    async fn send(&self, target: Address, data: Bytes) -> ChainResult<TxHash> {
        let from = self
            .signer_address
            .ok_or_else(|| ChainError::missing("no signer configured (set PRIVATE_KEY)"))?;

        let tx = TransactionRequest::default()
            .from(from)
            .to(target)
            .input(data.into());

        let pending = self.provider.send_transaction(tx).await.map_err(ChainError::from)?;
        let hash = *pending.tx_hash();

        debug!("Broadcast {:?} -> {:?}", hash, target);
        Ok(hash)
    }

    async fn wait_for_inclusion(&self, hash: TxHash) -> ChainResult<()> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), hash)
            .get_receipt()
            .await
            .map_err(|e| ChainError::Transport(format!("waiting for {:?}: {}", hash, e)))?;

        if receipt.status() {
            Ok(())
        } else {
            warn!("Transaction {:?} reverted", hash);
            Err(ChainError::Reverted(format!("transaction {:?} reverted", hash)))
        }
    }
}
