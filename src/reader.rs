//! Chain Reader - typed read helpers
//!
//! Thin wrapper over `ChainClient` + `CallBatcher`. Single reads go straight
//! to `eth_call`; homogeneous lists of reads go through the batcher and come
//! back decoded, in input order.

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolCall;
use std::sync::Arc;

use crate::abi::{IERC20, IVeToken};
use crate::batcher::{decode_outcome, Call, CallBatcher, FailurePolicy};
use crate::chain::ChainClient;
use crate::error::{ChainError, ChainResult};

#[derive(Clone)]
pub struct ChainReader {
    client: Arc<dyn ChainClient>,
    batcher: CallBatcher,
}

impl ChainReader {
    pub fn new(client: Arc<dyn ChainClient>, batcher: CallBatcher) -> Self {
        Self { client, batcher }
    }

    pub fn batcher(&self) -> &CallBatcher {
        &self.batcher
    }

    /// One `eth_call`, decoded as `C`'s return
    pub async fn read<C: SolCall>(&self, target: Address, call: C) -> ChainResult<C::Return> {
        let raw = self.client.call(target, call.abi_encode().into()).await?;
        C::abi_decode_returns(&raw).map_err(|e| ChainError::decode(C::SIGNATURE, e))
    }

    /// Batched reads where any failure fails the whole list
    pub async fn aggregate<C: SolCall>(&self, calls: &[(Address, C)]) -> ChainResult<Vec<C::Return>> {
        self.aggregate_chunked(calls, self.batcher.chunk_size()).await
    }

    /// `aggregate` with an explicit chunk size
    pub async fn aggregate_chunked<C: SolCall>(
        &self,
        calls: &[(Address, C)],
        chunk_size: usize,
    ) -> ChainResult<Vec<C::Return>> {
        let encoded = encode_all(calls);
        let outcomes = self
            .batcher
            .execute_chunked(&encoded, chunk_size, FailurePolicy::FailFast)
            .await?;
        outcomes.iter().map(decode_outcome::<C>).collect()
    }

    /// Batched reads keeping per-call failures
    pub async fn try_aggregate<C: SolCall>(
        &self,
        calls: &[(Address, C)],
    ) -> ChainResult<Vec<ChainResult<C::Return>>> {
        let encoded = encode_all(calls);
        let outcomes = self.batcher.execute(&encoded, FailurePolicy::AllowPartial).await?;
        Ok(outcomes.iter().map(decode_outcome::<C>).collect())
    }

    pub async fn native_balance(&self, account: Address) -> ChainResult<U256> {
        self.client.native_balance(account).await
    }

    pub async fn token_balance(&self, token: Address, account: Address) -> ChainResult<U256> {
        self.read(token, IERC20::balanceOfCall { account }).await
    }

    pub async fn allowance(&self, token: Address, owner: Address, spender: Address) -> ChainResult<U256> {
        self.read(token, IERC20::allowanceCall { owner, spender }).await
    }

    /// Whether `operator` may move vest NFT `token_id`
    pub async fn nft_approved(&self, ve_token: Address, operator: Address, token_id: U256) -> ChainResult<bool> {
        self.read(
            ve_token,
            IVeToken::isApprovedOrOwnerCall {
                spender: operator,
                tokenId: token_id,
            },
        )
        .await
    }
}

fn encode_all<C: SolCall>(calls: &[(Address, C)]) -> Vec<Call> {
    calls.iter().map(|(target, call)| Call::new(*target, call)).collect()
}
