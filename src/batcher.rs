//! Call Batcher - Multicall3 chunking
//!
//! Splits a flat list of independent calls into fixed-size chunks, issues one
//! `aggregate3` per chunk (all chunks in flight at once) and flattens the
//! results back into input order: `result[i]` always answers `calls[i]`.
//!
//! No retry happens here; a failed chunk surfaces to the caller.

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::abi::IMulticall3;
use crate::chain::ChainClient;
use crate::error::{ChainError, ChainResult};

/// Calls per `aggregate3` unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// One read call: target plus selector-prefixed calldata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: Address,
    pub data: Bytes,
}

impl Call {
    pub fn new<C: SolCall>(target: Address, call: &C) -> Self {
        Self {
            target,
            data: call.abi_encode().into(),
        }
    }
}

/// What to do when a single call inside a chunk fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Any failure aborts the whole batch
    #[default]
    FailFast,
    /// Failed calls become per-call error markers
    AllowPartial,
}

/// Per-call result of a batch
pub type CallOutcome = ChainResult<Bytes>;

/// Split `calls` into ordered chunks of at most `chunk_size`
pub fn chunk_calls(calls: &[Call], chunk_size: usize) -> ChainResult<Vec<&[Call]>> {
    if chunk_size == 0 {
        return Err(ChainError::invalid("multicall chunk size must be > 0"));
    }
    Ok(calls.chunks(chunk_size).collect())
}

/// Decode one batch outcome as the return type of `C`
pub fn decode_outcome<C: SolCall>(outcome: &CallOutcome) -> ChainResult<C::Return> {
    match outcome {
        Ok(data) => C::abi_decode_returns(data).map_err(|e| ChainError::decode(C::SIGNATURE, e)),
        Err(err) => Err(err.clone()),
    }
}

#[derive(Clone)]
pub struct CallBatcher {
    client: Arc<dyn ChainClient>,
    multicall: Address,
    chunk_size: usize,
}

impl CallBatcher {
    pub fn new(client: Arc<dyn ChainClient>, multicall: Address, chunk_size: usize) -> Self {
        Self {
            client,
            multicall,
            chunk_size,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run `calls` with the configured chunk size
    pub async fn execute(&self, calls: &[Call], policy: FailurePolicy) -> ChainResult<Vec<CallOutcome>> {
        self.execute_chunked(calls, self.chunk_size, policy).await
    }

    /// Run `calls` with an explicit chunk size
    pub async fn execute_chunked(
        &self,
        calls: &[Call],
        chunk_size: usize,
        policy: FailurePolicy,
    ) -> ChainResult<Vec<CallOutcome>> {
        let chunks = chunk_calls(calls, chunk_size)?;
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Multicall: {} calls in {} chunk(s) of <= {} ({:?})",
            calls.len(),
            chunks.len(),
            chunk_size,
            policy
        );

        let pending = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| self.aggregate_chunk(i * chunk_size, chunk, policy));

        // try_join_all keeps input order regardless of completion order
        let per_chunk = try_join_all(pending).await?;

        let mut results = Vec::with_capacity(calls.len());
        for chunk_results in per_chunk {
            results.extend(chunk_results);
        }
        Ok(results)
    }

    async fn aggregate_chunk(
        &self,
        offset: usize,
        chunk: &[Call],
        policy: FailurePolicy,
    ) -> ChainResult<Vec<CallOutcome>> {
        let allow_failure = policy == FailurePolicy::AllowPartial;
        let calls: Vec<IMulticall3::Call3> = chunk
            .iter()
            .map(|call| IMulticall3::Call3 {
                target: call.target,
                allowFailure: allow_failure,
                callData: call.data.clone(),
            })
            .collect();

        let calldata = IMulticall3::aggregate3Call { calls }.abi_encode();
        let raw = self.client.call(self.multicall, calldata.into()).await?;

        let decoded = IMulticall3::aggregate3Call::abi_decode_returns(&raw)
            .map_err(|e| ChainError::decode("aggregate3 result", e))?;

        if decoded.len() != chunk.len() {
            return Err(ChainError::decode(
                "aggregate3 result",
                format!("expected {} results, got {}", chunk.len(), decoded.len()),
            ));
        }

        trace!("Chunk at offset {} returned {} results", offset, decoded.len());

        let mut outcomes = Vec::with_capacity(decoded.len());
        for (i, result) in decoded.into_iter().enumerate() {
            if result.success {
                outcomes.push(Ok(result.returnData));
            } else if allow_failure {
                outcomes.push(Err(ChainError::CallFailed { index: offset + i }));
            } else {
                return Err(ChainError::CallFailed { index: offset + i });
            }
        }
        Ok(outcomes)
    }
}
