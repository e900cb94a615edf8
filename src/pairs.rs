//! Pair enrichment
//!
//! Snapshot pairs carry off-chain numbers only. Two batched stages fill in
//! the on-chain state for one account:
//!
//! 1. `symbol` / `decimals` / `name` of tokens the snapshot left unresolved,
//!    then per pair: `totalSupply`, `reserve0`, `reserve1`, `balanceOf(account)`
//! 2. per gauged pair: `isAlive(gauge)`, then gauge `totalSupply`,
//!    gauge `balanceOf(account)` and `weights(pair)`, plus `totalWeight`

use alloy_primitives::{Address, U256};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::abi::{IGauge, IPair, IVoter, IERC20};
use crate::batcher::{decode_outcome, Call, FailurePolicy, DEFAULT_CHUNK_SIZE};
use crate::config::Contracts;
use crate::error::ChainResult;
use crate::model::{Asset, Pair, TokenAmount, PAIR_DECIMALS};
use crate::reader::ChainReader;

/// Reads per pair in stage 1
const PAIR_READS: usize = 4;

/// Reads per unresolved token
const TOKEN_READS: usize = 3;

/// Reads per gauge in stage 2
const GAUGE_READS: usize = 3;

#[derive(Clone)]
pub struct PairEnricher {
    reader: ChainReader,
    contracts: Contracts,
}

impl PairEnricher {
    pub fn new(reader: ChainReader, contracts: Contracts) -> Self {
        Self { reader, contracts }
    }

    /// Both stages, in order. `unresolved` lists tokens whose decimals the
    /// snapshot did not carry.
    pub async fn enrich(&self, account: Address, pairs: Vec<Pair>, unresolved: &[Address]) -> ChainResult<Vec<Pair>> {
        let pairs = self.with_resolved_tokens(pairs, unresolved).await?;
        let pairs = self.with_pair_state(account, pairs).await?;
        self.with_gauge_state(account, pairs).await
    }

    /// Read `symbol`, `decimals` and `name` of `tokens` in one batch
    pub async fn resolve_tokens(&self, tokens: &[Address]) -> ChainResult<HashMap<Address, Asset>> {
        if tokens.is_empty() {
            return Ok(HashMap::new());
        }

        let calls: Vec<Call> = tokens
            .iter()
            .flat_map(|&token| {
                [
                    Call::new(token, &IERC20::symbolCall {}),
                    Call::new(token, &IERC20::decimalsCall {}),
                    Call::new(token, &IERC20::nameCall {}),
                ]
            })
            .collect();
        let outcomes = self.reader.batcher().execute(&calls, FailurePolicy::AllowPartial).await?;

        let mut resolved = HashMap::new();
        for (&token, chunk) in tokens.iter().zip(outcomes.chunks(TOKEN_READS)) {
            let decimals = match decode_outcome::<IERC20::decimalsCall>(&chunk[1]) {
                Ok(decimals) => decimals,
                Err(e) => {
                    warn!("Could not read decimals of {:?}: {}", token, e);
                    continue;
                }
            };
            resolved.insert(
                token,
                Asset {
                    address: token,
                    symbol: decode_outcome::<IERC20::symbolCall>(&chunk[0]).unwrap_or_default(),
                    name: decode_outcome::<IERC20::nameCall>(&chunk[2]).unwrap_or_default(),
                    decimals,
                    price: 0.0,
                },
            );
        }

        debug!("Resolved {}/{} tokens on-chain", resolved.len(), tokens.len());
        Ok(resolved)
    }

    /// Swap in on-chain token details; the snapshot's listing stays when a read fails
    async fn with_resolved_tokens(&self, mut pairs: Vec<Pair>, unresolved: &[Address]) -> ChainResult<Vec<Pair>> {
        let resolved = self.resolve_tokens(unresolved).await?;
        if resolved.is_empty() {
            return Ok(pairs);
        }

        for pair in pairs.iter_mut() {
            for token in [&mut pair.token0, &mut pair.token1] {
                if let Some(asset) = resolved.get(&token.address) {
                    let listed_symbol = std::mem::take(&mut token.symbol);
                    let listed_name = std::mem::take(&mut token.name);
                    let price = token.price;
                    *token = asset.clone();
                    token.price = price;
                    if token.symbol.is_empty() {
                        token.symbol = listed_symbol;
                    }
                    if token.name.is_empty() {
                        token.name = listed_name;
                    }
                }
            }
        }
        Ok(pairs)
    }

    /// Stage 1: reserves, supply and the account's LP balance
    pub async fn with_pair_state(&self, account: Address, mut pairs: Vec<Pair>) -> ChainResult<Vec<Pair>> {
        if pairs.is_empty() {
            return Ok(pairs);
        }

        let calls: Vec<Call> = pairs
            .iter()
            .flat_map(|pair| {
                [
                    Call::new(pair.address, &IPair::totalSupplyCall {}),
                    Call::new(pair.address, &IPair::reserve0Call {}),
                    Call::new(pair.address, &IPair::reserve1Call {}),
                    Call::new(pair.address, &IPair::balanceOfCall { account }),
                ]
            })
            .collect();

        debug!("Reading state of {} pairs ({} calls)", pairs.len(), calls.len());
        let outcomes = self
            .reader
            .batcher()
            .execute_chunked(&calls, DEFAULT_CHUNK_SIZE, FailurePolicy::FailFast)
            .await?;

        for (pair, chunk) in pairs.iter_mut().zip(outcomes.chunks(PAIR_READS)) {
            let total_supply = decode_outcome::<IPair::totalSupplyCall>(&chunk[0])?;
            let reserve0 = decode_outcome::<IPair::reserve0Call>(&chunk[1])?;
            let reserve1 = decode_outcome::<IPair::reserve1Call>(&chunk[2])?;
            let balance = decode_outcome::<IPair::balanceOfCall>(&chunk[3])?;

            pair.total_supply = TokenAmount::new(total_supply, PAIR_DECIMALS);
            pair.balance = TokenAmount::new(balance, PAIR_DECIMALS);
            pair.reserve0 = TokenAmount::new(reserve0, pair.token0.decimals);
            pair.reserve1 = TokenAmount::new(reserve1, pair.token1.decimals);
        }

        Ok(pairs)
    }

    /// Stage 2: gauge liveness, stake, vote weight
    pub async fn with_gauge_state(&self, account: Address, mut pairs: Vec<Pair>) -> ChainResult<Vec<Pair>> {
        let gauged: Vec<(usize, Address)> = pairs
            .iter()
            .enumerate()
            .filter_map(|(i, pair)| pair.gauge.as_ref().map(|g| (i, g.address)))
            .collect();
        if gauged.is_empty() {
            return Ok(pairs);
        }

        let voter = self.contracts.voter;
        let total_weight = self.reader.read(voter, IVoter::totalWeightCall {}).await?;

        let alive_calls: Vec<_> = gauged
            .iter()
            .map(|&(_, gauge)| (voter, IVoter::isAliveCall { gauge }))
            .collect();
        let alive = self.reader.aggregate(&alive_calls).await?;

        let calls: Vec<Call> = gauged
            .iter()
            .flat_map(|&(i, gauge)| {
                [
                    Call::new(gauge, &IGauge::totalSupplyCall {}),
                    Call::new(gauge, &IGauge::balanceOfCall { account }),
                    Call::new(voter, &IVoter::weightsCall { pair: pairs[i].address }),
                ]
            })
            .collect();
        let outcomes = self.reader.batcher().execute(&calls, FailurePolicy::FailFast).await?;

        let mut dead = 0;
        for (((i, _), is_alive), chunk) in gauged.iter().zip(alive).zip(outcomes.chunks(GAUGE_READS)) {
            let gauge_supply = decode_outcome::<IGauge::totalSupplyCall>(&chunk[0])?;
            let gauge_balance = decode_outcome::<IGauge::balanceOfCall>(&chunk[1])?;
            let weight = decode_outcome::<IVoter::weightsCall>(&chunk[2])?;

            let pair = &mut pairs[*i];
            let pair_supply = pair.total_supply.raw;
            let reserve0 = share_of(pair.reserve0.raw, gauge_supply, pair_supply);
            let reserve1 = share_of(pair.reserve1.raw, gauge_supply, pair_supply);
            let (decimals0, decimals1) = (pair.token0.decimals, pair.token1.decimals);

            let Some(gauge) = pair.gauge.as_mut() else {
                continue;
            };
            gauge.total_supply = TokenAmount::new(gauge_supply, PAIR_DECIMALS);
            gauge.balance = TokenAmount::new(gauge_balance, PAIR_DECIMALS);
            gauge.reserve0 = TokenAmount::new(reserve0, decimals0);
            gauge.reserve1 = TokenAmount::new(reserve1, decimals1);
            gauge.weight = TokenAmount::new(weight, PAIR_DECIMALS);
            gauge.weight_percent = weight_percent(weight, total_weight);
            gauge.is_alive = is_alive;

            if !is_alive {
                pair.apr = 0.0;
                dead += 1;
            }
        }

        info!("🗳 Enriched {} gauges ({} killed)", gauged.len(), dead);
        Ok(pairs)
    }
}

/// `reserve * gauge_supply / pair_supply`, zero for an empty pair
fn share_of(reserve: U256, gauge_supply: U256, pair_supply: U256) -> U256 {
    if pair_supply.is_zero() {
        return U256::ZERO;
    }
    reserve.saturating_mul(gauge_supply) / pair_supply
}

/// Share of all votes as a two-decimal percentage
fn weight_percent(weight: U256, total_weight: U256) -> String {
    if total_weight.is_zero() {
        return "0.00".to_string();
    }
    let weight = TokenAmount::new(weight, PAIR_DECIMALS).to_f64();
    let total = TokenAmount::new(total_weight, PAIR_DECIMALS).to_f64();
    format!("{:.2}", weight * 100.0 / total)
}
