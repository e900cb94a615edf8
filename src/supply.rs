//! Circulating supply and market cap of the governance token
//!
//! Circulating supply is `totalSupply` minus what the escrow, the minter,
//! the rebase distributor and the treasury hold, read in one `aggregate3`.

use alloy_primitives::U256;
use tracing::debug;

use crate::abi::IERC20;
use crate::batcher::{decode_outcome, Call, FailurePolicy};
use crate::config::Contracts;
use crate::error::{ChainError, ChainResult};
use crate::model::TokenAmount;
use crate::reader::ChainReader;

#[derive(Clone)]
pub struct SupplyReader {
    reader: ChainReader,
    contracts: Contracts,
}

impl SupplyReader {
    pub fn new(reader: ChainReader, contracts: Contracts) -> Self {
        Self { reader, contracts }
    }

    pub async fn circulating_supply(&self) -> ChainResult<TokenAmount> {
        let token = self.contracts.gov_token;
        let holders = self.contracts.non_circulating_holders();

        let mut calls = vec![Call::new(token, &IERC20::totalSupplyCall {})];
        calls.extend(
            holders
                .iter()
                .map(|&account| Call::new(token, &IERC20::balanceOfCall { account })),
        );
        let outcomes = self.reader.batcher().execute(&calls, FailurePolicy::FailFast).await?;

        let (total, held) = outcomes
            .split_first()
            .ok_or_else(|| ChainError::missing("totalSupply result"))?;
        let total = decode_outcome::<IERC20::totalSupplyCall>(total)?;

        let mut locked = U256::ZERO;
        for outcome in held {
            locked = locked.saturating_add(decode_outcome::<IERC20::balanceOfCall>(outcome)?);
        }
        let circulating = total.saturating_sub(locked);

        debug!("Gov supply {} total, {} held by {} contracts", total, locked, holders.len());
        Ok(TokenAmount::new(circulating, self.contracts.gov_token_decimals))
    }
}

/// `supply * price`; needs a positive supply and a quoted price
pub fn market_cap(supply: &TokenAmount, price: Option<f64>) -> ChainResult<f64> {
    if !supply.is_positive() {
        return Err(ChainError::missing("circulating supply"));
    }
    match price {
        Some(price) if price > 0.0 => Ok(supply.to_f64() * price),
        _ => Err(ChainError::missing("gov token price")),
    }
}
