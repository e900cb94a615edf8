//! Core data model: amounts, assets, pairs, gauges and vest NFTs
//!
//! Pairs start life as an off-chain snapshot entry and are enriched in place
//! by the on-chain stages in `pairs`. A pair without a gauge simply carries
//! `gauge: None`; code that needs the gauge goes through `Pair::with_gauge()`.

use alloy_primitives::{utils::format_units, Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// LP tokens and gauge shares are always 18 decimals
pub const PAIR_DECIMALS: u8 = 18;

// ============================================
// TOKEN AMOUNT
// ============================================

/// Raw on-chain integer together with the asset's declared precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenAmount {
    pub raw: U256,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    pub fn zero(decimals: u8) -> Self {
        Self { raw: U256::ZERO, decimals }
    }

    /// Strictly greater than zero
    pub fn is_positive(&self) -> bool {
        !self.raw.is_zero()
    }

    /// Decimal-scaled string, e.g. `1.500000000000000000`
    pub fn formatted(&self) -> String {
        format_units(self.raw, self.decimals).unwrap_or_else(|_| self.raw.to_string())
    }

    /// Lossy float view for display math (weights, percentages)
    pub fn to_f64(&self) -> f64 {
        self.formatted().parse().unwrap_or(0.0)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

// ============================================
// ASSETS
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    /// USD price from the snapshot (0 when unknown)
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bribe {
    pub token: Asset,
    /// Advertised reward amount for the epoch, in token units
    pub reward_amount: f64,
}

// ============================================
// GAUGE + PAIR
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    pub address: Address,
    pub bribe_address: Address,
    pub fees_address: Address,
    pub wrapped_bribe_address: Address,
    pub bribes: Vec<Bribe>,
    pub apr: f64,
    pub tbv: f64,
    pub votes: f64,

    // Filled by the gauge enrichment stage
    pub balance: TokenAmount,
    pub total_supply: TokenAmount,
    pub reserve0: TokenAmount,
    pub reserve1: TokenAmount,
    pub weight: TokenAmount,
    pub weight_percent: String,
    pub is_alive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub address: Address,
    pub symbol: String,
    pub stable: bool,
    pub token0: Asset,
    pub token1: Asset,
    pub tvl: f64,
    pub apr: f64,

    // Filled by the pair enrichment stage
    pub reserve0: TokenAmount,
    pub reserve1: TokenAmount,
    pub total_supply: TokenAmount,
    pub balance: TokenAmount,

    pub gauge: Option<Gauge>,
}

/// A pair known to have a gauge
#[derive(Debug, Clone, Copy)]
pub struct GaugedPair<'a> {
    pub pair: &'a Pair,
    pub gauge: &'a Gauge,
}

impl Pair {
    pub fn with_gauge(&self) -> Option<GaugedPair<'_>> {
        self.gauge.as_ref().map(|gauge| GaugedPair { pair: self, gauge })
    }

    pub fn has_gauge(&self) -> bool {
        self.gauge.is_some()
    }
}

/// Iterate only the pairs that carry a gauge, preserving order
pub fn gauged_pairs(pairs: &[Pair]) -> impl Iterator<Item = GaugedPair<'_>> {
    pairs.iter().filter_map(Pair::with_gauge)
}

// ============================================
// VEST NFT
// ============================================

/// Snapshot of one vote-escrow position, refreshed per fetch cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestNft {
    pub id: U256,
    pub lock_amount: TokenAmount,
    /// Unix timestamp when the lock expires
    pub lock_ends: U256,
    pub lock_value: TokenAmount,
    pub voted: bool,
    pub autolock: bool,
    pub delegated: bool,
}
