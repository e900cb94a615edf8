//! Pair Snapshot API
//!
//! The backend serves one JSON document at `/api/pairs` with token prices,
//! protocol totals and every pair (with its gauge and advertised bribes).
//! `SnapshotPoller` refreshes it on a fixed interval into the query cache.

use alloy_primitives::Address;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{QueryCache, QueryKey};
use crate::error::{ChainError, ChainResult};
use crate::events::{Event, EventBus};
use crate::model::{Asset, Bribe, Gauge, Pair, TokenAmount, PAIR_DECIMALS};

/// Timeout for snapshot requests
const API_TIMEOUT_SECS: u64 = 15;

/// Placeholder precision until a token's decimals are read on-chain
const ASSUMED_DECIMALS: u8 = 18;

// ============================================
// API RESPONSE TYPES
// ============================================

#[derive(Debug, Clone, Deserialize)]
pub struct RouteAsset {
    pub address: Address,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    /// `None` when the backend omits it
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub price: f64,
}

impl From<RouteAsset> for Asset {
    fn from(a: RouteAsset) -> Self {
        Asset {
            address: a.address,
            symbol: a.symbol,
            name: a.name,
            decimals: a.decimals.unwrap_or(ASSUMED_DECIMALS),
            price: a.price,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiBribe {
    pub token: RouteAsset,
    #[serde(default, alias = "rewardAmmount", alias = "reward_ammount", alias = "rewardAmount")]
    pub reward_amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiGauge {
    pub address: Address,
    #[serde(default, alias = "bribeAddress")]
    pub bribe_address: Option<Address>,
    #[serde(default, alias = "feesAddress")]
    pub fees_address: Option<Address>,
    #[serde(default)]
    pub wrapped_bribe_address: Option<Address>,
    #[serde(default)]
    pub apr: f64,
    #[serde(default)]
    pub tbv: f64,
    #[serde(default)]
    pub votes: f64,
    #[serde(default)]
    pub bribes: Vec<ApiBribe>,
    #[serde(default)]
    pub x_bribes: Vec<ApiBribe>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPair {
    pub address: Address,
    #[serde(default)]
    pub symbol: String,
    #[serde(default, alias = "isStable")]
    pub stable: bool,
    pub token0: RouteAsset,
    pub token1: RouteAsset,
    #[serde(default)]
    pub tvl: f64,
    #[serde(default)]
    pub apr: f64,
    /// Empty string when the pair has no gauge
    #[serde(default)]
    pub gauge_address: String,
    #[serde(default)]
    pub gauge: Option<ApiGauge>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PairsSnapshot {
    #[serde(default)]
    pub prices: Vec<RouteAsset>,
    #[serde(default)]
    pub tvl: f64,
    #[serde(default)]
    pub tbv: f64,
    #[serde(default)]
    pub data: Vec<ApiPair>,
}

impl PairsSnapshot {
    /// USD price of `token`, if the backend quotes it
    pub fn price_of(&self, token: Address) -> Option<f64> {
        self.prices.iter().find(|p| p.address == token).map(|p| p.price)
    }

    /// Snapshot pairs as model pairs, not yet enriched on-chain.
    /// Tokens listed in `prices` take their details from there.
    pub fn pairs(&self) -> Vec<Pair> {
        self.data
            .iter()
            .cloned()
            .map(|mut pair| {
                pair.token0 = self.listed(&pair.token0).clone();
                pair.token1 = self.listed(&pair.token1).clone();
                Pair::from(pair)
            })
            .collect()
    }

    /// Pair tokens with unknown decimals, deduplicated in first-seen order
    pub fn unresolved_tokens(&self) -> Vec<Address> {
        let mut tokens: Vec<Address> = Vec::new();
        for pair in &self.data {
            for token in [&pair.token0, &pair.token1] {
                let token = self.listed(token);
                if token.decimals.is_none() && !tokens.contains(&token.address) {
                    tokens.push(token.address);
                }
            }
        }
        tokens
    }

    fn listed<'a>(&'a self, token: &'a RouteAsset) -> &'a RouteAsset {
        self.prices
            .iter()
            .find(|p| p.address == token.address && p.decimals.is_some())
            .unwrap_or(token)
    }
}

/// Advertised bribes plus extra (`x_bribes`) ones, summed per token
fn merge_bribes(bribes: Vec<ApiBribe>, x_bribes: Vec<ApiBribe>) -> Vec<Bribe> {
    let mut merged: Vec<Bribe> = bribes
        .into_iter()
        .map(|b| Bribe {
            token: b.token.into(),
            reward_amount: b.reward_amount,
        })
        .collect();

    for x in x_bribes {
        match merged.iter_mut().find(|b| b.token.address == x.token.address) {
            Some(existing) => existing.reward_amount += x.reward_amount,
            None => merged.push(Bribe {
                token: x.token.into(),
                reward_amount: x.reward_amount,
            }),
        }
    }
    merged
}

impl From<ApiGauge> for Gauge {
    fn from(g: ApiGauge) -> Self {
        Gauge {
            address: g.address,
            bribe_address: g.bribe_address.unwrap_or_default(),
            fees_address: g.fees_address.unwrap_or_default(),
            wrapped_bribe_address: g.wrapped_bribe_address.unwrap_or_default(),
            bribes: merge_bribes(g.bribes, g.x_bribes),
            apr: g.apr,
            tbv: g.tbv,
            votes: g.votes,
            balance: TokenAmount::zero(PAIR_DECIMALS),
            total_supply: TokenAmount::zero(PAIR_DECIMALS),
            reserve0: TokenAmount::zero(PAIR_DECIMALS),
            reserve1: TokenAmount::zero(PAIR_DECIMALS),
            weight: TokenAmount::zero(PAIR_DECIMALS),
            weight_percent: "0.00".to_string(),
            is_alive: true,
        }
    }
}

impl From<ApiPair> for Pair {
    fn from(p: ApiPair) -> Self {
        let token0: Asset = p.token0.into();
        let token1: Asset = p.token1.into();
        // gauge only counts when the backend also lists its address
        let gauge = p.gauge.filter(|_| !p.gauge_address.trim().is_empty()).map(Gauge::from);

        Pair {
            address: p.address,
            symbol: p.symbol,
            stable: p.stable,
            reserve0: TokenAmount::zero(token0.decimals),
            reserve1: TokenAmount::zero(token1.decimals),
            token0,
            token1,
            tvl: p.tvl,
            apr: p.apr,
            total_supply: TokenAmount::zero(PAIR_DECIMALS),
            balance: TokenAmount::zero(PAIR_DECIMALS),
            gauge,
        }
    }
}

// ============================================
// HTTP CLIENT
// ============================================

#[derive(Clone)]
pub struct PairsApi {
    http_client: Client,
    base_url: String,
}

impl PairsApi {
    pub fn new(base_url: impl Into<String>) -> ChainResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChainError::Transport(format!("http client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self) -> String {
        format!("{}/api/pairs", self.base_url)
    }

    pub async fn fetch(&self) -> ChainResult<PairsSnapshot> {
        let url = self.url();
        debug!("Fetching pairs snapshot from {}", url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            // 5xx is the backend's trouble, anything else is ours
            return Err(if status.is_server_error() {
                ChainError::Transport(format!("GET {}: HTTP {}", url, status))
            } else {
                ChainError::missing(format!("GET {}: HTTP {}", url, status))
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChainError::Transport(format!("reading {}: {}", url, e)))?;
        let snapshot: PairsSnapshot =
            serde_json::from_str(&body).map_err(|e| ChainError::decode("pairs snapshot", e))?;

        info!("📊 Snapshot: {} pairs, TVL ${:.0}, TBV ${:.0}", snapshot.data.len(), snapshot.tvl, snapshot.tbv);
        Ok(snapshot)
    }
}

// ============================================
// POLLER
// ============================================

/// Refreshes the snapshot every `interval` into `QueryKey::pairs()`
pub struct SnapshotPoller {
    api: PairsApi,
    cache: Arc<QueryCache>,
    bus: Arc<EventBus>,
    interval: Duration,
}

impl SnapshotPoller {
    pub fn new(api: PairsApi, cache: Arc<QueryCache>, bus: Arc<EventBus>, interval: Duration) -> Self {
        Self {
            api,
            cache,
            bus,
            interval,
        }
    }

    /// One refresh; the previous snapshot stays cached on failure
    pub async fn refresh(&self) -> ChainResult<Arc<PairsSnapshot>> {
        match self.api.fetch().await {
            Ok(snapshot) => {
                let snapshot = self.cache.insert(QueryKey::pairs(), snapshot);
                // enriched pairs were built from the previous snapshot
                self.cache.invalidate(&QueryKey::enriched_pairs_root());
                self.bus.emit(Event::DataUpdated);
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Snapshot refresh failed: {}", e);
                self.cache.invalidate(&QueryKey::pairs());
                self.bus.emit(Event::Error(format!("pairs snapshot: {}", e)));
                Err(e)
            }
        }
    }

    /// Poll forever on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            info!("🔄 Polling {} every {}s", self.api.url(), self.interval.as_secs());
            loop {
                ticker.tick().await;
                // errors were already logged and published
                let _ = self.refresh().await;
            }
        })
    }
}
