//! Reward Aggregator
//!
//! Collects everything claimable for an account / veNFT into one bundle:
//!
//! 1. **Bribes** - `earned(token, tokenId)` on each gauge's wrapped bribe, one
//!    call per configured bribe token (chunks of 100, fail fast)
//! 2. **Rewards** - `earned(govToken, account)` on each gauge
//! 3. **Distribution** - rebase `claimable(tokenId)` on the distributor
//!
//! Only strictly positive amounts survive. Without a token ID only the gauge
//! rewards are read.

use alloy_primitives::{Address, U256};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::abi::{IBribe, IGauge, IVeDist};
use crate::batcher::DEFAULT_CHUNK_SIZE;
use crate::config::Contracts;
use crate::error::{ChainError, ChainResult};
use crate::model::{gauged_pairs, Asset, Pair, TokenAmount, VestNft};
use crate::reader::ChainReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RewardType {
    Bribe,
    Reward,
    Distribution,
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardType::Bribe => write!(f, "Bribe"),
            RewardType::Reward => write!(f, "Reward"),
            RewardType::Distribution => write!(f, "Distribution"),
        }
    }
}

// ============================================
// REWARD ENTRIES
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BribeEarned {
    pub token: Asset,
    pub earned: TokenAmount,
}

/// A gauged pair with at least one positive bribe for the veNFT
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BribeReward {
    pub pair: Pair,
    /// One entry per configured bribe token, zeros included
    pub bribes_earned: Vec<BribeEarned>,
}

impl BribeReward {
    pub fn positive(&self) -> impl Iterator<Item = &BribeEarned> {
        self.bribes_earned.iter().filter(|b| b.earned.is_positive())
    }
}

/// Gauge emissions earned by the account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GaugeReward {
    pub pair: Pair,
    pub earned: TokenAmount,
}

/// Rebase claimable by a veNFT
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VeDistReward {
    pub token_id: U256,
    pub nft: Option<VestNft>,
    pub earned: TokenAmount,
}

/// Borrowed view over one bundle entry
#[derive(Debug, Clone, Copy)]
pub enum Reward<'a> {
    Bribe(&'a BribeReward),
    Reward(&'a GaugeReward),
    Distribution(&'a VeDistReward),
}

impl Reward<'_> {
    pub fn reward_type(&self) -> RewardType {
        match self {
            Reward::Bribe(_) => RewardType::Bribe,
            Reward::Reward(_) => RewardType::Reward,
            Reward::Distribution(_) => RewardType::Distribution,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RewardBundle {
    pub bribes: Vec<BribeReward>,
    pub rewards: Vec<GaugeReward>,
    pub ve_dist: Vec<VeDistReward>,
}

impl RewardBundle {
    /// Bribes, then rewards, then distribution
    pub fn iter(&self) -> impl Iterator<Item = Reward<'_>> {
        self.bribes
            .iter()
            .map(Reward::Bribe)
            .chain(self.rewards.iter().map(Reward::Reward))
            .chain(self.ve_dist.iter().map(Reward::Distribution))
    }

    pub fn len(&self) -> usize {
        self.bribes.len() + self.rewards.len() + self.ve_dist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================
// AGGREGATOR
// ============================================

#[derive(Clone)]
pub struct RewardAggregator {
    reader: ChainReader,
    contracts: Contracts,
}

impl RewardAggregator {
    pub fn new(reader: ChainReader, contracts: Contracts) -> Self {
        Self { reader, contracts }
    }

    pub async fn reward_balances(
        &self,
        account: Option<Address>,
        token_id: Option<U256>,
        pairs: &[Pair],
        nfts: &[VestNft],
    ) -> ChainResult<RewardBundle> {
        let account = account.ok_or_else(|| ChainError::invalid("account not found"))?;
        if token_id == Some(U256::ZERO) {
            return Err(ChainError::invalid("token id must be non-zero"));
        }

        let mut bundle = RewardBundle::default();

        if let Some(token_id) = token_id {
            bundle.bribes = self.bribe_rewards(token_id, pairs).await?;
            bundle.ve_dist = self.ve_dist_reward(token_id, nfts).await?.into_iter().collect();
        }
        bundle.rewards = self.gauge_rewards(account, pairs).await?;

        info!(
            "💰 Rewards for {:?}: {} bribe pair(s), {} gauge reward(s), {} distribution",
            account,
            bundle.bribes.len(),
            bundle.rewards.len(),
            bundle.ve_dist.len()
        );
        Ok(bundle)
    }

    async fn bribe_rewards(&self, token_id: U256, pairs: &[Pair]) -> ChainResult<Vec<BribeReward>> {
        let gauged: Vec<_> = gauged_pairs(pairs).collect();

        let calls: Vec<_> = gauged
            .iter()
            .flat_map(|gp| {
                gp.gauge.bribes.iter().map(move |bribe| {
                    (
                        gp.gauge.wrapped_bribe_address,
                        IBribe::earnedCall {
                            token: bribe.token.address,
                            tokenId: token_id,
                        },
                    )
                })
            })
            .collect();

        debug!("Checking {} bribe balances across {} gauges", calls.len(), gauged.len());
        let earned = self.reader.aggregate_chunked(&calls, DEFAULT_CHUNK_SIZE).await?;

        // results are flat; each gauge consumes as many as it has bribes
        let mut earned = earned.into_iter();
        let mut rewards = Vec::new();
        for gp in gauged {
            let bribes_earned: Vec<BribeEarned> = gp
                .gauge
                .bribes
                .iter()
                .zip(earned.by_ref())
                .map(|(bribe, raw)| BribeEarned {
                    token: bribe.token.clone(),
                    earned: TokenAmount::new(raw, bribe.token.decimals),
                })
                .collect();

            if bribes_earned.iter().any(|b| b.earned.is_positive()) {
                rewards.push(BribeReward {
                    pair: gp.pair.clone(),
                    bribes_earned,
                });
            }
        }
        Ok(rewards)
    }

    async fn gauge_rewards(&self, account: Address, pairs: &[Pair]) -> ChainResult<Vec<GaugeReward>> {
        let gauged: Vec<_> = gauged_pairs(pairs).collect();
        let calls: Vec<_> = gauged
            .iter()
            .map(|gp| {
                (
                    gp.gauge.address,
                    IGauge::earnedCall {
                        token: self.contracts.gov_token,
                        account,
                    },
                )
            })
            .collect();

        let earned = self.reader.aggregate(&calls).await?;

        Ok(gauged
            .into_iter()
            .zip(earned)
            .map(|(gp, raw)| GaugeReward {
                pair: gp.pair.clone(),
                earned: TokenAmount::new(raw, self.contracts.gov_token_decimals),
            })
            .filter(|r| r.earned.is_positive())
            .collect())
    }

    async fn ve_dist_reward(&self, token_id: U256, nfts: &[VestNft]) -> ChainResult<Option<VeDistReward>> {
        let claimable = self
            .reader
            .read(self.contracts.ve_dist, IVeDist::claimableCall { tokenId: token_id })
            .await?;

        let earned = TokenAmount::new(claimable, self.contracts.gov_token_decimals);
        if !earned.is_positive() {
            return Ok(None);
        }

        Ok(Some(VeDistReward {
            token_id,
            nft: nfts.iter().find(|n| n.id == token_id).cloned(),
            earned,
        }))
    }
}
