//! Transaction flows
//!
//! Builders for every multi-step flow the app runs through the sequencer.
//! Building a flow only reads chain state (strategy addresses, pending
//! rewards); nothing is signed until `TransactionSequencer::run`.

use alloy_primitives::{Address, U256};
use tracing::debug;

use crate::abi::{IGauge, IVeDist, IVeToken, IVoteManager, IVoter};
use crate::batcher::Call;
use crate::cache::QueryKey;
use crate::config::Contracts;
use crate::error::{ChainError, ChainResult};
use crate::model::{Pair, VestNft};
use crate::reader::ChainReader;
use crate::rewards::{BribeReward, RewardAggregator, RewardBundle};
use crate::sequencer::{Precondition, Step, StepKind, TxFlow};

const APPROVED_BY_MANAGER: &str = "NFT is approved to be operated by the vote manager";

/// Rejects a missing or zero token id before any chain access
fn token_id(id: Option<U256>) -> ChainResult<U256> {
    match id {
        Some(id) if !id.is_zero() => Ok(id),
        _ => Err(ChainError::invalid("Invalid token ID")),
    }
}

#[derive(Clone)]
pub struct FlowBuilder {
    reader: ChainReader,
    rewards: RewardAggregator,
    contracts: Contracts,
    account: Address,
}

impl FlowBuilder {
    pub fn new(reader: ChainReader, rewards: RewardAggregator, contracts: Contracts, account: Address) -> Self {
        Self {
            reader,
            rewards,
            contracts,
            account,
        }
    }

    fn vote_manager(&self) -> ChainResult<Address> {
        if self.contracts.vote_manager == Address::ZERO {
            return Err(ChainError::missing("vote manager address not configured"));
        }
        Ok(self.contracts.vote_manager)
    }

    /// Approval of `strategy` over the NFT, skipped when already granted
    fn nft_approval_step(&self, id: U256, strategy: Address, action: &str) -> Step {
        Step::new(
            StepKind::Approval,
            "Checking your veNFT approval",
            Call::new(
                self.contracts.ve_token,
                &IVeToken::approveCall {
                    approved: strategy,
                    tokenId: id,
                },
            ),
        )
        .unless(Precondition::NftApproved {
            ve_token: self.contracts.ve_token,
            token_id: id,
            operator: strategy,
        })
        .announcing(action)
        .skip_reason(APPROVED_BY_MANAGER)
    }

    // ============================================
    // DELEGATION
    // ============================================

    pub async fn delegate(&self, id: Option<U256>, autolock: bool) -> ChainResult<TxFlow> {
        let id = token_id(id)?;
        let manager = self.vote_manager()?;

        let strategy = self.reader.read(manager, IVoteManager::selectDepositStrategyCall {}).await?;
        debug!("Deposit strategy for #{}: {:?}", id, strategy);

        let autolock_step = if autolock {
            Step::new(
                StepKind::FollowUp,
                "Checking if you enabled autolock",
                Call::new(manager, &IVoteManager::autoLockCall { tokenId: id, enable: true }),
            )
            .announcing("Enable autolock")
        } else {
            Step::skipped(StepKind::FollowUp, "Checking if you enabled autolock", "Autolock is not enabled")
        };

        Ok(TxFlow {
            title: "Delegate your veNFT to the Vote Manager".into(),
            kind: "Delegate".into(),
            verb: "Delegated".into(),
            steps: vec![
                self.nft_approval_step(id, strategy, "Approve the vote manager to operate your NFT"),
                Step::new(
                    StepKind::Action,
                    "Delegating your veNFT to the vote manager",
                    Call::new(manager, &IVoteManager::delegateCall { tokenId: id }),
                ),
                autolock_step,
            ],
            invalidates: vec![QueryKey::new(["vests"])],
        })
    }

    pub async fn undelegate(&self, id: Option<U256>) -> ChainResult<TxFlow> {
        let id = token_id(id)?;
        let manager = self.vote_manager()?;

        let strategy = self.reader.read(manager, IVoteManager::tokenIdToStratCall { tokenId: id }).await?;
        if strategy == Address::ZERO {
            return Err(ChainError::invalid(format!("veNFT #{} is not delegated", id)));
        }

        Ok(TxFlow {
            title: "Undelegate your veNFT".into(),
            kind: "Undelegate".into(),
            verb: "Undelegated".into(),
            steps: vec![
                self.nft_approval_step(id, strategy, "Approve the vote manager contract to operate your NFT"),
                Step::new(
                    StepKind::Action,
                    "Undelegating your veNFT",
                    Call::new(manager, &IVoteManager::undelegateCall { tokenId: id }),
                ),
            ],
            invalidates: vec![QueryKey::new(["vests"])],
        })
    }

    pub fn autolock(&self, id: Option<U256>, enable: bool) -> ChainResult<TxFlow> {
        let id = token_id(id)?;
        let manager = self.vote_manager()?;
        let (action, verb, doing) = if enable {
            ("Enable", "Enabled", "Enabling")
        } else {
            ("Disable", "Disabled", "Disabling")
        };

        Ok(TxFlow {
            title: format!("{} autolock for your veNFT", action),
            kind: action.into(),
            verb: verb.into(),
            steps: vec![Step::new(
                StepKind::Action,
                format!("{} autolock for your veNFT", doing),
                Call::new(manager, &IVoteManager::autoLockCall { tokenId: id, enable }),
            )],
            invalidates: vec![QueryKey::new(["vests"])],
        })
    }

    // ============================================
    // CLAIMS
    // ============================================

    fn bribe_claim_step(&self, id: U256, bribes: &[BribeReward]) -> Step {
        if bribes.is_empty() {
            return Step::skipped(StepKind::Action, "Checking unclaimed bribes", "No unclaimed bribes found");
        }

        let wrapped: Vec<Address> = bribes
            .iter()
            .filter_map(|b| b.pair.gauge.as_ref().map(|g| g.wrapped_bribe_address))
            .collect();
        let tokens: Vec<Vec<Address>> = bribes
            .iter()
            .map(|b| b.bribes_earned.iter().map(|e| e.token.address).collect())
            .collect();

        Step::new(
            StepKind::Action,
            "Checking unclaimed bribes",
            Call::new(
                self.contracts.voter,
                &IVoter::claimBribesCall {
                    bribes: wrapped,
                    tokens,
                    tokenId: id,
                },
            ),
        )
        .announcing("Unclaimed bribes found, claiming")
    }

    fn rebase_claim_step(&self, id: U256, rewards: &RewardBundle) -> Step {
        if rewards.ve_dist.is_empty() {
            return Step::skipped(
                StepKind::Action,
                "Checking unclaimed rebase distribution",
                "No unclaimed rebase",
            );
        }
        Step::new(
            StepKind::Action,
            "Checking unclaimed rebase distribution",
            Call::new(self.contracts.ve_dist, &IVeDist::claimCall { tokenId: id }),
        )
        .announcing("Claiming rebase distribution")
    }

    /// Claim bribes and rebase, then reset the veNFT's votes
    pub async fn reset(&self, id: Option<U256>, pairs: &[Pair], nfts: &[VestNft]) -> ChainResult<TxFlow> {
        let id = token_id(id)?;
        let rewards = self.rewards.reward_balances(Some(self.account), Some(id), pairs, nfts).await?;

        Ok(TxFlow {
            title: format!("Reset veNFT #{}", id),
            kind: "Reset".into(),
            verb: "Vest Reseted".into(),
            steps: vec![
                self.bribe_claim_step(id, &rewards.bribes),
                self.rebase_claim_step(id, &rewards),
                Step::new(
                    StepKind::FollowUp,
                    "Resetting your veNFT",
                    Call::new(self.contracts.voter, &IVoter::resetCall { tokenId: id }),
                ),
            ],
            invalidates: vec![QueryKey::new(["vests"])],
        })
    }

    /// Every pending bribe, gauge reward and rebase for the account / veNFT
    pub async fn claim_all(&self, id: Option<U256>, pairs: &[Pair], nfts: &[VestNft]) -> ChainResult<TxFlow> {
        if id.is_some() {
            token_id(id)?;
        }
        let rewards = self.rewards.reward_balances(Some(self.account), id, pairs, nfts).await?;

        let mut steps = Vec::new();
        if let Some(id) = id {
            steps.push(self.bribe_claim_step(id, &rewards.bribes));
        }

        if rewards.rewards.is_empty() {
            steps.push(Step::skipped(
                StepKind::Action,
                "Checking unclaimed gauge rewards",
                "No unclaimed gauge rewards",
            ));
        }
        for reward in &rewards.rewards {
            let Some(gauge) = reward.pair.gauge.as_ref() else {
                continue;
            };
            steps.push(Step::new(
                StepKind::Action,
                format!("Claiming {} gauge rewards from {}", reward.earned, reward.pair.symbol),
                Call::new(
                    gauge.address,
                    &IGauge::getRewardCall {
                        account: self.account,
                        tokens: vec![self.contracts.gov_token],
                    },
                ),
            ));
        }

        if let Some(id) = id {
            steps.push(self.rebase_claim_step(id, &rewards));
        }

        Ok(TxFlow {
            title: "Claim all rewards".into(),
            kind: "Claim".into(),
            verb: "Rewards Claimed".into(),
            steps,
            invalidates: vec![QueryKey::new(["vests"]), QueryKey::balances(self.account)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::IBribe;
    use crate::sequencer::TxStatus;
    use crate::testing::{
        bribed_pairs, serve_bribes, serve_claimable, serve_gauge_rewards, token_x, token_y, wrapped_bribe_of,
        Harness,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn strategy() -> Address {
        Address::with_last_byte(0x5a)
    }

    fn contracts() -> Contracts {
        Contracts {
            vote_manager: Address::with_last_byte(0x4d),
            ..Contracts::default()
        }
    }

    fn flows(h: &Harness) -> FlowBuilder {
        let c = contracts();
        let rewards = RewardAggregator::new(h.reader.clone(), c.clone());
        FlowBuilder::new(h.reader.clone(), rewards, c, Address::with_last_byte(0x55))
    }

    /// isApprovedOrOwner answers from a flag that `approve` flips
    fn serve_approval(h: &Harness, approved: bool) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(approved));
        let ve = contracts().ve_token;
        let read = flag.clone();
        h.chain.on::<IVeToken::isApprovedOrOwnerCall, _>(ve, move |c| {
            Some(c.spender == strategy() && read.load(Ordering::SeqCst))
        });
        let write = flag.clone();
        h.chain.on_send::<IVeToken::approveCall, _>(ve, move |c| {
            if c.approved == strategy() {
                write.store(true, Ordering::SeqCst);
            }
        });
        flag
    }

    #[tokio::test]
    async fn test_delegate_unapproved_without_autolock() {
        let h = Harness::new();
        let manager = contracts().vote_manager;
        h.chain.on::<IVoteManager::selectDepositStrategyCall, _>(manager, |_| Some(strategy()));
        let approved = serve_approval(&h, false);

        let flow = flows(&h).delegate(Some(U256::from(7)), false).await.unwrap();
        let uuids: Vec<_> = flow.steps.iter().map(|s| s.uuid).collect();
        let record = h.sequencer.run(flow).await;

        let full = vec![TxStatus::Submitted, TxStatus::Confirmed, TxStatus::Done];
        assert_eq!(h.statuses_of(uuids[0]), full);
        assert_eq!(h.statuses_of(uuids[1]), full);
        assert_eq!(h.statuses_of(uuids[2]), vec![TxStatus::Done]);
        assert_eq!(record.steps[2].description, "Autolock is not enabled");
        assert!(record.is_success());
        assert!(approved.load(Ordering::SeqCst));

        let approvals = h.chain.sent_as::<IVeToken::approveCall>();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].1.tokenId, U256::from(7));
        let delegations = h.chain.sent_as::<IVoteManager::delegateCall>();
        assert_eq!(delegations[0].0, manager);
    }

    #[tokio::test]
    async fn test_delegate_with_autolock_sends_follow_up() {
        let h = Harness::new();
        h.chain
            .on::<IVoteManager::selectDepositStrategyCall, _>(contracts().vote_manager, |_| Some(strategy()));
        serve_approval(&h, true);

        let flow = flows(&h).delegate(Some(U256::from(7)), true).await.unwrap();
        let record = h.sequencer.run(flow).await;

        assert!(record.is_success());
        assert_eq!(record.steps[0].description, APPROVED_BY_MANAGER);
        let autolocks = h.chain.sent_as::<IVoteManager::autoLockCall>();
        assert_eq!(autolocks.len(), 1);
        assert!(autolocks[0].1.enable);
    }

    #[tokio::test]
    async fn test_undelegate_already_approved_sends_only_undelegate() {
        let h = Harness::new();
        h.chain
            .on::<IVoteManager::tokenIdToStratCall, _>(contracts().vote_manager, |_| Some(strategy()));
        serve_approval(&h, true);

        let flow = flows(&h).undelegate(Some(U256::from(9))).await.unwrap();
        let approval_uuid = flow.steps[0].uuid;
        let record = h.sequencer.run(flow).await;

        assert_eq!(h.statuses_of(approval_uuid), vec![TxStatus::Done]);
        assert!(record.is_success());
        assert_eq!(h.chain.sent().len(), 1);
        assert_eq!(h.chain.sent_as::<IVoteManager::undelegateCall>().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_or_missing_token_id_rejected_before_reads() {
        let h = Harness::new();
        let builder = flows(&h);

        for id in [None, Some(U256::ZERO)] {
            assert!(matches!(builder.delegate(id, false).await, Err(ChainError::InvalidInput(_))));
            assert!(matches!(builder.undelegate(id).await, Err(ChainError::InvalidInput(_))));
            assert!(matches!(builder.autolock(id, true), Err(ChainError::InvalidInput(_))));
            assert!(matches!(builder.reset(id, &[], &[]).await, Err(ChainError::InvalidInput(_))));
        }
        assert!(matches!(
            builder.claim_all(Some(U256::ZERO), &[], &[]).await,
            Err(ChainError::InvalidInput(_))
        ));
        assert_eq!(h.chain.direct_calls() + h.chain.aggregate_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_vote_manager() {
        let h = Harness::new();
        let builder = FlowBuilder::new(
            h.reader.clone(),
            RewardAggregator::new(h.reader.clone(), Contracts::default()),
            Contracts::default(),
            Address::with_last_byte(0x55),
        );

        let err = builder.delegate(Some(U256::from(1)), false).await.unwrap_err();
        assert!(matches!(err, ChainError::MissingData(_)));
    }

    #[test]
    fn test_autolock_flow_shape() {
        let h = Harness::new();
        let flow = flows(&h).autolock(Some(U256::from(3)), false).unwrap();

        assert_eq!(flow.title, "Disable autolock for your veNFT");
        assert_eq!(flow.kind, "Disable");
        assert_eq!(flow.steps.len(), 1);
        assert_eq!(flow.steps[0].description, "Disabling autolock for your veNFT");
    }

    #[tokio::test]
    async fn test_reset_claims_bribes_then_resets() {
        let h = Harness::new();
        let id = U256::from(7);
        let pairs = bribed_pairs(2);
        serve_bribes(&h.chain, 2, id, &[(2, token_y().address, U256::from(5))]);
        serve_gauge_rewards(&h.chain, 2, &[]);
        serve_claimable(&h.chain, contracts().ve_dist, U256::ZERO);

        let flow = flows(&h).reset(Some(id), &pairs, &[]).await.unwrap();
        let record = h.sequencer.run(flow).await;

        assert!(record.is_success());
        assert_eq!(record.steps[1].description, "No unclaimed rebase");

        let claims = h.chain.sent_as::<IVoter::claimBribesCall>();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].1.bribes, vec![wrapped_bribe_of(2)]);
        assert_eq!(claims[0].1.tokens, vec![vec![token_x().address, token_y().address]]);
        assert_eq!(h.chain.sent_as::<IVoter::resetCall>().len(), 1);
        assert!(h.chain.sent_as::<IVeDist::claimCall>().is_empty());
    }

    #[tokio::test]
    async fn test_reset_without_rewards_only_resets() {
        let h = Harness::new();
        let id = U256::from(7);
        serve_bribes(&h.chain, 1, id, &[]);
        serve_gauge_rewards(&h.chain, 1, &[]);
        serve_claimable(&h.chain, contracts().ve_dist, U256::ZERO);

        let flow = flows(&h).reset(Some(id), &bribed_pairs(1), &[]).await.unwrap();
        let record = h.sequencer.run(flow).await;

        assert_eq!(record.steps[0].description, "No unclaimed bribes found");
        assert_eq!(h.chain.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_all_gauge_rewards_and_rebase() {
        let h = Harness::new();
        let id = U256::from(7);
        let pairs = bribed_pairs(3);
        serve_bribes(&h.chain, 3, id, &[]);
        serve_gauge_rewards(&h.chain, 3, &[(1, U256::from(10)), (3, U256::from(30))]);
        serve_claimable(&h.chain, contracts().ve_dist, U256::from(4));
        h.cache.insert(QueryKey::rewards(Address::with_last_byte(0x55)), 1u8);

        let flow = flows(&h).claim_all(Some(id), &pairs, &[]).await.unwrap();
        // bribes skipped, two gauges, rebase
        assert_eq!(flow.steps.len(), 4);
        let record = h.sequencer.run(flow).await;

        assert!(record.is_success());
        let claims = h.chain.sent_as::<IGauge::getRewardCall>();
        let gauges: Vec<_> = claims.iter().map(|(target, _)| *target).collect();
        assert_eq!(gauges, vec![crate::testing::gauge_of(1), crate::testing::gauge_of(3)]);
        assert_eq!(claims[0].1.tokens, vec![contracts().gov_token]);
        assert_eq!(h.chain.sent_as::<IVeDist::claimCall>().len(), 1);
        assert_eq!(
            h.cache.is_stale(&QueryKey::rewards(Address::with_last_byte(0x55))),
            Some(true)
        );
    }

    #[tokio::test]
    async fn test_claim_without_token_id_reads_no_bribes() {
        let h = Harness::new();
        let pairs = bribed_pairs(1);
        serve_gauge_rewards(&h.chain, 1, &[]);
        // any bribe read would panic the handler
        h.chain.on::<IBribe::earnedCall, _>(wrapped_bribe_of(1), |_| panic!("bribes read without token id"));

        let flow = flows(&h).claim_all(None, &pairs, &[]).await.unwrap();

        assert_eq!(flow.steps.len(), 1);
        assert!(flow.steps[0].call.is_none());
    }
}
