//! Vest NFT reader
//!
//! Enumerates an account's veNFTs (`balanceOf` -> `tokenOfOwnerByIndex`),
//! then reads lock state, voting power and delegation for all of them in one
//! batch. Autolock and voted flags are best effort and fall back to `false`.

use alloy_primitives::{Address, U256};
use tracing::{debug, info, warn};

use crate::abi::{IMinter, IVeToken, IVoteFarmer, IVoteManager, IVoter};
use crate::batcher::{decode_outcome, Call, FailurePolicy};
use crate::config::Contracts;
use crate::error::ChainResult;
use crate::model::{TokenAmount, VestNft};
use crate::reader::ChainReader;

/// Harvest window used for delegation APR
const APR_HARVESTS: u64 = 2;

#[derive(Clone)]
pub struct VestReader {
    reader: ChainReader,
    contracts: Contracts,
}

impl VestReader {
    pub fn new(reader: ChainReader, contracts: Contracts) -> Self {
        Self { reader, contracts }
    }

    pub async fn vest_nfts(&self, account: Address) -> ChainResult<Vec<VestNft>> {
        let ve = self.contracts.ve_token;

        let count = self.reader.read(ve, IVeToken::balanceOfCall { owner: account }).await?;
        let count = count.min(U256::from(u32::MAX)).to::<usize>();
        if count == 0 {
            return Ok(Vec::new());
        }

        let index_calls: Vec<_> = (0..count)
            .map(|i| {
                (
                    ve,
                    IVeToken::tokenOfOwnerByIndexCall {
                        owner: account,
                        index: U256::from(i),
                    },
                )
            })
            .collect();
        let ids = self.reader.aggregate(&index_calls).await?;

        let strategies = self.strategies_of(&ids).await?;
        let autolocks = self.autolock_flags(&ids, &strategies).await;
        let voted = self.voted_flags(&ids).await;

        // locked + balanceOfNFT, interleaved per id
        let calls: Vec<Call> = ids
            .iter()
            .flat_map(|&id| {
                [
                    Call::new(ve, &IVeToken::lockedCall { tokenId: id }),
                    Call::new(ve, &IVeToken::balanceOfNFTCall { tokenId: id }),
                ]
            })
            .collect();
        let outcomes = self.reader.batcher().execute(&calls, FailurePolicy::FailFast).await?;

        let mut nfts = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let locked = decode_outcome::<IVeToken::lockedCall>(&outcomes[2 * i])?;
            let value = decode_outcome::<IVeToken::balanceOfNFTCall>(&outcomes[2 * i + 1])?;
            let amount = U256::from(locked.amount.max(0) as u128);

            nfts.push(VestNft {
                id: *id,
                lock_amount: TokenAmount::new(amount, self.contracts.gov_token_decimals),
                lock_ends: locked.end,
                lock_value: TokenAmount::new(value, self.contracts.ve_token_decimals),
                voted: voted[i],
                autolock: autolocks[i],
                delegated: strategies[i] != Address::ZERO,
            });
        }

        info!("🔒 Found {} veNFT(s) for {:?}", nfts.len(), account);
        Ok(nfts)
    }

    /// Strategy holding each NFT; zero when not delegated
    async fn strategies_of(&self, ids: &[U256]) -> ChainResult<Vec<Address>> {
        if self.contracts.vote_manager == Address::ZERO {
            return Ok(vec![Address::ZERO; ids.len()]);
        }
        let calls: Vec<_> = ids
            .iter()
            .map(|&id| (self.contracts.vote_manager, IVoteManager::tokenIdToStratCall { tokenId: id }))
            .collect();
        self.reader.aggregate(&calls).await
    }

    async fn autolock_flags(&self, ids: &[U256], strategies: &[Address]) -> Vec<bool> {
        let mut flags = vec![false; ids.len()];
        let delegated: Vec<usize> = (0..ids.len()).filter(|&i| strategies[i] != Address::ZERO).collect();
        if delegated.is_empty() {
            return flags;
        }

        let calls: Vec<_> = delegated
            .iter()
            .map(|&i| (strategies[i], IVoteFarmer::tokenIdToInfoCall { tokenId: ids[i] }))
            .collect();

        match self.reader.try_aggregate(&calls).await {
            Ok(results) => {
                for (&i, result) in delegated.iter().zip(results) {
                    match result {
                        Ok(info) => flags[i] = info.autolock,
                        Err(e) => debug!("Autolock lookup for #{} failed: {}", ids[i], e),
                    }
                }
            }
            Err(e) => warn!("Autolock lookup failed: {}", e),
        }
        flags
    }

    /// Voted in the current epoch: `lastVoted >= active_period`
    async fn voted_flags(&self, ids: &[U256]) -> Vec<bool> {
        let period = match self.reader.read(self.contracts.minter, IMinter::active_periodCall {}).await {
            Ok(period) => period,
            Err(e) => {
                warn!("Could not read active period: {}", e);
                return vec![false; ids.len()];
            }
        };

        let calls: Vec<_> = ids
            .iter()
            .map(|&id| (self.contracts.voter, IVoter::lastVotedCall { tokenId: id }))
            .collect();

        match self.reader.try_aggregate(&calls).await {
            Ok(results) => results
                .into_iter()
                .map(|r| r.map(|last| last >= period).unwrap_or(false))
                .collect(),
            Err(e) => {
                warn!("Could not read vote timestamps: {}", e);
                vec![false; ids.len()]
            }
        }
    }

    /// Average APR across all strategies; 0 when unavailable
    pub async fn strategies_apr(&self) -> u64 {
        let call = IVoteManager::averageAPRAcrossLastNHarvestsCall {
            n: U256::from(APR_HARVESTS),
        };
        match self.reader.read(self.contracts.vote_manager, call).await {
            Ok(apr) => u64::try_from(apr).unwrap_or(u64::MAX),
            Err(e) => {
                warn!("Strategies APR unavailable: {}", e);
                0
            }
        }
    }

    /// APR of the strategy holding `token_id`; 0 when not delegated or unavailable
    pub async fn nft_apr(&self, token_id: U256) -> u64 {
        let strategy = match self
            .reader
            .read(self.contracts.vote_manager, IVoteManager::tokenIdToStratCall { tokenId: token_id })
            .await
        {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!("Strategy lookup for #{} failed: {}", token_id, e);
                return 0;
            }
        };
        if strategy == Address::ZERO {
            return 0;
        }

        let call = IVoteFarmer::averageAPRAcrossLastNHarvestsCall {
            n: U256::from(APR_HARVESTS),
        };
        match self.reader.read(strategy, call).await {
            Ok(apr) => u64::try_from(apr).unwrap_or(u64::MAX),
            Err(e) => {
                warn!("APR of #{} unavailable: {}", token_id, e);
                0
            }
        }
    }
}
