//! Contract interfaces used by the reader, the reward aggregator and the flows

use alloy_primitives::{address, Address};
use alloy_sol_types::sol;

/// Multicall3 address (same on all EVM chains)
pub const MULTICALL3: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

// ============================================
// MULTICALL3 INTERFACE
// ============================================

sol! {
    /// Multicall3 - deployed at same address on all EVM chains
    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls)
            external payable returns (Result[] memory returnData);
    }
}

// ============================================
// TOKEN + PAIR INTERFACES
// ============================================

sol! {
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
        function name() external view returns (string);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    interface IPair {
        function totalSupply() external view returns (uint256);
        function reserve0() external view returns (uint256);
        function reserve1() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
    }
}

// ============================================
// VOTE-ESCROW INTERFACES
// ============================================

sol! {
    interface IVeToken {
        function balanceOf(address owner) external view returns (uint256);
        function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
        function locked(uint256 tokenId) external view returns (int128 amount, uint256 end);
        function balanceOfNFT(uint256 tokenId) external view returns (uint256);
        function isApprovedOrOwner(address spender, uint256 tokenId) external view returns (bool);
        function approve(address approved, uint256 tokenId) external;
    }

    interface IVeDist {
        function claimable(uint256 tokenId) external view returns (uint256);
        function claim(uint256 tokenId) external returns (uint256);
    }

    interface IMinter {
        function active_period() external view returns (uint256);
    }
}

// ============================================
// VOTER / GAUGE / BRIBE INTERFACES
// ============================================

sol! {
    interface IVoter {
        function totalWeight() external view returns (uint256);
        function isAlive(address gauge) external view returns (bool);
        function weights(address pair) external view returns (uint256);
        function lastVoted(uint256 tokenId) external view returns (uint256);
        function claimBribes(address[] bribes, address[][] tokens, uint256 tokenId) external;
        function reset(uint256 tokenId) external;
    }

    interface IGauge {
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function earned(address token, address account) external view returns (uint256);
        function getReward(address account, address[] tokens) external;
    }

    interface IBribe {
        function earned(address token, uint256 tokenId) external view returns (uint256);
    }
}

// ============================================
// VOTE MANAGER (DELEGATION)
// ============================================

sol! {
    interface IVoteManager {
        function selectDepositStrategy() external view returns (address strategy);
        function tokenIdToStrat(uint256 tokenId) external view returns (address);
        function averageAPRAcrossLastNHarvests(uint256 n) external view returns (uint256);
        function delegate(uint256 tokenId) external;
        function undelegate(uint256 tokenId) external;
        function autoLock(uint256 tokenId, bool enable) external;
    }

    interface IVoteFarmer {
        function tokenIdToInfo(uint256 tokenId) external view returns (address owner, bool autolock);
        function averageAPRAcrossLastNHarvests(uint256 n) external view returns (uint256);
    }
}
