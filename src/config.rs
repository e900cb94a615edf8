//! Configuration for veflow
//!
//! Loaded from environment variables (and `.env`), or from a TOML file.
//! Contract addresses default to the Arbitrum deployment.

use alloy_primitives::{address, Address};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::abi::MULTICALL3;
use crate::batcher::DEFAULT_CHUNK_SIZE;

// ============================================
// CONTRACT ADDRESSES
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contracts {
    pub multicall: Address,

    /// Governance / reward token (FLOW)
    pub gov_token: Address,
    pub gov_token_decimals: u8,

    /// Vote-escrow NFT (veFLOW)
    pub ve_token: Address,
    pub ve_token_decimals: u8,

    /// Rebase distributor
    pub ve_dist: Address,
    pub voter: Address,
    pub minter: Address,

    /// Accepts delegated veNFTs; zero when not deployed
    pub vote_manager: Address,

    /// Treasury multisig and timelock; their gov balance is not circulating.
    /// Zero means not tracked.
    #[serde(default)]
    pub msig: Address,
    #[serde(default)]
    pub timelock: Address,
}

impl Contracts {
    /// Holders whose gov token balance is excluded from circulating supply
    pub fn non_circulating_holders(&self) -> Vec<Address> {
        [self.ve_token, self.minter, self.msig, self.ve_dist, self.timelock]
            .into_iter()
            .filter(|a| *a != Address::ZERO)
            .collect()
    }
}

impl Default for Contracts {
    fn default() -> Self {
        Self {
            multicall: MULTICALL3,
            gov_token: address!("6D321e7FC93c43D41C4A7D2938fd3A03a37D0Ec5"),
            gov_token_decimals: 18,
            ve_token: address!("c0593981e9F75c9821521788923967A39D4B2417"),
            ve_token_decimals: 18,
            ve_dist: address!("5Ec33906b3142450aB999b939CF99A0183Bfa5c2"),
            voter: address!("0F963D7e12121071Adbd3D017462503f7F11c7f9"),
            minter: address!("4c24471334394d19edD03b80986354BF146Bb8d4"),
            vote_manager: Address::ZERO,
            msig: Address::ZERO,
            timelock: address!("d0cC9738866cd82B237A14c92ac60577602d6c18"),
        }
    }
}

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // ========== Network Settings ==========
    pub rpc_url: String,

    /// Chain ID (42161 = Arbitrum One)
    pub chain_id: u64,

    // ========== Snapshot API ==========
    /// Base URL serving `/api/pairs`
    pub api_url: String,

    /// Seconds between snapshot refreshes
    pub pairs_poll_secs: u64,

    // ========== Multicall ==========
    /// Calls per `aggregate3` chunk
    pub multicall_chunk_size: usize,

    // ========== Wallet Settings ==========
    /// Account to read for; defaults to the signer when a key is set
    pub account_address: Option<Address>,

    /// Signing key (KEEP SECRET!), never written back to disk
    #[serde(default, skip_serializing)]
    pub private_key: Option<String>,

    pub contracts: Contracts,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Contracts::default();

        Ok(Self {
            // Network
            rpc_url: env::var("RPC_URL").unwrap_or_else(|_| "https://arb1.arbitrum.io/rpc".to_string()),
            chain_id: env_or("CHAIN_ID", 42161),

            // Snapshot API
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            pairs_poll_secs: env_or("PAIRS_POLL_SECS", 300),

            // Multicall
            multicall_chunk_size: env_or("MULTICALL_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),

            contracts: Contracts {
                multicall: env_or("MULTICALL_ADDRESS", defaults.multicall),
                gov_token: env_or("GOV_TOKEN_ADDRESS", defaults.gov_token),
                gov_token_decimals: env_or("GOV_TOKEN_DECIMALS", defaults.gov_token_decimals),
                ve_token: env_or("VE_TOKEN_ADDRESS", defaults.ve_token),
                ve_token_decimals: env_or("VE_TOKEN_DECIMALS", defaults.ve_token_decimals),
                ve_dist: env_or("VE_DIST_ADDRESS", defaults.ve_dist),
                voter: env_or("VOTER_ADDRESS", defaults.voter),
                minter: env_or("MINTER_ADDRESS", defaults.minter),
                vote_manager: env_or("VOTE_MANAGER_ADDRESS", defaults.vote_manager),
                msig: env_or("MSIG_ADDRESS", defaults.msig),
                timelock: env_or("TIMELOCK_ADDRESS", defaults.timelock),
            },

            // Wallet
            account_address: env::var("ACCOUNT_ADDRESS").ok().and_then(|s| Address::from_str(s.trim()).ok()),
            private_key: env::var("PRIVATE_KEY").ok().filter(|k| !k.trim().is_empty()),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn has_signer(&self) -> bool {
        self.private_key.is_some()
    }

    /// Validate configuration before connecting
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre::eyre!("Invalid RPC_URL - please set a reachable RPC endpoint"));
        }

        if self.multicall_chunk_size == 0 {
            return Err(eyre::eyre!("MULTICALL_CHUNK_SIZE must be greater than 0"));
        }

        if self.pairs_poll_secs == 0 {
            return Err(eyre::eyre!("PAIRS_POLL_SECS must be greater than 0"));
        }

        let required = [
            ("MULTICALL_ADDRESS", self.contracts.multicall),
            ("GOV_TOKEN_ADDRESS", self.contracts.gov_token),
            ("VE_TOKEN_ADDRESS", self.contracts.ve_token),
            ("VE_DIST_ADDRESS", self.contracts.ve_dist),
            ("VOTER_ADDRESS", self.contracts.voter),
            ("MINTER_ADDRESS", self.contracts.minter),
        ];
        for (key, addr) in required {
            if addr == Address::ZERO {
                return Err(eyre::eyre!("{} must not be the zero address", key));
            }
        }

        Ok(())
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let short = |a: Address| {
            let s = format!("{:?}", a);
            format!("{}…{}", &s[..8], &s[s.len() - 6..])
        };

        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║                  VEFLOW - CONFIGURATION                    ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Chain ID:          {:^40} ║", self.chain_id);
        println!("║ Snapshot Poll:     {:^40} ║", format!("{}s", self.pairs_poll_secs));
        println!("║ Multicall Chunk:   {:^40} ║", self.multicall_chunk_size);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ CONTRACTS                                                  ║");
        println!("║ • Gov Token:       {:^40} ║", short(self.contracts.gov_token));
        println!("║ • Ve Token:        {:^40} ║", short(self.contracts.ve_token));
        println!("║ • Ve Dist:         {:^40} ║", short(self.contracts.ve_dist));
        println!("║ • Voter:           {:^40} ║", short(self.contracts.voter));
        println!("║ • Vote Manager:    {:^40} ║",
            if self.contracts.vote_manager == Address::ZERO {
                "✗ Not Set".to_string()
            } else {
                short(self.contracts.vote_manager)
            }
        );
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ WALLET                                                     ║");
        println!("║ • Account:         {:^40} ║",
            self.account_address.map(short).unwrap_or_else(|| "✗ Not Set".to_string())
        );
        println!("║ • Signer Key:      {:^40} ║",
            if self.has_signer() { "✓ Configured" } else { "✗ Read Only" }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: "https://arb1.arbitrum.io/rpc".to_string(),
            chain_id: 42161,
            api_url: "http://localhost:3000".to_string(),
            pairs_poll_secs: 300,
            multicall_chunk_size: DEFAULT_CHUNK_SIZE,
            contracts: Contracts::default(),
            account_address: None,
            private_key: None,
        }
    }
}

// ============================================
// TESTS
// ============================================
