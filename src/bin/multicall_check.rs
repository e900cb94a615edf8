//! Multicall check
//!
//! Run with: cargo run --bin multicall-check [NFT_COUNT]
//!
//! Reads voting power of veNFTs #1..=N one by one, then again through the
//! call batcher (small chunks, so several aggregates run concurrently), and
//! checks both agree.

use alloy_primitives::U256;
use eyre::Result;
use std::sync::Arc;
use std::time::Instant;

use veflow::abi::IVeToken;
use veflow::batcher::CallBatcher;
use veflow::chain::RpcChain;
use veflow::config::Config;
use veflow::reader::ChainReader;

/// Small on purpose, so N > chunk exercises chunking
const CHECK_CHUNK_SIZE: usize = 7;

#[tokio::main]
async fn main() -> Result<()> {
    println!("🧪 Multicall Check");
    println!("==================\n");

    let config = Config::from_env()?;
    let count: u64 = std::env::args().nth(1).and_then(|n| n.parse().ok()).unwrap_or(20);

    println!("📡 RPC: {}\n", &config.rpc_url[..50.min(config.rpc_url.len())]);

    let chain = Arc::new(RpcChain::connect(&config.rpc_url)?);
    let batcher = CallBatcher::new(chain.clone(), config.contracts.multicall, CHECK_CHUNK_SIZE);
    let reader = ChainReader::new(chain, batcher);
    let ve = config.contracts.ve_token;

    let calls: Vec<_> = (1..=count)
        .map(|id| (ve, IVeToken::balanceOfNFTCall { tokenId: U256::from(id) }))
        .collect();

    // ============================================
    // TEST 1: Individual Calls
    // ============================================
    println!("📊 Test 1: Individual eth_call");
    println!("------------------------------");

    let start = Instant::now();
    let mut individual = Vec::with_capacity(calls.len());
    for (target, call) in &calls {
        individual.push(reader.read(*target, call.clone()).await.ok());
    }
    let individual_time = start.elapsed();
    println!("   Read {} veNFTs in {:?}", count, individual_time);
    println!("   RPC calls: {}", count);

    // ============================================
    // TEST 2: Batched
    // ============================================
    println!("\n📊 Test 2: CallBatcher (chunk size {})", CHECK_CHUNK_SIZE);
    println!("---------------------------------------");

    let start = Instant::now();
    let batched = reader.try_aggregate(&calls).await?;
    let batched_time = start.elapsed();
    let chunks = calls.len().div_ceil(CHECK_CHUNK_SIZE);
    println!("   Read {} veNFTs in {:?}", count, batched_time);
    println!("   RPC calls: {}", chunks);

    // ============================================
    // RESULTS COMPARISON
    // ============================================
    println!("\n📈 Results Comparison");
    println!("---------------------");
    let speedup = individual_time.as_secs_f64() / batched_time.as_secs_f64().max(f64::EPSILON);
    println!("   Individual: {:?}", individual_time);
    println!("   Batched:    {:?}", batched_time);
    println!("   Speedup:    {:.1}x faster", speedup);

    println!("\n✅ Data Verification");
    println!("--------------------");

    let mut all_match = true;
    for (i, (single, batch)) in individual.iter().zip(batched.iter()).enumerate() {
        let batch = batch.as_ref().ok();
        let matched = single.as_ref() == batch;
        let shown = single.map(|v| v.to_string()).unwrap_or_else(|| "reverted".to_string());
        println!("   veNFT #{}: {} ({})", i + 1, if matched { "✓" } else { "✗" }, shown);
        all_match &= matched;
    }

    println!(
        "\n{}",
        if all_match {
            "✅ All data matches! Batching preserves order and values."
        } else {
            "❌ Some data mismatches. Check the batcher."
        }
    );

    Ok(())
}
