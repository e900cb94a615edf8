//! veflow - batched multicall reads and staged transaction flows for a
//! vote-escrow DEX (veNFTs, gauges, bribes, rebase, vote manager)
//!
//! - `batcher` / `reader`: Multicall3 chunking and typed reads
//! - `rewards` / `vests` / `pairs` / `supply`: state built from batched reads
//! - `sequencer` / `flows`: ordered approve -> act -> follow-up transactions
//! - `events` / `cache`: notifications and query invalidation
//! - `app`: the container wiring it all together

pub mod abi;
pub mod api;
pub mod app;
pub mod batcher;
pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod flows;
pub mod model;
pub mod pairs;
pub mod reader;
pub mod rewards;
pub mod sequencer;
pub mod supply;
pub mod vests;

#[cfg(test)]
mod testing;
