//! Application container
//!
//! Owns the chain connection, the query cache and the event bus, and wires
//! every reader and flow builder to them. Failures of user-level operations
//! are published as `Event::Error` as well as returned.

use alloy_primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{PairsApi, PairsSnapshot, SnapshotPoller};
use crate::batcher::CallBatcher;
use crate::cache::{QueryCache, QueryKey};
use crate::chain::{ChainClient, RpcChain, TransactionSender};
use crate::config::Config;
use crate::error::{ChainError, ChainResult};
use crate::events::{Event, EventBus};
use crate::flows::FlowBuilder;
use crate::model::{Pair, TokenAmount, VestNft};
use crate::pairs::PairEnricher;
use crate::reader::ChainReader;
use crate::rewards::{RewardAggregator, RewardBundle};
use crate::sequencer::{TransactionRecord, TransactionSequencer, TxFlow};
use crate::supply::{market_cap, SupplyReader};
use crate::vests::VestReader;

/// Native coin is always 18 decimals
const NATIVE_DECIMALS: u8 = 18;

/// Enriched pairs and the snapshot they were built from
struct EnrichedPairs {
    source: Arc<PairsSnapshot>,
    pairs: Arc<Vec<Pair>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Balances {
    pub native: TokenAmount,
    pub gov: TokenAmount,
}

pub struct App {
    config: Config,
    account: Option<Address>,
    cache: Arc<QueryCache>,
    bus: Arc<EventBus>,
    api: PairsApi,
    reader: ChainReader,
    enricher: PairEnricher,
    vests: VestReader,
    rewards: RewardAggregator,
    supply: SupplyReader,
    sequencer: TransactionSequencer,
}

impl App {
    /// Connect over RPC; signs only when a private key is configured
    pub fn connect(config: Config) -> ChainResult<Self> {
        let chain = match &config.private_key {
            Some(key) => RpcChain::connect_with_signer(&config.rpc_url, key, config.chain_id)?,
            None => RpcChain::connect(&config.rpc_url)?,
        };
        let signer = chain.signer_address();
        let chain = Arc::new(chain);
        Self::with_chain(config, chain.clone(), chain, signer)
    }

    pub fn with_chain(
        config: Config,
        client: Arc<dyn ChainClient>,
        sender: Arc<dyn TransactionSender>,
        signer: Option<Address>,
    ) -> ChainResult<Self> {
        let cache = Arc::new(QueryCache::new());
        let bus = Arc::new(EventBus::new());
        let contracts = config.contracts.clone();

        let batcher = CallBatcher::new(client.clone(), contracts.multicall, config.multicall_chunk_size);
        let reader = ChainReader::new(client, batcher);
        let sequencer = TransactionSequencer::new(reader.clone(), sender, bus.clone(), cache.clone());

        Ok(Self {
            account: config.account_address.or(signer),
            api: PairsApi::new(config.api_url.clone())?,
            enricher: PairEnricher::new(reader.clone(), contracts.clone()),
            vests: VestReader::new(reader.clone(), contracts.clone()),
            supply: SupplyReader::new(reader.clone(), contracts.clone()),
            rewards: RewardAggregator::new(reader.clone(), contracts),
            reader,
            sequencer,
            cache,
            bus,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn reader(&self) -> &ChainReader {
        &self.reader
    }

    pub fn vests(&self) -> &VestReader {
        &self.vests
    }

    pub fn account(&self) -> ChainResult<Address> {
        self.account.ok_or_else(|| ChainError::invalid("account not found (set ACCOUNT_ADDRESS or PRIVATE_KEY)"))
    }

    /// Publish a failure before handing it back
    fn report<T>(&self, result: ChainResult<T>) -> ChainResult<T> {
        if let Err(e) = &result {
            self.bus.emit(Event::Error(e.to_string()));
        }
        result
    }

    // ============================================
    // READS
    // ============================================

    pub async fn snapshot(&self) -> ChainResult<Arc<PairsSnapshot>> {
        let result = self.cache.get_or_fetch(QueryKey::pairs(), || self.api.fetch()).await;
        self.report(result)
    }

    /// Snapshot pairs enriched with on-chain state for the account.
    /// Rebuilt whenever the cached snapshot is replaced.
    pub async fn pairs(&self) -> ChainResult<Arc<Vec<Pair>>> {
        let account = self.report(self.account())?;
        let snapshot = self.snapshot().await?;

        let key = QueryKey::enriched_pairs(account);
        let outdated = self
            .cache
            .get::<EnrichedPairs>(&key)
            .is_some_and(|cached| !Arc::ptr_eq(&cached.source, &snapshot));
        if outdated {
            self.cache.invalidate(&key);
        }

        let enricher = &self.enricher;
        let result = self
            .cache
            .get_or_fetch(key, move || async move {
                let pairs = enricher
                    .enrich(account, snapshot.pairs(), &snapshot.unresolved_tokens())
                    .await?;
                Ok(EnrichedPairs {
                    source: snapshot,
                    pairs: Arc::new(pairs),
                })
            })
            .await;
        self.report(result).map(|enriched| enriched.pairs.clone())
    }

    /// Native and gov token balances of the account
    pub async fn balances(&self) -> ChainResult<Arc<Balances>> {
        let account = self.report(self.account())?;
        let contracts = &self.config.contracts;
        let reader = &self.reader;

        let result = self
            .cache
            .get_or_fetch(QueryKey::balances(account), move || async move {
                let (native, gov) = futures::try_join!(
                    reader.native_balance(account),
                    reader.token_balance(contracts.gov_token, account)
                )?;
                Ok(Balances {
                    native: TokenAmount::new(native, NATIVE_DECIMALS),
                    gov: TokenAmount::new(gov, contracts.gov_token_decimals),
                })
            })
            .await;
        self.report(result)
    }

    pub async fn circulating_supply(&self) -> ChainResult<Arc<TokenAmount>> {
        let result = self
            .cache
            .get_or_fetch(QueryKey::circulating_supply(), || self.supply.circulating_supply())
            .await;
        self.report(result)
    }

    /// Circulating supply times the snapshot's gov token price
    pub async fn market_cap(&self) -> ChainResult<f64> {
        let supply = self.circulating_supply().await?;
        let snapshot = self.snapshot().await?;
        self.report(market_cap(&supply, snapshot.price_of(self.config.contracts.gov_token)))
    }

    /// The account's veNFTs; an empty list (and an `Error` event) on failure
    pub async fn vest_nfts(&self) -> Vec<VestNft> {
        let account = match self.report(self.account()) {
            Ok(account) => account,
            Err(_) => return Vec::new(),
        };

        let result = self
            .cache
            .get_or_fetch(QueryKey::vests(account), || self.vests.vest_nfts(account))
            .await;

        match self.report(result) {
            Ok(nfts) => {
                let nfts = (*nfts).clone();
                self.bus.emit(Event::VestNftsReturned(nfts.clone()));
                nfts
            }
            Err(e) => {
                warn!("Could not load veNFTs: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn reward_balances(&self, token_id: Option<U256>) -> ChainResult<RewardBundle> {
        let pairs = self.pairs().await?;
        let nfts = self.vest_nfts().await;

        let result = self
            .rewards
            .reward_balances(self.account, token_id, &pairs, &nfts)
            .await;
        let bundle = self.report(result)?;
        self.bus.emit(Event::RewardBalancesReturned(bundle.clone()));
        Ok(bundle)
    }

    // ============================================
    // FLOWS
    // ============================================

    fn flows(&self) -> ChainResult<FlowBuilder> {
        Ok(FlowBuilder::new(
            self.reader.clone(),
            self.rewards.clone(),
            self.config.contracts.clone(),
            self.account()?,
        ))
    }

    /// Build then run; a build failure never reaches the sequencer
    async fn run(&self, flow: ChainResult<TxFlow>) -> ChainResult<TransactionRecord> {
        let flow = self.report(flow)?;
        Ok(self.sequencer.run(flow).await)
    }

    pub async fn delegate(&self, token_id: Option<U256>, autolock: bool) -> ChainResult<TransactionRecord> {
        let flow = match self.flows() {
            Ok(flows) => flows.delegate(token_id, autolock).await,
            Err(e) => Err(e),
        };
        self.run(flow).await
    }

    pub async fn undelegate(&self, token_id: Option<U256>) -> ChainResult<TransactionRecord> {
        let flow = match self.flows() {
            Ok(flows) => flows.undelegate(token_id).await,
            Err(e) => Err(e),
        };
        self.run(flow).await
    }

    pub async fn set_autolock(&self, token_id: Option<U256>, enable: bool) -> ChainResult<TransactionRecord> {
        let flow = self.flows().and_then(|flows| flows.autolock(token_id, enable));
        self.run(flow).await
    }

    pub async fn reset(&self, token_id: Option<U256>) -> ChainResult<TransactionRecord> {
        let pairs = self.pairs().await?;
        let nfts = self.vest_nfts().await;
        let flow = match self.flows() {
            Ok(flows) => flows.reset(token_id, &pairs, &nfts).await,
            Err(e) => Err(e),
        };
        self.run(flow).await
    }

    pub async fn claim_all(&self, token_id: Option<U256>) -> ChainResult<TransactionRecord> {
        let pairs = self.pairs().await?;
        let nfts = self.vest_nfts().await;
        let flow = match self.flows() {
            Ok(flows) => flows.claim_all(token_id, &pairs, &nfts).await,
            Err(e) => Err(e),
        };
        self.run(flow).await
    }

    /// Keep the pair snapshot fresh in the background
    pub fn watch(&self) -> JoinHandle<()> {
        let interval = Duration::from_secs(self.config.pairs_poll_secs);
        info!("👀 Watching pairs snapshot every {}s", interval.as_secs());
        SnapshotPoller::new(self.api.clone(), self.cache.clone(), self.bus.clone(), interval).spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{IPair, IVeToken, IVoteManager, IERC20};
    use crate::events::EventName;
    use crate::sequencer::TxStatus;
    use crate::testing::MockChain;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    fn account() -> Address {
        Address::with_last_byte(0x55)
    }

    fn app(chain: &Arc<MockChain>, account: Option<Address>) -> App {
        let mut config = Config::default();
        config.account_address = account;
        config.contracts.vote_manager = Address::with_last_byte(0x4d);
        App::with_chain(config, chain.clone(), chain.clone(), None).unwrap()
    }

    fn record_events(app: &App) -> Arc<Mutex<Vec<EventName>>> {
        let names = Arc::new(Mutex::new(Vec::new()));
        let sink = names.clone();
        app.bus().subscribe_all(move |e| sink.lock().unwrap().push(e.name()));
        names
    }

    #[tokio::test]
    async fn test_vest_failure_is_published_not_returned() {
        let chain = Arc::new(MockChain::new());
        chain.fail_transport(true);
        let app = app(&chain, Some(account()));
        let events = record_events(&app);

        let nfts = app.vest_nfts().await;

        assert!(nfts.is_empty());
        assert_eq!(*events.lock().unwrap(), vec![EventName::Error]);
    }

    #[tokio::test]
    async fn test_vests_emit_returned_event() {
        let chain = Arc::new(MockChain::new());
        chain.on::<IVeToken::balanceOfCall, _>(Config::default().contracts.ve_token, |_| Some(U256::ZERO));
        let app = app(&chain, Some(account()));
        let events = record_events(&app);

        app.vest_nfts().await;

        assert_eq!(*events.lock().unwrap(), vec![EventName::VestNftsReturned]);
    }

    #[tokio::test]
    async fn test_missing_account_reports_error() {
        let chain = Arc::new(MockChain::new());
        let app = app(&chain, None);
        let events = record_events(&app);

        let err = app.delegate(Some(U256::from(1)), false).await.unwrap_err();

        assert!(matches!(err, ChainError::InvalidInput(_)));
        assert_eq!(*events.lock().unwrap(), vec![EventName::Error]);
    }

    #[tokio::test]
    async fn test_pairs_enriched_from_cached_snapshot() {
        let chain = Arc::new(MockChain::new());
        serve_pair(&chain, Address::with_last_byte(0x11));

        let app = app(&chain, Some(account()));
        let snapshot: PairsSnapshot = serde_json::from_str(
            r#"{"data": [{
                "address": "0x0000000000000000000000000000000000000011",
                "symbol": "vAMM-A/B",
                "gauge_address": "",
                "token0": {"address": "0x00000000000000000000000000000000000000a0"},
                "token1": {"address": "0x00000000000000000000000000000000000000b0"}
            }]}"#,
        )
        .unwrap();
        app.cache().insert(QueryKey::pairs(), snapshot);

        let pairs = app.pairs().await.unwrap();

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].balance.raw, U256::from(3));
        assert_eq!(pairs[0].reserve1.raw, U256::from(2));
    }

    fn snapshot_of(pairs: &[u8]) -> PairsSnapshot {
        let data: Vec<String> = pairs
            .iter()
            .map(|last| {
                format!(
                    r#"{{
                        "address": "0x00000000000000000000000000000000000000{:02x}",
                        "gauge_address": "",
                        "token0": {{"address": "0x00000000000000000000000000000000000000a0", "decimals": 18}},
                        "token1": {{"address": "0x00000000000000000000000000000000000000b0", "decimals": 6}}
                    }}"#,
                    last
                )
            })
            .collect();
        serde_json::from_str(&format!(r#"{{"data": [{}]}}"#, data.join(","))).unwrap()
    }

    fn serve_pair(chain: &MockChain, pair: Address) {
        chain.on::<IPair::totalSupplyCall, _>(pair, |_| Some(U256::from(100)));
        chain.on::<IPair::reserve0Call, _>(pair, |_| Some(U256::from(1)));
        chain.on::<IPair::reserve1Call, _>(pair, |_| Some(U256::from(2)));
        chain.on::<IPair::balanceOfCall, _>(pair, |_| Some(U256::from(3)));
    }

    #[tokio::test]
    async fn test_new_snapshot_rebuilds_enriched_pairs() {
        let chain = Arc::new(MockChain::new());
        serve_pair(&chain, Address::with_last_byte(0x11));
        serve_pair(&chain, Address::with_last_byte(0x12));
        let app = app(&chain, Some(account()));

        app.cache().insert(QueryKey::pairs(), snapshot_of(&[0x11]));
        assert_eq!(app.pairs().await.unwrap().len(), 1);

        // what a snapshot refresh does
        app.cache().insert(QueryKey::pairs(), snapshot_of(&[0x11, 0x12]));
        let pairs = app.pairs().await.unwrap();

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].address, Address::with_last_byte(0x12));
    }

    #[tokio::test]
    async fn test_same_snapshot_serves_cached_pairs() {
        let chain = Arc::new(MockChain::new());
        serve_pair(&chain, Address::with_last_byte(0x11));
        let app = app(&chain, Some(account()));
        app.cache().insert(QueryKey::pairs(), snapshot_of(&[0x11]));

        app.pairs().await.unwrap();
        let reads = chain.aggregate_calls();
        app.pairs().await.unwrap();

        assert_eq!(chain.aggregate_calls(), reads);
    }

    #[tokio::test]
    async fn test_claim_refreshes_cached_balances() {
        let chain = Arc::new(MockChain::new());
        let contracts = Config::default().contracts;
        let held = Arc::new(AtomicU64::new(5));
        let h = held.clone();
        chain.on::<IERC20::balanceOfCall, _>(contracts.gov_token, move |_| Some(U256::from(h.load(Ordering::SeqCst))));
        chain.on::<IVeToken::balanceOfCall, _>(contracts.ve_token, |_| Some(U256::ZERO));
        let app = app(&chain, Some(account()));
        app.cache().insert(QueryKey::pairs(), PairsSnapshot::default());

        assert_eq!(app.balances().await.unwrap().gov.raw, U256::from(5));
        held.store(9, Ordering::SeqCst);
        assert_eq!(app.balances().await.unwrap().gov.raw, U256::from(5));

        let record = app.claim_all(None).await.unwrap();
        assert!(record.is_success());

        assert_eq!(app.balances().await.unwrap().gov.raw, U256::from(9));
    }

    #[tokio::test]
    async fn test_market_cap_uses_snapshot_price() {
        let chain = Arc::new(MockChain::new());
        let contracts = Config::default().contracts;
        chain.on::<IERC20::totalSupplyCall, _>(contracts.gov_token, |_| Some(U256::from(10u128.pow(20))));
        chain.on::<IERC20::balanceOfCall, _>(contracts.gov_token, |_| Some(U256::ZERO));
        let app = app(&chain, Some(account()));

        let snapshot: PairsSnapshot = serde_json::from_str(&format!(
            r#"{{"prices": [{{"address": "{}", "decimals": 18, "price": 0.5}}]}}"#,
            contracts.gov_token
        ))
        .unwrap();
        app.cache().insert(QueryKey::pairs(), snapshot);

        assert_eq!(app.market_cap().await.unwrap(), 50.0);

        app.cache().insert(QueryKey::pairs(), PairsSnapshot::default());
        assert!(matches!(app.market_cap().await, Err(ChainError::MissingData(_))));
    }

    #[tokio::test]
    async fn test_autolock_flow_runs_through_bus() {
        let chain = Arc::new(MockChain::new());
        let app = app(&chain, Some(account()));
        let events = record_events(&app);

        let record = app.set_autolock(Some(U256::from(4)), true).await.unwrap();

        assert_eq!(record.status(), TxStatus::Done);
        let sent = chain.sent_as::<IVoteManager::autoLockCall>();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.tokenId, U256::from(4));
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                EventName::TxAdded,
                EventName::TxStatus,
                EventName::TxStatus,
                EventName::TxStatus,
                EventName::DataUpdated,
            ]
        );
    }
}
