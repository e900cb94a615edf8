//! In-memory chain for unit tests
//!
//! Contracts are modelled as handlers keyed by `(target, selector)`. The mock
//! answers Multicall3 `aggregate3` by dispatching every inner call to those
//! handlers, so batched and direct reads see the same state.

use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::abi::{IBribe, IGauge, IMulticall3, IVeDist, MULTICALL3};
use crate::batcher::CallBatcher;
use crate::cache::QueryCache;
use crate::chain::{ChainClient, TransactionSender};
use crate::error::{ChainError, ChainResult};
use crate::events::{Event, EventBus, EventName};
use crate::model::{fixtures, Asset, Pair};
use crate::reader::ChainReader;
use crate::sequencer::{StepUpdate, TransactionSequencer, TxStatus};

type Handler = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;
type SendHook = Box<dyn Fn(&[u8]) + Send + Sync>;
type Key = (Address, [u8; 4]);

fn key_of(target: Address, data: &[u8]) -> Option<Key> {
    let selector: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some((target, selector))
}

pub struct MockChain {
    handlers: Mutex<HashMap<Key, Handler>>,
    send_hooks: Mutex<HashMap<Key, SendHook>>,
    rejected: Mutex<HashSet<Key>>,
    reverting: Mutex<HashSet<Key>>,
    reverted_hashes: Mutex<HashSet<TxHash>>,
    balances: Mutex<HashMap<Address, U256>>,
    sent: Mutex<Vec<(Address, Bytes)>>,
    aggregate_calls: AtomicUsize,
    direct_calls: AtomicUsize,
    nonce: AtomicU64,
    transport_down: AtomicBool,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            send_hooks: Mutex::new(HashMap::new()),
            rejected: Mutex::new(HashSet::new()),
            reverting: Mutex::new(HashSet::new()),
            reverted_hashes: Mutex::new(HashSet::new()),
            balances: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            aggregate_calls: AtomicUsize::new(0),
            direct_calls: AtomicUsize::new(0),
            nonce: AtomicU64::new(0),
            transport_down: AtomicBool::new(false),
        }
    }

    /// Answer `C` on `target`; returning `None` makes the call revert
    pub fn on<C, F>(&self, target: Address, handler: F)
    where
        C: SolCall + 'static,
        F: Fn(C) -> Option<C::Return> + Send + Sync + 'static,
    {
        let handler: Handler = Box::new(move |data: &[u8]| {
            let call = C::abi_decode(data).ok()?;
            handler(call).map(|ret| C::abi_encode_returns(&ret))
        });
        self.handlers.lock().unwrap().insert((target, C::SELECTOR), handler);
    }

    /// Run `hook` after `C` is sent to `target` (state transitions)
    pub fn on_send<C, F>(&self, target: Address, hook: F)
    where
        C: SolCall + 'static,
        F: Fn(C) + Send + Sync + 'static,
    {
        let hook: SendHook = Box::new(move |data: &[u8]| {
            if let Ok(call) = C::abi_decode(data) {
                hook(call);
            }
        });
        self.send_hooks.lock().unwrap().insert((target, C::SELECTOR), hook);
    }

    /// The signer refuses to sign `C` on `target`
    pub fn reject_on<C: SolCall>(&self, target: Address) {
        self.rejected.lock().unwrap().insert((target, C::SELECTOR));
    }

    /// `C` on `target` is broadcast but reverts on inclusion
    pub fn revert_on<C: SolCall>(&self, target: Address) {
        self.reverting.lock().unwrap().insert((target, C::SELECTOR));
    }

    pub fn set_native_balance(&self, account: Address, wei: U256) {
        self.balances.lock().unwrap().insert(account, wei);
    }

    pub fn fail_transport(&self, down: bool) {
        self.transport_down.store(down, Ordering::SeqCst);
    }

    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn direct_calls(&self) -> usize {
        self.direct_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(Address, Bytes)> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent transactions that decode as `C`, in send order
    pub fn sent_as<C: SolCall>(&self) -> Vec<(Address, C)> {
        self.sent()
            .into_iter()
            .filter_map(|(target, data)| C::abi_decode(&data).ok().map(|c| (target, c)))
            .collect()
    }

    fn dispatch(&self, target: Address, data: &[u8]) -> Option<Vec<u8>> {
        let key = key_of(target, data)?;
        let handlers = self.handlers.lock().unwrap();
        handlers.get(&key).and_then(|handler| handler(data))
    }

    fn aggregate(&self, data: &[u8]) -> ChainResult<Bytes> {
        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        let decoded = IMulticall3::aggregate3Call::abi_decode(data)
            .map_err(|e| ChainError::decode("aggregate3 calldata", e))?;

        let mut results = Vec::with_capacity(decoded.calls.len());
        for call in decoded.calls {
            match self.dispatch(call.target, &call.callData) {
                Some(ret) => results.push(IMulticall3::Result {
                    success: true,
                    returnData: ret.into(),
                }),
                None if call.allowFailure => results.push(IMulticall3::Result {
                    success: false,
                    returnData: Bytes::new(),
                }),
                None => return Err(ChainError::Reverted("Multicall3: call failed".into())),
            }
        }
        Ok(IMulticall3::aggregate3Call::abi_encode_returns(&results).into())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn call(&self, target: Address, data: Bytes) -> ChainResult<Bytes> {
        if self.transport_down.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("connection refused".into()));
        }
        if target == MULTICALL3 && data.starts_with(&IMulticall3::aggregate3Call::SELECTOR) {
            return self.aggregate(&data);
        }
        self.direct_calls.fetch_add(1, Ordering::SeqCst);
        self.dispatch(target, &data)
            .map(Bytes::from)
            .ok_or_else(|| ChainError::Reverted(format!("no handler on {:?}", target)))
    }

    async fn native_balance(&self, account: Address) -> ChainResult<U256> {
        if self.transport_down.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("connection refused".into()));
        }
        Ok(self.balances.lock().unwrap().get(&account).copied().unwrap_or_default())
    }
}

#[async_trait]
impl TransactionSender for MockChain {
    async fn send(&self, target: Address, data: Bytes) -> ChainResult<TxHash> {
        if self.transport_down.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("connection refused".into()));
        }
        let key = key_of(target, &data).ok_or_else(|| ChainError::invalid("empty calldata"))?;
        if self.rejected.lock().unwrap().contains(&key) {
            return Err(ChainError::Rejected("User denied transaction signature".into()));
        }

        let n = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        let hash = B256::from(U256::from(n));
        self.sent.lock().unwrap().push((target, data.clone()));

        if self.reverting.lock().unwrap().contains(&key) {
            self.reverted_hashes.lock().unwrap().insert(hash);
        } else if let Some(hook) = self.send_hooks.lock().unwrap().get(&key) {
            hook(&data);
        }
        Ok(hash)
    }

    async fn wait_for_inclusion(&self, hash: TxHash) -> ChainResult<()> {
        if self.reverted_hashes.lock().unwrap().contains(&hash) {
            return Err(ChainError::Reverted(format!("transaction {:?} reverted", hash)));
        }
        Ok(())
    }
}

// ============================================
// SEQUENCER HARNESS
// ============================================

/// Mock chain wired to a sequencer, recording every `TxStatus` update
pub struct Harness {
    pub chain: Arc<MockChain>,
    pub bus: Arc<EventBus>,
    pub cache: Arc<QueryCache>,
    pub reader: ChainReader,
    pub sequencer: TransactionSequencer,
    pub updates: Arc<Mutex<Vec<StepUpdate>>>,
}

impl Harness {
    pub fn new() -> Self {
        let chain = Arc::new(MockChain::new());
        let bus = Arc::new(EventBus::new());
        let cache = Arc::new(QueryCache::new());
        let reader = ChainReader::new(chain.clone(), CallBatcher::new(chain.clone(), MULTICALL3, 100));
        let sequencer = TransactionSequencer::new(reader.clone(), chain.clone(), bus.clone(), cache.clone());

        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        bus.subscribe(EventName::TxStatus, move |event| {
            if let Event::TxStatus(update) = event {
                sink.lock().unwrap().push(update.clone());
            }
        });

        Self {
            chain,
            bus,
            cache,
            reader,
            sequencer,
            updates,
        }
    }

    /// Status transitions observed for one step, in order
    pub fn statuses_of(&self, step: Uuid) -> Vec<TxStatus> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.step_uuid == step)
            .map(|u| u.status)
            .collect()
    }
}

// ============================================
// REWARD FIXTURES
// ============================================

pub fn token_x() -> Asset {
    fixtures::asset(Address::with_last_byte(0xa1), "XXX", 18)
}

pub fn token_y() -> Asset {
    fixtures::asset(Address::with_last_byte(0xa2), "YYY", 6)
}

pub fn gauge_of(i: u8) -> Address {
    Address::with_last_byte(0x20 + i)
}

pub fn wrapped_bribe_of(i: u8) -> Address {
    Address::with_last_byte(0x30 + i)
}

/// `n` pairs (0x11, 0x12, ...), each gauged and bribed with X and Y
pub fn bribed_pairs(n: u8) -> Vec<Pair> {
    (1..=n)
        .map(|i| {
            let gauge = fixtures::gauge(gauge_of(i), wrapped_bribe_of(i), &[token_x(), token_y()]);
            fixtures::pair(Address::with_last_byte(0x10 + i), Some(gauge))
        })
        .collect()
}

/// Bribe `earned(token, token_id)` on pairs 1..=n; unlisted entries are zero
pub fn serve_bribes(chain: &MockChain, n: u8, token_id: U256, earned: &[(u8, Address, U256)]) {
    for i in 1..=n {
        let table: Vec<(Address, U256)> = earned
            .iter()
            .filter(|(pair, _, _)| *pair == i)
            .map(|(_, token, amount)| (*token, *amount))
            .collect();
        chain.on::<IBribe::earnedCall, _>(wrapped_bribe_of(i), move |c| {
            if c.tokenId != token_id {
                return Some(U256::ZERO);
            }
            let hit = table.iter().find(|(token, _)| *token == c.token);
            Some(hit.map(|(_, amount)| *amount).unwrap_or_default())
        });
    }
}

/// Gauge `earned(gov, account)` on pairs 1..=n; unlisted gauges are zero
pub fn serve_gauge_rewards(chain: &MockChain, n: u8, earned: &[(u8, U256)]) {
    for i in 1..=n {
        let amount = earned
            .iter()
            .find(|(pair, _)| *pair == i)
            .map(|(_, amount)| *amount)
            .unwrap_or_default();
        chain.on::<IGauge::earnedCall, _>(gauge_of(i), move |_| Some(amount));
    }
}

pub fn serve_claimable(chain: &MockChain, ve_dist: Address, amount: U256) {
    chain.on::<IVeDist::claimableCall, _>(ve_dist, move |_| Some(amount));
}
