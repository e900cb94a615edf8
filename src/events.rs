//! Event bus for transaction lifecycle and data refresh notifications
//!
//! Subscribers register per event name and are called in subscription order.
//! `emit` snapshots the subscriber list and releases the lock before calling
//! anyone, so handlers may subscribe or unsubscribe (themselves or others)
//! while an event is being delivered.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::trace;

use crate::model::VestNft;
use crate::rewards::RewardBundle;
use crate::sequencer::{StepUpdate, TransactionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventName {
    TxAdded,
    TxStatus,
    DataUpdated,
    RewardBalancesReturned,
    VestNftsReturned,
    Error,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventName::TxAdded => "tx_added",
            EventName::TxStatus => "tx_status",
            EventName::DataUpdated => "data_updated",
            EventName::RewardBalancesReturned => "reward_balances_returned",
            EventName::VestNftsReturned => "vest_nfts_returned",
            EventName::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    /// A flow started; every step is WAITING
    TxAdded(TransactionRecord),
    /// One step changed status
    TxStatus(StepUpdate),
    DataUpdated,
    RewardBalancesReturned(RewardBundle),
    VestNftsReturned(Vec<VestNft>),
    Error(String),
}

impl Event {
    pub fn name(&self) -> EventName {
        match self {
            Event::TxAdded(_) => EventName::TxAdded,
            Event::TxStatus(_) => EventName::TxStatus,
            Event::DataUpdated => EventName::DataUpdated,
            Event::RewardBalancesReturned(_) => EventName::RewardBalancesReturned,
            Event::VestNftsReturned(_) => EventName::VestNftsReturned,
            Event::Error(_) => EventName::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    /// `None` receives every event
    filter: Option<EventName>,
    active: AtomicBool,
    handler: Handler,
}

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, name: EventName, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(name), Arc::new(handler))
    }

    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Every event, forwarded into an unbounded channel
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe_all(move |event| {
            // receiver gone means nobody is listening any more
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    /// Returns false when `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return false;
        };
        match subscribers.iter().position(|s| s.id == id) {
            Some(index) => {
                let removed = subscribers.remove(index);
                removed.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn emit(&self, event: Event) {
        let name = event.name();
        let targets: Vec<Arc<Subscriber>> = match self.subscribers.lock() {
            Ok(subscribers) => subscribers
                .iter()
                .filter(|s| s.filter.map_or(true, |f| f == name))
                .cloned()
                .collect(),
            Err(_) => return,
        };

        trace!("Emitting {} to {} subscriber(s)", name, targets.len());

        for subscriber in targets {
            // unsubscribed earlier in this same delivery
            if subscriber.active.load(Ordering::SeqCst) {
                (subscriber.handler)(&event);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn register(&self, filter: Option<EventName>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscriber = Arc::new(Subscriber {
            id,
            filter,
            active: AtomicBool::new(true),
            handler,
        });
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(subscriber);
        }
        id
    }
}
