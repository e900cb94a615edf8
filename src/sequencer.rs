//! Transaction Sequencer - ordered multi-step flows
//!
//! A flow is a list of steps (approve -> act -> follow up) that run strictly
//! in order. Each step either finds its precondition already satisfied and
//! goes straight to DONE, or submits one transaction:
//!
//! ```text
//! WAITING -> DONE                                 (skipped)
//! WAITING -> SUBMITTED -> CONFIRMED -> DONE       (sent and included)
//! WAITING -> [SUBMITTED ->] REJECTED              (declined, reverted, read failure)
//! ```
//!
//! A REJECTED step halts the rest of the flow; later steps stay WAITING.
//! Only a fully successful flow invalidates its cached queries.

use alloy_primitives::{Address, TxHash, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batcher::Call;
use crate::cache::{QueryCache, QueryKey};
use crate::chain::TransactionSender;
use crate::error::{ChainError, ChainResult};
use crate::events::{Event, EventBus};
use crate::reader::ChainReader;

// ============================================
// STATUS + STEP DEFINITIONS
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    Waiting,
    Pending,
    Submitted,
    Confirmed,
    Rejected,
    Done,
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxStatus::Waiting => "WAITING",
            TxStatus::Pending => "PENDING",
            TxStatus::Submitted => "SUBMITTED",
            TxStatus::Confirmed => "CONFIRMED",
            TxStatus::Rejected => "REJECTED",
            TxStatus::Done => "DONE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    /// Grants an allowance the next step relies on
    Approval,
    Action,
    /// Runs after the action, e.g. enabling autolock
    FollowUp,
}

/// What makes a step unnecessary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Always submit
    None,
    /// Known at build time to be unnecessary
    Satisfied { description: String },
    /// `operator` can already move vest NFT `token_id`
    NftApproved {
        ve_token: Address,
        token_id: U256,
        operator: Address,
    },
    /// `spender` already holds at least `amount` of allowance
    Erc20Allowance {
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    },
}

#[derive(Debug, Clone)]
pub struct Step {
    pub uuid: Uuid,
    pub kind: StepKind,
    pub description: String,
    /// Shown once the transaction is broadcast
    pub action_description: Option<String>,
    /// Replaces the generic reason when the precondition already holds
    pub skip_description: Option<String>,
    pub precondition: Precondition,
    pub call: Option<Call>,
}

impl Step {
    pub fn new(kind: StepKind, description: impl Into<String>, call: Call) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind,
            description: description.into(),
            action_description: None,
            skip_description: None,
            precondition: Precondition::None,
            call: Some(call),
        }
    }

    /// A step that will go straight to DONE with `reason`
    pub fn skipped(kind: StepKind, description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind,
            description: description.into(),
            action_description: None,
            skip_description: None,
            precondition: Precondition::Satisfied {
                description: reason.into(),
            },
            call: None,
        }
    }

    pub fn unless(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }

    pub fn announcing(mut self, action_description: impl Into<String>) -> Self {
        self.action_description = Some(action_description.into());
        self
    }

    pub fn skip_reason(mut self, description: impl Into<String>) -> Self {
        self.skip_description = Some(description.into());
        self
    }
}

/// A flow ready to run
#[derive(Debug, Clone)]
pub struct TxFlow {
    pub title: String,
    pub kind: String,
    pub verb: String,
    pub steps: Vec<Step>,
    /// Query prefixes marked stale after full success
    pub invalidates: Vec<QueryKey>,
}

// ============================================
// RECORDS + UPDATES
// ============================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub uuid: Uuid,
    pub kind: StepKind,
    pub description: String,
    pub status: TxStatus,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub verb: String,
    pub steps: Vec<StepRecord>,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    fn from_flow(flow: &TxFlow) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: flow.title.clone(),
            kind: flow.kind.clone(),
            verb: flow.verb.clone(),
            steps: flow
                .steps
                .iter()
                .map(|step| StepRecord {
                    uuid: step.uuid,
                    kind: step.kind,
                    description: step.description.clone(),
                    status: TxStatus::Waiting,
                    tx_hash: None,
                    error: None,
                })
                .collect(),
            created_at: Utc::now(),
        }
    }

    /// Summary over all steps; PENDING while anything is in flight
    pub fn status(&self) -> TxStatus {
        if self.steps.iter().any(|s| s.status == TxStatus::Rejected) {
            TxStatus::Rejected
        } else if self.steps.iter().all(|s| s.status == TxStatus::Done) {
            TxStatus::Done
        } else if self.steps.iter().all(|s| s.status == TxStatus::Waiting) {
            TxStatus::Waiting
        } else {
            TxStatus::Pending
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == TxStatus::Done
    }
}

/// Payload of a `TxStatus` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepUpdate {
    pub tx_id: Uuid,
    pub step_uuid: Uuid,
    pub status: TxStatus,
    pub description: Option<String>,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
}

// ============================================
// SEQUENCER
// ============================================

pub struct TransactionSequencer {
    reader: ChainReader,
    sender: Arc<dyn TransactionSender>,
    bus: Arc<EventBus>,
    cache: Arc<QueryCache>,
}

impl TransactionSequencer {
    pub fn new(
        reader: ChainReader,
        sender: Arc<dyn TransactionSender>,
        bus: Arc<EventBus>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            reader,
            sender,
            bus,
            cache,
        }
    }

    /// Run every step in order. Failures end up in the returned record
    /// (and on the bus), never as an `Err`.
    pub async fn run(&self, flow: TxFlow) -> TransactionRecord {
        let mut record = TransactionRecord::from_flow(&flow);
        info!("▶ {} ({} steps)", record.title, record.steps.len());
        self.bus.emit(Event::TxAdded(record.clone()));

        for (index, step) in flow.steps.iter().enumerate() {
            if let Err(err) = self.run_step(&mut record, index, step).await {
                error!("✗ Step '{}' rejected: {}", step.description, err);
                self.transition(&mut record, index, TxStatus::Rejected, None, None, Some(err.to_string()));
                self.bus.emit(Event::Error(format!("{}: {}", step.description, err)));

                let halted = record.steps.len() - index - 1;
                if halted > 0 {
                    warn!("Halting {} remaining step(s) of '{}'", halted, record.title);
                }
                return record;
            }
        }

        for key in &flow.invalidates {
            self.cache.invalidate(key);
        }
        if !flow.invalidates.is_empty() {
            self.bus.emit(Event::DataUpdated);
        }

        info!("✓ {} complete", record.title);
        record
    }

    async fn run_step(&self, record: &mut TransactionRecord, index: usize, step: &Step) -> ChainResult<()> {
        if let Some(reason) = self.precondition_met(&step.precondition).await? {
            let reason = step.skip_description.clone().unwrap_or(reason);
            debug!("Skipping '{}': {}", step.description, reason);
            self.transition(record, index, TxStatus::Done, Some(reason), None, None);
            return Ok(());
        }

        let call = step
            .call
            .as_ref()
            .ok_or_else(|| ChainError::missing(format!("no transaction for '{}'", step.description)))?;

        let hash = self.sender.send(call.target, call.data.clone()).await?;
        info!("📤 {} submitted: {:?}", step.description, hash);
        self.transition(
            record,
            index,
            TxStatus::Submitted,
            step.action_description.clone(),
            Some(hash),
            None,
        );

        self.sender.wait_for_inclusion(hash).await?;
        self.transition(record, index, TxStatus::Confirmed, None, Some(hash), None);
        self.transition(record, index, TxStatus::Done, None, Some(hash), None);
        Ok(())
    }

    /// `Some(reason)` when the step can be skipped
    async fn precondition_met(&self, precondition: &Precondition) -> ChainResult<Option<String>> {
        match precondition {
            Precondition::None => Ok(None),
            Precondition::Satisfied { description } => Ok(Some(description.clone())),
            Precondition::NftApproved {
                ve_token,
                token_id,
                operator,
            } => {
                let approved = self.reader.nft_approved(*ve_token, *operator, *token_id).await?;
                Ok(approved.then(|| "NFT already approved".to_string()))
            }
            Precondition::Erc20Allowance {
                token,
                owner,
                spender,
                amount,
            } => {
                let allowance = self.reader.allowance(*token, *owner, *spender).await?;
                Ok((allowance >= *amount).then(|| "Allowance already granted".to_string()))
            }
        }
    }

    fn transition(
        &self,
        record: &mut TransactionRecord,
        index: usize,
        status: TxStatus,
        description: Option<String>,
        tx_hash: Option<TxHash>,
        error: Option<String>,
    ) {
        let Some(step) = record.steps.get_mut(index) else {
            return;
        };
        step.status = status;
        if let Some(description) = &description {
            step.description = description.clone();
        }
        if tx_hash.is_some() {
            step.tx_hash = tx_hash;
        }
        if error.is_some() {
            step.error = error.clone();
        }

        self.bus.emit(Event::TxStatus(StepUpdate {
            tx_id: record.id,
            step_uuid: step.uuid,
            status,
            description,
            tx_hash,
            error,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::IERC20;
    use crate::events::EventName;
    use crate::testing::Harness;
    use std::sync::Mutex;

    fn approve_call(token: Address) -> Call {
        Call::new(
            token,
            &IERC20::approveCall {
                spender: Address::with_last_byte(0x99),
                amount: U256::MAX,
            },
        )
    }

    fn flow(steps: Vec<Step>) -> TxFlow {
        TxFlow {
            title: "Test flow".into(),
            kind: "Test".into(),
            verb: "Tested".into(),
            steps,
            invalidates: vec![QueryKey::new(["vests"])],
        }
    }

    #[tokio::test]
    async fn test_satisfied_step_goes_straight_to_done() {
        let h = Harness::new();
        let step = Step::skipped(StepKind::FollowUp, "Enable autolock", "Autolock is not enabled");
        let uuid = step.uuid;

        let record = h.sequencer.run(flow(vec![step])).await;

        assert_eq!(h.statuses_of(uuid), vec![TxStatus::Done]);
        assert_eq!(record.steps[0].description, "Autolock is not enabled");
        assert!(h.chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_submitted_step_walks_full_lifecycle() {
        let h = Harness::new();
        let step = Step::new(StepKind::Action, "Approve", approve_call(Address::with_last_byte(1)))
            .announcing("Approving token");
        let uuid = step.uuid;

        let record = h.sequencer.run(flow(vec![step])).await;

        assert_eq!(
            h.statuses_of(uuid),
            vec![TxStatus::Submitted, TxStatus::Confirmed, TxStatus::Done]
        );
        assert!(record.is_success());
        assert!(record.steps[0].tx_hash.is_some());
        assert_eq!(record.steps[0].description, "Approving token");
    }

    #[tokio::test]
    async fn test_rejection_halts_later_steps() {
        let h = Harness::new();
        let first = Address::with_last_byte(1);
        let second = Address::with_last_byte(2);
        let third = Address::with_last_byte(3);
        h.chain.reject_on::<IERC20::approveCall>(second);
        h.cache.insert(QueryKey::vests("me"), 1u8);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        h.bus.subscribe(EventName::Error, move |e| {
            if let Event::Error(msg) = e {
                sink.lock().unwrap().push(msg.clone());
            }
        });

        let steps = vec![
            Step::new(StepKind::Approval, "one", approve_call(first)),
            Step::new(StepKind::Action, "two", approve_call(second)),
            Step::new(StepKind::FollowUp, "three", approve_call(third)),
        ];
        let third_uuid = steps[2].uuid;
        let record = h.sequencer.run(flow(steps)).await;

        let statuses: Vec<_> = record.steps.iter().map(|s| s.status).collect();
        assert_eq!(statuses, vec![TxStatus::Done, TxStatus::Rejected, TxStatus::Waiting]);
        assert_eq!(record.status(), TxStatus::Rejected);
        assert!(h.statuses_of(third_uuid).is_empty());

        let targets: Vec<_> = h.chain.sent().into_iter().map(|(t, _)| t).collect();
        assert_eq!(targets, vec![first]);

        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(h.cache.is_stale(&QueryKey::vests("me")), Some(false));
    }

    #[tokio::test]
    async fn test_revert_after_broadcast_is_rejected() {
        let h = Harness::new();
        let token = Address::with_last_byte(1);
        h.chain.revert_on::<IERC20::approveCall>(token);
        let step = Step::new(StepKind::Action, "Approve", approve_call(token));
        let uuid = step.uuid;

        let record = h.sequencer.run(flow(vec![step])).await;

        assert_eq!(h.statuses_of(uuid), vec![TxStatus::Submitted, TxStatus::Rejected]);
        assert!(record.steps[0].error.as_deref().unwrap_or("").contains("reverted"));
    }

    #[tokio::test]
    async fn test_precondition_read_failure_rejects_step() {
        let h = Harness::new();
        // no isApprovedOrOwner handler, so the read reverts
        let step = Step::new(StepKind::Approval, "Approve NFT", approve_call(Address::with_last_byte(1))).unless(
            Precondition::NftApproved {
                ve_token: Address::with_last_byte(0x0e),
                token_id: U256::from(1),
                operator: Address::with_last_byte(0x0f),
            },
        );

        let record = h.sequencer.run(flow(vec![step])).await;

        assert_eq!(record.steps[0].status, TxStatus::Rejected);
        assert!(h.chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_allowance_precondition_skips_when_enough() {
        let h = Harness::new();
        let token = Address::with_last_byte(1);
        h.chain.on::<IERC20::allowanceCall, _>(token, |_| Some(U256::from(1000)));
        let step = Step::new(StepKind::Approval, "Approve", approve_call(token)).unless(
            Precondition::Erc20Allowance {
                token,
                owner: Address::with_last_byte(2),
                spender: Address::with_last_byte(3),
                amount: U256::from(500),
            },
        );
        let uuid = step.uuid;

        h.sequencer.run(flow(vec![step])).await;

        assert_eq!(h.statuses_of(uuid), vec![TxStatus::Done]);
        assert!(h.chain.sent().is_empty());
    }

    #[tokio::test]
    async fn test_success_invalidates_declared_queries() {
        let h = Harness::new();
        h.cache.insert(QueryKey::vests("me"), 1u8);

        let record = h
            .sequencer
            .run(flow(vec![Step::new(
                StepKind::Action,
                "Approve",
                approve_call(Address::with_last_byte(1)),
            )]))
            .await;

        assert!(record.is_success());
        assert_eq!(h.cache.is_stale(&QueryKey::vests("me")), Some(true));
    }

    #[test]
    fn test_record_status_summary() {
        let f = flow(vec![
            Step::skipped(StepKind::Approval, "a", "skip"),
            Step::skipped(StepKind::Action, "b", "skip"),
        ]);
        let mut record = TransactionRecord::from_flow(&f);
        assert_eq!(record.status(), TxStatus::Waiting);

        record.steps[0].status = TxStatus::Done;
        assert_eq!(record.status(), TxStatus::Pending);

        record.steps[1].status = TxStatus::Done;
        assert_eq!(record.status(), TxStatus::Done);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&TxStatus::Submitted).unwrap(), "\"SUBMITTED\"");
        assert_eq!(TxStatus::Confirmed.to_string(), "CONFIRMED");
    }
}
