/*
 * Transaction orchestrator: one state machine per intent slot, driven by
 * submission and confirmation events
 */

mod gate;
mod intent;

pub use gate::{add_liquidity_gate, remove_gate, swap_gate, ActionGate};
pub use intent::{
    add_liquidity_intent, approve_intent, min_amount_out, remove_liquidity_intent, swap_intent, IntentSlot,
    TransactionIntent, BPS_DENOMINATOR,
};

use ethers::types::H256;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{error, info, warn};
use crate::dex::{DexLedger, ReceiptStatus};
use crate::form::FormState;
use crate::metrics::Metrics;
use crate::models::{AqyntError, Result};
use crate::queries::{Invalidation, QueryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UserRejected,
    Reverted,
    Rpc,
    /// The caller stopped waiting before a final phase was reached.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TxFailure {
    #[must_use]
    pub fn from_error(error: &AqyntError) -> Self {
        let kind = match error {
            AqyntError::UserRejected(_) => FailureKind::UserRejected,
            _ => FailureKind::Rpc,
        };
        Self {
            kind,
            message: error.short_message(),
        }
    }

    #[must_use]
    pub fn reverted(hash: H256) -> Self {
        Self {
            kind: FailureKind::Reverted,
            message: format!("Transaction {hash:?} reverted"),
        }
    }

    #[must_use]
    pub fn abandoned(hash: Option<H256>) -> Self {
        let message = match hash {
            Some(hash) => format!("Stopped tracking transaction {hash:?}"),
            None => "Submission abandoned before it completed".to_string(),
        };
        Self {
            kind: FailureKind::Abandoned,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TxPhase {
    #[default]
    Idle,
    Submitting,
    PendingConfirmation {
        hash: H256,
    },
    Confirmed {
        hash: H256,
    },
    Failed(TxFailure),
}

impl TxPhase {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            TxPhase::Idle => "idle",
            TxPhase::Submitting => "submitting",
            TxPhase::PendingConfirmation { .. } => "pending_confirmation",
            TxPhase::Confirmed { .. } => "confirmed",
            TxPhase::Failed(_) => "failed",
        }
    }

    #[must_use]
    pub fn hash(&self) -> Option<H256> {
        match self {
            TxPhase::PendingConfirmation { hash } | TxPhase::Confirmed { hash } => Some(*hash),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TxPhase::Submitting | TxPhase::PendingConfirmation { .. })
    }

    fn can_become(&self, next: &TxPhase) -> bool {
        match (self, next) {
            (TxPhase::Idle | TxPhase::Confirmed { .. } | TxPhase::Failed(_), TxPhase::Submitting) => true,
            (TxPhase::Submitting, TxPhase::PendingConfirmation { .. } | TxPhase::Failed(_)) => true,
            (TxPhase::PendingConfirmation { hash }, TxPhase::Confirmed { hash: confirmed }) => hash == confirmed,
            (TxPhase::PendingConfirmation { .. }, TxPhase::Failed(_)) => true,
            _ => false,
        }
    }
}

/// Phase holder for one intent slot. Illegal transitions are refused, so a
/// confirmation can be recorded only once per submission.
pub struct TransactionTracker {
    slot: IntentSlot,
    phase: watch::Sender<TxPhase>,
}

impl TransactionTracker {
    #[must_use]
    pub fn new(slot: IntentSlot) -> Self {
        let (phase, _) = watch::channel(TxPhase::Idle);
        Self { slot, phase }
    }

    #[must_use]
    pub fn slot(&self) -> IntentSlot {
        self.slot
    }

    #[must_use]
    pub fn phase(&self) -> TxPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TxPhase> {
        self.phase.subscribe()
    }

    fn transition(&self, next: TxPhase) -> Result<()> {
        let mut outcome = Ok(());
        self.phase.send_if_modified(|current| {
            if current.can_become(&next) {
                *current = next;
                true
            } else {
                outcome = Err(AqyntError::InvalidTransition(format!(
                    "{:?}: {} -> {}",
                    self.slot,
                    current.name(),
                    next.name()
                )));
                false
            }
        });
        outcome
    }

    pub fn begin(&self) -> Result<()> {
        self.transition(TxPhase::Submitting)
    }

    pub fn submitted(&self, hash: H256) -> Result<()> {
        self.transition(TxPhase::PendingConfirmation { hash })
    }

    pub fn confirm(&self, hash: H256) -> Result<()> {
        self.transition(TxPhase::Confirmed { hash })
    }

    pub fn fail(&self, failure: TxFailure) -> Result<()> {
        self.transition(TxPhase::Failed(failure))
    }
}

/// Held while `execute` runs. If the future is dropped mid-flight the slot is
/// failed instead of staying busy forever.
struct InFlight {
    tracker: Arc<TransactionTracker>,
    metrics: Arc<Metrics>,
    kind: &'static str,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let phase = self.tracker.phase();
        if !phase.is_in_flight() {
            return;
        }
        warn!("{} dropped while {}, releasing {:?}", self.kind, phase.name(), self.tracker.slot());
        if self.tracker.fail(TxFailure::abandoned(phase.hash())).is_ok() {
            self.metrics.record_transaction(self.kind, "abandoned");
        }
    }
}

pub struct Orchestrator {
    ledger: Arc<dyn DexLedger>,
    queries: Arc<QueryStore>,
    metrics: Arc<Metrics>,
    trackers: Mutex<HashMap<IntentSlot, Arc<TransactionTracker>>>,
}

impl Orchestrator {
    pub fn new(ledger: Arc<dyn DexLedger>, queries: Arc<QueryStore>, metrics: Arc<Metrics>) -> Self {
        Self {
            ledger,
            queries,
            metrics,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self, slot: IntentSlot) -> Arc<TransactionTracker> {
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(slot)
            .or_insert_with(|| Arc::new(TransactionTracker::new(slot)))
            .clone()
    }

    /// Runs `intent` to its final phase. Write failures end in
    /// `TxPhase::Failed` rather than an error; an error means the slot already
    /// had a transaction in flight.
    ///
    /// On confirmation the reads the transaction changed are invalidated and,
    /// for primary actions, `form` amounts are cleared. A failure leaves
    /// `form` untouched.
    pub async fn execute(&self, intent: &TransactionIntent, form: Option<&mut FormState>) -> Result<TxPhase> {
        let tracker = self.tracker(intent.slot());
        tracker.begin()?;
        let _in_flight = InFlight {
            tracker: tracker.clone(),
            metrics: self.metrics.clone(),
            kind: intent.kind(),
        };

        let hash = match self.ledger.submit(intent).await {
            Ok(hash) => hash,
            Err(e) => {
                let failure = TxFailure::from_error(&e);
                match failure.kind {
                    FailureKind::UserRejected => info!("{} rejected by user", intent.kind()),
                    _ => warn!("{} submission failed: {}", intent.kind(), e),
                }
                return self.finish_failed(&tracker, intent, failure);
            }
        };
        tracker.submitted(hash)?;

        let status = match self.ledger.wait_for_confirmation(hash).await {
            Ok(status) => status,
            Err(e) => {
                error!("Lost track of {} {:?}: {}", intent.kind(), hash, e);
                return self.finish_failed(&tracker, intent, TxFailure::from_error(&e));
            }
        };

        if status == ReceiptStatus::Reverted {
            return self.finish_failed(&tracker, intent, TxFailure::reverted(hash));
        }

        tracker.confirm(hash)?;
        info!("{} {:?} confirmed", intent.kind(), hash);
        self.metrics.record_transaction(intent.kind(), "confirmed");
        self.on_confirmed(intent, form);
        Ok(tracker.phase())
    }

    fn finish_failed(&self, tracker: &TransactionTracker, intent: &TransactionIntent, failure: TxFailure) -> Result<TxPhase> {
        let outcome = match failure.kind {
            FailureKind::UserRejected => "rejected",
            FailureKind::Reverted => "reverted",
            FailureKind::Rpc => "failed",
            FailureKind::Abandoned => "abandoned",
        };
        self.metrics.record_transaction(intent.kind(), outcome);
        tracker.fail(failure)?;
        Ok(tracker.phase())
    }

    fn on_confirmed(&self, intent: &TransactionIntent, form: Option<&mut FormState>) {
        let owner = self.ledger.account();

        match (intent, owner) {
            (TransactionIntent::Approve { token, .. }, Some(owner)) => {
                self.queries.invalidate(Invalidation::Allowance { token: *token, owner });
            }
            (_, Some(owner)) => {
                self.queries.invalidate(Invalidation::Balances { owner });
                for token in intent.spent_tokens() {
                    self.queries.invalidate(Invalidation::Allowance { token, owner });
                }
                self.queries.invalidate(Invalidation::Pools);
            }
            (_, None) => {
                self.queries.invalidate(Invalidation::All);
            }
        }

        if intent.is_primary() {
            if let Some(form) = form {
                form.reset_amounts();
            }
        }
    }
}
