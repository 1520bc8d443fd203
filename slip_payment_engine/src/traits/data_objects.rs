use serde::{Deserialize, Serialize};

use crate::{
    allocation::Allocation,
    db_types::{MatchStatus, ObligationRef, PaymentMatch, PaymentRecord},
    matching::DecisionLog,
};

/// A payment record together with the ledger changes made when it was written.
#[derive(Debug, Clone)]
pub struct RecordedPayment {
    pub record: PaymentRecord,
    /// `None` when nothing was allocated (unmatched, or parked for review).
    pub allocation: Option<Allocation>,
}

impl RecordedPayment {
    pub fn new(record: PaymentRecord, allocation: Option<Allocation>) -> Self {
        Self { record, allocation }
    }

    /// The obligation this payment moved into a satisfied state, if any.
    pub fn satisfied_obligation(&self) -> Option<ObligationRef> {
        self.allocation.as_ref().filter(|a| a.satisfies_obligation()).map(|a| a.target())
    }
}

#[derive(Debug, Clone)]
pub enum RecordPaymentResult {
    Recorded(RecordedPayment),
    /// The reference was already claimed inside the recency window. Nothing was written.
    Duplicate(PaymentRecord),
}

/// Instructions to allocate a stored, still pending payment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchApproval {
    pub payment_id: i64,
    pub payment_match: PaymentMatch,
    pub match_status: MatchStatus,
    /// Staff member who approved the match. `None` for automatic re-matching.
    pub actor: Option<String>,
    pub decision_log: DecisionLog,
}
