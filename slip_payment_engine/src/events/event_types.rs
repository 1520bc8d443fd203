use serde::{Deserialize, Serialize};

use crate::{
    allocation::AllocationSummary,
    db_types::{ObligationRef, PaymentMatch, PaymentRecord, ReviewReason},
};

/// A payment record was written, whether or not it was allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecordedEvent {
    pub record: PaymentRecord,
    pub allocation: Option<AllocationSummary>,
}

impl PaymentRecordedEvent {
    pub fn new(record: PaymentRecord, allocation: Option<AllocationSummary>) -> Self {
        Self { record, allocation }
    }
}

/// A payment moved an obligation into a satisfied, terminal state: an order became fully paid, an installment
/// contract completed, or a pawned item was redeemed. Typically used to close the customer's support case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationSatisfiedEvent {
    pub obligation: ObligationRef,
    pub customer_id: i64,
    pub payment_id: i64,
    pub tenant_id: String,
}

impl ObligationSatisfiedEvent {
    pub fn new(obligation: ObligationRef, record: &PaymentRecord) -> Self {
        Self {
            obligation,
            customer_id: record.customer_id,
            payment_id: record.id,
            tenant_id: record.tenant_id.clone(),
        }
    }
}

/// A payment is waiting for a member of staff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequiredEvent {
    pub payment_id: i64,
    pub customer_id: i64,
    pub tenant_id: String,
    pub reason: ReviewReason,
    pub proposal: Option<PaymentMatch>,
}

impl ReviewRequiredEvent {
    pub fn new(record: &PaymentRecord, reason: ReviewReason) -> Self {
        Self {
            payment_id: record.id,
            customer_id: record.customer_id,
            tenant_id: record.tenant_id.clone(),
            reason,
            proposal: record.payment_match(),
        }
    }
}
