//! # Allocation engine
//!
//! Pure ledger arithmetic. Given the current state of an obligation and a payment amount, each function here works
//! out the new balances and statuses, checks the ledger invariants, and returns a plan. Nothing is written: the
//! database backend applies the plan inside the same transaction that records the payment.
//!
//! An allocation that would break an invariant (a period paid beyond its due amount, money appearing or vanishing) is
//! an [`AllocationError::InvariantViolation`]. It is never clamped.
mod installment;
mod order;
mod pawn;

pub use installment::{allocate_to_installment, InstallmentAllocation, PeriodUpdate};
pub use order::{allocate_to_order, OrderAllocation};
pub use pawn::{allocate_to_pawn, redemption_quote, PawnAllocation, RedemptionQuote};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{
    ContractStatus,
    ObligationRef,
    OrderPaymentStatus,
    OrderStatus,
    PawnPaymentType,
    PawnStatus,
    PeriodStatus,
    Satang,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Payment amounts must be positive. Got {0}")]
    NonPositiveAmount(Satang),
    #[error("{0} is not open for payments")]
    ObligationClosed(ObligationRef),
    #[error("A pawn payment needs a payment type (interest, redemption, ...)")]
    MissingPawnPaymentType,
    #[error("Ledger invariant violated on {target}: {detail}")]
    InvariantViolation { target: ObligationRef, detail: String },
}

impl AllocationError {
    pub fn invariant<S: Into<String>>(target: ObligationRef, detail: S) -> Self {
        Self::InvariantViolation { target, detail: detail.into() }
    }
}

/// The outcome of one allocation for one period of an installment schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub sequence: i64,
    pub applied: Satang,
    pub status: PeriodStatus,
    /// True when the period was marked paid by contract completion rather than by payment.
    pub forced: bool,
}

/// A human-readable account of what an allocation did, stored in the payment's decision log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum AllocationSummary {
    Order {
        order_id: i64,
        applied: Satang,
        paid_before: Satang,
        paid_after: Satang,
        overpaid: Satang,
        payment_status: OrderPaymentStatus,
        status: OrderStatus,
    },
    Installment {
        contract_id: i64,
        applied: Satang,
        periods: Vec<PeriodSummary>,
        overpaid: Satang,
        status: ContractStatus,
    },
    Pawn {
        loan_id: i64,
        payment_type: PawnPaymentType,
        interest_portion: Satang,
        principal_portion: Satang,
        surplus: Satang,
        status: PawnStatus,
        extended: bool,
    },
}

/// The plan produced by the allocation engine for one payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    Order(OrderAllocation),
    Installment(InstallmentAllocation),
    Pawn(PawnAllocation),
}

impl Allocation {
    pub fn target(&self) -> ObligationRef {
        match self {
            Allocation::Order(a) => ObligationRef::order(a.order_id),
            Allocation::Installment(a) => ObligationRef::installment(a.contract_id),
            Allocation::Pawn(a) => ObligationRef::pawn(a.loan_id),
        }
    }

    /// True when this allocation moves the obligation into a satisfied, terminal state.
    pub fn satisfies_obligation(&self) -> bool {
        match self {
            Allocation::Order(a) => a.became_paid,
            Allocation::Installment(a) => a.completed,
            Allocation::Pawn(a) => a.status == PawnStatus::Redeemed,
        }
    }

    pub fn summary(&self) -> AllocationSummary {
        match self {
            Allocation::Order(a) => a.summary(),
            Allocation::Installment(a) => a.summary(),
            Allocation::Pawn(a) => a.summary(),
        }
    }
}
