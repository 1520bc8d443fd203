use thiserror::Error;

use crate::{allocation::AllocationError, db_types::ObligationRef};

#[derive(Debug, Clone, Error)]
pub enum ReconciliationError {
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
    #[error("{0} does not exist")]
    ObligationNotFound(ObligationRef),
    #[error("{0} is no longer open for payments")]
    ObligationClosed(ObligationRef),
    #[error("{0} changed while the payment was being applied")]
    ObligationChanged(ObligationRef),
    #[error("Allocation aborted. Manual intervention is required. {0}")]
    AllocationInvariantViolation(String),
    #[error("The requested payment record (id {0}) does not exist")]
    PaymentRecordNotFound(i64),
    #[error("Customer identity {0} does not exist")]
    CustomerNotFound(i64),
    #[error("Illegal payment status change. {0}")]
    IllegalStatusChange(String),
    #[error("Invalid payment. {0}")]
    InvalidPayment(String),
}

impl ReconciliationError {
    /// True when the obligation changed underneath the request. Matching again from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ObligationNotFound(_) | Self::ObligationClosed(_) | Self::ObligationChanged(_))
    }
}

impl From<sqlx::Error> for ReconciliationError {
    fn from(e: sqlx::Error) -> Self {
        ReconciliationError::DatabaseError(e.to_string())
    }
}

impl From<AllocationError> for ReconciliationError {
    fn from(e: AllocationError) -> Self {
        match e {
            AllocationError::ObligationClosed(target) => Self::ObligationClosed(target),
            AllocationError::InvariantViolation { .. } => Self::AllocationInvariantViolation(e.to_string()),
            AllocationError::NonPositiveAmount(_) | AllocationError::MissingPawnPaymentType => {
                Self::InvalidPayment(e.to_string())
            },
        }
    }
}
