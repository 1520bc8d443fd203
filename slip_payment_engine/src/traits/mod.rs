//! #  Database backend contracts
//!
//! This module defines the behaviour a database backend must provide to support the reconciliation engine.
//!
//! * [`ReconciliationDatabase`] covers the payment flow itself: identity resolution, duplicate detection, recording
//!   and allocating payments, and the manual review operations.
//! * [`ObligationManagement`] creates and queries orders, installment contracts and pawn loans.
//!
//! Both traits report failures with [`ReconciliationError`].
mod data_objects;
mod errors;
mod obligation_management;
mod reconciliation_database;

pub use data_objects::{MatchApproval, RecordPaymentResult, RecordedPayment};
pub use errors::ReconciliationError;
pub use obligation_management::ObligationManagement;
pub use reconciliation_database::ReconciliationDatabase;
