use chrono::{DateTime, Utc};

use crate::{
    config::ReconciliationPolicy,
    db_types::{
        CustomerIdentity,
        NewCustomerIdentity,
        NewPaymentRecord,
        OpenObligations,
        PaymentMatch,
        PaymentRecord,
        ReviewReason,
    },
    matching::DecisionLog,
    traits::{MatchApproval, ObligationManagement, RecordPaymentResult, RecordedPayment, ReconciliationError},
};

/// This trait defines the highest level of behaviour for backends supporting the reconciliation engine.
///
/// This behaviour includes:
/// * Resolving channel users to customer identities
/// * Finding the open obligations a payment could settle
/// * Recording payments and applying them to obligation ledgers, exactly once
/// * The manual review flow (approve, assign, reject)
///
/// Every method that moves money does so inside a single transaction. If any step fails, nothing is written.
#[allow(async_fn_in_trait)]
pub trait ReconciliationDatabase: Clone + ObligationManagement {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Returns the customer identity for (tenant, platform, external user id), creating it if it does not exist.
    ///
    /// This is a single upsert against a unique constraint, so concurrent first contacts from the same user resolve
    /// to the same identity.
    async fn resolve_customer_identity(
        &self,
        identity: &NewCustomerIdentity,
    ) -> Result<CustomerIdentity, ReconciliationError>;

    /// The most recent payment record with this (normalised) reference created at or after `since`.
    async fn find_recent_payment_by_reference(
        &self,
        tenant_id: &str,
        reference: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<PaymentRecord>, ReconciliationError>;

    /// Open orders, active installment contracts (with their schedules) and active pawn loans for the customer.
    async fn fetch_open_obligations(&self, customer_id: i64) -> Result<OpenObligations, ReconciliationError>;

    /// Takes a matched payment and, in a single atomic transaction,
    /// * claims its reference. If the reference was claimed inside the duplicate window, nothing is written and the
    ///   existing record is returned as [`RecordPaymentResult::Duplicate`].
    /// * inserts the payment record
    /// * if the disposition says so, re-reads the target obligation and applies the payment to its ledger
    async fn record_payment(
        &self,
        payment: NewPaymentRecord,
        policy: &ReconciliationPolicy,
    ) -> Result<RecordPaymentResult, ReconciliationError>;

    /// Allocates a stored payment record that is still `pending`, and marks it `verified`.
    async fn apply_match(
        &self,
        approval: MatchApproval,
        policy: &ReconciliationPolicy,
    ) -> Result<RecordedPayment, ReconciliationError>;

    /// Attaches a proposed match to a pending record and parks it for review, without touching any ledger.
    async fn propose_match(
        &self,
        payment_id: i64,
        proposal: PaymentMatch,
        reason: ReviewReason,
        decision_log: DecisionLog,
    ) -> Result<PaymentRecord, ReconciliationError>;

    /// Marks a pending payment record as rejected. Verified records cannot be rejected.
    async fn reject_payment(
        &self,
        payment_id: i64,
        actor: &str,
        reason: &str,
    ) -> Result<PaymentRecord, ReconciliationError>;

    async fn fetch_payment_record(&self, id: i64) -> Result<Option<PaymentRecord>, ReconciliationError>;

    /// Pending records that were never classified, oldest first.
    async fn fetch_unclassified_payments(&self, limit: u32) -> Result<Vec<PaymentRecord>, ReconciliationError>;

    /// Records waiting for a member of staff, oldest first.
    async fn fetch_payments_for_review(&self, limit: u32) -> Result<Vec<PaymentRecord>, ReconciliationError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), ReconciliationError> {
        Ok(())
    }
}
