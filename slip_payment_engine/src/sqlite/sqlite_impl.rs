//! `SqliteDatabase` is a concrete implementation of a reconciliation engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`traits`] module.
//!
//! [`traits`]: crate::traits
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate, SqliteConnection, SqlitePool};

use super::db::{customers, db_url, installments, new_pool, orders, pawns, payments, payments::ReferenceClaim};
use crate::{
    allocation::{allocate_to_installment, allocate_to_order, allocate_to_pawn, Allocation, AllocationError},
    config::ReconciliationPolicy,
    db_types::{
        Classification,
        CustomerIdentity,
        Disposition,
        InstallmentSchedule,
        MatchStatus,
        NewCustomerIdentity,
        NewInstallmentContract,
        NewOrder,
        NewPawnLoan,
        NewPaymentRecord,
        ObligationFamily,
        ObligationRef,
        OpenObligations,
        Order,
        PawnLoan,
        PaymentMatch,
        PaymentRecord,
        PaymentStatus,
        ReviewReason,
        Satang,
    },
    matching::DecisionLog,
    traits::{
        MatchApproval,
        ObligationManagement,
        RecordPaymentResult,
        RecordedPayment,
        ReconciliationDatabase,
        ReconciliationError,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl ReconciliationDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn resolve_customer_identity(
        &self,
        identity: &NewCustomerIdentity,
    ) -> Result<CustomerIdentity, ReconciliationError> {
        let mut tx = self.pool.begin().await?;
        let customer = customers::upsert_identity(identity, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(customer)
    }

    async fn find_recent_payment_by_reference(
        &self,
        tenant_id: &str,
        reference: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<PaymentRecord>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_recent_by_reference(tenant_id, reference, since, &mut conn).await
    }

    async fn fetch_open_obligations(&self, customer_id: i64) -> Result<OpenObligations, ReconciliationError> {
        let mut tx = self.pool.begin().await?;
        let orders = orders::fetch_open_orders(customer_id, &mut tx).await?;
        let installments = installments::fetch_open_schedules(customer_id, &mut tx).await?;
        let pawns = pawns::fetch_open_loans(customer_id, &mut tx).await?;
        tx.commit().await?;
        trace!(
            "🗃️ Customer #{customer_id} has {} open orders, {} active contracts and {} active pawn loans",
            orders.len(),
            installments.len(),
            pawns.len()
        );
        Ok(OpenObligations { orders, installments, pawns })
    }

    async fn record_payment(
        &self,
        payment: NewPaymentRecord,
        policy: &ReconciliationPolicy,
    ) -> Result<RecordPaymentResult, ReconciliationError> {
        if !payment.amount.is_positive() {
            return Err(ReconciliationError::InvalidPayment(format!("Payment amount must be positive: {}", payment.amount)));
        }
        let mut tx = self.pool.begin().await?;
        if let Some(reference) = payment.reference.as_deref() {
            let window_start = payment.received_at - policy.duplicate_window;
            let claim =
                payments::claim_reference(&payment.tenant_id, reference, payment.received_at, window_start, &mut tx)
                    .await?;
            if let ReferenceClaim::AlreadyClaimed(existing_id) = claim {
                tx.rollback().await?;
                let existing = self.fetch_duplicate(&payment.tenant_id, reference, existing_id, window_start).await?;
                info!(
                    "🗃️ Payment reference {reference} was already recorded as payment #{}. Ignoring the new slip.",
                    existing.id
                );
                return Ok(RecordPaymentResult::Duplicate(existing));
            }
        }
        let record = payments::insert_record(&payment, &payment.decision_log, &mut tx).await?;
        if let Some(reference) = payment.reference.as_deref() {
            payments::attach_reference(&payment.tenant_id, reference, record.id, &mut tx).await?;
        }
        debug!("🗃️ Payment #{} of {} recorded for customer #{}", record.id, record.amount, record.customer_id);
        let result = match payment.disposition {
            Disposition::Allocate(payment_match) => {
                let allocation =
                    allocate_and_apply(&payment_match, payment.amount, payment.received_at, policy, &mut tx).await?;
                let log = payment.decision_log.clone().with_allocation(allocation.summary());
                let record = payments::mark_verified(
                    record.id,
                    &payment_match,
                    MatchStatus::AutoMatched,
                    None,
                    &log,
                    Utc::now(),
                    &mut tx,
                )
                .await?;
                RecordedPayment::new(record, Some(allocation))
            },
            Disposition::Unmatched | Disposition::Review(..) => RecordedPayment::new(record, None),
        };
        tx.commit().await?;
        Ok(RecordPaymentResult::Recorded(result))
    }

    async fn apply_match(
        &self,
        approval: MatchApproval,
        policy: &ReconciliationPolicy,
    ) -> Result<RecordedPayment, ReconciliationError> {
        let MatchApproval { payment_id, payment_match, match_status, actor, decision_log } = approval;
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let record = self.lock_pending(payment_id, now, &mut tx).await?;
        let allocation = allocate_and_apply(&payment_match, record.amount, record.created_at, policy, &mut tx).await?;
        let log = decision_log.with_allocation(allocation.summary());
        let record =
            payments::mark_verified(payment_id, &payment_match, match_status, actor.as_deref(), &log, now, &mut tx)
                .await?;
        tx.commit().await?;
        debug!("🗃️ Payment #{payment_id} applied to {} ({match_status:?})", payment_match.target);
        Ok(RecordedPayment::new(record, Some(allocation)))
    }

    async fn propose_match(
        &self,
        payment_id: i64,
        proposal: PaymentMatch,
        reason: ReviewReason,
        decision_log: DecisionLog,
    ) -> Result<PaymentRecord, ReconciliationError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        self.lock_pending(payment_id, now, &mut tx).await?;
        let log = decision_log.with_review(reason);
        let record = payments::mark_pending_review(payment_id, &proposal, &log, now, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Payment #{payment_id} parked for review with a proposed match to {}", proposal.target);
        Ok(record)
    }

    async fn reject_payment(
        &self,
        payment_id: i64,
        actor: &str,
        reason: &str,
    ) -> Result<PaymentRecord, ReconciliationError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let record = self.lock_pending(payment_id, now, &mut tx).await?;
        let mut log = record.decision_log.0;
        log.note(format!("Rejected by {actor}: {reason}"));
        let record = payments::mark_rejected(payment_id, actor, &log, now, &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Payment #{payment_id} rejected by {actor}");
        Ok(record)
    }

    async fn fetch_payment_record(&self, id: i64) -> Result<Option<PaymentRecord>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_record(id, &mut conn).await
    }

    async fn fetch_unclassified_payments(&self, limit: u32) -> Result<Vec<PaymentRecord>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let filter = payments::PaymentQueryFilter::default()
            .with_status(PaymentStatus::Pending)
            .with_classification(Classification::Unclassified)
            .with_match_status(MatchStatus::NoMatch)
            .with_limit(limit);
        payments::search_records(filter, &mut conn).await
    }

    async fn fetch_payments_for_review(&self, limit: u32) -> Result<Vec<PaymentRecord>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        let filter =
            payments::PaymentQueryFilter::default().with_status(PaymentStatus::Pending).requiring_review().with_limit(limit);
        payments::search_records(filter, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), ReconciliationError> {
        self.pool.close().await;
        Ok(())
    }
}

impl ObligationManagement for SqliteDatabase {
    async fn fetch_customer_identity(&self, id: i64) -> Result<Option<CustomerIdentity>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        customers::fetch_identity(id, &mut conn).await
    }

    async fn insert_order(&self, order: NewOrder) -> Result<Order, ReconciliationError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::insert_order(order, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order {} ({}) created for customer #{}", order.order_number, order.id, order.customer_id);
        Ok(order)
    }

    async fn insert_installment_contract(
        &self,
        contract: NewInstallmentContract,
    ) -> Result<InstallmentSchedule, ReconciliationError> {
        let mut tx = self.pool.begin().await?;
        let schedule = installments::insert_contract(contract, &mut tx).await?;
        tx.commit().await?;
        Ok(schedule)
    }

    async fn insert_pawn_loan(&self, loan: NewPawnLoan) -> Result<PawnLoan, ReconciliationError> {
        let mut tx = self.pool.begin().await?;
        let loan = pawns::insert_loan(loan, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Pawn ticket {} ({}) created for customer #{}", loan.ticket_number, loan.id, loan.customer_id);
        Ok(loan)
    }

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order(id, &mut conn).await
    }

    async fn fetch_installment_schedule(&self, id: i64) -> Result<Option<InstallmentSchedule>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        installments::fetch_schedule(id, &mut conn).await
    }

    async fn fetch_pawn_loan(&self, id: i64) -> Result<Option<PawnLoan>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        pawns::fetch_loan(id, &mut conn).await
    }

    async fn fetch_payments_for_obligation(
        &self,
        obligation: ObligationRef,
    ) -> Result<Vec<PaymentRecord>, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        payments::fetch_for_obligation(obligation, &mut conn).await
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> Result<(), ReconciliationError> {
        migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ReconciliationError::DatabaseError(format!("Migration failed. {e}")))?;
        info!("🗃️ Migrations complete");
        Ok(())
    }

    async fn lock_pending(
        &self,
        payment_id: i64,
        now: DateTime<Utc>,
        conn: &mut SqliteConnection,
    ) -> Result<PaymentRecord, ReconciliationError> {
        if let Some(record) = payments::lock_pending_record(payment_id, now, &mut *conn).await? {
            return Ok(record);
        }
        match payments::fetch_record(payment_id, conn).await? {
            Some(record) => Err(ReconciliationError::IllegalStatusChange(format!(
                "Payment #{payment_id} is {} and can no longer be changed",
                record.status
            ))),
            None => Err(ReconciliationError::PaymentRecordNotFound(payment_id)),
        }
    }

    async fn fetch_duplicate(
        &self,
        tenant_id: &str,
        reference: &str,
        existing_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<PaymentRecord, ReconciliationError> {
        let mut conn = self.pool.acquire().await?;
        if let Some(record) = match existing_id {
            Some(id) => payments::fetch_record(id, &mut conn).await?,
            None => None,
        } {
            return Ok(record);
        }
        payments::fetch_recent_by_reference(tenant_id, reference, since, &mut conn).await?.ok_or_else(|| {
            ReconciliationError::DatabaseError(format!("Reference {reference} is claimed but has no payment record"))
        })
    }
}

/// Re-reads the target obligation inside the transaction, works out the allocation and writes it.
async fn allocate_and_apply(
    payment_match: &PaymentMatch,
    amount: Satang,
    received_at: DateTime<Utc>,
    policy: &ReconciliationPolicy,
    conn: &mut SqliteConnection,
) -> Result<Allocation, ReconciliationError> {
    let target = payment_match.target;
    let now = Utc::now();
    let allocation = match target.family {
        ObligationFamily::Order => {
            let order =
                orders::fetch_order(target.id, &mut *conn).await?.ok_or(ReconciliationError::ObligationNotFound(target))?;
            let plan = allocate_to_order(&order, amount)?;
            orders::apply_allocation(&plan, now, &mut *conn).await?;
            Allocation::Order(plan)
        },
        ObligationFamily::Installment => {
            let schedule = installments::fetch_schedule(target.id, &mut *conn)
                .await?
                .ok_or(ReconciliationError::ObligationNotFound(target))?;
            let plan = allocate_to_installment(&schedule, amount)?;
            installments::apply_allocation(&plan, now, &mut *conn).await?;
            if let Some(order_id) = plan.parent_order_id.filter(|_| plan.completed) {
                match orders::mark_paid_by_contract(order_id, now, &mut *conn).await? {
                    Some(_) => debug!("🗃️ Order {order_id} marked paid by completed contract {}", plan.contract_id),
                    None => warn!("🗃️ Contract {} finances order {order_id}, which does not exist", plan.contract_id),
                }
            }
            Allocation::Installment(plan)
        },
        ObligationFamily::Pawn => {
            let payment_type = payment_match.pawn_payment_type.ok_or(AllocationError::MissingPawnPaymentType)?;
            let loan =
                pawns::fetch_loan(target.id, &mut *conn).await?.ok_or(ReconciliationError::ObligationNotFound(target))?;
            let plan = allocate_to_pawn(&loan, amount, payment_type, received_at.date_naive(), &policy.pawn_terms)?;
            pawns::apply_allocation(&plan, now, &mut *conn).await?;
            Allocation::Pawn(plan)
        },
    };
    trace!("🗃️ {amount} allocated to {target}");
    Ok(allocation)
}
