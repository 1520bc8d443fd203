use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::{types::Json, QueryBuilder, Sqlite, SqliteConnection};

use crate::{
    db_types::{
        Classification,
        Disposition,
        MatchStatus,
        NewPaymentRecord,
        ObligationRef,
        PaymentMatch,
        PaymentRecord,
        PaymentStatus,
    },
    matching::DecisionLog,
    traits::ReconciliationError,
};

/// The outcome of trying to claim a transfer reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceClaim {
    /// The reference is new, or its previous claim has expired. This transaction now owns it.
    Claimed,
    /// Someone recorded this reference inside the recency window. Carries that payment record's id.
    AlreadyClaimed(Option<i64>),
}

/// Claims `(tenant, reference)` for a new payment.
///
/// This is the duplicate check and it is a single statement: the upsert only touches the row when the previous claim
/// is older than `window_start`, so of two concurrent uploads of the same slip exactly one gets a row back.
pub async fn claim_reference(
    tenant_id: &str,
    reference: &str,
    now: DateTime<Utc>,
    window_start: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<ReferenceClaim, ReconciliationError> {
    let claimed: Option<(String,)> = sqlx::query_as(
        r#"
            INSERT INTO payment_references (tenant_id, reference, payment_id, claimed_at)
            VALUES ($1, $2, NULL, $3)
            ON CONFLICT (tenant_id, reference) DO UPDATE SET
                payment_id = NULL,
                claimed_at = excluded.claimed_at
            WHERE payment_references.claimed_at < $4
            RETURNING reference;
        "#,
    )
    .bind(tenant_id)
    .bind(reference)
    .bind(now)
    .bind(window_start)
    .fetch_optional(&mut *conn)
    .await?;
    if claimed.is_some() {
        trace!("💳️ Reference {reference} claimed for tenant {tenant_id}");
        return Ok(ReferenceClaim::Claimed);
    }
    let existing: Option<(Option<i64>,)> =
        sqlx::query_as("SELECT payment_id FROM payment_references WHERE tenant_id = $1 AND reference = $2")
            .bind(tenant_id)
            .bind(reference)
            .fetch_optional(conn)
            .await?;
    let payment_id = existing.and_then(|(id,)| id);
    debug!("💳️ Reference {reference} was already claimed by payment {payment_id:?}");
    Ok(ReferenceClaim::AlreadyClaimed(payment_id))
}

pub async fn attach_reference(
    tenant_id: &str,
    reference: &str,
    payment_id: i64,
    conn: &mut SqliteConnection,
) -> Result<(), ReconciliationError> {
    sqlx::query("UPDATE payment_references SET payment_id = $1 WHERE tenant_id = $2 AND reference = $3")
        .bind(payment_id)
        .bind(tenant_id)
        .bind(reference)
        .execute(conn)
        .await?;
    Ok(())
}

/// Inserts the payment record, with its classification taken from the disposition. Ledger updates are not made here.
pub async fn insert_record(
    payment: &NewPaymentRecord,
    decision_log: &DecisionLog,
    conn: &mut SqliteConnection,
) -> Result<PaymentRecord, ReconciliationError> {
    let (payment_match, match_status, requires_review) = match payment.disposition {
        Disposition::Unmatched => (None, MatchStatus::NoMatch, true),
        Disposition::Allocate(m) => (Some(m), MatchStatus::AutoMatched, false),
        Disposition::Review(m, _) => (Some(m), MatchStatus::PendingReview, true),
    };
    let classification =
        payment_match.map(|m| Classification::from(m.target.family)).unwrap_or(Classification::Unclassified);
    let record = sqlx::query_as(
        r#"
            INSERT INTO payment_records (
                tenant_id, customer_id, reference, raw_reference, amount, bank, sender_name, receiver_name, slip_date,
                platform, external_user_id, channel_id, classification, obligation_id, pawn_payment_type, confidence,
                reason, match_status, status, requires_review, decision_log, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $22
            )
            RETURNING *;
        "#,
    )
    .bind(&payment.tenant_id)
    .bind(payment.customer_id)
    .bind(&payment.reference)
    .bind(&payment.raw_reference)
    .bind(payment.amount)
    .bind(&payment.bank)
    .bind(&payment.sender_name)
    .bind(&payment.receiver_name)
    .bind(&payment.slip_date)
    .bind(&payment.platform)
    .bind(&payment.external_user_id)
    .bind(payment.channel_id)
    .bind(classification)
    .bind(payment_match.map(|m| m.target.id))
    .bind(payment_match.and_then(|m| m.pawn_payment_type))
    .bind(payment_match.map(|m| m.confidence).unwrap_or(0))
    .bind(payment_match.map(|m| m.reason))
    .bind(match_status)
    .bind(PaymentStatus::Pending)
    .bind(requires_review)
    .bind(Json(decision_log))
    .bind(payment.received_at)
    .fetch_one(conn)
    .await?;
    Ok(record)
}

/// Marks a pending record as allocated to `payment_match`. Fails if the record is no longer pending.
pub async fn mark_verified(
    payment_id: i64,
    payment_match: &PaymentMatch,
    match_status: MatchStatus,
    actor: Option<&str>,
    decision_log: &DecisionLog,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentRecord, ReconciliationError> {
    let record = sqlx::query_as(
        r#"
            UPDATE payment_records SET
                classification = $1,
                obligation_id = $2,
                pawn_payment_type = $3,
                confidence = $4,
                reason = $5,
                match_status = $6,
                status = $7,
                requires_review = 0,
                decision_log = $8,
                verified_by = $9,
                verified_at = $10,
                updated_at = $10
            WHERE id = $11 AND status = $12
            RETURNING *;
        "#,
    )
    .bind(Classification::from(payment_match.target.family))
    .bind(payment_match.target.id)
    .bind(payment_match.pawn_payment_type)
    .bind(payment_match.confidence)
    .bind(payment_match.reason)
    .bind(match_status)
    .bind(PaymentStatus::Verified)
    .bind(Json(decision_log))
    .bind(actor)
    .bind(now)
    .bind(payment_id)
    .bind(PaymentStatus::Pending)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| ReconciliationError::IllegalStatusChange(format!("Payment {payment_id} is not pending")))?;
    Ok(record)
}

/// Stores a proposed match on a pending record and flags it for review. Ledgers are not touched.
pub async fn mark_pending_review(
    payment_id: i64,
    proposal: &PaymentMatch,
    decision_log: &DecisionLog,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentRecord, ReconciliationError> {
    let record = sqlx::query_as(
        r#"
            UPDATE payment_records SET
                classification = $1,
                obligation_id = $2,
                pawn_payment_type = $3,
                confidence = $4,
                reason = $5,
                match_status = $6,
                requires_review = 1,
                decision_log = $7,
                updated_at = $8
            WHERE id = $9 AND status = $10
            RETURNING *;
        "#,
    )
    .bind(Classification::from(proposal.target.family))
    .bind(proposal.target.id)
    .bind(proposal.pawn_payment_type)
    .bind(proposal.confidence)
    .bind(proposal.reason)
    .bind(MatchStatus::PendingReview)
    .bind(Json(decision_log))
    .bind(now)
    .bind(payment_id)
    .bind(PaymentStatus::Pending)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| ReconciliationError::IllegalStatusChange(format!("Payment {payment_id} is not pending")))?;
    Ok(record)
}

pub async fn mark_rejected(
    payment_id: i64,
    actor: &str,
    decision_log: &DecisionLog,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PaymentRecord, ReconciliationError> {
    let record = sqlx::query_as(
        r#"
            UPDATE payment_records SET
                status = $1,
                requires_review = 0,
                decision_log = $2,
                verified_by = $3,
                verified_at = $4,
                updated_at = $4
            WHERE id = $5 AND status = $6
            RETURNING *;
        "#,
    )
    .bind(PaymentStatus::Rejected)
    .bind(Json(decision_log))
    .bind(actor)
    .bind(now)
    .bind(payment_id)
    .bind(PaymentStatus::Pending)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| ReconciliationError::IllegalStatusChange(format!("Payment {payment_id} is not pending")))?;
    Ok(record)
}

/// Touches a pending record and returns it. Used as the first statement of a review transaction so that the
/// transaction holds the write lock before it reads any ledger. `None` if the record is missing or not pending.
pub async fn lock_pending_record(
    payment_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentRecord>, ReconciliationError> {
    let record = sqlx::query_as("UPDATE payment_records SET updated_at = $1 WHERE id = $2 AND status = $3 RETURNING *")
        .bind(now)
        .bind(payment_id)
        .bind(PaymentStatus::Pending)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

pub async fn fetch_record(id: i64, conn: &mut SqliteConnection) -> Result<Option<PaymentRecord>, ReconciliationError> {
    let record = sqlx::query_as("SELECT * FROM payment_records WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(record)
}

pub async fn fetch_recent_by_reference(
    tenant_id: &str,
    reference: &str,
    since: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<PaymentRecord>, ReconciliationError> {
    let record = sqlx::query_as(
        r#"
            SELECT * FROM payment_records
            WHERE tenant_id = $1 AND reference = $2 AND created_at >= $3
            ORDER BY created_at DESC, id DESC
            LIMIT 1;
        "#,
    )
    .bind(tenant_id)
    .bind(reference)
    .bind(since)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

pub async fn fetch_for_obligation(
    obligation: ObligationRef,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentRecord>, ReconciliationError> {
    let records = sqlx::query_as(
        "SELECT * FROM payment_records WHERE classification = $1 AND obligation_id = $2 ORDER BY created_at ASC, id ASC",
    )
    .bind(Classification::from(obligation.family))
    .bind(obligation.id)
    .fetch_all(conn)
    .await?;
    Ok(records)
}

/// Filter for listing payment records.
#[derive(Debug, Clone, Default)]
pub struct PaymentQueryFilter {
    statuses: Vec<PaymentStatus>,
    classification: Option<Classification>,
    match_status: Option<MatchStatus>,
    requires_review: Option<bool>,
    limit: Option<u32>,
}

impl PaymentQueryFilter {
    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_match_status(mut self, match_status: MatchStatus) -> Self {
        self.match_status = Some(match_status);
        self
    }

    pub fn requiring_review(mut self) -> Self {
        self.requires_review = Some(true);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Oldest first.
pub async fn search_records(
    filter: PaymentQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<PaymentRecord>, ReconciliationError> {
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM payment_records WHERE 1 = 1");
    if !filter.statuses.is_empty() {
        builder.push(" AND status IN (");
        let mut values = builder.separated(", ");
        for status in filter.statuses {
            values.push_bind(status);
        }
        values.push_unseparated(")");
    }
    if let Some(classification) = filter.classification {
        builder.push(" AND classification = ").push_bind(classification);
    }
    if let Some(match_status) = filter.match_status {
        builder.push(" AND match_status = ").push_bind(match_status);
    }
    if let Some(review) = filter.requires_review {
        builder.push(" AND requires_review = ").push_bind(review);
    }
    builder.push(" ORDER BY created_at ASC, id ASC");
    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ").push_bind(i64::from(limit));
    }
    trace!("💳️ Executing query: {}", builder.sql());
    let records = builder.build_query_as::<PaymentRecord>().fetch_all(conn).await?;
    Ok(records)
}
