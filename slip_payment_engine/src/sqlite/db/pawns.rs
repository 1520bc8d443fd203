use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    allocation::PawnAllocation,
    db_types::{NewPawnLoan, ObligationRef, PawnLoan, PawnStatus},
    traits::ReconciliationError,
};

pub async fn insert_loan(loan: NewPawnLoan, conn: &mut SqliteConnection) -> Result<PawnLoan, ReconciliationError> {
    if !loan.principal.is_positive() || loan.monthly_rate_bps < 0 {
        return Err(ReconciliationError::InvalidPayment(format!(
            "Pawn ticket {} needs a positive principal and a non-negative rate",
            loan.ticket_number
        )));
    }
    let loan: PawnLoan = sqlx::query_as(
        r#"
            INSERT INTO pawn_loans (ticket_number, customer_id, item_description, principal, monthly_rate_bps, due_date,
                status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING *;
        "#,
    )
    .bind(loan.ticket_number)
    .bind(loan.customer_id)
    .bind(loan.item_description)
    .bind(loan.principal)
    .bind(loan.monthly_rate_bps)
    .bind(loan.due_date)
    .bind(PawnStatus::Active)
    .bind(loan.created_at)
    .fetch_one(conn)
    .await?;
    trace!("🗃️ Pawn ticket {} saved with id {}", loan.ticket_number, loan.id);
    Ok(loan)
}

pub async fn fetch_loan(id: i64, conn: &mut SqliteConnection) -> Result<Option<PawnLoan>, ReconciliationError> {
    let loan = sqlx::query_as("SELECT * FROM pawn_loans WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(loan)
}

pub async fn fetch_open_loans(
    customer_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<PawnLoan>, ReconciliationError> {
    let loans = sqlx::query_as(
        "SELECT * FROM pawn_loans WHERE customer_id = $1 AND status = $2 ORDER BY created_at DESC, id DESC",
    )
    .bind(customer_id)
    .bind(PawnStatus::Active)
    .fetch_all(conn)
    .await?;
    Ok(loans)
}

pub async fn apply_allocation(
    allocation: &PawnAllocation,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PawnLoan, ReconciliationError> {
    let redeemed_at = (allocation.status == PawnStatus::Redeemed).then_some(now);
    let loan = sqlx::query_as(
        r#"
            UPDATE pawn_loans SET
                principal_paid = principal_paid + $1,
                interest_paid = interest_paid + $2,
                overpaid_amount = overpaid_amount + $3,
                due_date = $4,
                extension_count = $5,
                status = $6,
                redeemed_at = COALESCE(redeemed_at, $7),
                updated_at = $8
            WHERE id = $9 AND status = $10
            RETURNING *;
        "#,
    )
    .bind(allocation.principal_portion)
    .bind(allocation.interest_portion)
    .bind(allocation.surplus)
    .bind(allocation.due_date)
    .bind(allocation.extension_count)
    .bind(allocation.status)
    .bind(redeemed_at)
    .bind(now)
    .bind(allocation.loan_id)
    .bind(PawnStatus::Active)
    .fetch_optional(conn)
    .await?
    .ok_or(ReconciliationError::ObligationClosed(ObligationRef::pawn(allocation.loan_id)))?;
    Ok(loan)
}
