use chrono::{DateTime, Utc};
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    allocation::InstallmentAllocation,
    db_types::{
        ContractStatus,
        InstallmentContract,
        InstallmentPeriod,
        InstallmentSchedule,
        NewInstallmentContract,
        ObligationRef,
        PeriodStatus,
    },
    traits::ReconciliationError,
};

/// Inserts the contract and one row per planned period. Not atomic on its own; run it inside a transaction.
pub async fn insert_contract(
    contract: NewInstallmentContract,
    conn: &mut SqliteConnection,
) -> Result<InstallmentSchedule, ReconciliationError> {
    if contract.period_count == 0 || !contract.financed_amount.is_positive() {
        return Err(ReconciliationError::InvalidPayment(format!(
            "Contract {} needs a positive financed amount and at least one period",
            contract.contract_number
        )));
    }
    let plan = contract.plan_periods();
    let record: InstallmentContract = sqlx::query_as(
        r#"
            INSERT INTO installment_contracts (contract_number, customer_id, order_id, financed_amount, period_amount,
                period_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *;
        "#,
    )
    .bind(&contract.contract_number)
    .bind(contract.customer_id)
    .bind(contract.order_id)
    .bind(contract.financed_amount)
    .bind(contract.period_amount())
    .bind(i64::from(contract.period_count))
    .bind(contract.created_at)
    .fetch_one(&mut *conn)
    .await?;
    let mut periods = Vec::with_capacity(plan.len());
    for p in plan {
        let period: InstallmentPeriod = sqlx::query_as(
            r#"
                INSERT INTO installment_periods (contract_id, sequence, due_date, amount_due, paid_amount, status)
                VALUES ($1, $2, $3, $4, 0, $5)
                RETURNING *;
            "#,
        )
        .bind(record.id)
        .bind(p.sequence)
        .bind(p.due_date)
        .bind(p.amount_due)
        .bind(PeriodStatus::Pending)
        .fetch_one(&mut *conn)
        .await?;
        periods.push(period);
    }
    debug!("🗃️ Installment contract {} saved with {} periods", record.id, periods.len());
    Ok(InstallmentSchedule { contract: record, periods })
}

pub async fn fetch_schedule(
    contract_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<InstallmentSchedule>, ReconciliationError> {
    let contract: Option<InstallmentContract> = sqlx::query_as("SELECT * FROM installment_contracts WHERE id = $1")
        .bind(contract_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(contract) = contract else {
        return Ok(None);
    };
    let periods = fetch_periods(contract.id, conn).await?;
    Ok(Some(InstallmentSchedule { contract, periods }))
}

pub async fn fetch_periods(
    contract_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<InstallmentPeriod>, ReconciliationError> {
    let periods = sqlx::query_as("SELECT * FROM installment_periods WHERE contract_id = $1 ORDER BY sequence ASC")
        .bind(contract_id)
        .fetch_all(conn)
        .await?;
    Ok(periods)
}

/// Active contracts for the customer, newest first, each with its full schedule.
pub async fn fetch_open_schedules(
    customer_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<InstallmentSchedule>, ReconciliationError> {
    let contracts: Vec<InstallmentContract> = sqlx::query_as(
        "SELECT * FROM installment_contracts WHERE customer_id = $1 AND status = $2 ORDER BY created_at DESC, id DESC",
    )
    .bind(customer_id)
    .bind(ContractStatus::Active)
    .fetch_all(&mut *conn)
    .await?;
    let mut schedules = Vec::with_capacity(contracts.len());
    for contract in contracts {
        let periods = fetch_periods(contract.id, &mut *conn).await?;
        schedules.push(InstallmentSchedule { contract, periods });
    }
    Ok(schedules)
}

/// Writes an installment allocation: the contract totals are incremented in place, then each touched period.
///
/// The period table's check constraint refuses any period paid beyond its due amount, which aborts the transaction.
pub async fn apply_allocation(
    allocation: &InstallmentAllocation,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<InstallmentContract, ReconciliationError> {
    let status = if allocation.completed { ContractStatus::Completed } else { ContractStatus::Active };
    let completed_at = allocation.completed.then_some(now);
    let contract = sqlx::query_as(
        r#"
            UPDATE installment_contracts SET
                total_paid = total_paid + $1,
                overpaid_amount = overpaid_amount + $2,
                status = $3,
                completed_at = COALESCE(completed_at, $4),
                updated_at = $5
            WHERE id = $6 AND status = $7
            RETURNING *;
        "#,
    )
    .bind(allocation.applied)
    .bind(allocation.overpaid)
    .bind(status)
    .bind(completed_at)
    .bind(now)
    .bind(allocation.contract_id)
    .bind(ContractStatus::Active)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(ReconciliationError::ObligationClosed(ObligationRef::installment(allocation.contract_id)))?;
    for update in &allocation.period_updates {
        let paid_at = (update.status == PeriodStatus::Paid).then_some(now);
        let result = sqlx::query(
            r#"
                UPDATE installment_periods SET
                    paid_amount = paid_amount + $1,
                    status = $2,
                    paid_at = COALESCE(paid_at, $3)
                WHERE id = $4 AND contract_id = $5
            "#,
        )
        .bind(update.applied)
        .bind(update.status)
        .bind(paid_at)
        .bind(update.period_id)
        .bind(allocation.contract_id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() != 1 {
            return Err(ReconciliationError::AllocationInvariantViolation(format!(
                "Period {} of contract {} could not be updated",
                update.sequence, allocation.contract_id
            )));
        }
        trace!("🗃️ Contract {} period {} now {:?}", allocation.contract_id, update.sequence, update.status);
    }
    Ok(contract)
}
