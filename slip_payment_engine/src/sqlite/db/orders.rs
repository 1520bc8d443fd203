use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    allocation::OrderAllocation,
    db_types::{NewOrder, ObligationRef, Order, OrderPaymentStatus, OrderStatus},
    traits::ReconciliationError,
};

pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, ReconciliationError> {
    let order: Order = sqlx::query_as(
        r#"
            INSERT INTO orders (order_number, customer_id, total_amount, paid_amount, payment_status, status, created_at,
                updated_at)
            VALUES ($1, $2, $3, 0, 'pending', $4, $5, $5)
            RETURNING *;
        "#,
    )
    .bind(order.order_number)
    .bind(order.customer_id)
    .bind(order.total_amount)
    .bind(order.status)
    .bind(order.created_at)
    .fetch_one(conn)
    .await?;
    trace!("🗃️ Order {} saved with id {}", order.order_number, order.id);
    Ok(order)
}

pub async fn fetch_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, ReconciliationError> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

/// Orders the customer can still pay towards, newest first.
pub async fn fetch_open_orders(customer_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Order>, ReconciliationError> {
    let orders = sqlx::query_as(
        r#"
            SELECT * FROM orders
            WHERE customer_id = $1
              AND payment_status <> $2
              AND status NOT IN ($3, $4)
            ORDER BY created_at DESC, id DESC;
        "#,
    )
    .bind(customer_id)
    .bind(OrderPaymentStatus::Paid)
    .bind(OrderStatus::Cancelled)
    .bind(OrderStatus::Completed)
    .fetch_all(conn)
    .await?;
    Ok(orders)
}

/// Writes an order allocation. The paid balance is incremented in place, and the update only applies if the balance
/// is still the one the allocation was computed from. Otherwise the order is reported as changed, or missing if it
/// no longer exists.
pub async fn apply_allocation(
    allocation: &OrderAllocation,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, ReconciliationError> {
    let order: Option<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET
                paid_amount = paid_amount + $1,
                payment_status = $2,
                status = $3,
                updated_at = $4
            WHERE id = $5 AND paid_amount = $6
            RETURNING *;
        "#,
    )
    .bind(allocation.applied)
    .bind(allocation.payment_status)
    .bind(allocation.status)
    .bind(now)
    .bind(allocation.order_id)
    .bind(allocation.paid_before)
    .fetch_optional(&mut *conn)
    .await?;
    let target = ObligationRef::order(allocation.order_id);
    match order {
        Some(order) => Ok(order),
        None => match fetch_order(allocation.order_id, conn).await? {
            Some(_) => Err(ReconciliationError::ObligationChanged(target)),
            None => Err(ReconciliationError::ObligationNotFound(target)),
        },
    }
}

/// Marks an order as paid because the installment contract financing it has completed. An order still awaiting
/// payment moves to `processing`.
pub async fn mark_paid_by_contract(
    order_id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, ReconciliationError> {
    let order = sqlx::query_as(
        r#"
            UPDATE orders SET
                payment_status = $1,
                status = CASE WHEN status IN ($2, $3, $4) THEN $5 ELSE status END,
                updated_at = $6
            WHERE id = $7
            RETURNING *;
        "#,
    )
    .bind(OrderPaymentStatus::Paid)
    .bind(OrderStatus::Pending)
    .bind(OrderStatus::AwaitingPayment)
    .bind(OrderStatus::AwaitingVerification)
    .bind(OrderStatus::Processing)
    .bind(now)
    .bind(order_id)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}
