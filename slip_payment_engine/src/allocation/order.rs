use log::*;

use super::{AllocationError, AllocationSummary};
use crate::db_types::{ObligationRef, Order, OrderPaymentStatus, OrderStatus, Satang};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAllocation {
    pub order_id: i64,
    pub applied: Satang,
    pub paid_before: Satang,
    pub paid_after: Satang,
    /// The part of the payment beyond the order total. It is absorbed into `paid_amount`.
    pub overpaid: Satang,
    pub payment_status: OrderPaymentStatus,
    pub status: OrderStatus,
    pub became_paid: bool,
}

impl OrderAllocation {
    pub fn summary(&self) -> AllocationSummary {
        AllocationSummary::Order {
            order_id: self.order_id,
            applied: self.applied,
            paid_before: self.paid_before,
            paid_after: self.paid_after,
            overpaid: self.overpaid,
            payment_status: self.payment_status,
            status: self.status,
        }
    }
}

/// Adds `amount` to the order's paid balance and works out the resulting statuses.
///
/// * `payment_status` is `paid` once the total is covered, `partial` while anything has been paid, `pending` otherwise.
/// * An order still awaiting payment moves to `processing` as soon as money arrives.
/// * Anything beyond the total is absorbed and reported as `overpaid`.
pub fn allocate_to_order(order: &Order, amount: Satang) -> Result<OrderAllocation, AllocationError> {
    let target = ObligationRef::order(order.id);
    if !amount.is_positive() {
        return Err(AllocationError::NonPositiveAmount(amount));
    }
    if !order.is_open() {
        return Err(AllocationError::ObligationClosed(target));
    }
    let paid_before = order.paid_amount;
    let paid_after = paid_before + amount;
    if paid_after < paid_before {
        return Err(AllocationError::invariant(target, "paid amount decreased"));
    }
    let payment_status = if paid_after >= order.total_amount {
        OrderPaymentStatus::Paid
    } else if paid_after.is_positive() {
        OrderPaymentStatus::Partial
    } else {
        OrderPaymentStatus::Pending
    };
    let status = if order.status.is_awaiting_payment() && paid_after.is_positive() {
        OrderStatus::Processing
    } else {
        order.status
    };
    let overpaid = (paid_after - order.total_amount).max(Satang::ZERO).min(amount);
    if overpaid.is_positive() {
        warn!("💰️ Order {} is overpaid by {overpaid}. The surplus is absorbed into the order balance.", order.id);
    }
    Ok(OrderAllocation {
        order_id: order.id,
        applied: amount,
        paid_before,
        paid_after,
        overpaid,
        payment_status,
        status,
        became_paid: payment_status == OrderPaymentStatus::Paid,
    })
}
