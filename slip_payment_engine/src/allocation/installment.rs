use log::*;

use super::{AllocationError, AllocationSummary, PeriodSummary};
use crate::db_types::{ContractStatus, InstallmentPeriod, InstallmentSchedule, ObligationRef, PeriodStatus, Satang};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodUpdate {
    pub period_id: i64,
    pub sequence: i64,
    /// Amount of this payment placed on the period. Zero for force-closed periods.
    pub applied: Satang,
    pub paid_after: Satang,
    pub status: PeriodStatus,
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallmentAllocation {
    pub contract_id: i64,
    pub applied: Satang,
    pub total_paid_after: Satang,
    /// Surplus after every period is covered. Held on the contract for staff to refund or credit.
    pub overpaid: Satang,
    pub period_updates: Vec<PeriodUpdate>,
    pub completed: bool,
    /// The financed order, which is marked paid when the contract completes.
    pub parent_order_id: Option<i64>,
}

impl InstallmentAllocation {
    pub fn summary(&self) -> AllocationSummary {
        AllocationSummary::Installment {
            contract_id: self.contract_id,
            applied: self.applied,
            periods: self
                .period_updates
                .iter()
                .map(|u| PeriodSummary { sequence: u.sequence, applied: u.applied, status: u.status, forced: u.forced })
                .collect(),
            overpaid: self.overpaid,
            status: if self.completed { ContractStatus::Completed } else { ContractStatus::Active },
        }
    }

    pub fn distributed(&self) -> Satang {
        self.period_updates.iter().map(|u| u.applied).sum()
    }
}

/// Distributes a payment over the open periods of an installment contract.
///
/// Open periods are filled strictly in sequence order until the money runs out, so a partially paid period is only
/// topped up once every earlier period is covered. A period only becomes `paid` when it is fully covered.
///
/// The contract completes when every period is paid, when the periods' paid total reaches their due total, or when
/// the contract's cumulative payments reach the financed amount. On completion any period still open is force-closed
/// to `paid` (its paid amount is left as is) and the caller must mark the parent order, if any, as paid.
pub fn allocate_to_installment(
    schedule: &InstallmentSchedule,
    amount: Satang,
) -> Result<InstallmentAllocation, AllocationError> {
    let contract = &schedule.contract;
    let target = ObligationRef::installment(contract.id);
    if !amount.is_positive() {
        return Err(AllocationError::NonPositiveAmount(amount));
    }
    if !contract.is_open() {
        return Err(AllocationError::ObligationClosed(target));
    }
    let mut periods = schedule.periods.iter().collect::<Vec<&InstallmentPeriod>>();
    periods.sort_by_key(|p| p.sequence);
    for pair in periods.windows(2) {
        if pair[0].sequence == pair[1].sequence {
            return Err(AllocationError::invariant(target, format!("period {} appears twice", pair[0].sequence)));
        }
    }
    if let Some(p) = periods.iter().find(|p| p.paid_amount > p.amount_due) {
        return Err(AllocationError::invariant(target, format!("period {} is already overpaid", p.sequence)));
    }

    let open_periods = periods.iter().filter(|p| matches!(p.status, PeriodStatus::Pending | PeriodStatus::Partial));
    let mut remaining = amount;
    let mut updates = Vec::new();
    for period in open_periods {
        if !remaining.is_positive() {
            break;
        }
        let outstanding = period.outstanding();
        if !outstanding.is_positive() {
            continue;
        }
        let applied = remaining.min(outstanding);
        remaining -= applied;
        let paid_after = period.paid_amount + applied;
        if paid_after > period.amount_due {
            return Err(AllocationError::invariant(
                target,
                format!("period {} would be paid {paid_after} against {} due", period.sequence, period.amount_due),
            ));
        }
        let status = if paid_after == period.amount_due { PeriodStatus::Paid } else { PeriodStatus::Partial };
        trace!("💰️ Contract {}: {applied} placed on period {} ({status:?})", contract.id, period.sequence);
        updates.push(PeriodUpdate {
            period_id: period.id,
            sequence: period.sequence,
            applied,
            paid_after,
            status,
            forced: false,
        });
    }
    let overpaid = remaining;
    let distributed = updates.iter().map(|u| u.applied).sum::<Satang>();
    if distributed + overpaid != amount {
        return Err(AllocationError::invariant(
            target,
            format!("{distributed} distributed and {overpaid} surplus do not add up to {amount}"),
        ));
    }

    let status_after = |p: &InstallmentPeriod| updates.iter().find(|u| u.period_id == p.id).map(|u| u.status);
    let paid_after = |p: &InstallmentPeriod| {
        updates.iter().find(|u| u.period_id == p.id).map(|u| u.paid_after).unwrap_or(p.paid_amount)
    };
    let all_paid = periods.iter().copied().all(|p| status_after(p).unwrap_or(p.status) == PeriodStatus::Paid);
    let periods_paid = periods.iter().copied().map(paid_after).sum::<Satang>();
    let periods_due = periods.iter().map(|p| p.amount_due).sum::<Satang>();
    let total_paid_after = contract.total_paid + amount;
    let completed = all_paid || periods_paid >= periods_due || total_paid_after >= contract.financed_amount;

    if completed {
        let still_open = periods
            .iter()
            .copied()
            .filter(|&p| status_after(p).unwrap_or(p.status) != PeriodStatus::Paid)
            .map(|p| (p.id, p.sequence, paid_after(p)))
            .collect::<Vec<_>>();
        if !still_open.is_empty() {
            let seqs = still_open.iter().map(|(_, s, _)| s.to_string()).collect::<Vec<_>>().join(", ");
            warn!("💰️ Contract {} is complete. Force-closing periods [{seqs}] as paid.", contract.id);
        }
        for (period_id, sequence, paid_after) in still_open {
            match updates.iter_mut().find(|u| u.period_id == period_id) {
                Some(u) => {
                    u.status = PeriodStatus::Paid;
                    u.forced = true;
                },
                None => updates.push(PeriodUpdate {
                    period_id,
                    sequence,
                    applied: Satang::ZERO,
                    paid_after,
                    status: PeriodStatus::Paid,
                    forced: true,
                }),
            }
        }
        updates.sort_by_key(|u| u.sequence);
        debug!("💰️ Contract {} completed with {total_paid_after} paid", contract.id);
    }
    if overpaid.is_positive() {
        warn!("💰️ Contract {} has been overpaid by {overpaid}. Holding it on the contract for staff.", contract.id);
    }
    Ok(InstallmentAllocation {
        contract_id: contract.id,
        applied: amount,
        total_paid_after,
        overpaid,
        period_updates: updates,
        completed,
        parent_order_id: contract.order_id,
    })
}

#[cfg(test)]
mod test {
    use chrono::{NaiveDate, Utc};

    use super::*;
    use crate::db_types::InstallmentContract;

    fn schedule(period_amounts: &[i64], paid: &[i64]) -> InstallmentSchedule {
        let now = Utc::now();
        let financed = period_amounts.iter().sum::<i64>();
        let contract = InstallmentContract {
            id: 3,
            contract_number: "IC-3".into(),
            customer_id: 1,
            order_id: Some(11),
            financed_amount: Satang::from_baht(financed),
            period_amount: Satang::from_baht(period_amounts[0]),
            period_count: period_amounts.len() as i64,
            total_paid: Satang::from_baht(paid.iter().sum()),
            overpaid_amount: Satang::ZERO,
            status: ContractStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let periods = period_amounts
            .iter()
            .enumerate()
            .map(|(i, due)| {
                let p = paid.get(i).copied().unwrap_or(0);
                InstallmentPeriod {
                    id: 100 + i as i64,
                    contract_id: 3,
                    sequence: i as i64 + 1,
                    due_date: NaiveDate::from_ymd_opt(2026, i as u32 + 1, 15).unwrap(),
                    amount_due: Satang::from_baht(*due),
                    paid_amount: Satang::from_baht(p),
                    status: match p {
                        0 => PeriodStatus::Pending,
                        p if p == *due => PeriodStatus::Paid,
                        _ => PeriodStatus::Partial,
                    },
                    paid_at: None,
                }
            })
            .collect();
        InstallmentSchedule { contract, periods }
    }

    #[test]
    fn fills_periods_in_order() {
        let s = schedule(&[1000, 1000, 1000], &[]);
        let alloc = allocate_to_installment(&s, Satang::from_baht(2500)).unwrap();
        assert!(!alloc.completed);
        assert_eq!(alloc.period_updates.len(), 3);
        assert_eq!(alloc.period_updates[0].status, PeriodStatus::Paid);
        assert_eq!(alloc.period_updates[1].status, PeriodStatus::Paid);
        assert_eq!(alloc.period_updates[2].status, PeriodStatus::Partial);
        assert_eq!(alloc.period_updates[2].paid_after, Satang::from_baht(500));
        assert_eq!(alloc.distributed(), Satang::from_baht(2500));
        assert_eq!(alloc.total_paid_after, Satang::from_baht(2500));
    }

    #[test]
    fn partial_period_is_topped_up_first() {
        let s = schedule(&[1000, 1000, 1000], &[1000, 400]);
        let alloc = allocate_to_installment(&s, Satang::from_baht(700)).unwrap();
        assert_eq!(alloc.period_updates[0].sequence, 2);
        assert_eq!(alloc.period_updates[0].applied, Satang::from_baht(600));
        assert_eq!(alloc.period_updates[0].status, PeriodStatus::Paid);
        assert_eq!(alloc.period_updates[1].sequence, 3);
        assert_eq!(alloc.period_updates[1].applied, Satang::from_baht(100));
        for u in &alloc.period_updates {
            let due = s.periods.iter().find(|p| p.id == u.period_id).unwrap().amount_due;
            assert!(u.paid_after <= due);
        }
    }

    #[test]
    fn earlier_pending_period_comes_before_a_later_partial_one() {
        let s = schedule(&[1000, 1000, 1000], &[0, 0, 400]);
        let alloc = allocate_to_installment(&s, Satang::from_baht(700)).unwrap();
        assert!(!alloc.completed);
        assert_eq!(alloc.period_updates.len(), 1);
        assert_eq!(alloc.period_updates[0].sequence, 1);
        assert_eq!(alloc.period_updates[0].applied, Satang::from_baht(700));
        assert_eq!(alloc.period_updates[0].status, PeriodStatus::Partial);
    }

    #[test]
    fn overpayment_completes_and_is_held() {
        let s = schedule(&[1000, 1000, 1000], &[1000]);
        let alloc = allocate_to_installment(&s, Satang::from_baht(2300)).unwrap();
        assert!(alloc.completed);
        assert_eq!(alloc.overpaid, Satang::from_baht(300));
        assert_eq!(alloc.total_paid_after, Satang::from_baht(3300));
        assert_eq!(alloc.parent_order_id, Some(11));
        assert!(alloc.period_updates.iter().all(|u| u.status == PeriodStatus::Paid && !u.forced));
    }

    #[test]
    fn completion_by_contract_total_force_closes_periods() {
        // Money paid earlier was credited to the contract but never reached the periods
        let mut s = schedule(&[1000, 1000, 1000], &[]);
        s.contract.total_paid = Satang::from_baht(2800);
        let alloc = allocate_to_installment(&s, Satang::from_baht(200)).unwrap();
        assert!(alloc.completed);
        assert_eq!(alloc.period_updates.len(), 3);
        assert_eq!(alloc.period_updates[0].applied, Satang::from_baht(200));
        let forced = alloc.period_updates.iter().filter(|u| u.forced).collect::<Vec<_>>();
        assert_eq!(forced.len(), 3);
        assert!(alloc.period_updates.iter().all(|u| u.status == PeriodStatus::Paid));
        assert_eq!(forced[0].paid_after, Satang::from_baht(200));
    }

    #[test]
    fn refuses_completed_contracts_and_corrupt_schedules() {
        let mut s = schedule(&[1000, 1000], &[]);
        s.contract.status = ContractStatus::Completed;
        let err = allocate_to_installment(&s, Satang::from_baht(1)).unwrap_err();
        assert_eq!(err, AllocationError::ObligationClosed(ObligationRef::installment(3)));

        let mut s = schedule(&[1000, 1000], &[]);
        s.periods[0].paid_amount = Satang::from_baht(1200);
        let err = allocate_to_installment(&s, Satang::from_baht(1)).unwrap_err();
        assert!(matches!(err, AllocationError::InvariantViolation { .. }));
    }
}
