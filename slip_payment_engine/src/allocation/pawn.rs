use chrono::{Duration, NaiveDate};
use log::*;
use serde::{Deserialize, Serialize};

use super::{AllocationError, AllocationSummary};
use crate::{
    config::PawnTerms,
    db_types::{ObligationRef, PawnLoan, PawnPaymentType, PawnStatus, Satang},
};

/// What it costs to redeem a pawned item on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionQuote {
    pub loan_id: i64,
    pub outstanding_principal: Satang,
    /// Interest for one term on the outstanding principal.
    pub monthly_interest: Satang,
    pub days_overdue: i64,
    pub terms_due: i64,
    pub outstanding_interest: Satang,
    pub total: Satang,
}

/// Prices a redemption. A loan past its due date owes one term of interest for every started term it is overdue,
/// otherwise it owes one term.
///
/// A 10,000 baht loan at 2% a month that is 40 days overdue owes two terms of interest, 400 baht, for a redemption
/// total of 10,400 baht.
pub fn redemption_quote(loan: &PawnLoan, today: NaiveDate, terms: &PawnTerms) -> RedemptionQuote {
    let days_overdue = (today - loan.due_date).num_days().max(0);
    let term_days = terms.term_days.max(1);
    let terms_due = if days_overdue > 0 { (days_overdue + term_days - 1) / term_days } else { 1 };
    let monthly_interest = loan.monthly_interest();
    let outstanding_interest = monthly_interest * terms_due;
    let outstanding_principal = loan.outstanding_principal();
    RedemptionQuote {
        loan_id: loan.id,
        outstanding_principal,
        monthly_interest,
        days_overdue,
        terms_due,
        outstanding_interest,
        total: outstanding_principal + outstanding_interest,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PawnAllocation {
    pub loan_id: i64,
    pub payment_type: PawnPaymentType,
    pub interest_portion: Satang,
    pub principal_portion: Satang,
    /// Money beyond the outstanding principal. Held on the loan as an overpayment.
    pub surplus: Satang,
    pub due_date: NaiveDate,
    pub extension_count: i64,
    pub status: PawnStatus,
}

impl PawnAllocation {
    pub fn summary(&self) -> AllocationSummary {
        AllocationSummary::Pawn {
            loan_id: self.loan_id,
            payment_type: self.payment_type,
            interest_portion: self.interest_portion,
            principal_portion: self.principal_portion,
            surplus: self.surplus,
            status: self.status,
            extended: self.payment_type == PawnPaymentType::Interest && self.status == PawnStatus::Active,
        }
    }
}

/// Applies a payment to a pawn loan.
///
/// * `interest`: the whole amount is interest and the loan is extended by one term, unless the extension cap has been
///   reached. Then the loan moves to `extension_limit_reached` for staff to handle and is not extended.
/// * `redemption` and `full_redemption`: interest owing is taken first, the rest goes to principal. Covering the
///   outstanding principal redeems the loan, and anything beyond it is held on the loan as an overpayment.
/// * `partial`: interest first, then principal. The loan stays open unless the principal is cleared.
pub fn allocate_to_pawn(
    loan: &PawnLoan,
    amount: Satang,
    payment_type: PawnPaymentType,
    today: NaiveDate,
    terms: &PawnTerms,
) -> Result<PawnAllocation, AllocationError> {
    let target = ObligationRef::pawn(loan.id);
    if !amount.is_positive() {
        return Err(AllocationError::NonPositiveAmount(amount));
    }
    if !loan.is_open() {
        return Err(AllocationError::ObligationClosed(target));
    }
    let mut result = PawnAllocation {
        loan_id: loan.id,
        payment_type,
        interest_portion: Satang::ZERO,
        principal_portion: Satang::ZERO,
        surplus: Satang::ZERO,
        due_date: loan.due_date,
        extension_count: loan.extension_count,
        status: loan.status,
    };
    if payment_type == PawnPaymentType::Interest {
        result.interest_portion = amount;
        if loan.extension_count >= terms.max_extensions {
            warn!(
                "💰️ Pawn loan {} has been extended {} times, which is the limit. Interest of {amount} is recorded but \
                 the loan will not be extended. Manual handling is required.",
                loan.id, loan.extension_count
            );
            result.status = PawnStatus::ExtensionLimitReached;
        } else {
            result.due_date = loan.due_date + Duration::days(terms.term_days);
            result.extension_count = loan.extension_count + 1;
            debug!("💰️ Pawn loan {} extended to {} ({} extensions)", loan.id, result.due_date, result.extension_count);
        }
        return Ok(result);
    }

    let quote = redemption_quote(loan, today, terms);
    result.interest_portion = amount.min(quote.outstanding_interest);
    let to_principal = amount - result.interest_portion;
    if to_principal >= quote.outstanding_principal {
        result.principal_portion = quote.outstanding_principal;
        result.surplus = to_principal - quote.outstanding_principal;
        result.status = PawnStatus::Redeemed;
        debug!("💰️ Pawn loan {} redeemed", loan.id);
    } else {
        result.principal_portion = to_principal;
        if payment_type != PawnPaymentType::Partial {
            info!(
                "💰️ Redemption payment of {amount} for pawn loan {} falls short of the {} owing. Applied as a part \
                 payment.",
                loan.id, quote.total
            );
        }
    }
    if result.surplus.is_positive() {
        warn!("💰️ Pawn loan {} received {} more than was owing. The surplus is held on the loan.", loan.id, result.surplus);
    }
    if result.interest_portion + result.principal_portion + result.surplus != amount {
        return Err(AllocationError::invariant(target, "interest, principal and surplus do not add up to the payment"));
    }
    if loan.principal_paid + result.principal_portion > loan.principal {
        return Err(AllocationError::invariant(target, "principal repaid would exceed the loan principal"));
    }
    Ok(result)
}
