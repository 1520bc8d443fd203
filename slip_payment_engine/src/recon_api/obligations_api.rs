use std::fmt::Debug;

use chrono::NaiveDate;
use log::*;

use crate::{
    allocation::{redemption_quote, RedemptionQuote},
    config::PawnTerms,
    db_types::{
        InstallmentSchedule,
        NewInstallmentContract,
        NewOrder,
        NewPawnLoan,
        ObligationFamily,
        ObligationLifecycle,
        ObligationRef,
        Order,
        PawnLoan,
        PaymentRecord,
    },
    traits::{ObligationManagement, ReconciliationError},
};

/// `ObligationsApi` lets the back office create the obligations payments are reconciled against, and look them up.
pub struct ObligationsApi<B> {
    db: B,
    pawn_terms: PawnTerms,
}

impl<B> Debug for ObligationsApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObligationsApi")
    }
}

impl<B> ObligationsApi<B> {
    pub fn new(db: B, pawn_terms: PawnTerms) -> Self {
        Self { db, pawn_terms }
    }
}

impl<B> ObligationsApi<B>
where B: ObligationManagement
{
    pub async fn create_order(&self, order: NewOrder) -> Result<Order, ReconciliationError> {
        self.customer_must_exist(order.customer_id).await?;
        if !order.total_amount.is_positive() {
            return Err(ReconciliationError::InvalidPayment(format!(
                "Order {} must have a positive total",
                order.order_number
            )));
        }
        self.db.insert_order(order).await
    }

    /// Creates an installment contract and its period schedule.
    pub async fn create_installment_contract(
        &self,
        contract: NewInstallmentContract,
    ) -> Result<InstallmentSchedule, ReconciliationError> {
        self.customer_must_exist(contract.customer_id).await?;
        if let Some(order_id) = contract.order_id {
            self.db
                .fetch_order(order_id)
                .await?
                .ok_or(ReconciliationError::ObligationNotFound(ObligationRef::order(order_id)))?;
        }
        let schedule = self.db.insert_installment_contract(contract).await?;
        info!(
            "🔄️ Installment contract {} created: {} over {} periods",
            schedule.contract.contract_number,
            schedule.contract.financed_amount,
            schedule.periods.len()
        );
        Ok(schedule)
    }

    pub async fn create_pawn_loan(&self, loan: NewPawnLoan) -> Result<PawnLoan, ReconciliationError> {
        self.customer_must_exist(loan.customer_id).await?;
        self.db.insert_pawn_loan(loan).await
    }

    pub async fn order(&self, id: i64) -> Result<Option<Order>, ReconciliationError> {
        self.db.fetch_order(id).await
    }

    pub async fn installment_schedule(&self, id: i64) -> Result<Option<InstallmentSchedule>, ReconciliationError> {
        self.db.fetch_installment_schedule(id).await
    }

    pub async fn pawn_loan(&self, id: i64) -> Result<Option<PawnLoan>, ReconciliationError> {
        self.db.fetch_pawn_loan(id).await
    }

    /// Where the obligation is in its life, in family-independent terms.
    pub async fn lifecycle(
        &self,
        obligation: ObligationRef,
        today: NaiveDate,
    ) -> Result<ObligationLifecycle, ReconciliationError> {
        let not_found = || ReconciliationError::ObligationNotFound(obligation);
        let lifecycle = match obligation.family {
            ObligationFamily::Order => self.db.fetch_order(obligation.id).await?.ok_or_else(not_found)?.lifecycle(),
            ObligationFamily::Installment => {
                self.db.fetch_installment_schedule(obligation.id).await?.ok_or_else(not_found)?.lifecycle(today)
            },
            ObligationFamily::Pawn => {
                self.db.fetch_pawn_loan(obligation.id).await?.ok_or_else(not_found)?.lifecycle(today)
            },
        };
        Ok(lifecycle)
    }

    /// Every payment record linked to the obligation, whatever its status.
    pub async fn payments_for(&self, obligation: ObligationRef) -> Result<Vec<PaymentRecord>, ReconciliationError> {
        self.db.fetch_payments_for_obligation(obligation).await
    }

    /// What the customer must pay on `today` to redeem the pawned item.
    pub async fn redemption_quote(&self, loan_id: i64, today: NaiveDate) -> Result<RedemptionQuote, ReconciliationError> {
        let loan = self
            .db
            .fetch_pawn_loan(loan_id)
            .await?
            .ok_or(ReconciliationError::ObligationNotFound(ObligationRef::pawn(loan_id)))?;
        if !loan.is_open() {
            return Err(ReconciliationError::ObligationClosed(ObligationRef::pawn(loan_id)));
        }
        Ok(redemption_quote(&loan, today, &self.pawn_terms))
    }

    async fn customer_must_exist(&self, customer_id: i64) -> Result<(), ReconciliationError> {
        match self.db.fetch_customer_identity(customer_id).await? {
            Some(_) => Ok(()),
            None => Err(ReconciliationError::CustomerNotFound(customer_id)),
        }
    }
}
