use crate::{
    db_types::{
        CustomerIdentity,
        InstallmentSchedule,
        NewInstallmentContract,
        NewOrder,
        NewPawnLoan,
        ObligationRef,
        Order,
        PawnLoan,
        PaymentRecord,
    },
    traits::ReconciliationError,
};

/// Creating and querying the obligations that payments are reconciled against.
///
/// Obligations are created by the shop back office; this engine only reads them and moves their balances.
#[allow(async_fn_in_trait)]
pub trait ObligationManagement {
    async fn fetch_customer_identity(&self, id: i64) -> Result<Option<CustomerIdentity>, ReconciliationError>;

    async fn insert_order(&self, order: NewOrder) -> Result<Order, ReconciliationError>;

    /// Stores the contract and generates its period schedule in one transaction.
    async fn insert_installment_contract(
        &self,
        contract: NewInstallmentContract,
    ) -> Result<InstallmentSchedule, ReconciliationError>;

    async fn insert_pawn_loan(&self, loan: NewPawnLoan) -> Result<PawnLoan, ReconciliationError>;

    async fn fetch_order(&self, id: i64) -> Result<Option<Order>, ReconciliationError>;

    async fn fetch_installment_schedule(&self, id: i64) -> Result<Option<InstallmentSchedule>, ReconciliationError>;

    async fn fetch_pawn_loan(&self, id: i64) -> Result<Option<PawnLoan>, ReconciliationError>;

    /// Every payment record linked to the obligation, oldest first, whatever its status.
    async fn fetch_payments_for_obligation(
        &self,
        obligation: ObligationRef,
    ) -> Result<Vec<PaymentRecord>, ReconciliationError>;
}
