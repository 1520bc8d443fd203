//! Data types shared between the database backends and the public API.
//!
//! Everything that is persisted lives here: customer identities, the three obligation families (orders, installment
//! contracts with their periods, and pawn loans) and payment records. Enumerations are stored as snake_case text.
use std::fmt::Display;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, Type};
pub use spe_common::Satang;

use crate::matching::DecisionLog;

//-------------------------------------- CustomerIdentity  ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CustomerIdentity {
    pub id: i64,
    pub tenant_id: String,
    pub platform: String,
    pub external_user_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomerIdentity {
    pub tenant_id: String,
    /// The chat or web channel the customer reached us through, e.g. `line`, `facebook` or `web`. Always lowercase.
    pub platform: String,
    /// The customer's id as assigned by the channel platform.
    pub external_user_id: String,
    pub display_name: Option<String>,
}

impl NewCustomerIdentity {
    pub fn new<S: Into<String>>(tenant_id: S, platform: &str, external_user_id: S) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            platform: platform.trim().to_lowercase(),
            external_user_id: external_user_id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name.filter(|n| !n.trim().is_empty());
        self
    }
}

//--------------------------------------  ObligationFamily  ---------------------------------------------------------
/// The three kinds of obligation a payment can settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ObligationFamily {
    Order,
    Installment,
    Pawn,
}

impl ObligationFamily {
    pub const ALL: [ObligationFamily; 3] = [Self::Order, Self::Installment, Self::Pawn];

    /// Tie-break rank when two families propose candidates with equal confidence. Lower wins.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Order => 0,
            Self::Installment => 1,
            Self::Pawn => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Installment => "installment",
            Self::Pawn => "pawn",
        }
    }
}

impl Display for ObligationFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed pointer to a single obligation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObligationRef {
    pub family: ObligationFamily,
    pub id: i64,
}

impl ObligationRef {
    pub fn new(family: ObligationFamily, id: i64) -> Self {
        Self { family, id }
    }

    pub fn order(id: i64) -> Self {
        Self::new(ObligationFamily::Order, id)
    }

    pub fn installment(id: i64) -> Self {
        Self::new(ObligationFamily::Installment, id)
    }

    pub fn pawn(id: i64) -> Self {
        Self::new(ObligationFamily::Pawn, id)
    }
}

impl Display for ObligationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.family, self.id)
    }
}

/// The family-independent view of where an obligation is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationLifecycle {
    Open,
    PartiallySatisfied,
    Satisfied,
    Closed,
    Overdue,
    Cancelled,
}

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, no payment instructions sent yet.
    Pending,
    /// The customer has been asked to pay.
    AwaitingPayment,
    /// The customer says they paid and a slip is expected.
    AwaitingVerification,
    Processing,
    Shipped,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_awaiting_payment(&self) -> bool {
        matches!(self, Self::Pending | Self::AwaitingPayment | Self::AwaitingVerification)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderPaymentStatus {
    Pending,
    Partial,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub customer_id: i64,
    pub total_amount: Satang,
    pub paid_amount: Satang,
    pub payment_status: OrderPaymentStatus,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// What is still owed. Negative when the order has been overpaid.
    pub fn remaining(&self) -> Satang {
        self.total_amount - self.paid_amount
    }

    /// An order can take payments until it is fully paid, cancelled or completed.
    pub fn is_open(&self) -> bool {
        self.payment_status != OrderPaymentStatus::Paid &&
            !matches!(self.status, OrderStatus::Cancelled | OrderStatus::Completed)
    }

    pub fn lifecycle(&self) -> ObligationLifecycle {
        match (self.status, self.payment_status) {
            (OrderStatus::Cancelled, _) => ObligationLifecycle::Cancelled,
            (OrderStatus::Completed, _) => ObligationLifecycle::Closed,
            (_, OrderPaymentStatus::Paid) => ObligationLifecycle::Satisfied,
            (_, OrderPaymentStatus::Partial) => ObligationLifecycle::PartiallySatisfied,
            (_, OrderPaymentStatus::Pending) => ObligationLifecycle::Open,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    /// The shop's human-readable order number
    pub order_number: String,
    /// Internal customer identity id
    pub customer_id: i64,
    pub total_amount: Satang,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn new<S: Into<String>>(order_number: S, customer_id: i64, total_amount: Satang) -> Self {
        Self {
            order_number: order_number.into(),
            customer_id,
            total_amount,
            status: OrderStatus::AwaitingPayment,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

//-------------------------------------- InstallmentContract ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct InstallmentContract {
    pub id: i64,
    pub contract_number: String,
    pub customer_id: i64,
    /// The order this contract finances, if any. Completion of the contract marks the order as paid.
    pub order_id: Option<i64>,
    pub financed_amount: Satang,
    /// The regular amount the customer pays each period.
    pub period_amount: Satang,
    pub period_count: i64,
    /// Everything ever credited to this contract, including overpayment.
    pub total_paid: Satang,
    /// Surplus that could not be placed on any period. Held for staff to refund or credit.
    pub overpaid_amount: Satang,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl InstallmentContract {
    pub fn remaining(&self) -> Satang {
        self.financed_amount - self.total_paid
    }

    pub fn is_open(&self) -> bool {
        self.status == ContractStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Pending,
    Partial,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct InstallmentPeriod {
    pub id: i64,
    pub contract_id: i64,
    /// 1-based position in the schedule
    pub sequence: i64,
    pub due_date: NaiveDate,
    pub amount_due: Satang,
    pub paid_amount: Satang,
    pub status: PeriodStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

impl InstallmentPeriod {
    pub fn outstanding(&self) -> Satang {
        self.amount_due - self.paid_amount
    }

    pub fn is_open(&self) -> bool {
        self.status != PeriodStatus::Paid
    }
}

/// A contract together with its periods, ordered by sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentSchedule {
    pub contract: InstallmentContract,
    pub periods: Vec<InstallmentPeriod>,
}

impl InstallmentSchedule {
    pub fn next_open_period(&self) -> Option<&InstallmentPeriod> {
        self.periods.iter().find(|p| p.is_open())
    }

    pub fn total_due(&self) -> Satang {
        self.periods.iter().map(|p| p.amount_due).sum()
    }

    pub fn total_period_paid(&self) -> Satang {
        self.periods.iter().map(|p| p.paid_amount).sum()
    }

    pub fn lifecycle(&self, today: NaiveDate) -> ObligationLifecycle {
        match self.contract.status {
            ContractStatus::Completed => ObligationLifecycle::Satisfied,
            ContractStatus::Cancelled => ObligationLifecycle::Cancelled,
            ContractStatus::Active => {
                if self.periods.iter().any(|p| p.is_open() && p.due_date < today) {
                    ObligationLifecycle::Overdue
                } else if self.contract.total_paid.is_positive() {
                    ObligationLifecycle::PartiallySatisfied
                } else {
                    ObligationLifecycle::Open
                }
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewInstallmentContract {
    pub contract_number: String,
    pub customer_id: i64,
    pub order_id: Option<i64>,
    pub financed_amount: Satang,
    pub period_count: u32,
    /// Due date of the first period. Later periods fall due on the same day of each following month.
    pub first_due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// One row of a generated installment plan, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPeriod {
    pub sequence: i64,
    pub due_date: NaiveDate,
    pub amount_due: Satang,
}

impl NewInstallmentContract {
    pub fn new<S: Into<String>>(
        contract_number: S,
        customer_id: i64,
        financed_amount: Satang,
        period_count: u32,
        first_due_date: NaiveDate,
    ) -> Self {
        Self {
            contract_number: contract_number.into(),
            customer_id,
            order_id: None,
            financed_amount,
            period_count,
            first_due_date,
            created_at: Utc::now(),
        }
    }

    pub fn for_order(mut self, order_id: i64) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// The regular per-period amount: the financed amount divided evenly, truncated to the satang.
    pub fn period_amount(&self) -> Satang {
        if self.period_count == 0 {
            return Satang::ZERO;
        }
        Satang::from(self.financed_amount.value() / i64::from(self.period_count))
    }

    /// Splits the financed amount into `period_count` monthly periods. Every period is due the regular amount except
    /// the last, which absorbs the rounding remainder so that the periods sum exactly to the financed amount.
    pub fn plan_periods(&self) -> Vec<PlannedPeriod> {
        let regular = self.period_amount();
        let count = i64::from(self.period_count);
        let last = self.financed_amount - regular * (count - 1).max(0);
        (0..self.period_count)
            .map(|i| {
                let sequence = i64::from(i) + 1;
                let due_date = self.first_due_date.checked_add_months(Months::new(i)).unwrap_or(NaiveDate::MAX);
                let amount_due = if sequence == count { last } else { regular };
                PlannedPeriod { sequence, due_date, amount_due }
            })
            .collect()
    }
}

//--------------------------------------       PawnLoan        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PawnStatus {
    Active,
    Redeemed,
    /// Interest was paid after the extension cap was reached. Staff must decide what happens to the pledge.
    ExtensionLimitReached,
    Forfeited,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PawnLoan {
    pub id: i64,
    pub ticket_number: String,
    pub customer_id: i64,
    pub item_description: String,
    pub principal: Satang,
    /// Monthly interest rate in basis points. 200 = 2% per month.
    pub monthly_rate_bps: i64,
    pub principal_paid: Satang,
    pub interest_paid: Satang,
    /// Money received beyond the redemption total. Held on the loan for staff to refund.
    pub overpaid_amount: Satang,
    pub due_date: NaiveDate,
    pub extension_count: i64,
    pub status: PawnStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}

impl PawnLoan {
    pub fn outstanding_principal(&self) -> Satang {
        self.principal - self.principal_paid
    }

    /// Everything verified payments have put on the loan.
    pub fn total_received(&self) -> Satang {
        self.principal_paid + self.interest_paid + self.overpaid_amount
    }

    /// Interest for one term on the outstanding principal.
    pub fn monthly_interest(&self) -> Satang {
        self.outstanding_principal().basis_points(self.monthly_rate_bps)
    }

    pub fn is_open(&self) -> bool {
        self.status == PawnStatus::Active
    }

    pub fn lifecycle(&self, today: NaiveDate) -> ObligationLifecycle {
        match self.status {
            PawnStatus::Redeemed => ObligationLifecycle::Satisfied,
            PawnStatus::Forfeited => ObligationLifecycle::Cancelled,
            PawnStatus::ExtensionLimitReached => ObligationLifecycle::Closed,
            PawnStatus::Active if today > self.due_date => ObligationLifecycle::Overdue,
            PawnStatus::Active if self.principal_paid.is_positive() => ObligationLifecycle::PartiallySatisfied,
            PawnStatus::Active => ObligationLifecycle::Open,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPawnLoan {
    pub ticket_number: String,
    pub customer_id: i64,
    pub item_description: String,
    pub principal: Satang,
    pub monthly_rate_bps: i64,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl NewPawnLoan {
    pub fn new<S: Into<String>>(
        ticket_number: S,
        customer_id: i64,
        principal: Satang,
        monthly_rate_bps: i64,
        due_date: NaiveDate,
    ) -> Self {
        Self {
            ticket_number: ticket_number.into(),
            customer_id,
            item_description: String::default(),
            principal,
            monthly_rate_bps,
            due_date,
            created_at: Utc::now(),
        }
    }

    pub fn with_item<S: Into<String>>(mut self, description: S) -> Self {
        self.item_description = description.into();
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// How a payment against a pawn loan is to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PawnPaymentType {
    /// Pays the interest for a term and extends the loan
    Interest,
    /// Pays off the principal, with any interest owing taken first
    Redemption,
    /// Exactly principal plus outstanding interest
    FullRedemption,
    /// Reduces interest then principal without closing the loan
    Partial,
}

//--------------------------------------     Open obligations ---------------------------------------------------------
/// Every obligation a customer can currently pay towards, grouped by family.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenObligations {
    pub orders: Vec<Order>,
    pub installments: Vec<InstallmentSchedule>,
    pub pawns: Vec<PawnLoan>,
}

impl OpenObligations {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.installments.is_empty() && self.pawns.is_empty()
    }

    pub fn count(&self) -> usize {
        self.orders.len() + self.installments.len() + self.pawns.len()
    }
}

//--------------------------------------     PaymentRecord     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Order,
    Installment,
    Pawn,
    Unclassified,
}

impl Classification {
    pub fn family(&self) -> Option<ObligationFamily> {
        match self {
            Self::Order => Some(ObligationFamily::Order),
            Self::Installment => Some(ObligationFamily::Installment),
            Self::Pawn => Some(ObligationFamily::Pawn),
            Self::Unclassified => None,
        }
    }
}

impl From<ObligationFamily> for Classification {
    fn from(family: ObligationFamily) -> Self {
        match family {
            ObligationFamily::Order => Self::Order,
            ObligationFamily::Installment => Self::Installment,
            ObligationFamily::Pawn => Self::Pawn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Recorded but not applied to any ledger
    Pending,
    /// Applied to the linked obligation
    Verified,
    Rejected,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Verified => write!(f, "verified"),
            PaymentStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    AutoMatched,
    NoMatch,
    Duplicate,
    PendingReview,
    ManuallyMatched,
}

/// Why a matching strategy proposed a candidate. Stored with the payment for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    ExactBalance,
    ExactPeriodAmount,
    CloseAmountWithinTolerance,
    ExactInterestDue,
    ExactPrincipal,
    ExactRedemptionTotal,
    ActiveContractLink,
    OnlyOpenObligation,
    MostRecentOpenObligation,
    ManualAssignment,
}

impl ReasonCode {
    /// True for the matches that ignore the amount entirely. These carry real false-positive risk.
    pub fn is_heuristic(&self) -> bool {
        matches!(self, Self::ActiveContractLink | Self::OnlyOpenObligation | Self::MostRecentOpenObligation)
    }
}

/// Why a payment was parked for a human instead of being applied automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// The slip had no transfer reference, so duplicate detection could not run
    MissingReference,
    /// No obligation matched the payment
    NoCandidate,
}

/// The obligation a payment is (or is proposed to be) applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMatch {
    pub target: ObligationRef,
    pub confidence: u8,
    pub reason: ReasonCode,
    pub pawn_payment_type: Option<PawnPaymentType>,
}

impl PaymentMatch {
    pub fn manual(target: ObligationRef, pawn_payment_type: Option<PawnPaymentType>) -> Self {
        Self { target, confidence: 100, reason: ReasonCode::ManualAssignment, pawn_payment_type }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: i64,
    pub tenant_id: String,
    pub customer_id: i64,
    /// Normalised transfer reference used for duplicate detection
    pub reference: Option<String>,
    /// The reference exactly as the slip reader produced it
    pub raw_reference: Option<String>,
    pub amount: Satang,
    pub bank: Option<String>,
    pub sender_name: Option<String>,
    pub receiver_name: Option<String>,
    pub slip_date: Option<String>,
    pub platform: String,
    pub external_user_id: String,
    pub channel_id: Option<i64>,
    pub classification: Classification,
    pub obligation_id: Option<i64>,
    pub pawn_payment_type: Option<PawnPaymentType>,
    pub confidence: u8,
    pub reason: Option<ReasonCode>,
    pub match_status: MatchStatus,
    pub status: PaymentStatus,
    pub requires_review: bool,
    pub decision_log: Json<DecisionLog>,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// The obligation this record is linked to, if it has been classified.
    pub fn obligation(&self) -> Option<ObligationRef> {
        let family = self.classification.family()?;
        self.obligation_id.map(|id| ObligationRef::new(family, id))
    }

    /// The proposed or applied match, as stored on the record.
    pub fn payment_match(&self) -> Option<PaymentMatch> {
        let target = self.obligation()?;
        let reason = self.reason?;
        Some(PaymentMatch {
            target,
            confidence: self.confidence,
            reason,
            pawn_payment_type: self.pawn_payment_type,
        })
    }
}

/// What the record writer must do with a newly received payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing matched. Stored unclassified for manual review.
    Unmatched,
    /// Apply the payment to the matched obligation in the same transaction as the insert.
    Allocate(PaymentMatch),
    /// Store the proposal, but leave the ledgers alone until staff approve it.
    Review(PaymentMatch, ReviewReason),
}

/// A payment that is about to be recorded, together with its matching outcome.
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub tenant_id: String,
    pub customer_id: i64,
    pub reference: Option<String>,
    pub raw_reference: Option<String>,
    pub amount: Satang,
    pub bank: Option<String>,
    pub sender_name: Option<String>,
    pub receiver_name: Option<String>,
    pub slip_date: Option<String>,
    pub platform: String,
    pub external_user_id: String,
    pub channel_id: Option<i64>,
    pub disposition: Disposition,
    pub decision_log: DecisionLog,
    pub received_at: DateTime<Utc>,
}
