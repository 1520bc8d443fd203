//! Candidate finder.
//!
//! Each obligation family has an ordered list of independent strategies. Every strategy runs (there is no early exit
//! inside a family) and every proposal is kept, so the decision log shows the full picture.
use chrono::{DateTime, NaiveDate, Utc};
use log::*;

use super::candidates::*;
use crate::{
    allocation::redemption_quote,
    config::{MatchingRules, PawnTerms},
    db_types::{
        InstallmentSchedule,
        ObligationFamily,
        ObligationRef,
        OpenObligations,
        Order,
        PawnLoan,
        PawnPaymentType,
        ReasonCode,
        Satang,
    },
};

/// Everything a strategy needs to know about the payment being matched.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub amount: Satang,
    pub today: NaiveDate,
    pub rules: &'a MatchingRules,
    pub pawn_terms: &'a PawnTerms,
}

impl<'a> MatchContext<'a> {
    pub fn new(amount: Satang, today: NaiveDate, rules: &'a MatchingRules, pawn_terms: &'a PawnTerms) -> Self {
        Self { amount, today, rules, pawn_terms }
    }

    pub fn tolerance(&self) -> Satang {
        self.rules.tolerance_for(self.amount)
    }

    /// Confidence for a near miss: 70 when the difference is negligible, falling linearly to 50 at the tolerance
    /// bound. `None` for exact matches (handled by the exact strategies) and anything outside the tolerance.
    pub fn close_confidence(&self, expected: Satang) -> Option<u8> {
        let diff = self.amount.abs_diff(expected).value();
        let tolerance = self.tolerance().value();
        if diff == 0 || tolerance <= 0 || diff > tolerance {
            return None;
        }
        let (diff, tolerance) = (i128::from(diff), i128::from(tolerance));
        let span = i128::from(CONFIDENCE_CLOSE_MAX - CONFIDENCE_CLOSE_MIN);
        let penalty = (2 * span * diff + tolerance) / (2 * tolerance);
        let confidence = (i128::from(CONFIDENCE_CLOSE_MAX) - penalty).clamp(
            i128::from(CONFIDENCE_CLOSE_MIN),
            i128::from(CONFIDENCE_CLOSE_MAX),
        );
        u8::try_from(confidence).ok()
    }
}

type Strategy<T> = fn(&MatchContext<'_>, &[T]) -> Vec<CandidateMatch>;

const ORDER_STRATEGIES: [Strategy<Order>; 3] = [order_exact_balance, order_close_amount, sole_open_obligation];

const INSTALLMENT_STRATEGIES: [Strategy<InstallmentSchedule>; 5] = [
    installment_exact_balance,
    installment_exact_period_amount,
    installment_close_amount,
    installment_active_contract_link,
    sole_open_obligation,
];

const PAWN_STRATEGIES: [Strategy<PawnLoan>; 5] =
    [pawn_exact_interest, pawn_exact_redemption_total, pawn_exact_principal, pawn_close_amount, sole_open_obligation];

/// Runs every family's strategies against the customer's open obligations.
///
/// The result always has one entry per family, in family priority order, each sorted best first.
pub fn find_candidates(ctx: &MatchContext<'_>, open: &OpenObligations) -> Vec<FamilyCandidates> {
    let orders = open.orders.iter().filter(|o| o.is_open()).cloned().collect::<Vec<_>>();
    let installments = open.installments.iter().filter(|s| s.contract.is_open()).cloned().collect::<Vec<_>>();
    let pawns = open.pawns.iter().filter(|p| p.is_open()).cloned().collect::<Vec<_>>();
    let result = vec![
        FamilyCandidates::new(ObligationFamily::Order, run(ctx, &orders, &ORDER_STRATEGIES)),
        FamilyCandidates::new(ObligationFamily::Installment, run(ctx, &installments, &INSTALLMENT_STRATEGIES)),
        FamilyCandidates::new(ObligationFamily::Pawn, run(ctx, &pawns, &PAWN_STRATEGIES)),
    ];
    for family in &result {
        trace!("🔍️ {} {} candidates for {}", family.candidates.len(), family.family, ctx.amount);
    }
    result
}

fn run<T>(ctx: &MatchContext<'_>, items: &[T], strategies: &[Strategy<T>]) -> Vec<CandidateMatch> {
    if items.is_empty() {
        return Vec::new();
    }
    strategies.iter().flat_map(|strategy| strategy(ctx, items)).collect()
}

//--------------------------------------  Sole-open fallback  ---------------------------------------------------------
/// The parts of an open obligation the amount-agnostic fallback needs.
trait OpenObligation {
    fn obligation_ref(&self) -> ObligationRef;
    fn created_at(&self) -> DateTime<Utc>;
    fn fallback_payment_type(&self) -> Option<PawnPaymentType> {
        None
    }
}

impl OpenObligation for Order {
    fn obligation_ref(&self) -> ObligationRef {
        ObligationRef::order(self.id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl OpenObligation for InstallmentSchedule {
    fn obligation_ref(&self) -> ObligationRef {
        ObligationRef::installment(self.contract.id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.contract.created_at
    }
}

impl OpenObligation for PawnLoan {
    fn obligation_ref(&self) -> ObligationRef {
        ObligationRef::pawn(self.id)
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn fallback_payment_type(&self) -> Option<PawnPaymentType> {
        Some(PawnPaymentType::Partial)
    }
}

/// One open obligation in the family: propose it. Several: propose the most recently created one, with less
/// confidence. Neither looks at the amount.
fn sole_open_obligation<T: OpenObligation>(_ctx: &MatchContext<'_>, items: &[T]) -> Vec<CandidateMatch> {
    let (chosen, confidence, reason) = match items {
        [] => return Vec::new(),
        [only] => (only, CONFIDENCE_ONLY_OPEN, ReasonCode::OnlyOpenObligation),
        many => {
            let newest = many.iter().max_by(|a, b| {
                a.created_at().cmp(&b.created_at()).then_with(|| a.obligation_ref().id.cmp(&b.obligation_ref().id))
            });
            match newest {
                Some(newest) => (newest, CONFIDENCE_MOST_RECENT, ReasonCode::MostRecentOpenObligation),
                None => return Vec::new(),
            }
        },
    };
    let mut candidate = CandidateMatch::new(chosen.obligation_ref(), confidence, reason, chosen.created_at());
    if let Some(payment_type) = chosen.fallback_payment_type() {
        candidate = candidate.with_pawn_payment_type(payment_type);
    }
    vec![candidate]
}

//--------------------------------------        Orders         ---------------------------------------------------------
fn order_exact_balance(ctx: &MatchContext<'_>, orders: &[Order]) -> Vec<CandidateMatch> {
    orders
        .iter()
        .filter(|o| o.remaining().is_positive() && o.remaining() == ctx.amount)
        .map(|o| {
            CandidateMatch::new(ObligationRef::order(o.id), CONFIDENCE_EXACT, ReasonCode::ExactBalance, o.created_at)
                .expecting(o.remaining())
        })
        .collect()
}

fn order_close_amount(ctx: &MatchContext<'_>, orders: &[Order]) -> Vec<CandidateMatch> {
    orders
        .iter()
        .filter(|o| o.remaining().is_positive())
        .filter_map(|o| {
            let confidence = ctx.close_confidence(o.remaining())?;
            let reason = ReasonCode::CloseAmountWithinTolerance;
            Some(CandidateMatch::new(ObligationRef::order(o.id), confidence, reason, o.created_at).expecting(o.remaining()))
        })
        .collect()
}

//--------------------------------------     Installments     ---------------------------------------------------------
fn installment_exact_balance(ctx: &MatchContext<'_>, schedules: &[InstallmentSchedule]) -> Vec<CandidateMatch> {
    schedules
        .iter()
        .filter(|s| s.contract.remaining().is_positive() && s.contract.remaining() == ctx.amount)
        .map(|s| {
            let target = ObligationRef::installment(s.contract.id);
            CandidateMatch::new(target, CONFIDENCE_EXACT, ReasonCode::ExactBalance, s.contract.created_at)
                .expecting(s.contract.remaining())
        })
        .collect()
}

/// The amounts an installment payer would plausibly transfer: the regular period amount, and whatever is still due
/// on the next open period.
fn period_amounts(schedule: &InstallmentSchedule) -> Vec<Satang> {
    let mut amounts = vec![schedule.contract.period_amount];
    if let Some(next) = schedule.next_open_period() {
        amounts.push(next.outstanding());
    }
    amounts.retain(|a| a.is_positive());
    amounts
}

fn installment_exact_period_amount(ctx: &MatchContext<'_>, schedules: &[InstallmentSchedule]) -> Vec<CandidateMatch> {
    schedules
        .iter()
        .filter(|s| s.contract.remaining() != ctx.amount)
        .filter(|s| period_amounts(s).contains(&ctx.amount))
        .map(|s| {
            let target = ObligationRef::installment(s.contract.id);
            CandidateMatch::new(target, CONFIDENCE_EXACT_PERIOD, ReasonCode::ExactPeriodAmount, s.contract.created_at)
                .expecting(ctx.amount)
        })
        .collect()
}

fn installment_close_amount(ctx: &MatchContext<'_>, schedules: &[InstallmentSchedule]) -> Vec<CandidateMatch> {
    schedules
        .iter()
        .filter_map(|s| {
            let mut targets = period_amounts(s);
            if s.contract.remaining().is_positive() {
                targets.push(s.contract.remaining());
            }
            if targets.contains(&ctx.amount) {
                return None;
            }
            let nearest = targets.into_iter().min_by_key(|t| t.abs_diff(ctx.amount))?;
            let confidence = ctx.close_confidence(nearest)?;
            let target = ObligationRef::installment(s.contract.id);
            let reason = ReasonCode::CloseAmountWithinTolerance;
            Some(CandidateMatch::new(target, confidence, reason, s.contract.created_at).expecting(nearest))
        })
        .collect()
}

/// With exactly one active contract, irregular amounts are still credited to it.
fn installment_active_contract_link(_ctx: &MatchContext<'_>, schedules: &[InstallmentSchedule]) -> Vec<CandidateMatch> {
    match schedules {
        [only] => {
            let target = ObligationRef::installment(only.contract.id);
            let reason = ReasonCode::ActiveContractLink;
            vec![CandidateMatch::new(target, CONFIDENCE_ACTIVE_LINK, reason, only.contract.created_at)]
        },
        _ => Vec::new(),
    }
}

//--------------------------------------      Pawn loans       ---------------------------------------------------------
fn pawn_candidate(
    loan: &PawnLoan,
    confidence: u8,
    reason: ReasonCode,
    payment_type: PawnPaymentType,
    expected: Satang,
) -> CandidateMatch {
    CandidateMatch::new(ObligationRef::pawn(loan.id), confidence, reason, loan.created_at)
        .with_pawn_payment_type(payment_type)
        .expecting(expected)
}

fn pawn_exact_interest(ctx: &MatchContext<'_>, loans: &[PawnLoan]) -> Vec<CandidateMatch> {
    loans
        .iter()
        .filter_map(|loan| {
            let quote = redemption_quote(loan, ctx.today, ctx.pawn_terms);
            let interest = quote.outstanding_interest;
            (interest.is_positive() && interest == ctx.amount).then(|| {
                pawn_candidate(loan, CONFIDENCE_EXACT, ReasonCode::ExactInterestDue, PawnPaymentType::Interest, interest)
            })
        })
        .collect()
}

fn pawn_exact_redemption_total(ctx: &MatchContext<'_>, loans: &[PawnLoan]) -> Vec<CandidateMatch> {
    loans
        .iter()
        .filter_map(|loan| {
            let total = redemption_quote(loan, ctx.today, ctx.pawn_terms).total;
            (total == ctx.amount).then(|| {
                let reason = ReasonCode::ExactRedemptionTotal;
                pawn_candidate(loan, CONFIDENCE_EXACT, reason, PawnPaymentType::FullRedemption, total)
            })
        })
        .collect()
}

fn pawn_exact_principal(ctx: &MatchContext<'_>, loans: &[PawnLoan]) -> Vec<CandidateMatch> {
    loans
        .iter()
        .filter(|loan| loan.outstanding_principal() == ctx.amount)
        .map(|loan| {
            let principal = loan.outstanding_principal();
            let reason = ReasonCode::ExactPrincipal;
            pawn_candidate(loan, CONFIDENCE_EXACT_PRINCIPAL, reason, PawnPaymentType::Redemption, principal)
        })
        .collect()
}

fn pawn_close_amount(ctx: &MatchContext<'_>, loans: &[PawnLoan]) -> Vec<CandidateMatch> {
    loans
        .iter()
        .filter_map(|loan| {
            let quote = redemption_quote(loan, ctx.today, ctx.pawn_terms);
            let exact = [quote.outstanding_interest, quote.total, quote.outstanding_principal];
            if exact.contains(&ctx.amount) {
                return None;
            }
            let near_interest = quote.outstanding_interest.abs_diff(ctx.amount) <= quote.total.abs_diff(ctx.amount);
            let (expected, payment_type) = if near_interest {
                let t = if ctx.amount >= quote.outstanding_interest {
                    PawnPaymentType::Interest
                } else {
                    PawnPaymentType::Partial
                };
                (quote.outstanding_interest, t)
            } else {
                let t = if ctx.amount >= quote.total { PawnPaymentType::Redemption } else { PawnPaymentType::Partial };
                (quote.total, t)
            };
            let confidence = ctx.close_confidence(expected)?;
            Some(pawn_candidate(loan, confidence, ReasonCode::CloseAmountWithinTolerance, payment_type, expected))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;
    use crate::db_types::{
        ContractStatus,
        InstallmentContract,
        InstallmentPeriod,
        OrderPaymentStatus,
        OrderStatus,
        PawnStatus,
        PeriodStatus,
    };

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 1).unwrap()
    }

    fn order(id: i64, total: i64, age_days: i64) -> Order {
        let created = Utc::now() - Duration::days(age_days);
        Order {
            id,
            order_number: format!("SO-{id}"),
            customer_id: 1,
            total_amount: Satang::from_baht(total),
            paid_amount: Satang::ZERO,
            payment_status: OrderPaymentStatus::Pending,
            status: OrderStatus::AwaitingPayment,
            created_at: created,
            updated_at: created,
        }
    }

    fn contract(id: i64, period: i64, count: i64) -> InstallmentSchedule {
        let now = Utc::now();
        let contract = InstallmentContract {
            id,
            contract_number: format!("IC-{id}"),
            customer_id: 1,
            order_id: None,
            financed_amount: Satang::from_baht(period * count),
            period_amount: Satang::from_baht(period),
            period_count: count,
            total_paid: Satang::ZERO,
            overpaid_amount: Satang::ZERO,
            status: ContractStatus::Active,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let periods = (1..=count)
            .map(|seq| InstallmentPeriod {
                id: id * 100 + seq,
                contract_id: id,
                sequence: seq,
                due_date: today() + Duration::days(30 * seq),
                amount_due: Satang::from_baht(period),
                paid_amount: Satang::ZERO,
                status: PeriodStatus::Pending,
                paid_at: None,
            })
            .collect();
        InstallmentSchedule { contract, periods }
    }

    fn pawn(id: i64, principal: i64) -> PawnLoan {
        let now = Utc::now();
        PawnLoan {
            id,
            ticket_number: format!("P-{id}"),
            customer_id: 1,
            item_description: String::default(),
            principal: Satang::from_baht(principal),
            monthly_rate_bps: 200,
            principal_paid: Satang::ZERO,
            interest_paid: Satang::ZERO,
            overpaid_amount: Satang::ZERO,
            due_date: today() + Duration::days(10),
            extension_count: 0,
            status: PawnStatus::Active,
            created_at: now,
            updated_at: now,
            redeemed_at: None,
        }
    }

    fn candidates_for(amount: i64, open: &OpenObligations) -> Vec<FamilyCandidates> {
        let rules = MatchingRules::default();
        let terms = PawnTerms::default();
        let ctx = MatchContext::new(Satang::from_baht(amount), today(), &rules, &terms);
        find_candidates(&ctx, open)
    }

    #[test]
    fn close_confidence_is_linear() {
        let rules = MatchingRules::default();
        let terms = PawnTerms::default();
        // tolerance = max(5% of 1000, 20) = 50 baht
        let ctx = MatchContext::new(Satang::from_baht(1000), today(), &rules, &terms);
        assert_eq!(ctx.close_confidence(Satang::from_baht(1000)), None);
        assert_eq!(ctx.close_confidence(Satang::from(100_001)), Some(70));
        assert_eq!(ctx.close_confidence(Satang::from_baht(1025)), Some(60));
        assert_eq!(ctx.close_confidence(Satang::from_baht(950)), Some(50));
        assert_eq!(ctx.close_confidence(Satang::from_baht(1051)), None);
    }

    #[test]
    fn exact_order_balance() {
        let open = OpenObligations { orders: vec![order(1, 1500, 1)], ..Default::default() };
        let found = candidates_for(1500, &open);
        let best = found[0].best().unwrap();
        assert_eq!(best.confidence, 100);
        assert_eq!(best.reason, ReasonCode::ExactBalance);
        // The sole-open fallback still ran
        assert_eq!(found[0].candidates.len(), 2);
        assert_eq!(found[0].candidates[1].reason, ReasonCode::OnlyOpenObligation);
        assert!(found[1].is_empty() && found[2].is_empty());
    }

    #[test]
    fn several_orders_fall_back_to_most_recent() {
        let open =
            OpenObligations { orders: vec![order(1, 900, 5), order(2, 400, 1), order(3, 700, 3)], ..Default::default() };
        let found = candidates_for(123, &open);
        assert_eq!(found[0].candidates.len(), 1);
        let best = found[0].best().unwrap();
        assert_eq!(best.target, ObligationRef::order(2));
        assert_eq!(best.confidence, CONFIDENCE_MOST_RECENT);
        assert!(best.is_heuristic());
    }

    #[test]
    fn installment_period_amount_and_link() {
        let open = OpenObligations { installments: vec![contract(4, 1000, 3)], ..Default::default() };
        let found = candidates_for(1000, &open);
        let reasons = found[1].candidates.iter().map(|c| (c.reason, c.confidence)).collect::<Vec<_>>();
        assert_eq!(reasons, vec![
            (ReasonCode::ExactPeriodAmount, 90),
            (ReasonCode::ActiveContractLink, 40),
            (ReasonCode::OnlyOpenObligation, 30),
        ]);
        // Paying off the whole contract is an exact balance match, and suppresses the period-amount match
        let found = candidates_for(3000, &open);
        assert_eq!(found[1].best().unwrap().reason, ReasonCode::ExactBalance);
        assert!(found[1].candidates.iter().all(|c| c.reason != ReasonCode::ExactPeriodAmount));
    }

    #[test]
    fn pawn_tiers() {
        let open = OpenObligations { pawns: vec![pawn(9, 10_000)], ..Default::default() };
        let interest = candidates_for(200, &open);
        let best = interest[2].best().unwrap();
        assert_eq!((best.confidence, best.pawn_payment_type), (100, Some(PawnPaymentType::Interest)));

        let full = candidates_for(10_200, &open);
        let best = full[2].best().unwrap();
        assert_eq!(best.reason, ReasonCode::ExactRedemptionTotal);
        assert_eq!(best.pawn_payment_type, Some(PawnPaymentType::FullRedemption));

        let principal = candidates_for(10_000, &open);
        let best = principal[2].best().unwrap();
        assert_eq!((best.confidence, best.pawn_payment_type), (90, Some(PawnPaymentType::Redemption)));

        let fallback = candidates_for(3_000, &open);
        let best = fallback[2].best().unwrap();
        assert_eq!(best.reason, ReasonCode::OnlyOpenObligation);
        assert_eq!(best.pawn_payment_type, Some(PawnPaymentType::Partial));
    }

    #[test]
    fn no_obligations_no_candidates() {
        let found = candidates_for(1500, &OpenObligations::default());
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|f| f.is_empty()));
    }
}
