use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use super::payment_objects::{ChannelContext, MatchResult, RematchSummary, SlipData};
use crate::{
    config::ReconciliationPolicy,
    db_types::{
        CustomerIdentity,
        Disposition,
        MatchStatus,
        NewCustomerIdentity,
        NewPaymentRecord,
        ObligationRef,
        PawnPaymentType,
        PaymentMatch,
        PaymentRecord,
        PaymentStatus,
        ReviewReason,
        Satang,
    },
    events::{EventProducers, ObligationSatisfiedEvent, PaymentRecordedEvent, ReviewRequiredEvent},
    helpers::normalize_reference,
    matching::{arbitrate, find_candidates, DecisionLog, MatchContext},
    traits::{MatchApproval, RecordPaymentResult, RecordedPayment, ReconciliationDatabase, ReconciliationError},
};

/// Largest amount a single slip may carry. Anything above it is an OCR or input error.
pub const MAX_SLIP_AMOUNT: Satang = Satang::from_baht(1_000_000_000_000);

/// `ReconciliationApi` is the entry point for every inbound payment slip, and for the staff review flow that follows
/// when a payment cannot be applied automatically.
///
/// A slip goes through identity resolution, duplicate detection, candidate finding and arbitration here. The chosen
/// disposition is handed to the backend, which records the payment and applies it to the obligation's ledger in one
/// transaction. Events are published only after that transaction has committed.
pub struct ReconciliationApi<B> {
    db: B,
    producers: EventProducers,
    policy: ReconciliationPolicy,
}

impl<B> Debug for ReconciliationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi ({:?})", self.policy)
    }
}

impl<B> ReconciliationApi<B> {
    pub fn new(db: B, producers: EventProducers, policy: ReconciliationPolicy) -> Self {
        Self { db, producers, policy }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn policy(&self) -> &ReconciliationPolicy {
        &self.policy
    }
}

impl<B> ReconciliationApi<B>
where B: ReconciliationDatabase
{
    /// Reconciles a freshly received slip. See [`Self::process_payment_at`].
    pub async fn process_payment(
        &self,
        slip: SlipData,
        context: ChannelContext,
    ) -> Result<MatchResult, ReconciliationError> {
        self.process_payment_at(slip, context, Utc::now()).await
    }

    /// Reconciles a slip received at `received_at`.
    ///
    /// * A slip whose reference was already recorded inside the duplicate window returns a `duplicate` result that
    ///   points at the existing record. Nothing is written.
    /// * A slip that matches nothing is recorded `unclassified` with match status `no_match` and queued for review.
    /// * A slip without a reference is matched for the audit trail, but parked for review rather than allocated while
    ///   `review_unreferenced_payments` is set, since duplicate detection could not run for it.
    /// * Anything else is allocated to the arbiter's choice.
    pub async fn process_payment_at(
        &self,
        slip: SlipData,
        context: ChannelContext,
        received_at: DateTime<Utc>,
    ) -> Result<MatchResult, ReconciliationError> {
        if !slip.amount.is_positive() {
            return Err(ReconciliationError::InvalidPayment(format!("Slip amount must be positive. Got {}", slip.amount)));
        }
        if slip.amount > MAX_SLIP_AMOUNT {
            return Err(ReconciliationError::InvalidPayment(format!(
                "Slip amount {} is larger than the {MAX_SLIP_AMOUNT} a single transfer can carry",
                slip.amount
            )));
        }
        let customer = self.resolve_customer(&context).await?;
        let reference = normalize_reference(slip.reference.as_deref());
        if let Some(reference) = reference.as_deref() {
            let since = received_at - self.policy.duplicate_window;
            if let Some(existing) =
                self.db.find_recent_payment_by_reference(&context.tenant_id, reference, since).await?
            {
                info!("🔄️ Slip with reference {reference} duplicates payment #{}. Ignoring it.", existing.id);
                return Ok(MatchResult::duplicate_of(&existing));
            }
        }

        let open = self.db.fetch_open_obligations(customer.id).await?;
        let ctx = MatchContext::new(slip.amount, received_at.date_naive(), &self.policy.rules, &self.policy.pawn_terms);
        let families = find_candidates(&ctx, &open);
        let selected = arbitrate(&families);
        let log = DecisionLog::new(slip.amount, reference.clone(), &families, selected.as_ref());
        let (disposition, log) = self.dispose(selected.map(|c| c.to_payment_match()), reference.is_some(), log);
        trace!("🔄️ Slip of {} from customer #{} disposed as {disposition:?}", slip.amount, customer.id);

        let payment = NewPaymentRecord {
            tenant_id: context.tenant_id,
            customer_id: customer.id,
            reference,
            raw_reference: slip.reference,
            amount: slip.amount,
            bank: slip.bank,
            sender_name: slip.sender_name,
            receiver_name: slip.receiver_name,
            slip_date: slip.date,
            platform: customer.platform,
            external_user_id: customer.external_user_id,
            channel_id: context.channel_id,
            disposition,
            decision_log: log,
            received_at,
        };
        match self.db.record_payment(payment, &self.policy).await? {
            RecordPaymentResult::Duplicate(existing) => {
                info!("🔄️ Slip lost the race to payment #{}, which has the same reference.", existing.id);
                Ok(MatchResult::duplicate_of(&existing))
            },
            RecordPaymentResult::Recorded(recorded) => {
                let result = MatchResult::from_record(&recorded.record);
                debug!(
                    "🔄️ Payment #{} recorded as {:?} ({:?} {:?}, confidence {})",
                    result.payment_record_id,
                    result.match_status,
                    result.matched_type,
                    result.matched_id,
                    result.confidence
                );
                let review = match disposition {
                    Disposition::Allocate(_) => None,
                    Disposition::Unmatched => Some(ReviewReason::NoCandidate),
                    Disposition::Review(_, reason) => Some(reason),
                };
                self.notify(&recorded, review).await;
                Ok(result)
            },
        }
    }

    /// Re-runs matching for pending payments that matched nothing when they arrived, oldest first and one at a time.
    ///
    /// Obligations are often created after the customer has already sent the slip. A failure on one record is logged
    /// and counted, and the pass moves on to the next.
    pub async fn process_pending_payments(&self, limit: u32) -> Result<RematchSummary, ReconciliationError> {
        let pending = self.db.fetch_unclassified_payments(limit).await?;
        let mut summary = RematchSummary { examined: pending.len(), ..Default::default() };
        for record in pending {
            let id = record.id;
            match self.rematch(record).await {
                Ok(Some(MatchStatus::AutoMatched)) => summary.allocated += 1,
                Ok(Some(_)) => summary.sent_to_review += 1,
                Ok(None) => summary.still_unmatched += 1,
                Err(e) => {
                    warn!("🔄️ Re-matching payment #{id} failed. It stays in the queue. {e}");
                    summary.failed += 1;
                },
            }
        }
        if summary.examined > 0 {
            info!(
                "🔄️ Re-match pass: {} examined, {} allocated, {} sent to review, {} unmatched, {} failed",
                summary.examined, summary.allocated, summary.sent_to_review, summary.still_unmatched, summary.failed
            );
        }
        Ok(summary)
    }

    /// Staff accept the match proposed for a payment that is waiting for review. The payment is allocated and the
    /// record is marked `manually_matched`.
    pub async fn approve_payment(&self, payment_id: i64, actor: &str) -> Result<MatchResult, ReconciliationError> {
        let record = self.fetch_pending(payment_id).await?;
        if record.match_status != MatchStatus::PendingReview {
            return Err(ReconciliationError::IllegalStatusChange(format!(
                "Payment #{payment_id} has no proposed match to approve ({:?})",
                record.match_status
            )));
        }
        let payment_match = record.payment_match().ok_or_else(|| {
            ReconciliationError::IllegalStatusChange(format!("Payment #{payment_id} has no proposed match to approve"))
        })?;
        let mut log = record.decision_log.0;
        log.note(format!("Proposed match to {} approved by {actor}", payment_match.target));
        self.apply(payment_id, payment_match, MatchStatus::ManuallyMatched, Some(actor), log).await
    }

    /// Staff apply a pending payment to an obligation of their choosing. Pawn targets need a payment type.
    pub async fn assign_payment(
        &self,
        payment_id: i64,
        target: ObligationRef,
        pawn_payment_type: Option<PawnPaymentType>,
        actor: &str,
    ) -> Result<MatchResult, ReconciliationError> {
        let record = self.fetch_pending(payment_id).await?;
        let payment_match = PaymentMatch::manual(target, pawn_payment_type);
        let mut log = record.decision_log.0;
        log.note(format!("Assigned to {target} by {actor}"));
        self.apply(payment_id, payment_match, MatchStatus::ManuallyMatched, Some(actor), log).await
    }

    /// Staff reject a pending payment (a fake slip, a payment for another shop, ...). No ledger is touched.
    pub async fn reject_payment(
        &self,
        payment_id: i64,
        actor: &str,
        reason: &str,
    ) -> Result<PaymentRecord, ReconciliationError> {
        let record = self.db.reject_payment(payment_id, actor, reason).await?;
        info!("🔄️ Payment #{payment_id} rejected by {actor}. {reason}");
        Ok(record)
    }

    pub async fn fetch_payment(&self, payment_id: i64) -> Result<Option<PaymentRecord>, ReconciliationError> {
        self.db.fetch_payment_record(payment_id).await
    }

    pub async fn payments_for_review(&self, limit: u32) -> Result<Vec<PaymentRecord>, ReconciliationError> {
        self.db.fetch_payments_for_review(limit).await
    }

    async fn resolve_customer(&self, context: &ChannelContext) -> Result<CustomerIdentity, ReconciliationError> {
        let identity =
            NewCustomerIdentity::new(context.tenant_id.as_str(), &context.platform, context.external_user_id.as_str())
                .with_display_name(context.display_name.clone());
        if identity.platform.is_empty() || identity.external_user_id.trim().is_empty() {
            return Err(ReconciliationError::InvalidPayment("A platform and an external user id are required".into()));
        }
        self.db.resolve_customer_identity(&identity).await
    }

    /// Decides what the record writer does with a match.
    fn dispose(
        &self,
        selected: Option<PaymentMatch>,
        has_reference: bool,
        log: DecisionLog,
    ) -> (Disposition, DecisionLog) {
        match selected {
            None => (Disposition::Unmatched, log.with_review(ReviewReason::NoCandidate)),
            Some(m) if !has_reference && self.policy.review_unreferenced_payments => {
                info!("🔄️ Slip has no reference, so it could be a duplicate. Holding the match to {} for review.", m.target);
                (Disposition::Review(m, ReviewReason::MissingReference), log.with_review(ReviewReason::MissingReference))
            },
            Some(m) => (Disposition::Allocate(m), log),
        }
    }

    /// Returns the new match status, or `None` if the record still matches nothing.
    async fn rematch(&self, record: PaymentRecord) -> Result<Option<MatchStatus>, ReconciliationError> {
        let open = self.db.fetch_open_obligations(record.customer_id).await?;
        let ctx =
            MatchContext::new(record.amount, Utc::now().date_naive(), &self.policy.rules, &self.policy.pawn_terms);
        let families = find_candidates(&ctx, &open);
        let Some(selected) = arbitrate(&families) else {
            trace!("🔄️ Payment #{} still matches nothing", record.id);
            return Ok(None);
        };
        let mut log = DecisionLog::new(record.amount, record.reference.clone(), &families, Some(&selected));
        log.notes = record.decision_log.0.notes.clone();
        log.note(format!("Re-matched to {} after the payment was first recorded", selected.target));
        match self.dispose(Some(selected.to_payment_match()), record.reference.is_some(), log) {
            (Disposition::Allocate(payment_match), log) => {
                self.apply(record.id, payment_match, MatchStatus::AutoMatched, None, log).await?;
                Ok(Some(MatchStatus::AutoMatched))
            },
            (Disposition::Review(proposal, reason), log) => {
                let updated = self.db.propose_match(record.id, proposal, reason, log).await?;
                self.producers.publish_review_required(ReviewRequiredEvent::new(&updated, reason)).await;
                Ok(Some(MatchStatus::PendingReview))
            },
            (Disposition::Unmatched, _) => Ok(None),
        }
    }

    async fn apply(
        &self,
        payment_id: i64,
        payment_match: PaymentMatch,
        match_status: MatchStatus,
        actor: Option<&str>,
        decision_log: DecisionLog,
    ) -> Result<MatchResult, ReconciliationError> {
        let approval = MatchApproval {
            payment_id,
            payment_match,
            match_status,
            actor: actor.map(String::from),
            decision_log,
        };
        let recorded = self.db.apply_match(approval, &self.policy).await?;
        debug!("🔄️ Payment #{payment_id} applied to {} ({match_status:?})", payment_match.target);
        self.notify(&recorded, None).await;
        Ok(MatchResult::from_record(&recorded.record))
    }

    async fn fetch_pending(&self, payment_id: i64) -> Result<PaymentRecord, ReconciliationError> {
        let record =
            self.db.fetch_payment_record(payment_id).await?.ok_or(ReconciliationError::PaymentRecordNotFound(payment_id))?;
        if record.status != PaymentStatus::Pending {
            return Err(ReconciliationError::IllegalStatusChange(format!(
                "Payment #{payment_id} is {} and can no longer be changed",
                record.status
            )));
        }
        Ok(record)
    }

    async fn notify(&self, recorded: &RecordedPayment, review: Option<ReviewReason>) {
        let summary = recorded.allocation.as_ref().map(|a| a.summary());
        self.producers.publish_payment_recorded(PaymentRecordedEvent::new(recorded.record.clone(), summary)).await;
        if let Some(obligation) = recorded.satisfied_obligation() {
            self.producers.publish_obligation_satisfied(ObligationSatisfiedEvent::new(obligation, &recorded.record)).await;
        }
        if let Some(reason) = review {
            self.producers.publish_review_required(ReviewRequiredEvent::new(&recorded.record, reason)).await;
        }
    }
}
