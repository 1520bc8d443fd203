use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{ObligationFamily, ObligationRef, PawnPaymentType, PaymentMatch, ReasonCode, Satang};

pub const CONFIDENCE_EXACT: u8 = 100;
pub const CONFIDENCE_EXACT_PERIOD: u8 = 90;
pub const CONFIDENCE_EXACT_PRINCIPAL: u8 = 90;
pub const CONFIDENCE_CLOSE_MAX: u8 = 70;
pub const CONFIDENCE_CLOSE_MIN: u8 = 50;
pub const CONFIDENCE_ACTIVE_LINK: u8 = 40;
pub const CONFIDENCE_ONLY_OPEN: u8 = 30;
pub const CONFIDENCE_MOST_RECENT: u8 = 20;

/// A proposal from one matching strategy that the payment settles a particular obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub target: ObligationRef,
    pub confidence: u8,
    pub reason: ReasonCode,
    pub pawn_payment_type: Option<PawnPaymentType>,
    /// The amount the strategy compared against, if it was amount based.
    pub expected_amount: Option<Satang>,
    pub obligation_created_at: DateTime<Utc>,
}

impl CandidateMatch {
    pub fn new(target: ObligationRef, confidence: u8, reason: ReasonCode, created_at: DateTime<Utc>) -> Self {
        Self {
            target,
            confidence: confidence.min(CONFIDENCE_EXACT),
            reason,
            pawn_payment_type: None,
            expected_amount: None,
            obligation_created_at: created_at,
        }
    }

    pub fn expecting(mut self, amount: Satang) -> Self {
        self.expected_amount = Some(amount);
        self
    }

    pub fn with_pawn_payment_type(mut self, payment_type: PawnPaymentType) -> Self {
        self.pawn_payment_type = Some(payment_type);
        self
    }

    pub fn family(&self) -> ObligationFamily {
        self.target.family
    }

    pub fn is_heuristic(&self) -> bool {
        self.reason.is_heuristic()
    }

    pub fn to_payment_match(&self) -> PaymentMatch {
        PaymentMatch {
            target: self.target,
            confidence: self.confidence,
            reason: self.reason,
            pawn_payment_type: self.pawn_payment_type,
        }
    }
}

/// All the candidates one family's strategies produced, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyCandidates {
    pub family: ObligationFamily,
    pub candidates: Vec<CandidateMatch>,
}

impl FamilyCandidates {
    pub fn new(family: ObligationFamily, mut candidates: Vec<CandidateMatch>) -> Self {
        candidates.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| b.obligation_created_at.cmp(&a.obligation_created_at))
                .then_with(|| b.target.id.cmp(&a.target.id))
        });
        Self { family, candidates }
    }

    pub fn best(&self) -> Option<&CandidateMatch> {
        self.candidates.first()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
