use std::cmp::Ordering;

use log::*;

use super::candidates::{CandidateMatch, FamilyCandidates};

/// Orders candidates best first: highest confidence, then family priority (order, installment, pawn), then the most
/// recently created obligation, then the highest id.
pub fn rank_candidates(a: &CandidateMatch, b: &CandidateMatch) -> Ordering {
    b.confidence
        .cmp(&a.confidence)
        .then_with(|| a.family().priority().cmp(&b.family().priority()))
        .then_with(|| b.obligation_created_at.cmp(&a.obligation_created_at))
        .then_with(|| b.target.id.cmp(&a.target.id))
}

/// Picks the single best candidate across all families. `None` means nothing matched, which is a valid outcome: the
/// payment is recorded as unclassified.
pub fn arbitrate(families: &[FamilyCandidates]) -> Option<CandidateMatch> {
    let winner = families.iter().flat_map(|f| f.candidates.iter()).min_by(|a, b| rank_candidates(a, b)).cloned();
    match &winner {
        Some(c) if c.is_heuristic() => {
            warn!("⚖️ {} selected by the {:?} heuristic with confidence {}", c.target, c.reason, c.confidence)
        },
        Some(c) => debug!("⚖️ {} selected ({:?}, confidence {})", c.target, c.reason, c.confidence),
        None => debug!("⚖️ No candidates in any family"),
    }
    winner
}

#[cfg(test)]
mod test {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::db_types::{ObligationFamily, ObligationRef, ReasonCode};

    fn candidate(target: ObligationRef, confidence: u8, age_days: i64) -> CandidateMatch {
        let created = Utc::now() - Duration::days(age_days);
        CandidateMatch::new(target, confidence, ReasonCode::CloseAmountWithinTolerance, created)
    }

    fn families(candidates: Vec<CandidateMatch>) -> Vec<FamilyCandidates> {
        ObligationFamily::ALL
            .iter()
            .map(|f| FamilyCandidates::new(*f, candidates.iter().filter(|c| c.family() == *f).cloned().collect()))
            .collect()
    }

    #[test]
    fn highest_confidence_wins() {
        let f = families(vec![
            candidate(ObligationRef::order(1), 60, 1),
            candidate(ObligationRef::pawn(2), 100, 9),
            candidate(ObligationRef::installment(3), 90, 1),
        ]);
        assert_eq!(arbitrate(&f).unwrap().target, ObligationRef::pawn(2));
    }

    #[test]
    fn ties_prefer_family_then_recency_then_id() {
        let f = families(vec![candidate(ObligationRef::pawn(2), 70, 1), candidate(ObligationRef::installment(3), 70, 1)]);
        assert_eq!(arbitrate(&f).unwrap().target, ObligationRef::installment(3));

        let f = families(vec![candidate(ObligationRef::order(1), 70, 3), candidate(ObligationRef::order(2), 70, 1)]);
        assert_eq!(arbitrate(&f).unwrap().target, ObligationRef::order(2));

        let created = Utc::now();
        let a = CandidateMatch::new(ObligationRef::order(4), 70, ReasonCode::ExactBalance, created);
        let b = CandidateMatch::new(ObligationRef::order(5), 70, ReasonCode::ExactBalance, created);
        let f = families(vec![a, b]);
        assert_eq!(arbitrate(&f).unwrap().target, ObligationRef::order(5));
    }

    #[test]
    fn nothing_to_choose() {
        assert!(arbitrate(&families(vec![])).is_none());
    }
}
