use serde::{Deserialize, Serialize};

use super::candidates::{CandidateMatch, FamilyCandidates};
use crate::{
    allocation::AllocationSummary,
    db_types::{ObligationFamily, ReviewReason, Satang},
};

/// The audit trail stored with every payment record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionLog {
    pub amount: Satang,
    pub reference: Option<String>,
    /// Every candidate proposed, grouped by family
    pub families: Vec<FamilyDecision>,
    pub selected: Option<CandidateMatch>,
    /// True when the selected candidate came from an amount-agnostic fallback
    pub heuristic: bool,
    pub review_reason: Option<ReviewReason>,
    pub allocation: Option<AllocationSummary>,
    /// Later events in the record's life: re-matching, staff approval, rejection.
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyDecision {
    pub family: ObligationFamily,
    pub candidates: Vec<CandidateMatch>,
}

impl DecisionLog {
    pub fn new(
        amount: Satang,
        reference: Option<String>,
        families: &[FamilyCandidates],
        selected: Option<&CandidateMatch>,
    ) -> Self {
        let families = families
            .iter()
            .map(|f| FamilyDecision { family: f.family, candidates: f.candidates.clone() })
            .collect();
        Self {
            amount,
            reference,
            families,
            selected: selected.cloned(),
            heuristic: selected.map(|c| c.is_heuristic()).unwrap_or(false),
            review_reason: None,
            allocation: None,
            notes: Vec::new(),
        }
    }

    pub fn with_review(mut self, reason: ReviewReason) -> Self {
        self.review_reason = Some(reason);
        self
    }

    pub fn with_allocation(mut self, summary: AllocationSummary) -> Self {
        self.allocation = Some(summary);
        self
    }

    pub fn note<S: Into<String>>(&mut self, note: S) {
        self.notes.push(note.into());
    }

    pub fn candidate_count(&self) -> usize {
        self.families.iter().map(|f| f.candidates.len()).sum()
    }
}
