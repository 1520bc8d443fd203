//! # Matching
//!
//! Turns a payment amount and a customer's open obligations into a single, explained decision:
//!
//! 1. [`find_candidates`] runs every family's strategies and collects scored [`CandidateMatch`]es.
//! 2. [`arbitrate`] picks the best candidate across families, deterministically.
//! 3. The whole process is captured in a [`DecisionLog`] that is stored with the payment.
mod arbiter;
mod candidates;
mod decision_log;
mod finder;

pub use arbiter::{arbitrate, rank_candidates};
pub use candidates::*;
pub use decision_log::{DecisionLog, FamilyDecision};
pub use finder::{find_candidates, MatchContext};
