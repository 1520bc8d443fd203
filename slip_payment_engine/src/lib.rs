//! Slip Payment Engine
//!
//! The slip payment engine reconciles bank-transfer slips against what a shop's customers owe. Customers pay by bank
//! transfer and send a photo of the slip through a chat channel or the web shop; a slip reader extracts the amount
//! and reference, and this engine works out whether the money pays an order, an installment contract or a pawn loan,
//! applies it to that obligation's ledger exactly once, and keeps an auditable record of why.
//!
//! The library is divided into these main sections:
//! 1. The public API ([`mod@recon_api`]). [`ReconciliationApi`] processes slips and drives staff review;
//!    [`ObligationsApi`] creates and queries obligations. Use these rather than the database directly.
//! 2. Matching ([`mod@matching`]) and allocation ([`mod@allocation`]). Pure logic: candidate strategies per obligation
//!    family, the arbiter that picks one, and the ledger arithmetic for each family.
//! 3. Database management ([`mod@traits`] and the SQLite backend). Backends implement [`ReconciliationDatabase`] and
//!    [`ObligationManagement`]. The data types stored in the database live in [`mod@db_types`].
//!
//! The engine also emits events ([`mod@events`]) after a payment is committed: a payment was recorded, an obligation
//! was satisfied, or a payment needs review. Hook handlers run asynchronously and their failures never affect the
//! payment itself.
pub mod allocation;
pub mod config;
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod matching;
pub mod recon_api;
#[cfg(feature = "sqlite")]
pub mod rematch_worker;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use config::{EngineConfig, MatchingRules, PawnTerms, ReconciliationPolicy};
pub use events::{EventHandlers, EventHooks, EventProducers};
pub use recon_api::{
    obligations_api::ObligationsApi,
    payment_objects::{ChannelContext, MatchResult, RematchSummary, SlipData},
    reconciliation_api::ReconciliationApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{ObligationManagement, ReconciliationDatabase, ReconciliationError};
