//! # Reconciliation engine public API
//!
//! The `recon_api` module exposes the programmatic API of the engine. It is split in two so that callers can pick the
//! part they need:
//!
//! * [`reconciliation_api`] takes inbound slips through matching and allocation, and drives the staff review flow
//!   (approve, assign, reject) and the batch re-match of unclassified payments.
//! * [`obligations_api`] creates orders, installment contracts and pawn loans, and answers questions about them.
//!
//! # API usage
//!
//! An API instance is created by supplying a database backend that implements the backend traits the API needs.
//!
//! ```rust,ignore
//! use slip_payment_engine::{EngineConfig, EventProducers, ReconciliationApi, SlipData, ChannelContext, SqliteDatabase};
//! let config = EngineConfig::from_env_or_default();
//! let db = SqliteDatabase::new_with_url(&config.database_url, config.max_connections).await?;
//! let api = ReconciliationApi::new(db, EventProducers::default(), config.policy);
//! let slip = SlipData::new("1500.00".parse()?).with_reference("0123456789");
//! let result = api.process_payment(slip, ChannelContext::new("shop-1", "line", "U1234")).await?;
//! ```
pub mod obligations_api;
pub mod payment_objects;
pub mod reconciliation_api;
