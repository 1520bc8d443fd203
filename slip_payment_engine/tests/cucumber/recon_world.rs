use std::collections::HashMap;

use chrono::{NaiveDate, TimeZone, Utc};
use cucumber::World;
use log::*;
use serde::de::DeserializeOwned;
use slip_payment_engine::{
    db_types::{CustomerIdentity, NewCustomerIdentity},
    ChannelContext,
    EventProducers,
    MatchResult,
    ObligationsApi,
    ReconciliationApi,
    ReconciliationDatabase,
    ReconciliationPolicy,
    SqliteDatabase,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tokio::time::sleep;

pub const TENANT: &str = "shop-1";
pub const PLATFORM: &str = "line";

#[derive(Default, Debug, World)]
pub struct ReconWorld {
    pub system: Option<ReconciliationSystem>,
}

#[derive(Debug)]
pub struct ReconciliationSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub api: ReconciliationApi<SqliteDatabase>,
    pub obligations: ObligationsApi<SqliteDatabase>,
    /// Obligation ids by the number used in the scenario (order number, contract number or ticket)
    pub ids: HashMap<String, i64>,
    pub last_result: Option<MatchResult>,
    pub allocated_on_rematch: usize,
}

impl ReconWorld {
    pub fn system(&mut self) -> &mut ReconciliationSystem {
        self.system.as_mut().expect("Reconciliation system not initialised")
    }

    pub fn api(&self) -> &ReconciliationApi<SqliteDatabase> {
        &self.system.as_ref().expect("Reconciliation system not initialised").api
    }

    pub fn obligations(&self) -> &ObligationsApi<SqliteDatabase> {
        &self.system.as_ref().expect("Reconciliation system not initialised").obligations
    }

    pub fn id_of(&self, number: &str) -> i64 {
        let system = self.system.as_ref().expect("Reconciliation system not initialised");
        *system.ids.get(number).unwrap_or_else(|| panic!("{number} was never created"))
    }

    pub fn last_result(&self) -> &MatchResult {
        let system = self.system.as_ref().expect("Reconciliation system not initialised");
        system.last_result.as_ref().expect("No slip has been processed yet")
    }

    pub async fn customer(&self, user: &str) -> CustomerIdentity {
        let identity = NewCustomerIdentity::new(TENANT, PLATFORM, user);
        self.api().db().resolve_customer_identity(&identity).await.expect("Error resolving customer")
    }
}

impl ReconciliationSystem {
    pub async fn new() -> Self {
        let url = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&url, 1).await.expect("Error creating connection to database");
        debug!("🚀️ Created database: {url}");
        sleep(std::time::Duration::from_millis(50)).await;
        let policy = ReconciliationPolicy::default();
        let obligations = ObligationsApi::new(db.clone(), policy.pawn_terms.clone());
        let api = ReconciliationApi::new(db.clone(), EventProducers::default(), policy);
        Self { db_path: url, db, api, obligations, ids: HashMap::new(), last_result: None, allocated_on_rematch: 0 }
    }
}

pub async fn prepare_test_env() -> String {
    let path = format!("sqlite://{}/spe_cucumber_{}.db", std::env::temp_dir().display(), rand::random::<u64>());
    Sqlite::create_database(&path).await.expect("Error creating database");
    let db = SqliteDatabase::new_with_url(&path, 1).await.expect("Error creating connection to database");
    db.migrate().await.expect("Error running DB migrations");
    path
}

pub fn context(user: &str) -> ChannelContext {
    ChannelContext::new(TENANT, PLATFORM, user)
}

pub fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_else(|e| panic!("{s} is not a date. {e}"))
}

pub fn received_on(s: &str) -> chrono::DateTime<Utc> {
    let naive = parse_date(s).and_hms_opt(10, 0, 0).expect("Invalid time");
    Utc.from_utc_datetime(&naive)
}

/// Reads a snake_case status name the way it is stored.
pub fn parse_status<T: DeserializeOwned>(s: &str) -> T {
    serde_json::from_value(serde_json::Value::String(s.to_string())).unwrap_or_else(|e| panic!("Unknown status {s}. {e}"))
}
