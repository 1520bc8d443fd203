use chrono::{NaiveDate, TimeZone, Utc};
use log::*;
use slip_payment_engine::{
    db_types::{CustomerIdentity, NewCustomerIdentity},
    ChannelContext,
    ReconciliationDatabase,
    SqliteDatabase,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};

pub const TENANT: &str = "shop-1";
pub const PLATFORM: &str = "line";

pub async fn prepare_test_env(url: &str) {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    debug!("🚀️ Logging initialised");
    create_database(url).await;
    run_migrations(url).await;
}

/// A throw-away SQLite file in the system temp directory.
pub fn random_db_path() -> String {
    let dir = std::env::temp_dir();
    format!("sqlite://{}/spe_test_{}.db", dir.display(), rand::random::<u64>())
}

pub async fn run_migrations(url: &str) {
    let db = SqliteDatabase::new_with_url(url, 1).await.expect("Error creating connection to database");
    db.migrate().await.expect("Error running DB migrations");
    info!("🚀️ Migrations complete");
}

pub async fn create_database(url: &str) {
    if Sqlite::database_exists(url).await.unwrap_or(false) {
        if let Err(e) = Sqlite::drop_database(url).await {
            warn!("🚀️ Error dropping database {url}: {e:?}");
        }
    }
    Sqlite::create_database(url).await.expect("Error creating database");
    info!("🚀️ Created Sqlite database {url}");
}

/// A fresh, migrated database.
pub async fn new_database() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

pub async fn tear_down(mut db: SqliteDatabase) {
    let url = db.url().to_string();
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    if let Err(e) = Sqlite::drop_database(&url).await {
        warn!("🚀️ Failed to remove database {url}: {e}");
    }
}

pub fn context(user: &str) -> ChannelContext {
    ChannelContext::new(TENANT, PLATFORM, user)
}

pub async fn customer(db: &SqliteDatabase, user: &str) -> CustomerIdentity {
    let identity = NewCustomerIdentity::new(TENANT, PLATFORM, user);
    db.resolve_customer_identity(&identity).await.expect("Error resolving customer")
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
}
