use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db_types::{CustomerIdentity, NewCustomerIdentity},
    traits::ReconciliationError,
};

/// Returns the identity for (tenant, platform, external id), creating it first if necessary.
///
/// The conflict branch only touches `updated_at` (and fills in a missing display name) so that `RETURNING` yields the
/// existing row. Two concurrent calls for the same user cannot create two identities.
pub async fn upsert_identity(
    identity: &NewCustomerIdentity,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<CustomerIdentity, ReconciliationError> {
    let customer: CustomerIdentity = sqlx::query_as(
        r#"
            INSERT INTO customer_identities (tenant_id, platform, external_user_id, display_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (tenant_id, platform, external_user_id) DO UPDATE SET
                display_name = COALESCE(customer_identities.display_name, excluded.display_name),
                updated_at = excluded.updated_at
            RETURNING *;
        "#,
    )
    .bind(&identity.tenant_id)
    .bind(&identity.platform)
    .bind(&identity.external_user_id)
    .bind(&identity.display_name)
    .bind(now)
    .fetch_one(conn)
    .await?;
    trace!(
        "🧑️ {}/{}/{} resolved to customer #{}",
        identity.tenant_id,
        identity.platform,
        identity.external_user_id,
        customer.id
    );
    Ok(customer)
}

pub async fn fetch_identity(
    id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<CustomerIdentity>, ReconciliationError> {
    let customer = sqlx::query_as("SELECT * FROM customer_identities WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(customer)
}
