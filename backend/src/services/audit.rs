//! Audit log sink
//!
//! One entry per meaningful mutation, written inside the same transaction
//! as the mutation itself so history never diverges from state.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppResult;

#[allow(clippy::too_many_arguments)]
pub async fn record(
    tx: &mut Transaction<'_, Postgres>,
    organization_id: Uuid,
    actor_id: Uuid,
    action: &str,
    entity: &str,
    entity_id: Uuid,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
    request_id: Option<&str>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_logs (
            organization_id, actor_id, action, entity, entity_id,
            before, after, request_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(organization_id)
    .bind(actor_id)
    .bind(action)
    .bind(entity)
    .bind(entity_id)
    .bind(before)
    .bind(after)
    .bind(request_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
