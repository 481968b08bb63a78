//! Idempotency guard
//!
//! A durable (key, route, user) -> result map checked and written inside the
//! same transaction as the guarded work. A replayed call returns the stored
//! result of the first successful execution instead of re-applying effects;
//! a failed execution records nothing, so the next retry starts from
//! scratch.

use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub use shared::validation::{validate_idempotency_key, MIN_IDEMPOTENCY_KEY_LEN};

/// Look up the stored result of a previous execution of this intent.
pub async fn fetch_recorded<T: DeserializeOwned>(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    route: &str,
    key: &str,
) -> AppResult<Option<T>> {
    let row: Option<(serde_json::Value,)> = sqlx::query_as(
        "SELECT response FROM idempotency_records WHERE idem_key = $1 AND route = $2 AND user_id = $3",
    )
    .bind(key)
    .bind(route)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some((value,)) => {
            let result = serde_json::from_value(value).map_err(|e| {
                AppError::Internal(format!("stored idempotency result is unreadable: {e}"))
            })?;
            Ok(Some(result))
        }
        None => Ok(None),
    }
}

/// Record the result of the first successful execution.
///
/// A unique-constraint collision here means a concurrent request carried the
/// same key; that transaction aborts as a conflict and the retry replays the
/// committed result.
pub async fn record<T: Serialize>(
    tx: &mut Transaction<'_, Postgres>,
    organization_id: Uuid,
    user_id: Uuid,
    route: &str,
    key: &str,
    result: &T,
) -> AppResult<()> {
    let response = serde_json::to_value(result)
        .map_err(|e| AppError::Internal(format!("failed to serialize result: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO idempotency_records (organization_id, user_id, route, idem_key, response)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(organization_id)
    .bind(user_id)
    .bind(route)
    .bind(key)
    .bind(response)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::from_insert_error(e, "idempotency key"))?;

    Ok(())
}
