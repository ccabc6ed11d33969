use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;

/// Appends one moderation record. Call it after the moderated write has succeeded.
pub async fn record(
    db: &PgPool,
    actor_id: Uuid,
    action: &str,
    target_type: &str,
    target_id: Uuid,
    details: Value,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (actor_id, action, target_type, target_id, details)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(actor_id)
    .bind(action)
    .bind(target_type)
    .bind(target_id)
    .bind(details)
    .execute(db)
    .await?;
    Ok(())
}
