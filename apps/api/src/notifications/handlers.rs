use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::notification::NotificationRow;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
}

/// GET /api/v1/notifications
pub async fn handle_list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<NotificationQuery>,
) -> Result<Json<Vec<NotificationRow>>, AppError> {
    let rows: Vec<NotificationRow> = sqlx::query_as(
        r#"
        SELECT * FROM notifications
        WHERE user_id = $1 AND ($2 = false OR read = false)
        ORDER BY created_at DESC
        LIMIT 100
        "#,
    )
    .bind(user.id)
    .bind(params.unread_only)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

/// PATCH /api/v1/notifications/:id/read
pub async fn handle_mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationRow>, AppError> {
    let row: Option<NotificationRow> = sqlx::query_as(
        "UPDATE notifications SET read = true WHERE id = $1 AND user_id = $2 RETURNING *",
    )
    .bind(id)
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?;

    row.map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Notification {id} not found")))
}
