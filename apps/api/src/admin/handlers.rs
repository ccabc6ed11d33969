use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::admin::audit;
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::audit::AuditLogRow;
use crate::models::opportunity::OpportunityRow;
use crate::models::user::{AccountStatus, PublicUser, Role};
use crate::notifications::Notice;
use crate::state::AppState;

const DEFAULT_AUDIT_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub status: Option<AccountStatus>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

/// GET /api/v1/admin/users
pub async fn handle_list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<UsersQuery>,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    user.require(Role::Admin)?;
    let rows: Vec<PublicUser> = sqlx::query_as(
        r#"
        SELECT id, email, name, role, status, created_at FROM users
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::text IS NULL OR role = $2)
        ORDER BY created_at DESC
        "#,
    )
    .bind(query.status.map(|s| s.as_str()))
    .bind(query.role.map(|r| r.as_str()))
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

async fn set_account_status(
    state: &AppState,
    admin: AuthUser,
    user_id: Uuid,
    status: AccountStatus,
) -> Result<PublicUser, AppError> {
    admin.require(Role::Admin)?;
    if admin.id == user_id {
        return Err(AppError::Validation(
            "Administrators cannot change their own status".to_string(),
        ));
    }

    let updated: Option<PublicUser> = sqlx::query_as(
        r#"
        UPDATE users SET status = $2
        WHERE id = $1 AND role <> 'admin'
        RETURNING id, email, name, role, status, created_at
        "#,
    )
    .bind(user_id)
    .bind(status.as_str())
    .fetch_optional(&state.db)
    .await?;
    let target = updated.ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;

    let action = match status {
        AccountStatus::Approved => "user.approve",
        AccountStatus::Rejected => "user.reject",
        AccountStatus::Pending => "user.reset",
    };
    audit::record(
        &state.db,
        admin.id,
        action,
        "user",
        user_id,
        json!({ "email": target.email, "role": target.role }),
    )
    .await?;
    info!(admin_id = %admin.id, user_id = %user_id, action, "Account moderated");

    let notice = match status {
        AccountStatus::Approved => Notice::new(
            "account_approved",
            "Your account has been approved",
            "You can now sign in.",
        ),
        _ => Notice::new(
            "account_rejected",
            "Your account was not approved",
            "Contact the placement office if you believe this is a mistake.",
        ),
    };
    state
        .notifier
        .notify_or_log(user_id, notice.with_email())
        .await;

    Ok(target)
}

/// POST /api/v1/admin/users/:id/approve
pub async fn handle_approve_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(
        set_account_status(&state, user, user_id, AccountStatus::Approved).await?,
    ))
}

/// POST /api/v1/admin/users/:id/reject
pub async fn handle_reject_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(
        set_account_status(&state, user, user_id, AccountStatus::Rejected).await?,
    ))
}

/// DELETE /api/v1/admin/opportunities/:id
/// Deactivates the posting; applications stay readable.
pub async fn handle_deactivate_opportunity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(opportunity_id): Path<Uuid>,
) -> Result<Json<OpportunityRow>, AppError> {
    user.require(Role::Admin)?;

    let updated: Option<OpportunityRow> = sqlx::query_as(
        "UPDATE opportunities SET is_active = false WHERE id = $1 RETURNING *",
    )
    .bind(opportunity_id)
    .fetch_optional(&state.db)
    .await?;
    let opportunity = updated
        .ok_or_else(|| AppError::NotFound(format!("Opportunity {opportunity_id} not found")))?;

    audit::record(
        &state.db,
        user.id,
        "opportunity.deactivate",
        "opportunity",
        opportunity_id,
        json!({ "title": opportunity.title, "company_id": opportunity.company_id }),
    )
    .await?;
    info!(admin_id = %user.id, opportunity_id = %opportunity_id, "Opportunity deactivated");

    state
        .notifier
        .notify_or_log(
            opportunity.company_id,
            Notice::new(
                "opportunity_removed",
                format!("'{}' was taken down", opportunity.title),
                "An administrator deactivated this posting.",
            )
            .with_email(),
        )
        .await;

    Ok(Json(opportunity))
}

/// GET /api/v1/admin/audit-log
pub async fn handle_audit_log(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditLogRow>>, AppError> {
    user.require(Role::Admin)?;
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, 1000);
    let rows: Vec<AuditLogRow> =
        sqlx::query_as("SELECT * FROM audit_log ORDER BY created_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&state.db)
            .await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_users_query_parses_filters() {
        let q: UsersQuery =
            serde_json::from_str(r#"{"status":"pending","role":"company"}"#).unwrap();
        assert_eq!(q.status, Some(AccountStatus::Pending));
        assert_eq!(q.role, Some(Role::Company));
    }
}
