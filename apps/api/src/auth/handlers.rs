use anyhow::Context;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;

use crate::auth::password::{hash_password, verify_password, MIN_PASSWORD_CHARS};
use crate::auth::AuthUser;
use crate::config::BootstrapAdmin;
use crate::errors::AppError;
use crate::models::user::{AccountStatus, PublicUser, Role, UserRow};
use crate::notifications::Notice;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: PublicUser,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    if req.role == Role::Admin {
        return Err(AppError::Validation(
            "Admin accounts cannot be self-registered".to_string(),
        ));
    }
    let email = normalize_email(&req.email);
    let valid_email = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid_email {
        return Err(AppError::Validation(format!("'{}' is not a valid email", req.email)));
    }
    if req.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    if req.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    Ok(())
}

async fn hash_blocking(password: String) -> Result<String, AppError> {
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")??;
    Ok(hash)
}

pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// POST /api/v1/auth/register
pub async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), AppError> {
    validate_registration(&req)?;
    let email = normalize_email(&req.email);
    let password_hash = hash_blocking(req.password.clone()).await?;

    let mut tx = state.db.begin().await?;
    let user: PublicUser = sqlx::query_as(
        r#"
        INSERT INTO users (email, password_hash, name, role)
        VALUES ($1, $2, $3, $4)
        RETURNING id, email, name, role, status, created_at
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(req.name.trim())
    .bind(req.role.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("An account for {email} already exists"))
        } else {
            AppError::Database(e)
        }
    })?;

    if req.role == Role::Student {
        sqlx::query("INSERT INTO student_profiles (user_id) VALUES ($1)")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    info!(user_id = %user.id, role = req.role.as_str(), "Registered account pending approval");

    let admins: Vec<uuid::Uuid> = sqlx::query_scalar(
        "SELECT id FROM users WHERE role = 'admin' AND status = 'approved'",
    )
    .fetch_all(&state.db)
    .await?;
    for admin in admins {
        state
            .notifier
            .notify_or_log(
                admin,
                Notice::new(
                    "registration_pending",
                    "New account awaiting approval",
                    format!("{} ({}) registered as {}", user.name, user.email, user.role),
                )
                .link(format!("/admin/users/{}", user.id)),
            )
            .await;
    }

    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/v1/auth/login
pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let email = normalize_email(&req.email);
    let user: UserRow = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let stored = user.password_hash.clone();
    let password = req.password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .context("password verification task failed")?;
    if !valid {
        return Err(AppError::Unauthorized);
    }
    if !user.is_approved() {
        return Err(AppError::AccountNotApproved);
    }

    let role = Role::parse(&user.role)
        .ok_or_else(|| anyhow::anyhow!("user {} has unknown role '{}'", user.id, user.role))?;
    let token = state.jwt.issue(user.id, role)?;
    info!(user_id = %user.id, "Login succeeded");

    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer",
        expires_in: state.jwt.ttl_secs(),
        user: user.into(),
    }))
}

/// GET /api/v1/auth/me
pub async fn handle_me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let row: PublicUser = sqlx::query_as(
        "SELECT id, email, name, role, status, created_at FROM users WHERE id = $1",
    )
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.id)))?;
    Ok(Json(row))
}

/// Creates the configured admin if no account with that email exists yet.
pub async fn bootstrap_admin(db: &PgPool, admin: &BootstrapAdmin) -> anyhow::Result<()> {
    let email = normalize_email(&admin.email);
    let password = admin.password.clone();
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")?
        .map_err(|e| anyhow::anyhow!(e))?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (email, password_hash, name, role, status)
        VALUES ($1, $2, 'Administrator', 'admin', $3)
        ON CONFLICT (email) DO NOTHING
        "#,
    )
    .bind(&email)
    .bind(&hash)
    .bind(AccountStatus::Approved.as_str())
    .execute(db)
    .await
    .context("failed to create bootstrap admin")?;

    if inserted.rows_affected() > 0 {
        info!("Created bootstrap admin {email}");
    }
    Ok(())
}
