use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::matching::extraction::{ExtractionFailure, FailureCode, ResumeSource};
use crate::models::application::StudentApplicationRow;
use crate::models::student::StudentProfileRow;
use crate::models::user::Role;
use crate::state::AppState;
use crate::students::{process_resume, ResumeUploadResponse};

const RESUME_FIELD: &str = "resume";

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub department: Option<String>,
    pub graduation_year: Option<i32>,
}

impl UpdateProfileRequest {
    fn validate(&self) -> Result<(), AppError> {
        if let Some(year) = self.graduation_year {
            if !(1950..=2100).contains(&year) {
                return Err(AppError::Validation(format!(
                    "Graduation year {year} is out of range"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ResumeUrlRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct MyApplication {
    #[serde(flatten)]
    pub application: StudentApplicationRow,
    pub score_pending: bool,
}

/// GET /api/v1/students/me
pub async fn handle_get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<StudentProfileRow>, AppError> {
    user.require(Role::Student)?;
    let profile: StudentProfileRow = sqlx::query_as(
        r#"
        INSERT INTO student_profiles (user_id) VALUES ($1)
        ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
        RETURNING *
        "#,
    )
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(profile))
}

/// PUT /api/v1/students/me
pub async fn handle_update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<StudentProfileRow>, AppError> {
    user.require(Role::Student)?;
    req.validate()?;

    let department = req
        .department
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let profile: StudentProfileRow = sqlx::query_as(
        r#"
        INSERT INTO student_profiles (user_id, department, graduation_year)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id) DO UPDATE
        SET department = EXCLUDED.department,
            graduation_year = EXCLUDED.graduation_year,
            updated_at = now()
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(department)
    .bind(req.graduation_year)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(profile))
}

/// POST /api/v1/students/me/resume (multipart, field `resume`)
pub async fn handle_upload_resume(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<ResumeUploadResponse>, AppError> {
    user.require(Role::Student)?;

    let mut source = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some(RESUME_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read resume upload: {e}")))?;
        source = Some(ResumeSource::Upload {
            bytes,
            file_name,
            content_type,
        });
        break;
    }

    let source = source.ok_or_else(|| {
        ExtractionFailure::new(
            FailureCode::NoFile,
            format!("Attach the resume as the '{RESUME_FIELD}' form field"),
        )
    })?;

    Ok(Json(process_resume(&state, user.id, &source).await?))
}

/// POST /api/v1/students/me/resume/url
pub async fn handle_resume_from_url(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ResumeUrlRequest>,
) -> Result<Json<ResumeUploadResponse>, AppError> {
    user.require(Role::Student)?;
    let url = req.url.trim();
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(AppError::Validation(format!("'{url}' is not an http(s) URL")));
    }
    let source = ResumeSource::Url(url.to_string());
    Ok(Json(process_resume(&state, user.id, &source).await?))
}

/// GET /api/v1/students/me/applications
pub async fn handle_my_applications(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<MyApplication>>, AppError> {
    user.require(Role::Student)?;
    let rows: Vec<StudentApplicationRow> = sqlx::query_as(
        r#"
        SELECT a.id, a.opportunity_id, o.title AS opportunity_title, c.name AS company_name,
               a.status, a.skill_match_score, a.applied_at, a.updated_at
        FROM applications a
        JOIN opportunities o ON o.id = a.opportunity_id
        JOIN users c ON c.id = o.company_id
        WHERE a.student_id = $1
        ORDER BY a.applied_at DESC
        "#,
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;

    state.recovery.enqueue_all(
        rows.iter()
            .filter(|r| r.skill_match_score.is_none())
            .map(|r| r.id),
    );

    Ok(Json(
        rows.into_iter()
            .map(|application| MyApplication {
                score_pending: application.skill_match_score.is_none(),
                application,
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graduation_year_bounds() {
        let ok = UpdateProfileRequest {
            department: Some("CSE".to_string()),
            graduation_year: Some(2026),
        };
        assert!(ok.validate().is_ok());

        let bad = UpdateProfileRequest {
            department: None,
            graduation_year: Some(3026),
        };
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));
    }
}
