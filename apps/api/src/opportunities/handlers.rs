use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::{AuthUser, OptionalAuthUser};
use crate::errors::AppError;
use crate::matching::scoring::{summarize, MatchSummary};
use crate::matching::skills::normalize_skill;
use crate::models::opportunity::OpportunityRow;
use crate::models::user::Role;
use crate::opportunities::{extracted_skills, find_opportunity};
use crate::state::AppState;

const MAX_REQUIRED_SKILLS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CreateOpportunityRequest {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub required_skills: Vec<String>,
    pub location: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub student_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct OpportunityView {
    #[serde(flatten)]
    pub opportunity: OpportunityRow,
    #[serde(flatten)]
    pub fit: Option<MatchSummary>,
}

/// Trims, drops blanks, and dedups case-insensitively. First spelling wins.
pub fn clean_required_skills(skills: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    let mut cleaned = Vec::new();
    for skill in skills {
        let normalized = normalize_skill(skill);
        if normalized.is_empty() || seen.contains(&normalized) {
            continue;
        }
        seen.push(normalized);
        cleaned.push(skill.trim().to_string());
    }
    cleaned
}

fn validate_create(req: &CreateOpportunityRequest, now: DateTime<Utc>) -> Result<(), AppError> {
    if req.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if req.description.trim().is_empty() {
        return Err(AppError::Validation("Description is required".to_string()));
    }
    if req.required_skills.len() > MAX_REQUIRED_SKILLS {
        return Err(AppError::Validation(format!(
            "At most {MAX_REQUIRED_SKILLS} required skills are allowed"
        )));
    }
    if req.deadline.is_some_and(|d| d <= now) {
        return Err(AppError::Validation("Deadline must be in the future".to_string()));
    }
    Ok(())
}

/// The student whose fit is shown: an explicit `student_id`, else a student caller.
fn fit_subject(query: &ListQuery, caller: &OptionalAuthUser) -> Option<Uuid> {
    query.student_id.or_else(|| {
        caller
            .0
            .filter(|user| user.role == Role::Student)
            .map(|user| user.id)
    })
}

fn with_fit(opportunity: OpportunityRow, skills: Option<&[String]>) -> OpportunityView {
    let fit = skills.map(|s| summarize(s, &opportunity.required_skills));
    OpportunityView { opportunity, fit }
}

/// POST /api/v1/opportunities
pub async fn handle_create_opportunity(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateOpportunityRequest>,
) -> Result<(StatusCode, Json<OpportunityRow>), AppError> {
    user.require(Role::Company)?;
    validate_create(&req, Utc::now())?;

    let row: OpportunityRow = sqlx::query_as(
        r#"
        INSERT INTO opportunities
            (company_id, title, description, required_skills, location, deadline)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(user.id)
    .bind(req.title.trim())
    .bind(req.description.trim())
    .bind(clean_required_skills(&req.required_skills))
    .bind(req.location.as_deref().map(str::trim).filter(|l| !l.is_empty()))
    .bind(req.deadline)
    .fetch_one(&state.db)
    .await?;

    info!(opportunity_id = %row.id, company_id = %user.id, "Opportunity posted");
    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/v1/opportunities
pub async fn handle_list_opportunities(
    State(state): State<AppState>,
    caller: OptionalAuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<OpportunityView>>, AppError> {
    let rows: Vec<OpportunityRow> = sqlx::query_as(
        r#"
        SELECT * FROM opportunities
        WHERE is_active AND (deadline IS NULL OR deadline > now())
          AND ($1::uuid IS NULL OR company_id = $1)
        ORDER BY created_at DESC
        "#,
    )
    .bind(query.company_id)
    .fetch_all(&state.db)
    .await?;

    let skills = match fit_subject(&query, &caller) {
        Some(student_id) => extracted_skills(&state, student_id).await?,
        None => None,
    };

    Ok(Json(
        rows.into_iter()
            .map(|row| with_fit(row, skills.as_deref()))
            .collect(),
    ))
}

/// GET /api/v1/opportunities/:id
pub async fn handle_get_opportunity(
    State(state): State<AppState>,
    caller: OptionalAuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<OpportunityView>, AppError> {
    let row = find_opportunity(&state, id).await?;
    let skills = match fit_subject(&query, &caller) {
        Some(student_id) => extracted_skills(&state, student_id).await?,
        None => None,
    };
    Ok(Json(with_fit(row, skills.as_deref())))
}
