use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::handlers::is_unique_violation;
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::matching::recovery::RecoveryQueue;
use crate::matching::scoring::{
    match_score, rank_candidates, CandidateScores, RankedCandidate, ShortlistWeights,
};
use crate::models::application::{ApplicantRow, ApplicationRow, ApplicationStatus};
use crate::models::user::Role;
use crate::notifications::Notice;
use crate::opportunities::{extracted_skills, find_opportunity};
use crate::realtime::events::ServerEvent;
use crate::state::AppState;

const DEFAULT_SHORTLIST_LIMIT: usize = 20;
const MAX_SHORTLIST_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ApplicantsQuery {
    pub opportunity_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ApplicantView {
    #[serde(flatten)]
    pub applicant: ApplicantRow,
    /// True while the score is missing; recovery has been asked to fill it.
    pub score_pending: bool,
}

#[derive(Debug, Deserialize)]
pub struct ShortlistQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ShortlistResponse {
    pub opportunity_id: Uuid,
    pub weights: ShortlistWeights,
    pub candidates: Vec<RankedCandidate>,
    pub pending_scores: usize,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ApplicationStatus,
}

#[derive(Debug, FromRow)]
struct ShortlistInputRow {
    application_id: Uuid,
    student_id: Uuid,
    student_name: String,
    skill_match_score: Option<i32>,
    practice_score: Option<f64>,
    readiness_score: Option<f64>,
    applied_at: DateTime<Utc>,
}

impl From<ShortlistInputRow> for CandidateScores {
    fn from(row: ShortlistInputRow) -> Self {
        CandidateScores {
            application_id: row.application_id,
            student_id: row.student_id,
            student_name: row.student_name,
            skill_match_score: row.skill_match_score.map(|s| s.clamp(0, 100) as u32),
            practice_score: row.practice_score,
            readiness_score: row.readiness_score,
            applied_at: row.applied_at,
        }
    }
}

fn shortlist_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_SHORTLIST_LIMIT)
        .clamp(1, MAX_SHORTLIST_LIMIT)
}

/// POST /api/v1/opportunities/:id/apply
pub async fn handle_apply(
    State(state): State<AppState>,
    user: AuthUser,
    Path(opportunity_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApplicationRow>), AppError> {
    user.require(Role::Student)?;

    let opportunity = find_opportunity(&state, opportunity_id).await?;
    if !opportunity.is_open(Utc::now()) {
        return Err(AppError::Validation(format!(
            "'{}' is no longer accepting applications",
            opportunity.title
        )));
    }

    let skills = extracted_skills(&state, user.id).await?;
    let score = skills
        .as_ref()
        .map(|s| match_score(s, &opportunity.required_skills) as i32);

    let application: ApplicationRow = sqlx::query_as(
        r#"
        INSERT INTO applications (opportunity_id, student_id, skill_match_score, resume_skills)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(opportunity_id)
    .bind(user.id)
    .bind(score)
    .bind(&skills)
    .fetch_one(&state.db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("You have already applied to this opportunity".to_string())
        } else {
            AppError::Database(e)
        }
    })?;

    info!(
        application_id = %application.id,
        opportunity_id = %opportunity_id,
        score = ?score,
        "Application submitted"
    );

    state
        .notifier
        .notify_or_log(
            opportunity.company_id,
            Notice::new(
                "new_applicant",
                format!("New applicant for {}", opportunity.title),
                "A student has applied to your posting.",
            )
            .link(format!("/opportunities/{opportunity_id}/applicants")),
        )
        .await;

    Ok((StatusCode::CREATED, Json(application)))
}

/// GET /api/v1/company/applicants
pub async fn handle_company_applicants(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ApplicantsQuery>,
) -> Result<Json<Vec<ApplicantView>>, AppError> {
    user.require(Role::Company)?;

    let rows: Vec<ApplicantRow> = sqlx::query_as(
        r#"
        SELECT a.id AS application_id, a.opportunity_id, o.title AS opportunity_title,
               a.student_id, u.name AS student_name, u.email AS student_email,
               a.status, a.skill_match_score, a.resume_skills, a.applied_at
        FROM applications a
        JOIN opportunities o ON o.id = a.opportunity_id
        JOIN users u ON u.id = a.student_id
        WHERE o.company_id = $1
          AND ($2::uuid IS NULL OR a.opportunity_id = $2)
        ORDER BY a.applied_at DESC
        "#,
    )
    .bind(user.id)
    .bind(query.opportunity_id)
    .fetch_all(&state.db)
    .await?;

    let queued = state.recovery.enqueue_all(
        rows.iter()
            .filter(|r| r.skill_match_score.is_none())
            .map(|r| r.application_id),
    );
    if queued > 0 {
        info!(company_id = %user.id, queued, "Queued score recovery for applicants");
    }

    Ok(Json(
        rows.into_iter()
            .map(|applicant| ApplicantView {
                score_pending: applicant.skill_match_score.is_none(),
                applicant,
            })
            .collect(),
    ))
}

/// GET /api/v1/opportunities/:id/shortlist
pub async fn handle_shortlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(opportunity_id): Path<Uuid>,
    Query(query): Query<ShortlistQuery>,
) -> Result<Json<ShortlistResponse>, AppError> {
    user.require(Role::Company)?;
    let opportunity = find_opportunity(&state, opportunity_id).await?;
    if opportunity.company_id != user.id {
        return Err(AppError::Forbidden);
    }

    let rows: Vec<ShortlistInputRow> = sqlx::query_as(
        r#"
        SELECT a.id AS application_id, a.student_id, u.name AS student_name,
               a.skill_match_score, a.applied_at,
               (SELECT AVG(e.score)::FLOAT8 FROM evaluations e
                 WHERE e.student_id = a.student_id AND e.kind = 'practice') AS practice_score,
               (SELECT e.score::FLOAT8 FROM evaluations e
                 WHERE e.student_id = a.student_id AND e.kind = 'readiness'
                 ORDER BY e.created_at DESC LIMIT 1) AS readiness_score
        FROM applications a
        JOIN users u ON u.id = a.student_id
        WHERE a.opportunity_id = $1 AND a.status <> 'rejected'
        "#,
    )
    .bind(opportunity_id)
    .fetch_all(&state.db)
    .await?;

    let missing: Vec<Uuid> = rows
        .iter()
        .filter(|r| r.skill_match_score.is_none())
        .map(|r| r.application_id)
        .collect();
    let pending_scores = request_missing_scores(&state.recovery, &missing);

    let mut candidates = rank_candidates(
        rows.into_iter().map(CandidateScores::from).collect(),
        &state.shortlist_weights,
    );
    candidates.truncate(shortlist_limit(query.limit));

    Ok(Json(ShortlistResponse {
        opportunity_id,
        weights: state.shortlist_weights.clone(),
        candidates,
        pending_scores,
    }))
}

/// PATCH /api/v1/applications/:id/status
pub async fn handle_update_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(application_id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApplicationRow>, AppError> {
    user.require(Role::Company)?;

    let updated: Option<ApplicationRow> = sqlx::query_as(
        r#"
        UPDATE applications a
        SET status = $2, updated_at = now()
        FROM opportunities o
        WHERE a.id = $1 AND o.id = a.opportunity_id AND o.company_id = $3
        RETURNING a.*
        "#,
    )
    .bind(application_id)
    .bind(req.status.as_str())
    .bind(user.id)
    .fetch_optional(&state.db)
    .await?;
    let application = updated
        .ok_or_else(|| AppError::NotFound(format!("Application {application_id} not found")))?;

    info!(
        application_id = %application_id,
        status = req.status.as_str(),
        "Application status changed"
    );

    state.notifier.push(
        application.student_id,
        ServerEvent::ApplicationUpdated {
            application_id,
            status: application.status.clone(),
        },
    );
    state
        .notifier
        .notify_or_log(
            application.student_id,
            Notice::new(
                "application_status",
                format!("Application update: {}", req.status.label()),
                format!("Your application status is now '{}'.", req.status.as_str()),
            )
            .link(format!("/applications/{application_id}"))
            .with_email(),
        )
        .await;

    Ok(Json(application))
}

/// Asks recovery for every missing score and returns how many are still missing.
/// Ids already claimed by an earlier read still count as pending.
fn request_missing_scores(queue: &RecoveryQueue, missing: &[Uuid]) -> usize {
    let queued = queue.enqueue_all(missing.iter().copied());
    if queued < missing.len() {
        debug!(
            queued,
            pending = missing.len(),
            "Some missing scores are already queued or the queue is full"
        );
    }
    missing.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pending_scores_stay_counted_on_repeat_reads() {
        let (queue, _rx) = RecoveryQueue::new(8, Duration::from_secs(60));
        let missing = vec![Uuid::new_v4(), Uuid::new_v4()];

        assert_eq!(request_missing_scores(&queue, &missing), 2);
        assert_eq!(request_missing_scores(&queue, &missing), 2);
        assert_eq!(request_missing_scores(&queue, &[]), 0);
    }

    #[tokio::test]
    async fn test_pending_scores_include_ids_rejected_by_full_queue() {
        let (queue, _rx) = RecoveryQueue::new(1, Duration::from_secs(60));
        let missing = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        assert_eq!(request_missing_scores(&queue, &missing), 3);
    }

    #[test]
    fn test_shortlist_limit_defaults_and_clamps() {
        assert_eq!(shortlist_limit(None), DEFAULT_SHORTLIST_LIMIT);
        assert_eq!(shortlist_limit(Some(0)), 1);
        assert_eq!(shortlist_limit(Some(5)), 5);
        assert_eq!(shortlist_limit(Some(10_000)), MAX_SHORTLIST_LIMIT);
    }

    #[test]
    fn test_shortlist_row_conversion_clamps_score() {
        let row = ShortlistInputRow {
            application_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            student_name: "Ravi".to_string(),
            skill_match_score: Some(140),
            practice_score: Some(72.5),
            readiness_score: None,
            applied_at: Utc::now(),
        };
        let scores = CandidateScores::from(row);
        assert_eq!(scores.skill_match_score, Some(100));
        assert_eq!(scores.practice_score, Some(72.5));
        assert_eq!(scores.readiness_score, None);
    }

    #[test]
    fn test_status_request_parses_known_statuses() {
        let req: UpdateStatusRequest = serde_json::from_str(r#"{"status":"shortlisted"}"#).unwrap();
        assert_eq!(req.status, ApplicationStatus::Shortlisted);
        assert!(serde_json::from_str::<UpdateStatusRequest>(r#"{"status":"hired"}"#).is_err());
    }
}
