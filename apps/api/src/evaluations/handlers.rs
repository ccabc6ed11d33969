use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::evaluation::{EvaluationKind, EvaluationRow};
use crate::models::user::Role;
use crate::notifications::Notice;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateEvaluationRequest {
    pub student_id: Uuid,
    pub kind: EvaluationKind,
    pub score: i32,
    pub remarks: Option<String>,
}

impl CreateEvaluationRequest {
    fn validate(&self) -> Result<(), AppError> {
        if !(0..=100).contains(&self.score) {
            return Err(AppError::Validation(format!(
                "Score must be between 0 and 100, got {}",
                self.score
            )));
        }
        Ok(())
    }
}

/// The same inputs the shortlist rank reads.
#[derive(Debug, Serialize, PartialEq)]
pub struct EvaluationSummary {
    pub practice_average: Option<f64>,
    pub latest_readiness: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct StudentEvaluations {
    pub student_id: Uuid,
    pub summary: EvaluationSummary,
    pub evaluations: Vec<EvaluationRow>,
}

/// `rows` must be newest first.
pub fn summarize_evaluations(rows: &[EvaluationRow]) -> EvaluationSummary {
    let practice: Vec<i32> = rows
        .iter()
        .filter(|r| r.kind == EvaluationKind::Practice.as_str())
        .map(|r| r.score)
        .collect();
    let practice_average = (!practice.is_empty())
        .then(|| practice.iter().map(|s| *s as f64).sum::<f64>() / practice.len() as f64);
    let latest_readiness = rows
        .iter()
        .find(|r| r.kind == EvaluationKind::Readiness.as_str())
        .map(|r| r.score);

    EvaluationSummary {
        practice_average,
        latest_readiness,
    }
}

/// POST /api/v1/evaluations
pub async fn handle_create_evaluation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateEvaluationRequest>,
) -> Result<(StatusCode, Json<EvaluationRow>), AppError> {
    user.require(Role::Faculty)?;
    req.validate()?;

    let is_student: Option<bool> =
        sqlx::query_scalar("SELECT role = 'student' FROM users WHERE id = $1")
            .bind(req.student_id)
            .fetch_optional(&state.db)
            .await?;
    if is_student != Some(true) {
        return Err(AppError::NotFound(format!("Student {} not found", req.student_id)));
    }

    let row: EvaluationRow = sqlx::query_as(
        r#"
        INSERT INTO evaluations (student_id, faculty_id, kind, score, remarks)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(req.student_id)
    .bind(user.id)
    .bind(req.kind.as_str())
    .bind(req.score)
    .bind(req.remarks.as_deref().map(str::trim).filter(|r| !r.is_empty()))
    .fetch_one(&state.db)
    .await?;

    info!(
        evaluation_id = %row.id,
        student_id = %req.student_id,
        kind = req.kind.as_str(),
        "Evaluation recorded"
    );

    state
        .notifier
        .notify_or_log(
            req.student_id,
            Notice::new(
                "evaluation",
                format!("New {} evaluation", req.kind.as_str()),
                format!("You scored {} / 100.", req.score),
            )
            .link("/evaluations"),
        )
        .await;

    Ok((StatusCode::CREATED, Json(row)))
}

/// GET /api/v1/students/:id/evaluations
pub async fn handle_student_evaluations(
    State(state): State<AppState>,
    user: AuthUser,
    Path(student_id): Path<Uuid>,
) -> Result<Json<StudentEvaluations>, AppError> {
    if user.id != student_id {
        user.require_any(&[Role::Faculty, Role::Admin])?;
    }

    let evaluations: Vec<EvaluationRow> = sqlx::query_as(
        "SELECT * FROM evaluations WHERE student_id = $1 ORDER BY created_at DESC",
    )
    .bind(student_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(StudentEvaluations {
        student_id,
        summary: summarize_evaluations(&evaluations),
        evaluations,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn eval(kind: EvaluationKind, score: i32, minutes_ago: i64) -> EvaluationRow {
        EvaluationRow {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            faculty_id: Uuid::new_v4(),
            kind: kind.as_str().to_string(),
            score,
            remarks: None,
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_summary_averages_practice_and_takes_latest_readiness() {
        let rows = vec![
            eval(EvaluationKind::Readiness, 90, 1),
            eval(EvaluationKind::Practice, 60, 2),
            eval(EvaluationKind::Readiness, 40, 3),
            eval(EvaluationKind::Practice, 81, 4),
        ];
        let summary = summarize_evaluations(&rows);
        assert_eq!(summary.practice_average, Some(70.5));
        assert_eq!(summary.latest_readiness, Some(90));
    }

    #[test]
    fn test_summary_without_evaluations() {
        assert_eq!(
            summarize_evaluations(&[]),
            EvaluationSummary {
                practice_average: None,
                latest_readiness: None,
            }
        );
    }

    #[test]
    fn test_score_range_validated() {
        let req = |score| CreateEvaluationRequest {
            student_id: Uuid::new_v4(),
            kind: EvaluationKind::Practice,
            score,
            remarks: None,
        };
        assert!(req(0).validate().is_ok());
        assert!(req(100).validate().is_ok());
        assert!(req(101).validate().is_err());
        assert!(req(-1).validate().is_err());
    }
}
