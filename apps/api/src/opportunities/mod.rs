pub mod handlers;

use uuid::Uuid;

use crate::errors::AppError;
use crate::models::opportunity::OpportunityRow;
use crate::models::student::StudentProfileRow;
use crate::state::AppState;

pub async fn find_opportunity(state: &AppState, id: Uuid) -> Result<OpportunityRow, AppError> {
    sqlx::query_as("SELECT * FROM opportunities WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Opportunity {id} not found")))
}

/// The student's extracted skill set, or `None` until a resume has been processed.
pub async fn extracted_skills(
    state: &AppState,
    student_id: Uuid,
) -> Result<Option<Vec<String>>, AppError> {
    let profile: Option<StudentProfileRow> =
        sqlx::query_as("SELECT * FROM student_profiles WHERE user_id = $1")
            .bind(student_id)
            .fetch_optional(&state.db)
            .await?;
    Ok(profile
        .filter(StudentProfileRow::has_extracted_skills)
        .map(|p| p.resume_skills))
}
