//! Student profiles and the resume pipeline: extract text, parse skills, store the file,
//! then queue recovery for any of the student's applications still missing a score.

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::matching::extraction::{extract_from_bytes, ResumeKind, ResumeSource};
use crate::models::student::StudentProfileRow;
use crate::state::AppState;

pub mod handlers;

#[derive(Debug, Serialize)]
pub struct ResumeUploadResponse {
    pub profile: StudentProfileRow,
    pub extractor: &'static str,
    pub text_chars: usize,
    /// Applications queued for score recovery by this upload.
    pub rescoring: usize,
}

pub fn resume_key(student_id: Uuid, kind: ResumeKind) -> String {
    format!("resumes/{student_id}/{}.{}", Uuid::new_v4(), kind.extension())
}

/// Runs the whole upload pipeline. Nothing is stored unless extraction succeeds.
pub async fn process_resume(
    state: &AppState,
    student_id: Uuid,
    source: &ResumeSource,
) -> Result<ResumeUploadResponse, AppError> {
    let file = state.fetcher.resolve(source).await?;
    let extracted = extract_from_bytes(
        file.bytes.clone(),
        file.file_name.as_deref(),
        file.content_type.as_deref(),
    )
    .await?;

    let skills = state.skill_extractor.extract(&extracted.text).await;

    let key = resume_key(student_id, extracted.kind);
    state
        .fetcher
        .upload(&key, file.bytes, extracted.kind)
        .await
        .map_err(AppError::S3)?;

    let profile: StudentProfileRow = sqlx::query_as(
        r#"
        INSERT INTO student_profiles
            (user_id, resume_key, resume_skills, skills_extracted_at, updated_at)
        VALUES ($1, $2, $3, now(), now())
        ON CONFLICT (user_id) DO UPDATE
        SET resume_key = EXCLUDED.resume_key,
            resume_skills = EXCLUDED.resume_skills,
            skills_extracted_at = EXCLUDED.skills_extracted_at,
            updated_at = EXCLUDED.updated_at
        RETURNING *
        "#,
    )
    .bind(student_id)
    .bind(&key)
    .bind(&skills)
    .fetch_one(&state.db)
    .await?;

    let unscored: Vec<Uuid> = sqlx::query_scalar(
        "SELECT id FROM applications WHERE student_id = $1 AND skill_match_score IS NULL",
    )
    .bind(student_id)
    .fetch_all(&state.db)
    .await?;
    let rescoring = state.recovery.enqueue_all(unscored);

    info!(
        student_id = %student_id,
        skills = profile.resume_skills.len(),
        extractor = state.skill_extractor.backend(),
        rescoring,
        "Processed resume"
    );

    Ok(ResumeUploadResponse {
        profile,
        extractor: state.skill_extractor.backend(),
        text_chars: extracted.text.chars().count(),
        rescoring,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_key_layout() {
        let student = Uuid::new_v4();
        let key = resume_key(student, ResumeKind::Docx);
        let prefix = format!("resumes/{student}/");
        assert!(key.starts_with(&prefix));
        assert!(key.ends_with(".docx"));
        assert_ne!(key, resume_key(student, ResumeKind::Docx));
    }
}
