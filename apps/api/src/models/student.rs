use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentProfileRow {
    pub user_id: Uuid,
    pub department: Option<String>,
    pub graduation_year: Option<i32>,
    pub resume_key: Option<String>,
    /// Normalized skill set from the last resume upload.
    pub resume_skills: Vec<String>,
    /// NULL until a resume has been processed.
    pub skills_extracted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StudentProfileRow {
    pub fn has_extracted_skills(&self) -> bool {
        self.skills_extracted_at.is_some()
    }
}
