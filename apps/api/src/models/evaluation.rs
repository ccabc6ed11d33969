use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationKind {
    Practice,
    Readiness,
}

impl EvaluationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationKind::Practice => "practice",
            EvaluationKind::Readiness => "readiness",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EvaluationRow {
    pub id: Uuid,
    pub student_id: Uuid,
    pub faculty_id: Uuid,
    pub kind: String,
    pub score: i32,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}
