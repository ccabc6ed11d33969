use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Applied,
    Shortlisted,
    Rejected,
    Selected,
}

impl ApplicationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "Applied",
            ApplicationStatus::Shortlisted => "Shortlisted",
            ApplicationStatus::Rejected => "Not selected",
            ApplicationStatus::Selected => "Selected",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Shortlisted => "shortlisted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Selected => "selected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApplicationRow {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub student_id: Uuid,
    pub status: String,
    /// Written once, at application time or by recovery; never recomputed.
    pub skill_match_score: Option<i32>,
    pub resume_skills: Option<Vec<String>>,
    pub applied_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Applicant row for a company's dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApplicantRow {
    pub application_id: Uuid,
    pub opportunity_id: Uuid,
    pub opportunity_title: String,
    pub student_id: Uuid,
    pub student_name: String,
    pub student_email: String,
    pub status: String,
    pub skill_match_score: Option<i32>,
    pub resume_skills: Option<Vec<String>>,
    pub applied_at: DateTime<Utc>,
}

/// A student's own application, with the posting it targets.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StudentApplicationRow {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub opportunity_title: String,
    pub company_name: String,
    pub status: String,
    pub skill_match_score: Option<i32>,
    pub applied_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
