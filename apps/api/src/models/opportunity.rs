use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OpportunityRow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub title: String,
    pub description: String,
    /// Fixed at posting time.
    pub required_skills: Vec<String>,
    pub location: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl OpportunityRow {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.deadline.map_or(true, |d| d > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn opportunity(is_active: bool, deadline: Option<DateTime<Utc>>) -> OpportunityRow {
        OpportunityRow {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            title: "Backend Intern".to_string(),
            description: "APIs".to_string(),
            required_skills: vec!["Node".to_string()],
            location: None,
            deadline,
            is_active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_open_without_deadline() {
        assert!(opportunity(true, None).is_open(Utc::now()));
    }

    #[test]
    fn test_closed_after_deadline() {
        let now = Utc::now();
        assert!(!opportunity(true, Some(now - Duration::hours(1))).is_open(now));
    }

    #[test]
    fn test_inactive_is_closed() {
        assert!(!opportunity(false, None).is_open(Utc::now()));
    }
}
