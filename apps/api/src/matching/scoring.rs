//! Match scoring between a student's skills and an opportunity's required skills,
//! plus the on-demand shortlist rank.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::matching::skills::{normalize_skill, normalize_skills};

/// Substring containment in either direction on normalized skills.
///
/// Stored scores were computed this way, so it stays coarse: "java" matches
/// "javascript" and a one-letter skill like "c" matches "react".
pub fn skills_match(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

fn is_covered(required: &str, student: &[String]) -> bool {
    student.iter().any(|s| skills_match(s, required))
}

/// `round(|matched required| / |required| * 100)`, capped at 100.
/// An empty requirement set is a full match.
pub fn match_score<S: AsRef<str>, R: AsRef<str>>(student: &[S], required: &[R]) -> u32 {
    let required = normalize_skills(required);
    if required.is_empty() {
        return 100;
    }
    let student = normalize_skills(student);

    let matched = required.iter().filter(|r| is_covered(r, &student)).count();
    let score = ((matched as f64 / required.len() as f64) * 100.0).round() as u32;
    score.min(100)
}

/// Required skills (original spelling) the student does not cover.
pub fn missing_skills<S: AsRef<str>>(student: &[S], required: &[String]) -> Vec<String> {
    let student = normalize_skills(student);
    let mut seen = Vec::new();
    let mut missing = Vec::new();

    for skill in required {
        let normalized = normalize_skill(skill);
        if normalized.is_empty() || seen.contains(&normalized) {
            continue;
        }
        if !is_covered(&normalized, &student) {
            missing.push(skill.trim().to_string());
        }
        seen.push(normalized);
    }
    missing
}

/// Computed per listing request, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchSummary {
    pub match_score: u32,
    pub missing_skills: Vec<String>,
}

pub fn summarize<S: AsRef<str>>(student: &[S], required: &[String]) -> MatchSummary {
    MatchSummary {
        match_score: match_score(student, required),
        missing_skills: missing_skills(student, required),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistWeights {
    pub skill: f64,
    pub practice: f64,
    pub readiness: f64,
}

impl Default for ShortlistWeights {
    fn default() -> Self {
        Self {
            skill: 0.4,
            practice: 0.3,
            readiness: 0.3,
        }
    }
}

/// Weighted sum of three 0..=100 scores.
pub fn shortlist_rank(
    skill_match: f64,
    practice_score: f64,
    readiness_score: f64,
    weights: &ShortlistWeights,
) -> f64 {
    weights.skill * skill_match
        + weights.practice * practice_score
        + weights.readiness * readiness_score
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub application_id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub skill_match_score: Option<u32>,
    pub practice_score: f64,
    pub readiness_score: f64,
    pub rank_score: f64,
    pub applied_at: DateTime<Utc>,
}

/// Input row for ranking; missing component scores count as 0.
#[derive(Debug, Clone)]
pub struct CandidateScores {
    pub application_id: Uuid,
    pub student_id: Uuid,
    pub student_name: String,
    pub skill_match_score: Option<u32>,
    pub practice_score: Option<f64>,
    pub readiness_score: Option<f64>,
    pub applied_at: DateTime<Utc>,
}

/// Highest rank first; ties go to the earlier application.
pub fn rank_candidates(
    candidates: Vec<CandidateScores>,
    weights: &ShortlistWeights,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .map(|c| {
            let practice = c.practice_score.unwrap_or(0.0);
            let readiness = c.readiness_score.unwrap_or(0.0);
            let skill = c.skill_match_score.unwrap_or(0) as f64;
            RankedCandidate {
                application_id: c.application_id,
                student_id: c.student_id,
                student_name: c.student_name,
                skill_match_score: c.skill_match_score,
                practice_score: practice,
                readiness_score: readiness,
                rank_score: shortlist_rank(skill, practice, readiness, weights),
                applied_at: c.applied_at,
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.rank_score
            .total_cmp(&a.rank_score)
            .then_with(|| a.applied_at.cmp(&b.applied_at))
    });
    ranked
}
