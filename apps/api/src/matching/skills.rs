//! Skill extraction from resume text.
//!
//! Two independent sources:
//! - `keyword_scan`: local, deterministic containment scan over `KEYWORD_SKILLS`.
//! - `LlmSkillSource`: one LLM call; any failure yields an empty list.
//!
//! `AppState` holds an `Arc<dyn SkillExtractor>`; the hybrid extractor merges both sources.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm_client::LlmClient;
use crate::matching::prompts::{
    SKILL_EXTRACT_PROMPT, SKILL_EXTRACT_SYSTEM, SKILL_EXTRACT_TEMPERATURE,
};

/// Fixed vocabulary for the local keyword path.
pub const KEYWORD_SKILLS: &[&str] = &[
    "javascript",
    "python",
    "java",
    "c++",
    "react",
    "node",
    "express",
    "mongodb",
    "sql",
    "html",
    "css",
    "aws",
    "machine learning",
];

/// Cap on resume characters sent to the LLM.
const MAX_PROMPT_RESUME_CHARS: usize = 8000;

pub fn normalize_skill(skill: &str) -> String {
    skill.trim().to_lowercase()
}

/// Lower-cases, trims, drops empties and duplicates. Output is sorted.
pub fn normalize_skills<I, S>(skills: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    skills
        .into_iter()
        .map(|s| normalize_skill(s.as_ref()))
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Union of two skill lists after case folding.
pub fn merge_skills(a: &[String], b: &[String]) -> Vec<String> {
    normalize_skills(a.iter().chain(b.iter()))
}

/// Every vocabulary term that occurs anywhere in the text, case-insensitively.
pub fn keyword_scan(text: &str) -> Vec<String> {
    let haystack = text.to_lowercase();
    normalize_skills(
        KEYWORD_SKILLS
            .iter()
            .copied()
            .filter(|term| haystack.contains(term)),
    )
}

#[derive(Debug, Deserialize)]
struct SkillList {
    #[serde(default)]
    skills: Vec<String>,
}

/// LLM-backed skill source. Single attempt, no fallback.
#[derive(Clone)]
pub struct LlmSkillSource {
    llm: LlmClient,
}

impl LlmSkillSource {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub async fn extract(&self, resume_text: &str) -> Vec<String> {
        let prompt = SKILL_EXTRACT_PROMPT.replace(
            "{resume_text}",
            truncate_chars(resume_text, MAX_PROMPT_RESUME_CHARS),
        );

        match self
            .llm
            .call_json::<SkillList>(&prompt, SKILL_EXTRACT_SYSTEM, SKILL_EXTRACT_TEMPERATURE)
            .await
        {
            Ok(list) => normalize_skills(list.skills),
            Err(e) => {
                warn!("LLM skill extraction failed, returning no skills: {e}");
                Vec::new()
            }
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Turns resume text into a normalized skill set.
#[async_trait]
pub trait SkillExtractor: Send + Sync {
    async fn extract(&self, resume_text: &str) -> Vec<String>;

    /// "keyword" | "hybrid", for logs and responses.
    fn backend(&self) -> &'static str;
}

pub struct KeywordSkillExtractor;

#[async_trait]
impl SkillExtractor for KeywordSkillExtractor {
    async fn extract(&self, resume_text: &str) -> Vec<String> {
        keyword_scan(resume_text)
    }

    fn backend(&self) -> &'static str {
        "keyword"
    }
}

/// Keyword scan merged with the LLM result.
pub struct HybridSkillExtractor {
    llm: LlmSkillSource,
}

impl HybridSkillExtractor {
    pub fn new(llm: LlmSkillSource) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SkillExtractor for HybridSkillExtractor {
    async fn extract(&self, resume_text: &str) -> Vec<String> {
        let keyword = keyword_scan(resume_text);
        let llm = self.llm.extract(resume_text).await;
        debug!(
            keyword_count = keyword.len(),
            llm_count = llm.len(),
            "Merging skill sources"
        );
        merge_skills(&keyword, &llm)
    }

    fn backend(&self) -> &'static str {
        "hybrid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_has_thirteen_terms() {
        assert_eq!(KEYWORD_SKILLS.len(), 13);
    }

    #[test]
    fn test_normalize_folds_case_trims_and_dedups() {
        let skills = normalize_skills(["  React ", "react", "", "SQL", "  "]);
        assert_eq!(skills, vec!["react".to_string(), "sql".to_string()]);
    }

    #[test]
    fn test_keyword_scan_is_case_insensitive() {
        let skills = keyword_scan("Built dashboards in REACT with a Node/Express backend on AWS.");
        assert_eq!(skills, vec!["aws", "express", "node", "react"]);
    }

    #[test]
    fn test_keyword_scan_java_inside_javascript() {
        // plain containment: "javascript" text also yields "java"
        let skills = keyword_scan("Frontend work in JavaScript");
        assert!(skills.contains(&"javascript".to_string()));
        assert!(skills.contains(&"java".to_string()));
    }

    #[test]
    fn test_keyword_scan_multi_word_term() {
        let skills = keyword_scan("Coursework: Machine Learning, statistics");
        assert_eq!(skills, vec!["machine learning"]);
    }

    #[test]
    fn test_keyword_scan_empty_text() {
        assert!(keyword_scan("").is_empty());
    }

    #[test]
    fn test_merge_dedups_across_sources() {
        let a = vec!["python".to_string(), "sql".to_string()];
        let b = vec!["Python".to_string(), "Docker".to_string()];
        assert_eq!(merge_skills(&a, &b), vec!["docker", "python", "sql"]);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_skill_list_tolerates_missing_field() {
        let list: SkillList = serde_json::from_str("{}").unwrap();
        assert!(list.skills.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_extractor_backend() {
        let extractor = KeywordSkillExtractor;
        assert_eq!(extractor.backend(), "keyword");
        assert_eq!(extractor.extract("python and sql").await, vec!["python", "sql"]);
    }
}
