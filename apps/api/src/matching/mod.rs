// Skill matching: resume text extraction, skill extraction, match scoring,
// shortlist ranking, and queued recovery of missing scores.
// All LLM calls go through llm_client.

pub mod extraction;
pub mod prompts;
pub mod recovery;
pub mod scoring;
pub mod skills;
