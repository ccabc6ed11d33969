pub const SKILL_EXTRACT_SYSTEM: &str = "You are an expert technical recruiter who reads \
    resumes and lists the concrete skills they demonstrate. \
    You MUST respond with valid JSON only, no markdown and no commentary.";

pub const SKILL_EXTRACT_PROMPT: &str = r#"Extract every technical and professional skill from the resume below.

Rules:
- Return each skill as a short, lower-case name ("python", "react", "machine learning").
- Do not invent skills that the resume does not mention.
- Do not include company names, job titles, or degrees.

Respond with exactly this JSON shape:
{"skills": ["skill one", "skill two"]}

RESUME:
{resume_text}"#;

/// Sampling temperature for skill extraction.
pub const SKILL_EXTRACT_TEMPERATURE: f32 = 0.1;
