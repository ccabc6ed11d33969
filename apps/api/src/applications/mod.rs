// Applying, the company applicant dashboard, on-demand shortlists, and status changes.
// A stored skill_match_score is never recomputed; missing ones go to recovery.

pub mod handlers;
