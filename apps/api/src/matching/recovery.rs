//! Score recovery for applications stored without a skill match score.
//!
//! Reads that find a missing score call `RecoveryQueue::enqueue`. Each application is
//! claimed twice before work starts: in-process (`ClaimTable`, TTL) so one instance never
//! queues it twice, and in the database (`applications.score_claim_expires_at`) so two
//! instances never compute it at the same time. The queue is bounded and the dispatcher
//! caps concurrent jobs, so a burst of unscored rows cannot fan out without limit.
//!
//! There is no retry policy: a failed job releases its claims and the next read re-enqueues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::matching::extraction::{extract_text, ResumeFetcher, ResumeSource};
use crate::matching::scoring::match_score;
use crate::matching::skills::SkillExtractor;

// ────────────────────────────────────────────────────────────────────────────
// In-process claims
// ────────────────────────────────────────────────────────────────────────────

/// At-most-once claims keyed by application id. Expired claims are free again.
pub struct ClaimTable {
    ttl: Duration,
    claims: Mutex<HashMap<Uuid, Instant>>,
}

impl ClaimTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            claims: Mutex::new(HashMap::new()),
        }
    }

    pub fn try_claim(&self, id: Uuid, now: Instant) -> bool {
        let mut claims = self.claims.lock().unwrap_or_else(|e| e.into_inner());
        claims.retain(|_, expires_at| *expires_at > now);
        if claims.contains_key(&id) {
            return false;
        }
        claims.insert(id, now + self.ttl);
        true
    }

    pub fn release(&self, id: Uuid) {
        self.claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    #[cfg(test)]
    pub fn is_claimed(&self, id: Uuid, now: Instant) -> bool {
        self.claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .is_some_and(|expires_at| *expires_at > now)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Queue
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    AlreadyClaimed,
    QueueFull,
    Closed,
}

#[derive(Clone)]
pub struct RecoveryQueue {
    tx: mpsc::Sender<Uuid>,
    claims: Arc<ClaimTable>,
}

impl RecoveryQueue {
    pub fn new(capacity: usize, claim_ttl: Duration) -> (Self, mpsc::Receiver<Uuid>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            claims: Arc::new(ClaimTable::new(claim_ttl)),
        };
        (queue, rx)
    }

    pub fn claims(&self) -> Arc<ClaimTable> {
        self.claims.clone()
    }

    pub fn enqueue(&self, application_id: Uuid) -> EnqueueOutcome {
        if !self.claims.try_claim(application_id, Instant::now()) {
            return EnqueueOutcome::AlreadyClaimed;
        }

        match self.tx.try_send(application_id) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.claims.release(application_id);
                warn!(application_id = %application_id, "Recovery queue full, dropping request");
                EnqueueOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.claims.release(application_id);
                error!(application_id = %application_id, "Recovery dispatcher is not running");
                EnqueueOutcome::Closed
            }
        }
    }

    /// Enqueues each id, returning how many were newly queued.
    pub fn enqueue_all<I: IntoIterator<Item = Uuid>>(&self, ids: I) -> usize {
        ids.into_iter()
            .filter(|id| self.enqueue(*id) == EnqueueOutcome::Queued)
            .count()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Scored { score: u32 },
    /// Another instance holds the database claim, or the score already exists.
    Skipped,
    /// The student has not uploaded a resume yet.
    NoResume,
}

#[async_trait]
pub trait RecoveryJob: Send + Sync + 'static {
    async fn run(&self, application_id: Uuid) -> Result<RecoveryOutcome, AppError>;
}

/// Drains the queue, running at most `workers` jobs at once.
pub fn spawn_dispatcher<J: RecoveryJob>(
    mut rx: mpsc::Receiver<Uuid>,
    job: Arc<J>,
    claims: Arc<ClaimTable>,
    workers: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let permits = Arc::new(Semaphore::new(workers.max(1)));
        info!("Recovery dispatcher started with {} workers", workers.max(1));

        while let Some(application_id) = rx.recv().await {
            let permit = match permits.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let job = job.clone();
            let claims = claims.clone();

            tokio::spawn(async move {
                let _permit = permit;
                match job.run(application_id).await {
                    Ok(RecoveryOutcome::Scored { score }) => {
                        info!(
                            application_id = %application_id,
                            score,
                            "Recovered skill match score"
                        );
                    }
                    Ok(RecoveryOutcome::Skipped) => {
                        info!(application_id = %application_id, "Score recovery skipped");
                    }
                    Ok(RecoveryOutcome::NoResume) => {
                        info!(
                            application_id = %application_id,
                            "Score recovery deferred: no resume on file"
                        );
                    }
                    Err(e) => {
                        error!(application_id = %application_id, "Score recovery failed: {e}");
                    }
                }
                claims.release(application_id);
            });
        }

        info!("Recovery dispatcher stopped");
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Database-backed job
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, FromRow)]
struct RecoveryInputRow {
    student_id: Uuid,
    required_skills: Vec<String>,
    resume_key: Option<String>,
    resume_skills: Option<Vec<String>>,
    skills_extracted_at: Option<DateTime<Utc>>,
}

/// extract → skill-parse → score → save, for one application.
pub struct ScoreRecoveryJob {
    db: PgPool,
    fetcher: ResumeFetcher,
    extractor: Arc<dyn SkillExtractor>,
    claim_ttl: Duration,
}

impl ScoreRecoveryJob {
    pub fn new(
        db: PgPool,
        fetcher: ResumeFetcher,
        extractor: Arc<dyn SkillExtractor>,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            db,
            fetcher,
            extractor,
            claim_ttl,
        }
    }

    async fn claim(&self, application_id: Uuid) -> Result<bool, AppError> {
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE applications
            SET score_claim_expires_at = now() + make_interval(secs => $2)
            WHERE id = $1
              AND skill_match_score IS NULL
              AND (score_claim_expires_at IS NULL OR score_claim_expires_at < now())
            RETURNING id
            "#,
        )
        .bind(application_id)
        .bind(self.claim_ttl.as_secs_f64())
        .fetch_optional(&self.db)
        .await?;
        Ok(claimed.is_some())
    }

    async fn release(&self, application_id: Uuid) {
        let result = sqlx::query(
            "UPDATE applications SET score_claim_expires_at = NULL WHERE id = $1",
        )
        .bind(application_id)
        .execute(&self.db)
        .await;
        if let Err(e) = result {
            warn!(application_id = %application_id, "Failed to release score claim: {e}");
        }
    }

    async fn compute(&self, application_id: Uuid) -> Result<RecoveryOutcome, AppError> {
        let input: RecoveryInputRow = sqlx::query_as(
            r#"
            SELECT a.student_id, o.required_skills, p.resume_key, p.resume_skills,
                   p.skills_extracted_at
            FROM applications a
            JOIN opportunities o ON o.id = a.opportunity_id
            LEFT JOIN student_profiles p ON p.user_id = a.student_id
            WHERE a.id = $1
            "#,
        )
        .bind(application_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Application {application_id} not found")))?;

        let skills = match (input.skills_extracted_at, input.resume_key) {
            (Some(_), _) => input.resume_skills.unwrap_or_default(),
            (None, Some(key)) => {
                let extracted =
                    extract_text(&ResumeSource::Stored(key.clone()), &self.fetcher).await?;
                let skills = self.extractor.extract(&extracted.text).await;

                sqlx::query(
                    r#"
                    UPDATE student_profiles
                    SET resume_skills = $2, skills_extracted_at = now(), updated_at = now()
                    WHERE user_id = $1 AND resume_key = $3
                    "#,
                )
                .bind(input.student_id)
                .bind(&skills)
                .bind(&key)
                .execute(&self.db)
                .await?;

                skills
            }
            (None, None) => return Ok(RecoveryOutcome::NoResume),
        };

        let score = match_score(&skills, &input.required_skills);

        let updated = sqlx::query(
            r#"
            UPDATE applications
            SET skill_match_score = $2, resume_skills = $3,
                score_claim_expires_at = NULL, updated_at = now()
            WHERE id = $1 AND skill_match_score IS NULL
            "#,
        )
        .bind(application_id)
        .bind(score as i32)
        .bind(&skills)
        .execute(&self.db)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(RecoveryOutcome::Skipped);
        }
        Ok(RecoveryOutcome::Scored { score })
    }
}

#[async_trait]
impl RecoveryJob for ScoreRecoveryJob {
    async fn run(&self, application_id: Uuid) -> Result<RecoveryOutcome, AppError> {
        if !self.claim(application_id).await? {
            return Ok(RecoveryOutcome::Skipped);
        }

        let outcome = self.compute(application_id).await;
        if !matches!(outcome, Ok(RecoveryOutcome::Scored { .. })) {
            self.release(application_id).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::extraction::{ExtractionFailure, FailureCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_claim_is_exclusive_until_released() {
        let table = ClaimTable::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        let now = Instant::now();

        assert!(table.try_claim(id, now));
        assert!(!table.try_claim(id, now));
        assert!(table.is_claimed(id, now));

        table.release(id);
        assert!(!table.is_claimed(id, now));
        assert!(table.try_claim(id, now));
    }

    #[test]
    fn test_expired_claim_can_be_retaken() {
        let table = ClaimTable::new(Duration::from_secs(5));
        let id = Uuid::new_v4();
        let now = Instant::now();

        assert!(table.try_claim(id, now));
        let later = now + Duration::from_secs(6);
        assert!(!table.is_claimed(id, later));
        assert!(table.try_claim(id, later));
    }

    #[test]
    fn test_claims_are_per_application() {
        let table = ClaimTable::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(table.try_claim(Uuid::new_v4(), now));
        assert!(table.try_claim(Uuid::new_v4(), now));
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_rejected() {
        let (queue, mut rx) = RecoveryQueue::new(8, Duration::from_secs(60));
        let id = Uuid::new_v4();

        assert_eq!(queue.enqueue(id), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(id), EnqueueOutcome::AlreadyClaimed);
        assert_eq!(rx.recv().await, Some(id));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_and_frees_claim() {
        let (queue, _rx) = RecoveryQueue::new(1, Duration::from_secs(60));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(queue.enqueue(first), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(second), EnqueueOutcome::QueueFull);
        assert!(!queue.claims().is_claimed(second, Instant::now()));
    }

    #[tokio::test]
    async fn test_closed_queue_reports_closed() {
        let (queue, rx) = RecoveryQueue::new(4, Duration::from_secs(60));
        drop(rx);
        assert_eq!(queue.enqueue(Uuid::new_v4()), EnqueueOutcome::Closed);
    }

    #[tokio::test]
    async fn test_enqueue_all_counts_new_entries() {
        let (queue, _rx) = RecoveryQueue::new(8, Duration::from_secs(60));
        let id = Uuid::new_v4();
        assert_eq!(queue.enqueue_all([id, id, Uuid::new_v4()]), 2);
    }

    struct CountingJob {
        runs: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RecoveryJob for CountingJob {
        async fn run(&self, _application_id: Uuid) -> Result<RecoveryOutcome, AppError> {
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_active, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(RecoveryOutcome::Scored { score: 50 })
        }
    }

    /// Fails one application outright and reports "no resume" for the rest.
    struct UnluckyJob {
        failing: Uuid,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl RecoveryJob for UnluckyJob {
        async fn run(&self, application_id: Uuid) -> Result<RecoveryOutcome, AppError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if application_id == self.failing {
                return Err(AppError::Extraction(ExtractionFailure::new(
                    FailureCode::FetchFailed,
                    "bucket unreachable",
                )));
            }
            Ok(RecoveryOutcome::NoResume)
        }
    }

    #[tokio::test]
    async fn test_failed_and_deferred_jobs_release_claims() {
        let (queue, rx) = RecoveryQueue::new(8, Duration::from_secs(60));
        let failing = Uuid::new_v4();
        let deferred = Uuid::new_v4();
        let job = Arc::new(UnluckyJob {
            failing,
            runs: AtomicUsize::new(0),
        });
        let _handle = spawn_dispatcher(rx, job.clone(), queue.claims(), 2);

        assert_eq!(queue.enqueue(failing), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(deferred), EnqueueOutcome::Queued);

        for _ in 0..100 {
            let now = Instant::now();
            let released = !queue.claims().is_claimed(failing, now)
                && !queue.claims().is_claimed(deferred, now);
            if job.runs.load(Ordering::SeqCst) == 2 && released {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
        let now = Instant::now();
        assert!(!queue.claims().is_claimed(failing, now));
        assert!(!queue.claims().is_claimed(deferred, now));

        // the next read may ask again
        assert_eq!(queue.enqueue(failing), EnqueueOutcome::Queued);
        assert_eq!(queue.enqueue(deferred), EnqueueOutcome::Queued);
    }

    #[tokio::test]
    async fn test_dispatcher_caps_concurrency_and_releases_claims() {
        let (queue, rx) = RecoveryQueue::new(16, Duration::from_secs(60));
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let handle = spawn_dispatcher(rx, job.clone(), queue.claims(), 2);

        let ids: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        assert_eq!(queue.enqueue_all(ids.clone()), 6);

        for _ in 0..100 {
            if job.runs.load(Ordering::SeqCst) == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // let the last spawned task reach its release
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(job.runs.load(Ordering::SeqCst), 6);
        assert!(job.peak.load(Ordering::SeqCst) <= 2);
        let now = Instant::now();
        assert!(ids.iter().all(|id| !queue.claims().is_claimed(*id, now)));

        drop(queue);
        handle.await.unwrap();
    }
}
