use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::rate_limit::RateLimiter;
use crate::auth::tokens::JwtKeys;
use crate::config::Config;
use crate::matching::extraction::ResumeFetcher;
use crate::matching::recovery::RecoveryQueue;
use crate::matching::scoring::ShortlistWeights;
use crate::matching::skills::SkillExtractor;
use crate::notifications::Notifier;
use crate::realtime::fanout::Fanout;
use crate::realtime::registry::ConnectionRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    /// Resume bytes from uploads, URLs, and the S3 bucket.
    pub fetcher: ResumeFetcher,
    /// Keyword-only, or hybrid when an OpenAI key is configured.
    pub skill_extractor: Arc<dyn SkillExtractor>,
    pub recovery: RecoveryQueue,
    /// Live sockets on this instance.
    pub registry: ConnectionRegistry,
    /// Local or Redis-backed, chosen by REDIS_URL.
    pub fanout: Arc<dyn Fanout>,
    pub notifier: Notifier,
    pub jwt: JwtKeys,
    pub rate_limiter: RateLimiter,
    pub shortlist_weights: ShortlistWeights,
}
