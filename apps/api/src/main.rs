mod admin;
mod applications;
mod auth;
mod config;
mod db;
mod errors;
mod evaluations;
mod llm_client;
mod matching;
mod models;
mod notifications;
mod opportunities;
mod realtime;
mod routes;
mod state;
mod students;

use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::handlers::bootstrap_admin;
use crate::auth::rate_limit::RateLimiter;
use crate::auth::tokens::JwtKeys;
use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmClient;
use crate::matching::extraction::ResumeFetcher;
use crate::matching::recovery::{spawn_dispatcher, RecoveryQueue, ScoreRecoveryJob};
use crate::matching::scoring::ShortlistWeights;
use crate::matching::skills::{
    HybridSkillExtractor, KeywordSkillExtractor, LlmSkillSource, SkillExtractor,
};
use crate::notifications::Notifier;
use crate::realtime::fanout::{spawn_redis_subscriber, Fanout, LocalFanout, RedisFanout};
use crate::realtime::registry::ConnectionRegistry;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting placement API v{}", env!("CARGO_PKG_VERSION"));

    // PostgreSQL (migrations run here)
    let db = create_pool(&config.database_url).await?;

    if let Some(admin) = &config.bootstrap_admin {
        bootstrap_admin(&db, admin).await?;
    }

    let s3 = build_s3_client(&config).await;
    let fetcher = ResumeFetcher::new(s3, config.s3_bucket.clone(), config.max_resume_bytes);
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Skill extraction: single-attempt LLM calls, so a failure never delays an upload
    let skill_extractor: Arc<dyn SkillExtractor> = match &config.openai_api_key {
        Some(key) => {
            info!("Skill extraction: hybrid (model: {})", llm_client::MODEL);
            Arc::new(HybridSkillExtractor::new(LlmSkillSource::new(LlmClient::new(
                key.clone(),
                1,
            ))))
        }
        None => {
            info!("Skill extraction: keyword only (OPENAI_API_KEY not set)");
            Arc::new(KeywordSkillExtractor)
        }
    };

    // Socket fan-out
    let registry = ConnectionRegistry::new();
    let fanout: Arc<dyn Fanout> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("invalid REDIS_URL")?;
            spawn_redis_subscriber(client.clone(), registry.clone());
            Arc::new(RedisFanout::new(client))
        }
        None => Arc::new(LocalFanout::new(registry.clone())),
    };
    info!("Socket fan-out: {}", fanout.backend());

    // Score recovery
    let claim_ttl = Duration::from_secs(config.recovery.claim_ttl_secs);
    let (recovery, recovery_rx) = RecoveryQueue::new(config.recovery.queue_capacity, claim_ttl);
    let job = Arc::new(ScoreRecoveryJob::new(
        db.clone(),
        fetcher.clone(),
        skill_extractor.clone(),
        claim_ttl,
    ));
    spawn_dispatcher(recovery_rx, job, recovery.claims(), config.recovery.workers);

    let state = AppState {
        notifier: Notifier::new(db.clone(), fanout.clone()),
        jwt: JwtKeys::new(&config.jwt_secret, config.jwt_ttl_hours),
        rate_limiter: RateLimiter::new(&config.rate_limit),
        shortlist_weights: ShortlistWeights::default(),
        db,
        fetcher,
        skill_extractor,
        recovery,
        registry,
        fanout,
        config: config.clone(),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "placement-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
