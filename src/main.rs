mod config;
mod core;
mod dispatcher;
mod error;
mod fast_store;
mod judge;
mod languages;
mod notifier;
mod queue;
mod ranking;
mod redis_manager;
mod repository;
mod sandbox;
mod server;
mod storage;
mod testcase;
#[cfg(test)]
mod testing;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::core::fixture_ref;
use crate::dispatcher::Dispatcher;
use crate::fast_store::FastStore;
use crate::judge::{JudgeEngine, StrategyRegistry};
use crate::languages::LanguageTable;
use crate::notifier::Notifier;
use crate::ranking::{ContestFlusher, RankingEngine};
use crate::redis_manager::RedisManager;
use crate::repository::{Repository, SqliteRepository};
use crate::sandbox::HttpSandbox;
use crate::server::AppState;
use crate::storage::StorageClient;
use crate::testcase::TestCaseCache;
use crate::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("oj_pipeline=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    info!("Starting submission pipeline...");

    let redis = Arc::new(RedisManager::connect(&config.redis_url).await?);
    let repo: Arc<dyn Repository> =
        Arc::new(SqliteRepository::connect(&config.database_url).await?);

    let storage = Arc::new(StorageClient::new(&config.storage));
    let cache = Arc::new(TestCaseCache::new(storage, config.cache));
    if !config.preload_problems.is_empty() {
        let fixtures: Vec<String> = config
            .preload_problems
            .iter()
            .map(|&pid| fixture_ref(pid))
            .collect();
        cache.preload(&fixtures).await;
    }

    let sandbox = Arc::new(HttpSandbox::new(&config.sandbox_endpoint, config.sandbox_timeout)?);
    info!("Using sandbox at {}", config.sandbox_endpoint);

    let engine = Arc::new(JudgeEngine::new(sandbox, cache.clone()));
    let registry = Arc::new(StrategyRegistry::new(engine, &LanguageTable::load()?)?);
    info!("Judging {:?}", registry.languages());
    let ranking = Arc::new(RankingEngine::new(
        redis.clone(),
        repo.clone(),
        config.contest_grace,
    ));
    let notifier = Arc::new(Notifier::new());
    let dispatcher = Arc::new(Dispatcher::new(
        redis.clone(),
        redis.clone(),
        repo.clone(),
        config.dedup_window,
        config.reply_timeout,
    ));

    let token = CancellationToken::new();
    let mut tasks = Vec::with_capacity(config.worker_count + 1);

    for id in 0..config.worker_count {
        let worker = Worker::new(
            id,
            redis.clone(),
            repo.clone(),
            registry.clone(),
            ranking.clone(),
            notifier.clone(),
        );
        tasks.push(tokio::spawn(worker.run(token.clone())));
    }
    info!("Spawned {} judge workers", config.worker_count);

    let expired = redis.expired_keys().await?;
    let flusher = ContestFlusher::new(redis.clone(), repo.clone());
    tasks.push(tokio::spawn(flusher.run(expired, token.clone())));

    let shutdown = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    let state = AppState {
        dispatcher,
        ranking,
        cache,
        notifier,
    };
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await
        .context("HTTP server failed")?;

    token.cancel();
    futures::future::join_all(tasks).await;
    info!("Submission pipeline stopped");
    Ok(())
}
