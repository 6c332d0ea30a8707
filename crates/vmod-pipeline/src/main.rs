//! Moderation worker binary.
//!
//! Reads `owner media_ref` lines from stdin, submits each as a job and logs
//! how it ends.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmod_analyzer::HttpClassifier;
use vmod_events::Subscription;
use vmod_models::EventKind;
use vmod_pipeline::{metrics, Pipeline, PipelineConfig};
use vmod_store::{InMemoryJobStore, JobStore, RedisJobStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing()?;
    info!("Starting vmod-worker");

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("invalid METRICS_ADDR")?;
        metrics::init_metrics(addr).context("failed to install metrics exporter")?;
        info!("Metrics listening on {}", addr);
    }

    let config = PipelineConfig::from_env();
    info!("Pipeline config: {:?}", config);

    let store = build_store().await?;
    let classifier = Arc::new(HttpClassifier::from_env()?);
    if !classifier.health_check().await {
        warn!("Moderation service is not healthy yet, jobs will retry");
    }

    let pipeline = Pipeline::start(config, store, classifier).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => submit_line(&pipeline, &line).await,
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            },
        }
    }

    pipeline.shutdown().await;
    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vmod_pipeline=info".parse()?)
        .add_directive("vmod_worker=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn build_store() -> anyhow::Result<Arc<dyn JobStore>> {
    let backend = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "memory".to_string());

    match backend.to_lowercase().as_str() {
        "memory" => {
            warn!("Using in-memory job store, jobs are lost on exit");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
        "redis" => {
            let store = RedisJobStore::from_env().context("failed to create Redis job store")?;
            store.health_check().await.context("Redis is unreachable")?;
            info!("Using Redis job store");
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown STORE_BACKEND: {}", other),
    }
}

async fn submit_line(pipeline: &Pipeline, line: &str) {
    let mut parts = line.split_whitespace();
    let (Some(owner), Some(media_ref)) = (parts.next(), parts.next()) else {
        if !line.trim().is_empty() {
            warn!("Ignoring malformed line, expected `owner media_ref`: {:?}", line);
        }
        return;
    };

    let id = match pipeline.submit(media_ref, owner).await {
        Ok(id) => id,
        Err(e) => {
            error!(owner = owner, "Failed to submit job: {}", e);
            return;
        }
    };

    match pipeline.subscribe(&id).await {
        Ok(subscription) => {
            tokio::spawn(report_outcome(subscription));
        }
        Err(e) => warn!(job_id = %id, "Cannot follow job: {}", e),
    }
}

async fn report_outcome(mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        let job_id = &event.job_id;
        match event.kind {
            EventKind::Done { result } => {
                info!(job_id = %job_id, label = %result.label, confidence = result.confidence, "Job done");
            }
            EventKind::Failed { error, attempts } => {
                warn!(job_id = %job_id, error = %error, attempts = attempts, "Job failed");
            }
            EventKind::Cancelled => info!(job_id = %job_id, "Job cancelled"),
            _ => {}
        }
    }
}
