//! Infrastructure wiring behind the HTTP surface.
//!
//! `build_services` picks backends from the environment: in-memory for
//! dev/test, Redis-backed (feature `redis`) when `USE_PERSISTENT_STORES=true`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use docrelay_infra::{InMemoryCheckpointStore, InMemoryDispatcher, InMemoryResultLog};
use docrelay_relay::{CheckpointStore, JobDispatcher, RelayConfig, ResultLog};

#[cfg(feature = "redis")]
use docrelay_infra::{RedisCheckpointStore, RedisQueueDispatcher, RedisResultLog};

/// Shared handles every connection and upload handler works against.
#[derive(Clone)]
pub struct AppServices {
    pub log: Arc<dyn ResultLog>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub relay_config: RelayConfig,
    pub upload_dir: PathBuf,
    /// Flipped to `true` on process shutdown; relays watch it.
    pub shutdown: watch::Receiver<bool>,
}

pub async fn build_services(shutdown: watch::Receiver<bool>) -> AppServices {
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(shutdown).await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    build_in_memory_services(shutdown)
}

fn relay_config_from_env() -> RelayConfig {
    let mut config = RelayConfig::default();
    if let Ok(raw) = std::env::var("RELAY_BATCH_SIZE") {
        if let Ok(n) = raw.parse() {
            config.batch_size = n;
        }
    }
    if let Ok(raw) = std::env::var("RELAY_BLOCK_TIMEOUT_MS") {
        if let Ok(ms) = raw.parse() {
            config.block_timeout = Duration::from_millis(ms);
        }
    }
    if let Ok(job_type) = std::env::var("DEFAULT_JOB_TYPE") {
        config.default_job_type = job_type;
    }
    config
}

fn upload_dir_from_env() -> PathBuf {
    PathBuf::from(std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "tmp".to_string()))
}

/// Deployment-wide log retention; `None` means the backend default.
fn log_max_len_from_env() -> Option<usize> {
    std::env::var("DOCRELAY_LOG_MAX_LEN").ok()?.parse().ok()
}

fn build_in_memory_services(shutdown: watch::Receiver<bool>) -> AppServices {
    tracing::info!("using in-memory backends");
    let log = match log_max_len_from_env() {
        Some(max_len) => Arc::new(InMemoryResultLog::new(max_len)),
        None => InMemoryResultLog::arc(),
    };
    AppServices {
        log,
        checkpoints: InMemoryCheckpointStore::arc(),
        dispatcher: InMemoryDispatcher::arc(),
        relay_config: relay_config_from_env(),
        upload_dir: upload_dir_from_env(),
        shutdown,
    }
}

#[cfg(feature = "redis")]
async fn build_persistent_services(shutdown: watch::Receiver<bool>) -> AppServices {
    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let route = std::env::var("JOB_ROUTE").ok();

    let log = RedisResultLog::connect(&redis_url, log_max_len_from_env())
        .await
        .expect("failed to connect result log to Redis");
    let checkpoints = RedisCheckpointStore::connect(&redis_url, None)
        .await
        .expect("failed to connect checkpoint store to Redis");
    let dispatcher = RedisQueueDispatcher::connect(&redis_url, route)
        .await
        .expect("failed to connect dispatcher to Redis");

    tracing::info!(redis_url = %redis_url, "using Redis backends");
    AppServices {
        log: Arc::new(log),
        checkpoints: Arc::new(checkpoints),
        dispatcher: Arc::new(dispatcher),
        relay_config: relay_config_from_env(),
        upload_dir: upload_dir_from_env(),
        shutdown,
    }
}
