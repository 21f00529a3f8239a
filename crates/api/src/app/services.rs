//! Service wiring: state store, task queue, executor and watchdog timer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use recalc_catalog::{InMemoryCatalog, InMemoryRelevance};
use recalc_core::SystemClock;
use recalc_engine::Recalculator;
use recalc_infra::{
    InMemoryStateStore, InMemoryTaskStore, JsonFileStateStore, PeriodicTimer, QueueScheduler,
    RecalcConfig, RetryPolicy, StateStore, TaskExecutor, TaskExecutorConfig, TaskExecutorHandle,
    TimerHandle,
};

#[cfg(feature = "postgres")]
use recalc_infra::PostgresStateStore;
#[cfg(feature = "postgres")]
use sqlx::PgPool;

/// How often the watchdog timer checks for due schedules.
const TIMER_TICK: Duration = Duration::from_secs(1);
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

pub type AppScheduler = QueueScheduler<Arc<InMemoryTaskStore>>;

/// Everything the HTTP handlers need, plus the background workers.
pub struct AppServices {
    pub recalc: Arc<Recalculator>,
    pub scheduler: Arc<AppScheduler>,
    workers: Mutex<Option<Workers>>,
}

struct Workers {
    executor: TaskExecutorHandle,
    timer: TimerHandle,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("recalc", &self.recalc)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn tasks(&self) -> &Arc<InMemoryTaskStore> {
        self.scheduler.store()
    }

    /// Stop the executor and the timer, waiting for the batch in progress.
    ///
    /// Blocks; call from a blocking context. Later calls are no-ops.
    pub fn shutdown(&self) {
        let workers = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(workers) = workers {
            workers.timer.shutdown();
            workers.executor.shutdown();
            info!("background workers stopped");
        }
    }
}

/// Wire the recalculator and start its executor and watchdog threads.
///
/// Must be called inside a tokio runtime when a Postgres state store is
/// configured.
pub async fn build_services(config: &RecalcConfig) -> anyhow::Result<AppServices> {
    let state = build_state_store(config).await?;

    let catalog = match &config.catalog_path {
        Some(path) => InMemoryCatalog::from_json_file(path)
            .with_context(|| format!("failed to load catalog seed {}", path.display()))?,
        None => {
            warn!("RECALC_CATALOG_PATH not set; starting with an empty catalog");
            InMemoryCatalog::new()
        }
    };

    let tasks = InMemoryTaskStore::arc();
    let scheduler = Arc::new(QueueScheduler::new(tasks.clone()).with_retry_policy(
        RetryPolicy::exponential(config.max_attempts, RETRY_BASE_DELAY, RETRY_MAX_DELAY),
    ));

    let recalc = Arc::new(
        Recalculator::new(
            state,
            scheduler.clone(),
            Arc::new(catalog),
            Arc::new(InMemoryRelevance::new()),
        )
        .with_batch_size(config.batch_size)
        .with_watchdog_interval(config.watchdog_interval),
    );

    let mut executor = TaskExecutor::new(tasks);
    let timer = Arc::new(PeriodicTimer::new(Arc::new(SystemClock)));
    recalc
        .install(&mut executor, &timer)
        .context("failed to register recalculation hooks")?;

    let executor = executor
        .spawn(
            TaskExecutorConfig::default()
                .with_name("recalc-executor")
                .with_poll_interval(config.poll_interval),
        )
        .context("failed to spawn task executor")?;
    let timer = timer
        .spawn(TIMER_TICK)
        .context("failed to spawn watchdog timer")?;

    info!(
        batch_size = config.batch_size,
        watchdog_secs = config.watchdog_interval.as_secs(),
        "recalculation services ready"
    );

    Ok(AppServices {
        recalc,
        scheduler,
        workers: Mutex::new(Some(Workers { executor, timer })),
    })
}

async fn build_state_store(config: &RecalcConfig) -> anyhow::Result<Arc<dyn StateStore>> {
    if let Some(path) = &config.state_path {
        info!(path = %path.display(), "job state stored in JSON file");
        return Ok(Arc::new(JsonFileStateStore::new(path)));
    }

    if let Some(url) = &config.database_url {
        return connect_postgres(url).await;
    }

    warn!("neither RECALC_STATE_PATH nor DATABASE_URL set; job state will not survive restarts");
    Ok(Arc::new(InMemoryStateStore::new()))
}

#[cfg(feature = "postgres")]
async fn connect_postgres(url: &str) -> anyhow::Result<Arc<dyn StateStore>> {
    let pool = PgPool::connect(url)
        .await
        .context("failed to connect to postgres")?;
    PostgresStateStore::ensure_schema(&pool)
        .await
        .context("failed to prepare recalc_state table")?;

    info!("job state stored in postgres");
    Ok(Arc::new(PostgresStateStore::new(
        pool,
        tokio::runtime::Handle::current(),
    )))
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_url: &str) -> anyhow::Result<Arc<dyn StateStore>> {
    anyhow::bail!("DATABASE_URL is set but this build lacks the `postgres` feature")
}
