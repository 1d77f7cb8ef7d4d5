//! Single-worker training scheduler. Exactly one job runs at any instant;
//! duplicate `(symbol, timeframe, bot_name)` never coexists in the queue
//! plus the running slot; jobs run FIFO. Control verbs flip coordinator
//! flags: Stop waits for the in-flight job and drains the queue,
//! ForceStop additionally trips the running job's cancel token and
//! abandons the bot if it ignores the token past the timeout.

use crate::application::baselines::baseline_rmses;
use crate::application::health_monitor::HealthMonitor;
use crate::application::window_loader::{LoadOptions, WindowLoader};
use crate::config::Config;
use crate::domain::errors::ServiceError;
use crate::domain::events::TrainingProgress;
use crate::domain::market::TradingCalendar;
use crate::domain::ports::{CancelHandle, cancel_pair};
use crate::domain::repositories::TrainingRepository;
use crate::domain::training::{
    QueueStatus, TrainOutcome, TrainingJob, TrainingRecord, TrainingStatus,
};
use crate::domain::validation::window_gate;
use crate::infrastructure::bots::BotRegistry;
use crate::infrastructure::hub::SubscriptionHub;
use crate::infrastructure::observability::Metrics;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{error, info, warn};

pub struct EnqueueOutcome {
    pub queue_size: usize,
    pub admitted: usize,
    pub duplicates: usize,
}

struct CurrentJob {
    job: TrainingJob,
    cancel: CancelHandle,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<TrainingJob>,
    current: Option<CurrentJob>,
    paused: bool,
    stop_requested: bool,
    worker_alive: bool,
    completed: u64,
    failed: u64,
}

pub struct TrainingQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    wakeup: Notify,
    loader: Arc<WindowLoader>,
    bots: Arc<BotRegistry>,
    training_repo: Arc<dyn TrainingRepository>,
    health: Arc<HealthMonitor>,
    hub: Arc<SubscriptionHub>,
    calendar: Arc<dyn TradingCalendar>,
    metrics: Metrics,
    lookback_days: i64,
    min_candles: usize,
    epoch_budget: Duration,
    force_stop_timeout: Duration,
}

impl TrainingQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        loader: Arc<WindowLoader>,
        bots: Arc<BotRegistry>,
        training_repo: Arc<dyn TrainingRepository>,
        health: Arc<HealthMonitor>,
        hub: Arc<SubscriptionHub>,
        calendar: Arc<dyn TradingCalendar>,
        metrics: Metrics,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                wakeup: Notify::new(),
                loader,
                bots,
                training_repo,
                health,
                hub,
                calendar,
                metrics,
                lookback_days: config.default_lookback_days,
                min_candles: config.min_window_candles,
                epoch_budget: Duration::from_secs(config.train_epoch_budget_secs),
                force_stop_timeout: Duration::from_secs(config.force_stop_timeout_secs),
            }),
        }
    }

    /// Admit jobs, silently counting duplicates instead of erroring.
    pub async fn enqueue(&self, jobs: Vec<TrainingJob>) -> EnqueueOutcome {
        let outcome = {
            let mut state = self.inner.state.lock().await;
            let mut admitted = 0usize;
            let mut duplicates = 0usize;
            for job in jobs {
                let key = job.dedup_key();
                let clash = state.queue.iter().any(|j| j.dedup_key() == key)
                    || state
                        .current
                        .as_ref()
                        .map(|c| c.job.dedup_key() == key)
                        .unwrap_or(false);
                if clash {
                    duplicates += 1;
                } else {
                    state.queue.push_back(job);
                    admitted += 1;
                }
            }
            EnqueueOutcome {
                queue_size: state.queue.len(),
                admitted,
                duplicates,
            }
        };
        self.ensure_worker().await;
        outcome
    }

    /// Whether the job is immediately queued behind others or will start
    /// right away; used by the TrainBot response.
    pub async fn is_busy(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.current.is_some() || !state.queue.is_empty()
    }

    pub async fn pause(&self) -> QueueStatus {
        {
            let mut state = self.inner.state.lock().await;
            state.paused = true;
        }
        info!("training queue paused");
        self.status().await
    }

    pub async fn resume(&self) -> QueueStatus {
        {
            let mut state = self.inner.state.lock().await;
            state.paused = false;
        }
        self.inner.wakeup.notify_waiters();
        info!("training queue resumed");
        self.status().await
    }

    /// Finish the in-flight job, then drain the queue and go idle.
    pub async fn stop(&self) -> QueueStatus {
        {
            let mut state = self.inner.state.lock().await;
            state.stop_requested = true;
        }
        self.inner.wakeup.notify_waiters();
        info!("training queue stopping after current job");
        self.status().await
    }

    /// Stop plus cooperative cancellation of the running job.
    pub async fn force_stop(&self) -> QueueStatus {
        {
            let mut state = self.inner.state.lock().await;
            state.stop_requested = true;
            if let Some(current) = &state.current {
                warn!(
                    "force-stop: cancelling training {} ({})",
                    current.job.id,
                    current.job.dedup_key()
                );
                current.cancel.cancel();
            }
        }
        self.inner.wakeup.notify_waiters();
        self.status().await
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock().await;
        QueueStatus {
            is_running: state.worker_alive,
            is_paused: state.paused,
            current: state.current.as_ref().map(|c| c.job.clone()),
            queue_length: state.queue.len(),
            completed_count: state.completed,
            failed_count: state.failed,
        }
    }

    async fn ensure_worker(&self) {
        let mut state = self.inner.state.lock().await;
        if state.worker_alive {
            self.inner.wakeup.notify_waiters();
            return;
        }
        state.worker_alive = true;
        drop(state);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            worker_loop(inner).await;
        });
    }
}

async fn worker_loop(inner: Arc<QueueInner>) {
    info!("training worker started");
    loop {
        // Register for the wakeup before inspecting the queue, so a
        // notify_waiters racing between our lock release and the await
        // cannot be lost.
        let mut notified = std::pin::pin!(inner.wakeup.notified());
        notified.as_mut().enable();

        let job = {
            let mut state = inner.state.lock().await;
            if state.stop_requested {
                let dropped = state.queue.len();
                state.queue.clear();
                state.stop_requested = false;
                state.worker_alive = false;
                info!("training worker stopped ({} queued jobs dropped)", dropped);
                return;
            }
            if state.paused || state.queue.is_empty() {
                None
            } else {
                let job = state.queue.pop_front().expect("queue checked non-empty");
                let (handle, token) = cancel_pair();
                state.current = Some(CurrentJob {
                    job: job.clone(),
                    cancel: handle,
                });
                Some((job, token))
            }
        };

        match job {
            None => notified.await,
            Some((job, token)) => {
                let key = job.dedup_key();
                info!("training {} started ({})", job.id, key);
                run_job(&inner, &job, token).await;
                let mut state = inner.state.lock().await;
                state.current = None;
            }
        }
    }
}

async fn run_job(inner: &Arc<QueueInner>, job: &TrainingJob, token: crate::domain::ports::CancelToken) {
    let now = inner.calendar.now();
    let mut record = TrainingRecord::started(job, now);
    if let Err(e) = inner.training_repo.insert(&record).await {
        error!("failed to insert training record {}: {}", job.id, e);
        bump_failed(inner).await;
        return;
    }
    publish_progress(inner, &record, 0, job.epochs, "started").await;

    let outcome = execute(inner, job, token).await;
    let finished = inner.calendar.now();
    record.finished_at = Some(finished);

    match outcome {
        Ok((trained, window_span, closes)) => {
            record.status = TrainingStatus::Completed;
            record.data_points_used = trained.data_points_used;
            record.test_rmse = Some(trained.test_rmse);
            record.test_mae = Some(trained.test_mae);
            record.model_size_bytes = trained.model_size_bytes;
            record.training_period = Some(window_span);
            record.baseline_rmses = baseline_rmses(&closes, closes.len() * 4 / 5);

            match inner
                .health
                .drift_score(&job.symbol, job.timeframe, &job.bot_name, trained.test_rmse)
                .await
            {
                Ok(drift) => record.drift_score = drift,
                Err(e) => warn!("drift score unavailable for {}: {}", job.dedup_key(), e),
            }

            // Supersede the previous deployment before this one goes live.
            if let Err(e) = inner
                .training_repo
                .archive_completed(&job.symbol, job.timeframe, &job.bot_name)
                .await
            {
                warn!("archiving prior records failed for {}: {}", job.dedup_key(), e);
            }
            if let Err(e) = inner.training_repo.update(&record).await {
                error!("failed to finalize training record {}: {}", job.id, e);
            }
            inner
                .metrics
                .trainings_total
                .with_label_values(&["completed"])
                .inc();
            let mut state = inner.state.lock().await;
            state.completed += 1;
            drop(state);
            publish_progress(inner, &record, job.epochs, job.epochs, "completed").await;
            info!(
                "training {} completed: rmse={:.4} ({} points)",
                job.id,
                trained.test_rmse,
                trained.data_points_used
            );
        }
        Err(e) => {
            let message = match &e {
                ServiceError::Cancelled => "forced_cancel".to_string(),
                other => other.to_string(),
            };
            record.status = TrainingStatus::Failed;
            record.error_message = Some(message.clone());
            if let Err(update_err) = inner.training_repo.update(&record).await {
                error!(
                    "failed to record training failure {}: {}",
                    job.id, update_err
                );
            }
            inner
                .metrics
                .trainings_total
                .with_label_values(&["failed"])
                .inc();
            bump_failed(inner).await;
            publish_progress(inner, &record, 0, job.epochs, &message).await;
            warn!("training {} failed: {}", job.id, message);
        }
    }
}

/// Load, gate, train. Returns the outcome plus the window span string and
/// closes (for the baseline comparison).
async fn execute(
    inner: &Arc<QueueInner>,
    job: &TrainingJob,
    token: crate::domain::ports::CancelToken,
) -> Result<(TrainOutcome, String, Vec<f64>), ServiceError> {
    let bot = inner
        .bots
        .get(&job.bot_name)
        .ok_or_else(|| ServiceError::NotFound {
            what: format!("bot {}", job.bot_name),
        })?;

    let window = inner
        .loader
        .load_lookback(
            &job.symbol,
            job.timeframe,
            inner.lookback_days,
            LoadOptions::default(),
        )
        .await?;

    let gate = window_gate(&window, inner.min_candles);
    if !gate.is_empty() {
        return Err(ServiceError::ValidationFailed { reasons: gate });
    }

    let span = match (window.first(), window.last()) {
        (Some(first), Some(last)) => format!(
            "{}..{}",
            first.ts.format("%Y-%m-%d"),
            last.ts.format("%Y-%m-%d")
        ),
        _ => String::new(),
    };
    let closes = window.closes_f64();

    // Forward bot ticks as hub progress events while training runs.
    let (tick_tx, mut tick_rx) = mpsc::channel::<crate::domain::ports::TrainTick>(32);
    let forwarder = {
        let inner = Arc::clone(inner);
        let job = job.clone();
        tokio::spawn(async move {
            while let Some(tick) = tick_rx.recv().await {
                let percent = if tick.total_batches > 0 {
                    (tick.batch as f64 / tick.total_batches as f64) * 100.0
                } else {
                    0.0
                };
                inner
                    .hub
                    .broadcast_training(TrainingProgress {
                        training_id: job.id,
                        bot_name: job.bot_name.clone(),
                        symbol: job.symbol.clone(),
                        timeframe: job.timeframe,
                        status: TrainingStatus::Running,
                        batch: tick.batch,
                        total_batches: tick.total_batches,
                        progress_percent: percent,
                        message: tick.message,
                    })
                    .await;
            }
        })
    };

    let params = job.params();
    let budget = inner.epoch_budget * params.epochs.max(1);
    let abandon_token = token.clone();
    let result = tokio::select! {
        result = bot.train(&window, &params, token, tick_tx) => result,
        // Wall-clock budget scales with the requested epochs.
        _ = tokio::time::sleep(budget) => {
            warn!("training {} exceeded its {}s budget", job.id, budget.as_secs());
            Err(ServiceError::Timeout {
                what: format!("bot {} train", job.bot_name),
                seconds: budget.as_secs(),
            })
        }
        // The bot ignored its cancel token past the grace window: drop
        // its future and fail the record.
        _ = async {
            abandon_token.cancelled().await;
            tokio::time::sleep(inner.force_stop_timeout).await;
        } => {
            warn!("training {} abandoned after cancellation timeout", job.id);
            Err(ServiceError::Cancelled)
        }
    };

    forwarder.abort();
    result.map(|outcome| (outcome, span, closes))
}

async fn bump_failed(inner: &Arc<QueueInner>) {
    let mut state = inner.state.lock().await;
    state.failed += 1;
}

async fn publish_progress(
    inner: &Arc<QueueInner>,
    record: &TrainingRecord,
    batch: u32,
    total: u32,
    message: &str,
) {
    let percent = if total > 0 {
        (batch as f64 / total as f64) * 100.0
    } else {
        0.0
    };
    inner
        .hub
        .broadcast_training(TrainingProgress {
            training_id: record.id,
            bot_name: record.bot_name.clone(),
            symbol: record.symbol.clone(),
            timeframe: record.timeframe,
            status: record.status,
            batch,
            total_batches: total,
            progress_percent: percent,
            message: message.to_string(),
        })
        .await;
}
