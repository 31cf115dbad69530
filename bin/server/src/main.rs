//! The minder backend daemon.
//!
//! Wires the scheduler, attention router, and commitment engine over
//! Postgres, arms the in-process timers, and runs the two worker pools
//! plus the periodic sweeps until shutdown.
//!
//! Exit codes: 0 on clean shutdown, 1 on operational failure, 2 when
//! configuration is rejected.

mod config;
mod db;
mod invoker;
mod timer;
mod transport;
mod workers;

use async_trait::async_trait;
use chrono::{NaiveTime, Utc};
use minder_attention::{
    AttentionRouter, BatchScheduleConfig, BatchingService, Channel, FailClosedConfig,
    FailClosedRouter, PolicyEngine, RateLimitConfig, RouterConfig, TransportRegistry,
    ViolationRecorder,
};
use minder_commitments::miss_detection::MissedNotificationHook;
use minder_commitments::store::CommitmentStore;
use minder_commitments::transition::{TransitionConfig, TransitionService};
use minder_commitments::review::WeeklyReviewService;
use minder_core::{Clock, SystemClock};
use minder_scheduler::callback::CallbackBridge;
use minder_scheduler::dispatcher::ExecutionDispatcher;
use minder_scheduler::execution::ExecutionStatus;
use minder_scheduler::predicate::{PredicateEvaluator, ResolverError, SubjectResolver};
use minder_scheduler::provider::{TimerProvider, TimerRegistration};
use minder_scheduler::retry::{BackoffStrategy, RetryPolicy};
use minder_scheduler::schedule::ScheduleState;
use minder_scheduler::store::{ScheduleFilter, SchedulerStore};
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::db::{PgAttentionStore, PgCommitmentStore, PgSchedulerStore};
use crate::invoker::{ReminderInvoker, RouterFailureNotifier};
use crate::timer::TokioTimerProvider;
use crate::transport::LoggingTransport;
use crate::workers::{
    spawn_attention_workers, spawn_callback_workers, CallbackWorkerContext, QueueSubmitter,
    WorkerMessage,
};

/// Subject resolver until an external collaborator is plugged in.
///
/// Conditional schedules evaluate to ERROR with `subject_unavailable`
/// rather than silently holding TRUE or FALSE.
struct UnconfiguredSubjectResolver;

#[async_trait]
impl SubjectResolver for UnconfiguredSubjectResolver {
    async fn resolve(&self, subject: &str) -> Result<Option<serde_json::Value>, ResolverError> {
        Err(ResolverError::unavailable(format!(
            "no subject resolver configured for '{subject}'"
        )))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "configuration rejected");
            return ExitCode::from(2);
        }
    };
    tracing::info!(owner = %config.owner, "loaded configuration");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "operational failure");
            ExitCode::from(1)
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let scheduler_store: Arc<dyn SchedulerStore> = Arc::new(PgSchedulerStore::new(pool.clone()));
    let attention_store = Arc::new(PgAttentionStore::new(pool.clone()));
    let commitment_store: Arc<dyn CommitmentStore> =
        Arc::new(PgCommitmentStore::new(pool.clone()));

    let (callback_tx, callback_rx) = mpsc::channel::<WorkerMessage>(256);
    let (attention_tx, attention_rx) = mpsc::channel(256);

    // The attention router: single outbound gate.
    let mut router_config = RouterConfig {
        escalation_ignore_threshold: config.attention.escalation_ignore_threshold,
        escalation_deadline_window_seconds: config.attention.escalation_deadline_window_seconds,
        ..RouterConfig::default()
    };
    for (channel_name, settings) in &config.attention.rate_limits {
        let Some(channel) = Channel::parse(channel_name) else {
            tracing::warn!(channel = %channel_name, "ignoring rate limit for unknown channel");
            continue;
        };
        router_config.rate_limits.insert(
            channel,
            RateLimitConfig::new(settings.max_per_window, settings.window_seconds),
        );
    }
    let transports = TransportRegistry::new()
        .with_transport(
            Channel::Signal,
            Arc::new(LoggingTransport::for_channel(Channel::Signal)),
        )
        .with_transport(
            Channel::Obsidian,
            Arc::new(LoggingTransport::for_channel(Channel::Obsidian)),
        )
        .with_transport(
            Channel::Digest,
            Arc::new(LoggingTransport::for_channel(Channel::Digest)),
        )
        .with_transport(
            Channel::Web,
            Arc::new(LoggingTransport::for_channel(Channel::Web)),
        );
    let router = Arc::new(AttentionRouter::new(
        attention_store.clone(),
        PolicyEngine::with_defaults(),
        transports,
        ViolationRecorder::new(),
        router_config,
        clock.clone(),
    ));
    let fail_closed = Arc::new(FailClosedRouter::new(
        router.clone(),
        attention_store.clone(),
        FailClosedConfig {
            retry_delay_seconds: config.attention.fail_closed_retry_delay_seconds,
        },
        clock.clone(),
    ));

    // The scheduler: dispatcher, bridge, and evaluator over the
    // in-process timer provider.
    let provider: Arc<dyn TimerProvider> = Arc::new(TokioTimerProvider::new(callback_tx.clone()));
    let retry_policy = RetryPolicy::new(
        config.scheduler.default_max_attempts,
        BackoffStrategy::parse(&config.scheduler.default_backoff_strategy)?,
        config.scheduler.backoff_base_seconds,
    )?;
    let dispatcher = Arc::new(ExecutionDispatcher::new(
        scheduler_store.clone(),
        Arc::new(ReminderInvoker::new(
            scheduler_store.clone(),
            fail_closed.clone(),
            config.owner.clone(),
            clock.clone(),
        )),
        provider.clone(),
        Arc::new(RouterFailureNotifier::new(
            fail_closed.clone(),
            config.owner.clone(),
            clock.clone(),
        )),
        retry_policy,
        clock.clone(),
    ));
    let bridge = Arc::new(CallbackBridge::new(
        scheduler_store.clone(),
        dispatcher.clone(),
    ));
    let evaluator = Arc::new(PredicateEvaluator::new(
        scheduler_store.clone(),
        dispatcher.clone(),
        Arc::new(UnconfiguredSubjectResolver),
        clock.clone(),
    ));

    // The commitment engine, notifying through the attention queue.
    let submitter = Arc::new(QueueSubmitter::new(attention_tx.clone()));
    let transitions = Arc::new(TransitionService::new(
        commitment_store.clone(),
        Arc::new(MissedNotificationHook::new(submitter.clone(), clock.clone())),
        TransitionConfig {
            autonomous_transition_threshold: config
                .commitments
                .autonomous_transition_confidence_threshold,
            audit_retention_days: config.commitments.audit_retention_days,
        },
        clock.clone(),
    ));
    let review = Arc::new(WeeklyReviewService::new(
        commitment_store.clone(),
        submitter.clone(),
        clock.clone(),
    ));
    let batching = Arc::new(BatchingService::new(
        attention_store.clone(),
        router.clone(),
        clock.clone(),
    ));

    // Worker pools.
    let worker_ctx = Arc::new(CallbackWorkerContext {
        bridge,
        dispatcher,
        evaluator,
        scheduler_store: scheduler_store.clone(),
        commitment_store: commitment_store.clone(),
        transitions: transitions.clone(),
        provider: provider.clone(),
        clock: clock.clone(),
    });
    let _callback_workers = spawn_callback_workers(
        config.scheduler.callback_workers,
        callback_rx,
        worker_ctx,
    );
    let _attention_workers = spawn_attention_workers(
        config.attention.attention_workers,
        attention_rx,
        fail_closed.clone(),
    );

    arm_persisted_timers(scheduler_store.as_ref(), provider.as_ref()).await?;
    spawn_periodic_tasks(
        &config,
        fail_closed.clone(),
        transitions,
        review,
        batching,
    );

    tracing::info!("minder is running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    Ok(())
}

/// Re-arms timers for active schedules and pending retries after a
/// restart; the in-process provider holds no durable state.
async fn arm_persisted_timers(
    store: &dyn SchedulerStore,
    provider: &dyn TimerProvider,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let active = store
        .list_schedules(ScheduleFilter {
            state: Some(ScheduleState::Active),
            ..ScheduleFilter::default()
        })
        .await?;
    let mut armed = 0usize;
    for schedule in &active {
        let registration = TimerRegistration {
            schedule_id: schedule.id,
            kind: schedule.kind,
            fire_at: schedule.next_run_at,
            cadence_seconds: schedule.definition.evaluation_cadence_seconds,
            timezone: schedule.timezone.clone(),
        };
        match provider.register(registration).await {
            Ok(()) => armed += 1,
            Err(err) => {
                tracing::warn!(
                    schedule_id = schedule.id.as_i64(),
                    error = %err,
                    "could not arm persisted schedule"
                );
            }
        }

        for execution in store.list_executions(schedule.id).await? {
            if execution.status == ExecutionStatus::RetryScheduled {
                if let Some(retry_at) = execution.next_retry_at {
                    provider
                        .schedule_retry(execution.id, schedule.id, retry_at)
                        .await?;
                }
            }
        }
    }
    tracing::info!(armed, total = active.len(), "persisted timers armed");
    Ok(())
}

/// Spawns the recurring maintenance loops: the fail-closed sweep, the
/// transition audit retention sweep, batch materialization, and the
/// weekly review.
fn spawn_periodic_tasks(
    config: &ServerConfig,
    fail_closed: Arc<FailClosedRouter>,
    transitions: Arc<TransitionService>,
    review: Arc<WeeklyReviewService>,
    batching: Arc<BatchingService>,
) {
    let sweep_interval = config.attention.fail_closed_sweep_interval_seconds.max(30);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            match fail_closed.reprocess_queue().await {
                Ok(drained) if drained > 0 => {
                    tracing::info!(drained, "fail-closed queue reprocessed");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "fail-closed sweep failed");
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(86_400));
        loop {
            interval.tick().await;
            if let Err(err) = transitions.sweep_audits().await {
                tracing::warn!(error = %err, "transition audit sweep failed");
            }
        }
    });

    let owner = config.owner.clone();
    let batch_time = parse_time(&config.attention.batch_daily_time);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3_600));
        loop {
            interval.tick().await;
            let schedule = BatchScheduleConfig {
                daily_time: batch_time,
                weekly_day: None,
                weekly_time: None,
            };
            match batching.materialize_batches(&owner, &schedule).await {
                Ok(result) => {
                    for batch_id in result.batch_ids {
                        match batching.summarize_batch(batch_id).await {
                            Ok(summary) => {
                                if let Err(err) =
                                    batching.deliver_batch(batch_id, &summary).await
                                {
                                    tracing::warn!(
                                        batch_id,
                                        error = %err,
                                        "digest delivery failed"
                                    );
                                }
                            }
                            Err(err) => {
                                tracing::warn!(batch_id, error = %err, "batch summary failed");
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "batch materialization failed");
                }
            }
        }
    });

    let owner = config.owner.clone();
    let review_day = u32::from(config.commitments.review_day.min(6));
    let review_time = parse_time(&config.commitments.review_time)
        .unwrap_or_else(|| NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        let mut last_review_date = None;
        loop {
            interval.tick().await;
            let now = Utc::now();
            let today = now.date_naive();
            let due = chrono::Datelike::weekday(&now).num_days_from_monday() == review_day
                && now.time() >= review_time
                && last_review_date != Some(today);
            if !due {
                continue;
            }
            match review.run_review(&owner).await {
                Ok(summary) => {
                    last_review_date = Some(today);
                    tracing::info!(
                        completed = summary.completed.len(),
                        missed = summary.missed.len(),
                        "weekly review delivered"
                    );
                }
                Err(err) => {
                    tracing::warn!(error = %err, "weekly review failed");
                }
            }
        }
    });
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}
