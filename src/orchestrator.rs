use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::error::{Error, Result};
use crate::format::{format_rate, format_size};
use crate::monitor::{LifecycleMonitor, MoverLifecycleEvent, MoverState};
use crate::progress::{self, ProgressData, DEFAULT_RATE_WINDOW};
use crate::provider::{EventType, NotificationData, NotificationProvider};
use crate::registry::ProviderRegistry;
use crate::sampler::{DiskSample, UsageSampler};

/// Everything scoped to one mover cycle. Reset in full when a cycle ends.
struct CycleState {
    lifecycle: MoverState,
    baseline: Option<DiskSample>,
    samples: Vec<DiskSample>,
    latest_progress: Option<ProgressData>,
    notified_thresholds: Vec<f64>,
    cycle_id: Option<String>,
    current_pid: Option<i32>,
}

impl CycleState {
    fn new() -> Self {
        Self {
            lifecycle: MoverState::Waiting,
            baseline: None,
            samples: Vec::new(),
            latest_progress: None,
            notified_thresholds: Vec::new(),
            cycle_id: None,
            current_pid: None,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// State and collaborators shared between the event loop and the sampling
/// task.
struct Shared {
    monitored_paths: Vec<PathBuf>,
    exclusion_paths: Vec<PathBuf>,
    sampling_interval: Duration,
    rate_window: usize,
    thresholds: Vec<f64>,
    dispatcher: NotificationDispatcher,
    sampler: Arc<dyn UsageSampler>,
    state: RwLock<CycleState>,
    shutdown: watch::Receiver<bool>,
}

/// Coordinates the mover lifecycle: provider initialization, the event loop,
/// baseline capture, the per-cycle sampling task, and notification building.
///
/// At most one cycle is active at a time; cycle-scoped state lives in
/// [`CycleState`] and is fully reset when the cycle ends for any reason.
pub struct Orchestrator {
    shared: Arc<Shared>,
    registry: ProviderRegistry,
    pid_file: PathBuf,
    pid_check_interval: Duration,
    completion_enabled: bool,
    sampling_task: Option<JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        config: &AppConfig,
        sampler: Arc<dyn UsageSampler>,
        provider_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let registry = ProviderRegistry::new();
        let dispatcher = NotificationDispatcher::new(
            registry.clone(),
            provider_timeout,
            config.application.dry_run,
        );
        if config.application.dry_run {
            info!("Dry-run mode enabled: notifications will be logged without sending");
        }

        let mut thresholds = config.notifications.thresholds.clone();
        thresholds.sort_by(|a, b| a.partial_cmp(b).expect("thresholds are finite"));

        Self {
            shared: Arc::new(Shared {
                monitored_paths: config.monitoring.monitored_paths.clone(),
                exclusion_paths: config.monitoring.exclusion_paths.clone(),
                sampling_interval: config.monitoring.sampling_interval,
                rate_window: DEFAULT_RATE_WINDOW,
                thresholds,
                dispatcher,
                sampler,
                state: RwLock::new(CycleState::new()),
                shutdown: shutdown.clone(),
            }),
            registry,
            pid_file: config.monitoring.pid_file.clone(),
            pid_check_interval: config.monitoring.pid_check_interval,
            completion_enabled: config.notifications.completion_enabled,
            sampling_task: None,
        }
    }

    /// Read-only handle to the provider registry, for diagnostics and tests.
    pub fn registry(&self) -> ProviderRegistry {
        self.registry.clone()
    }

    pub async fn lifecycle_state(&self) -> MoverState {
        self.shared.state.read().await.lifecycle
    }

    /// Validate, health-check, and register the configured providers.
    /// Startup fails when none survive.
    pub async fn initialize_providers(
        &self,
        providers: Vec<Arc<dyn NotificationProvider>>,
    ) -> Result<()> {
        let mut registered = 0usize;
        for provider in providers {
            let id = provider.identifier().to_string();
            if !provider.validate_config() {
                error!(
                    provider_identifier = %id,
                    "Provider configuration invalid, skipping registration"
                );
                continue;
            }
            let health = provider.health_check().await;
            match self.registry.register(&id, provider, health).await {
                Ok(()) => registered += 1,
                Err(e) => {
                    error!(provider_identifier = %id, error = %e, "Provider registration failed");
                }
            }
        }

        if registered == 0 {
            return Err(Error::ConfigurationInvalid {
                section: "providers",
                field: "enabled",
                reason: "no providers passed validation and health checks".to_string(),
            });
        }
        info!(registered, "Notification providers initialized");
        Ok(())
    }

    /// Run until the shutdown signal fires. Spawns the PID-file monitor and
    /// consumes its lifecycle events.
    pub async fn run(&mut self) -> Result<()> {
        let monitor = LifecycleMonitor::new(self.pid_file.clone(), self.pid_check_interval);
        let (events, monitor_handle) = monitor.spawn(self.shared.shutdown.clone());

        let result = self.run_event_loop(events).await;

        monitor_handle.abort();
        let _ = monitor_handle.await;
        result
    }

    /// Event-loop core, driven by an externally supplied event stream.
    pub async fn run_event_loop(
        &mut self,
        mut events: mpsc::Receiver<MoverLifecycleEvent>,
    ) -> Result<()> {
        let mut shutdown = self.shared.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Shutdown requested for orchestrator");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_lifecycle_event(event).await,
                        None => break,
                    }
                }
            }
        }
        self.finalize_cycle().await;
        Ok(())
    }

    async fn handle_lifecycle_event(&mut self, event: MoverLifecycleEvent) {
        info!(
            previous_state = event.previous_state.as_str(),
            new_state = event.new_state.as_str(),
            pid = event.pid,
            "Lifecycle transition detected"
        );
        match event.new_state {
            MoverState::Started => self.on_mover_started(event).await,
            MoverState::Completed => self.on_mover_completed().await,
            MoverState::Waiting => {
                let mut state = self.shared.state.write().await;
                if state.lifecycle != MoverState::Waiting {
                    state.lifecycle = MoverState::Waiting;
                }
            }
            MoverState::Monitoring => {}
        }
    }

    async fn on_mover_started(&mut self, event: MoverLifecycleEvent) {
        if self.shared.state.read().await.baseline.is_some() {
            debug!("Baseline already captured, ignoring duplicate STARTED event");
            return;
        }

        let baseline = match self
            .shared
            .sampler
            .capture_baseline(&self.shared.monitored_paths, &self.shared.exclusion_paths)
            .await
        {
            Ok(baseline) => baseline,
            Err(e) => {
                error!(error = %e, "Baseline capture failed, cycle not started");
                self.shared.state.write().await.lifecycle = MoverState::Waiting;
                return;
            }
        };

        let cycle_id = Uuid::new_v4().simple().to_string();
        {
            let mut state = self.shared.state.write().await;
            state.baseline = Some(baseline.clone());
            state.samples = vec![baseline.clone()];
            state.latest_progress = None;
            state.notified_thresholds.clear();
            state.lifecycle = MoverState::Monitoring;
            state.cycle_id = Some(cycle_id.clone());
            state.current_pid = event.pid;
        }
        info!(
            correlation_id = %cycle_id,
            pid = event.pid,
            baseline_bytes = baseline.bytes_used,
            "Mover cycle started"
        );

        let mut data = build_notification(EventType::Started, None, &baseline, &cycle_id);
        let results = self.shared.dispatcher.dispatch(&mut data).await;
        log_dispatch_outcome("started", &cycle_id, &results);

        self.sampling_task = Some(tokio::spawn(sampling_loop(
            Arc::clone(&self.shared),
            cycle_id,
        )));
    }

    async fn on_mover_completed(&mut self) {
        let (baseline, latest_progress, cycle_id) = {
            let state = self.shared.state.read().await;
            (
                state.baseline.clone(),
                state.latest_progress.clone(),
                state.cycle_id.clone(),
            )
        };

        let (Some(baseline), Some(cycle_id)) = (baseline, cycle_id) else {
            info!("Received COMPLETED event with no active baseline, ignoring");
            self.shared.state.write().await.lifecycle = MoverState::Waiting;
            return;
        };

        self.shared.state.write().await.lifecycle = MoverState::Completed;
        self.stop_sampling_task().await;

        if self.completion_enabled {
            let mut data = build_notification(
                EventType::Completed,
                latest_progress.as_ref(),
                &baseline,
                &cycle_id,
            );
            let results = self.shared.dispatcher.dispatch(&mut data).await;
            log_dispatch_outcome("completed", &cycle_id, &results);
        }

        self.shared.state.write().await.reset();
    }

    async fn stop_sampling_task(&mut self) {
        if let Some(task) = self.sampling_task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    async fn finalize_cycle(&mut self) {
        self.stop_sampling_task().await;
        self.shared.state.write().await.reset();
    }
}

/// Per-cycle sampling task. Exits when the shutdown signal fires or the
/// tagged cycle is no longer the active one.
async fn sampling_loop(shared: Arc<Shared>, cycle_id: String) {
    let mut shutdown = shared.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(shared.sampling_interval) => {}
        }
        if *shutdown.borrow() {
            break;
        }
        {
            let state = shared.state.read().await;
            if state.cycle_id.as_deref() != Some(cycle_id.as_str()) {
                break;
            }
        }
        if let Err(e) = record_sample(&shared, &cycle_id).await {
            warn!(
                error = %e,
                correlation_id = %cycle_id,
                "Sample capture failed, skipping tick"
            );
        }
    }
}

/// One sampling tick: capture, recompute progress, fire at most one
/// threshold notification.
async fn record_sample(shared: &Arc<Shared>, cycle_id: &str) -> Result<()> {
    let sample = shared
        .sampler
        .sample_current(&shared.monitored_paths, &shared.exclusion_paths)
        .await?;

    let fired = {
        let mut state = shared.state.write().await;
        if state.cycle_id.as_deref() != Some(cycle_id) {
            return Ok(());
        }
        let Some(baseline) = state.baseline.clone() else {
            return Ok(());
        };

        state.samples.push(sample.clone());
        let data = progress::calculate_progress_data(
            baseline.bytes_used,
            sample.bytes_used,
            &state.samples,
            shared.rate_window,
        )?;
        state.latest_progress = Some(data.clone());

        let threshold = progress::evaluate_threshold_crossed(
            data.percent,
            &shared.thresholds,
            &state.notified_thresholds,
        );
        if let Some(threshold) = threshold {
            state.notified_thresholds.push(threshold);
        }
        threshold.map(|threshold| (threshold, data, baseline))
    };

    if let Some((threshold, data, baseline)) = fired {
        let mut notification =
            build_notification(EventType::Progress, Some(&data), &baseline, cycle_id);
        let results = shared.dispatcher.dispatch(&mut notification).await;
        info!(
            correlation_id = %cycle_id,
            threshold_percent = threshold,
            current_percent = data.percent,
            providers_notified = results.len(),
            successful_deliveries = results.iter().filter(|r| r.success).count(),
            "Dispatched progress threshold notification"
        );
    }
    Ok(())
}

/// Build the human-formatted payload for one event. Without progress data
/// (cycle start, or completion before the first tick) the payload shows zero
/// progress against the baseline.
fn build_notification(
    event_type: EventType,
    data: Option<&ProgressData>,
    baseline: &DiskSample,
    cycle_id: &str,
) -> NotificationData {
    match data {
        Some(data) => NotificationData {
            event_type,
            percent: data.percent,
            remaining_data: format_size(data.remaining_bytes),
            moved_data: format_size(data.moved_bytes),
            total_data: format_size(data.total_bytes),
            rate: format_rate(data.rate_bytes_per_second),
            etc_timestamp: data.etc,
            correlation_id: cycle_id.to_string(),
        },
        None => NotificationData {
            event_type,
            percent: 0.0,
            remaining_data: format_size(baseline.bytes_used),
            moved_data: format_size(0),
            total_data: format_size(baseline.bytes_used),
            rate: format_rate(0.0),
            etc_timestamp: None,
            correlation_id: cycle_id.to_string(),
        },
    }
}

fn log_dispatch_outcome(
    event: &str,
    cycle_id: &str,
    results: &[crate::provider::NotificationResult],
) {
    info!(
        correlation_id = %cycle_id,
        event_type = event,
        providers_notified = results.len(),
        successful_deliveries = results.iter().filter(|r| r.success).count(),
        "Dispatched mover notification"
    );
}
