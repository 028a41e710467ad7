//! Reconciliation of `SparkApplication` status.
//!
//! [`SparkApplicationController`] is the only writer of application status. Its
//! loop selects over the work queue and the three state-update channels and
//! handles one input at a time, so a given application never has two passes in
//! flight. Watch handlers only record events and enqueue keys.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};

pub mod queue;
pub mod recorder;
pub mod store;
pub mod submission;
pub mod updates;

pub use queue::WorkQueue;
pub use recorder::{EventReason, EventRecorder};
pub use store::ResourceStore;
pub use submission::{Submission, SubmissionRunner};
pub use updates::{AppStateUpdate, DriverStateUpdate, ExecutorStateUpdate, StateUpdateReceivers, StateUpdateSenders};

use crate::crd::pod::driver_phase_to_application_state;
use crate::crd::spark_application::{print_status, ApplicationStateType, SparkApplication, SparkApplicationStatus};
use crate::errors::{Error, Result};
use crate::metrics;
use crate::utils::{app_key, app_name, app_namespace, get_revision, now, split_key};

/// Delay before an update whose status write failed is fed back to the loop
const REDELIVERY_DELAY: Duration = Duration::from_secs(5);

pub struct SparkApplicationController {
    store: Arc<dyn ResourceStore>,
    recorder: Arc<dyn EventRecorder>,
    queue: WorkQueue,
    runner: SubmissionRunner,
}

impl SparkApplicationController {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        recorder: Arc<dyn EventRecorder>,
        queue: WorkQueue,
        runner: SubmissionRunner,
    ) -> Self {
        SparkApplicationController {
            store,
            recorder,
            queue,
            runner,
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn on_add(&self, app: &SparkApplication) {
        let key = app_key(app);
        info!("SparkApplication '{}' was added, enqueueing it for submission", key);
        self.recorder.record(
            app,
            EventReason::Submission,
            format!("SparkApplication {} was added, enqueued it for submission", app_name(app)),
        );
        self.queue.add(&key);
    }

    /// Only spec changes are acted on; status-only updates are the controller's own writes.
    pub fn on_update(&self, old: &SparkApplication, new: &SparkApplication) {
        if old.spec == new.spec {
            return;
        }

        let key = app_key(new);
        info!("SparkApplication '{}' was updated, enqueueing it for reconciliation", key);
        self.recorder.record(
            new,
            EventReason::Submission,
            format!("SparkApplication {} was updated, enqueued it for reconciliation", app_name(new)),
        );
        self.queue.add(&key);
    }

    pub fn on_delete(&self, app: &SparkApplication) {
        info!("SparkApplication '{}' was deleted", app_key(app));
        self.recorder.record(
            app,
            EventReason::Deletion,
            format!("SparkApplication {} was deleted", app_name(app)),
        );
    }

    /// Reconcile until `shutdown` fires or every input is exhausted.
    pub async fn run(
        &self,
        mut updates: StateUpdateReceivers,
        redeliver: StateUpdateSenders,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Starting SparkApplication reconciliation loop");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                key = self.queue.get() => match key {
                    Some(key) => self.process_key(key).await,
                    None => break,
                },
                Some(update) = updates.driver.recv() => {
                    if let Err(err) = self.process_single_driver_state_update(&update).await {
                        self.on_update_failure("driver_state_update", &err, update, &redeliver.driver);
                    }
                }
                Some(update) = updates.executor.recv() => {
                    if let Err(err) = self.process_single_executor_state_update(&update).await {
                        self.on_update_failure("executor_state_update", &err, update, &redeliver.executor);
                    }
                }
                Some(update) = updates.application.recv() => {
                    if let Err(err) = self.process_single_app_state_update(&update).await {
                        self.on_update_failure("app_state_update", &err, update, &redeliver.application);
                    }
                }
                else => break,
            }
        }

        self.queue.shut_down();
        info!("SparkApplication reconciliation loop stopped");
    }

    fn on_update_failure<T: std::fmt::Debug + Send + 'static>(
        &self,
        action: &str,
        err: &Error,
        update: T,
        redeliver: &mpsc::Sender<T>,
    ) {
        metrics::error_happened(action);
        if !err.is_retryable() || self.queue.is_shutting_down() {
            error!("Dropping {:?} after error: {}", update, err);
            return;
        }

        warn!("Redelivering {:?} after error: {}", update, err);
        let redeliver = redeliver.clone();
        tokio::spawn(updates::redeliver_after(redeliver, update, REDELIVERY_DELAY));
    }

    /// Take one key off the work queue and reconcile it. Returns `false` once the queue is shut down.
    pub async fn process_next_item(&self) -> bool {
        match self.queue.get().await {
            Some(key) => {
                self.process_key(key).await;
                true
            }
            None => false,
        }
    }

    async fn process_key(&self, key: String) {
        match self.sync_application(&key).await {
            Ok(()) => self.queue.forget(&key),
            Err(err) if err.is_retryable() => {
                error!("Failed to reconcile '{}', requeueing: {}", key, err);
                metrics::error_happened("sync_application");
                self.queue.add_rate_limited(&key);
            }
            Err(err) => {
                error!("Failed to reconcile '{}', dropping it: {}", key, err);
                metrics::error_happened("sync_application");
                self.queue.forget(&key);
            }
        }
        self.queue.done(&key);
    }

    async fn sync_application(&self, key: &str) -> Result<()> {
        let (namespace, name) = split_key(key)?;
        // The cache may not hold our latest status write yet
        let app = match self.store.fetch(&namespace, &name).await? {
            Some(app) => app,
            None => {
                debug!("SparkApplication '{}' no longer exists, dropping it", key);
                return Ok(());
            }
        };

        if should_submit(&app) {
            self.submit_app(&app).await?;
        }
        Ok(())
    }

    /// Record a fresh submission attempt on the application and hand it to the runner.
    pub async fn submit_app(&self, app: &SparkApplication) -> Result<()> {
        let name = app_name(app);
        let namespace = app_namespace(app);
        let revision = get_revision();
        let app_id = format!("{}-{}", name, revision);
        let submission_id = format!("{}-submission-{}", name, revision);

        let submitted_id = app_id.clone();
        let updated = self
            .store
            .update_status(
                app,
                Box::new(move |status: &mut SparkApplicationStatus| {
                    status.spark_application_id = submitted_id.clone();
                    status.submission_id = submission_id.clone();
                    status.last_submission_attempt_time = Some(now());
                    status.termination_time = None;
                    status.driver_info = Default::default();
                    status.executor_state.clear();
                    status.application_state.state = ApplicationStateType::Submitted;
                    status.application_state.error_message = None;
                }),
            )
            .await?;
        metrics::state_transition(ApplicationStateType::Submitted);
        log_status(&updated);

        info!("Enqueueing '{}' for submission with id {}", app_key(app), app_id);
        let submission = Submission {
            name: name.clone(),
            namespace: namespace.clone(),
            app_id,
        };
        if let Err(err) = self.runner.enqueue(submission).await {
            let update = AppStateUpdate::failed_submission(&namespace, &name, err.to_string());
            self.handle_failed_submission(&updated, &update).await?;
        }
        Ok(())
    }

    pub async fn process_single_driver_state_update(&self, update: &DriverStateUpdate) -> Result<()> {
        let app = match self.store.get(&update.app_namespace, &update.app_name) {
            Some(app) => app,
            None => {
                debug!("Dropping driver update of unknown application '{}/{}'", update.app_namespace, update.app_name);
                return Ok(());
            }
        };

        let status = app.status.clone().unwrap_or_default();
        if status.spark_application_id != update.app_id {
            debug!(
                "Dropping stale driver update of '{}' for id {}, current id is {}",
                app_key(&app),
                update.app_id,
                status.spark_application_id
            );
            return Ok(());
        }

        let new_state = match driver_phase_to_application_state(&update.pod_phase) {
            Some(state) => state,
            None => {
                debug!("Ignoring driver pod {} in phase {}", update.pod_name, update.pod_phase);
                return Ok(());
            }
        };
        if status.application_state.state == new_state {
            return Ok(());
        }

        info!(
            "SparkApplication '{}' moved from {} to {} (driver pod {})",
            app_key(&app),
            status.application_state.state,
            new_state,
            update.pod_name
        );
        let updated = self
            .store
            .update_status(
                &app,
                Box::new(|status: &mut SparkApplicationStatus| {
                    status.application_state.state = new_state;
                    status.application_state.error_message = None;
                    status.driver_info.pod_name = Some(update.pod_name.clone());
                    status.driver_info.node_name = update.node_name.clone();
                    if new_state.is_terminated() {
                        status.termination_time = Some(now());
                    }
                }),
            )
            .await?;
        metrics::state_transition(new_state);
        log_status(&updated);

        if new_state.is_terminated() {
            self.record_termination(&updated, new_state);
            self.handle_restart(&updated).await?;
        }
        Ok(())
    }

    /// Terminal executor states stick: a late non-terminal update never overwrites them.
    pub async fn process_single_executor_state_update(&self, update: &ExecutorStateUpdate) -> Result<()> {
        let app = match self.store.get(&update.app_namespace, &update.app_name) {
            Some(app) => app,
            None => {
                debug!("Dropping executor update of unknown application '{}/{}'", update.app_namespace, update.app_name);
                return Ok(());
            }
        };

        let status = app.status.clone().unwrap_or_default();
        if status.spark_application_id != update.app_id {
            debug!("Dropping stale executor update of '{}' for id {}", app_key(&app), update.app_id);
            return Ok(());
        }

        match status.executor_state.get(&update.pod_name) {
            Some(current) if *current == update.state => return Ok(()),
            Some(current) if current.is_terminated() && !update.state.is_terminated() => {
                debug!(
                    "Ignoring {:?} for executor {} of '{}', it already ended as {:?}",
                    update.state,
                    update.pod_name,
                    app_key(&app),
                    current
                );
                return Ok(());
            }
            _ => {}
        }

        self.store
            .update_status(
                &app,
                Box::new(|status: &mut SparkApplicationStatus| {
                    let sticky = status
                        .executor_state
                        .get(&update.pod_name)
                        .map(|current| current.is_terminated() && !update.state.is_terminated())
                        .unwrap_or(false);
                    if !sticky {
                        status.executor_state.insert(update.pod_name.clone(), update.state);
                    }
                }),
            )
            .await?;
        debug!("Executor {} of '{}' is now {:?}", update.executor_id, app_key(&app), update.state);
        Ok(())
    }

    pub async fn process_single_app_state_update(&self, update: &AppStateUpdate) -> Result<()> {
        let app = match self.store.get(&update.namespace, &update.name) {
            Some(app) => app,
            None => {
                debug!("Dropping state update of unknown application '{}/{}'", update.namespace, update.name);
                return Ok(());
            }
        };

        if update.state == ApplicationStateType::FailedSubmission {
            return self.handle_failed_submission(&app, update).await;
        }

        let status = app.status.clone().unwrap_or_default();
        if status.application_state.state == update.state && status.application_state.error_message == update.error_message {
            return Ok(());
        }

        let updated = self
            .store
            .update_status(
                &app,
                Box::new(|status: &mut SparkApplicationStatus| {
                    status.application_state.state = update.state;
                    status.application_state.error_message = update.error_message.clone();
                    if update.state.is_terminated() {
                        status.termination_time = Some(now());
                    }
                }),
            )
            .await?;
        metrics::state_transition(update.state);
        log_status(&updated);

        if update.state.is_terminated() {
            self.record_termination(&updated, update.state);
            self.handle_restart(&updated).await?;
        }
        Ok(())
    }

    async fn handle_failed_submission(&self, app: &SparkApplication, update: &AppStateUpdate) -> Result<()> {
        let key = app_key(app);
        let max_retries = app.spec.max_submission_retries.unwrap_or(0);
        let updated = self
            .store
            .update_status(
                app,
                Box::new(|status: &mut SparkApplicationStatus| {
                    status.application_state.state = ApplicationStateType::FailedSubmission;
                    status.application_state.error_message = update.error_message.clone();
                    status.submission_retries += 1;
                }),
            )
            .await?;
        metrics::state_transition(ApplicationStateType::FailedSubmission);
        log_status(&updated);

        let failures = updated.status.as_ref().map(|status| status.submission_retries).unwrap_or(0);
        self.recorder.record(
            &updated,
            EventReason::SubmissionFailure,
            format!(
                "SparkApplication {} failed submission: {}",
                app_name(app),
                update.error_message.as_deref().unwrap_or("unknown error")
            ),
        );

        if failures > max_retries {
            warn!("SparkApplication '{}' failed submission {} times, giving up", key, failures);
            return Ok(());
        }

        let interval = Duration::from_secs(app.spec.submission_retry_interval.unwrap_or(0).max(0) as u64);
        info!(
            "Retrying submission of '{}' in {:?} (retry {} of {})",
            key, interval, failures, max_retries
        );
        self.recorder.record(
            &updated,
            EventReason::SubmissionRetry,
            format!(
                "SparkApplication {} will be resubmitted in {} seconds (retry {} of {})",
                app_name(app),
                interval.as_secs(),
                failures,
                max_retries
            ),
        );
        metrics::submission_retry_happened();
        self.queue.add_after(&key, interval);
        Ok(())
    }

    /// Put a terminated application back to `New` and submit it again when its restart policy asks for it.
    pub async fn handle_restart(&self, app: &SparkApplication) -> Result<()> {
        let state = app
            .status
            .as_ref()
            .map(|status| status.application_state.state)
            .unwrap_or_default();
        if !state.is_terminated() || !app.spec.restart_policy.should_restart(state) {
            return Ok(());
        }

        let key = app_key(app);
        info!("Restarting SparkApplication '{}' which ended as {}", key, state);
        self.recorder.record(
            app,
            EventReason::Restart,
            format!("SparkApplication {} is being restarted after it ended as {}", app_name(app), state),
        );

        let updated = self
            .store
            .update_status(
                app,
                Box::new(|status: &mut SparkApplicationStatus| {
                    let last_attempt = status.last_submission_attempt_time.take();
                    *status = SparkApplicationStatus {
                        last_submission_attempt_time: last_attempt,
                        ..Default::default()
                    };
                }),
            )
            .await?;
        metrics::restart_happened();
        log_status(&updated);

        self.submit_app(&updated).await
    }

    fn record_termination(&self, app: &SparkApplication, state: ApplicationStateType) {
        self.recorder.record(
            app,
            EventReason::Termination,
            format!("SparkApplication {} terminated with state: {}", app_name(app), state),
        );
    }
}

/// Whether a queue pass over `app` should launch it: new applications, and
/// failed submissions that still have retries left.
pub fn should_submit(app: &SparkApplication) -> bool {
    let status = app.status.clone().unwrap_or_default();
    match status.application_state.state {
        ApplicationStateType::New => true,
        ApplicationStateType::FailedSubmission => {
            status.submission_retries <= app.spec.max_submission_retries.unwrap_or(0)
        }
        _ => false,
    }
}

fn log_status(app: &SparkApplication) {
    if let Some(status) = &app.status {
        match print_status(status) {
            Ok(rendered) => debug!("Status of '{}':\n{}", app_key(app), rendered),
            Err(err) => warn!("Failed to render status of '{}': {}", app_key(app), err),
        }
    }
}
