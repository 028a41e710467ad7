use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch, Semaphore};

use crate::controller::updates::AppStateUpdate;
use crate::errors::{Error, Result};
use crate::metrics;
use crate::utils::application_key;

/// An application waiting to have its driver launched
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    pub name: String,
    pub namespace: String,
    pub app_id: String,
}

impl Submission {
    pub fn key(&self) -> String {
        application_key(&self.namespace, &self.name)
    }
}

/// Launches the driver workload of a submission
pub trait Submitter: Send + Sync {
    fn submit<'a>(&'a self, submission: &'a Submission) -> BoxFuture<'a, Result<()>>;
}

/// What enqueueing does when the submission queue is full
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueuePolicy {
    Block,
    FailFast,
}

/// Handle used by the reconciliation loop to hand submissions to the worker pool
#[derive(Clone)]
pub struct SubmissionRunner {
    queue: mpsc::Sender<Submission>,
    policy: QueuePolicy,
}

/// Create a runner and the receiving end its workers drain.
pub fn submission_channel(capacity: usize, policy: QueuePolicy) -> (SubmissionRunner, mpsc::Receiver<Submission>) {
    let (queue, receiver) = mpsc::channel(capacity);
    (SubmissionRunner { queue, policy }, receiver)
}

impl SubmissionRunner {
    pub async fn enqueue(&self, submission: Submission) -> Result<()> {
        match self.policy {
            QueuePolicy::Block => self
                .queue
                .send(submission)
                .await
                .map_err(|_| Error::SubmissionQueueClosed),
            QueuePolicy::FailFast => self.queue.try_send(submission).map_err(|err| match err {
                mpsc::error::TrySendError::Full(submission) => Error::SubmissionQueueFull(submission.key()),
                mpsc::error::TrySendError::Closed(_) => Error::SubmissionQueueClosed,
            }),
        }
    }
}

/// Drain `submissions` with at most `workers` launches in flight.
///
/// Launch failures are not retried here; each one is reported on `updates` as a
/// `FailedSubmission` so the reconciliation loop applies the retry policy.
pub async fn run_workers(
    mut submissions: mpsc::Receiver<Submission>,
    workers: usize,
    submitter: Arc<dyn Submitter>,
    updates: mpsc::Sender<AppStateUpdate>,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(workers));
    info!("Starting {} submission workers", workers);

    loop {
        let submission = tokio::select! {
            submission = submissions.recv() => match submission {
                Some(submission) => submission,
                None => break,
            },
            _ = shutdown.changed() => break,
        };

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let submitter = submitter.clone();
        let updates = updates.clone();
        tokio::spawn(async move {
            let failure = {
                let _permit = permit;
                run_submission(submitter.as_ref(), &submission).await
            };
            // Reported without holding a permit, so a busy loop cannot stall the pool
            if let Some(update) = failure {
                if updates.send(update).await.is_err() {
                    warn!("Dropping submission failure of '{}', the controller has stopped", submission.key());
                }
            }
        });
    }

    info!("Submission workers stopped");
}

async fn run_submission(submitter: &dyn Submitter, submission: &Submission) -> Option<AppStateUpdate> {
    debug!("Submitting '{}' with id {}", submission.key(), submission.app_id);
    match submitter.submit(submission).await {
        Ok(()) => {
            info!("Submitted '{}'", submission.key());
            metrics::submission_happened("succeeded");
            None
        }
        Err(err) => {
            error!("Failed to submit '{}': {}", submission.key(), err);
            metrics::submission_happened("failed");
            Some(AppStateUpdate::failed_submission(
                &submission.namespace,
                &submission.name,
                err.to_string(),
            ))
        }
    }
}
