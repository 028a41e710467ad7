use std::fmt::Debug;
use std::time::Duration;

use log::warn;
use tokio::sync::mpsc;

use crate::crd::spark_application::{ApplicationStateType, ExecutorState};

/// Observed phase change of a driver pod
#[derive(Clone, Debug, PartialEq)]
pub struct DriverStateUpdate {
    pub app_name: String,
    pub app_namespace: String,
    pub app_id: String,
    pub pod_name: String,
    pub node_name: Option<String>,
    pub pod_phase: String,
}

/// Observed state change of an executor pod
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutorStateUpdate {
    pub app_name: String,
    pub app_namespace: String,
    pub app_id: String,
    pub pod_name: String,
    pub executor_id: String,
    pub state: ExecutorState,
}

/// Requested transition of an application's overall state
#[derive(Clone, Debug, PartialEq)]
pub struct AppStateUpdate {
    pub namespace: String,
    pub name: String,
    pub state: ApplicationStateType,
    pub error_message: Option<String>,
}

impl AppStateUpdate {
    pub fn failed_submission(namespace: &str, name: &str, error_message: String) -> Self {
        AppStateUpdate {
            namespace: namespace.to_string(),
            name: name.to_string(),
            state: ApplicationStateType::FailedSubmission,
            error_message: Some(error_message),
        }
    }
}

/// Producer side of the update channels drained by the reconciliation loop
#[derive(Clone)]
pub struct StateUpdateSenders {
    pub driver: mpsc::Sender<DriverStateUpdate>,
    pub executor: mpsc::Sender<ExecutorStateUpdate>,
    pub application: mpsc::Sender<AppStateUpdate>,
}

pub struct StateUpdateReceivers {
    pub driver: mpsc::Receiver<DriverStateUpdate>,
    pub executor: mpsc::Receiver<ExecutorStateUpdate>,
    pub application: mpsc::Receiver<AppStateUpdate>,
}

pub fn state_update_channels(capacity: usize) -> (StateUpdateSenders, StateUpdateReceivers) {
    let (driver_tx, driver_rx) = mpsc::channel(capacity);
    let (executor_tx, executor_rx) = mpsc::channel(capacity);
    let (application_tx, application_rx) = mpsc::channel(capacity);
    (
        StateUpdateSenders {
            driver: driver_tx,
            executor: executor_tx,
            application: application_tx,
        },
        StateUpdateReceivers {
            driver: driver_rx,
            executor: executor_rx,
            application: application_rx,
        },
    )
}

/// Feed `update` back to the loop after `delay`. Returns `false` when the loop has stopped.
pub async fn redeliver_after<T: Debug>(sender: mpsc::Sender<T>, update: T, delay: Duration) -> bool {
    tokio::time::sleep(delay).await;
    match sender.send(update).await {
        Ok(()) => true,
        Err(err) => {
            warn!("Dropping {:?}, the controller has stopped", err.0);
            false
        }
    }
}
