use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    runtime::watcher,
};
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::controller::updates::{DriverStateUpdate, ExecutorStateUpdate, StateUpdateSenders};
use crate::crd::spark_application::{ApplicationStateType, ExecutorState};

pub const PENDING: &str = "Pending";
pub const RUNNING: &str = "Running";
pub const SUCCEEDED: &str = "Succeeded";
pub const FAILED: &str = "Failed";
pub const UNKNOWN: &str = "Unknown";

pub const LAUNCHED_BY_OPERATOR_LABEL: &str = "sparkoperator.k8s.io/launched-by-spark-operator";
pub const APP_NAME_LABEL: &str = "sparkoperator.k8s.io/app-name";
pub const APP_ID_LABEL: &str = "sparkoperator.k8s.io/app-id";
pub const SPARK_ROLE_LABEL: &str = "spark-role";
pub const SPARK_EXECUTOR_ID_LABEL: &str = "spark-exec-id";
pub const SPARK_DRIVER_ROLE: &str = "driver";
pub const SPARK_EXECUTOR_ROLE: &str = "executor";

/// Application state implied by a driver pod phase; `None` for phases that say nothing.
pub fn driver_phase_to_application_state(phase: &str) -> Option<ApplicationStateType> {
    match phase {
        SUCCEEDED => Some(ApplicationStateType::Completed),
        FAILED => Some(ApplicationStateType::Failed),
        RUNNING | PENDING => Some(ApplicationStateType::Running),
        _ => None,
    }
}

pub fn executor_phase_to_executor_state(phase: &str) -> ExecutorState {
    match phase {
        PENDING => ExecutorState::Pending,
        RUNNING => ExecutorState::Running,
        SUCCEEDED => ExecutorState::Completed,
        FAILED => ExecutorState::Failed,
        _ => ExecutorState::Unknown,
    }
}

struct SparkPod<'a> {
    app_name: &'a String,
    app_id: &'a String,
    role: &'a String,
    namespace: String,
    pod_name: String,
    phase: String,
}

fn spark_pod(pod: &Pod) -> Option<SparkPod<'_>> {
    let labels = pod.metadata.labels.as_ref()?;
    Some(SparkPod {
        app_name: labels.get(APP_NAME_LABEL)?,
        app_id: labels.get(APP_ID_LABEL)?,
        role: labels.get(SPARK_ROLE_LABEL)?,
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        pod_name: pod.metadata.name.clone()?,
        phase: pod
            .status
            .as_ref()
            .and_then(|status| status.phase.clone())
            .unwrap_or_else(|| UNKNOWN.to_string()),
    })
}

pub fn driver_state_update(pod: &Pod) -> Option<DriverStateUpdate> {
    let spark_pod = spark_pod(pod)?;
    if spark_pod.role != SPARK_DRIVER_ROLE {
        return None;
    }
    Some(DriverStateUpdate {
        app_name: spark_pod.app_name.clone(),
        app_namespace: spark_pod.namespace,
        app_id: spark_pod.app_id.clone(),
        pod_name: spark_pod.pod_name,
        node_name: pod.spec.as_ref().and_then(|spec| spec.node_name.clone()),
        pod_phase: spark_pod.phase,
    })
}

pub fn executor_state_update(pod: &Pod) -> Option<ExecutorStateUpdate> {
    let spark_pod = spark_pod(pod)?;
    if spark_pod.role != SPARK_EXECUTOR_ROLE {
        return None;
    }
    let executor_id = pod.metadata.labels.as_ref()?.get(SPARK_EXECUTOR_ID_LABEL)?.clone();
    Some(ExecutorStateUpdate {
        app_name: spark_pod.app_name.clone(),
        app_namespace: spark_pod.namespace,
        app_id: spark_pod.app_id.clone(),
        pod_name: spark_pod.pod_name,
        executor_id,
        state: executor_phase_to_executor_state(&spark_pod.phase),
    })
}

async fn dispatch_pod(pod: &Pod, deleted: bool, senders: &StateUpdateSenders) {
    if let Some(mut update) = driver_state_update(pod) {
        // A driver that vanishes before finishing takes its application down with it
        if deleted && update.pod_phase != SUCCEEDED {
            update.pod_phase = FAILED.to_string();
        }
        debug!("Driver pod {} is {}", update.pod_name, update.pod_phase);
        if senders.driver.send(update).await.is_err() {
            warn!("Driver update channel closed");
        }
    } else if let Some(update) = executor_state_update(pod) {
        debug!("Executor pod {} is {:?}", update.pod_name, update.state);
        if senders.executor.send(update).await.is_err() {
            warn!("Executor update channel closed");
        }
    }
}

/// Watch the pods launched for Spark applications and feed their states to the controller.
pub async fn monitor_pods(pods: Api<Pod>, senders: StateUpdateSenders, mut shutdown: watch::Receiver<bool>) {
    let params = ListParams::default().labels(&format!("{}=true", LAUNCHED_BY_OPERATOR_LABEL));
    let mut events = watcher(pods, params).boxed();
    info!("Watching Spark pods");

    loop {
        let event = tokio::select! {
            event = events.try_next() => event,
            _ = shutdown.changed() => break,
        };

        match event {
            Ok(Some(watcher::Event::Applied(pod))) => dispatch_pod(&pod, false, &senders).await,
            Ok(Some(watcher::Event::Deleted(pod))) => dispatch_pod(&pod, true, &senders).await,
            Ok(Some(watcher::Event::Restarted(pods))) => {
                for pod in pods.iter() {
                    dispatch_pod(pod, false, &senders).await;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("Failed watching Spark pods: {}", err);
                crate::metrics::error_happened("watch_pods");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }

    info!("Stopped watching Spark pods");
}
