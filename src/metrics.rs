use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::crd::spark_application::ApplicationStateType;
use lazy_static::lazy_static;

pub const METRICS_NAMESPACE: &str = "spark_app_controller";

lazy_static! {
    pub static ref KUBE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("kube_errors", "spark-app-controller k8s related errors").namespace(METRICS_NAMESPACE),
        &["action", "kube_name"]
    )
    .unwrap();
    pub static ref ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("errors", "spark-app-controller errors").namespace(METRICS_NAMESPACE),
        &["name"]
    )
    .unwrap();
    pub static ref SUBMISSIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("submissions", "driver submissions by result").namespace(METRICS_NAMESPACE),
        &["result"]
    )
    .unwrap();
    pub static ref STATE_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("state_transitions", "application state transitions by new state").namespace(METRICS_NAMESPACE),
        &["state"]
    )
    .unwrap();
    pub static ref SUBMISSION_RETRIES: IntCounter = IntCounter::with_opts(
        Opts::new("submission_retries", "scheduled submission retries").namespace(METRICS_NAMESPACE)
    )
    .unwrap();
    pub static ref RESTARTS: IntCounter =
        IntCounter::with_opts(Opts::new("restarts", "application restarts").namespace(METRICS_NAMESPACE)).unwrap();
}

pub fn custom_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(KUBE_ERRORS.clone()))?;
    registry.register(Box::new(ERRORS.clone()))?;
    registry.register(Box::new(SUBMISSIONS.clone()))?;
    registry.register(Box::new(STATE_TRANSITIONS.clone()))?;
    registry.register(Box::new(SUBMISSION_RETRIES.clone()))?;
    registry.register(Box::new(RESTARTS.clone()))?;
    Ok(())
}

pub fn kube_error_name(err: &kube::Error) -> &'static str {
    match err {
        kube::Error::Api(_) => "api",
        kube::Error::HyperError(_) => "hyper_error",
        kube::Error::HttpError(_) => "http_error",
        kube::Error::SerdeError(_) => "serde_error",
        _ => "other",
    }
}

pub fn kube_error_happened(action: &str, err: &kube::Error) {
    KUBE_ERRORS.with_label_values(&[action, kube_error_name(err)]).inc();
}

pub fn error_happened(name: &str) {
    ERRORS.with_label_values(&[name]).inc();
}

pub fn submission_happened(result: &str) {
    SUBMISSIONS.with_label_values(&[result]).inc();
}

pub fn state_transition(state: ApplicationStateType) {
    STATE_TRANSITIONS.with_label_values(&[state.as_str()]).inc();
}

pub fn submission_retry_happened() {
    SUBMISSION_RETRIES.inc();
}

pub fn restart_happened() {
    RESTARTS.inc();
}
