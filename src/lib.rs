use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::Api,
    runtime::reflector::{store::Writer, Store},
    Client,
};
use log::info;
use serde::Deserialize;
use tokio::{sync::watch, task::JoinHandle};

pub mod controller;
pub mod crd;
pub mod errors;
pub mod metrics;
pub mod submission_job;
pub mod utils;
pub mod views;

use crate::controller::{
    recorder::KubeRecorder,
    store::KubeStore,
    submission::{self, QueuePolicy},
    updates::state_update_channels,
    SparkApplicationController, WorkQueue,
};
use crate::crd::{pod::monitor_pods, spark_application::load_spark_application_resource};
use crate::errors::Error;
pub use crd::spark_application::SparkApplication;
pub use submission_job::{JobSubmitter, SubmissionJob};

pub const CONTROLLER_NAME: &str = "spark-app-controller";

fn default_submission_workers() -> usize {
    3
}
fn default_submission_queue_capacity() -> usize {
    64
}
fn default_submission_queue_blocking() -> bool {
    true
}
fn default_update_channel_capacity() -> usize {
    16
}
fn default_submission_image() -> String {
    "gcr.io/spark-operator/spark-submit:latest".to_owned()
}
fn default_server_host() -> String {
    "0.0.0.0".to_owned()
}
fn default_server_port() -> u16 {
    8888
}

/// Settings read from the process environment
#[derive(Deserialize, Debug, Clone)]
pub struct ControllerEnvironmentConfig {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_submission_workers")]
    pub submission_workers: usize,
    #[serde(default = "default_submission_queue_capacity")]
    pub submission_queue_capacity: usize,
    #[serde(default = "default_submission_queue_blocking")]
    pub submission_queue_blocking: bool,
    #[serde(default = "default_update_channel_capacity")]
    pub update_channel_capacity: usize,
    #[serde(default = "default_submission_image")]
    pub submission_image: String,
    #[serde(default)]
    pub submission_service_account: Option<String>,
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

impl Default for ControllerEnvironmentConfig {
    fn default() -> Self {
        ControllerEnvironmentConfig {
            namespace: None,
            submission_workers: default_submission_workers(),
            submission_queue_capacity: default_submission_queue_capacity(),
            submission_queue_blocking: default_submission_queue_blocking(),
            update_channel_capacity: default_update_channel_capacity(),
            submission_image: default_submission_image(),
            submission_service_account: None,
            server_host: default_server_host(),
            server_port: default_server_port(),
        }
    }
}

impl ControllerEnvironmentConfig {
    pub fn from_env() -> Result<Self, Error> {
        Ok(envy::from_env::<ControllerEnvironmentConfig>()?)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: Option<String>,
    pub submission_workers: usize,
    pub submission_queue_capacity: usize,
    pub submission_queue_policy: QueuePolicy,
    pub update_channel_capacity: usize,
    pub submission_image: String,
    pub submission_service_account: Option<String>,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env_config(env_config: ControllerEnvironmentConfig) -> Result<Self, Error> {
        if env_config.submission_workers == 0 {
            return Err(Error::InvalidConfig("SUBMISSION_WORKERS must be at least 1".to_owned()));
        }
        if env_config.submission_queue_capacity == 0 {
            return Err(Error::InvalidConfig("SUBMISSION_QUEUE_CAPACITY must be at least 1".to_owned()));
        }
        if env_config.update_channel_capacity == 0 {
            return Err(Error::InvalidConfig("UPDATE_CHANNEL_CAPACITY must be at least 1".to_owned()));
        }
        if env_config.submission_image.is_empty() {
            return Err(Error::InvalidConfig("SUBMISSION_IMAGE is empty".to_owned()));
        }

        let submission_queue_policy = if env_config.submission_queue_blocking {
            QueuePolicy::Block
        } else {
            QueuePolicy::FailFast
        };
        Ok(Config {
            namespace: env_config.namespace.filter(|namespace| !namespace.is_empty()),
            submission_workers: env_config.submission_workers,
            submission_queue_capacity: env_config.submission_queue_capacity,
            submission_queue_policy,
            update_channel_capacity: env_config.update_channel_capacity,
            submission_image: env_config.submission_image,
            submission_service_account: env_config.submission_service_account.filter(|account| !account.is_empty()),
            server_host: env_config.server_host,
            server_port: env_config.server_port,
        })
    }
}

/// A running controller: its cache of applications and the means to stop it
pub struct ControllerHandle {
    pub applications: Store<SparkApplication>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ControllerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for the reconciliation loop, the watchers and the submission workers to return.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                log::error!("Controller task failed: {}", err);
            }
        }
    }
}

/// Start watching applications and pods, the submission workers and the reconciliation loop.
pub async fn init_controller(client: Client, config: Config) -> ControllerHandle {
    info!("Starting controller with config: {:?}", config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer = Writer::<SparkApplication>::default();
    let applications = writer.as_reader();

    let store = Arc::new(KubeStore::new(client.clone(), applications.clone()));
    let recorder = Arc::new(KubeRecorder::new(client.clone(), CONTROLLER_NAME));
    let (runner, submissions) =
        submission::submission_channel(config.submission_queue_capacity, config.submission_queue_policy);
    let (senders, receivers) = state_update_channels(config.update_channel_capacity);

    let controller = Arc::new(SparkApplicationController::new(store, recorder, WorkQueue::new(), runner));

    let submitter = Arc::new(JobSubmitter::new(
        client.clone(),
        config.submission_image.clone(),
        config.submission_service_account.clone(),
    ));
    let workers = tokio::spawn(submission::run_workers(
        submissions,
        config.submission_workers,
        submitter,
        senders.application.clone(),
        shutdown_rx.clone(),
    ));

    let app_resource = load_spark_application_resource(&client, config.namespace.as_deref());
    let app_watch = tokio::spawn(crd::spark_application::monitor_spark_applications(
        app_resource,
        writer,
        controller.clone(),
        shutdown_rx.clone(),
    ));

    let pods: Api<Pod> = match config.namespace.as_deref() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };
    let pod_watch = tokio::spawn(monitor_pods(pods, senders.clone(), shutdown_rx.clone()));

    let reconciler = {
        let controller = controller.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { controller.run(receivers, senders, shutdown).await })
    };

    ControllerHandle {
        applications,
        shutdown: shutdown_tx,
        tasks: vec![reconciler, app_watch, pod_watch, workers],
    }
}
