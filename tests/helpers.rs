#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use tokio::sync::mpsc;

use spark_app_controller::controller::recorder::FakeRecorder;
use spark_app_controller::controller::store::{InMemoryStore, ResourceStore, StatusMutation};
use spark_app_controller::controller::submission::{submission_channel, QueuePolicy, Submission};
use spark_app_controller::controller::{SparkApplicationController, WorkQueue};
use spark_app_controller::crd::pod::{
    APP_ID_LABEL, APP_NAME_LABEL, LAUNCHED_BY_OPERATOR_LABEL, SPARK_EXECUTOR_ID_LABEL, SPARK_ROLE_LABEL,
};
use spark_app_controller::crd::spark_application::{
    ApplicationStateType, RestartPolicy, SparkApplication, SparkApplicationSpec, SparkApplicationStatus,
};
use spark_app_controller::errors::Result;
use spark_app_controller::utils::app_key;

pub const NAMESPACE: &str = "default";

// A controller wired to in-memory fakes, plus handles on every fake
pub struct TestController {
    pub controller: SparkApplicationController,
    pub store: Arc<InMemoryStore>,
    pub recorder: Arc<FakeRecorder>,
    pub submissions: mpsc::Receiver<Submission>,
}

impl TestController {
    pub fn queue(&self) -> &WorkQueue {
        self.controller.queue()
    }

    pub fn app(&self, name: &str) -> SparkApplication {
        self.store
            .list()
            .into_iter()
            .find(|app| app.metadata.name.as_deref() == Some(name))
            .expect("application is missing from the store")
    }

    pub fn status(&self, name: &str) -> SparkApplicationStatus {
        self.app(name).status.unwrap_or_default()
    }

    pub fn events(&self) -> Vec<String> {
        self.recorder.events()
    }
}

pub fn test_controller() -> TestController {
    test_controller_with_capacity(16, QueuePolicy::Block)
}

pub fn test_controller_with_capacity(capacity: usize, policy: QueuePolicy) -> TestController {
    let store = Arc::new(InMemoryStore::new());
    let recorder = Arc::new(FakeRecorder::new());
    let (runner, submissions) = submission_channel(capacity, policy);
    let controller = SparkApplicationController::new(store.clone(), recorder.clone(), WorkQueue::new(), runner);
    TestController {
        controller,
        store,
        recorder,
        submissions,
    }
}

// An application with the given policies and no status yet
pub fn spark_app(name: &str, restart_policy: RestartPolicy, max_submission_retries: i32) -> SparkApplication {
    let mut app = SparkApplication::new(
        name,
        SparkApplicationSpec {
            typ: "Scala".to_string(),
            mode: Some("cluster".to_string()),
            image: Some("gcr.io/spark-operator/spark:v3.1.1".to_string()),
            main_class: Some("org.apache.spark.examples.SparkPi".to_string()),
            restart_policy,
            max_submission_retries: Some(max_submission_retries),
            submission_retry_interval: Some(0),
            ..SparkApplicationSpec::default()
        },
    );
    app.metadata.namespace = Some(NAMESPACE.to_string());
    app.metadata.uid = Some(format!("{}-uid", name));
    app
}

pub fn with_status(
    mut app: SparkApplication,
    app_id: &str,
    state: ApplicationStateType,
) -> SparkApplication {
    let mut status = app.status.take().unwrap_or_default();
    status.spark_application_id = app_id.to_string();
    status.application_state.state = state;
    app.status = Some(status);
    app
}

// A pod carrying the labels the controller puts on Spark pods
pub fn spark_pod(name: &str, app_name: &str, app_id: &str, role: &str, phase: Option<&str>) -> Pod {
    let mut labels = BTreeMap::new();
    labels.insert(APP_NAME_LABEL.to_string(), app_name.to_string());
    labels.insert(APP_ID_LABEL.to_string(), app_id.to_string());
    labels.insert(SPARK_ROLE_LABEL.to_string(), role.to_string());
    labels.insert(LAUNCHED_BY_OPERATOR_LABEL.to_string(), "true".to_string());
    if role == "executor" {
        labels.insert(SPARK_EXECUTOR_ID_LABEL.to_string(), "1".to_string());
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-1".to_string()),
            ..PodSpec::default()
        }),
        status: Some(PodStatus {
            phase: phase.map(str::to_string),
            ..PodStatus::default()
        }),
    }
}

// Get one of the repo's demo manifests
pub fn demo_manifest(name: &str) -> Value {
    let manifest = std::fs::read_to_string(format!("{}/demos/{}", env!("CARGO_MANIFEST_DIR"), name))
        .expect("Failed to read demo manifest");
    serde_yaml::from_str(&manifest).expect("Unable to parse demo manifest into yaml")
}

// Writes land in the backing store at once, reads see them only after `sync`,
// the way a watch-fed cache trails the API server
#[derive(Default)]
pub struct LaggingStore {
    pub backing: InMemoryStore,
    cache: Mutex<BTreeMap<String, SparkApplication>>,
}

impl LaggingStore {
    pub fn sync(&self) {
        let latest = self
            .backing
            .list()
            .into_iter()
            .map(|app| (app_key(&app), app))
            .collect();
        *self.cache.lock().unwrap() = latest;
    }

    pub fn status(&self, name: &str) -> SparkApplicationStatus {
        self.backing
            .get(NAMESPACE, name)
            .and_then(|app| app.status)
            .unwrap_or_default()
    }
}

impl ResourceStore for LaggingStore {
    fn get(&self, namespace: &str, name: &str) -> Option<SparkApplication> {
        let key = format!("{}/{}", namespace, name);
        self.cache.lock().unwrap().get(&key).cloned()
    }

    fn fetch<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<Option<SparkApplication>>> {
        self.backing.fetch(namespace, name)
    }

    fn update_status<'a>(
        &'a self,
        app: &'a SparkApplication,
        mutate: StatusMutation<'a>,
    ) -> BoxFuture<'a, Result<SparkApplication>> {
        self.backing.update_status(app, mutate)
    }
}

pub struct LaggingController {
    pub controller: SparkApplicationController,
    pub store: Arc<LaggingStore>,
    pub submissions: mpsc::Receiver<Submission>,
}

// A controller whose reads trail its own status writes
pub fn lagging_controller(app: SparkApplication) -> LaggingController {
    let store = Arc::new(LaggingStore::default());
    store.backing.add(app);
    store.sync();
    let (runner, submissions) = submission_channel(16, QueuePolicy::Block);
    let controller = SparkApplicationController::new(
        store.clone(),
        Arc::new(FakeRecorder::new()),
        WorkQueue::new(),
        runner,
    );
    LaggingController {
        controller,
        store,
        submissions,
    }
}
