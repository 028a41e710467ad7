use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Represents the 'spec' field of a SparkApplication resource
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "sparkoperator.k8s.io",
    version = "v1beta2",
    kind = "SparkApplication",
    shortname = "sparkapp",
    status = "SparkApplicationStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SparkApplicationSpec {
    #[serde(default, rename = "type")]
    pub typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_application_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub spark_conf: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hadoop_conf: BTreeMap<String, String>,
    #[serde(default)]
    pub driver: DriverSpec,
    #[serde(default)]
    pub executor: ExecutorSpec,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    /// How many times a failed submission is retried before giving up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_submission_retries: Option<i32>,
    /// Seconds to wait between a failed submission and its retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_retry_interval: Option<i64>,
}

/// Pod settings shared by the driver and the executors
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SparkPodSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_overhead: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_vars: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverSpec {
    #[serde(flatten)]
    pub pod: SparkPodSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorSpec {
    #[serde(flatten)]
    pub pod: SparkPodSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum RestartPolicy {
    Never,
    OnFailure,
    Always,
}

impl Default for RestartPolicy {
    fn default() -> RestartPolicy {
        RestartPolicy::Never
    }
}

impl RestartPolicy {
    /// Whether an application that ended in `state` gets another run.
    pub fn should_restart(self, state: ApplicationStateType) -> bool {
        match (self, state) {
            (RestartPolicy::Always, ApplicationStateType::Completed) => true,
            (RestartPolicy::Always, ApplicationStateType::Failed) => true,
            (RestartPolicy::OnFailure, ApplicationStateType::Failed) => true,
            _ => false,
        }
    }
}

/// Represents the 'status' field of a SparkApplication resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SparkApplicationStatus {
    #[serde(default)]
    pub spark_application_id: String,
    #[serde(default, rename = "submissionID")]
    pub submission_id: String,
    #[serde(default)]
    pub last_submission_attempt_time: Option<Time>,
    #[serde(default)]
    pub termination_time: Option<Time>,
    #[serde(default)]
    pub driver_info: DriverInfo,
    #[serde(default, rename = "applicationState")]
    pub application_state: ApplicationState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub executor_state: BTreeMap<String, ExecutorState>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub submission_retries: i32,
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, rename = "webUIServiceName", skip_serializing_if = "Option::is_none")]
    pub web_ui_service_name: Option<String>,
    #[serde(default, rename = "webUIPort", skip_serializing_if = "Option::is_none")]
    pub web_ui_port: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationState {
    pub state: ApplicationStateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ApplicationStateType {
    #[serde(rename = "")]
    New,
    #[serde(rename = "SUBMITTED")]
    Submitted,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "SUBMISSION_FAILED")]
    FailedSubmission,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Default for ApplicationStateType {
    fn default() -> ApplicationStateType {
        ApplicationStateType::New
    }
}

impl ApplicationStateType {
    /// `Completed` and `Failed` end a run; `FailedSubmission` only ends one once retries are spent.
    pub fn is_terminated(self) -> bool {
        self == ApplicationStateType::Completed || self == ApplicationStateType::Failed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStateType::New => "NEW",
            ApplicationStateType::Submitted => "SUBMITTED",
            ApplicationStateType::Running => "RUNNING",
            ApplicationStateType::Completed => "COMPLETED",
            ApplicationStateType::Failed => "FAILED",
            ApplicationStateType::FailedSubmission => "SUBMISSION_FAILED",
            ApplicationStateType::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ApplicationStateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ExecutorState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl ExecutorState {
    pub fn is_terminated(self) -> bool {
        self == ExecutorState::Completed || self == ExecutorState::Failed
    }
}

/// Render a status the way status-printing tooling expects it.
pub fn print_status(status: &SparkApplicationStatus) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(status)
}
