use std::sync::Mutex;

use kube::{
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client, Resource,
};
use log::{debug, warn};

use crate::crd::spark_application::SparkApplication;
use crate::metrics;
use crate::utils::app_key;

/// Reasons attached to the events emitted for a `SparkApplication`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventReason {
    Submission,
    SubmissionFailure,
    SubmissionRetry,
    Termination,
    Deletion,
    Restart,
}

impl EventReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EventReason::Submission => "SparkApplicationSubmission",
            EventReason::SubmissionFailure => "SparkApplicationSubmissionFailure",
            EventReason::SubmissionRetry => "SparkApplicationSubmissionRetry",
            EventReason::Termination => "SparkApplicationTermination",
            EventReason::Deletion => "SparkApplicationDeletion",
            EventReason::Restart => "SparkApplicationRestart",
        }
    }

    pub fn is_warning(self) -> bool {
        self == EventReason::SubmissionFailure
    }

    pub fn event_type(self) -> EventType {
        if self.is_warning() {
            EventType::Warning
        } else {
            EventType::Normal
        }
    }
}

impl std::fmt::Display for EventReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for the human readable notifications attached to an application
pub trait EventRecorder: Send + Sync {
    fn record(&self, app: &SparkApplication, reason: EventReason, message: String);
}

/// Publishes events to the API server without holding up the caller
#[derive(Clone)]
pub struct KubeRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeRecorder {
    pub fn new(client: Client, controller_name: &str) -> Self {
        KubeRecorder {
            client,
            reporter: Reporter {
                controller: controller_name.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

impl EventRecorder for KubeRecorder {
    fn record(&self, app: &SparkApplication, reason: EventReason, message: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), app.object_ref(&()));
        let key = app_key(app);
        debug!("Recording {} event for '{}': {}", reason, key, message);
        tokio::spawn(async move {
            let event = Event {
                type_: reason.event_type(),
                reason: reason.as_str().to_string(),
                note: Some(message),
                action: "Reconciling".to_string(),
                secondary: None,
            };
            if let Err(err) = recorder.publish(event).await {
                warn!("Failed to publish {} event for '{}': {:?}", reason, key, err);
                metrics::kube_error_happened("publish_event", &err);
            }
        });
    }
}

/// Keeps every recorded event as `"<Type> <Reason> <message>"`
#[derive(Default)]
pub struct FakeRecorder {
    events: Mutex<Vec<String>>,
}

impl FakeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remove and return every event recorded so far.
    pub fn drain(&self) -> Vec<String> {
        match self.events.lock() {
            Ok(mut events) => events.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }
}

impl EventRecorder for FakeRecorder {
    fn record(&self, _app: &SparkApplication, reason: EventReason, message: String) {
        let event_type = if reason.is_warning() { "Warning" } else { "Normal" };
        let event = format!("{} {} {}", event_type, reason, message);
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
