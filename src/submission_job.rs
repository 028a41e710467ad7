use std::collections::BTreeMap;

use futures::future::{BoxFuture, FutureExt};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy},
    Client,
};
use log::{error, info};

use crate::controller::submission::{Submission, Submitter};
use crate::crd::pod::{APP_ID_LABEL, APP_NAME_LABEL, LAUNCHED_BY_OPERATOR_LABEL};
use crate::crd::spark_application::SparkApplication;
use crate::errors::{Error, Result};
use crate::metrics;
use crate::utils::{env_var, object_to_owner_reference};

const JOB_NAME_PREFIX: &str = "spark-submit-";

pub struct SubmissionJob {
    pub name: String,
    pub manifest: Job,
}

impl SubmissionJob {
    /// Create the Job that launches the driver of `app` for `submission`.
    pub fn new(
        app: &SparkApplication,
        submission: &Submission,
        image: &str,
        service_account: Option<&str>,
    ) -> Result<Self> {
        let job_name = Self::submission_job_name(JOB_NAME_PREFIX, &submission.app_id);
        let owner_reference = object_to_owner_reference::<SparkApplication>(&app.metadata)?;

        let mut labels = BTreeMap::new();
        labels.insert(APP_NAME_LABEL.to_string(), submission.name.clone());
        labels.insert(APP_ID_LABEL.to_string(), submission.app_id.clone());
        labels.insert(LAUNCHED_BY_OPERATOR_LABEL.to_string(), "true".to_string());

        let environment = vec![
            env_var("SPARK_APPLICATION_NAME", &submission.name),
            env_var("SPARK_APPLICATION_NAMESPACE", &submission.namespace),
            env_var("SPARK_APPLICATION_ID", &submission.app_id),
        ];

        let manifest = Job {
            metadata: ObjectMeta {
                name: Some(job_name.clone()),
                namespace: Some(submission.namespace.clone()),
                owner_references: Some(vec![owner_reference]),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                ttl_seconds_after_finished: Some(604800), // 1 week in seconds
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        name: Some(job_name.clone()),
                        labels: Some(labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "spark-submit".to_string(),
                            image: Some(image.to_string()),
                            env: Some(environment),
                            ..Container::default()
                        }],
                        restart_policy: Some("Never".to_string()),
                        service_account_name: service_account.map(str::to_string),
                        ..PodSpec::default()
                    }),
                },
                ..JobSpec::default()
            }),
            ..Job::default()
        };

        Ok(Self {
            name: job_name,
            manifest,
        })
    }

    /// Generate a name which is no greater than 63 chars in length
    /// always keeping the `prefix` and as much of `suffix` as possible, favoring its ending.
    pub fn submission_job_name(prefix: &str, suffix: &str) -> String {
        let suffix = suffix
            .chars()
            .rev()
            .take(63 - prefix.len())
            .collect::<Vec<char>>()
            .iter()
            .rev()
            .collect::<String>();
        format!("{}{}", prefix, suffix)
    }
}

/// Launches drivers by creating a submission Job per attempt
#[derive(Clone)]
pub struct JobSubmitter {
    client: Client,
    image: String,
    service_account: Option<String>,
}

impl JobSubmitter {
    pub fn new(client: Client, image: String, service_account: Option<String>) -> Self {
        JobSubmitter {
            client,
            image,
            service_account,
        }
    }

    async fn launch(&self, submission: &Submission) -> Result<()> {
        let apps: Api<SparkApplication> = Api::namespaced(self.client.clone(), &submission.namespace);
        let app = apps.get(&submission.name).await.map_err(|err| {
            metrics::kube_error_happened("get_application", &err);
            Error::from(err)
        })?;
        let job = SubmissionJob::new(&app, submission, &self.image, self.service_account.as_deref())?;

        // Before launching this job, remove previous jobs for this application
        self.remove_submission_jobs(submission).await;

        info!("Launching job - {}!", &job.name);
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &submission.namespace);
        jobs.create(&PostParams::default(), &job.manifest).await.map_err(|err| {
            metrics::kube_error_happened("create_job", &err);
            Error::from(err)
        })?;
        Ok(())
    }

    /// Remove the submission jobs of earlier attempts of this application
    async fn remove_submission_jobs(&self, submission: &Submission) {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &submission.namespace);
        let params = ListParams::default().labels(&format!("{}={}", APP_NAME_LABEL, submission.name));
        let delete_params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..DeleteParams::default()
        };

        match jobs.list(&params).await {
            Ok(job_list) => {
                for job in job_list.items {
                    let name = match job.metadata.name {
                        Some(name) => name,
                        None => continue,
                    };
                    match jobs.delete(&name, &delete_params).await {
                        Ok(_) => info!("Requested deletion of previous submission job {}", name),
                        Err(err) => {
                            error!("Failed to delete old submission job '{}' with error: {:?}", name, err);
                            metrics::kube_error_happened("delete_job", &err);
                        }
                    }
                }
            }
            Err(err) => {
                error!("Failed to list submission jobs: {:?}", err);
                metrics::kube_error_happened("list_jobs", &err);
            }
        }
    }
}

impl Submitter for JobSubmitter {
    fn submit<'a>(&'a self, submission: &'a Submission) -> BoxFuture<'a, Result<()>> {
        self.launch(submission).boxed()
    }
}
