use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use futures::future::{self, BoxFuture, FutureExt};
use kube::{
    api::{Api, PostParams},
    runtime::reflector::{ObjectRef, Store},
    Client,
};
use log::debug;

use crate::crd::spark_application::{SparkApplication, SparkApplicationStatus};
use crate::errors::{Error, Result};
use crate::metrics;
use crate::utils::{app_key, app_name, app_namespace, application_key};

/// Attempts made by [`KubeStore::update_status`] before giving up on conflicts
pub const MAX_STATUS_UPDATE_ATTEMPTS: u32 = 5;

pub type StatusMutation<'a> = Box<dyn FnMut(&mut SparkApplicationStatus) + Send + 'a>;

/// Read access to the cached applications plus transactional status writes
/// against their source of truth.
pub trait ResourceStore: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<SparkApplication>;

    /// Read an application from its source of truth, bypassing any cache.
    ///
    /// Decisions that depend on the controller's own recent writes must use this,
    /// since a watch-fed cache can lag behind them.
    fn fetch<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<Option<SparkApplication>>>;

    /// Apply `mutate` to the freshest known status of `app` and persist the result.
    ///
    /// The mutation may run more than once when the write races another writer;
    /// every run starts from a freshly read status.
    fn update_status<'a>(
        &'a self,
        app: &'a SparkApplication,
        mutate: StatusMutation<'a>,
    ) -> BoxFuture<'a, Result<SparkApplication>>;
}

/// Reads from the reflector cache, writes through the status subresource
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    cache: Store<SparkApplication>,
}

impl KubeStore {
    pub fn new(client: Client, cache: Store<SparkApplication>) -> Self {
        KubeStore { client, cache }
    }
}

impl ResourceStore for KubeStore {
    fn get(&self, namespace: &str, name: &str) -> Option<SparkApplication> {
        self.cache
            .get(&ObjectRef::new(name).within(namespace))
            .map(|app| (*app).clone())
    }

    fn fetch<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<Option<SparkApplication>>> {
        async move {
            let api: Api<SparkApplication> = Api::namespaced(self.client.clone(), namespace);
            match api.get(name).await {
                Ok(app) => Ok(Some(app)),
                Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
                Err(err) => {
                    metrics::kube_error_happened("get_application", &err);
                    Err(err.into())
                }
            }
        }
        .boxed()
    }

    fn update_status<'a>(
        &'a self,
        app: &'a SparkApplication,
        mut mutate: StatusMutation<'a>,
    ) -> BoxFuture<'a, Result<SparkApplication>> {
        async move {
            let name = app_name(app);
            let api: Api<SparkApplication> = Api::namespaced(self.client.clone(), &app_namespace(app));
            let mut latest = app.clone();

            for attempt in 1..=MAX_STATUS_UPDATE_ATTEMPTS {
                let mut candidate = latest.clone();
                mutate(candidate.status.get_or_insert_with(Default::default));
                let data = serde_json::to_vec(&candidate)?;

                match api.replace_status(&name, &PostParams::default(), data).await {
                    Ok(updated) => return Ok(updated),
                    Err(kube::Error::Api(resp)) if resp.code == 409 => {
                        debug!("Conflict updating status of '{}' on attempt {}", app_key(app), attempt);
                        latest = api.get(&name).await.map_err(|err| {
                            metrics::kube_error_happened("get_application", &err);
                            Error::from(err)
                        })?;
                    }
                    Err(err) => {
                        metrics::kube_error_happened("update_status", &err);
                        return Err(err.into());
                    }
                }
            }

            Err(Error::StatusUpdateConflict {
                key: app_key(app),
                attempts: MAX_STATUS_UPDATE_ATTEMPTS,
            })
        }
        .boxed()
    }
}

/// Applications kept in memory; writes are visible to the next read immediately
#[derive(Default)]
pub struct InMemoryStore {
    applications: Mutex<BTreeMap<String, SparkApplication>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn applications(&self) -> MutexGuard<'_, BTreeMap<String, SparkApplication>> {
        match self.applications.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert or replace an application.
    pub fn add(&self, app: SparkApplication) {
        self.applications().insert(app_key(&app), app);
    }

    pub fn update(&self, app: SparkApplication) {
        self.add(app)
    }

    pub fn delete(&self, namespace: &str, name: &str) -> Option<SparkApplication> {
        self.applications().remove(&application_key(namespace, name))
    }

    pub fn list(&self) -> Vec<SparkApplication> {
        self.applications().values().cloned().collect()
    }
}

impl ResourceStore for InMemoryStore {
    fn get(&self, namespace: &str, name: &str) -> Option<SparkApplication> {
        self.applications().get(&application_key(namespace, name)).cloned()
    }

    fn fetch<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, Result<Option<SparkApplication>>> {
        future::ready(Ok(self.get(namespace, name))).boxed()
    }

    fn update_status<'a>(
        &'a self,
        app: &'a SparkApplication,
        mut mutate: StatusMutation<'a>,
    ) -> BoxFuture<'a, Result<SparkApplication>> {
        let key = app_key(app);
        let result = match self.applications().get_mut(&key) {
            Some(stored) => {
                mutate(stored.status.get_or_insert_with(Default::default));
                Ok(stored.clone())
            }
            None => Err(Error::NotFound(key)),
        };
        future::ready(result).boxed()
    }
}
