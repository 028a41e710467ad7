use std::collections::BTreeMap;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use kube::{
    api::{Api, ListParams},
    runtime::{
        reflector::{store::Writer, ObjectRef, Store},
        watcher,
    },
    Client,
};
use log::{info, warn};
use tokio::sync::watch;

pub mod spark_application;
pub use spark_application::*;

use crate::controller::SparkApplicationController;
use crate::utils::app_key;

pub fn load_spark_application_resource(client: &Client, namespace: Option<&str>) -> Api<SparkApplication> {
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

fn snapshot(store: &Store<SparkApplication>) -> BTreeMap<String, SparkApplication> {
    store
        .state()
        .into_iter()
        .map(|app| (app_key(&app), (*app).clone()))
        .collect()
}

/// Apply one watch event to the cache and tell the controller what changed.
///
/// The previous version of each object is read from the cache before the event
/// lands in it, which is what lets updates be told apart by spec.
pub fn handle_watch_event(
    event: watcher::Event<SparkApplication>,
    writer: &mut Writer<SparkApplication>,
    controller: &SparkApplicationController,
) {
    let cache = writer.as_reader();
    match event {
        watcher::Event::Applied(app) => {
            let old = cache.get(&ObjectRef::from_obj(&app));
            writer.apply_watcher_event(&watcher::Event::Applied(app.clone()));
            match old {
                Some(old) => controller.on_update(old.as_ref(), &app),
                None => controller.on_add(&app),
            }
        }
        watcher::Event::Deleted(app) => {
            writer.apply_watcher_event(&watcher::Event::Deleted(app.clone()));
            controller.on_delete(&app);
        }
        watcher::Event::Restarted(apps) => {
            let mut gone = snapshot(&cache);
            writer.apply_watcher_event(&watcher::Event::Restarted(apps.clone()));
            for app in apps.iter() {
                match gone.remove(&app_key(app)) {
                    Some(old) => controller.on_update(&old, app),
                    None => controller.on_add(app),
                }
            }
            for old in gone.values() {
                controller.on_delete(old);
            }
        }
    }
}

/// Keep `writer` in sync with the `SparkApplication`s behind `resource` until shut down.
pub async fn monitor_spark_applications(
    resource: Api<SparkApplication>,
    mut writer: Writer<SparkApplication>,
    controller: Arc<SparkApplicationController>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut events = watcher(resource, ListParams::default()).boxed();
    info!("Watching SparkApplications");

    loop {
        let event = tokio::select! {
            event = events.try_next() => event,
            _ = shutdown.changed() => break,
        };

        match event {
            Ok(Some(event)) => handle_watch_event(event, &mut writer, &controller),
            Ok(None) => break,
            Err(err) => {
                warn!("Failed watching SparkApplications: {}", err);
                crate::metrics::error_happened("watch_spark_applications");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }

    info!("Stopped watching SparkApplications");
}
