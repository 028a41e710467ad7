use k8s_openapi::{
    api::core::v1::EnvVar,
    apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time},
};
use kube::Resource;

use crate::crd::spark_application::SparkApplication;
use crate::errors::Error;

pub fn object_to_owner_reference<K: Resource<DynamicType = ()>>(meta: &ObjectMeta) -> Result<OwnerReference, Error> {
    Ok(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: meta.name.clone().ok_or(Error::MissingKey(".metadata.name"))?,
        uid: meta.uid.clone().ok_or(Error::MissingKey(".metadata.uid"))?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Queue key of an object: `namespace/name`, or just `name` for cluster-scoped objects
pub fn application_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", namespace, name)
    }
}

pub fn app_key(app: &SparkApplication) -> String {
    application_key(&app_namespace(app), &app_name(app))
}

/// Split a queue key back into its namespace and name
pub fn split_key(key: &str) -> Result<(String, String), Error> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((String::new(), name.to_string())),
        [namespace, name] if !name.is_empty() => Ok((namespace.to_string(), name.to_string())),
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}

pub fn app_name(app: &SparkApplication) -> String {
    app.metadata.name.clone().unwrap_or_default()
}

pub fn app_namespace(app: &SparkApplication) -> String {
    app.metadata.namespace.clone().unwrap_or_default()
}

pub fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

pub fn get_revision() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

pub fn now() -> Time {
    Time(chrono::Utc::now())
}
