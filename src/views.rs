use actix_web::{web, HttpResponse};
use kube::runtime::reflector::{ObjectRef, Store};

use crate::SparkApplication;

// Simple health check endpoint
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().finish()
}

// List the applications currently known to the controller
pub async fn applications(data: web::Data<Store<SparkApplication>>) -> web::Json<Vec<SparkApplication>> {
    web::Json(data.state().iter().map(|app| (**app).clone()).collect())
}

pub async fn get_application(
    data: web::Data<Store<SparkApplication>>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (namespace, name) = path.into_inner();
    match data.get(&ObjectRef::new(&name).within(&namespace)) {
        Some(app) => HttpResponse::Ok().json(app.as_ref()),
        None => HttpResponse::NotFound().finish(),
    }
}
