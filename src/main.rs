use actix_web::{middleware, web, App, HttpServer};
use actix_web_prom::PrometheusMetricsBuilder;
use kube::client::Client;
use log::{debug, info, warn};
use prometheus::Registry;
use spark_app_controller::{errors, init_controller, metrics, views, Config, ControllerEnvironmentConfig};

#[actix_rt::main]
async fn main() -> Result<(), errors::Error> {
    env_logger::init();

    let env_config = ControllerEnvironmentConfig::from_env()?;
    debug!("Environment config: {:?}", &env_config);
    let config = Config::from_env_config(env_config)?;

    let bind_address = format!("{}:{}", &config.server_host, config.server_port);

    let client = Client::try_default().await?;
    let controller = init_controller(client, config).await;

    let registry = Registry::new();
    metrics::custom_metrics(&registry).map_err(|err| errors::Error::InvalidConfig(err.to_string()))?;
    let prometheus = PrometheusMetricsBuilder::new(metrics::METRICS_NAMESPACE)
        .registry(registry)
        .endpoint("/metrics")
        .build()
        .map_err(|err| errors::Error::InvalidConfig(err.to_string()))?;

    let applications = web::Data::new(controller.applications.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(applications.clone())
            .wrap(prometheus.clone())
            .wrap(middleware::Logger::default().exclude("/health").exclude("/metrics"))
            .wrap(middleware::Compress::default())
            .service(web::resource("/health").to(views::health))
            .service(web::resource("/applications").to(views::applications))
            .service(web::resource("/applications/{namespace}/{name}").to(views::get_application))
    })
    .bind(&bind_address)?
    .run();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
        result = server => match result {
            Ok(()) => info!("actix exited"),
            Err(err) => warn!("actix exited with error: {}", err),
        },
    }

    controller.shutdown();
    controller.join().await;
    info!("Controller drained");
    Ok(())
}
