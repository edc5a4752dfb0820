pub mod api;
pub mod config;
pub mod downstream;
pub mod errors;
pub mod fanout;
pub mod metrics_defs;
pub mod protocol;
pub mod resolver;
pub mod router;
pub mod shipments;

#[cfg(test)]
mod testutils;

use crate::api::utils::ApiBody;
use crate::downstream::HttpDownstream;
use crate::errors::AggregatorError;
use crate::router::Router;
use crate::shipments::ShipmentAggregator;
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use shared::admin_service::{AdminService, Readiness};
use shared::http::{run_http_service, serve};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub async fn run(config: config::Config) -> Result<(), AggregatorError> {
    config.validate()?;
    shared::metrics_defs::describe_all(metrics_defs::ALL_METRICS);

    let downstream = HttpDownstream::new(Duration::from_secs(config.timeouts.http_timeout_secs))?;
    let aggregator = ShipmentAggregator::new(Arc::new(downstream), &config);
    let service = AggregatorService::new(Router::new(Arc::new(aggregator)));

    let listener =
        TcpListener::bind(format!("{}:{}", config.listener.host, config.listener.port)).await?;
    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        "Aggregator listening"
    );

    let readiness = Readiness::new();
    readiness.set_ready(true);

    let admin_service = AdminService::<AggregatorError>::new(readiness);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(serve(listener, service), admin_task)?;
    Ok(())
}

pub struct AggregatorService {
    router: Router,
}

impl AggregatorService {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

impl Service<Request<Incoming>> for AggregatorService {
    type Response = Response<ApiBody>;
    type Error = AggregatorError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        Box::pin(async move { Ok(router.route(req).await) })
    }
}
