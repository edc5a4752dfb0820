use crate::api::shipments::{category_shipments, unified_shipments};
use crate::api::utils::{ApiBody, error_response};
use crate::errors::AggregatorError;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::protocol::Category;
use crate::shipments::ShipmentAggregator;
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use shared::http::make_error_response;
use shared::{gauge, histogram};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

/// Endpoint a request path resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteAction {
    CategoryShipments(Category),
    UnifiedShipments,
}

impl RouteAction {
    pub fn from_path(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "/shipments/import" => Some(RouteAction::CategoryShipments(Category::Import)),
            "/shipments/export" => Some(RouteAction::CategoryShipments(Category::Export)),
            "/shipments" => Some(RouteAction::UnifiedShipments),
            _ => None,
        }
    }

    /// Metric tag for the handler.
    pub fn name(&self) -> &'static str {
        match self {
            RouteAction::CategoryShipments(Category::Import) => "shipments_import",
            RouteAction::CategoryShipments(Category::Export) => "shipments_export",
            RouteAction::UnifiedShipments => "shipments_unified",
        }
    }
}

/// Keeps the in-flight gauge accurate even if the request future is dropped.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

/// Dispatches inbound requests to the shipment handlers.
#[derive(Clone)]
pub struct Router {
    aggregator: Arc<ShipmentAggregator>,
}

impl Router {
    pub fn new(aggregator: Arc<ShipmentAggregator>) -> Self {
        Self { aggregator }
    }

    /// Routes a request and always produces a response; failures are mapped
    /// to their client-facing status here.
    pub async fn route<B>(&self, req: Request<B>) -> Response<ApiBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let Some(action) = RouteAction::from_path(req.uri().path()) else {
            tracing::warn!(
                method = %req.method(),
                path = %req.uri().path(),
                "No route matched"
            );
            return make_error_response(StatusCode::NOT_FOUND);
        };

        if req.method() != Method::POST {
            tracing::warn!(method = %req.method(), handler = action.name(), "Method not allowed");
            return make_error_response(StatusCode::METHOD_NOT_ALLOWED);
        }

        let _inflight = InflightGuard::new();
        let start = Instant::now();

        let response = self
            .handle_action(req, action)
            .await
            .unwrap_or_else(|e| error_response(&e));

        histogram!(
            REQUEST_DURATION,
            "handler" => action.name(),
            "status" => response.status().as_str().to_string()
        )
        .record(start.elapsed().as_secs_f64());

        response
    }

    async fn handle_action<B>(
        &self,
        req: Request<B>,
        action: RouteAction,
    ) -> Result<Response<ApiBody>, AggregatorError>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Display,
    {
        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|e| AggregatorError::RequestBody(e.to_string()))?
            .to_bytes();

        match action {
            RouteAction::CategoryShipments(category) => {
                category_shipments(&self.aggregator, category, body).await
            }
            RouteAction::UnifiedShipments => unified_shipments(&self.aggregator, body).await,
        }
    }
}
