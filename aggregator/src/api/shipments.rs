use crate::api::utils::{ApiBody, json_response, parse_json};
use crate::errors::AggregatorError;
use crate::protocol::{Category, ShipmentsRequest, UnifiedViewRequest};
use crate::shipments::ShipmentAggregator;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

/// `POST /shipments/import` and `POST /shipments/export`.
///
/// Responds with the category's enriched records as a JSON array, in
/// downstream order.
pub async fn category_shipments(
    aggregator: &ShipmentAggregator,
    category: Category,
    body: Bytes,
) -> Result<Response<ApiBody>, AggregatorError> {
    let user_id = parse_json::<ShipmentsRequest>(&body)?.validated_user_id()?;

    let records = aggregator.aggregate(category, &user_id).await?;
    tracing::info!(%category, user_id, records = records.len(), "Served shipments");

    json_response(StatusCode::OK, &records)
}

/// `POST /shipments`: both categories in one view.
pub async fn unified_shipments(
    aggregator: &ShipmentAggregator,
    body: Bytes,
) -> Result<Response<ApiBody>, AggregatorError> {
    let request = parse_json::<UnifiedViewRequest>(&body)?;
    let user_id = request.validated_user_id()?;

    let view = aggregator.unified_view(&user_id, request.order).await?;
    if !view.unavailable.is_empty() {
        tracing::warn!(
            user_id,
            unavailable = ?view.unavailable,
            "Serving partial unified view"
        );
    }

    json_response(StatusCode::OK, &view)
}
