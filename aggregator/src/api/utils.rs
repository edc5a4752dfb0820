use crate::errors::{AggregatorError, ValidationError};
use crate::protocol::Category;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::http::{make_error_response, make_json_response};
use std::convert::Infallible;

pub type ApiBody = BoxBody<Bytes, Infallible>;

/// Deserializes a JSON request body into the specified type.
pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ValidationError> {
    serde_json::from_slice(body).map_err(|e| ValidationError::InvalidBody(e.to_string()))
}

/// Serializes `value` into a JSON response.
pub fn json_response<T: Serialize>(
    status: StatusCode,
    value: &T,
) -> Result<Response<ApiBody>, AggregatorError> {
    let bytes = serde_json::to_vec(value).map(Bytes::from)?;
    Ok(make_json_response(status, bytes))
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    categories: Vec<Category>,
}

/// Client-facing response for a failed request. Internal details stay in the
/// logs.
pub fn error_response(error: &AggregatorError) -> Response<ApiBody> {
    let status = error.status_code();
    if status.is_server_error() {
        tracing::error!(error = %error, "Request failed");
    } else {
        tracing::warn!(error = %error, "Rejected request");
    }

    let body = ErrorBody {
        error: error.error_code(),
        detail: error.public_detail(),
        categories: error.failed_categories(),
    };

    match serde_json::to_vec(&body) {
        Ok(bytes) => make_json_response(status, Bytes::from(bytes)),
        Err(_) => make_error_response(status),
    }
}
