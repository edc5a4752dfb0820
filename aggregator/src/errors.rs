use crate::protocol::Category;
use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for aggregator operations
pub type Result<T, E = AggregatorError> = std::result::Result<T, E>;

/// Failure to complete a downstream call at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("response from {url} is not JSON: {reason}")]
    Decode { url: String, reason: String },
}

/// A single element of `data.output` that cannot be used as a base record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("record is not an object")]
    NotAnObject,

    #[error("record has no `{0}` field")]
    MissingReference(String),

    #[error("reference number {0} is not an integer")]
    InvalidReference(String),
}

/// Downstream answered with JSON that does not match the expected envelope.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedResponse {
    #[error("envelope has no numeric `code`")]
    MissingCode,

    #[error("envelope reports code {0}")]
    UnexpectedCode(i64),

    #[error("`{0}` is missing")]
    MissingField(&'static str),

    #[error("`{0}` is not a sequence")]
    NotASequence(&'static str),

    #[error("`{field}` contains a non-string entry")]
    NonStringEntry { field: &'static str },

    #[error("record {index} of `data.output` is invalid: {source}")]
    InvalidRecord {
        index: usize,
        #[source]
        source: RecordError,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionCause {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Malformed(#[from] MalformedResponse),
}

/// Fatal failure of a reference lookup. Without references there is nothing
/// to enrich, so the whole category fails.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to resolve {category} references for user {user_id}: {cause}")]
pub struct ResolutionError {
    pub category: Category,
    pub user_id: String,
    #[source]
    pub cause: ResolutionCause,
}

/// Inbound request rejected before any downstream call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("request body is not valid JSON: {0}")]
    InvalidBody(String),

    #[error("`user_id` is required")]
    MissingUserId,

    #[error("`user_id` must not be empty")]
    EmptyUserId,

    #[error("`user_id` contains control characters")]
    InvalidUserId,
}

/// Errors that can occur during aggregator operations
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("No shipment category could be resolved")]
    AllCategoriesFailed(Vec<ResolutionError>),

    #[error("Response serialization error: {0}")]
    ResponseSerialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::config::ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AggregatorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AggregatorError::RequestBody(_) | AggregatorError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            AggregatorError::Resolution(_) | AggregatorError::AllCategoriesFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code returned to clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            AggregatorError::RequestBody(_) | AggregatorError::Validation(_) => "invalid_request",
            AggregatorError::Resolution(_) | AggregatorError::AllCategoriesFailed(_) => {
                "resolution_failed"
            }
            _ => "internal_error",
        }
    }

    /// Message safe to show to clients. Downstream URLs and causes stay in
    /// the logs.
    pub fn public_detail(&self) -> String {
        match self {
            AggregatorError::RequestBody(_) => "request body could not be read".to_string(),
            AggregatorError::Validation(e) => e.to_string(),
            AggregatorError::Resolution(e) => {
                format!("{} shipments are currently unavailable", e.category)
            }
            AggregatorError::AllCategoriesFailed(_) => {
                "shipments are currently unavailable".to_string()
            }
            _ => "internal error".to_string(),
        }
    }

    /// Categories that failed to resolve, if any.
    pub fn failed_categories(&self) -> Vec<Category> {
        match self {
            AggregatorError::Resolution(e) => vec![e.category],
            AggregatorError::AllCategoriesFailed(errors) => {
                errors.iter().map(|e| e.category).collect()
            }
            _ => Vec::new(),
        }
    }
}
