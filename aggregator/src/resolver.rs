//! First stage: the reference lookup that yields a user's base records.

use crate::config::CategoryEndpoints;
use crate::downstream::Downstream;
use crate::errors::{MalformedResponse, ResolutionCause, ResolutionError};
use crate::metrics_defs::RESOLUTION_FAILURES;
use crate::protocol::{BaseRecord, Category, Envelope, single_field_body};
use http::Method;
use shared::counter;
use std::sync::Arc;

pub struct ReferenceResolver {
    downstream: Arc<dyn Downstream>,
    user_key: String,
}

impl ReferenceResolver {
    pub fn new(downstream: Arc<dyn Downstream>, user_key: String) -> Self {
        Self {
            downstream,
            user_key,
        }
    }

    /// Fetches the base records of `user_id` for `category`, in downstream
    /// order. Issues exactly one call and never retries.
    ///
    /// `user_id` is sent as given; validating it is the caller's job.
    pub async fn resolve(
        &self,
        category: Category,
        endpoints: &CategoryEndpoints,
        user_id: &str,
    ) -> Result<Vec<BaseRecord>, ResolutionError> {
        let body = single_field_body(&self.user_key, user_id);

        let result = match self
            .downstream
            .invoke(Method::POST, &endpoints.reference_url, &body)
            .await
        {
            Ok(envelope) => parse_output(&envelope, &endpoints.reference_key)
                .map_err(ResolutionCause::from),
            Err(e) => Err(ResolutionCause::from(e)),
        };

        result.map_err(|cause| {
            tracing::error!(
                %category,
                user_id,
                error = %cause,
                "Reference lookup failed"
            );
            counter!(RESOLUTION_FAILURES, "category" => category.as_str()).increment(1);

            ResolutionError {
                category,
                user_id: user_id.to_string(),
                cause,
            }
        })
    }
}

/// Extracts `data.output` as base records.
fn parse_output(
    envelope: &Envelope,
    reference_key: &str,
) -> Result<Vec<BaseRecord>, MalformedResponse> {
    let output = envelope
        .success_data()?
        .get("output")
        .ok_or(MalformedResponse::MissingField("data.output"))?
        .as_array()
        .ok_or(MalformedResponse::NotASequence("data.output"))?;

    output
        .iter()
        .enumerate()
        .map(|(index, item)| {
            BaseRecord::from_json(item, reference_key)
                .map_err(|source| MalformedResponse::InvalidRecord { index, source })
        })
        .collect()
}
