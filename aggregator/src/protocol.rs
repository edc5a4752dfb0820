//! Wire types shared by the downstream contract and the inbound API.
//!
//! Downstream services wrap every response in an envelope:
//!
//! ```json
//! {"code": 200, "data": {"output": [{"reference_number": 17612, "destination_port": "KARACHI"}]}}
//! {"code": 200, "data": {"container_nums": ["HLXU5027876", "HLCU4187010"]}}
//! ```
//!
//! Base records are treated as an open bag of fields. Only the reference
//! number is interpreted; everything else is passed through to the client.

use crate::errors::{MalformedResponse, RecordError, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::fmt;

/// Identifier correlating a shipment across reference and container lookups.
pub type ReferenceNumber = i64;

/// Output key for the reference number, whatever key the downstream uses.
pub const REFERENCE_NUMBER_KEY: &str = "reference_number";
pub const CONTAINER_NUMBERS_KEY: &str = "container_numbers";
pub const CATEGORY_KEY: &str = "category";
pub const DELIVERY_DATE_KEY: &str = "delivery_date";

/// Shipment direction. Selects which pair of downstream services is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Import,
    Export,
}

impl Category {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Category::Import => "Import",
            Category::Export => "Export",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{code, data}` wrapper returned by every downstream service.
///
/// The adapter never interprets `code`; callers decide what a non-200 code
/// means for them via [`Envelope::success_data`].
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub code: Option<i64>,
    pub data: JsonValue,
}

impl Envelope {
    /// Splits a decoded JSON body into code and data.
    ///
    /// A body that is not an object yields an envelope with neither, which
    /// callers then reject as malformed.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Object(mut map) => Self {
                code: map.remove("code").and_then(|code| code.as_i64()),
                data: map.remove("data").unwrap_or(JsonValue::Null),
            },
            _ => Self {
                code: None,
                data: JsonValue::Null,
            },
        }
    }

    /// Returns `data` if the envelope reports success.
    pub fn success_data(&self) -> Result<&JsonValue, MalformedResponse> {
        match self.code {
            Some(200) => Ok(&self.data),
            Some(code) => Err(MalformedResponse::UnexpectedCode(code)),
            None => Err(MalformedResponse::MissingCode),
        }
    }
}

/// One shipment as returned by a reference lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseRecord {
    pub reference_number: ReferenceNumber,
    /// Passthrough fields, without the reference number key.
    pub fields: JsonMap<String, JsonValue>,
}

impl BaseRecord {
    /// Parses one element of `data.output`, reading the reference number
    /// from `reference_key`.
    pub fn from_json(value: &JsonValue, reference_key: &str) -> Result<Self, RecordError> {
        let mut fields = value.as_object().cloned().ok_or(RecordError::NotAnObject)?;

        let reference = fields
            .remove(reference_key)
            .ok_or_else(|| RecordError::MissingReference(reference_key.to_string()))?;
        let reference_number = reference
            .as_i64()
            .ok_or_else(|| RecordError::InvalidReference(reference.to_string()))?;

        Ok(Self {
            reference_number,
            fields,
        })
    }
}

/// Outcome of one container lookup, keyed by the reference number the call
/// was issued with.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrichmentResult {
    pub reference_number: ReferenceNumber,
    /// `None` is the "no enrichment available" sentinel.
    pub container_numbers: Option<Vec<String>>,
}

impl EnrichmentResult {
    pub fn found(reference_number: ReferenceNumber, container_numbers: Vec<String>) -> Self {
        Self {
            reference_number,
            container_numbers: Some(container_numbers),
        }
    }

    pub fn unavailable(reference_number: ReferenceNumber) -> Self {
        Self {
            reference_number,
            container_numbers: None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        self.container_numbers.is_none()
    }

    /// Container numbers worth attaching to a record. Empty lists and the
    /// sentinel both attach nothing.
    pub fn attachable(&self) -> Option<Vec<String>> {
        self.container_numbers
            .as_ref()
            .filter(|numbers| !numbers.is_empty())
            .cloned()
    }
}

/// A base record with enrichment and category merged in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub reference_number: ReferenceNumber,

    #[serde(flatten)]
    pub fields: JsonMap<String, JsonValue>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub container_numbers: Option<Vec<String>>,

    pub category: Category,
}

impl EnrichedRecord {
    pub fn new(
        record: BaseRecord,
        container_numbers: Option<Vec<String>>,
        category: Category,
    ) -> Self {
        let mut fields = record.fields;
        // Keys we set ourselves win over same-named passthrough fields.
        for key in [REFERENCE_NUMBER_KEY, CONTAINER_NUMBERS_KEY, CATEGORY_KEY] {
            fields.remove(key);
        }

        Self {
            reference_number: record.reference_number,
            fields,
            container_numbers,
            category,
        }
    }
}

/// Builds a `{key: value}` request body.
pub fn single_field_body(key: &str, value: impl Into<JsonValue>) -> JsonValue {
    let mut body = JsonMap::new();
    body.insert(key.to_string(), value.into());
    JsonValue::Object(body)
}

/// Body of `POST /shipments/import` and `POST /shipments/export`.
#[derive(Debug, Clone, Deserialize)]
pub struct ShipmentsRequest {
    #[serde(alias = "wguser_id")]
    pub user_id: Option<String>,
}

impl ShipmentsRequest {
    pub fn validated_user_id(self) -> Result<String, ValidationError> {
        validate_user_id(self.user_id)
    }
}

/// Order applied to the unified view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentOrder {
    /// Export records then import records, each in downstream order.
    #[default]
    Server,
    DeliveryDateDesc,
    DeliveryDateAsc,
}

/// Body of `POST /shipments`.
#[derive(Debug, Clone, Deserialize)]
pub struct UnifiedViewRequest {
    #[serde(alias = "wguser_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub order: ShipmentOrder,
}

impl UnifiedViewRequest {
    pub fn validated_user_id(&self) -> Result<String, ValidationError> {
        validate_user_id(self.user_id.clone())
    }
}

/// Both categories combined. Categories whose reference lookup failed are
/// listed in `unavailable` instead of failing the whole view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedView {
    pub shipments: Vec<EnrichedRecord>,
    pub unavailable: Vec<Category>,
}

fn validate_user_id(user_id: Option<String>) -> Result<String, ValidationError> {
    let user_id = user_id.ok_or(ValidationError::MissingUserId)?;
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyUserId);
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ValidationError::InvalidUserId);
    }
    Ok(trimmed.to_string())
}
