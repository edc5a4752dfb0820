//! Category aggregation and the unified view over both categories.

use crate::config::{Config, Downstreams};
use crate::downstream::Downstream;
use crate::errors::{AggregatorError, ResolutionError};
use crate::fanout::EnrichmentFanout;
use crate::protocol::{
    Category, DELIVERY_DATE_KEY, EnrichedRecord, ShipmentOrder, UnifiedView,
};
use crate::resolver::ReferenceResolver;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Resolves and enriches a user's shipments.
///
/// One implementation serves both categories; the category only selects which
/// downstream endpoints are used.
pub struct ShipmentAggregator {
    resolver: ReferenceResolver,
    fanout: EnrichmentFanout,
    downstreams: Downstreams,
}

impl ShipmentAggregator {
    pub fn new(downstream: Arc<dyn Downstream>, config: &Config) -> Self {
        Self {
            resolver: ReferenceResolver::new(downstream.clone(), config.user_key.clone()),
            fanout: EnrichmentFanout::new(
                downstream,
                config.fanout_concurrency,
                Duration::from_secs(config.timeouts.fanout_timeout_secs),
            ),
            downstreams: config.downstreams.clone(),
        }
    }

    /// All shipments of `user_id` in `category`, in downstream order.
    ///
    /// Fails only when the reference lookup fails. Enrichment failures are
    /// absorbed record by record.
    pub async fn aggregate(
        &self,
        category: Category,
        user_id: &str,
    ) -> Result<Vec<EnrichedRecord>, ResolutionError> {
        let endpoints = self.downstreams.endpoints(category);
        let records = self.resolver.resolve(category, endpoints, user_id).await?;

        tracing::debug!(
            %category,
            user_id,
            records = records.len(),
            "Resolved references, starting container lookups"
        );

        Ok(self.fanout.enrich(category, endpoints, user_id, records).await)
    }

    pub async fn aggregate_import(
        &self,
        user_id: &str,
    ) -> Result<Vec<EnrichedRecord>, ResolutionError> {
        self.aggregate(Category::Import, user_id).await
    }

    pub async fn aggregate_export(
        &self,
        user_id: &str,
    ) -> Result<Vec<EnrichedRecord>, ResolutionError> {
        self.aggregate(Category::Export, user_id).await
    }

    /// Both categories, Export records first, then Import.
    ///
    /// A category whose reference lookup fails is reported in `unavailable`.
    /// The view fails only if neither category resolves.
    pub async fn unified_view(
        &self,
        user_id: &str,
        order: ShipmentOrder,
    ) -> Result<UnifiedView, AggregatorError> {
        let (export, import) = tokio::join!(
            self.aggregate_export(user_id),
            self.aggregate_import(user_id)
        );

        let mut shipments = Vec::new();
        let mut failures = Vec::new();
        for result in [export, import] {
            match result {
                Ok(records) => shipments.extend(records),
                Err(e) => failures.push(e),
            }
        }

        if failures.len() == 2 {
            return Err(AggregatorError::AllCategoriesFailed(failures));
        }

        sort_shipments(&mut shipments, order);

        Ok(UnifiedView {
            shipments,
            unavailable: failures.iter().map(|e| e.category).collect(),
        })
    }
}

/// Stable sort by `delivery_date`. Records without a parseable date go last
/// in either direction.
fn sort_shipments(shipments: &mut Vec<EnrichedRecord>, order: ShipmentOrder) {
    let descending = match order {
        ShipmentOrder::Server => return,
        ShipmentOrder::DeliveryDateDesc => true,
        ShipmentOrder::DeliveryDateAsc => false,
    };

    let mut keyed: Vec<_> = shipments
        .drain(..)
        .map(|record| {
            let date = record.fields.get(DELIVERY_DATE_KEY).and_then(parse_delivery_date);
            (date, record)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(a),
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    shipments.extend(keyed.into_iter().map(|(_, record)| record));
}

/// Accepts RFC 2822 (including HTTP dates), RFC 3339 and `YYYY-MM-DD`.
fn parse_delivery_date(value: &JsonValue) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();

    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{
        EXPORT_CONTAINER_URL, EXPORT_REFERENCE_URL, FakeDownstream, FakeReply,
        IMPORT_CONTAINER_URL, IMPORT_REFERENCE_URL, requested_reference, test_config,
    };
    use serde_json::json;

    fn aggregator(fake: Arc<FakeDownstream>) -> ShipmentAggregator {
        ShipmentAggregator::new(fake, &test_config())
    }

    /// Export user with two shipments, import user with one.
    fn two_category_fake(
        fail_import: bool,
        fail_export: bool,
    ) -> Arc<FakeDownstream> {
        FakeDownstream::new(move |url, body| match url.as_str() {
            EXPORT_REFERENCE_URL if fail_export => FakeReply::timeout(url),
            IMPORT_REFERENCE_URL if fail_import => {
                FakeReply::envelope(json!({"code": 500, "data": null}))
            }
            EXPORT_REFERENCE_URL => FakeReply::output(json!([
                {"reference_number": 17612, "delivery_date": "Tue, 01 Jun 2021 00:00:00 GMT"},
                {"reference_number": 17625, "delivery_date": "2021-08-15"},
            ])),
            IMPORT_REFERENCE_URL => FakeReply::output(json!([
                {"reference_number": 17600, "delivery_date": "2021-07-01T12:00:00+02:00"},
            ])),
            EXPORT_CONTAINER_URL | IMPORT_CONTAINER_URL => {
                let reference = requested_reference(body);
                FakeReply::containers(&[format!("C{reference}").as_str()])
            }
            other => panic!("unexpected call to {other}"),
        })
    }

    fn summary(records: &[EnrichedRecord]) -> Vec<(i64, Category)> {
        records
            .iter()
            .map(|r| (r.reference_number, r.category))
            .collect()
    }

    #[tokio::test]
    async fn test_aggregate_export_merges_containers() {
        let fake = FakeDownstream::new(|url, body| match url.as_str() {
            EXPORT_REFERENCE_URL => FakeReply::output(json!([
                {"reference_number": 17612, "destination_port": "KARACHI"},
                {"reference_number": 17625, "destination_port": "MUMBAI,INDIA"},
            ])),
            EXPORT_CONTAINER_URL if requested_reference(body) == 17612 => {
                FakeReply::containers(&["HLXU5027876", "HLCU4187010"])
            }
            EXPORT_CONTAINER_URL => FakeReply::containers(&[]),
            other => panic!("unexpected call to {other}"),
        });

        let records = aggregator(fake.clone())
            .aggregate_export("bk666dcoeZTH3dxZCuu4FR")
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&records).unwrap(),
            json!([
                {
                    "reference_number": 17612,
                    "destination_port": "KARACHI",
                    "container_numbers": ["HLXU5027876", "HLCU4187010"],
                    "category": "Export"
                },
                {
                    "reference_number": 17625,
                    "destination_port": "MUMBAI,INDIA",
                    "category": "Export"
                }
            ])
        );
        assert_eq!(fake.calls_to(EXPORT_REFERENCE_URL), 1);
        assert_eq!(fake.calls_to(EXPORT_CONTAINER_URL), 2);
        assert_eq!(fake.calls_to(IMPORT_REFERENCE_URL), 0);
    }

    #[tokio::test]
    async fn test_aggregate_import_uses_import_endpoints() {
        let fake = two_category_fake(false, false);

        let records = aggregator(fake.clone()).aggregate_import("u1").await.unwrap();

        assert_eq!(summary(&records), vec![(17600, Category::Import)]);
        assert_eq!(fake.calls_to(IMPORT_REFERENCE_URL), 1);
        assert_eq!(fake.calls_to(IMPORT_CONTAINER_URL), 1);
        assert_eq!(fake.calls_to(EXPORT_REFERENCE_URL), 0);
    }

    #[tokio::test]
    async fn test_aggregate_resolution_failure_makes_no_container_calls() {
        let fake = two_category_fake(false, true);

        let error = aggregator(fake.clone())
            .aggregate_export("u1")
            .await
            .unwrap_err();

        assert_eq!(error.category, Category::Export);
        assert_eq!(fake.calls_to(EXPORT_CONTAINER_URL), 0);
    }

    #[tokio::test]
    async fn test_unified_view_export_then_import() {
        let view = aggregator(two_category_fake(false, false))
            .unified_view("u1", ShipmentOrder::Server)
            .await
            .unwrap();

        assert_eq!(
            summary(&view.shipments),
            vec![
                (17612, Category::Export),
                (17625, Category::Export),
                (17600, Category::Import),
            ]
        );
        assert!(view.unavailable.is_empty());
        assert!(view.shipments.iter().all(|r| r.container_numbers.is_some()));
    }

    #[tokio::test]
    async fn test_unified_view_one_category_failing() {
        let view = aggregator(two_category_fake(true, false))
            .unified_view("u1", ShipmentOrder::Server)
            .await
            .unwrap();

        assert_eq!(
            summary(&view.shipments),
            vec![(17612, Category::Export), (17625, Category::Export)]
        );
        assert_eq!(view.unavailable, vec![Category::Import]);
    }

    #[tokio::test]
    async fn test_unified_view_both_failing() {
        let error = aggregator(two_category_fake(true, true))
            .unified_view("u1", ShipmentOrder::Server)
            .await
            .unwrap_err();

        assert!(matches!(error, AggregatorError::AllCategoriesFailed(ref e) if e.len() == 2));
        assert_eq!(
            error.failed_categories(),
            vec![Category::Export, Category::Import]
        );
    }

    #[tokio::test]
    async fn test_unified_view_sorted_by_delivery_date() {
        let aggregator = aggregator(two_category_fake(false, false));

        let desc = aggregator
            .unified_view("u1", ShipmentOrder::DeliveryDateDesc)
            .await
            .unwrap();
        let references: Vec<_> = desc.shipments.iter().map(|r| r.reference_number).collect();
        assert_eq!(references, vec![17625, 17600, 17612]);

        let asc = aggregator
            .unified_view("u1", ShipmentOrder::DeliveryDateAsc)
            .await
            .unwrap();
        let references: Vec<_> = asc.shipments.iter().map(|r| r.reference_number).collect();
        assert_eq!(references, vec![17612, 17600, 17625]);
    }

    fn dated(reference_number: i64, date: Option<&str>) -> EnrichedRecord {
        let mut fields = serde_json::Map::new();
        if let Some(date) = date {
            fields.insert(DELIVERY_DATE_KEY.to_string(), json!(date));
        }
        EnrichedRecord {
            reference_number,
            fields,
            container_numbers: None,
            category: Category::Export,
        }
    }

    #[test]
    fn test_sort_undated_last_and_stable() {
        let records = vec![
            dated(1, None),
            dated(2, Some("2021-06-01")),
            dated(3, Some("not a date")),
            dated(4, Some("2021-06-01")),
            dated(5, Some("2022-01-01")),
        ];

        let mut desc = records.clone();
        sort_shipments(&mut desc, ShipmentOrder::DeliveryDateDesc);
        let order: Vec<_> = desc.iter().map(|r| r.reference_number).collect();
        assert_eq!(order, vec![5, 2, 4, 1, 3]);

        let mut asc = records.clone();
        sort_shipments(&mut asc, ShipmentOrder::DeliveryDateAsc);
        let order: Vec<_> = asc.iter().map(|r| r.reference_number).collect();
        assert_eq!(order, vec![2, 4, 5, 1, 3]);

        let mut server = records.clone();
        sort_shipments(&mut server, ShipmentOrder::Server);
        assert_eq!(server, records);
    }

    #[test]
    fn test_parse_delivery_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2021, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();

        for raw in [
            "Tue, 01 Jun 2021 00:00:00 GMT",
            "2021-06-01T02:00:00+02:00",
            "2021-06-01",
            " 2021-06-01 ",
        ] {
            assert_eq!(parse_delivery_date(&json!(raw)), Some(expected), "{raw}");
        }

        assert_eq!(parse_delivery_date(&json!("01/06/2021")), None);
        assert_eq!(parse_delivery_date(&json!(20210601)), None);
        assert_eq!(parse_delivery_date(&JsonValue::Null), None);
    }
}
