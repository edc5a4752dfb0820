//! Second stage: one container lookup per base record.
//!
//! Lookups run in parallel on a `JoinSet`, gated by a semaphore so that at
//! most `concurrency` calls hit the container service at once. Results are
//! keyed by the reference number each call was issued with and merged back by
//! walking the base records in their original order, so completion order
//! never affects the output.
//!
//! A failed lookup (transport error, timeout, malformed envelope, non-200
//! code) only costs its own record the `container_numbers` field. When the
//! fan-out deadline expires the remaining lookups are aborted and their
//! records degrade the same way; results that arrive after the deadline are
//! discarded.

use crate::config::CategoryEndpoints;
use crate::downstream::Downstream;
use crate::errors::MalformedResponse;
use crate::metrics_defs::{DEGRADED_RECORDS, ENRICHMENT_CALLS};
use crate::protocol::{
    BaseRecord, Category, EnrichedRecord, EnrichmentResult, Envelope, ReferenceNumber,
    single_field_body,
};
use http::Method;
use serde_json::Value as JsonValue;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use url::Url;

const CONTAINER_NUMS_FIELD: &str = "data.container_nums";

/// Spawned lookups plus the reference number each task was issued for, so
/// that failed or aborted tasks can still be attributed in logs.
struct SpawnedLookups {
    join_set: JoinSet<EnrichmentResult>,
    task_refs: HashMap<Id, ReferenceNumber>,
    results: HashMap<ReferenceNumber, EnrichmentResult>,
}

impl SpawnedLookups {
    fn record(
        &mut self,
        category: Category,
        user_id: &str,
        join_result: Result<(Id, EnrichmentResult), JoinError>,
    ) {
        match join_result {
            Ok((task_id, result)) => {
                self.task_refs.remove(&task_id);
                self.results.insert(result.reference_number, result);
            }
            Err(e) => {
                let reference_number = self.task_refs.remove(&e.id());
                tracing::error!(
                    %category,
                    user_id,
                    reference_number,
                    error = %e,
                    "Container lookup task failed"
                );
            }
        }
    }

    /// Joins every lookup that has already completed, without waiting.
    fn collect_finished(&mut self, category: Category, user_id: &str) {
        while let Some(join_result) = self.join_set.try_join_next_with_id() {
            self.record(category, user_id, join_result);
        }
    }
}

pub struct EnrichmentFanout {
    downstream: Arc<dyn Downstream>,
    concurrency: usize,
    deadline: Duration,
}

impl EnrichmentFanout {
    pub fn new(downstream: Arc<dyn Downstream>, concurrency: usize, deadline: Duration) -> Self {
        Self {
            downstream,
            concurrency: concurrency.max(1),
            deadline,
        }
    }

    /// Enriches `records` with their container numbers and tags them with
    /// `category`. Always returns exactly one record per input, in order.
    ///
    /// `user_id` only correlates log lines; it is not sent downstream.
    pub async fn enrich(
        &self,
        category: Category,
        endpoints: &CategoryEndpoints,
        user_id: &str,
        records: Vec<BaseRecord>,
    ) -> Vec<EnrichedRecord> {
        if records.is_empty() {
            return Vec::new();
        }

        let spawned = self.spawn_lookups(category, endpoints, user_id, &records);
        let results = self.collect_results(category, user_id, spawned).await;

        merge(category, records, &results)
    }

    fn spawn_lookups(
        &self,
        category: Category,
        endpoints: &CategoryEndpoints,
        user_id: &str,
        records: &[BaseRecord],
    ) -> SpawnedLookups {
        let user_id: Arc<str> = Arc::from(user_id);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();
        let mut task_refs = HashMap::with_capacity(records.len());

        for record in records {
            let reference_number = record.reference_number;
            let downstream = self.downstream.clone();
            let semaphore = semaphore.clone();
            let user_id = user_id.clone();
            let url = endpoints.container_url.clone();
            let body = single_field_body(&endpoints.reference_key, reference_number);

            let abort_handle = join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return EnrichmentResult::unavailable(reference_number);
                };
                lookup_containers(
                    downstream.as_ref(),
                    &url,
                    &body,
                    category,
                    &user_id,
                    reference_number,
                )
                .await
            });

            task_refs.insert(abort_handle.id(), reference_number);
        }

        SpawnedLookups {
            join_set,
            results: HashMap::with_capacity(task_refs.len()),
            task_refs,
        }
    }

    async fn collect_results(
        &self,
        category: Category,
        user_id: &str,
        mut spawned: SpawnedLookups,
    ) -> HashMap<ReferenceNumber, EnrichmentResult> {
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        while !spawned.join_set.is_empty() {
            tokio::select! {
                biased;

                Some(join_result) = spawned.join_set.join_next_with_id() => {
                    spawned.record(category, user_id, join_result);
                }
                _ = &mut deadline => {
                    spawned.collect_finished(category, user_id);
                    if !spawned.join_set.is_empty() {
                        tracing::warn!(
                            %category,
                            user_id,
                            remaining = spawned.join_set.len(),
                            "Enrichment deadline reached, aborting remaining container lookups"
                        );
                        spawned.join_set.abort_all();
                    }
                    break;
                }
            }
        }

        // Anything still in the set was aborted; late results are dropped.
        while let Some(join_result) = spawned.join_set.join_next_with_id().await {
            let task_id = match join_result {
                Ok((id, _)) => id,
                Err(e) => e.id(),
            };
            if let Some(reference_number) = spawned.task_refs.remove(&task_id) {
                tracing::debug!(
                    %category,
                    user_id,
                    reference_number,
                    "Discarding aborted container lookup"
                );
            }
        }

        spawned.results
    }
}

/// Merges enrichment results into base records by reference number.
///
/// Output order and length follow `records`. A record whose result is
/// missing, unavailable or empty gets no `container_numbers`.
pub fn merge(
    category: Category,
    records: Vec<BaseRecord>,
    results: &HashMap<ReferenceNumber, EnrichmentResult>,
) -> Vec<EnrichedRecord> {
    records
        .into_iter()
        .map(|record| {
            let result = results.get(&record.reference_number);
            if result.is_none_or(EnrichmentResult::is_unavailable) {
                counter!(DEGRADED_RECORDS, "category" => category.as_str()).increment(1);
            }

            let container_numbers = result.and_then(EnrichmentResult::attachable);
            EnrichedRecord::new(record, container_numbers, category)
        })
        .collect()
}

async fn lookup_containers(
    downstream: &dyn Downstream,
    url: &Url,
    body: &JsonValue,
    category: Category,
    user_id: &str,
    reference_number: ReferenceNumber,
) -> EnrichmentResult {
    let outcome = match downstream.invoke(Method::POST, url, body).await {
        Ok(envelope) => container_numbers(&envelope).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match outcome {
        Ok(numbers) => {
            let label = if numbers.is_empty() { "empty" } else { "found" };
            counter!(ENRICHMENT_CALLS, "category" => category.as_str(), "outcome" => label)
                .increment(1);
            EnrichmentResult::found(reference_number, numbers)
        }
        Err(error) => {
            tracing::warn!(
                %category,
                user_id,
                reference_number,
                %error,
                "Container lookup failed, returning record without enrichment"
            );
            counter!(ENRICHMENT_CALLS, "category" => category.as_str(), "outcome" => "unavailable")
                .increment(1);
            EnrichmentResult::unavailable(reference_number)
        }
    }
}

/// Extracts `data.container_nums`. Absent or null means no containers.
fn container_numbers(envelope: &Envelope) -> Result<Vec<String>, MalformedResponse> {
    match envelope.success_data()?.get("container_nums") {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or(MalformedResponse::NonStringEntry {
                        field: CONTAINER_NUMS_FIELD,
                    })
            })
            .collect(),
        Some(_) => Err(MalformedResponse::NotASequence(CONTAINER_NUMS_FIELD)),
    }
}
