use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status, handler.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const ENRICHMENT_CALLS: MetricDef = MetricDef {
    name: "enrichment.calls",
    metric_type: MetricType::Counter,
    description: "Container lookups issued. Tagged with category, outcome (found, empty, unavailable).",
};

pub const DEGRADED_RECORDS: MetricDef = MetricDef {
    name: "enrichment.degraded_records",
    metric_type: MetricType::Counter,
    description: "Records returned without enrichment because their lookup failed or was aborted",
};

pub const RESOLUTION_FAILURES: MetricDef = MetricDef {
    name: "resolution.failures",
    metric_type: MetricType::Counter,
    description: "Reference lookups that failed. Tagged with category.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    ENRICHMENT_CALLS,
    DEGRADED_RECORDS,
    RESOLUTION_FAILURES,
];
