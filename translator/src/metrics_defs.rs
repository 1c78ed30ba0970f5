//! Metrics definitions for the translator.

use shared::metrics_defs::{MetricDef, MetricType};

pub const TRANSLATE_REQUESTS: MetricDef = MetricDef {
    name: "translate.requests",
    metric_type: MetricType::Counter,
    description: "Number of translate requests, tagged by response status",
};

pub const TRANSLATE_DURATION: MetricDef = MetricDef {
    name: "translate.duration",
    metric_type: MetricType::Histogram,
    description: "Time to serve a translate request in seconds",
};

pub const HISTORY_WRITE_SUCCESS: MetricDef = MetricDef {
    name: "history.write.success",
    metric_type: MetricType::Counter,
    description: "Number of translation records persisted",
};

pub const HISTORY_WRITE_FAILURE: MetricDef = MetricDef {
    name: "history.write.failure",
    metric_type: MetricType::Counter,
    description: "Number of translation records that could not be persisted",
};

pub const SCHEDULED_JOB_RUNS: MetricDef = MetricDef {
    name: "scheduled_job.runs",
    metric_type: MetricType::Counter,
    description: "Number of scheduled translation runs, tagged by outcome",
};

pub const ALL_METRICS: &[MetricDef] = &[
    TRANSLATE_REQUESTS,
    TRANSLATE_DURATION,
    HISTORY_WRITE_SUCCESS,
    HISTORY_WRITE_FAILURE,
    SCHEDULED_JOB_RUNS,
];
