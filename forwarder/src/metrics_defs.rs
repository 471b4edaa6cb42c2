//! Metrics definitions for the forwarding worker.

use shared::metrics_defs::{MetricDef, MetricType};

pub const FORWARD_REQUESTS: MetricDef = MetricDef {
    name: "forward.requests",
    metric_type: MetricType::Counter,
    description: "Forwarded requests by final outcome. Tagged with outcome.",
};

pub const FORWARD_RETRIES: MetricDef = MetricDef {
    name: "forward.retries",
    metric_type: MetricType::Counter,
    description: "Retries of forwarded requests. Tagged with reason (status code or transport error kind).",
};

pub const FORWARD_DURATION: MetricDef = MetricDef {
    name: "forward.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a forwarded request including retries, in seconds",
};

pub const JOBS_INFLIGHT: MetricDef = MetricDef {
    name: "jobs.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of jobs currently being processed",
};

pub const READINESS_ATTEMPTS: MetricDef = MetricDef {
    name: "readiness.attempts",
    metric_type: MetricType::Counter,
    description: "Health checks issued against the dependent service during startup",
};

pub const ALL_METRICS: &[MetricDef] = &[
    FORWARD_REQUESTS,
    FORWARD_RETRIES,
    FORWARD_DURATION,
    JOBS_INFLIGHT,
    READINESS_ATTEMPTS,
];
