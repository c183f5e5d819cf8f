use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "catalog_cache_hit_total",
            Unit::Count,
            "Total number of requests served from the response cache."
        );
        describe_counter!(
            "catalog_cache_miss_total",
            Unit::Count,
            "Total number of requests that started a computation."
        );
        describe_counter!(
            "catalog_cache_coalesced_total",
            Unit::Count,
            "Total number of requests that joined an in-flight computation."
        );
        describe_counter!(
            "catalog_cache_expired_total",
            Unit::Count,
            "Total number of entries dropped after their TTL elapsed."
        );
        describe_counter!(
            "catalog_cache_evict_total",
            Unit::Count,
            "Total number of entries evicted due to capacity."
        );
        describe_counter!(
            "catalog_cache_compute_failure_total",
            Unit::Count,
            "Total number of computations that produced a failure."
        );
        describe_histogram!(
            "catalog_cache_compute_ms",
            Unit::Milliseconds,
            "Computation latency for cache misses in milliseconds."
        );
    });
}
