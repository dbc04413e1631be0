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

/// Applied when `RUST_LOG` is unset; sqlx logs every statement at `info`.
const QUIET_SQLX_DIRECTIVE: &str = "sqlx::query=warn";

/// Installs the process-wide subscriber from `[logging]`: `level` is the
/// default for every target (`encore::cache`, `encore::http::response`, ...)
/// and `RUST_LOG` refines it per target; `json = true` switches to one JSON
/// object per line with the active request span attached.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let mut env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        let directive = QUIET_SQLX_DIRECTIVE
            .parse()
            .map_err(|err| InfraError::telemetry(format!("invalid log directive: {err}")))?;
        env_filter = env_filter.add_directive(directive);
    }

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

/// Registers descriptions for the cache metrics. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "encore_cache_hit_total",
            Unit::Count,
            "Reads served from the cache store."
        );
        describe_counter!(
            "encore_cache_miss_total",
            Unit::Count,
            "Reads that fell through to the database."
        );
        describe_counter!(
            "encore_cache_store_error_total",
            Unit::Count,
            "Cache store operations that failed and were skipped."
        );
        describe_counter!(
            "encore_cache_invalidated_keys_total",
            Unit::Count,
            "Keys deleted by invalidation."
        );
        describe_histogram!(
            "encore_cache_invalidate_ms",
            Unit::Milliseconds,
            "Scan and delete latency of one invalidation in milliseconds."
        );
    });
}
