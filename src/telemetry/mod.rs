//! Logging and OpenTelemetry tracing setup.
//!
//! Log output is plain text or JSON depending on `log.format`. When
//! `otel.enabled` is set, spans are additionally exported over OTLP gRPC.
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Log filter directives | `info` |
//! | `LOG__FORMAT` | `text` or `json` | `text` |
//! | `OTEL__ENABLED` | Enable OpenTelemetry tracing | `false` |
//! | `OTEL__ENDPOINT` | OTLP gRPC endpoint | `http://localhost:4317` |
//! | `OTEL__SERVICE_NAME` | Service name in traces | `push-dispatch-service` |
//! | `OTEL__SAMPLING_RATIO` | Trace sampling ratio (0.0-1.0) | `1.0` |

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
    Resource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogConfig, OtelConfig};
use crate::notification::DispatchResult;

pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
    #[error("Failed to build OTLP exporter: {0}")]
    ExporterBuild(String),
}

/// Keeps the tracer provider alive; flushes pending spans on drop
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            tracing::info!("Shutting down OpenTelemetry tracer provider");
            if let Err(e) = provider.shutdown() {
                eprintln!("OpenTelemetry shutdown failed: {}", e);
            }
        }
    }
}

/// Install the global tracing subscriber.
///
/// Must be called once, before the first log line. The returned guard has to
/// be held for the lifetime of the process.
pub fn init_telemetry(log: &LogConfig, otel: &OtelConfig) -> TelemetryResult<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let provider = if otel.enabled {
        Some(init_otel_tracer(otel)?)
    } else {
        None
    };

    let otel_layer = provider.as_ref().map(|provider| {
        let tracer = provider.tracer(otel.service_name.clone());
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    if otel.enabled {
        tracing::info!(
            endpoint = %otel.endpoint,
            service_name = %otel.service_name,
            sampling_ratio = %otel.sampling_ratio,
            "OpenTelemetry tracing initialized"
        );
    } else {
        tracing::info!(format = %log.format, "Tracing initialized (OpenTelemetry disabled)");
    }

    Ok(TelemetryGuard { provider })
}

fn sampler(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

fn init_otel_tracer(config: &OtelConfig) -> TelemetryResult<SdkTracerProvider> {
    use opentelemetry::KeyValue;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.endpoint)
        .build()
        .map_err(|e| TelemetryError::ExporterBuild(e.to_string()))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_sampler(sampler(config.sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                config.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        ]))
        .build();

    Ok(provider)
}

/// Common span attributes for dispatch traces.
pub mod attributes {
    use opentelemetry::KeyValue;

    use crate::notification::TargetKind;

    pub fn dispatch_id(id: uuid::Uuid) -> KeyValue {
        KeyValue::new("push.dispatch_id", id.to_string())
    }

    pub fn target_kind(kind: TargetKind) -> KeyValue {
        KeyValue::new("push.target", kind.as_str())
    }

    pub fn requested_count(count: usize) -> KeyValue {
        KeyValue::new("push.requested_count", count as i64)
    }

    pub fn succeeded_count(count: usize) -> KeyValue {
        KeyValue::new("push.succeeded_count", count as i64)
    }

    pub fn failed_count(count: usize) -> KeyValue {
        KeyValue::new("push.failed_count", count as i64)
    }

    pub fn invalidated_count(count: usize) -> KeyValue {
        KeyValue::new("push.invalidated_count", count as i64)
    }
}

/// Attach the totals of a finished dispatch to `span`
pub fn record_dispatch(span: &tracing::Span, result: &DispatchResult) {
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    for kv in [
        attributes::dispatch_id(result.dispatch_id),
        attributes::target_kind(result.target),
        attributes::requested_count(result.total_requested),
        attributes::succeeded_count(result.total_succeeded),
        attributes::failed_count(result.total_failed()),
        attributes::invalidated_count(result.invalidations.len()),
    ] {
        span.set_attribute(kv.key, kv.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::TargetKind;

    #[test]
    fn test_sampler_bounds() {
        assert!(matches!(sampler(1.5), Sampler::AlwaysOn));
        assert!(matches!(sampler(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler(0.25), Sampler::TraceIdRatioBased(r) if r == 0.25));
    }

    #[test]
    fn test_attributes() {
        assert_eq!(
            attributes::dispatch_id(uuid::Uuid::nil()).key.as_str(),
            "push.dispatch_id"
        );
        assert_eq!(
            attributes::target_kind(TargetKind::DeviceGroup).value.as_str(),
            "device_group"
        );
        assert_eq!(
            attributes::failed_count(3).value,
            opentelemetry::Value::I64(3)
        );
    }

    #[test]
    fn test_record_dispatch_without_subscriber() {
        let result = DispatchResult::empty(uuid::Uuid::nil(), TargetKind::Topic);
        record_dispatch(&tracing::Span::none(), &result);
    }

    #[test]
    fn test_guard_without_provider() {
        let guard = TelemetryGuard { provider: None };
        drop(guard);
    }
}
