//! Logging and OpenTelemetry setup shared by the binaries
//!
//! Logs go to stderr so command output on stdout stays machine readable.
//! Spans are exported over OTLP only when `OTEL_EXPORTER_OTLP_ENDPOINT` is
//! set, and credential-bearing attributes are redacted before export.

use opentelemetry::trace::TraceResult;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::resource::Resource;
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::{Config, Sampler, SpanProcessor};
use std::env;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, registry::LookupSpan, EnvFilter, Layer};

use crate::error::{Error, Result};

const SERVICE_NAME: &str = "pinvault";

/// Key fragments that mark an attribute as carrying a credential
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &[
    "authorization",
    "token",
    "secret",
    "jwt",
    "api_key",
    "project_id",
    "password",
];

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|f| key.contains(f))
}

/// A span processor that redacts credentials from span attributes
#[derive(Debug)]
struct ScrubbingProcessor {
    inner: std::sync::Mutex<Box<dyn SpanProcessor + Send + Sync>>,
}

impl ScrubbingProcessor {
    fn new(inner: Box<dyn SpanProcessor + Send + Sync>) -> Self {
        ScrubbingProcessor {
            inner: std::sync::Mutex::new(inner),
        }
    }

    fn scrub_attributes(&self, attributes: &mut [KeyValue]) {
        for kv in attributes.iter_mut() {
            if is_sensitive_key(kv.key.as_str()) {
                kv.value = opentelemetry::Value::String("[REDACTED]".into());
            }
        }
    }
}

impl SpanProcessor for ScrubbingProcessor {
    fn on_start(&self, span: &mut opentelemetry_sdk::trace::Span, cx: &opentelemetry::Context) {
        if let Ok(inner) = self.inner.lock() {
            inner.on_start(span, cx);
        }
    }

    fn on_end(&self, mut span: SpanData) {
        self.scrub_attributes(&mut span.attributes);
        if let Ok(inner) = self.inner.lock() {
            inner.on_end(span);
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        if let Ok(inner) = self.inner.lock() {
            inner.force_flush()
        } else {
            Ok(())
        }
    }

    fn shutdown(&mut self) -> TraceResult<()> {
        if let Ok(mut inner) = self.inner.lock() {
            inner.shutdown()
        } else {
            Ok(())
        }
    }
}

/// Build the OTLP tracing layer
pub fn init_telemetry<S>(_subscriber: &S) -> Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
{
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let resource = Resource::new(vec![
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&otlp_endpoint)
        .build_span_exporter()
        .map_err(|e| Error::ConfigError(format!("Failed to build OTLP exporter: {e}")))?;

    let batch_processor =
        opentelemetry_sdk::trace::BatchSpanProcessor::builder(exporter, runtime::Tokio).build();

    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_config(
            Config::default()
                .with_resource(resource)
                .with_sampler(Sampler::AlwaysOn),
        )
        .with_span_processor(ScrubbingProcessor::new(Box::new(batch_processor)))
        .build();

    let tracer = opentelemetry::trace::TracerProvider::tracer(&provider, SERVICE_NAME);
    global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}

/// Install the global subscriber: env filter (default `info`), a human or
/// JSON formatter on stderr, and OTLP export when configured.
pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let registry = tracing_subscriber::registry().with(env_filter).with(fmt_layer);

    if env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_err() {
        registry.init();
        return;
    }

    match init_telemetry(&registry) {
        Ok(otel_layer) => {
            registry.with(otel_layer).init();
            info!("OpenTelemetry tracing initialized");
        }
        Err(e) => {
            registry.init();
            warn!("OpenTelemetry tracing disabled: {}", e);
        }
    }
}

/// Flush and shut down the global tracer provider
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
