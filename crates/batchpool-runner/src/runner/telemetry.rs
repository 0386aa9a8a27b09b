//! Logging, tracing, and job metrics for the runner.
//!
//! Log events always go to stderr through `tracing_subscriber`, leaving stdout
//! to the outcome records. OpenTelemetry export is opt-in:
//!
//! - `otel-traces`: spans are exported.
//! - `otel-metrics`: job counters and the job duration histogram are exported.
//! - `otel-stdout`: the exporters print to stdout. Needs one of the above.
//!
//! [`record_job`] is callable regardless of features and does nothing unless
//! `otel-metrics` is enabled.
//!
//! ```bash
//! cargo run -p batchpool-runner --features otel-traces,otel-metrics,otel-stdout -- --input users.jsonl
//! ```

#[cfg(all(
    feature = "otel-stdout",
    not(any(feature = "otel-traces", feature = "otel-metrics"))
))]
compile_error!("'otel-stdout' needs 'otel-traces' or 'otel-metrics'.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(any(feature = "otel-traces", feature = "otel-metrics"))]
use opentelemetry_semantic_conventions as semconv;

#[cfg(any(feature = "otel-traces", feature = "otel-metrics"))]
const SERVICE_NAME: &str = "batchpool-runner";

#[cfg(feature = "otel-stdout")]
const EXPORT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Exporter handles that must be flushed before the process exits.
#[derive(Default)]
pub struct TelemetryProviders {
    #[cfg(feature = "otel-traces")]
    tracer: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
    #[cfg(feature = "otel-metrics")]
    meter: Option<opentelemetry_sdk::metrics::SdkMeterProvider>,
}

/// Installs the global subscriber, plus the OpenTelemetry layers selected by
/// features.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[allow(unused_mut)]
    let mut providers = TelemetryProviders::default();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    let subscriber = tracing_subscriber::registry().with(filter).with(log);

    #[cfg(feature = "otel-traces")]
    let subscriber = {
        use opentelemetry::trace::TracerProvider;

        let provider = tracer_provider();
        opentelemetry::global::set_tracer_provider(provider.clone());
        let tracer = provider.tracer_with_scope(scope());
        providers.tracer = Some(provider);

        subscriber.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer)
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "otel-metrics")]
    let subscriber = {
        let provider = meter_provider();
        opentelemetry::global::set_meter_provider(provider.clone());
        let _ = JOB_METRICS.set(JobMetrics::new(
            &opentelemetry::global::meter_with_scope(scope()),
        ));
        providers.meter = Some(provider.clone());

        subscriber.with(tracing_opentelemetry::MetricsLayer::new(provider))
    };

    subscriber.try_init()?;
    Ok(providers)
}

/// Flushes and shuts down whatever exporters are running. Failures go to
/// stderr directly since logging is being torn down with them.
#[allow(clippy::needless_pass_by_value)]
pub fn shutdown_telemetry(_providers: TelemetryProviders) {
    #[cfg(feature = "otel-traces")]
    {
        if let Some(tracer) = &_providers.tracer {
            if let Err(e) = tracer.force_flush().and_then(|()| tracer.shutdown()) {
                eprintln!("Failed to shut down trace export: {e:?}");
            }
        }
    }

    #[cfg(feature = "otel-metrics")]
    {
        if let Some(meter) = &_providers.meter {
            if let Err(e) = meter.force_flush().and_then(|()| meter.shutdown()) {
                eprintln!("Failed to shut down metric export: {e:?}");
            }
        }
    }
}

#[cfg(any(feature = "otel-traces", feature = "otel-metrics"))]
fn scope() -> opentelemetry::InstrumentationScope {
    opentelemetry::InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semconv::SCHEMA_URL)
        .build()
}

#[cfg(any(feature = "otel-traces", feature = "otel-metrics"))]
fn resource() -> opentelemetry_sdk::Resource {
    opentelemetry_sdk::Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [opentelemetry::KeyValue::new(
                semconv::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semconv::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "otel-traces")]
fn tracer_provider() -> opentelemetry_sdk::trace::SdkTracerProvider {
    use opentelemetry_sdk::trace;

    let builder = trace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "otel-stdout")]
    let builder = builder.with_span_processor(
        trace::BatchSpanProcessor::builder(opentelemetry_stdout::SpanExporter::default())
            .with_batch_config(
                trace::BatchConfigBuilder::default()
                    .with_scheduled_delay(EXPORT_INTERVAL)
                    .build(),
            )
            .build(),
    );

    builder.build()
}

#[cfg(feature = "otel-metrics")]
fn meter_provider() -> opentelemetry_sdk::metrics::SdkMeterProvider {
    use opentelemetry_sdk::metrics;

    let builder = metrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "otel-stdout")]
    let builder = builder.with_reader(
        metrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(EXPORT_INTERVAL)
            .build(),
    );

    builder.build()
}

/// Something that happened to a job, as seen by the runner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobEvent {
    /// Accepted into the intake queue.
    Submitted,
    /// Refused because the intake queue was full.
    Rejected,
    /// Finished successfully after `elapsed_ms` of execution.
    Succeeded { elapsed_ms: f64 },
    /// Failed or panicked after `elapsed_ms` of execution.
    Failed { elapsed_ms: f64 },
}

#[cfg(feature = "otel-metrics")]
struct JobMetrics {
    submitted: opentelemetry::metrics::Counter<u64>,
    rejected: opentelemetry::metrics::Counter<u64>,
    succeeded: opentelemetry::metrics::Counter<u64>,
    failed: opentelemetry::metrics::Counter<u64>,
    duration_ms: opentelemetry::metrics::Histogram<f64>,
}

#[cfg(feature = "otel-metrics")]
static JOB_METRICS: std::sync::OnceLock<JobMetrics> = std::sync::OnceLock::new();

#[cfg(feature = "otel-metrics")]
impl JobMetrics {
    fn new(meter: &opentelemetry::metrics::Meter) -> Self {
        let counter = |name: &'static str, description: &'static str| {
            meter.u64_counter(name).with_description(description).build()
        };

        Self {
            submitted: counter("jobs_submitted", "Jobs accepted into the intake queue"),
            rejected: counter("jobs_rejected", "Jobs refused because the intake queue was full"),
            succeeded: counter("jobs_succeeded", "Jobs that finished successfully"),
            failed: counter("jobs_failed", "Jobs that returned an error or panicked"),
            duration_ms: meter
                .f64_histogram("job_duration")
                .with_unit("ms")
                .with_description("Time spent executing a job")
                .build(),
        }
    }
}

/// Counts `event` in the exported job metrics.
#[cfg(feature = "otel-metrics")]
pub fn record_job(event: JobEvent) {
    let Some(metrics) = JOB_METRICS.get() else {
        return;
    };

    match event {
        JobEvent::Submitted => metrics.submitted.add(1, &[]),
        JobEvent::Rejected => metrics.rejected.add(1, &[]),
        JobEvent::Succeeded { elapsed_ms } => {
            metrics.succeeded.add(1, &[]);
            metrics.duration_ms.record(elapsed_ms, &[]);
        }
        JobEvent::Failed { elapsed_ms } => {
            metrics.failed.add(1, &[]);
            metrics.duration_ms.record(elapsed_ms, &[]);
        }
    }
}

/// Counts `event` in the exported job metrics.
#[cfg(not(feature = "otel-metrics"))]
pub const fn record_job(_event: JobEvent) {}
