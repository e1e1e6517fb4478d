//! Observability helpers.
//!
//! With the `metrics` feature, [`METRICS`] records applied migrations, their
//! duration and failures into a Prometheus registry. With the `tracing`
//! feature, [`tracing_helpers`] provides the spans used by the executor,
//! the driver and the migrator.

#[cfg(feature = "metrics")]
pub use self::prometheus_metrics::{MigraphMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};

    pub static METRICS: Lazy<MigraphMetrics> = Lazy::new(MigraphMetrics::init);

    pub struct MigraphMetrics {
        pub registry: Registry,
        provider: SdkMeterProvider,
        pub migrations_applied: Counter<u64>,
        pub migration_failures: Counter<u64>,
        pub script_errors: Counter<u64>,
        pub migration_duration: Histogram<f64>,
    }

    impl MigraphMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let provider = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => SdkMeterProvider::builder().with_reader(exporter).build(),
                Err(e) => {
                    log::warn!("prometheus exporter unavailable, metrics are not exported: {e}");
                    SdkMeterProvider::builder().build()
                }
            };
            let meter = provider.meter("migraph");

            let migrations_applied = meter
                .u64_counter("migraph_migrations_applied_total")
                .with_description("Migrations applied and persisted")
                .build();

            let migration_failures = meter
                .u64_counter("migraph_migration_failures_total")
                .with_description("Migrations whose apply or persist step failed")
                .build();

            let script_errors = meter
                .u64_counter("migraph_script_errors_total")
                .with_description("Migration scripts rejected by the database")
                .build();

            let migration_duration = meter
                .f64_histogram("migraph_migration_duration_seconds")
                .with_description("Time spent applying and persisting one migration")
                .build();

            Self {
                registry,
                provider,
                migrations_applied,
                migration_failures,
                script_errors,
                migration_duration,
            }
        }

        pub fn record_applied(&self, id: &str, elapsed: std::time::Duration) {
            let attrs = [KeyValue::new("migration", id.to_string())];
            self.migrations_applied.add(1, &attrs);
            self.migration_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_failure(&self, id: &str) {
            self.migration_failures.add(1, &[KeyValue::new("migration", id.to_string())]);
        }

        pub fn record_script_error(&self) {
            self.script_errors.add(1, &[]);
        }

        /// Prometheus text exposition of everything recorded so far
        pub fn render(&self) -> String {
            if let Err(e) = self.provider.force_flush() {
                log::debug!("metrics flush failed: {e}");
            }
            let mut buffer = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                log::warn!("failed to encode metrics: {e}");
                return String::new();
            }
            String::from_utf8_lossy(&buffer).into_owned()
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    pub fn execute_query_span(query: &str) -> Span {
        let statement: String = query.trim().chars().take(80).collect();
        tracing::debug_span!("migraph.execute", db.statement = %statement)
    }

    pub fn acquire_connection_span() -> Span {
        tracing::debug_span!("migraph.connect")
    }

    pub fn apply_migration_span(id: &str) -> Span {
        tracing::info_span!("migraph.apply", migration = %id)
    }

    pub fn driver_span(operation: &'static str) -> Span {
        tracing::debug_span!("migraph.driver", operation)
    }
}
