//! Logging and trace export for a Mnemos process.
//!
//! [`init_tracing`] installs one `tracing` subscriber for the whole process:
//! an `EnvFilter`, a compact or JSON console formatter, and, when a collector
//! endpoint is configured, an OTLP/HTTP span exporter.
//!
//! The memory engine emits these spans:
//!
//! | Span | Emitted by |
//! |---|---|
//! | `memory.store` | `MemoryEngine::store_memory` (field `entry_id`) |
//! | `memory.search` | `MemoryEngine::search` (fields `limit`, `threshold`) |
//! | `memory.cluster` | `PendingConsolidation::cluster` (field `entries`) |
//! | `memory.consolidate` | `MemoryEngine::finish_consolidation` (field `clusters`) |
//! | `consolidation.cluster` | the driver's blocking clustering task |
//!
//! Exported spans carry the engine shape as resource attributes
//! (`mnemos.embedding.dimension`, `mnemos.max_memory_size`, `mnemos.agent`),
//! so traces from differently tuned engines can be told apart.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector base URL (e.g. `http://localhost:4318`); enables span export. |
//! | `RUST_LOG` | Log filter; defaults to [`DEFAULT_FILTER`]. |
//! | `MNEMOS_LOG_FORMAT=json` | Newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! use mnemos_memory::MemoryConfig;
//! use mnemos_runtime::telemetry::{TelemetrySettings, init_tracing};
//!
//! let settings = TelemetrySettings::from_env("mnemos")
//!     .with_engine(&MemoryConfig::default())
//!     .with_agent("operator");
//! // Hold the guard until exit; dropping it flushes pending spans.
//! let _guard = init_tracing(&settings);
//! ```

use mnemos_memory::MemoryConfig;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

const SERVICE_NAMESPACE: &str = "mnemos";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// `json` (any case, surrounding blanks ignored) selects JSON; anything
    /// else is compact.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Everything [`init_tracing`] needs to know about the process.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySettings {
    pub service_name: String,
    pub filter: String,
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
    /// Agent id the process acts as, if any.
    pub agent: Option<String>,
    pub embedding_dimension: Option<usize>,
    pub max_memory_size: Option<usize>,
}

impl TelemetrySettings {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            filter: DEFAULT_FILTER.to_string(),
            log_format: LogFormat::Compact,
            otlp_endpoint: None,
            agent: None,
            embedding_dimension: None,
            max_memory_size: None,
        }
    }

    /// Settings for `service_name`, read from `RUST_LOG`,
    /// `MNEMOS_LOG_FORMAT` and `OTEL_EXPORTER_OTLP_ENDPOINT`.
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let mut settings = Self::new(service_name);
        if let Ok(filter) = std::env::var("RUST_LOG")
            && !filter.trim().is_empty()
        {
            settings.filter = filter;
        }
        settings.log_format =
            LogFormat::from_setting(std::env::var("MNEMOS_LOG_FORMAT").ok().as_deref());
        settings.otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|e| !e.trim().is_empty());
        settings
    }

    /// Record the engine shape as resource attributes.
    pub fn with_engine(mut self, cfg: &MemoryConfig) -> Self {
        self.embedding_dimension = Some(cfg.dimension);
        self.max_memory_size = Some(cfg.max_memory_size);
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// Install the global subscriber described by `settings`.
///
/// A second call in the same process leaves the first subscriber in place
/// and reports the conflict on stderr.
pub fn init_tracing(settings: &TelemetrySettings) -> TracerProviderGuard {
    let env_filter =
        EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let provider = build_provider(settings);

    let otel_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(settings.service_name.clone()))
    });
    let (json_layer, compact_layer) = match settings.log_format {
        LogFormat::Json => (Some(fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(fmt::layer().compact())),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
    {
        eprintln!("[{}] tracing already initialised: {e}", settings.service_name);
    }

    TracerProviderGuard(provider)
}

/// Shuts the span exporter down on drop, flushing pending spans.  Hold it in
/// `main` for the life of the process.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[mnemos] span exporter shutdown error: {e}");
        }
    }
}

fn resource_attributes(settings: &TelemetrySettings) -> Vec<KeyValue> {
    let mut attrs = vec![KeyValue::new("service.namespace", SERVICE_NAMESPACE)];
    if let Some(agent) = &settings.agent {
        attrs.push(KeyValue::new("mnemos.agent", agent.clone()));
    }
    if let Some(dim) = settings.embedding_dimension {
        attrs.push(KeyValue::new("mnemos.embedding.dimension", dim as i64));
    }
    if let Some(max) = settings.max_memory_size {
        attrs.push(KeyValue::new("mnemos.max_memory_size", max as i64));
    }
    attrs
}

/// `None` without an endpoint, or when the exporter cannot be built (the
/// error goes to stderr and logging continues without export).
fn build_provider(settings: &TelemetrySettings) -> Option<SdkTracerProvider> {
    let endpoint = settings.otlp_endpoint.clone()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[{}] OTLP exporter init failed: {e}", settings.service_name))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(settings.service_name.clone())
        .with_attributes(resource_attributes(settings))
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // Synchronous export: the CLI builds its Tokio runtime after
            // tracing is up.
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr<'a>(attrs: &'a [KeyValue], key: &str) -> Option<&'a KeyValue> {
        attrs.iter().find(|kv| kv.key.as_str() == key)
    }

    // ── settings ─────────────────────────────────────────────────────────────

    #[test]
    fn log_format_accepts_json_only() {
        assert_eq!(LogFormat::from_setting(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::from_setting(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::from_setting(Some("compact")), LogFormat::Compact);
        assert_eq!(LogFormat::from_setting(None), LogFormat::Compact);
    }

    #[test]
    fn with_engine_records_engine_shape() {
        let cfg = MemoryConfig {
            dimension: 64,
            max_memory_size: 500,
            ..Default::default()
        };
        let settings = TelemetrySettings::new("mnemos").with_engine(&cfg).with_agent("ops");
        assert_eq!(settings.embedding_dimension, Some(64));
        assert_eq!(settings.max_memory_size, Some(500));
        assert_eq!(settings.agent.as_deref(), Some("ops"));
        assert_eq!(settings.filter, DEFAULT_FILTER);
    }

    // ── resource ─────────────────────────────────────────────────────────────

    #[test]
    fn resource_carries_engine_attributes() {
        let settings = TelemetrySettings::new("mnemos")
            .with_engine(&MemoryConfig::default())
            .with_agent("operator");
        let attrs = resource_attributes(&settings);
        assert_eq!(
            attr(&attrs, "mnemos.embedding.dimension").map(|kv| kv.value.to_string()),
            Some("384".to_string())
        );
        assert_eq!(
            attr(&attrs, "mnemos.agent").map(|kv| kv.value.to_string()),
            Some("operator".to_string())
        );
        assert!(attr(&attrs, "service.namespace").is_some());
    }

    #[test]
    fn bare_settings_only_carry_namespace() {
        let attrs = resource_attributes(&TelemetrySettings::new("mnemos"));
        assert_eq!(attrs.len(), 1);
    }

    // ── provider ─────────────────────────────────────────────────────────────

    #[test]
    fn no_endpoint_means_no_exporter() {
        let settings = TelemetrySettings::new("mnemos");
        assert!(build_provider(&settings).is_none());
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }
}
