//! `mnemos-runtime` – Process plumbing around the memory engine.
//!
//! # Modules
//!
//! - [`driver`] – [`ConsolidationDriver`][driver::ConsolidationDriver]: a
//!   Tokio task that consolidates a shared engine on an interval and on
//!   demand.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber, tagged with the engine's shape, plus optional OTLP
//!   span export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod driver;
pub mod telemetry;

pub use driver::{ConsolidationDriver, SharedEngine, shared};
pub use telemetry::{LogFormat, TelemetrySettings, TracerProviderGuard, init_tracing};
