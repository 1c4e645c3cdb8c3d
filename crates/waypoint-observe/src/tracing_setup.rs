//! Global tracing subscriber for the `waypoint` binary.
//!
//! Logs always go to stderr so that stdout carries only command output (and
//! stays parseable under `--json`). Two environment switches adjust it:
//!
//! - `WAYPOINT_LOG_FORMAT=json` emits one JSON object per event.
//! - `WAYPOINT_OTEL=1` also exports spans through the OpenTelemetry stdout
//!   exporter.
//!
//! ```no_run
//! use waypoint_observe::tracing_setup::{LogSettings, init_tracing, shutdown_tracing};
//!
//! init_tracing(&LogSettings::from_env("warn")).unwrap();
//! // ... run the command ...
//! shutdown_tracing();
//! ```

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

pub const OTEL_ENV: &str = "WAYPOINT_OTEL";
pub const LOG_FORMAT_ENV: &str = "WAYPOINT_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Everything `init_tracing` needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Directive used when `RUST_LOG` is unset or invalid.
    pub default_directive: String,
    pub format: LogFormat,
    pub otel: bool,
}

impl LogSettings {
    /// Read the format and OTel switches from the environment.
    pub fn from_env(default_directive: &str) -> Self {
        Self::from_lookup(default_directive, |key| std::env::var(key).ok())
    }

    fn from_lookup(default_directive: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let format = match lookup(LOG_FORMAT_ENV) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let otel = lookup(OTEL_ENV)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            default_directive: default_directive.to_string(),
            format,
            otel,
        }
    }

    /// `RUST_LOG` when set and valid, else the default directive.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_directive))
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(settings: &LogSettings) -> Result<(), Box<dyn std::error::Error>> {
    let text = (settings.format == LogFormat::Text).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });
    let json = (settings.format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
    });

    let otel = settings.otel.then(|| {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("waypoint");
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        tracing_opentelemetry::layer().with_tracer(tracer)
    });

    tracing_subscriber::registry()
        .with(settings.filter())
        .with(text)
        .with(json)
        .with(otel)
        .try_init()?;
    Ok(())
}

/// Flush and shut down the OTel provider. No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}
