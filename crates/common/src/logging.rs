use std::env;

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use tracing::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

pub const OTLP_URL_ENVVAR: &str = "KILN_OTLP_URL";
pub const SVC_LABEL_ENVVAR: &str = "KILN_SVC_LABEL";

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    whoami: String,
    otel_url: Option<String>,
}

impl LoggerConfig {
    /// Creates a new empty instance with whoami set.
    pub fn new(whoami: String) -> Self {
        Self {
            whoami,
            otel_url: None,
        }
    }

    pub fn with_base_name(s: &str) -> Self {
        Self::new(get_whoami_string(s))
    }

    /// Picks up the OTLP endpoint from the environment, if set.
    pub fn from_env(base: &str) -> Self {
        let mut config = Self::with_base_name(base);
        if let Some(url) = get_otlp_url_from_env() {
            config.set_otlp_url(url);
        }
        config
    }

    pub fn set_otlp_url(&mut self, url: String) {
        self.otel_url = Some(url);
    }

    pub fn whoami(&self) -> &str {
        &self.whoami
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::with_base_name("(kiln-service)")
    }
}

/// Initializes the logging subsystem with the provided config.  Must be called
/// from within a tokio runtime if an OTLP url is set.
pub fn init(config: LoggerConfig) {
    let filt = tracing_subscriber::EnvFilter::from_default_env();

    // Stdout logging.
    let stdout_sub = tracing_subscriber::fmt::layer().compact().with_filter(filt);

    // OpenTelemetry output.
    if let Some(otel_url) = &config.otel_url {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(otel_url);

        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tp) => {
                let tt = tp.tracer("kiln-log");
                let otel_sub = tracing_opentelemetry::layer().with_tracer(tt);

                tracing_subscriber::registry()
                    .with(stdout_sub)
                    .with(otel_sub)
                    .init();
            }
            Err(e) => {
                tracing_subscriber::registry().with(stdout_sub).init();
                warn!(%otel_url, err = %e, "failed to start otlp exporter, logging to stdout only");
            }
        }
    } else {
        tracing_subscriber::registry().with(stdout_sub).init();
    }

    info!(whoami = %config.whoami, "logging started");
}

/// Shuts down the logging subsystem, flushing the exporter if there is one.
pub fn finalize() {
    info!("shutting down logging");
    opentelemetry::global::shutdown_tracer_provider();
}

/// Gets the OTLP URL from the standard envvar.
pub fn get_otlp_url_from_env() -> Option<String> {
    env::var(OTLP_URL_ENVVAR).ok()
}

/// Gets the service label from the standard envvar, which should be included
/// in the whoami string.
pub fn get_service_label_from_env() -> Option<String> {
    env::var(SVC_LABEL_ENVVAR).ok()
}

/// Computes a standard whoami string.
pub fn get_whoami_string(base: &str) -> String {
    whoami_with_label(base, get_service_label_from_env().as_deref())
}

fn whoami_with_label(base: &str, label: Option<&str>) -> String {
    match label {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}
