//! Logging bootstrap.
//!
//! - Text or JSON output, RFC 3339 (UTC) timestamps.
//! - EnvFilter: explicit directive, else `RUST_LOG`, else `info`.
//! - `log` records are forwarded into `tracing`.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info,aethernova_presale=debug".
    pub filter: Option<String>,
    pub json: bool,
    /// Print target, file and line.
    pub with_targets_and_lines: bool,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            json: false,
            with_targets_and_lines: false,
            ansi: true,
        }
    }
}

fn build_filter(directive: Option<&str>) -> EnvFilter {
    match directive {
        Some(s) => EnvFilter::try_new(s).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Installs the global subscriber. Call once at startup.
pub fn init(cfg: LoggingConfig) -> anyhow::Result<()> {
    // a `log` logger may already be installed
    let _ = tracing_log::LogTracer::init();

    let filter = build_filter(cfg.filter.as_deref());

    let fmt_layer = {
        let base = fmt::layer()
            .with_target(cfg.with_targets_and_lines)
            .with_file(cfg.with_targets_and_lines)
            .with_line_number(cfg.with_targets_and_lines)
            .with_timer(fmt::time::UtcTime::rfc_3339());

        if cfg.json {
            base.json()
                .with_ansi(false)
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
                .boxed()
        } else {
            base.with_ansi(cfg.ansi).boxed()
        }
    };

    Registry::default().with(filter).with(fmt_layer).try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_directive_falls_back_to_info() {
        let f = build_filter(Some("aethernova_presale=loud"));
        assert_eq!(f.to_string(), "info");
        let f = build_filter(Some("warn,aethernova_presale=debug"));
        assert!(f.to_string().contains("aethernova_presale=debug"));
    }

    #[test]
    fn init_json_once() {
        let first = init(LoggingConfig {
            filter: Some("debug".into()),
            json: true,
            ..LoggingConfig::default()
        });
        assert!(first.is_ok());
        tracing::info!(target: "aethernova_presale::test", "hello from test");
        // global subscriber is already set
        assert!(init(LoggingConfig::default()).is_err());
    }
}
