//! Tracing initialization for the `orchestratord` daemon.
//!
//! Reads `RUST_LOG` for the filter (default `info`). When `LOG_FILE` is set,
//! logs additionally append to that file (plain text, `trace_id`/`span_id`
//! prefixed, no ANSI); console output always goes to stderr so it never
//! interleaves with anything written to stdout.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Initializes the global tracing subscriber. Safe to call once per process;
/// a second call is a no-op (errors are swallowed so tests that spin up
/// multiple daemons in one binary don't panic on double-init).
pub fn init() {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .event_format(crate::log_format::TextWithSpanIds::new())
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let registry = tracing_subscriber::registry().with(console_layer);

    if let Ok(path) = std::env::var("LOG_FILE") {
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .event_format(crate::log_format::TextWithSpanIds::new())
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(filter());
                let _ = registry.with(file_layer).try_init();
                return;
            }
            Err(e) => {
                eprintln!("orchestratord: could not open LOG_FILE {path}: {e}, logging to stderr only");
            }
        }
    }
    let _ = registry.try_init();
}
