//! Tracing setup for binaries.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the log filter: `RUST_LOG` wins, otherwise `SLOTGATE_LOG` picks the
/// level for this crate.
fn build_filter() -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    EnvFilter::new(format!(
        "slotgate={}",
        level_from(std::env::var("SLOTGATE_LOG").ok().as_deref())
    ))
}

fn level_from(value: Option<&str>) -> &'static str {
    match value {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

/// Initialize tracing with `SLOTGATE_LOG` and `LOG_FORMAT` support.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = build_filter();
    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
