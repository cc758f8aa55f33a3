use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_INIT: Once = Once::new();

/// Initialize the process-wide tracing subscriber exactly once.
///
/// `RUST_LOG` wins when set; `default_value` is the filter used otherwise
/// (e.g. `"info"` or `"keyview_base_hsm=debug"`). Subsequent calls are
/// no-ops, so every test can call this first without coordination.
///
/// # Panics
///
/// Will panic if the global subscriber cannot be installed.
pub fn log_init(default_value: &str) {
    LOG_INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_err() {
            unsafe {
                std::env::set_var("RUST_LOG", default_value);
            }
        }
        tracing_setup();
    });
}

fn tracing_setup() {
    let format = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .compact();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(format)
        .init();
}
