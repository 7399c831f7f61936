//! Tracing subscriber initialization and panic capture.

use std::panic;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber and panic hook. Call once, before
/// any other component logs.
pub fn init_tracing(service_name: &str, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{service_name}={level},tower_http=warn,hyper=warn"))
    });

    let subscriber = fmt::Subscriber::builder().with_env_filter(filter);

    if cfg!(debug_assertions) {
        subscriber.with_target(true).compact().init();
    } else {
        subscriber.json().with_current_span(true).init();
    }

    panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| "non-string panic payload".to_string());
        tracing::error!(location = %location, payload = %payload, "panic");
    }));
}
