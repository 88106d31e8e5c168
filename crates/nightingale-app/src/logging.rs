//! Subscriber setup for the `nightingale` binary.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives (`RUST_LOG` syntax).
pub const LOG_ENV: &str = "NIGHTINGALE_LOG";

/// Install the global subscriber. Everything goes to stderr so stdout stays
/// reserved for the result JSON.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true)
    });
    let terminal_layer = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(terminal_layer)
        .try_init();
}
