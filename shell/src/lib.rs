mod config;
mod event_loop;

pub use config::*;
pub use event_loop::*;

/// Initializes logging to stderr, filtered by `RUST_LOG` and `info` by default.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
