//! provides logging helpers

use std::io::IsTerminal;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Installs the global subscriber with `INFO` as the default level.
pub fn init() {
    init_with_default(LevelFilter::INFO);
}

/// Installs the global subscriber.
///
/// Events go to stderr. `RUST_LOG` overrides `default_level`. Colors are only
/// used when stderr is a terminal, so container logs stay plain text.
pub fn init_with_default(default_level: LevelFilter) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_filter(env_filter);

    registry().with(fmt_layer).init();
}

/// Reports panics through `tracing` after the default hook has run.
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}
