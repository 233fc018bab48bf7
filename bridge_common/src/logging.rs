//! Logger setup shared by the binaries.
//!
//! Libraries only use the `log` macros; binaries call `init_logger` once.

/// Initialises `env_logger` with `Info` (or `Debug` when `verbose`) as the
/// default level. `RUST_LOG` still overrides it.
pub fn init_logger(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}
