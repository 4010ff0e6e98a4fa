use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Without `RUST_LOG` the crate logs at `info`, or `debug` when `debug` is set.
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(debug: bool) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("bulwark_core=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    let fmt_layer = fmt::layer().with_target(true);

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
