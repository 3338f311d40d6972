//! Tracing subscriber setup for the binary.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "talkhead=info,warn";
const VERBOSE_FILTER: &str = "talkhead=debug,info";

/// Install a stderr `fmt` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` picks between the quiet and
/// debug defaults. Safe to call more than once (later calls are no-ops).
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
