use tracing_subscriber::EnvFilter;

// Quiet by default, but keep the intake pipeline's own crates at info so
// thread lifecycle events stay visible without RUST_LOG.
const DEFAULT_FILTER: &str = "warn,triage=info,triage_intake=info,triage_discord=info";

pub(crate) fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
