use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "identity_service=info,crypto_core=info";

/// Install the JSON log subscriber, filtered by `RUST_LOG`.
///
/// Returns `false` when a global subscriber is already set.
pub fn init_tracing() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .json()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_noop() {
        init_tracing();
        assert!(!init_tracing());
    }
}
