use tracing_subscriber::{fmt, EnvFilter};

/// Install the stderr fmt subscriber. `RUST_LOG` overrides `filter`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    tracing::debug!("tracing initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing("debug");
        init_tracing("not a [valid filter");
        tracing::info!("still logging");
    }
}
