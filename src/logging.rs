pub const LOG_ENV: &str = "BARKEEP_LOG";

/// Installs the stderr fmt subscriber. Safe to call more than once.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_directive(
            std::env::var(LOG_ENV).ok(),
            std::env::var("RUST_LOG").ok(),
        ))
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter_directive(own: Option<String>, rust_log: Option<String>) -> String {
    own.filter(|value| !value.trim().is_empty())
        .or_else(|| rust_log.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| "info".to_owned())
}

#[cfg(test)]
#[path = "tests/logging_tests.rs"]
mod tests;
