pub mod commands;
pub mod config;
pub mod errors;
pub mod executor;
pub mod navigation;
pub mod perception;
pub mod scenario_engine;
pub mod scenarios;

#[cfg(test)]
mod testkit;

/// Installs the fmt subscriber (`RUST_LOG`, default `info`) and loads `.env`.
pub fn init() {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
