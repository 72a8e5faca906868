mod ingest_config;
mod tick;

pub use ingest_config::IngestConfig;
pub use tick::Tick;
