use std::path::PathBuf;

/// Get tick database path from environment variable or use default
pub fn get_tick_db_path() -> PathBuf {
    std::env::var("TICK_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/ticks.db"))
}
