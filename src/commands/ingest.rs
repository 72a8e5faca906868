use std::path::PathBuf;
use std::sync::Arc;

use crate::constants::{DEFAULT_SYMBOL_GROUP, VCI_RATE_LIMIT_PER_MINUTE};
use crate::models::IngestConfig;
use crate::services::{SqliteTickStore, VciClient};
use crate::utils::get_tick_db_path;
use crate::worker::MarketWorker;

pub async fn run(group: Option<String>, database: Option<PathBuf>) {
    super::init_tracing();

    let group = group.unwrap_or_else(|| DEFAULT_SYMBOL_GROUP.to_string());
    let db_path = database.unwrap_or_else(get_tick_db_path);

    println!("🚀 Starting tick ingestion for group {}", group);
    println!("📁 Tick database: {}", db_path.display());

    let store = match SqliteTickStore::new(db_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("❌ Failed to open tick database: {}", e);
            std::process::exit(1);
        }
    };

    let source = match VciClient::new(true, VCI_RATE_LIMIT_PER_MINUTE) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("❌ Failed to create VCI client: {}", e);
            std::process::exit(1);
        }
    };

    let worker = Arc::new(MarketWorker::new(
        source,
        store.clone(),
        IngestConfig::for_group(group),
    ));
    worker.start().await;

    println!("📡 Ingestion running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("⚠️  Failed to listen for shutdown signal: {}", e);
    }

    println!("🛑 Shutting down...");
    worker.stop().await;

    // Flush whatever the final pass left buffered
    if let Err(e) = worker.flush().await {
        eprintln!("⚠️  Final flush failed: {}", e);
    }

    match store.tick_count().await {
        Ok(count) => println!("✅ Stopped with {} ticks stored", count),
        Err(e) => eprintln!("⚠️  Failed to read tick count: {}", e),
    }
    store.close().await;
}
