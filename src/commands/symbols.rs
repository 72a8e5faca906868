use crate::constants::{DEFAULT_SYMBOL_GROUP, VCI_RATE_LIMIT_PER_MINUTE};
use crate::services::VciClient;

pub async fn run(group: Option<String>) {
    super::init_tracing();

    let group = group.unwrap_or_else(|| DEFAULT_SYMBOL_GROUP.to_string());

    let client = match VciClient::new(true, VCI_RATE_LIMIT_PER_MINUTE) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("❌ Failed to create VCI client: {}", e);
            std::process::exit(1);
        }
    };

    let symbols = client.symbols_by_group(&group).await;

    if symbols.is_empty() {
        println!("⚠️  No symbols resolved for group {}", group);
        return;
    }

    println!("📊 {} symbols in {}:", symbols.len(), group);
    for symbol in symbols {
        println!("  {}", symbol);
    }
}
