pub mod market_worker;

pub use market_worker::MarketWorker;
