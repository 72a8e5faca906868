mod cli;
mod commands;
mod constants;
mod error;
mod models;
mod services;
mod utils;
mod worker;

#[tokio::main]
async fn main() {
    cli::run().await;
}
