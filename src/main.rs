use clap::Parser;
use mimalloc::MiMalloc;

use redcat_rs::cli::Cli;
use redcat_rs::config::Config;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = Config::from_env();
    redcat_rs::cli::run(cli, config).await;
}
