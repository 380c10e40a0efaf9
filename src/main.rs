use clap::Parser;
use fireplan::api::{Cli, run_cli};

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run_cli(Cli::parse()).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
