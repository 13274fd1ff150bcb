mod cli;
mod clock;
mod config;
mod effects;
mod engine;
mod identity;
mod model;
mod scheduler;
mod storage;
mod tally;
mod tasks;

use std::process;

use tracing_subscriber::EnvFilter;

use config::Config;
use storage::Storage;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let Some(path) = config.database.clone().or_else(Storage::default_path) else {
        eprintln!("Could not determine home directory.");
        process::exit(1);
    };

    let storage = match Storage::new(&path) {
        Ok(s) => s.with_busy_timeout(config.op_timeout()),
        Err(e) => {
            eprintln!("Failed to open database at {}: {e}", path.display());
            process::exit(1);
        }
    };

    if let Err(e) = cli::run(&config, storage).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
