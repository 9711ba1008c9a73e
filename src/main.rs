mod api;
mod blockchain;
mod config;
mod error;
mod queue;

use std::fs::OpenOptions;
use std::io;

use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;
use log::{error, info, warn};

use api::AppState;
use blockchain::Chain;
use config::Config;
use queue::NoteQueue;

#[actix_web::main]
async fn main() -> io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let config = Config::from_env();

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.data_path)?;

    let chain = match Chain::load(&mut file) {
        Ok(Some(chain)) => chain,
        Ok(None) => {
            info!("creating ledger '{}' at {}", config.title, config.data_path.display());
            Chain::new(config.title.clone()).map_err(io::Error::other)?
        }
        Err(e) => {
            if e.is_decode() {
                error!("{} is not a readable ledger: {e}", config.data_path.display());
            }
            return Err(io::Error::other(e));
        }
    };
    if chain.is_empty() {
        info!("ledger '{}' holds no notes yet", chain.title());
    } else if !chain.is_verified() {
        warn!("ledger '{}' failed verification; it may have been tampered with", chain.title());
    }

    let state = web::Data::new(AppState {
        queue: NoteQueue::spawn(chain, file),
        difficulty: config.difficulty,
    });

    println!(
        "⛓️ Starting notechain API at http://{}:{} (difficulty {})",
        config.host, config.port, config.difficulty
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
