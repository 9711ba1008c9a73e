use std::env;
use std::path::PathBuf;

use log::warn;

use crate::blockchain::{DEFAULT_DIFFICULTY, DEFAULT_TITLE, MAX_DIFFICULTY};

/// Runtime settings, read from the environment (and `.env`, if present).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Ledger file, created on first start.
    pub data_path: PathBuf,
    /// Title written into a newly created ledger.
    pub title: String,
    /// Proof-of-work bits for submitted notes.
    pub difficulty: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port: u16 = var("PORT").and_then(|v| v.parse().ok()).unwrap_or(8080);
        let data_path = var("NOTECHAIN_DATA").map_or_else(|| PathBuf::from("data"), PathBuf::from);
        let title = var("NOTECHAIN_TITLE").unwrap_or_else(|| DEFAULT_TITLE.to_string());

        let difficulty = match var("NOTECHAIN_DIFFICULTY").map(|v| v.parse::<u32>()) {
            None => DEFAULT_DIFFICULTY,
            Some(Ok(bits)) if bits <= MAX_DIFFICULTY => bits,
            Some(_) => {
                warn!(
                    "NOTECHAIN_DIFFICULTY must be 0..={MAX_DIFFICULTY}; using {DEFAULT_DIFFICULTY}"
                );
                DEFAULT_DIFFICULTY
            }
        };

        Self {
            host,
            port,
            data_path,
            title,
            difficulty,
        }
    }
}
