use std::path::PathBuf;
use std::time::Duration;

use crate::server_utils::minutes_to_ms;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub game_db_path: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub idle_game_ttl_ms: u64,
    pub autosave_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            game_db_path: PathBuf::from(".data/games.json"),
            static_dir: None,
            idle_game_ttl_ms: minutes_to_ms(120),
            autosave_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let port = lookup("PORT")
            .and_then(|value| value.trim().parse::<u16>().ok())
            .unwrap_or(defaults.port);
        let game_db_path = lookup("GAME_DB_PATH")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.game_db_path);
        let static_dir = lookup("STATIC_DIR")
            .map(PathBuf::from)
            .or_else(|| {
                [PathBuf::from("dist/client"), PathBuf::from("../dist/client")]
                    .into_iter()
                    .find(|path| path.join("index.html").is_file())
            })
            .filter(|path| path.join("index.html").is_file());
        let idle_game_ttl_ms = lookup("IDLE_GAME_TTL_MINUTES")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|minutes| *minutes > 0)
            .map(minutes_to_ms)
            .unwrap_or(defaults.idle_game_ttl_ms);
        let autosave_interval = lookup("AUTOSAVE_SECONDS")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.autosave_interval);

        Self {
            port,
            game_db_path,
            static_dir,
            idle_game_ttl_ms,
            autosave_interval,
        }
    }
}
