use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constants::BOX_COUNT;
use crate::engine::check_invariants;
use crate::types::{GameDoc, GameStatus, SabotageState};

const ARCHIVE_VERSION: u8 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameArchiveFile {
    version: u8,
    saved_at_iso: String,
    games: BTreeMap<String, GameDoc>,
}

#[derive(Clone, Debug, Deserialize)]
struct GameArchiveFileRaw {
    version: u8,
    games: BTreeMap<String, serde_json::Value>,
}

pub struct GameArchive {
    file_path: PathBuf,
}

impl GameArchive {
    pub fn new(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn load(&self) -> Vec<GameDoc> {
        load_games(&self.file_path)
    }

    pub fn save(&self, games: &[GameDoc]) {
        if let Some(parent) = self.file_path.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                warn!(
                    path = %parent.display(),
                    %error,
                    "failed to create archive directory"
                );
                return;
            }
        }

        let payload = GameArchiveFile {
            version: ARCHIVE_VERSION,
            saved_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            games: games
                .iter()
                .map(|doc| (doc.code.clone(), doc.clone()))
                .collect(),
        };
        match serde_json::to_string_pretty(&payload) {
            Ok(text) => {
                if let Err(error) = fs::write(&self.file_path, text) {
                    warn!(path = %self.file_path.display(), %error, "failed to write archive");
                }
            }
            Err(error) => {
                warn!(path = %self.file_path.display(), %error, "failed to serialize archive");
            }
        }
    }
}

fn load_games(path: &Path) -> Vec<GameDoc> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), %error, "failed to read archive");
            }
            return Vec::new();
        }
    };
    let parsed = match serde_json::from_str::<GameArchiveFileRaw>(&text) {
        Ok(value) if value.version == ARCHIVE_VERSION => value,
        Ok(value) => {
            warn!(path = %path.display(), version = value.version, "unsupported archive version");
            return Vec::new();
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to parse archive");
            return Vec::new();
        }
    };

    let mut games = Vec::new();
    for (code, raw_value) in parsed.games {
        let doc: GameDoc = match serde_json::from_value(raw_value) {
            Ok(doc) => doc,
            Err(error) => {
                warn!(%code, %error, "skipping unreadable archived game");
                continue;
            }
        };
        let Some(doc) = sanitize_archived(code, doc) else {
            continue;
        };
        games.push(doc);
    }
    info!(path = %path.display(), count = games.len(), "archive loaded");
    games
}

fn sanitize_archived(code: String, mut doc: GameDoc) -> Option<GameDoc> {
    if doc.code != code {
        warn!(%code, stored = %doc.code, "archived game key does not match its code");
        return None;
    }
    if doc.players.is_empty() {
        warn!(%code, "archived game has no players");
        return None;
    }
    let anomalies = check_invariants(&doc);
    if !anomalies.is_empty() {
        warn!(%code, ?anomalies, "archived game violates invariants");
        return None;
    }
    // Roulette timers are wall-clock and do not survive a restart.
    doc.sabotage = SabotageState::default();
    if doc.status == GameStatus::Active && doc.boxes.len() >= BOX_COUNT {
        doc.status = GameStatus::Finished;
    }
    Some(doc)
}
