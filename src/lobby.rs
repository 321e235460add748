use std::collections::BTreeSet;

use rand::Rng as _;
use tracing::info;

use crate::constants::{
    clamp_max_players, player_color, JOIN_CODE_ALPHABET, JOIN_CODE_LEN, MIN_PLAYERS,
};
use crate::error::{LobbyError, StoreError};
use crate::patch::{GamePatch, SabotagePatch};
use crate::rng::Rng;
use crate::server_utils::sanitize_name;
use crate::special_squares::{SpecialSquareOptions, SpecialSquareRegistry};
use crate::store::DocumentStore;
use crate::types::{GameDoc, GameStatus, PlayerView};

const MAX_CODE_ATTEMPTS: usize = 64;

pub fn random_join_code() -> String {
    let alphabet = JOIN_CODE_ALPHABET.as_bytes();
    let mut rng = rand::rng();
    (0..JOIN_CODE_LEN)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

pub fn generate_join_code(store: &dyn DocumentStore) -> Result<String, LobbyError> {
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = random_join_code();
        if !store.exists(&code) {
            return Ok(code);
        }
    }
    Err(LobbyError::CodeSpaceExhausted)
}

fn make_player(identity: &str, name: &str, index: usize) -> PlayerView {
    PlayerView {
        id: identity.to_string(),
        name: sanitize_name(name),
        color: player_color(index).to_string(),
        score: 0,
        banked_turns: 0,
    }
}

pub fn new_game(code: &str, identity: &str, name: &str, max_players: usize, now_ms: u64) -> GameDoc {
    GameDoc::new(
        code,
        make_player(identity, name, 0),
        clamp_max_players(max_players),
        now_ms,
    )
}

pub fn join_patch(
    doc: &GameDoc,
    identity: &str,
    name: &str,
    now_ms: u64,
) -> Result<GamePatch, LobbyError> {
    if doc.status != GameStatus::Waiting {
        return Err(LobbyError::NotWaiting);
    }
    if doc.player_index_of(identity).is_some() {
        return Err(LobbyError::AlreadyJoined);
    }
    if doc.player_count() >= doc.max_players {
        return Err(LobbyError::GameFull);
    }
    let mut players = doc.players.clone();
    players.push(make_player(identity, name, players.len()));
    Ok(GamePatch {
        players: Some(players),
        last_activity: Some(now_ms),
        ..GamePatch::default()
    })
}

pub fn start_patch(
    doc: &GameDoc,
    identity: &str,
    options: SpecialSquareOptions,
    rng: &mut Rng,
    now_ms: u64,
) -> Result<GamePatch, LobbyError> {
    if doc.status != GameStatus::Waiting {
        return Err(LobbyError::NotWaiting);
    }
    if doc.host_id != identity {
        return Err(LobbyError::NotHost);
    }
    if doc.player_count() < MIN_PLAYERS {
        return Err(LobbyError::NotEnoughPlayers(MIN_PLAYERS));
    }

    let registry = SpecialSquareRegistry::new(options, rng);
    let players = doc
        .players
        .iter()
        .cloned()
        .map(|player| PlayerView {
            score: 0,
            banked_turns: 0,
            ..player
        })
        .collect();
    let mut sabotage = SabotagePatch::clear_glow();
    sabotage.merge(SabotagePatch::clear_effects());

    Ok(GamePatch {
        status: Some(GameStatus::Active),
        current_player_index: Some(0),
        players: Some(players),
        special_squares: Some(registry.place_initial(&BTreeSet::new(), rng)),
        sabotage: Some(sabotage),
        last_activity: Some(now_ms),
        ..GamePatch::default()
    })
}

pub fn leave_patch(doc: &GameDoc, identity: &str, now_ms: u64) -> Result<GamePatch, LobbyError> {
    let Some(index) = doc.player_index_of(identity) else {
        return Err(LobbyError::UnknownPlayer);
    };
    let mut patch = GamePatch {
        last_activity: Some(now_ms),
        ..GamePatch::default()
    };

    if doc.host_id == identity {
        let count = doc.player_count();
        let successor = (1..count)
            .map(|offset| (index + offset) % count)
            .map(|candidate| doc.players[candidate].id.clone())
            .next();
        patch.host_id = Some(successor.unwrap_or_default());
    }

    if doc.status == GameStatus::Waiting {
        let players: Vec<PlayerView> = doc
            .players
            .iter()
            .filter(|player| player.id != identity)
            .enumerate()
            .map(|(slot, player)| PlayerView {
                color: player_color(slot).to_string(),
                ..player.clone()
            })
            .collect();
        patch.players = Some(players);
    }
    Ok(patch)
}

pub fn create_game(
    store: &dyn DocumentStore,
    identity: &str,
    name: &str,
    max_players: usize,
    now_ms: u64,
) -> Result<GameDoc, LobbyError> {
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = generate_join_code(store)?;
        let doc = new_game(&code, identity, name, max_players, now_ms);
        match store.create(doc.clone()) {
            Ok(()) => {
                info!(%code, host = identity, "game created");
                return Ok(doc);
            }
            Err(StoreError::AlreadyExists(_)) => continue,
            Err(error) => return Err(error.into()),
        }
    }
    Err(LobbyError::CodeSpaceExhausted)
}

pub fn join_game(
    store: &dyn DocumentStore,
    code: &str,
    identity: &str,
    name: &str,
    now_ms: u64,
) -> Result<usize, LobbyError> {
    let doc = store.get(code)?;
    let patch = join_patch(&doc, identity, name, now_ms)?;
    store.update(code, &patch)?;
    info!(%code, player = identity, "player joined");
    Ok(doc.player_count())
}

pub fn start_game(
    store: &dyn DocumentStore,
    code: &str,
    identity: &str,
    options: SpecialSquareOptions,
    rng: &mut Rng,
    now_ms: u64,
) -> Result<(), LobbyError> {
    let doc = store.get(code)?;
    let patch = start_patch(&doc, identity, options, rng, now_ms)?;
    store.update(code, &patch)?;
    info!(%code, players = doc.player_count(), "game started");
    Ok(())
}

pub fn leave_game(
    store: &dyn DocumentStore,
    code: &str,
    identity: &str,
    now_ms: u64,
) -> Result<(), LobbyError> {
    let doc = store.get(code)?;
    let patch = leave_patch(&doc, identity, now_ms)?;
    store.update(code, &patch)?;
    info!(%code, player = identity, "player left");
    Ok(())
}
