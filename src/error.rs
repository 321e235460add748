use thiserror::Error;

use crate::types::{DotId, LineId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed key '{raw}'")]
pub struct KeyParseError {
    pub raw: String,
}

impl KeyParseError {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveRejection {
    #[error("game is not active")]
    GameNotActive,
    #[error("not your turn")]
    NotYourTurn,
    #[error("line {0} is outside the grid")]
    OutOfBounds(LineId),
    #[error("line {0} already exists")]
    LineExists(LineId),
    #[error("dot {0} is prohibited this turn")]
    ProhibitedDot(DotId),
    #[error("must use anchored dot {0}")]
    MustUseAnchoredDot(DotId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TapRejection {
    #[error("game is not active")]
    GameNotActive,
    #[error("active player cannot tap the roulette")]
    ActivePlayer,
    #[error("nothing is glowing")]
    NothingGlowing,
    #[error("unknown player")]
    UnknownPlayer,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("game {0} not found")]
    NotFound(String),
    #[error("game {0} already exists")]
    AlreadyExists(String),
    #[error("store unavailable")]
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LobbyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("game is not accepting players")]
    NotWaiting,
    #[error("game is full")]
    GameFull,
    #[error("player already joined")]
    AlreadyJoined,
    #[error("only host can start")]
    NotHost,
    #[error("need at least {0} players")]
    NotEnoughPlayers(usize),
    #[error("player is not in this game")]
    UnknownPlayer,
    #[error("could not allocate a free join code")]
    CodeSpaceExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lobby(#[from] LobbyError),
    #[error(transparent)]
    Move(#[from] MoveRejection),
    #[error(transparent)]
    Tap(#[from] TapRejection),
    #[error("identity {0} is not a player in this game")]
    NotAPlayer(String),
    #[error("no snapshot received yet")]
    NoSnapshot,
}
