use crate::engine::GameResult;
use crate::error::{MoveRejection, TapRejection};
use crate::types::{GameDoc, RouletteEffect};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    MoveRejected(MoveRejection),
    TapRejected(TapRejection),
    PublishFailed(String),
    BonusTurnBanked,
    BankedTurnUsed,
    TurnForfeited,
    EffectCommitted(RouletteEffect),
    LinesSabotaged { lines: usize, boxes: usize },
    AnchorReleased,
}

pub trait SessionObserver: Send {
    fn on_state_change(&mut self, _doc: &GameDoc) {}
    fn on_game_started(&mut self, _doc: &GameDoc) {}
    fn on_game_finished(&mut self, _doc: &GameDoc, _result: Option<&GameResult>) {}
    fn on_turn_began(&mut self, _doc: &GameDoc, _player: usize) {}
    fn on_notice(&mut self, _notice: &Notice) {}
    fn on_roulette_miss(&mut self, _until_ms: u64) {}
    fn on_idle_reminder(&mut self, _doc: &GameDoc) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}
