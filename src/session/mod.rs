use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::IDLE_REMINDER_MS;
use crate::engine::{self, game_result, now_ms, MoveOutcome};
use crate::error::{SessionError, TapRejection};
use crate::lobby::leave_patch;
use crate::patch::GamePatch;
use crate::rng::Rng;
use crate::roulette::{
    anchor_is_stuck, clear_all_roulette_effects, display_effect, expire_anchor, expire_glow,
    is_coordinator, resolve_tap, sabotage_rollback, schedule_next_glow, start_glow, MissPenalty,
    RouletteOptions, TapOutcome,
};
use crate::store::DocumentStore;
use crate::types::{
    BoxId, BoxType, DotId, GameDoc, GameStatus, LineId, RouletteEffect, SabotageState,
};

mod observer;
mod scheduler;

pub use self::observer::{NoopObserver, Notice, SessionObserver};
pub use self::scheduler::{TaskScheduler, TimerKind};

const IDLE_WAKE_MS: u64 = 60_000;

#[derive(Clone, Copy, Debug)]
pub struct SessionOptions {
    pub roulette: RouletteOptions,
    pub roulette_enabled: bool,
    pub idle_reminder_ms: u64,
    pub seed: Option<u32>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            roulette: RouletteOptions::default(),
            roulette_enabled: true,
            idle_reminder_ms: IDLE_REMINDER_MS,
            seed: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    ProposeLine(LineId),
    TapDot(DotId),
    Leave,
}

pub struct GameSession {
    store: Arc<dyn DocumentStore>,
    code: String,
    identity: String,
    options: SessionOptions,
    observer: Box<dyn SessionObserver>,
    rng: Rng,
    player_index: Option<usize>,
    snapshot: Option<Arc<GameDoc>>,
    scheduler: TaskScheduler,
    penalty: MissPenalty,
    pending_sabotage: Option<DotId>,
    anchor_dot: Option<DotId>,
    turn_started_at: Option<u64>,
    reminded: bool,
    announced_start: bool,
    announced_finish: bool,
}

impl GameSession {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        code: &str,
        identity: &str,
        options: SessionOptions,
    ) -> Self {
        let rng = match options.seed {
            Some(seed) => Rng::new(seed),
            None => Rng::from_entropy(),
        };
        Self {
            store,
            code: code.to_string(),
            identity: identity.to_string(),
            options,
            observer: Box::new(NoopObserver),
            rng,
            player_index: None,
            snapshot: None,
            scheduler: TaskScheduler::new(),
            penalty: MissPenalty::default(),
            pending_sabotage: None,
            anchor_dot: None,
            turn_started_at: None,
            reminded: false,
            announced_start: false,
            announced_finish: false,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn attach(&mut self, now_ms: u64) -> Result<(), SessionError> {
        let doc = self.store.get(&self.code)?;
        if doc.player_index_of(&self.identity).is_none() {
            return Err(SessionError::NotAPlayer(self.identity.clone()));
        }
        self.handle_snapshot(Arc::new(doc), now_ms);
        Ok(())
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn player_index(&self) -> Option<usize> {
        self.player_index
    }

    pub fn snapshot(&self) -> Option<&GameDoc> {
        self.snapshot.as_deref()
    }

    pub fn is_my_turn(&self) -> bool {
        match (&self.snapshot, self.player_index) {
            (Some(doc), Some(me)) => doc.is_active() && doc.current_player_index == me,
            _ => false,
        }
    }

    pub fn is_coordinator(&self) -> bool {
        match (&self.snapshot, self.player_index) {
            (Some(doc), Some(me)) => doc.is_active() && is_coordinator(doc, me),
            _ => false,
        }
    }

    pub fn special_square_type(&self, id: BoxId) -> BoxType {
        self.snapshot
            .as_ref()
            .map(|doc| doc.special_square_type(id))
            .unwrap_or_default()
    }

    pub fn sabotage_state(&self) -> Option<&SabotageState> {
        self.snapshot.as_ref().map(|doc| &doc.sabotage)
    }

    pub fn roulette_display_effect(&self, now_ms: u64) -> Option<RouletteEffect> {
        let doc = self.snapshot.as_ref()?;
        display_effect(&doc.sabotage, now_ms, &self.penalty, &self.options.roulette)
    }

    pub fn miss_penalty_active(&self, now_ms: u64) -> bool {
        self.penalty.is_active(now_ms)
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.next_deadline().map(|(_, at)| at)
    }

    pub fn handle_snapshot(&mut self, doc: Arc<GameDoc>, now_ms: u64) {
        let previous = self.snapshot.replace(doc.clone());
        self.player_index = doc.player_index_of(&self.identity);
        self.observer.on_state_change(&doc);

        let was = previous.as_ref().map(|prev| prev.status);
        if doc.status == GameStatus::Active
            && was == Some(GameStatus::Waiting)
            && !self.announced_start
        {
            self.announced_start = true;
            info!(code = %doc.code, player = ?self.player_index, "game started");
            self.observer.on_game_started(&doc);
        }
        if doc.status == GameStatus::Finished {
            let entered = matches!(was, Some(status) if status != GameStatus::Finished);
            if entered && !self.announced_finish {
                self.announced_finish = true;
                let result = game_result(&doc);
                info!(code = %doc.code, ?result, "game finished");
                self.observer.on_game_finished(&doc, result.as_ref());
            }
            self.teardown();
            return;
        }
        if !doc.is_active() {
            self.scheduler.clear();
            return;
        }

        let turn_changed = match &previous {
            Some(prev) => !prev.is_active() || prev.current_player_index != doc.current_player_index,
            None => true,
        };
        if turn_changed {
            self.begin_turn(&doc, now_ms);
        }
        self.reconcile_timers(&doc, now_ms);
    }

    fn begin_turn(&mut self, doc: &GameDoc, now_ms: u64) {
        let current = doc.current_player_index;
        self.turn_started_at = Some(now_ms);
        self.reminded = false;
        self.anchor_dot = None;
        self.scheduler.cancel(TimerKind::AnchorGrace);
        self.scheduler.cancel(TimerKind::IdleReminder);
        self.observer.on_turn_began(doc, current);

        // Effects aimed at an earlier turn; normally cleared by the move
        // that passed the turn.
        if self.player_index == Some(current)
            && doc.sabotage.has_effect()
            && doc.sabotage.effect_until_player_index != Some(current)
        {
            if let Some(patch) = clear_all_roulette_effects(doc, now_ms) {
                debug!(code = %doc.code, player = current, "clearing leftover roulette effects");
                self.publish(&patch);
            }
        }
    }

    fn reconcile_timers(&mut self, doc: &GameDoc, now_ms: u64) {
        let me = self.player_index;

        if self.options.roulette_enabled && me.is_some_and(|index| is_coordinator(doc, index)) {
            let sabotage = &doc.sabotage;
            if sabotage.has_effect() {
                self.scheduler.cancel(TimerKind::NextGlow);
                self.scheduler.cancel(TimerKind::GlowTimeout);
            } else if let (Some(_), Some(ends_at)) = (sabotage.glowing_dot, sabotage.glow_ends_at()) {
                self.scheduler.cancel(TimerKind::NextGlow);
                self.scheduler.arm(TimerKind::GlowTimeout, ends_at);
            } else if let Some(at) = sabotage.next_glow_time {
                self.scheduler.cancel(TimerKind::GlowTimeout);
                self.scheduler.arm(TimerKind::NextGlow, at);
            } else {
                self.scheduler.cancel(TimerKind::NextGlow);
                self.scheduler.cancel(TimerKind::GlowTimeout);
                if let Some(patch) =
                    schedule_next_glow(doc, now_ms, &mut self.rng, &self.options.roulette)
                {
                    self.publish(&patch);
                }
            }
        } else {
            self.scheduler.cancel(TimerKind::NextGlow);
            self.scheduler.cancel(TimerKind::GlowTimeout);
        }

        match me.and_then(|index| anchor_is_stuck(doc, index)) {
            Some(dot) => {
                if self.anchor_dot != Some(dot) {
                    self.anchor_dot = Some(dot);
                    self.scheduler
                        .arm(TimerKind::AnchorGrace, now_ms + self.options.roulette.anchor_grace_ms);
                }
            }
            None => {
                self.anchor_dot = None;
                self.scheduler.cancel(TimerKind::AnchorGrace);
            }
        }

        if me == Some(doc.current_player_index) {
            if let (false, Some(started)) = (self.reminded, self.turn_started_at) {
                self.scheduler
                    .arm(TimerKind::IdleReminder, started + self.options.idle_reminder_ms);
            }
        } else {
            self.scheduler.cancel(TimerKind::IdleReminder);
        }
    }

    fn teardown(&mut self) {
        self.scheduler.clear();
        self.penalty.clear();
        self.pending_sabotage = None;
        self.anchor_dot = None;
    }

    pub fn poll_timers(&mut self, now_ms: u64) {
        for kind in self.scheduler.take_due(now_ms) {
            self.handle_timer(kind, now_ms);
        }
    }

    /// Timer callback. Each branch re-checks the snapshot and does nothing
    /// if its trigger no longer holds.
    pub fn handle_timer(&mut self, kind: TimerKind, now_ms: u64) {
        let Some(doc) = self.snapshot.clone() else {
            return;
        };
        match kind {
            TimerKind::NextGlow => {
                if let Some(patch) =
                    start_glow(&doc, now_ms, &mut self.rng, &self.options.roulette)
                {
                    self.publish(&patch);
                }
            }
            TimerKind::GlowTimeout => {
                if let Some(patch) =
                    expire_glow(&doc, now_ms, &mut self.rng, &self.options.roulette)
                {
                    self.publish(&patch);
                }
            }
            TimerKind::SabotageDelay => {
                let Some(dot) = self.pending_sabotage.take() else {
                    return;
                };
                let Some(patch) = sabotage_rollback(&doc, dot, now_ms) else {
                    debug!(code = %doc.code, %dot, "sabotage already cleared");
                    return;
                };
                let notice = Notice::LinesSabotaged {
                    lines: patch.lines.len(),
                    boxes: patch.boxes.len(),
                };
                if self.publish(&patch) {
                    self.observer.on_notice(&notice);
                }
            }
            TimerKind::AnchorGrace => {
                let (Some(me), Some(dot)) = (self.player_index, self.anchor_dot.take()) else {
                    return;
                };
                if let Some(patch) = expire_anchor(&doc, me, dot, now_ms) {
                    if self.publish(&patch) {
                        self.observer.on_notice(&Notice::AnchorReleased);
                    }
                }
            }
            TimerKind::MissPenalty => self.penalty.clear(),
            TimerKind::IdleReminder => {
                if self.is_my_turn() && !self.reminded {
                    self.reminded = true;
                    self.observer.on_idle_reminder(&doc);
                }
            }
        }
    }

    pub fn propose_line(&mut self, line: LineId, now_ms: u64) -> Result<MoveOutcome, SessionError> {
        let doc = self.snapshot.clone().ok_or(SessionError::NoSnapshot)?;
        let me = self
            .player_index
            .ok_or_else(|| SessionError::NotAPlayer(self.identity.clone()))?;
        let outcome = match engine::propose_line(&doc, me, line, &mut self.rng, now_ms) {
            Ok(outcome) => outcome,
            Err(rejection) => {
                debug!(code = %doc.code, player = me, %line, %rejection, "move rejected");
                self.observer
                    .on_notice(&Notice::MoveRejected(rejection.clone()));
                return Err(rejection.into());
            }
        };

        if self.publish(&outcome.patch) {
            if outcome.golden_earned > 0 {
                self.observer.on_notice(&Notice::BonusTurnBanked);
            }
            if outcome.banked_turn_used {
                self.observer.on_notice(&Notice::BankedTurnUsed);
            }
            if outcome.forfeit {
                self.observer.on_notice(&Notice::TurnForfeited);
            }
            self.turn_started_at = Some(now_ms);
            self.reminded = false;
        }
        Ok(outcome)
    }

    pub fn tap_dot(&mut self, dot: DotId, now_ms: u64) -> Result<TapOutcome, SessionError> {
        let doc = self.snapshot.clone().ok_or(SessionError::NoSnapshot)?;
        let me = self
            .player_index
            .ok_or_else(|| SessionError::NotAPlayer(self.identity.clone()))?;
        let resolved = if self.options.roulette_enabled {
            resolve_tap(&doc, me, dot, now_ms, &self.options.roulette)
        } else {
            Err(TapRejection::NothingGlowing)
        };

        match resolved {
            Err(rejection) => {
                self.observer
                    .on_notice(&Notice::TapRejected(rejection.clone()));
                Err(rejection.into())
            }
            Ok(TapOutcome::Miss) => {
                let until = self.penalty.start(now_ms, &self.options.roulette);
                self.scheduler.arm(TimerKind::MissPenalty, until);
                self.observer.on_roulette_miss(until);
                Ok(TapOutcome::Miss)
            }
            Ok(TapOutcome::Hit {
                effect,
                target,
                patch,
            }) => {
                if self.publish(&patch) {
                    self.observer.on_notice(&Notice::EffectCommitted(effect));
                    if effect == RouletteEffect::Sabotage {
                        self.pending_sabotage = Some(dot);
                        self.scheduler.arm(
                            TimerKind::SabotageDelay,
                            now_ms + self.options.roulette.sabotage_delay_ms,
                        );
                    }
                }
                Ok(TapOutcome::Hit {
                    effect,
                    target,
                    patch,
                })
            }
        }
    }

    pub fn leave(&mut self, now_ms: u64) -> Result<(), SessionError> {
        let doc = self.snapshot.clone().ok_or(SessionError::NoSnapshot)?;
        let patch = leave_patch(&doc, &self.identity, now_ms)?;
        self.publish(&patch);
        self.teardown();
        info!(code = %self.code, player = %self.identity, "left game");
        Ok(())
    }

    fn publish(&mut self, patch: &GamePatch) -> bool {
        match self.store.update(&self.code, patch) {
            Ok(()) => true,
            Err(error) => {
                warn!(code = %self.code, player = %self.identity, %error, "publish failed");
                self.observer
                    .on_notice(&Notice::PublishFailed(error.to_string()));
                false
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand, now_ms: u64) -> bool {
        match command {
            SessionCommand::ProposeLine(line) => {
                if let Err(error) = self.propose_line(line, now_ms) {
                    debug!(code = %self.code, %error, "line not placed");
                }
                true
            }
            SessionCommand::TapDot(dot) => {
                if let Err(error) = self.tap_dot(dot, now_ms) {
                    debug!(code = %self.code, %error, "tap not applied");
                }
                true
            }
            SessionCommand::Leave => {
                if let Err(error) = self.leave(now_ms) {
                    warn!(code = %self.code, %error, "leave failed");
                }
                false
            }
        }
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> Result<(), SessionError> {
        let mut subscription = self.store.subscribe(&self.code)?;
        let first = subscription.mark_seen();
        if first.player_index_of(&self.identity).is_none() {
            return Err(SessionError::NotAPlayer(self.identity.clone()));
        }
        self.handle_snapshot(first, now_ms());
        loop {
            let wait_ms = match self.scheduler.next_deadline() {
                Some((_, at)) => at.saturating_sub(now_ms()),
                None => IDLE_WAKE_MS,
            };
            tokio::select! {
                biased;
                changed = subscription.changed() => {
                    let Some(doc) = changed else {
                        info!(code = %self.code, "game removed from store");
                        break;
                    };
                    self.handle_snapshot(doc, now_ms());
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle_command(command, now_ms()) {
                        break;
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {
                    self.poll_timers(now_ms());
                }
            }
        }
        self.teardown();
        Ok(())
    }
}
