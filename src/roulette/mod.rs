use tracing::debug;

use crate::constants::{
    ANCHOR_GRACE_MS, EFFECT_CYCLE_MS, GLOW_DURATION_MS, GLOW_IDLE_MAX_MS, GLOW_IDLE_MIN_MS,
    MISS_PENALTY_MS, MISS_SLOWDOWN_FACTOR, SABOTAGE_DELAY_MS,
};
use crate::error::TapRejection;
use crate::grid::{all_dots, undrawn_lines_at_dot};
use crate::patch::{GamePatch, SabotagePatch};
use crate::rng::Rng;
use crate::types::{DotId, GameDoc, RouletteEffect, SabotageState};

mod sabotage;

pub use self::sabotage::sabotage_rollback;

#[derive(Clone, Copy, Debug)]
pub struct RouletteOptions {
    pub glow_duration_ms: u64,
    pub idle_min_ms: u64,
    pub idle_max_ms: u64,
    pub effect_cycle_ms: u64,
    pub sabotage_delay_ms: u64,
    pub anchor_grace_ms: u64,
    pub miss_penalty_ms: u64,
    pub miss_slowdown_factor: u64,
}

impl Default for RouletteOptions {
    fn default() -> Self {
        Self {
            glow_duration_ms: GLOW_DURATION_MS,
            idle_min_ms: GLOW_IDLE_MIN_MS,
            idle_max_ms: GLOW_IDLE_MAX_MS,
            effect_cycle_ms: EFFECT_CYCLE_MS,
            sabotage_delay_ms: SABOTAGE_DELAY_MS,
            anchor_grace_ms: ANCHOR_GRACE_MS,
            miss_penalty_ms: MISS_PENALTY_MS,
            miss_slowdown_factor: MISS_SLOWDOWN_FACTOR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoulettePhase {
    Idle,
    Scheduled { at_ms: u64 },
    Glowing { dot: DotId, ends_at_ms: u64 },
    EffectPending { target: usize },
}

pub fn phase(sabotage: &SabotageState) -> RoulettePhase {
    if let Some(target) = sabotage.effect_until_player_index {
        return RoulettePhase::EffectPending { target };
    }
    if let (Some(dot), Some(ends_at_ms)) = (sabotage.glowing_dot, sabotage.glow_ends_at()) {
        return RoulettePhase::Glowing { dot, ends_at_ms };
    }
    match sabotage.next_glow_time {
        Some(at_ms) => RoulettePhase::Scheduled { at_ms },
        None => RoulettePhase::Idle,
    }
}

/// The single client that owns the roulette timers: the lowest player index
/// that does not hold the turn. Every client derives the same answer from
/// the public `currentPlayerIndex`.
pub fn roulette_coordinator(current_player_index: usize, player_count: usize) -> Option<usize> {
    if player_count < 2 {
        return None;
    }
    (0..player_count).find(|index| *index != current_player_index)
}

pub fn is_coordinator(doc: &GameDoc, player: usize) -> bool {
    roulette_coordinator(doc.current_player_index, doc.player_count()) == Some(player)
}

pub fn eligible_dots(doc: &GameDoc) -> Vec<DotId> {
    all_dots()
        .into_iter()
        .filter(|dot| !undrawn_lines_at_dot(&doc.lines, *dot).is_empty())
        .collect()
}

fn idle_delay(rng: &mut Rng, options: &RouletteOptions) -> u64 {
    rng.range_u64(options.idle_min_ms, options.idle_max_ms)
}

pub fn schedule_next_glow(
    doc: &GameDoc,
    now_ms: u64,
    rng: &mut Rng,
    options: &RouletteOptions,
) -> Option<GamePatch> {
    if !doc.is_active() || doc.sabotage.has_glow() || doc.sabotage.has_effect() {
        return None;
    }
    let sabotage = SabotagePatch {
        next_glow_time: Some(Some(now_ms + idle_delay(rng, options))),
        ..SabotagePatch::default()
    };
    Some(GamePatch::with_sabotage(sabotage, now_ms))
}

pub fn start_glow(
    doc: &GameDoc,
    now_ms: u64,
    rng: &mut Rng,
    options: &RouletteOptions,
) -> Option<GamePatch> {
    if !doc.is_active() || doc.sabotage.glowing_dot.is_some() || doc.sabotage.has_effect() {
        return None;
    }
    match doc.sabotage.next_glow_time {
        Some(at) if at <= now_ms => {}
        _ => return None,
    }
    let dots = eligible_dots(doc);
    let dot = *rng.pick(&dots)?;
    debug!(code = %doc.code, %dot, "roulette glow started");
    let sabotage = SabotagePatch {
        glowing_dot: Some(Some(dot)),
        glow_start_time: Some(Some(now_ms)),
        glow_duration: Some(Some(options.glow_duration_ms)),
        next_glow_time: Some(None),
        ..SabotagePatch::default()
    };
    Some(GamePatch::with_sabotage(sabotage, now_ms))
}

pub fn expire_glow(
    doc: &GameDoc,
    now_ms: u64,
    rng: &mut Rng,
    options: &RouletteOptions,
) -> Option<GamePatch> {
    doc.sabotage.glowing_dot?;
    match doc.sabotage.glow_ends_at() {
        Some(ends_at) if ends_at <= now_ms => {}
        _ => return None,
    }
    let mut sabotage = SabotagePatch::clear_glow();
    if doc.is_active() && !doc.sabotage.has_effect() {
        sabotage.next_glow_time = Some(Some(now_ms + idle_delay(rng, options)));
    }
    Some(GamePatch::with_sabotage(sabotage, now_ms))
}

pub fn effect_at(elapsed_ms: u64, options: &RouletteOptions) -> RouletteEffect {
    let cycle = options.effect_cycle_ms.max(1);
    let slot = (elapsed_ms / cycle) as usize % RouletteEffect::CYCLE.len();
    RouletteEffect::CYCLE[slot]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TapOutcome {
    Hit {
        effect: RouletteEffect,
        target: usize,
        patch: GamePatch,
    },
    Miss,
}

pub fn resolve_tap(
    doc: &GameDoc,
    tapper: usize,
    dot: DotId,
    now_ms: u64,
    options: &RouletteOptions,
) -> Result<TapOutcome, TapRejection> {
    if !doc.is_active() {
        return Err(TapRejection::GameNotActive);
    }
    if tapper >= doc.player_count() {
        return Err(TapRejection::UnknownPlayer);
    }
    if tapper == doc.current_player_index {
        return Err(TapRejection::ActivePlayer);
    }
    let (Some(glowing), Some(start), Some(ends_at)) = (
        doc.sabotage.glowing_dot,
        doc.sabotage.glow_start_time,
        doc.sabotage.glow_ends_at(),
    ) else {
        return Err(TapRejection::NothingGlowing);
    };
    if now_ms >= ends_at {
        return Err(TapRejection::NothingGlowing);
    }
    if dot != glowing {
        return Ok(TapOutcome::Miss);
    }

    let effect = effect_at(now_ms.saturating_sub(start), options);
    let target = doc.next_player_index();
    let mut sabotage = SabotagePatch::clear_glow();
    sabotage.effect_until_player_index = Some(Some(target));
    match effect {
        RouletteEffect::Prohibit => sabotage.prohibited_dot = Some(Some(dot)),
        RouletteEffect::Anchor => sabotage.anchored_dot = Some(Some(dot)),
        RouletteEffect::Sabotage => sabotage.sabotaged_dot = Some(Some(dot)),
    }
    debug!(code = %doc.code, tapper, target, ?effect, %dot, "roulette hit");
    Ok(TapOutcome::Hit {
        effect,
        target,
        patch: GamePatch::with_sabotage(sabotage, now_ms),
    })
}

/// Clears every roulette effect. Returns `None` when there is nothing left to
/// clear, so repeated calls publish nothing.
pub fn clear_all_roulette_effects(doc: &GameDoc, now_ms: u64) -> Option<GamePatch> {
    if !doc.sabotage.has_effect() {
        return None;
    }
    Some(GamePatch::with_sabotage(SabotagePatch::clear_effects(), now_ms))
}

pub fn anchor_is_stuck(doc: &GameDoc, player: usize) -> Option<DotId> {
    if !doc.is_active() || doc.current_player_index != player {
        return None;
    }
    let dot = doc.sabotage.anchored_for(player)?;
    if undrawn_lines_at_dot(&doc.lines, dot).is_empty() {
        Some(dot)
    } else {
        None
    }
}

pub fn expire_anchor(doc: &GameDoc, player: usize, dot: DotId, now_ms: u64) -> Option<GamePatch> {
    if anchor_is_stuck(doc, player) != Some(dot) {
        return None;
    }
    let sabotage = SabotagePatch {
        anchored_dot: Some(None),
        effect_until_player_index: Some(None),
        ..SabotagePatch::default()
    };
    Some(GamePatch::with_sabotage(sabotage, now_ms))
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MissPenalty {
    until_ms: Option<u64>,
}

impl MissPenalty {
    pub fn start(&mut self, now_ms: u64, options: &RouletteOptions) -> u64 {
        let until = now_ms + options.miss_penalty_ms;
        self.until_ms = Some(until);
        until
    }

    pub fn is_active(&self, now_ms: u64) -> bool {
        self.until_ms.map(|until| now_ms < until).unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.until_ms = None;
    }

    pub fn until_ms(&self) -> Option<u64> {
        self.until_ms
    }
}

pub fn display_effect(
    sabotage: &SabotageState,
    now_ms: u64,
    penalty: &MissPenalty,
    options: &RouletteOptions,
) -> Option<RouletteEffect> {
    let start = sabotage.glow_start_time?;
    sabotage.glowing_dot?;
    let mut elapsed = now_ms.saturating_sub(start);
    if penalty.is_active(now_ms) {
        elapsed /= options.miss_slowdown_factor.max(1);
    }
    Some(effect_at(elapsed, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::all_lines;
    use crate::patch::apply_patch;
    use crate::test_support::active_doc;
    use crate::types::GameStatus;

    fn glowing_doc(players: usize, dot: DotId, start: u64) -> GameDoc {
        let mut doc = active_doc(players);
        doc.sabotage.glowing_dot = Some(dot);
        doc.sabotage.glow_start_time = Some(start);
        doc.sabotage.glow_duration = Some(GLOW_DURATION_MS);
        doc
    }

    #[test]
    fn coordinator_is_lowest_non_active_index() {
        assert_eq!(roulette_coordinator(0, 2), Some(1));
        assert_eq!(roulette_coordinator(1, 2), Some(0));
        assert_eq!(roulette_coordinator(0, 4), Some(1));
        assert_eq!(roulette_coordinator(3, 4), Some(0));
        assert_eq!(roulette_coordinator(0, 1), None);
    }

    #[test]
    fn full_board_has_no_eligible_dot() {
        let mut doc = active_doc(2);
        assert_eq!(eligible_dots(&doc).len(), 36);
        for line in all_lines() {
            doc.lines.insert(line, 0);
        }
        assert!(eligible_dots(&doc).is_empty());
        doc.sabotage.next_glow_time = Some(0);
        assert!(start_glow(&doc, 10, &mut Rng::new(1), &RouletteOptions::default()).is_none());
    }

    #[test]
    fn glow_cycle_schedules_glows_and_expires() {
        let options = RouletteOptions::default();
        let mut rng = Rng::new(2);
        let mut doc = active_doc(3);

        let scheduled = schedule_next_glow(&doc, 1_000, &mut rng, &options).expect("schedules");
        apply_patch(&mut doc, &scheduled);
        let at = doc.sabotage.next_glow_time.expect("next glow time");
        assert!((4_000..=8_000).contains(&at));
        assert!(schedule_next_glow(&doc, 1_000, &mut rng, &options).is_none());

        assert!(start_glow(&doc, at - 1, &mut rng, &options).is_none());
        let glow = start_glow(&doc, at, &mut rng, &options).expect("glow starts");
        apply_patch(&mut doc, &glow);
        assert!(doc.sabotage.glowing_dot.is_some());
        assert_eq!(doc.sabotage.next_glow_time, None);
        assert!(matches!(phase(&doc.sabotage), RoulettePhase::Glowing { .. }));

        let ends = doc.sabotage.glow_ends_at().expect("glow end");
        assert!(expire_glow(&doc, ends - 1, &mut rng, &options).is_none());
        let expired = expire_glow(&doc, ends, &mut rng, &options).expect("expires");
        apply_patch(&mut doc, &expired);
        assert_eq!(doc.sabotage.glowing_dot, None);
        assert!(doc.sabotage.next_glow_time.expect("rescheduled") > ends);
    }

    #[test]
    fn effect_cycles_prohibit_sabotage_anchor() {
        let options = RouletteOptions::default();
        let cycle = options.effect_cycle_ms;
        assert_eq!(effect_at(0, &options), RouletteEffect::Prohibit);
        assert_eq!(effect_at(cycle, &options), RouletteEffect::Sabotage);
        assert_eq!(effect_at(cycle * 2 + 1, &options), RouletteEffect::Anchor);
        assert_eq!(effect_at(cycle * 3, &options), RouletteEffect::Prohibit);
    }

    #[test]
    fn correct_tap_commits_effect_for_next_player() {
        let options = RouletteOptions::default();
        let dot = DotId::new(2, 3);
        let mut doc = glowing_doc(3, dot, 1_000);

        let outcome = resolve_tap(&doc, 2, dot, 1_000 + options.effect_cycle_ms * 2, &options)
            .expect("tap accepted");
        let TapOutcome::Hit {
            effect,
            target,
            patch,
        } = outcome
        else {
            panic!("expected hit");
        };
        assert_eq!(effect, RouletteEffect::Anchor);
        assert_eq!(target, 1);
        apply_patch(&mut doc, &patch);
        assert_eq!(doc.sabotage.anchored_dot, Some(dot));
        assert_eq!(doc.sabotage.effect_until_player_index, Some(1));
        assert_eq!(doc.sabotage.glowing_dot, None);
        assert_eq!(phase(&doc.sabotage), RoulettePhase::EffectPending { target: 1 });
    }

    #[test]
    fn wrong_dot_is_a_miss_and_active_player_cannot_tap() {
        let options = RouletteOptions::default();
        let dot = DotId::new(1, 1);
        let doc = glowing_doc(2, dot, 0);
        assert_eq!(
            resolve_tap(&doc, 1, DotId::new(4, 4), 10, &options),
            Ok(TapOutcome::Miss)
        );
        assert_eq!(
            resolve_tap(&doc, 0, dot, 10, &options),
            Err(TapRejection::ActivePlayer)
        );
        assert_eq!(
            resolve_tap(&doc, 1, dot, GLOW_DURATION_MS, &options),
            Err(TapRejection::NothingGlowing)
        );
    }

    #[test]
    fn no_glow_while_an_effect_is_pending() {
        let options = RouletteOptions::default();
        let mut doc = active_doc(2);
        doc.sabotage.prohibited_dot = Some(DotId::new(0, 0));
        doc.sabotage.effect_until_player_index = Some(1);
        assert!(schedule_next_glow(&doc, 0, &mut Rng::new(3), &options).is_none());
        doc.sabotage.next_glow_time = Some(0);
        assert!(start_glow(&doc, 5, &mut Rng::new(3), &options).is_none());
    }

    #[test]
    fn clearing_effects_is_idempotent() {
        let mut doc = active_doc(2);
        doc.sabotage.prohibited_dot = Some(DotId::new(0, 0));
        doc.sabotage.effect_until_player_index = Some(1);
        doc.sabotage.glowing_dot = Some(DotId::new(3, 3));

        let patch = clear_all_roulette_effects(&doc, 5).expect("something to clear");
        apply_patch(&mut doc, &patch);
        let after_first = doc.clone();
        assert!(!doc.sabotage.has_effect());
        assert_eq!(doc.sabotage.glowing_dot, Some(DotId::new(3, 3)));

        assert!(clear_all_roulette_effects(&doc, 6).is_none());
        apply_patch(&mut doc, &patch);
        assert_eq!(doc, after_first);
    }

    #[test]
    fn anchor_without_lines_is_stuck_until_cleared() {
        let mut doc = active_doc(2);
        let dot = DotId::new(0, 0);
        doc.sabotage.anchored_dot = Some(dot);
        doc.sabotage.effect_until_player_index = Some(0);
        assert_eq!(anchor_is_stuck(&doc, 0), None);

        doc.lines.insert(crate::types::LineId::horizontal(0, 0), 1);
        doc.lines.insert(crate::types::LineId::vertical(0, 0), 1);
        assert_eq!(anchor_is_stuck(&doc, 0), Some(dot));
        assert!(expire_anchor(&doc, 0, DotId::new(1, 1), 0).is_none());

        let patch = expire_anchor(&doc, 0, dot, 0).expect("anchor clears");
        apply_patch(&mut doc, &patch);
        assert_eq!(doc.sabotage.anchored_dot, None);
        assert!(expire_anchor(&doc, 0, dot, 0).is_none());
    }

    #[test]
    fn miss_penalty_slows_display_only_inside_window() {
        let options = RouletteOptions::default();
        let doc = glowing_doc(2, DotId::new(1, 1), 0);
        let mut penalty = MissPenalty::default();
        let at = options.effect_cycle_ms + 1;
        assert_eq!(
            display_effect(&doc.sabotage, at, &penalty, &options),
            Some(RouletteEffect::Sabotage)
        );
        penalty.start(0, &options);
        assert_eq!(
            display_effect(&doc.sabotage, at, &penalty, &options),
            Some(RouletteEffect::Prohibit)
        );
        assert!(!penalty.is_active(options.miss_penalty_ms));
    }

    #[test]
    fn finished_game_takes_no_taps() {
        let dot = DotId::new(1, 1);
        let mut doc = glowing_doc(2, dot, 0);
        doc.status = GameStatus::Finished;
        assert_eq!(
            resolve_tap(&doc, 1, dot, 1, &RouletteOptions::default()),
            Err(TapRejection::GameNotActive)
        );
    }
}
