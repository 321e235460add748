use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::constants::BOX_COUNT;
use crate::error::MoveRejection;
use crate::grid::{line_in_bounds, line_touches_dot};
use crate::patch::{GamePatch, PlayerPatch, SabotagePatch};
use crate::rng::Rng;
use crate::special_squares::respawn_on_completion;
use crate::types::{BoxId, BoxType, BoxView, GameDoc, GameStatus, LineId};

mod scoring;
mod utils;

pub use self::scoring::{check_invariants, game_result, newly_completed, winners, GameResult};
pub use self::utils::now_ms;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub patch: GamePatch,
    pub completed: Vec<BoxId>,
    pub golden_earned: u32,
    pub forfeit: bool,
    pub banked_turn_used: bool,
    pub next_player_index: usize,
    pub finished: bool,
}

pub fn validate_move(doc: &GameDoc, mover: usize, line: LineId) -> Result<(), MoveRejection> {
    if doc.status != GameStatus::Active {
        return Err(MoveRejection::GameNotActive);
    }
    if mover != doc.current_player_index || mover >= doc.player_count() {
        return Err(MoveRejection::NotYourTurn);
    }
    if !line_in_bounds(line) {
        return Err(MoveRejection::OutOfBounds(line));
    }
    if doc.lines.contains_key(&line) {
        return Err(MoveRejection::LineExists(line));
    }
    if let Some(dot) = doc.sabotage.prohibited_for(mover) {
        if line_touches_dot(line, dot) {
            return Err(MoveRejection::ProhibitedDot(dot));
        }
    }
    if let Some(dot) = doc.sabotage.anchored_for(mover) {
        if !line_touches_dot(line, dot) {
            return Err(MoveRejection::MustUseAnchoredDot(dot));
        }
    }
    Ok(())
}

pub fn propose_line(
    doc: &GameDoc,
    mover: usize,
    line: LineId,
    rng: &mut Rng,
    now_ms: u64,
) -> Result<MoveOutcome, MoveRejection> {
    validate_move(doc, mover, line)?;
    let player = doc
        .players
        .get(mover)
        .ok_or(MoveRejection::NotYourTurn)?;

    let mut lines_after = doc.lines.clone();
    lines_after.insert(line, mover);
    let completed = newly_completed(doc, &lines_after, line);

    let mut patch = GamePatch {
        last_activity: Some(now_ms),
        ..GamePatch::default()
    };
    patch.lines.insert(line, Some(mover));

    let mut golden_earned = 0u32;
    let mut forfeit = false;
    let mut consumed = Vec::new();
    for id in &completed {
        let box_type = doc.special_squares.type_of(*id);
        match box_type {
            BoxType::Golden => {
                golden_earned += 1;
                consumed.push(*id);
            }
            BoxType::Penalty => {
                forfeit = true;
                consumed.push(*id);
            }
            BoxType::Normal => {}
        }
        patch.boxes.insert(
            *id,
            Some(BoxView {
                owner_id: mover,
                box_type,
            }),
        );
    }

    if !consumed.is_empty() {
        let owned: BTreeSet<BoxId> = doc.boxes.keys().copied().collect();
        let just_completed: BTreeSet<BoxId> = completed.iter().copied().collect();
        patch.special_squares = Some(respawn_on_completion(
            &doc.special_squares,
            &consumed,
            &owned,
            &just_completed,
            rng,
        ));
    }

    let score = player.score + completed.len() as u32;
    let mut banked_turns = player.banked_turns + golden_earned;
    let mut banked_turn_used = false;
    let current = doc.current_player_index;

    // A penalty box always ends the turn, even alongside a golden one.
    let next_player_index = if forfeit {
        doc.next_player_index()
    } else if !completed.is_empty() {
        current
    } else if banked_turns > 0 {
        banked_turns -= 1;
        banked_turn_used = true;
        current
    } else {
        doc.next_player_index()
    };

    patch.player_fields.insert(
        mover,
        PlayerPatch {
            score: Some(score),
            banked_turns: Some(banked_turns),
        },
    );

    let finished = doc.boxes.len() + completed.len() >= BOX_COUNT;
    if finished {
        patch.status = Some(GameStatus::Finished);
        let mut sabotage = SabotagePatch::default();
        if doc.sabotage.has_glow() {
            sabotage.merge(SabotagePatch::clear_glow());
        }
        if doc.sabotage.has_effect() {
            sabotage.merge(SabotagePatch::clear_effects());
        }
        if !sabotage.is_empty() {
            patch.sabotage = Some(sabotage);
        }
        info!(code = %doc.code, player = mover, "final box completed");
    } else if next_player_index != current {
        patch.current_player_index = Some(next_player_index);
        if let Some(sabotage) = turn_change_sabotage(doc, next_player_index) {
            patch.sabotage = Some(sabotage);
        }
    }

    debug!(
        code = %doc.code,
        player = mover,
        %line,
        completed = completed.len(),
        forfeit,
        banked_turn_used,
        next = next_player_index,
        "line placed"
    );

    Ok(MoveOutcome {
        patch,
        completed,
        golden_earned,
        forfeit,
        banked_turn_used,
        next_player_index,
        finished,
    })
}

/// Sabotage fields to reset when the turn passes to `next`: the glow belongs
/// to the outgoing coordinator, and effects survive only into the turn of the
/// player they target.
pub fn turn_change_sabotage(doc: &GameDoc, next: usize) -> Option<SabotagePatch> {
    let mut sabotage = SabotagePatch::default();
    if doc.sabotage.has_glow() {
        sabotage.merge(SabotagePatch::clear_glow());
    }
    if doc.sabotage.has_effect() && doc.sabotage.effect_until_player_index != Some(next) {
        sabotage.merge(SabotagePatch::clear_effects());
    }
    if sabotage.is_empty() {
        None
    } else {
        Some(sabotage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{all_boxes, box_lines};
    use crate::patch::apply_patch;
    use crate::test_support::{active_doc, fill_box_except, play};
    use crate::types::DotId;

    #[test]
    fn scenario_a_fourth_side_scores_and_keeps_turn() {
        let mut doc = active_doc(2);
        let mut rng = Rng::new(1);
        let [top, bottom, left, right] = box_lines(BoxId::new(0, 0));

        play(&mut doc, 0, top, &mut rng);
        play(&mut doc, 1, bottom, &mut rng);
        play(&mut doc, 0, left, &mut rng);
        play(&mut doc, 1, LineId::horizontal(5, 4), &mut rng);
        assert_eq!(doc.current_player_index, 0);
        let outcome = play(&mut doc, 0, right, &mut rng);

        assert_eq!(outcome.completed, vec![BoxId::new(0, 0)]);
        assert_eq!(doc.boxes[&BoxId::new(0, 0)].owner_id, 0);
        assert_eq!(doc.players[0].score, 1);
        assert_eq!(doc.current_player_index, 0);
        assert!(check_invariants(&doc).is_empty());
    }

    #[test]
    fn scenario_b_penalty_box_ends_turn() {
        let mut doc = active_doc(2);
        doc.special_squares.penalty.insert(BoxId::new(0, 0));
        let last = fill_box_except(&mut doc, BoxId::new(0, 0), 1);
        let mut rng = Rng::new(2);

        let outcome = play(&mut doc, 0, last, &mut rng);

        assert!(outcome.forfeit);
        assert_eq!(doc.players[0].score, 1);
        assert_eq!(doc.current_player_index, 1);
        assert_eq!(doc.boxes[&BoxId::new(0, 0)].box_type, BoxType::Penalty);
        assert!(!doc.special_squares.penalty.contains(&BoxId::new(0, 0)));
        assert_eq!(doc.special_squares.penalty.len(), 1);
    }

    #[test]
    fn scenario_c_golden_and_penalty_in_one_move() {
        let mut doc = active_doc(2);
        doc.special_squares.golden.insert(BoxId::new(0, 0));
        doc.special_squares.penalty.insert(BoxId::new(0, 1));
        // Shared side between (0,0) and (0,1) is vertical (0,1).
        let shared = LineId::vertical(0, 1);
        for id in [BoxId::new(0, 0), BoxId::new(0, 1)] {
            for line in box_lines(id) {
                if line != shared {
                    doc.lines.insert(line, 1);
                }
            }
        }
        let mut rng = Rng::new(3);

        let outcome = play(&mut doc, 0, shared, &mut rng);

        assert_eq!(outcome.completed.len(), 2);
        assert_eq!(doc.players[0].score, 2);
        assert_eq!(doc.players[0].banked_turns, 1);
        assert_eq!(doc.current_player_index, 1);
        assert_eq!(doc.special_squares.golden.len(), 1);
        assert_eq!(doc.special_squares.penalty.len(), 1);
        assert!(check_invariants(&doc).is_empty());
    }

    #[test]
    fn scenario_d_last_box_finishes_with_declared_tie() {
        let mut doc = active_doc(3);
        let scores = [7usize, 9, 8];
        let mut boxes = all_boxes().into_iter();
        for (owner, count) in scores.iter().enumerate() {
            for _ in 0..*count {
                let id = boxes.next().expect("box available");
                for line in box_lines(id) {
                    doc.lines.insert(line, owner);
                }
                doc.boxes.insert(
                    id,
                    BoxView {
                        owner_id: owner,
                        box_type: BoxType::Normal,
                    },
                );
                doc.players[owner].score += 1;
            }
        }
        let last_box = boxes.next().expect("one box left");
        assert!(boxes.next().is_none());
        let missing = box_lines(last_box)
            .into_iter()
            .find(|line| !doc.lines.contains_key(line))
            .expect("last box has an open side");
        for line in box_lines(last_box) {
            if line != missing {
                doc.lines.insert(line, 2);
            }
        }
        doc.current_player_index = 2;
        let mut rng = Rng::new(4);

        let outcome = play(&mut doc, 2, missing, &mut rng);

        assert!(outcome.finished);
        assert_eq!(doc.status, GameStatus::Finished);
        assert_eq!(doc.players[2].score, 9);
        assert_eq!(winners(&doc.players), vec![1, 2]);
        assert_eq!(game_result(&doc), Some(GameResult::Tie(vec![1, 2])));
        assert!(check_invariants(&doc).is_empty());
    }

    #[test]
    fn scenario_e_out_of_turn_move_produces_no_patch() {
        let doc = active_doc(2);
        let mut rng = Rng::new(5);
        let result = propose_line(&doc, 1, LineId::horizontal(0, 0), &mut rng, 10);
        assert_eq!(result, Err(MoveRejection::NotYourTurn));
    }

    #[test]
    fn existing_line_is_rejected() {
        let mut doc = active_doc(2);
        doc.lines.insert(LineId::horizontal(2, 2), 1);
        let mut rng = Rng::new(6);
        assert_eq!(
            propose_line(&doc, 0, LineId::horizontal(2, 2), &mut rng, 0),
            Err(MoveRejection::LineExists(LineId::horizontal(2, 2)))
        );
        assert_eq!(
            propose_line(&doc, 0, LineId::horizontal(0, 5), &mut rng, 0),
            Err(MoveRejection::OutOfBounds(LineId::horizontal(0, 5)))
        );
    }

    #[test]
    fn moves_are_rejected_outside_active_status() {
        let mut doc = active_doc(2);
        doc.status = GameStatus::Waiting;
        let mut rng = Rng::new(6);
        assert_eq!(
            propose_line(&doc, 0, LineId::horizontal(0, 0), &mut rng, 0),
            Err(MoveRejection::GameNotActive)
        );
    }

    #[test]
    fn prohibited_dot_blocks_touching_lines_for_target_only() {
        let mut doc = active_doc(2);
        doc.sabotage.prohibited_dot = Some(DotId::new(2, 2));
        doc.sabotage.effect_until_player_index = Some(0);
        let mut rng = Rng::new(7);

        assert_eq!(
            propose_line(&doc, 0, LineId::horizontal(2, 1), &mut rng, 0),
            Err(MoveRejection::ProhibitedDot(DotId::new(2, 2)))
        );
        assert!(propose_line(&doc, 0, LineId::horizontal(0, 0), &mut rng, 0).is_ok());

        doc.sabotage.effect_until_player_index = Some(1);
        assert!(propose_line(&doc, 0, LineId::horizontal(2, 1), &mut rng, 0).is_ok());
    }

    #[test]
    fn anchored_dot_forces_touching_line() {
        let mut doc = active_doc(2);
        doc.sabotage.anchored_dot = Some(DotId::new(1, 1));
        doc.sabotage.effect_until_player_index = Some(0);
        let mut rng = Rng::new(8);

        assert_eq!(
            propose_line(&doc, 0, LineId::horizontal(4, 4), &mut rng, 0),
            Err(MoveRejection::MustUseAnchoredDot(DotId::new(1, 1)))
        );
        assert!(propose_line(&doc, 0, LineId::vertical(0, 1), &mut rng, 0).is_ok());
    }

    #[test]
    fn fourth_line_completes_only_the_closed_box() {
        let mut doc = active_doc(2);
        let target = BoxId::new(2, 2);
        let last = fill_box_except(&mut doc, target, 1);
        // The right-hand neighbour shares the closing side and stays at three.
        doc.lines.insert(LineId::horizontal(2, 3), 1);
        doc.lines.insert(LineId::horizontal(3, 3), 1);
        let mut rng = Rng::new(9);

        let outcome = play(&mut doc, 0, last, &mut rng);
        assert_eq!(outcome.completed, vec![target]);
        assert!(!doc.boxes.contains_key(&BoxId::new(2, 3)));
        assert_eq!(crate::grid::drawn_sides(&doc.lines, BoxId::new(2, 3)), 3);
    }

    #[test]
    fn plain_move_consumes_banked_turn_before_passing() {
        let mut doc = active_doc(2);
        doc.players[0].banked_turns = 1;
        let mut rng = Rng::new(10);

        let outcome = play(&mut doc, 0, LineId::horizontal(0, 0), &mut rng);
        assert!(outcome.banked_turn_used);
        assert_eq!(doc.players[0].banked_turns, 0);
        assert_eq!(doc.current_player_index, 0);

        play(&mut doc, 0, LineId::horizontal(5, 4), &mut rng);
        assert_eq!(doc.current_player_index, 1);
    }

    #[test]
    fn scoring_move_does_not_consume_banked_turn() {
        let mut doc = active_doc(2);
        doc.players[0].banked_turns = 2;
        let last = fill_box_except(&mut doc, BoxId::new(1, 3), 1);
        let mut rng = Rng::new(11);

        let outcome = play(&mut doc, 0, last, &mut rng);
        assert!(!outcome.banked_turn_used);
        assert_eq!(doc.players[0].banked_turns, 2);
    }

    #[test]
    fn turn_pass_keeps_effect_for_its_target_and_clears_glow() {
        let mut doc = active_doc(3);
        doc.sabotage.anchored_dot = Some(DotId::new(4, 4));
        doc.sabotage.effect_until_player_index = Some(1);
        doc.sabotage.glowing_dot = Some(DotId::new(0, 0));
        doc.sabotage.glow_start_time = Some(1);
        doc.sabotage.glow_duration = Some(2);
        let mut rng = Rng::new(12);

        play(&mut doc, 0, LineId::horizontal(0, 0), &mut rng);
        assert_eq!(doc.current_player_index, 1);
        assert_eq!(doc.sabotage.anchored_dot, Some(DotId::new(4, 4)));
        assert_eq!(doc.sabotage.glowing_dot, None);
        assert_eq!(doc.sabotage.glow_start_time, None);

        play(&mut doc, 1, LineId::vertical(3, 4), &mut rng);
        assert_eq!(doc.current_player_index, 2);
        assert_eq!(doc.sabotage.anchored_dot, None);
        assert_eq!(doc.sabotage.effect_until_player_index, None);
    }

    #[test]
    fn score_sum_tracks_box_count_over_a_full_game() {
        let mut doc = active_doc(3);
        doc.special_squares.golden.insert(BoxId::new(1, 1));
        doc.special_squares.penalty.insert(BoxId::new(2, 3));
        doc.special_squares.penalty.insert(BoxId::new(3, 1));
        let mut rng = Rng::new(13);
        let mut guard = 0;
        while doc.status == GameStatus::Active {
            guard += 1;
            assert!(guard < 200, "game did not terminate");
            let mover = doc.current_player_index;
            let line = crate::grid::all_lines()
                .into_iter()
                .find(|line| !doc.lines.contains_key(line))
                .expect("open line while active");
            let outcome = propose_line(&doc, mover, line, &mut rng, guard).expect("legal move");
            apply_patch(&mut doc, &outcome.patch);
            assert!(check_invariants(&doc).is_empty(), "{:?}", check_invariants(&doc));
        }
        assert_eq!(doc.boxes.len(), BOX_COUNT);
        assert_eq!(doc.score_total(), BOX_COUNT as u64);
    }
}
