use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::grid::{boxes_for_line, line_touches_dot};
use crate::patch::{GamePatch, PlayerPatch, SabotagePatch};
use crate::types::{BoxId, DotId, GameDoc, LineId};

/// Removes every line touching `dot`, un-completes the boxes those lines
/// closed and takes the points back from their owners. Returns `None` if the
/// sabotage has already been consumed or cleared.
pub fn sabotage_rollback(doc: &GameDoc, dot: DotId, now_ms: u64) -> Option<GamePatch> {
    if !doc.is_active() || doc.sabotage.sabotaged_dot != Some(dot) {
        return None;
    }

    let removed: Vec<LineId> = doc
        .lines
        .keys()
        .copied()
        .filter(|line| line_touches_dot(*line, dot))
        .collect();
    let reopened: BTreeSet<BoxId> = removed
        .iter()
        .flat_map(|line| boxes_for_line(*line))
        .filter(|id| doc.boxes.contains_key(id))
        .collect();

    let mut lost: BTreeMap<usize, u32> = BTreeMap::new();
    for id in &reopened {
        if let Some(view) = doc.boxes.get(id) {
            *lost.entry(view.owner_id).or_default() += 1;
        }
    }

    let mut patch = GamePatch::with_sabotage(
        SabotagePatch {
            sabotaged_dot: Some(None),
            effect_until_player_index: Some(None),
            ..SabotagePatch::default()
        },
        now_ms,
    );
    for line in &removed {
        patch.lines.insert(*line, None);
    }
    for id in &reopened {
        patch.boxes.insert(*id, None);
    }
    for (owner, count) in &lost {
        let Some(player) = doc.players.get(*owner) else {
            continue;
        };
        patch.player_fields.insert(
            *owner,
            PlayerPatch {
                score: Some(player.score.saturating_sub(*count)),
                banked_turns: None,
            },
        );
    }

    info!(
        code = %doc.code,
        %dot,
        lines = removed.len(),
        boxes = reopened.len(),
        "sabotage rolled back lines"
    );
    Some(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::check_invariants;
    use crate::grid::box_lines;
    use crate::patch::apply_patch;
    use crate::test_support::active_doc;
    use crate::types::{BoxType, BoxView};

    fn own_box(doc: &mut GameDoc, id: BoxId, owner: usize) {
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

    #[test]
    fn rollback_removes_lines_and_revokes_boxes() {
        let mut doc = active_doc(2);
        own_box(&mut doc, BoxId::new(0, 0), 0);
        own_box(&mut doc, BoxId::new(1, 1), 1);
        own_box(&mut doc, BoxId::new(3, 3), 1);
        let dot = DotId::new(1, 1);
        doc.sabotage.sabotaged_dot = Some(dot);
        doc.sabotage.effect_until_player_index = Some(1);

        let patch = sabotage_rollback(&doc, dot, 50).expect("rollback applies");
        apply_patch(&mut doc, &patch);

        assert!(doc.lines.keys().all(|line| !line_touches_dot(*line, dot)));
        assert!(!doc.boxes.contains_key(&BoxId::new(0, 0)));
        assert!(!doc.boxes.contains_key(&BoxId::new(1, 1)));
        assert!(doc.boxes.contains_key(&BoxId::new(3, 3)));
        assert_eq!(doc.players[0].score, 0);
        assert_eq!(doc.players[1].score, 1);
        assert_eq!(doc.sabotage.sabotaged_dot, None);
        assert_eq!(doc.sabotage.effect_until_player_index, None);
        assert!(check_invariants(&doc).is_empty());
    }

    #[test]
    fn rollback_is_skipped_once_cleared() {
        let mut doc = active_doc(2);
        let dot = DotId::new(2, 2);
        assert!(sabotage_rollback(&doc, dot, 0).is_none());
        doc.sabotage.sabotaged_dot = Some(DotId::new(0, 0));
        assert!(sabotage_rollback(&doc, dot, 0).is_none());
    }

    #[test]
    fn rollback_on_untouched_dot_only_clears_state() {
        let mut doc = active_doc(2);
        let dot = DotId::new(5, 5);
        doc.sabotage.sabotaged_dot = Some(dot);
        doc.sabotage.effect_until_player_index = Some(1);
        let patch = sabotage_rollback(&doc, dot, 0).expect("clears state");
        assert!(patch.lines.is_empty());
        assert!(patch.boxes.is_empty());
        assert!(patch.player_fields.is_empty());
    }
}
