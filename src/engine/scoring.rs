use std::collections::BTreeMap;

use crate::grid::{boxes_for_line, box_in_bounds, is_box_closed, line_in_bounds};
use crate::types::{BoxId, GameDoc, LineId, PlayerView};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GameResult {
    Winner(usize),
    Tie(Vec<usize>),
}

pub fn newly_completed(
    doc: &GameDoc,
    lines_after: &BTreeMap<LineId, usize>,
    line: LineId,
) -> Vec<BoxId> {
    boxes_for_line(line)
        .into_iter()
        .filter(|id| !doc.boxes.contains_key(id) && is_box_closed(lines_after, *id))
        .collect()
}

pub fn winners(players: &[PlayerView]) -> Vec<usize> {
    let Some(best) = players.iter().map(|player| player.score).max() else {
        return Vec::new();
    };
    players
        .iter()
        .enumerate()
        .filter(|(_, player)| player.score == best)
        .map(|(index, _)| index)
        .collect()
}

pub fn game_result(doc: &GameDoc) -> Option<GameResult> {
    let top = winners(&doc.players);
    match top.len() {
        0 => None,
        1 => Some(GameResult::Winner(top[0])),
        _ => Some(GameResult::Tie(top)),
    }
}

pub fn check_invariants(doc: &GameDoc) -> Vec<String> {
    let mut anomalies = Vec::new();

    if doc.score_total() != doc.boxes.len() as u64 {
        anomalies.push(format!(
            "score sum {} != box count {}",
            doc.score_total(),
            doc.boxes.len()
        ));
    }
    if !doc.players.is_empty() && doc.current_player_index >= doc.players.len() {
        anomalies.push(format!(
            "current player index {} out of range",
            doc.current_player_index
        ));
    }
    for (line, owner) in &doc.lines {
        if !line_in_bounds(*line) {
            anomalies.push(format!("line {line} outside grid"));
        }
        if *owner >= doc.players.len() {
            anomalies.push(format!("line {line} owned by unknown player {owner}"));
        }
    }
    for (id, view) in &doc.boxes {
        if !box_in_bounds(*id) {
            anomalies.push(format!("box {id} outside grid"));
        }
        if !is_box_closed(&doc.lines, *id) {
            anomalies.push(format!("box {id} owned without four lines"));
        }
        if view.owner_id >= doc.players.len() {
            anomalies.push(format!("box {id} owned by unknown player {}", view.owner_id));
        }
        if doc.special_squares.contains(*id) {
            anomalies.push(format!("box {id} is both completed and special"));
        }
    }
    for id in doc.special_squares.golden.intersection(&doc.special_squares.penalty) {
        anomalies.push(format!("box {id} is both golden and penalty"));
    }
    anomalies
}
