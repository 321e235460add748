use crate::constants::player_color;
use crate::engine::{propose_line, MoveOutcome};
use crate::grid::box_lines;
use crate::patch::apply_patch;
use crate::rng::Rng;
use crate::types::{BoxId, GameDoc, GameStatus, LineId, PlayerView};

pub fn make_player(index: usize) -> PlayerView {
    PlayerView {
        id: format!("user_{}", index + 1),
        name: format!("P{}", index + 1),
        color: player_color(index).to_string(),
        score: 0,
        banked_turns: 0,
    }
}

pub fn active_doc(players: usize) -> GameDoc {
    let mut doc = GameDoc::new("TESTAB", make_player(0), 4, 0);
    for index in 1..players {
        doc.players.push(make_player(index));
    }
    doc.status = GameStatus::Active;
    doc
}

pub fn fill_box_except(doc: &mut GameDoc, id: BoxId, owner: usize) -> LineId {
    let [top, bottom, left, right] = box_lines(id);
    for line in [top, bottom, left] {
        doc.lines.insert(line, owner);
    }
    right
}

pub fn play(doc: &mut GameDoc, mover: usize, line: LineId, rng: &mut Rng) -> MoveOutcome {
    let outcome = propose_line(doc, mover, line, rng, 1).expect("move should be legal");
    apply_patch(doc, &outcome.patch);
    outcome
}
