use std::collections::BTreeSet;

use tracing::debug;

use crate::engine::{self, game_result, GameResult, MoveOutcome};
use crate::error::{LobbyError, MoveRejection};
use crate::lobby::{join_patch, new_game, start_patch};
use crate::patch::apply_patch;
use crate::rng::Rng;
use crate::special_squares::{SpecialSquareOptions, SpecialSquareRegistry};
use crate::types::{BoxId, GameDoc, LineId};

pub struct LocalGame {
    doc: GameDoc,
    registry: SpecialSquareRegistry,
    rng: Rng,
    relocations: u32,
}

impl LocalGame {
    pub fn new(names: &[&str], seed: u32, now_ms: u64) -> Result<Self, LobbyError> {
        let mut rng = Rng::new(seed);
        let options = SpecialSquareOptions::local();
        let first = names.first().copied().unwrap_or_default();
        let mut doc = new_game("LOCAL0", "local_1", first, names.len(), now_ms);
        for (index, name) in names.iter().enumerate().skip(1) {
            let patch = join_patch(&doc, &format!("local_{}", index + 1), name, now_ms)?;
            apply_patch(&mut doc, &patch);
        }
        let host = doc.host_id.clone();
        let patch = start_patch(&doc, &host, options, &mut rng, now_ms)?;
        apply_patch(&mut doc, &patch);

        let registry = SpecialSquareRegistry::new(options, &mut rng);
        Ok(Self {
            doc,
            registry,
            rng,
            relocations: 0,
        })
    }

    pub fn doc(&self) -> &GameDoc {
        &self.doc
    }

    pub fn current_player(&self) -> usize {
        self.doc.current_player_index
    }

    pub fn is_finished(&self) -> bool {
        !self.doc.is_active()
    }

    pub fn result(&self) -> Option<GameResult> {
        if self.is_finished() {
            game_result(&self.doc)
        } else {
            None
        }
    }

    pub fn relocations(&self) -> u32 {
        self.relocations
    }

    pub fn propose_line(&mut self, line: LineId, now_ms: u64) -> Result<MoveOutcome, MoveRejection> {
        let mover = self.doc.current_player_index;
        let outcome = engine::propose_line(&self.doc, mover, line, &mut self.rng, now_ms)?;
        apply_patch(&mut self.doc, &outcome.patch);

        // A round ends when the turn comes back around to the first player.
        let wrapped = mover != 0 && self.doc.current_player_index == 0;
        if wrapped && !outcome.finished {
            let completed: BTreeSet<BoxId> = self.doc.boxes.keys().copied().collect();
            if let Some(next) = self.registry.relocate_after_n_turns(
                &self.doc.special_squares,
                &completed,
                &mut self.rng,
            ) {
                debug!(
                    golden = next.golden.len(),
                    penalty = next.penalty.len(),
                    "special squares relocated"
                );
                self.doc.special_squares = next;
                self.relocations += 1;
            }
        }
        Ok(outcome)
    }
}
