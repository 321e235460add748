use std::collections::BTreeSet;

use tracing::debug;

use crate::constants::{RELOCATE_MAX_ROUNDS, RELOCATE_MIN_ROUNDS};
use crate::grid::{all_boxes, chebyshev, is_corner_box};
use crate::rng::Rng;
use crate::types::{BoxId, BoxType, SpecialSquares};

#[derive(Clone, Copy, Debug)]
pub struct SpecialSquareOptions {
    pub golden_min: usize,
    pub golden_max: usize,
    pub penalty_min: usize,
    pub penalty_max: usize,
    pub relocation: bool,
}

impl Default for SpecialSquareOptions {
    fn default() -> Self {
        Self {
            golden_min: 1,
            golden_max: 1,
            penalty_min: 2,
            penalty_max: 2,
            relocation: false,
        }
    }
}

impl SpecialSquareOptions {
    pub fn local() -> Self {
        Self {
            relocation: true,
            ..Self::default()
        }
    }

    fn golden_range(&self) -> (usize, usize) {
        let min = self.golden_min.clamp(1, 2);
        (min, self.golden_max.clamp(min, 2))
    }

    fn penalty_range(&self) -> (usize, usize) {
        let min = self.penalty_min.clamp(1, 2);
        (min, self.penalty_max.clamp(min, 2))
    }
}

pub fn free_boxes(completed: &BTreeSet<BoxId>, special: &SpecialSquares) -> Vec<BoxId> {
    all_boxes()
        .into_iter()
        .filter(|id| !completed.contains(id) && !special.contains(*id))
        .collect()
}

pub struct SpecialSquareRegistry {
    options: SpecialSquareOptions,
    rounds_since_relocation: u32,
    relocation_threshold: u32,
}

impl SpecialSquareRegistry {
    pub fn new(options: SpecialSquareOptions, rng: &mut Rng) -> Self {
        Self {
            options,
            rounds_since_relocation: 0,
            relocation_threshold: rng.range_u32(RELOCATE_MIN_ROUNDS, RELOCATE_MAX_ROUNDS),
        }
    }

    pub fn place_initial(&self, completed: &BTreeSet<BoxId>, rng: &mut Rng) -> SpecialSquares {
        let (golden_min, golden_max) = self.options.golden_range();
        let (penalty_min, penalty_max) = self.options.penalty_range();
        let golden_count = rng.range_u64(golden_min as u64, golden_max as u64) as usize;
        let penalty_count = rng.range_u64(penalty_min as u64, penalty_max as u64) as usize;

        let mut candidates: Vec<BoxId> = all_boxes()
            .into_iter()
            .filter(|id| !is_corner_box(*id) && !completed.contains(id))
            .collect();
        rng.shuffle(&mut candidates);

        let mut squares = SpecialSquares::default();
        for id in candidates.iter().copied() {
            if squares.golden.len() >= golden_count {
                break;
            }
            squares.golden.insert(id);
        }
        for id in candidates.iter().copied() {
            if squares.penalty.len() >= penalty_count {
                break;
            }
            if squares.golden.contains(&id) {
                continue;
            }
            if squares.golden.iter().any(|golden| chebyshev(*golden, id) <= 1) {
                continue;
            }
            squares.penalty.insert(id);
        }
        debug!(
            golden = squares.golden.len(),
            penalty = squares.penalty.len(),
            "placed initial special squares"
        );
        squares
    }

    /// Relocation hook for single-device games. Call once per finished round;
    /// returns the new layout when the randomly chosen round count is reached.
    pub fn relocate_after_n_turns(
        &mut self,
        current: &SpecialSquares,
        completed: &BTreeSet<BoxId>,
        rng: &mut Rng,
    ) -> Option<SpecialSquares> {
        if !self.options.relocation {
            return None;
        }
        self.rounds_since_relocation += 1;
        if self.rounds_since_relocation < self.relocation_threshold {
            return None;
        }
        self.rounds_since_relocation = 0;
        self.relocation_threshold = rng.range_u32(RELOCATE_MIN_ROUNDS, RELOCATE_MAX_ROUNDS);
        Some(relocate(current, completed, rng))
    }
}

/// Replaces each consumed special square with one of the same type on a free
/// box. `just_completed` covers boxes closed by the current move that are not
/// yet in `completed`. No corner or adjacency rule applies here.
pub fn respawn_on_completion(
    current: &SpecialSquares,
    consumed: &[BoxId],
    completed: &BTreeSet<BoxId>,
    just_completed: &BTreeSet<BoxId>,
    rng: &mut Rng,
) -> SpecialSquares {
    let mut next = current.clone();
    let mut consumed_types = Vec::new();
    for id in consumed {
        let box_type = next.remove(*id);
        if box_type != BoxType::Normal {
            consumed_types.push(box_type);
        }
    }

    let occupied: BTreeSet<BoxId> = completed.union(just_completed).copied().collect();
    for box_type in consumed_types {
        let free = free_boxes(&occupied, &next);
        let Some(id) = rng.pick(&free).copied() else {
            debug!(?box_type, "no free box left for respawn");
            continue;
        };
        next.insert(id, box_type);
    }
    next
}

pub fn relocate(current: &SpecialSquares, completed: &BTreeSet<BoxId>, rng: &mut Rng) -> SpecialSquares {
    let mut free = free_boxes(completed, &SpecialSquares::default());
    rng.shuffle(&mut free);
    let mut slots = free.into_iter();
    let mut next = SpecialSquares::default();
    for _ in 0..current.golden.len() {
        if let Some(id) = slots.next() {
            next.golden.insert(id);
        }
    }
    for _ in 0..current.penalty.len() {
        if let Some(id) = slots.next() {
            next.penalty.insert(id);
        }
    }
    next
}
