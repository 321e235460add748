use std::collections::BTreeMap;

use crate::constants::{GRID_BOXES, GRID_DOTS};
use crate::types::{BoxId, DotId, LineId, Orientation};

pub fn line_in_bounds(line: LineId) -> bool {
    match line.orientation {
        Orientation::Horizontal => line.row < GRID_DOTS && line.col < GRID_BOXES,
        Orientation::Vertical => line.row < GRID_BOXES && line.col < GRID_DOTS,
    }
}

pub fn box_in_bounds(id: BoxId) -> bool {
    id.row < GRID_BOXES && id.col < GRID_BOXES
}

pub fn dot_in_bounds(dot: DotId) -> bool {
    dot.row < GRID_DOTS && dot.col < GRID_DOTS
}

pub fn all_lines() -> Vec<LineId> {
    let mut lines = Vec::new();
    for row in 0..GRID_DOTS {
        for col in 0..GRID_BOXES {
            lines.push(LineId::horizontal(row, col));
        }
    }
    for row in 0..GRID_BOXES {
        for col in 0..GRID_DOTS {
            lines.push(LineId::vertical(row, col));
        }
    }
    lines
}

pub fn all_boxes() -> Vec<BoxId> {
    (0..GRID_BOXES)
        .flat_map(|row| (0..GRID_BOXES).map(move |col| BoxId::new(row, col)))
        .collect()
}

pub fn all_dots() -> Vec<DotId> {
    (0..GRID_DOTS)
        .flat_map(|row| (0..GRID_DOTS).map(move |col| DotId::new(row, col)))
        .collect()
}

pub fn box_lines(id: BoxId) -> [LineId; 4] {
    [
        LineId::horizontal(id.row, id.col),
        LineId::horizontal(id.row + 1, id.col),
        LineId::vertical(id.row, id.col),
        LineId::vertical(id.row, id.col + 1),
    ]
}

pub fn boxes_for_line(line: LineId) -> Vec<BoxId> {
    if !line_in_bounds(line) {
        return Vec::new();
    }
    let mut boxes = Vec::with_capacity(2);
    match line.orientation {
        Orientation::Horizontal => {
            if line.row > 0 {
                boxes.push(BoxId::new(line.row - 1, line.col));
            }
            if line.row < GRID_BOXES {
                boxes.push(BoxId::new(line.row, line.col));
            }
        }
        Orientation::Vertical => {
            if line.col > 0 {
                boxes.push(BoxId::new(line.row, line.col - 1));
            }
            if line.col < GRID_BOXES {
                boxes.push(BoxId::new(line.row, line.col));
            }
        }
    }
    boxes
}

pub fn line_endpoints(line: LineId) -> (DotId, DotId) {
    let start = DotId::new(line.row, line.col);
    let end = match line.orientation {
        Orientation::Horizontal => DotId::new(line.row, line.col + 1),
        Orientation::Vertical => DotId::new(line.row + 1, line.col),
    };
    (start, end)
}

pub fn line_touches_dot(line: LineId, dot: DotId) -> bool {
    let (start, end) = line_endpoints(line);
    start == dot || end == dot
}

pub fn lines_at_dot(dot: DotId) -> Vec<LineId> {
    if !dot_in_bounds(dot) {
        return Vec::new();
    }
    let mut lines = Vec::with_capacity(4);
    if dot.col > 0 {
        lines.push(LineId::horizontal(dot.row, dot.col - 1));
    }
    if dot.col < GRID_BOXES {
        lines.push(LineId::horizontal(dot.row, dot.col));
    }
    if dot.row > 0 {
        lines.push(LineId::vertical(dot.row - 1, dot.col));
    }
    if dot.row < GRID_BOXES {
        lines.push(LineId::vertical(dot.row, dot.col));
    }
    lines
}

pub fn dots_adjacent(a: DotId, b: DotId) -> bool {
    line_between(a, b).is_some()
}

pub fn line_between(a: DotId, b: DotId) -> Option<LineId> {
    if !dot_in_bounds(a) || !dot_in_bounds(b) {
        return None;
    }
    let (first, second) = if (a.row, a.col) <= (b.row, b.col) {
        (a, b)
    } else {
        (b, a)
    };
    if first.row == second.row && first.col + 1 == second.col {
        return Some(LineId::horizontal(first.row, first.col));
    }
    if first.col == second.col && first.row + 1 == second.row {
        return Some(LineId::vertical(first.row, first.col));
    }
    None
}

pub fn undrawn_lines_at_dot(lines: &BTreeMap<LineId, usize>, dot: DotId) -> Vec<LineId> {
    lines_at_dot(dot)
        .into_iter()
        .filter(|line| !lines.contains_key(line))
        .collect()
}

pub fn is_box_closed(lines: &BTreeMap<LineId, usize>, id: BoxId) -> bool {
    box_lines(id).iter().all(|line| lines.contains_key(line))
}

pub fn drawn_sides(lines: &BTreeMap<LineId, usize>, id: BoxId) -> usize {
    box_lines(id)
        .iter()
        .filter(|line| lines.contains_key(line))
        .count()
}

pub fn is_corner_box(id: BoxId) -> bool {
    let last = GRID_BOXES - 1;
    (id.row == 0 || id.row == last) && (id.col == 0 || id.col == last)
}

pub fn chebyshev(a: BoxId, b: BoxId) -> usize {
    a.row.abs_diff(b.row).max(a.col.abs_diff(b.col))
}
