use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::GRID_DOTS;
use crate::error::KeyParseError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl Orientation {
    fn tag(self) -> &'static str {
        match self {
            Self::Horizontal => "h",
            Self::Vertical => "v",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "h" | "horizontal" => Some(Self::Horizontal),
            "v" | "vertical" => Some(Self::Vertical),
            _ => None,
        }
    }
}

/// A line between two neighbouring dots. Horizontal `(r, c)` joins dot
/// `(r, c)` to `(r, c + 1)`; vertical `(r, c)` joins `(r, c)` to `(r + 1, c)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineId {
    pub row: usize,
    pub col: usize,
    pub orientation: Orientation,
}

impl LineId {
    pub fn horizontal(row: usize, col: usize) -> Self {
        Self {
            row,
            col,
            orientation: Orientation::Horizontal,
        }
    }

    pub fn vertical(row: usize, col: usize) -> Self {
        Self {
            row,
            col,
            orientation: Orientation::Vertical,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoxId {
    pub row: usize,
    pub col: usize,
}

impl BoxId {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DotId {
    pub row: usize,
    pub col: usize,
}

impl DotId {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.row, self.col, self.orientation.tag())
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

impl fmt::Display for DotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

fn parse_coord(raw: &str, part: &str) -> Result<usize, KeyParseError> {
    part.trim()
        .parse::<usize>()
        .map_err(|_| KeyParseError::new(raw))
}

impl FromStr for LineId {
    type Err = KeyParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.split(',');
        let (Some(row), Some(col), Some(tag), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyParseError::new(raw));
        };
        let orientation = Orientation::parse(tag.trim()).ok_or_else(|| KeyParseError::new(raw))?;
        Ok(Self {
            row: parse_coord(raw, row)?,
            col: parse_coord(raw, col)?,
            orientation,
        })
    }
}

fn parse_pair(raw: &str) -> Result<(usize, usize), KeyParseError> {
    let mut parts = raw.split(',');
    let (Some(row), Some(col), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(KeyParseError::new(raw));
    };
    Ok((parse_coord(raw, row)?, parse_coord(raw, col)?))
}

impl FromStr for BoxId {
    type Err = KeyParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_pair(raw).map(|(row, col)| Self { row, col })
    }
}

impl FromStr for DotId {
    type Err = KeyParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_pair(raw).map(|(row, col)| Self { row, col })
    }
}

// Keys travel as "row,col[,h|v]" strings so they can be JSON object keys.
macro_rules! string_keyed {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_keyed!(LineId);
string_keyed!(BoxId);
string_keyed!(DotId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    Active,
    Finished,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxType {
    #[default]
    Normal,
    Golden,
    Penalty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouletteEffect {
    Prohibit,
    Sabotage,
    Anchor,
}

impl RouletteEffect {
    pub const CYCLE: [RouletteEffect; 3] = [Self::Prohibit, Self::Sabotage, Self::Anchor];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub color: String,
    pub score: u32,
    pub banked_turns: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxView {
    pub owner_id: usize,
    #[serde(rename = "type")]
    pub box_type: BoxType,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialSquares {
    #[serde(default)]
    pub golden: BTreeSet<BoxId>,
    #[serde(default)]
    pub penalty: BTreeSet<BoxId>,
}

impl SpecialSquares {
    pub fn type_of(&self, id: BoxId) -> BoxType {
        if self.golden.contains(&id) {
            BoxType::Golden
        } else if self.penalty.contains(&id) {
            BoxType::Penalty
        } else {
            BoxType::Normal
        }
    }

    pub fn contains(&self, id: BoxId) -> bool {
        self.golden.contains(&id) || self.penalty.contains(&id)
    }

    pub fn remove(&mut self, id: BoxId) -> BoxType {
        if self.golden.remove(&id) {
            BoxType::Golden
        } else if self.penalty.remove(&id) {
            BoxType::Penalty
        } else {
            BoxType::Normal
        }
    }

    pub fn insert(&mut self, id: BoxId, box_type: BoxType) {
        match box_type {
            BoxType::Golden => {
                self.golden.insert(id);
            }
            BoxType::Penalty => {
                self.penalty.insert(id);
            }
            BoxType::Normal => {}
        }
    }

    pub fn len(&self) -> usize {
        self.golden.len() + self.penalty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.golden.is_empty() && self.penalty.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SabotageState {
    #[serde(default)]
    pub glowing_dot: Option<DotId>,
    #[serde(default)]
    pub glow_start_time: Option<u64>,
    #[serde(default)]
    pub glow_duration: Option<u64>,
    #[serde(default)]
    pub next_glow_time: Option<u64>,
    #[serde(default)]
    pub prohibited_dot: Option<DotId>,
    #[serde(default)]
    pub anchored_dot: Option<DotId>,
    #[serde(default)]
    pub sabotaged_dot: Option<DotId>,
    #[serde(default)]
    pub effect_until_player_index: Option<usize>,
}

impl SabotageState {
    pub fn has_effect(&self) -> bool {
        self.prohibited_dot.is_some()
            || self.anchored_dot.is_some()
            || self.sabotaged_dot.is_some()
            || self.effect_until_player_index.is_some()
    }

    pub fn has_glow(&self) -> bool {
        self.glowing_dot.is_some()
            || self.glow_start_time.is_some()
            || self.glow_duration.is_some()
            || self.next_glow_time.is_some()
    }

    pub fn prohibited_for(&self, player: usize) -> Option<DotId> {
        self.prohibited_dot
            .filter(|_| self.effect_until_player_index == Some(player))
    }

    pub fn anchored_for(&self, player: usize) -> Option<DotId> {
        self.anchored_dot
            .filter(|_| self.effect_until_player_index == Some(player))
    }

    pub fn glow_ends_at(&self) -> Option<u64> {
        match (self.glow_start_time, self.glow_duration) {
            (Some(start), Some(duration)) => Some(start.saturating_add(duration)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDoc {
    pub code: String,
    pub status: GameStatus,
    pub host_id: String,
    pub grid_dots: usize,
    pub max_players: usize,
    pub players: Vec<PlayerView>,
    pub current_player_index: usize,
    #[serde(default)]
    pub lines: BTreeMap<LineId, usize>,
    #[serde(default)]
    pub boxes: BTreeMap<BoxId, BoxView>,
    #[serde(default)]
    pub special_squares: SpecialSquares,
    #[serde(default)]
    pub sabotage: SabotageState,
    pub created_at: u64,
    pub last_activity: u64,
}

impl GameDoc {
    pub fn new(code: &str, host: PlayerView, max_players: usize, now_ms: u64) -> Self {
        Self {
            code: code.to_string(),
            status: GameStatus::Waiting,
            host_id: host.id.clone(),
            grid_dots: GRID_DOTS,
            max_players,
            players: vec![host],
            current_player_index: 0,
            lines: BTreeMap::new(),
            boxes: BTreeMap::new(),
            special_squares: SpecialSquares::default(),
            sabotage: SabotageState::default(),
            created_at: now_ms,
            last_activity: now_ms,
        }
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player_index_of(&self, identity: &str) -> Option<usize> {
        self.players.iter().position(|player| player.id == identity)
    }

    pub fn next_player_index(&self) -> usize {
        if self.players.is_empty() {
            return 0;
        }
        (self.current_player_index + 1) % self.players.len()
    }

    pub fn is_active(&self) -> bool {
        self.status == GameStatus::Active
    }

    pub fn special_square_type(&self, id: BoxId) -> BoxType {
        match self.boxes.get(&id) {
            Some(view) => view.box_type,
            None => self.special_squares.type_of(id),
        }
    }

    pub fn score_total(&self) -> u64 {
        self.players.iter().map(|player| player.score as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip_through_strings() {
        let line: LineId = "2,3,v".parse().expect("line key parses");
        assert_eq!(line, LineId::vertical(2, 3));
        assert_eq!(line.to_string(), "2,3,v");
        let id: BoxId = " 0 , 4 ".parse().expect("box key parses");
        assert_eq!(id, BoxId::new(0, 4));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!("1,2".parse::<LineId>().is_err());
        assert!("1,2,x".parse::<LineId>().is_err());
        assert!("1,2,h,4".parse::<LineId>().is_err());
        assert!("a,b".parse::<BoxId>().is_err());
        assert!("-1,0".parse::<DotId>().is_err());
    }

    #[test]
    fn document_uses_camel_case_field_names() {
        let host = PlayerView {
            id: "u1".to_string(),
            name: "Ann".to_string(),
            color: "#000".to_string(),
            score: 0,
            banked_turns: 0,
        };
        let mut doc = GameDoc::new("ABCDEF", host, 2, 10);
        doc.lines.insert(LineId::horizontal(0, 0), 0);
        doc.boxes.insert(
            BoxId::new(0, 0),
            BoxView {
                owner_id: 0,
                box_type: BoxType::Golden,
            },
        );
        let value = serde_json::to_value(&doc).expect("serializes");
        assert_eq!(value["currentPlayerIndex"], 0);
        assert_eq!(value["players"][0]["bankedTurns"], 0);
        assert_eq!(value["lines"]["0,0,h"], 0);
        assert_eq!(value["boxes"]["0,0"]["ownerId"], 0);
        assert_eq!(value["boxes"]["0,0"]["type"], "golden");
        assert_eq!(value["status"], "waiting");

        let back: GameDoc = serde_json::from_value(value).expect("deserializes");
        assert_eq!(back, doc);
    }

    #[test]
    fn effects_bind_only_the_tagged_player() {
        let sabotage = SabotageState {
            prohibited_dot: Some(DotId::new(1, 1)),
            effect_until_player_index: Some(1),
            ..SabotageState::default()
        };
        assert_eq!(sabotage.prohibited_for(1), Some(DotId::new(1, 1)));
        assert_eq!(sabotage.prohibited_for(0), None);
        assert_eq!(sabotage.anchored_for(1), None);
    }
}
