use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{
    BoxId, BoxView, DotId, GameDoc, GameStatus, LineId, PlayerView, SabotageState, SpecialSquares,
};

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banked_turns: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SabotagePatch {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub glowing_dot: Option<Option<DotId>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub glow_start_time: Option<Option<u64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub glow_duration: Option<Option<u64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub next_glow_time: Option<Option<u64>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub prohibited_dot: Option<Option<DotId>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub anchored_dot: Option<Option<DotId>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub sabotaged_dot: Option<Option<DotId>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub effect_until_player_index: Option<Option<usize>>,
}

impl SabotagePatch {
    pub fn clear_glow() -> Self {
        Self {
            glowing_dot: Some(None),
            glow_start_time: Some(None),
            glow_duration: Some(None),
            next_glow_time: Some(None),
            ..Self::default()
        }
    }

    pub fn clear_effects() -> Self {
        Self {
            prohibited_dot: Some(None),
            anchored_dot: Some(None),
            sabotaged_dot: Some(None),
            effect_until_player_index: Some(None),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge(&mut self, other: SabotagePatch) {
        fn take<T>(slot: &mut Option<Option<T>>, value: Option<Option<T>>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.glowing_dot, other.glowing_dot);
        take(&mut self.glow_start_time, other.glow_start_time);
        take(&mut self.glow_duration, other.glow_duration);
        take(&mut self.next_glow_time, other.next_glow_time);
        take(&mut self.prohibited_dot, other.prohibited_dot);
        take(&mut self.anchored_dot, other.anchored_dot);
        take(&mut self.sabotaged_dot, other.sabotaged_dot);
        take(
            &mut self.effect_until_player_index,
            other.effect_until_player_index,
        );
    }

    pub fn apply(&self, state: &mut SabotageState) {
        fn put<T: Copy>(slot: &mut Option<T>, value: Option<Option<T>>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        put(&mut state.glowing_dot, self.glowing_dot);
        put(&mut state.glow_start_time, self.glow_start_time);
        put(&mut state.glow_duration, self.glow_duration);
        put(&mut state.next_glow_time, self.next_glow_time);
        put(&mut state.prohibited_dot, self.prohibited_dot);
        put(&mut state.anchored_dot, self.anchored_dot);
        put(&mut state.sabotaged_dot, self.sabotaged_dot);
        put(
            &mut state.effect_until_player_index,
            self.effect_until_player_index,
        );
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GameStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_player_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<PlayerView>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub player_fields: BTreeMap<usize, PlayerPatch>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lines: BTreeMap<LineId, Option<usize>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub boxes: BTreeMap<BoxId, Option<BoxView>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_squares: Option<SpecialSquares>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sabotage: Option<SabotagePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<u64>,
}

impl GamePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_sabotage(sabotage: SabotagePatch, now_ms: u64) -> Self {
        Self {
            sabotage: Some(sabotage),
            last_activity: Some(now_ms),
            ..Self::default()
        }
    }

    pub fn sabotage_mut(&mut self) -> &mut SabotagePatch {
        self.sabotage.get_or_insert_with(SabotagePatch::default)
    }

    pub fn merge(&mut self, other: GamePatch) {
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.host_id.is_some() {
            self.host_id = other.host_id;
        }
        if other.current_player_index.is_some() {
            self.current_player_index = other.current_player_index;
        }
        if other.players.is_some() {
            self.players = other.players;
        }
        for (index, fields) in other.player_fields {
            let slot = self.player_fields.entry(index).or_default();
            if fields.score.is_some() {
                slot.score = fields.score;
            }
            if fields.banked_turns.is_some() {
                slot.banked_turns = fields.banked_turns;
            }
        }
        self.lines.extend(other.lines);
        self.boxes.extend(other.boxes);
        if other.special_squares.is_some() {
            self.special_squares = other.special_squares;
        }
        if let Some(sabotage) = other.sabotage {
            self.sabotage_mut().merge(sabotage);
        }
        if other.last_activity.is_some() {
            self.last_activity = other.last_activity;
        }
    }
}

pub fn apply_patch(doc: &mut GameDoc, patch: &GamePatch) {
    if let Some(status) = patch.status {
        doc.status = status;
    }
    if let Some(host_id) = &patch.host_id {
        doc.host_id = host_id.clone();
    }
    if let Some(index) = patch.current_player_index {
        doc.current_player_index = index;
    }
    if let Some(players) = &patch.players {
        doc.players = players.clone();
    }
    for (index, fields) in &patch.player_fields {
        let Some(player) = doc.players.get_mut(*index) else {
            continue;
        };
        if let Some(score) = fields.score {
            player.score = score;
        }
        if let Some(banked) = fields.banked_turns {
            player.banked_turns = banked;
        }
    }
    for (line, owner) in &patch.lines {
        match owner {
            Some(owner) => {
                doc.lines.insert(*line, *owner);
            }
            None => {
                doc.lines.remove(line);
            }
        }
    }
    for (id, view) in &patch.boxes {
        match view {
            Some(view) => {
                doc.boxes.insert(*id, *view);
            }
            None => {
                doc.boxes.remove(id);
            }
        }
    }
    if let Some(special) = &patch.special_squares {
        doc.special_squares = special.clone();
    }
    if let Some(sabotage) = &patch.sabotage {
        sabotage.apply(&mut doc.sabotage);
    }
    if let Some(at) = patch.last_activity {
        doc.last_activity = at;
    }
}
