pub const GRID_DOTS: usize = 6;
pub const GRID_BOXES: usize = GRID_DOTS - 1;
pub const BOX_COUNT: usize = GRID_BOXES * GRID_BOXES;
pub const LINE_COUNT: usize = 2 * GRID_DOTS * GRID_BOXES;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;

pub const JOIN_CODE_LEN: usize = 6;
pub const JOIN_CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const MAX_NAME_CHARS: usize = 16;

pub const PLAYER_COLORS: [&str; MAX_PLAYERS] = ["#3b82f6", "#10b981", "#a855f7", "#ec4899"];

pub const GLOW_DURATION_MS: u64 = 1_800;
pub const GLOW_IDLE_MIN_MS: u64 = 3_000;
pub const GLOW_IDLE_MAX_MS: u64 = 7_000;
pub const EFFECT_CYCLE_MS: u64 = 350;
pub const SABOTAGE_DELAY_MS: u64 = 500;
pub const ANCHOR_GRACE_MS: u64 = 3_000;
pub const MISS_PENALTY_MS: u64 = 2_000;
pub const MISS_SLOWDOWN_FACTOR: u64 = 3;
pub const IDLE_REMINDER_MS: u64 = 20_000;

pub const RELOCATE_MIN_ROUNDS: u32 = 3;
pub const RELOCATE_MAX_ROUNDS: u32 = 5;

pub fn player_color(index: usize) -> &'static str {
    PLAYER_COLORS[index % PLAYER_COLORS.len()]
}

pub fn clamp_max_players(requested: usize) -> usize {
    requested.clamp(MIN_PLAYERS, MAX_PLAYERS)
}
