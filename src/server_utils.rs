use crate::constants::{
    clamp_max_players, JOIN_CODE_ALPHABET, JOIN_CODE_LEN, MAX_NAME_CHARS, MAX_PLAYERS,
};

pub fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Player".to_string();
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

pub fn normalize_code(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_ascii_uppercase();
    if normalized.chars().count() != JOIN_CODE_LEN {
        return None;
    }
    if !normalized.chars().all(|c| JOIN_CODE_ALPHABET.contains(c)) {
        return None;
    }
    Some(normalized)
}

pub fn normalize_max_players(value: Option<i64>) -> usize {
    match value {
        None => MAX_PLAYERS,
        Some(requested) => clamp_max_players(requested.clamp(0, MAX_PLAYERS as i64) as usize),
    }
}

pub fn normalize_identity(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn minutes_to_ms(minutes: u64) -> u64 {
    minutes.saturating_mul(60_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_name_applies_trim_empty_and_max_len() {
        assert_eq!(sanitize_name(""), "Player");
        assert_eq!(sanitize_name("   "), "Player");
        assert_eq!(sanitize_name(" Alice "), "Alice");
        assert_eq!(sanitize_name("12345678901234567890"), "1234567890123456");
    }

    #[test]
    fn code_normalization_uppercases_and_rejects_ambiguous_letters() {
        assert_eq!(normalize_code(" abc234 "), Some("ABC234".to_string()));
        assert_eq!(normalize_code("ABC23"), None);
        assert_eq!(normalize_code("ABCDE0"), None);
        assert_eq!(normalize_code("ABCDEI"), None);
    }

    #[test]
    fn max_players_clamps_range() {
        assert_eq!(normalize_max_players(None), 4);
        assert_eq!(normalize_max_players(Some(-3)), 2);
        assert_eq!(normalize_max_players(Some(3)), 3);
        assert_eq!(normalize_max_players(Some(99)), 4);
    }

    #[test]
    fn identity_must_be_non_empty() {
        assert_eq!(normalize_identity("  u1 "), Some("u1".to_string()));
        assert_eq!(normalize_identity("   "), None);
        assert_eq!(normalize_identity(&"x".repeat(65)), None);
    }
}
