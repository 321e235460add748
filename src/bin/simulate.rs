use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use dots_boxes_rust_server::constants::{MAX_PLAYERS, MIN_PLAYERS};
use dots_boxes_rust_server::engine::{check_invariants, now_ms, validate_move, winners};
use dots_boxes_rust_server::grid::{all_dots, all_lines, boxes_for_line, drawn_sides};
use dots_boxes_rust_server::local::LocalGame;
use dots_boxes_rust_server::lobby;
use dots_boxes_rust_server::rng::Rng;
use dots_boxes_rust_server::roulette::TapOutcome;
use dots_boxes_rust_server::session::{
    GameSession, Notice, SessionObserver, SessionOptions,
};
use dots_boxes_rust_server::special_squares::SpecialSquareOptions;
use dots_boxes_rust_server::store::{DocumentStore, MemoryStore, Subscription};
use dots_boxes_rust_server::types::{GameDoc, GameStatus, LineId, RouletteEffect};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_MAX_STEPS: usize = 5_000;
const SYNC_ROUNDS: usize = 8;
const THINK_MIN_MS: u64 = 1_000;
const THINK_MAX_MS: u64 = 6_000;
const TAP_CHANCE: f32 = 0.35;
const WRONG_DOT_CHANCE: f32 = 0.25;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Number of games to play.
    #[arg(long, default_value_t = 1)]
    games: usize,
    #[arg(long, default_value_t = 2)]
    players: usize,
    #[arg(long)]
    seed: Option<u64>,
    /// Hot-seat games without the store or the roulette.
    #[arg(long)]
    local: bool,
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: usize,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    players: usize,
    seed: u32,
    local: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct RouletteCounts {
    glows: usize,
    prohibit: usize,
    anchor: usize,
    sabotage: usize,
    misses: usize,
    sabotaged_lines: usize,
    anchors_released: usize,
    forfeits: usize,
    banked_turns: usize,
    publish_failures: usize,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioResultLine {
    scenario: String,
    seed: u32,
    players: usize,
    mode: &'static str,
    finished: bool,
    steps: usize,
    duration_ms: u64,
    scores: Vec<u32>,
    winners: Vec<usize>,
    roulette: RouletteCounts,
    special_relocations: u32,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenario_count: usize,
    anomaly_count: usize,
    unfinished_count: usize,
    win_counts: BTreeMap<usize, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Default)]
struct CountingObserver {
    counts: Arc<Mutex<RouletteCounts>>,
}

impl CountingObserver {
    fn record(&self, update: impl FnOnce(&mut RouletteCounts)) {
        if let Ok(mut counts) = self.counts.lock() {
            update(&mut counts);
        }
    }

    fn snapshot(&self) -> RouletteCounts {
        self.counts
            .lock()
            .map(|counts| counts.clone())
            .unwrap_or_default()
    }
}

impl SessionObserver for CountingObserver {
    fn on_notice(&mut self, notice: &Notice) {
        self.record(|counts| match notice {
            Notice::EffectCommitted(RouletteEffect::Prohibit) => counts.prohibit += 1,
            Notice::EffectCommitted(RouletteEffect::Anchor) => counts.anchor += 1,
            Notice::EffectCommitted(RouletteEffect::Sabotage) => counts.sabotage += 1,
            Notice::LinesSabotaged { lines, .. } => counts.sabotaged_lines += lines,
            Notice::AnchorReleased => counts.anchors_released += 1,
            Notice::TurnForfeited => counts.forfeits += 1,
            Notice::BonusTurnBanked => counts.banked_turns += 1,
            Notice::PublishFailed(_) => counts.publish_failures += 1,
            _ => {}
        });
    }

    fn on_roulette_miss(&mut self, _until_ms: u64) {
        self.record(|counts| counts.misses += 1);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let scenarios = resolve_scenarios(&cli);
    let started_at_ms = now_ms();
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, started_at_ms));

    let mut results = Vec::new();
    for scenario in &scenarios {
        info!(%match_id, scenario = %scenario.name, seed = scenario.seed, "scenario started");
        let result = if scenario.local {
            run_local(scenario, cli.max_steps)?
        } else {
            run_networked(scenario, cli.max_steps)?
        };
        for anomaly in &result.anomalies {
            warn!(%match_id, scenario = %scenario.name, %anomaly, "anomaly detected");
        }
        println!(
            "{}",
            serde_json::to_string(&result).context("scenario result should serialize")?
        );
        results.push(result);
    }

    let summary = build_run_summary(match_id.clone(), started_at_ms, now_ms(), results);
    if let Some(path) = cli.summary_out.as_ref() {
        write_summary(path, &summary)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
    }
    info!(
        %match_id,
        scenarios = summary.scenario_count,
        anomalies = summary.anomaly_count,
        unfinished = summary.unfinished_count,
        "run finished"
    );

    if summary.anomaly_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let players = cli.players.clamp(MIN_PLAYERS, MAX_PLAYERS);
    let base_seed = normalize_seed(cli.seed.unwrap_or_else(now_ms));
    (0..cli.games.max(1))
        .map(|index| {
            let seed = base_seed.wrapping_add(index as u32);
            let mode = if cli.local { "local" } else { "networked" };
            Scenario {
                name: format!("{mode}-{players}p-{index}"),
                players,
                seed,
                local: cli.local,
            }
        })
        .collect()
}

fn run_networked(scenario: &Scenario, max_steps: usize) -> anyhow::Result<ScenarioResultLine> {
    let mut rng = Rng::new(scenario.seed);
    let store = Arc::new(MemoryStore::new());
    let mut now = 1_000u64;

    let doc = lobby::create_game(store.as_ref(), &bot_identity(0), "Bot-01", scenario.players, now)
        .context("create game")?;
    let code = doc.code;
    for index in 1..scenario.players {
        lobby::join_game(
            store.as_ref(),
            &code,
            &bot_identity(index),
            &format!("Bot-{:02}", index + 1),
            now,
        )
        .context("join game")?;
    }

    let observer = CountingObserver::default();
    let mut bots: Vec<(GameSession, Subscription)> = Vec::new();
    for index in 0..scenario.players {
        let shared: Arc<dyn DocumentStore> = store.clone();
        let options = SessionOptions {
            seed: Some(scenario.seed.wrapping_mul(31).wrapping_add(index as u32)),
            ..SessionOptions::default()
        };
        let mut session = GameSession::new(shared, &code, &bot_identity(index), options)
            .with_observer(Box::new(observer.clone()));
        session.attach(now).context("attach session")?;
        let mut subscription = store.subscribe(&code).context("subscribe")?;
        subscription.mark_seen();
        bots.push((session, subscription));
    }

    lobby::start_game(
        store.as_ref(),
        &code,
        &bot_identity(0),
        SpecialSquareOptions::default(),
        &mut rng,
        now,
    )
    .context("start game")?;

    let mut anomalies = Vec::new();
    let mut seen = HashSet::new();
    let mut glows = 0usize;
    let mut last_glow_start = None;
    let mut steps = 0usize;

    loop {
        sync_bots(&mut bots, now);
        let doc = store.get(&code).context("read game")?;
        if doc.sabotage.glow_start_time.is_some() && doc.sabotage.glow_start_time != last_glow_start {
            glows += 1;
        }
        last_glow_start = doc.sabotage.glow_start_time;
        for anomaly in check_invariants(&doc) {
            push_anomaly(&mut anomalies, &mut seen, anomaly);
        }
        if doc.status != GameStatus::Active || steps >= max_steps {
            break;
        }
        steps += 1;

        let think_until = now + rng.range_u64(THINK_MIN_MS, THINK_MAX_MS);
        let deadline = bots
            .iter()
            .filter_map(|(session, _)| session.next_deadline())
            .min();
        if let Some(at) = deadline.filter(|at| *at <= think_until) {
            now = now.max(at);
            for (session, _) in bots.iter_mut() {
                session.poll_timers(now);
            }
            continue;
        }
        now = think_until;

        bots_tap(&mut bots, &doc, &mut rng, now);
        sync_bots(&mut bots, now);

        let doc = store.get(&code).context("read game")?;
        let Some((session, _)) = bots.iter_mut().find(|(session, _)| session.is_my_turn()) else {
            continue;
        };
        let mover = doc.current_player_index;
        match choose_line(&doc, mover, &mut rng) {
            Some(line) => {
                if let Err(error) = session.propose_line(line, now) {
                    debug!(%line, %error, "bot move rejected");
                }
            }
            None => debug!(player = mover, "no legal line, waiting for effects to clear"),
        }
    }

    let doc = store.get(&code).context("read final game")?;
    let finished = doc.status == GameStatus::Finished;
    if !finished {
        push_anomaly(
            &mut anomalies,
            &mut seen,
            format!("game not finished after {steps} steps"),
        );
    }
    let roulette = RouletteCounts {
        glows,
        ..observer.snapshot()
    };
    Ok(result_line(scenario, &doc, steps, now, roulette, 0, anomalies))
}

fn sync_bots(bots: &mut [(GameSession, Subscription)], now: u64) {
    for _ in 0..SYNC_ROUNDS {
        let mut delivered = false;
        for (session, subscription) in bots.iter_mut() {
            if subscription.has_changed() {
                let doc = subscription.mark_seen();
                session.handle_snapshot(doc, now);
                delivered = true;
            }
        }
        if !delivered {
            return;
        }
    }
}

fn bots_tap(bots: &mut [(GameSession, Subscription)], doc: &GameDoc, rng: &mut Rng, now: u64) {
    let Some(glowing) = doc.sabotage.glowing_dot else {
        return;
    };
    if doc.sabotage.glow_ends_at().map_or(true, |ends| now >= ends) {
        return;
    }
    let dots = all_dots();
    for (session, _) in bots.iter_mut() {
        if session.is_my_turn() || !rng.chance(TAP_CHANCE) {
            continue;
        }
        let dot = if rng.chance(WRONG_DOT_CHANCE) {
            rng.pick(&dots).copied().unwrap_or(glowing)
        } else {
            glowing
        };
        match session.tap_dot(dot, now) {
            Ok(TapOutcome::Hit { effect, .. }) => {
                debug!(?effect, %dot, "bot hit the roulette");
                return;
            }
            Ok(TapOutcome::Miss) => {}
            Err(error) => debug!(%error, "bot tap rejected"),
        }
    }
}

fn choose_line(doc: &GameDoc, mover: usize, rng: &mut Rng) -> Option<LineId> {
    let legal: Vec<LineId> = all_lines()
        .into_iter()
        .filter(|line| validate_move(doc, mover, *line).is_ok())
        .collect();
    let sides_after = |line: &LineId| -> Vec<usize> {
        boxes_for_line(*line)
            .into_iter()
            .map(|id| drawn_sides(&doc.lines, id) + 1)
            .collect()
    };

    let scoring: Vec<LineId> = legal
        .iter()
        .copied()
        .filter(|line| sides_after(line).contains(&4))
        .collect();
    if let Some(line) = rng.pick(&scoring) {
        return Some(*line);
    }
    let safe: Vec<LineId> = legal
        .iter()
        .copied()
        .filter(|line| !sides_after(line).contains(&3))
        .collect();
    if let Some(line) = rng.pick(&safe) {
        return Some(*line);
    }
    rng.pick(&legal).copied()
}

fn run_local(scenario: &Scenario, max_steps: usize) -> anyhow::Result<ScenarioResultLine> {
    let names: Vec<String> = (0..scenario.players)
        .map(|index| format!("Seat-{:02}", index + 1))
        .collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut game = LocalGame::new(&name_refs, scenario.seed, 0).context("start local game")?;
    let mut rng = Rng::new(scenario.seed ^ 0x5eed);
    let mut counts = RouletteCounts::default();
    let mut anomalies = Vec::new();
    let mut seen = HashSet::new();
    let mut steps = 0usize;

    while !game.is_finished() && steps < max_steps {
        steps += 1;
        let mover = game.current_player();
        let Some(line) = choose_line(game.doc(), mover, &mut rng) else {
            push_anomaly(&mut anomalies, &mut seen, "no legal line in an active game".to_string());
            break;
        };
        match game.propose_line(line, steps as u64) {
            Ok(outcome) => {
                counts.banked_turns += outcome.golden_earned as usize;
                counts.forfeits += usize::from(outcome.forfeit);
            }
            Err(error) => {
                push_anomaly(&mut anomalies, &mut seen, format!("local move rejected: {error}"));
                break;
            }
        }
        for anomaly in check_invariants(game.doc()) {
            push_anomaly(&mut anomalies, &mut seen, anomaly);
        }
    }
    if !game.is_finished() {
        push_anomaly(
            &mut anomalies,
            &mut seen,
            format!("game not finished after {steps} steps"),
        );
    }
    Ok(result_line(
        scenario,
        game.doc(),
        steps,
        steps as u64,
        counts,
        game.relocations(),
        anomalies,
    ))
}

fn result_line(
    scenario: &Scenario,
    doc: &GameDoc,
    steps: usize,
    duration_ms: u64,
    roulette: RouletteCounts,
    special_relocations: u32,
    anomalies: Vec<String>,
) -> ScenarioResultLine {
    ScenarioResultLine {
        scenario: scenario.name.clone(),
        seed: scenario.seed,
        players: scenario.players,
        mode: if scenario.local { "local" } else { "networked" },
        finished: doc.status == GameStatus::Finished,
        steps,
        duration_ms,
        scores: doc.players.iter().map(|player| player.score).collect(),
        winners: winners(&doc.players),
        roulette,
        special_relocations,
        anomalies,
    }
}

fn bot_identity(index: usize) -> String {
    format!("bot_{}", index + 1)
}

fn normalize_seed(seed: u64) -> u32 {
    seed as u32
}

fn push_anomaly(anomalies: &mut Vec<String>, seen: &mut HashSet<String>, message: String) {
    if seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenarios: Vec<ScenarioResultLine>,
) -> RunSummary {
    let mut win_counts = BTreeMap::new();
    for scenario in &scenarios {
        for winner in &scenario.winners {
            *win_counts.entry(*winner).or_insert(0) += 1;
        }
    }
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        scenario_count: scenarios.len(),
        anomaly_count: scenarios.iter().map(|s| s.anomalies.len()).sum(),
        unfinished_count: scenarios.iter().filter(|s| !s.finished).count(),
        win_counts,
        scenarios,
    }
}

fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, summary_text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dots_boxes_rust_server::grid::box_lines;
    use dots_boxes_rust_server::types::BoxId;

    fn scenario(players: usize, seed: u32, local: bool) -> Scenario {
        Scenario {
            name: "test".to_string(),
            players,
            seed,
            local,
        }
    }

    fn active_game() -> GameDoc {
        let mut doc = lobby::new_game("ABCDEF", "u1", "Ann", 2, 0);
        doc.status = GameStatus::Active;
        doc
    }

    #[test]
    fn default_match_id_contains_seed_and_timestamp() {
        assert_eq!(default_match_id(42, 123456789), "sim-42-123456789");
    }

    #[test]
    fn choose_line_takes_a_free_box_first() {
        let mut doc = active_game();
        let [top, bottom, left, right] = box_lines(BoxId::new(2, 2));
        for line in [top, bottom, left] {
            doc.lines.insert(line, 0);
        }
        let mut rng = Rng::new(7);
        assert_eq!(choose_line(&doc, 0, &mut rng), Some(right));
    }

    #[test]
    fn choose_line_avoids_third_sides() {
        let mut doc = active_game();
        let [top, bottom, _, _] = box_lines(BoxId::new(0, 0));
        doc.lines.insert(top, 0);
        doc.lines.insert(bottom, 0);
        let mut rng = Rng::new(3);
        for _ in 0..20 {
            let line = choose_line(&doc, 0, &mut rng).expect("legal line");
            assert!(!boxes_for_line(line).contains(&BoxId::new(0, 0)));
        }
        assert_eq!(choose_line(&doc, 1, &mut rng), None);
    }

    #[test]
    fn resolve_scenarios_clamps_players_and_offsets_seeds() {
        let cli = Cli::parse_from(["simulate", "--games", "3", "--players", "9", "--seed", "10"]);
        let scenarios = resolve_scenarios(&cli);
        assert_eq!(scenarios.len(), 3);
        assert!(scenarios.iter().all(|s| s.players == MAX_PLAYERS && !s.local));
        assert_eq!(
            scenarios.iter().map(|s| s.seed).collect::<Vec<_>>(),
            vec![10, 11, 12]
        );
    }

    #[test]
    fn local_games_finish_cleanly() {
        for players in MIN_PLAYERS..=MAX_PLAYERS {
            let result = run_local(&scenario(players, 99, true), DEFAULT_MAX_STEPS)
                .expect("local run");
            assert!(result.finished);
            assert!(result.anomalies.is_empty(), "{:?}", result.anomalies);
            assert_eq!(result.scores.iter().sum::<u32>(), 25);
            assert!(!result.winners.is_empty());
        }
    }

    #[test]
    fn networked_game_keeps_the_board_consistent() {
        let result = run_networked(&scenario(3, 4242, false), DEFAULT_MAX_STEPS)
            .expect("networked run");
        assert!(
            result
                .anomalies
                .iter()
                .all(|anomaly| anomaly.starts_with("game not finished")),
            "{:?}",
            result.anomalies
        );
        assert_eq!(result.scores.len(), 3);
        if result.finished {
            assert_eq!(result.scores.iter().sum::<u32>(), 25);
        }
    }

    #[test]
    fn run_summary_counts_wins_and_anomalies() {
        let mut first = run_local(&scenario(2, 5, true), DEFAULT_MAX_STEPS).expect("run");
        first.anomalies = vec!["odd".to_string()];
        let second = run_local(&scenario(2, 6, true), DEFAULT_MAX_STEPS).expect("run");
        let wins = first.winners.len() + second.winners.len();
        let summary = build_run_summary("sim-1-1".to_string(), 1, 2, vec![first, second]);
        assert_eq!(summary.scenario_count, 2);
        assert_eq!(summary.anomaly_count, 1);
        assert_eq!(summary.win_counts.values().sum::<usize>(), wins);
    }

    #[test]
    fn write_summary_fails_when_parent_is_missing() {
        let target = std::env::temp_dir()
            .join(format!("dots-boxes-missing-{}", now_ms()))
            .join("summary.json");
        let summary = build_run_summary("sim-1-1".to_string(), 1, 2, Vec::new());
        assert!(write_summary(&target, &summary).is_err());
    }
}
