//! Demo data for local runs: a fixed roster, a few weeks of sessions, and
//! some of the debts already paid. Deterministic for a given seed.

use crate::{
    config::LedgerConfig,
    error::LedgerResult,
    player::{NewPlayer, Player},
    ports::PlayerDirectory,
    rng::{DemoRng, DemoSlot},
    settlement::{NewSession, PayerChoice, SessionService},
    store::LedgerStore,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

const ROSTER: &[&str] = &[
    "Tuấn", "Mạnh", "Ly", "Nguyên", "Tiên", "Phát", "Tiến", "Trúc", "Giang", "Quốc", "Khuê", "Linh",
];

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SeedReport {
    pub players: usize,
    pub sessions: usize,
    pub payments_marked: usize,
}

/// Populate an empty ledger. Players already present are reused by name.
pub fn seed_demo(
    store: &LedgerStore,
    config: &LedgerConfig,
    seed: u64,
    weeks: u32,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> LedgerResult<SeedReport> {
    let mut report = SeedReport::default();
    let players = seed_players(store, config, seed, now, &mut report)?;

    let service = SessionService::new(store, config);
    let mut sessions_rng = DemoRng::new(seed, DemoSlot::Sessions);
    let mut payments_rng = DemoRng::new(seed, DemoSlot::Payments);

    // Two sessions a week, oldest first.
    for week in (0..weeks).rev() {
        for day_offset in [4i64, 1] {
            let date = today - Duration::days(i64::from(week) * 7 + day_offset);
            let count = sessions_rng.between(6, players.len().min(10) as i64) as usize;
            let picked = sessions_rng.sample_indices(players.len(), count);
            let new = NewSession {
                date,
                start_time: Some("19:00".into()),
                end_time: Some("21:00".into()),
                court_name: "Sân Cầu Lông".into(),
                court_location: "Quận 7".into(),
                price_per_hour: 139_000,
                duration_minutes: *sessions_rng.pick(&[90i64, 120, 120, 150]).unwrap_or(&120),
                price_per_shuttlecock: 25_000,
                shuttlecock_quantity: sessions_rng.between(3, 6),
                court_payer: PayerChoice::Default,
                shuttlecock_payer: PayerChoice::Default,
                participant_ids: picked.iter().map(|&i| players[i].player_id.clone()).collect(),
                status: crate::session::SessionStatus::Completed,
                note: None,
            };
            let session = service.create_session(&new, now)?;
            report.sessions += 1;

            // Older sessions are more likely to be settled.
            let settle_odds = if week >= 2 { 0.8 } else { 0.3 };
            for p in session.participants.iter().filter(|p| p.owed() > 0) {
                if payments_rng.chance(settle_odds) {
                    service.mark_paid(&session.session_id, &p.player_name, now)?;
                    report.payments_marked += 1;
                }
            }
        }
    }

    log::info!(
        "demo seed {seed}: {} players, {} sessions, {} payments",
        report.players,
        report.sessions,
        report.payments_marked
    );
    Ok(report)
}

fn seed_players(
    store: &LedgerStore,
    config: &LedgerConfig,
    seed: u64,
    now: DateTime<Utc>,
    report: &mut SeedReport,
) -> LedgerResult<Vec<Player>> {
    let mut rng = DemoRng::new(seed, DemoSlot::Players);
    let mut players = Vec::with_capacity(ROSTER.len());
    for (i, name) in ROSTER.iter().enumerate() {
        if let Some(existing) = store.find_by_name_case_insensitive(name)? {
            players.push(existing);
            continue;
        }
        let phone = rng
            .chance(0.5)
            .then(|| format!("09{:08}", rng.below(100_000_000)));
        let new = NewPlayer {
            phone,
            is_default_court_payer: i == 0,
            is_default_shuttlecock_payer: i == 1,
            ..NewPlayer::named(*name)
        };
        players.push(store.register_player(&new, config.matching.short_code_prefix, now)?);
        report.players += 1;
    }
    Ok(players)
}
