//! Several connections writing the same sessions at once. Uses a temporary
//! database file so every thread gets its own connection.

use chrono::{NaiveDate, Utc};
use court_ledger_core::{
    config::LedgerConfig,
    content::ContentRules,
    matcher::{PaymentMatcher, TransferEvent},
    player::{NewPlayer, Player},
    ports::{PaymentSource, SessionStore, TransactionStore},
    session::{Session, SessionStatus},
    settlement::{NewSession, PayerChoice, SessionService},
    store::LedgerStore,
    transaction::TransactionStatus,
};
use std::{
    path::PathBuf,
    sync::{Arc, Barrier},
    thread,
};

struct TempDb {
    path: PathBuf,
}

impl TempDb {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let path = std::env::temp_dir().join(format!("court-ledger-{}.db", uuid::Uuid::new_v4()));
        let db = Self { path };
        db.open().migrate().expect("migration");
        db
    }

    fn uri(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    fn open(&self) -> LedgerStore {
        LedgerStore::open(&self.uri())
            .expect("open temp db")
            .with_version_retries(100)
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.uri()));
        }
    }
}

fn register(store: &LedgerStore, names: &[&str]) -> Vec<Player> {
    names
        .iter()
        .map(|n| store.register_player(&NewPlayer::named(*n), 'P', Utc::now()).unwrap())
        .collect()
}

fn session(store: &LedgerStore, day: u32, players: &[Player], each: i64) -> Session {
    let config = LedgerConfig::default_test();
    let new = NewSession {
        date: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
        start_time: None,
        end_time: None,
        court_name: String::new(),
        court_location: String::new(),
        price_per_hour: each * players.len() as i64,
        duration_minutes: 60,
        price_per_shuttlecock: 0,
        shuttlecock_quantity: 0,
        court_payer: PayerChoice::Nobody,
        shuttlecock_payer: PayerChoice::Nobody,
        participant_ids: players.iter().map(|p| p.player_id.clone()).collect(),
        status: SessionStatus::Completed,
        note: None,
    };
    SessionService::new(store, &config).create_session(&new, Utc::now()).unwrap()
}

#[test]
fn parallel_payments_on_one_session_are_all_kept() {
    let db = TempDb::new();
    let store = db.open();
    let names = ["A", "B", "C", "D", "E", "F"];
    let players = register(&store, &names);
    let s = session(&store, 1, &players, 10_000);

    let barrier = Arc::new(Barrier::new(names.len()));
    let handles: Vec<_> = names
        .iter()
        .map(|name| {
            let store = db.open();
            let barrier = Arc::clone(&barrier);
            let session_id = s.session_id.clone();
            let name = name.to_string();
            thread::spawn(move || {
                barrier.wait();
                store
                    .apply_payment(&session_id, &name, 10_000, &PaymentSource::Manual)
                    .expect("apply payment")
            })
        })
        .collect();
    for h in handles {
        assert!(h.join().expect("thread").is_some());
    }

    let after = store.find_session(&s.session_id).unwrap().unwrap();
    assert!(after.participants.iter().all(|p| p.is_paid && p.amount_paid == 10_000));
    assert_eq!(after.version, names.len() as i64);
    let payment_events = store
        .events_for_subject(&s.session_id)
        .unwrap()
        .iter()
        .filter(|e| e.event_type == "payment_changed")
        .count();
    assert_eq!(payment_events, names.len());
}

#[test]
fn concurrent_redeliveries_apply_once() {
    let db = TempDb::new();
    let store = db.open();
    let players = register(&store, &["Minh"]);
    let s = session(&store, 1, &players, 100_000);

    const DELIVERIES: usize = 4;
    let barrier = Arc::new(Barrier::new(DELIVERIES));
    let handles: Vec<_> = (0..DELIVERIES)
        .map(|_| {
            let store = db.open();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let config = LedgerConfig::default_test();
                let rules = ContentRules::new(&config.matching).unwrap();
                let event = TransferEvent {
                    id: Some("same-event".into()),
                    content: "Minh thanh toan cau long".into(),
                    transfer_type: "in".into(),
                    transfer_amount: 40_000,
                    ..TransferEvent::default()
                };
                barrier.wait();
                PaymentMatcher::over(&store, &rules, &config)
                    .reconcile(None, &event, Utc::now())
                    .expect("reconcile")
                    .status
            })
        })
        .collect();
    let statuses: Vec<TransactionStatus> =
        handles.into_iter().map(|h| h.join().expect("thread")).collect();

    let successes = statuses.iter().filter(|s| **s == TransactionStatus::Success).count();
    let duplicates = statuses.iter().filter(|s| **s == TransactionStatus::Duplicate).count();
    assert_eq!(successes, 1, "statuses: {statuses:?}");
    assert_eq!(duplicates, DELIVERIES - 1);
    assert_eq!(store.transaction_count().unwrap(), 1);

    let after = store.find_session(&s.session_id).unwrap().unwrap();
    assert_eq!(after.participant("Minh").unwrap().amount_paid, 40_000);
    assert_eq!(store.allocations_for_event("same-event").unwrap().len(), 1);
}

#[test]
fn webhook_and_operator_edits_do_not_lose_updates() {
    let db = TempDb::new();
    let store = db.open();
    let players = register(&store, &["Minh", "Linh"]);
    let sessions: Vec<Session> = (1..=5).map(|d| session(&store, d, &players, 50_000)).collect();

    let webhook_store = db.open();
    let webhook = thread::spawn(move || {
        let config = LedgerConfig::default_test();
        let rules = ContentRules::new(&config.matching).unwrap();
        let matcher = PaymentMatcher::over(&webhook_store, &rules, &config);
        for i in 0..10 {
            let event = TransferEvent {
                id: Some(format!("evt-{i}")),
                content: "Minh cau long".into(),
                transfer_type: "in".into(),
                transfer_amount: 20_000,
                ..TransferEvent::default()
            };
            matcher.reconcile(None, &event, Utc::now()).expect("reconcile");
        }
    });

    let operator_store = db.open();
    let ids: Vec<String> = sessions.iter().map(|s| s.session_id.clone()).collect();
    let operator = thread::spawn(move || {
        for round in 1..=4 {
            for id in &ids {
                operator_store
                    .update_participant_payment(id, "Linh", round * 10_000, &PaymentSource::Manual)
                    .expect("manual payment");
            }
        }
    });

    webhook.join().expect("webhook thread");
    operator.join().expect("operator thread");

    let mut minh_paid = 0;
    for s in &sessions {
        let after = store.find_session(&s.session_id).unwrap().unwrap();
        minh_paid += after.participant("Minh").unwrap().amount_paid;
        assert_eq!(after.participant("Linh").unwrap().amount_paid, 40_000);
    }
    // Ten transfers of 20_000 against 250_000 owed.
    assert_eq!(minh_paid, 200_000);
    let applied: i64 = (0..10)
        .map(|i| {
            store
                .find_by_event_id(&format!("evt-{i}"))
                .unwrap()
                .unwrap()
                .total_applied()
        })
        .sum();
    assert_eq!(applied, 200_000);
}
