//! Payment matching: one transfer notification in, allocations and exactly
//! one audit record out.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use court_ledger_core::{
    config::LedgerConfig,
    content::ContentRules,
    error::LedgerError,
    matcher::{payment_status, PaymentMatcher, TransferEvent},
    player::{NewPlayer, Player},
    ports::{SessionStore, TransactionStore},
    session::Session,
    settlement::{NewSession, PayerChoice, SessionService},
    store::LedgerStore,
    transaction::{RejectReason, TransactionStatus},
};

fn setup() -> (LedgerStore, LedgerConfig, ContentRules) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = LedgerStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    let config = LedgerConfig::default_test();
    let rules = ContentRules::new(&config.matching).expect("rules");
    (store, config, rules)
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap()
}

fn register(store: &LedgerStore, name: &str) -> Player {
    store
        .register_player(&NewPlayer::named(name), 'P', now())
        .expect("register player")
}

/// A completed session where each listed player owes `each`.
fn session_owing(
    store: &LedgerStore,
    config: &LedgerConfig,
    date: (i32, u32, u32),
    players: &[&Player],
    each: i64,
) -> Session {
    let new = NewSession {
        date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        start_time: None,
        end_time: None,
        court_name: "Court 1".into(),
        court_location: String::new(),
        price_per_hour: each * players.len() as i64,
        duration_minutes: 60,
        price_per_shuttlecock: 0,
        shuttlecock_quantity: 0,
        court_payer: PayerChoice::Nobody,
        shuttlecock_payer: PayerChoice::Nobody,
        participant_ids: players.iter().map(|p| p.player_id.clone()).collect(),
        status: court_ledger_core::session::SessionStatus::Completed,
        note: None,
    };
    SessionService::new(store, config)
        .create_session(&new, now())
        .expect("create session")
}

fn transfer(id: &str, content: &str, amount: i64) -> TransferEvent {
    TransferEvent {
        id: Some(id.to_string()),
        gateway: "Vietcombank".into(),
        transaction_date: "2025-02-01 08:59:00".into(),
        account_number: "0123456789".into(),
        content: content.into(),
        transfer_type: "in".into(),
        transfer_amount: amount,
        reference_code: format!("REF-{id}"),
    }
}

fn paid(store: &LedgerStore, session: &Session, name: &str) -> i64 {
    store
        .find_session(&session.session_id)
        .unwrap()
        .unwrap()
        .participant(name)
        .unwrap()
        .amount_paid
}

#[test]
fn transfer_pays_oldest_sessions_first() {
    let (store, config, rules) = setup();
    let minh = register(&store, "Minh");
    let jan_15 = session_owing(&store, &config, (2025, 1, 15), &[&minh], 30_000);
    let jan_01 = session_owing(&store, &config, (2025, 1, 1), &[&minh], 50_000);

    let matcher = PaymentMatcher::over(&store, &rules, &config);
    let out = matcher
        .reconcile(None, &transfer("1001", "Minh thanh toan cau long", 60_000), now())
        .unwrap();

    assert_eq!(out.status, TransactionStatus::Success);
    assert_eq!(out.player_name.as_deref(), Some("Minh"));
    assert_eq!(out.allocations.len(), 2);
    assert_eq!(out.allocations[0].session_id, jan_01.session_id);
    assert_eq!(out.allocations[0].amount_applied, 50_000);
    assert!(out.allocations[0].fully_paid);
    assert_eq!(out.allocations[1].session_id, jan_15.session_id);
    assert_eq!(out.allocations[1].amount_applied, 10_000);
    assert!(!out.allocations[1].fully_paid);
    assert_eq!(out.remaining_amount, 0);

    assert_eq!(paid(&store, &jan_01, "Minh"), 50_000);
    assert_eq!(paid(&store, &jan_15, "Minh"), 10_000);

    let recorded = store.find_by_event_id("1001").unwrap().unwrap();
    assert_eq!(recorded.status, TransactionStatus::Success);
    assert_eq!(recorded.allocations, out.allocations);
    assert_eq!(recorded.transfer_amount, 60_000);
    assert_eq!(recorded.total_applied() + recorded.remaining_amount, 60_000);

    let body = out.response();
    assert!(body.success);
    assert_eq!(body.message, "Payment processed for Minh");
    assert_eq!(body.sessions_updated, Some(2));
}

#[test]
fn overpayment_is_reported_as_remaining() {
    let (store, config, rules) = setup();
    let minh = register(&store, "Minh");
    let s = session_owing(&store, &config, (2025, 1, 1), &[&minh], 50_000);

    let out = PaymentMatcher::over(&store, &rules, &config)
        .reconcile(None, &transfer("1002", "Minh cau long", 80_000), now())
        .unwrap();

    assert_eq!(out.allocations.len(), 1);
    assert_eq!(out.remaining_amount, 30_000);
    assert_eq!(paid(&store, &s, "Minh"), 50_000);
}

#[test]
fn content_without_keyword_fails_without_touching_sessions() {
    let (store, config, rules) = setup();
    let minh = register(&store, "Minh");
    let s = session_owing(&store, &config, (2025, 1, 1), &[&minh], 50_000);
    let events_before = store.event_count().unwrap();

    let out = PaymentMatcher::over(&store, &rules, &config)
        .reconcile(None, &transfer("2001", "Random transfer", 50_000), now())
        .unwrap();

    assert_eq!(out.status, TransactionStatus::Failed);
    assert_eq!(out.reason, Some(RejectReason::MissingKeyword));
    assert!(out.allocations.is_empty());
    assert_eq!(out.remaining_amount, 50_000);
    assert_eq!(paid(&store, &s, "Minh"), 0);
    assert_eq!(store.event_count().unwrap(), events_before);

    let recorded = store.find_by_event_id("2001").unwrap().unwrap();
    assert_eq!(recorded.status, TransactionStatus::Failed);
    assert_eq!(recorded.reason, Some(RejectReason::MissingKeyword));

    let body = out.response();
    assert!(!body.success);
    assert_eq!(body.message, "Invalid payment content - missing keywords");
}

#[test]
fn outgoing_transfer_is_rejected() {
    let (store, config, rules) = setup();
    register(&store, "Minh");
    let mut event = transfer("2002", "Minh cau long", 50_000);
    event.transfer_type = "out".into();

    let out = PaymentMatcher::over(&store, &rules, &config)
        .reconcile(None, &event, now())
        .unwrap();
    assert_eq!(out.status, TransactionStatus::Failed);
    assert_eq!(out.reason, Some(RejectReason::NotIncoming));
}

#[test]
fn keyword_at_the_start_names_nobody() {
    let (store, config, rules) = setup();
    let out = PaymentMatcher::over(&store, &rules, &config)
        .reconcile(None, &transfer("2003", "cau long", 50_000), now())
        .unwrap();
    assert_eq!(out.status, TransactionStatus::Failed);
    assert_eq!(out.reason, Some(RejectReason::UnknownPayer));
    assert_eq!(out.response().message, "Could not extract player from content");
}

#[test]
fn short_code_wins_over_written_name() {
    let (store, config, rules) = setup();
    let minh = register(&store, "Minh");
    let linh = register(&store, "Linh");
    assert_eq!(linh.short_code.as_ref().map(|c| c.to_string()).as_deref(), Some("P002"));
    let s = session_owing(&store, &config, (2025, 1, 1), &[&minh, &linh], 40_000);

    let out = PaymentMatcher::over(&store, &rules, &config)
        .reconcile(None, &transfer("3001", "Minh thanh toan cau long P002", 40_000), now())
        .unwrap();

    assert_eq!(out.player_name.as_deref(), Some("Linh"));
    assert_eq!(paid(&store, &s, "Linh"), 40_000);
    assert_eq!(paid(&store, &s, "Minh"), 0);
}

#[test]
fn unassigned_short_code_falls_back_to_name() {
    let (store, config, rules) = setup();
    let minh = register(&store, "Minh");
    let s = session_owing(&store, &config, (2025, 1, 1), &[&minh], 40_000);

    let out = PaymentMatcher::over(&store, &rules, &config)
        .reconcile(None, &transfer("3002", "minh cau long P777", 40_000), now())
        .unwrap();

    // Directory spelling is used, not the lowercase text.
    assert_eq!(out.player_name.as_deref(), Some("Minh"));
    assert_eq!(paid(&store, &s, "Minh"), 40_000);
}

#[test]
fn payer_without_debt_is_still_a_success() {
    let (store, config, rules) = setup();
    register(&store, "Minh");

    let out = PaymentMatcher::over(&store, &rules, &config)
        .reconcile(None, &transfer("3003", "Minh cau long", 25_000), now())
        .unwrap();

    assert_eq!(out.status, TransactionStatus::Success);
    assert!(out.allocations.is_empty());
    assert_eq!(out.remaining_amount, 25_000);
    let body = out.response();
    assert!(body.success);
    assert_eq!(body.message, "No unpaid sessions found for Minh");
}

#[test]
fn redelivery_is_a_duplicate_and_changes_nothing() {
    let (store, config, rules) = setup();
    let minh = register(&store, "Minh");
    let s = session_owing(&store, &config, (2025, 1, 1), &[&minh], 50_000);
    let matcher = PaymentMatcher::over(&store, &rules, &config);
    let event = transfer("4001", "Minh cau long", 20_000);

    let first = matcher.reconcile(None, &event, now()).unwrap();
    let events_after_first = store.event_count().unwrap();
    let second = matcher
        .reconcile(None, &event, now() + Duration::minutes(1))
        .unwrap();

    assert!(second.is_duplicate());
    assert_eq!(second.transaction_id, first.transaction_id);
    assert!(second.allocations.is_empty());
    assert_eq!(paid(&store, &s, "Minh"), 20_000);
    assert_eq!(store.transaction_count().unwrap(), 1);
    assert_eq!(store.event_count().unwrap(), events_after_first);

    let body = second.response();
    assert!(!body.success);
    assert_eq!(body.message, "Duplicate transaction");
}

#[test]
fn wrong_or_missing_key_is_unauthorized() {
    let (store, config, rules) = setup();
    let matcher =
        PaymentMatcher::over(&store, &rules, &config).with_api_key(Some("secret".into()));
    let event = transfer("5001", "Minh cau long", 1_000);

    assert!(matches!(
        matcher.reconcile(Some("wrong"), &event, now()),
        Err(LedgerError::Unauthorized)
    ));
    assert!(matches!(
        matcher.reconcile(None, &event, now()),
        Err(LedgerError::Unauthorized)
    ));
    assert_eq!(store.transaction_count().unwrap(), 0);

    assert!(matcher.reconcile(Some("secret"), &event, now()).is_ok());
}

#[test]
fn empty_key_accepts_everyone() {
    let (store, config, rules) = setup();
    let matcher = PaymentMatcher::over(&store, &rules, &config).with_api_key(Some("  ".into()));
    assert!(matcher.authenticate(None).is_ok());
}

#[test]
fn malformed_events_are_errors_not_outcomes() {
    let (store, config, rules) = setup();
    let matcher = PaymentMatcher::over(&store, &rules, &config);

    let mut no_id = transfer("x", "Minh cau long", 1_000);
    no_id.id = None;
    assert!(matches!(
        matcher.reconcile(None, &no_id, now()),
        Err(LedgerError::MalformedRequest(_))
    ));

    let negative = transfer("6001", "Minh cau long", -5);
    assert!(matches!(
        matcher.reconcile(None, &negative, now()),
        Err(LedgerError::MalformedRequest(_))
    ));
    assert_eq!(store.transaction_count().unwrap(), 0);

    assert!(matches!(
        TransferEvent::from_json(b"  "),
        Err(LedgerError::MalformedRequest(_))
    ));
    assert!(matches!(
        TransferEvent::from_json(b"not json"),
        Err(LedgerError::MalformedRequest(_))
    ));
}

#[test]
fn gateway_json_is_decoded() {
    let body = br#"{
        "id": 92704,
        "gateway": "Vietcombank",
        "transactionDate": "2025-01-28 10:15:00",
        "accountNumber": "0123499999",
        "content": "Minh thanh toan cau long",
        "transferType": "IN",
        "transferAmount": 60000,
        "referenceCode": "FT25028123"
    }"#;
    let event = TransferEvent::from_json(body).unwrap();
    assert_eq!(event.id.as_deref(), Some("92704"));
    assert!(event.is_incoming());
    assert_eq!(event.transfer_amount, 60_000);
    assert_eq!(
        event.transfer_time(now().naive_utc()),
        NaiveDate::from_ymd_opt(2025, 1, 28).unwrap().and_hms_opt(10, 15, 0).unwrap()
    );

    let text_id = TransferEvent::from_json(br#"{"id": " abc-1 "}"#).unwrap();
    assert_eq!(text_id.id.as_deref(), Some("abc-1"));
    let no_id = TransferEvent::from_json(br#"{"content": "x"}"#).unwrap();
    assert_eq!(no_id.id, None);
}

#[test]
fn unparseable_transfer_date_falls_back_to_receipt_time() {
    let mut event = transfer("7001", "Minh cau long", 1_000);
    event.transaction_date = "yesterday".into();
    assert_eq!(event.transfer_time(now().naive_utc()), now().naive_utc());
}

#[test]
fn payment_status_sees_recent_success_only() {
    let (store, config, rules) = setup();
    let minh = register(&store, "Minh");
    session_owing(&store, &config, (2025, 1, 1), &[&minh], 50_000);
    PaymentMatcher::over(&store, &rules, &config)
        .reconcile(None, &transfer("8001", "Minh cau long", 50_000), now())
        .unwrap();

    let soon = payment_status(&store, "minh", 5, now() + Duration::minutes(2)).unwrap();
    assert!(soon.has_payment);
    assert_eq!(
        soon.transaction.as_ref().map(|t| t.event_id.as_str()),
        Some("8001")
    );

    let later = payment_status(&store, "Minh", 5, now() + Duration::minutes(10)).unwrap();
    assert!(!later.has_payment);
    assert!(later.transaction.is_none());

    let other = payment_status(&store, "Linh", 5, now()).unwrap();
    assert!(!other.has_payment);
}
