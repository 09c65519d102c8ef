//! Cost splitting: share arithmetic, prepaid payers and input validation.

use chrono::{TimeZone, Utc};
use court_ledger_core::{
    config::SplitPolicy,
    error::LedgerError,
    session::PlayerRef,
    splitter::{court_total, shares, shuttlecock_total, split, SplitInput},
};

fn player(id: &str) -> PlayerRef {
    PlayerRef {
        player_id: id.to_string(),
        player_name: id.to_uppercase(),
    }
}

fn input(participants: &[&str]) -> SplitInput {
    SplitInput {
        price_per_hour: 120_000,
        duration_minutes: 120,
        price_per_shuttlecock: 25_000,
        shuttlecock_quantity: 4,
        court_payer: None,
        shuttlecock_payer: None,
        participants: participants.iter().map(|id| player(id)).collect(),
    }
}

#[test]
fn expense_totals() {
    assert_eq!(court_total(139_000, 90).unwrap(), 208_500);
    assert_eq!(court_total(100_000, 45).unwrap(), 75_000);
    // Truncated to whole units.
    assert_eq!(court_total(100, 50).unwrap(), 83);
    assert_eq!(shuttlecock_total(25_000, 6).unwrap(), 150_000);
    assert!(court_total(i64::MAX / 2, 60).is_err());
    assert!(shuttlecock_total(i64::MAX, 2).is_err());
}

#[test]
fn exact_shares_always_sum_to_total() {
    for total in [0, 1, 99, 100, 101, 340_000, 1_000_003] {
        for n in 1..=13 {
            let s = shares(total, n, SplitPolicy::Exact);
            assert_eq!(s.len(), n);
            assert_eq!(s.iter().sum::<i64>(), total, "total {total}, n {n}");
            let spread = s.iter().max().unwrap() - s.iter().min().unwrap();
            assert!(spread <= 1, "shares differ by more than one unit: {s:?}");
        }
    }
}

#[test]
fn exact_remainder_goes_to_first_participants() {
    assert_eq!(shares(100, 3, SplitPolicy::Exact), vec![34, 33, 33]);
    assert_eq!(shares(11, 4, SplitPolicy::Exact), vec![3, 3, 3, 2]);
}

#[test]
fn per_share_rounding_is_half_even_and_may_drift() {
    assert_eq!(shares(100, 3, SplitPolicy::PerShareRounded), vec![33, 33, 33]);
    // 2.5 rounds down to the even neighbour, 3.5 rounds up.
    assert_eq!(shares(5, 2, SplitPolicy::PerShareRounded), vec![2, 2]);
    assert_eq!(shares(7, 2, SplitPolicy::PerShareRounded), vec![4, 4]);
    assert_eq!(shares(200, 3, SplitPolicy::PerShareRounded), vec![67, 67, 67]);

    for total in [1, 99, 101, 340_001] {
        for n in 1..=9 {
            let sum: i64 = shares(total, n, SplitPolicy::PerShareRounded).iter().sum();
            assert!((sum - total).abs() < n as i64, "total {total}, n {n}, sum {sum}");
        }
    }
}

#[test]
fn split_without_payers_leaves_everyone_owing() {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap();
    let out = split(&input(&["a", "b", "c", "d"]), SplitPolicy::Exact, now).unwrap();

    assert_eq!(out.total_court_price, 240_000);
    assert_eq!(out.total_shuttlecock_price, 100_000);
    assert_eq!(out.total_cost, 340_000);
    for p in &out.participants {
        assert_eq!(p.amount_due, 85_000);
        assert_eq!(p.amount_paid, 0);
        assert!(!p.is_paid);
        assert_eq!(p.paid_at, None);
        assert_eq!(p.owed(), 85_000);
    }
}

#[test]
fn payers_are_credited_and_become_receivable() {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap();
    let mut inp = input(&["a", "b", "c", "d"]);
    inp.court_payer = Some(player("a"));
    inp.shuttlecock_payer = Some(player("b"));
    let out = split(&inp, SplitPolicy::Exact, now).unwrap();

    let a = &out.participants[0];
    assert_eq!(a.amount_pre_paid, 240_000);
    assert_eq!(a.amount_paid, 85_000);
    assert_eq!(a.amount_to_receive, 155_000);
    assert!(a.is_paid);
    assert_eq!(a.paid_at, Some(now));
    assert_eq!(a.note, "paid court fee");
    assert_eq!(a.owed(), 0);

    let b = &out.participants[1];
    assert_eq!(b.amount_to_receive, 15_000);
    assert_eq!(b.note, "paid shuttlecocks");

    let received: i64 = out.participants.iter().map(|p| p.amount_to_receive).sum();
    let owed: i64 = out.participants.iter().map(|p| p.owed()).sum();
    assert_eq!(received, owed, "what debtors owe is what payers get back");
}

#[test]
fn one_player_fronting_both_costs() {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap();
    let mut inp = input(&["a", "b"]);
    inp.court_payer = Some(player("a"));
    inp.shuttlecock_payer = Some(player("a"));
    let out = split(&inp, SplitPolicy::Exact, now).unwrap();

    let a = &out.participants[0];
    assert_eq!(a.amount_pre_paid, 340_000);
    assert_eq!(a.amount_to_receive, 170_000);
    assert_eq!(a.note, "paid court and shuttlecocks");
    assert_eq!(out.participants[1].owed(), 170_000);
}

#[test]
fn prepaid_below_share_leaves_a_partial_debt() {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap();
    let mut inp = input(&["a", "b"]);
    inp.price_per_hour = 0;
    inp.price_per_shuttlecock = 10_000;
    inp.shuttlecock_quantity = 1;
    inp.participants = vec![player("a"), player("b"), player("c"), player("d")];
    inp.shuttlecock_payer = Some(player("d"));
    let out = split(&inp, SplitPolicy::Exact, now).unwrap();

    // 10_000 / 4 = 2_500 each; d fronted 10_000.
    let d = &out.participants[3];
    assert_eq!(d.amount_paid, 2_500);
    assert_eq!(d.amount_to_receive, 7_500);

    inp.shuttlecock_quantity = 0;
    inp.price_per_hour = 60_000;
    inp.duration_minutes = 60;
    inp.court_payer = Some(player("a"));
    inp.shuttlecock_payer = None;
    inp.participants = vec![player("a"), player("b")];
    let out = split(&inp, SplitPolicy::Exact, now).unwrap();
    assert_eq!(out.participants[0].amount_to_receive, 30_000);
}

#[test]
fn payer_outside_the_participant_list_is_not_credited() {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap();
    let mut inp = input(&["a", "b"]);
    inp.court_payer = Some(player("z"));
    let out = split(&inp, SplitPolicy::Exact, now).unwrap();

    assert!(out.participants.iter().all(|p| p.amount_pre_paid == 0));
    assert_eq!(out.participants.iter().map(|p| p.owed()).sum::<i64>(), 340_000);
}

#[test]
fn invalid_inputs_are_rejected() {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 20, 0, 0).unwrap();

    let empty = input(&[]);
    assert!(matches!(
        split(&empty, SplitPolicy::Exact, now),
        Err(LedgerError::Validation(_))
    ));

    let twice = input(&["a", "b", "a"]);
    assert!(matches!(
        split(&twice, SplitPolicy::Exact, now),
        Err(LedgerError::Validation(_))
    ));

    let mut negative = input(&["a"]);
    negative.shuttlecock_quantity = -1;
    assert!(matches!(
        split(&negative, SplitPolicy::Exact, now),
        Err(LedgerError::Validation(_))
    ));

    let mut huge_court = input(&["a", "b"]);
    huge_court.price_per_hour = 200_000_000_000_000_000;
    huge_court.duration_minutes = 60;
    assert!(matches!(
        split(&huge_court, SplitPolicy::Exact, now),
        Err(LedgerError::Validation(_))
    ));

    // Each expense fits but their sum does not.
    let mut huge_sum = input(&["a"]);
    huge_sum.price_per_hour = i64::MAX;
    huge_sum.duration_minutes = 1;
    huge_sum.price_per_shuttlecock = i64::MAX;
    huge_sum.shuttlecock_quantity = 1;
    assert!(matches!(
        split(&huge_sum, SplitPolicy::Exact, now),
        Err(LedgerError::Validation(_))
    ));
}
