//! Cost splitter: turns a session's expenses into participant obligations.
//!
//! Pure: no storage, no clock. The caller passes the creation time.
//!
//! Share rules:
//!   - SplitPolicy::Exact: base = total / n, the first (total % n) participants
//!     in list order pay one extra unit. Shares sum to the total.
//!   - SplitPolicy::PerShareRounded: every share = round_half_even(total / n).
//!     The sum may differ from the total by up to n - 1 units.
//!
//! A designated payer's fronted amount counts against their own share first;
//! anything above it becomes an amount to receive.

use crate::{
    config::SplitPolicy,
    error::{LedgerError, LedgerResult},
    session::{ParticipantObligation, PlayerRef},
    types::Money,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct SplitInput {
    pub price_per_hour: Money,
    pub duration_minutes: i64,
    pub price_per_shuttlecock: Money,
    pub shuttlecock_quantity: i64,
    pub court_payer: Option<PlayerRef>,
    pub shuttlecock_payer: Option<PlayerRef>,
    /// Finalized participant list, in display order.
    pub participants: Vec<PlayerRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub total_court_price: Money,
    pub total_shuttlecock_price: Money,
    pub total_cost: Money,
    pub participants: Vec<ParticipantObligation>,
}

fn too_large(what: &str) -> LedgerError {
    LedgerError::Validation(format!("{what} is too large"))
}

/// Court cost for a booking: hourly rate over a duration in minutes,
/// truncated to whole units.
pub fn court_total(price_per_hour: Money, duration_minutes: i64) -> LedgerResult<Money> {
    price_per_hour
        .checked_mul(duration_minutes)
        .map(|m| m / 60)
        .ok_or_else(|| too_large("court price"))
}

pub fn shuttlecock_total(price_per_shuttlecock: Money, quantity: i64) -> LedgerResult<Money> {
    price_per_shuttlecock
        .checked_mul(quantity)
        .ok_or_else(|| too_large("shuttlecock price"))
}

/// Per-participant shares of `total`, in participant order.
pub fn shares(total: Money, n: usize, policy: SplitPolicy) -> Vec<Money> {
    if n == 0 {
        return Vec::new();
    }
    let n_i = n as Money;
    let base = total / n_i;
    let remainder = total % n_i;
    match policy {
        SplitPolicy::Exact => (0..n)
            .map(|i| if (i as Money) < remainder { base + 1 } else { base })
            .collect(),
        SplitPolicy::PerShareRounded => {
            let rounded = match (2 * remainder).cmp(&n_i) {
                std::cmp::Ordering::Greater => base + 1,
                std::cmp::Ordering::Less => base,
                std::cmp::Ordering::Equal => base + (base & 1),
            };
            vec![rounded; n]
        }
    }
}

fn validate(input: &SplitInput) -> LedgerResult<()> {
    if input.participants.is_empty() {
        return Err(LedgerError::Validation(
            "a session needs at least one participant".into(),
        ));
    }
    if input.price_per_hour < 0
        || input.duration_minutes < 0
        || input.price_per_shuttlecock < 0
        || input.shuttlecock_quantity < 0
    {
        return Err(LedgerError::Validation(
            "prices, durations and quantities must not be negative".into(),
        ));
    }
    let mut seen = HashSet::new();
    for p in &input.participants {
        if !seen.insert(p.player_id.as_str()) {
            return Err(LedgerError::Validation(format!(
                "player '{}' is listed twice",
                p.player_name
            )));
        }
    }
    Ok(())
}

fn is_payer(payer: &Option<PlayerRef>, player_id: &str) -> bool {
    payer.as_ref().is_some_and(|p| p.player_id == player_id)
}

/// Split a session's costs across its participants.
pub fn split(
    input: &SplitInput,
    policy: SplitPolicy,
    now: DateTime<Utc>,
) -> LedgerResult<SplitOutcome> {
    validate(input)?;

    let total_court_price = court_total(input.price_per_hour, input.duration_minutes)?;
    let total_shuttlecock_price =
        shuttlecock_total(input.price_per_shuttlecock, input.shuttlecock_quantity)?;
    let total_cost = total_court_price
        .checked_add(total_shuttlecock_price)
        .ok_or_else(|| too_large("total cost"))?;

    for (label, payer) in [
        ("court", &input.court_payer),
        ("shuttlecock", &input.shuttlecock_payer),
    ] {
        if let Some(p) = payer {
            if !input.participants.iter().any(|x| x.player_id == p.player_id) {
                log::warn!(
                    "{label} payer {} is not a participant; their outlay is not credited",
                    p.player_name
                );
            }
        }
    }

    let share_list = shares(total_cost, input.participants.len(), policy);

    let participants = input
        .participants
        .iter()
        .zip(share_list)
        .map(|(player, share)| {
            let paid_court = is_payer(&input.court_payer, &player.player_id);
            let paid_shuttles = is_payer(&input.shuttlecock_payer, &player.player_id);

            let mut pre_paid = 0;
            if paid_court {
                pre_paid += total_court_price;
            }
            if paid_shuttles {
                pre_paid += total_shuttlecock_price;
            }

            let is_paid = pre_paid >= share;
            let note = match (paid_court, paid_shuttles) {
                (true, true) => "paid court and shuttlecocks",
                (true, false) => "paid court fee",
                (false, true) => "paid shuttlecocks",
                (false, false) => "",
            };

            ParticipantObligation {
                player_id: player.player_id.clone(),
                player_name: player.player_name.clone(),
                amount_due: share,
                amount_pre_paid: pre_paid,
                amount_paid: pre_paid.min(share),
                amount_to_receive: (pre_paid - share).max(0),
                is_paid,
                paid_at: is_paid.then_some(now),
                note: note.to_string(),
                amount_returned: 0,
                returned_at: None,
            }
        })
        .collect();

    Ok(SplitOutcome {
        total_court_price,
        total_shuttlecock_price,
        total_cost,
        participants,
    })
}
