//! Debt ledger: read-only aggregation of obligation records into per-player
//! debt and receivable views.
//!
//! Design:
//!   - Only sessions with status `completed` contribute to debts and receivables.
//!   - A participant with amount_to_receive > 0 is a creditor and never counts
//!     as a debtor in the same session.
//!   - Player names are grouped case-insensitively; the first spelling seen
//!     (newest session first) is the one reported.
//!   - Without a date range the ledger scans the `recent_session_cap` newest
//!     sessions. When that window is full the view is marked `truncated` and a
//!     warning is logged, since older sessions were not looked at.
//!
//! RULE: No writes. Queries accept read-skew against in-flight payments.

use crate::{
    error::LedgerResult,
    ports::SessionStore,
    session::{ParticipantObligation, Session},
    types::{DateRange, EntityId, Money},
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// One player's totals over the scanned sessions.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlayerDebt {
    pub player_name: String,
    pub total_due: Money,
    pub total_paid: Money,
    pub total_to_receive: Money,
    pub total_owed: Money,
    pub session_count: usize,
    pub truncated: bool,
}

/// A player with a positive debt or receivable total.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerEntry {
    pub player_name: String,
    pub amount: Money,
    pub session_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerView<T> {
    pub entries: Vec<T>,
    pub truncated: bool,
}

impl<T> LedgerView<T> {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A session that contributes to a player's debt or receivable.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionLine {
    pub session_id: EntityId,
    pub date: NaiveDate,
    pub amount_due: Money,
    pub amount_paid: Money,
    pub amount_pre_paid: Money,
    pub amount_to_receive: Money,
    pub owed: Money,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlayerDetails {
    pub player_name: String,
    pub total: Money,
    /// Newest first.
    pub sessions: Vec<SessionLine>,
}

/// A session the payer still owes on, as seen by the allocator.
#[derive(Debug, Clone, PartialEq)]
pub struct OutstandingSession {
    pub session_id: EntityId,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// Name as snapshotted on the obligation record.
    pub participant_name: String,
    pub owed: Money,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    pub sessions_count: usize,
    pub total_cost: Money,
    pub total_court: Money,
    pub total_shuttlecock: Money,
    pub total_owed: Money,
    pub total_to_receive: Money,
    pub debts: Vec<LedgerEntry>,
    pub to_receive: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthDebt {
    pub year: i32,
    pub month: u32,
    pub total_owed: Money,
    pub people_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerTotal {
    pub amount: Money,
    pub people_count: usize,
    pub truncated: bool,
}

/// Which side of the ledger a detail view aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Debt,
    Receivable,
}

impl Side {
    /// The amount this record contributes to the side, or zero.
    fn amount(self, p: &ParticipantObligation) -> Money {
        match self {
            Side::Debt => p.owed(),
            Side::Receivable => p.amount_to_receive.max(0),
        }
    }
}

/// Groups by lowercased name, remembering the first spelling seen.
#[derive(Default)]
struct Tally<T> {
    groups: BTreeMap<String, (String, T)>,
}

impl<T: Default> Tally<T> {
    fn entry(&mut self, name: &str) -> &mut T {
        &mut self
            .groups
            .entry(name.to_lowercase())
            .or_insert_with(|| (name.to_string(), T::default()))
            .1
    }

    fn into_named(self) -> impl Iterator<Item = (String, T)> {
        self.groups.into_values()
    }
}

pub struct DebtLedger<'a> {
    sessions: &'a dyn SessionStore,
    recent_cap: usize,
}

impl<'a> DebtLedger<'a> {
    pub fn new(sessions: &'a dyn SessionStore, recent_cap: usize) -> Self {
        Self {
            sessions,
            recent_cap: recent_cap.max(1),
        }
    }

    // ── Session window ─────────────────────────────────────────

    /// Completed sessions in `range`, or in the recent window when `None`.
    /// The flag reports whether the recent window was full.
    fn completed(&self, range: Option<DateRange>) -> LedgerResult<(Vec<Session>, bool)> {
        let (sessions, truncated) = self.window(range)?;
        Ok((
            sessions.into_iter().filter(Session::is_completed).collect(),
            truncated,
        ))
    }

    fn window(&self, range: Option<DateRange>) -> LedgerResult<(Vec<Session>, bool)> {
        match range {
            Some(range) => Ok((self.sessions.find_by_date_range(range)?, false)),
            None => {
                let sessions = self.sessions.find_recent(self.recent_cap)?;
                let truncated = sessions.len() >= self.recent_cap;
                if truncated {
                    log::warn!(
                        "ledger scan hit the {}-session window; older sessions are not included",
                        self.recent_cap
                    );
                }
                Ok((sessions, truncated))
            }
        }
    }

    // ── Player views ───────────────────────────────────────────

    /// Totals for one player, matched case-insensitively on the snapshot name.
    /// `None` when the player appears in no completed session.
    pub fn player_debt(&self, name: &str, range: Option<DateRange>) -> LedgerResult<Option<PlayerDebt>> {
        let (sessions, truncated) = self.completed(range)?;
        let wanted = name.trim();
        let mut found: Option<PlayerDebt> = None;

        for session in &sessions {
            let Some(p) = session.participant(wanted) else {
                continue;
            };
            let debt = found.get_or_insert_with(|| PlayerDebt {
                player_name: p.player_name.clone(),
                total_due: 0,
                total_paid: 0,
                total_to_receive: 0,
                total_owed: 0,
                session_count: 0,
                truncated,
            });
            debt.total_due += p.amount_due;
            debt.total_paid += p.amount_paid;
            debt.total_to_receive += p.amount_to_receive;
            debt.session_count += 1;
        }

        Ok(found.map(|mut d| {
            d.total_owed = (d.total_due - d.total_paid - d.total_to_receive).max(0);
            d
        }))
    }

    /// Players who owe money, largest debt first.
    pub fn all_debts(&self, range: Option<DateRange>) -> LedgerResult<LedgerView<LedgerEntry>> {
        self.totals(Side::Debt, range)
    }

    /// Players who are owed money back, largest amount first.
    pub fn all_to_receive(&self, range: Option<DateRange>) -> LedgerResult<LedgerView<LedgerEntry>> {
        self.totals(Side::Receivable, range)
    }

    fn totals(&self, side: Side, range: Option<DateRange>) -> LedgerResult<LedgerView<LedgerEntry>> {
        let (sessions, truncated) = self.completed(range)?;
        Ok(LedgerView {
            entries: Self::entries(side, &sessions),
            truncated,
        })
    }

    fn entries(side: Side, sessions: &[Session]) -> Vec<LedgerEntry> {
        let mut tally: Tally<(Money, usize)> = Tally::default();
        for session in sessions {
            for p in &session.participants {
                let amount = side.amount(p);
                if amount > 0 {
                    let (total, count) = tally.entry(&p.player_name);
                    *total += amount;
                    *count += 1;
                }
            }
        }

        let mut entries: Vec<LedgerEntry> = tally
            .into_named()
            .filter(|(_, (amount, _))| *amount > 0)
            .map(|(player_name, (amount, session_count))| LedgerEntry {
                player_name,
                amount,
                session_count,
            })
            .collect();
        entries.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.player_name.cmp(&b.player_name)));
        entries
    }

    // ── Drill-down ─────────────────────────────────────────────

    /// Debtors with the sessions behind each debt. `name` narrows to one player.
    pub fn debts_with_details(&self, name: Option<&str>) -> LedgerResult<LedgerView<PlayerDetails>> {
        let (sessions, truncated) = self.completed(None)?;
        Ok(LedgerView {
            entries: Self::details(Side::Debt, &sessions, name),
            truncated,
        })
    }

    pub fn receivables_with_details(&self, name: Option<&str>) -> LedgerResult<LedgerView<PlayerDetails>> {
        let (sessions, truncated) = self.completed(None)?;
        Ok(LedgerView {
            entries: Self::details(Side::Receivable, &sessions, name),
            truncated,
        })
    }

    /// Debt details limited to one calendar month.
    pub fn debts_with_details_for_month(&self, year: i32, month: u32) -> LedgerResult<Vec<PlayerDetails>> {
        let Some(range) = DateRange::month(year, month) else {
            return Ok(Vec::new());
        };
        let (sessions, _) = self.completed(Some(range))?;
        Ok(Self::details(Side::Debt, &sessions, None))
    }

    pub fn receivables_with_details_for_month(
        &self,
        year: i32,
        month: u32,
    ) -> LedgerResult<Vec<PlayerDetails>> {
        let Some(range) = DateRange::month(year, month) else {
            return Ok(Vec::new());
        };
        let (sessions, _) = self.completed(Some(range))?;
        Ok(Self::details(Side::Receivable, &sessions, None))
    }

    fn details(side: Side, sessions: &[Session], name: Option<&str>) -> Vec<PlayerDetails> {
        let wanted = name.map(|n| n.trim().to_lowercase());
        let mut tally: Tally<Vec<SessionLine>> = Tally::default();

        for session in sessions {
            for p in &session.participants {
                if wanted.as_ref().is_some_and(|w| p.player_name.to_lowercase() != *w) {
                    continue;
                }
                let amount = side.amount(p);
                if amount <= 0 {
                    continue;
                }
                tally.entry(&p.player_name).push(SessionLine {
                    session_id: session.session_id.clone(),
                    date: session.date,
                    amount_due: p.amount_due,
                    amount_paid: p.amount_paid,
                    amount_pre_paid: p.amount_pre_paid,
                    amount_to_receive: p.amount_to_receive,
                    owed: p.owed(),
                    note: p.note.clone(),
                });
            }
        }

        let mut details: Vec<PlayerDetails> = tally
            .into_named()
            .map(|(player_name, mut lines)| {
                lines.sort_by(|a, b| b.date.cmp(&a.date));
                let total = lines
                    .iter()
                    .map(|l| match side {
                        Side::Debt => l.owed,
                        Side::Receivable => l.amount_to_receive,
                    })
                    .sum();
                PlayerDetails {
                    player_name,
                    total,
                    sessions: lines,
                }
            })
            .collect();
        details.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.player_name.cmp(&b.player_name)));
        details
    }

    /// Sessions `name` still owes on, oldest first. Ties on date keep
    /// creation order.
    pub fn outstanding_for(&self, name: &str) -> LedgerResult<Vec<OutstandingSession>> {
        let (sessions, _) = self.completed(None)?;
        let mut outstanding: Vec<OutstandingSession> = sessions
            .iter()
            .filter_map(|s| {
                let p = s.participant(name)?;
                let owed = p.owed();
                (owed > 0).then(|| OutstandingSession {
                    session_id: s.session_id.clone(),
                    date: s.date,
                    created_at: s.created_at,
                    participant_name: p.player_name.clone(),
                    owed,
                })
            })
            .collect();
        outstanding.sort_by(|a, b| a.date.cmp(&b.date).then(a.created_at.cmp(&b.created_at)));
        Ok(outstanding)
    }

    // ── Monthly and all-time views ─────────────────────────────

    /// Cost totals over every session in the month; debt and receivable
    /// totals over the completed ones.
    pub fn monthly_summary(&self, year: i32, month: u32) -> LedgerResult<Option<MonthlySummary>> {
        let Some(range) = DateRange::month(year, month) else {
            return Ok(None);
        };
        let (sessions, _) = self.window(Some(range))?;
        let completed: Vec<Session> = sessions.iter().filter(|s| s.is_completed()).cloned().collect();
        let debts = Self::entries(Side::Debt, &completed);
        let to_receive = Self::entries(Side::Receivable, &completed);

        Ok(Some(MonthlySummary {
            year,
            month,
            sessions_count: sessions.len(),
            total_cost: sessions.iter().map(|s| s.total_cost).sum(),
            total_court: sessions.iter().map(|s| s.court.total_court_price).sum(),
            total_shuttlecock: sessions
                .iter()
                .map(|s| s.shuttlecock.total_shuttlecock_price)
                .sum(),
            total_owed: debts.iter().map(|d| d.amount).sum(),
            total_to_receive: to_receive.iter().map(|d| d.amount).sum(),
            debts,
            to_receive,
        }))
    }

    /// Months in the recent window with unpaid debt, newest first.
    pub fn months_with_debts(&self) -> LedgerResult<Vec<MonthDebt>> {
        let (sessions, _) = self.completed(None)?;
        let mut months: BTreeMap<(i32, u32), (Money, Tally<()>)> = BTreeMap::new();

        for session in &sessions {
            let key = (session.date.year(), session.date.month());
            for p in &session.participants {
                let owed = p.owed();
                if owed > 0 {
                    let (total, people) = months.entry(key).or_default();
                    *total += owed;
                    people.entry(&p.player_name);
                }
            }
        }

        Ok(months
            .into_iter()
            .rev()
            .map(|((year, month), (total_owed, people))| MonthDebt {
                year,
                month,
                total_owed,
                people_count: people.groups.len(),
            })
            .collect())
    }

    pub fn total_owed(&self) -> LedgerResult<LedgerTotal> {
        Self::summed(self.all_debts(None)?)
    }

    pub fn total_to_receive(&self) -> LedgerResult<LedgerTotal> {
        Self::summed(self.all_to_receive(None)?)
    }

    fn summed(view: LedgerView<LedgerEntry>) -> LedgerResult<LedgerTotal> {
        Ok(LedgerTotal {
            amount: view.entries.iter().map(|e| e.amount).sum(),
            people_count: view.entries.len(),
            truncated: view.truncated,
        })
    }
}
