//! Storage seams consumed by the ledger, the splitter service and the matcher.
//!
//! RULE: Only the store module talks to the database. Everything else goes
//! through these traits, so tests and alternative backends can stand in.

use crate::{
    error::LedgerResult,
    player::{Player, ShortCode},
    session::Session,
    transaction::{Allocation, Transaction},
    types::{DateRange, Money},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub trait PlayerDirectory {
    fn find_by_short_code(&self, code: &ShortCode) -> LedgerResult<Option<Player>>;
    fn find_by_name_case_insensitive(&self, name: &str) -> LedgerResult<Option<Player>>;
    fn find_player(&self, player_id: &str) -> LedgerResult<Option<Player>>;
    /// Active players sorted by name.
    fn list_active(&self) -> LedgerResult<Vec<Player>>;
}

/// Who changed a participant's payment fields. Recorded in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentSource {
    /// Automatic allocation of an inbound transfer.
    Transfer { event_id: String },
    /// An operator set the amount directly.
    Manual,
    /// An operator settled all of a player's debts at once.
    BulkMarkPaid,
}

impl PaymentSource {
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Transfer { event_id } => Some(event_id),
            _ => None,
        }
    }
}

pub trait SessionStore {
    /// Sessions dated within `range`, newest first.
    fn find_by_date_range(&self, range: DateRange) -> LedgerResult<Vec<Session>>;
    /// The `limit` most recent sessions, newest first.
    fn find_recent(&self, limit: usize) -> LedgerResult<Vec<Session>>;
    fn find_session(&self, session_id: &str) -> LedgerResult<Option<Session>>;

    /// Overwrite one participant's paid amount. `false` when the session or
    /// participant does not exist. Atomic per session.
    fn update_participant_payment(
        &self,
        session_id: &str,
        player_name: &str,
        new_amount_paid: Money,
        source: &PaymentSource,
    ) -> LedgerResult<bool>;

    /// Credit up to `amount` against what the participant still owes in one
    /// session, reading and writing the session as one atomic unit. For a
    /// `Transfer` source the allocation is recorded against the event id in
    /// the same write; a repeat call for the same event and session returns
    /// the earlier allocation unchanged. `None` when nothing is owed or the
    /// participant is missing.
    fn apply_payment(
        &self,
        session_id: &str,
        player_name: &str,
        amount: Money,
        source: &PaymentSource,
    ) -> LedgerResult<Option<Allocation>>;
}

/// Result of trying to reserve an event id before touching any session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClaim {
    /// First delivery; this caller owns the event.
    Fresh,
    /// An earlier attempt died before recording its transaction. This caller
    /// now owns the event and must account for allocations already applied.
    Resumed,
    /// Another caller holds a live claim, or the event is already recorded.
    Taken,
}

pub trait TransactionStore {
    fn find_by_event_id(&self, event_id: &str) -> LedgerResult<Option<Transaction>>;
    fn find_by_reference_code(&self, reference_code: &str) -> LedgerResult<Option<Transaction>>;
    /// Compare-and-insert on the event id.
    fn claim_event(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        lease_secs: i64,
    ) -> LedgerResult<EventClaim>;
    /// Give up a claim taken at `claimed_at` without recording a transaction.
    /// The next delivery of the event resumes it at once.
    fn release_claim(&self, event_id: &str, claimed_at: DateTime<Utc>) -> LedgerResult<()>;
    /// Allocations already committed under an event id, oldest first.
    fn allocations_for_event(&self, event_id: &str) -> LedgerResult<Vec<Allocation>>;
    /// Append the audit record. `false` if one already exists for the event id.
    fn record(&self, transaction: &Transaction) -> LedgerResult<bool>;
    /// Successful payments by `player_name` (case-insensitive) created at or
    /// after `since`, newest first.
    fn recent_success_for_player(
        &self,
        player_name: &str,
        since: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>>;
    fn list_recent(&self, limit: usize) -> LedgerResult<Vec<Transaction>>;
}
