//! Sessions and the obligation records embedded in them.

use crate::types::{EntityId, Money};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A player reference with the name snapshotted at the time it was taken.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerRef {
    pub player_id: EntityId,
    pub player_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourtExpense {
    pub name: String,
    pub location: String,
    pub price_per_hour: Money,
    pub duration_minutes: i64,
    pub total_court_price: Money,
    pub paid_by: Option<PlayerRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShuttlecockExpense {
    pub price_per_shuttlecock: Money,
    pub quantity: i64,
    pub total_shuttlecock_price: Money,
    pub paid_by: Option<PlayerRef>,
}

/// One participant's share of a session and their payment state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParticipantObligation {
    pub player_id: EntityId,
    pub player_name: String,
    pub amount_due: Money,
    pub amount_pre_paid: Money,
    pub amount_paid: Money,
    pub amount_to_receive: Money,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub note: String,
    #[serde(default)]
    pub amount_returned: Money,
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
}

impl ParticipantObligation {
    /// Amount still outstanding. Zero for a participant who is owed money.
    pub fn owed(&self) -> Money {
        if self.is_receivable() {
            return 0;
        }
        (self.amount_due - self.amount_paid).max(0)
    }

    pub fn is_receivable(&self) -> bool {
        self.amount_to_receive > 0
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.player_name.to_lowercase() == name.to_lowercase()
    }

    /// Set the credited amount, keeping `is_paid`/`paid_at` consistent with it.
    /// The amount is clamped to `[0, amount_due]`.
    pub fn set_amount_paid(&mut self, amount: Money, now: DateTime<Utc>) {
        let clamped = amount.clamp(0, self.amount_due.max(0));
        if clamped != amount {
            log::warn!(
                "payment for {} clamped from {amount} to {clamped} (due {})",
                self.player_name,
                self.amount_due
            );
        }
        let was_paid = self.is_paid;
        self.amount_paid = clamped;
        self.is_paid = self.amount_paid >= self.amount_due;
        self.paid_at = match (self.is_paid, was_paid) {
            (true, true) => self.paid_at.or(Some(now)),
            (true, false) => Some(now),
            (false, _) => None,
        };
    }

    /// Record that the owed-back amount was returned to this participant.
    /// Returns the amount settled (zero when nothing was owed back).
    pub fn settle_receivable(&mut self, now: DateTime<Utc>) -> Money {
        if !self.is_receivable() {
            return 0;
        }
        let settled = self.amount_to_receive;
        self.amount_returned += settled;
        self.amount_to_receive = 0;
        self.returned_at = Some(now);
        self.note = if self.note.trim().is_empty() {
            "returned".to_string()
        } else {
            format!("{} - returned", self.note.trim())
        };
        settled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: EntityId,
    pub date: NaiveDate,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub court: CourtExpense,
    pub shuttlecock: ShuttlecockExpense,
    pub total_cost: Money,
    pub participants: Vec<ParticipantObligation>,
    pub status: SessionStatus,
    pub note: Option<String>,
    /// Bumped on every write; writers must present the version they read.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn participant(&self, name: &str) -> Option<&ParticipantObligation> {
        self.participants.iter().find(|p| p.name_matches(name))
    }

    pub fn participant_mut(&mut self, name: &str) -> Option<&mut ParticipantObligation> {
        self.participants.iter_mut().find(|p| p.name_matches(name))
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    pub fn sum_due(&self) -> Money {
        self.participants.iter().map(|p| p.amount_due).sum()
    }
}
