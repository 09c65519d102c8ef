//! The ledger event log. Every change to payment state leaves a row.
//!
//! RULE: Events are appended in the same SQLite transaction as the change
//! they describe. They are never updated or deleted.

use crate::{
    ports::PaymentSource,
    types::{EntityId, Money},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Variants are appended as features land, never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    SessionCreated {
        session_id: EntityId,
        total_cost: Money,
        participants: usize,
    },
    ParticipantsReplaced {
        session_id: EntityId,
        total_cost: Money,
        participants: usize,
    },
    SessionDeleted {
        session_id: EntityId,
    },
    PaymentChanged {
        session_id: EntityId,
        player_name: String,
        old_amount_paid: Money,
        new_amount_paid: Money,
        source: PaymentSource,
    },
    ReceivableSettled {
        session_id: EntityId,
        player_name: String,
        amount: Money,
    },
    PlayerRegistered {
        player_id: EntityId,
        name: String,
        short_code: Option<String>,
    },
    PlayerRenamed {
        player_id: EntityId,
        old_name: String,
        new_name: String,
    },
    PlayerDeactivated {
        player_id: EntityId,
    },
}

impl LedgerEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "session_created",
            Self::ParticipantsReplaced { .. } => "participants_replaced",
            Self::SessionDeleted { .. } => "session_deleted",
            Self::PaymentChanged { .. } => "payment_changed",
            Self::ReceivableSettled { .. } => "receivable_settled",
            Self::PlayerRegistered { .. } => "player_registered",
            Self::PlayerRenamed { .. } => "player_renamed",
            Self::PlayerDeactivated { .. } => "player_deactivated",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub event_type: String,
    pub subject_id: EntityId,
    pub payload: String, // JSON-serialized LedgerEvent
    pub created_at: DateTime<Utc>,
}
