//! Reconciliation audit records.
//!
//! One Transaction per external event id, written once, never updated.

use crate::types::{EntityId, Money};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
    Duplicate,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }
}

/// Why an event did not change the ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotIncoming,
    MissingKeyword,
    UnknownPayer,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotIncoming => "not_incoming",
            Self::MissingKeyword => "missing_keyword",
            Self::UnknownPayer => "unknown_payer",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "not_incoming" => Some(Self::NotIncoming),
            "missing_keyword" => Some(Self::MissingKeyword),
            "unknown_payer" => Some(Self::UnknownPayer),
            _ => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::NotIncoming => "Not an incoming transfer",
            Self::MissingKeyword => "Invalid payment content - missing keywords",
            Self::UnknownPayer => "Could not extract player from content",
        }
    }
}

/// Amount applied to one session by one payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    pub session_id: EntityId,
    pub amount_applied: Money,
    pub fully_paid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub transaction_id: EntityId,
    pub event_id: String,
    pub gateway: String,
    pub transaction_date: NaiveDateTime,
    pub account_number: String,
    pub content: String,
    pub transfer_amount: Money,
    pub reference_code: String,
    pub player_name: Option<String>,
    pub allocations: Vec<Allocation>,
    pub remaining_amount: Money,
    pub status: TransactionStatus,
    pub reason: Option<RejectReason>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn total_applied(&self) -> Money {
        self.allocations.iter().map(|a| a.amount_applied).sum()
    }
}
