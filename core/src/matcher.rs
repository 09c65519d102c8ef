//! Payment matcher: turns one inbound transfer notification into ledger
//! mutations and exactly one audit record.
//!
//! Pipeline (linear, no retries inside one call):
//!   authenticate → dedup + claim → direction → keyword → identity
//!   → outstanding sessions (oldest first) → allocate → record
//!
//! Design:
//!   - The event id is claimed before any session is touched. A second
//!     delivery that finds a recorded transaction or a live claim is a
//!     duplicate and writes nothing.
//!   - Each session allocation commits on its own, together with an
//!     allocation row keyed by (event id, session id). A delivery that takes
//!     over an abandoned claim counts those rows against the transfer and
//!     skips the sessions they cover.
//!   - The transaction row is written last, after allocation finishes.
//!   - Business rejections are outcomes, not errors.

use crate::{
    config::LedgerConfig,
    content::ContentRules,
    error::{LedgerError, LedgerResult},
    ledger::DebtLedger,
    player::Player,
    ports::{EventClaim, PaymentSource, PlayerDirectory, SessionStore, TransactionStore},
    store::DATETIME_FORMAT,
    transaction::{Allocation, RejectReason, Transaction, TransactionStatus},
    types::Money,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

// ── Inbound event ──────────────────────────────────────────────

/// Transfer notification as posted by the payment gateway.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferEvent {
    #[serde(deserialize_with = "flexible_id")]
    pub id: Option<String>,
    pub gateway: String,
    pub transaction_date: String,
    pub account_number: String,
    pub content: String,
    pub transfer_type: String,
    pub transfer_amount: Money,
    pub reference_code: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(i64),
    Text(String),
}

/// Gateways send the id as a number; accept a string too.
fn flexible_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<RawId>::deserialize(deserializer)? {
        Some(RawId::Number(n)) => Some(n.to_string()),
        Some(RawId::Text(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

impl TransferEvent {
    /// Decode a request body. Empty or non-JSON bodies are malformed.
    pub fn from_json(body: &[u8]) -> LedgerResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(LedgerError::MalformedRequest("No data provided".into()));
        }
        serde_json::from_slice(body).map_err(|e| LedgerError::MalformedRequest(e.to_string()))
    }

    pub fn is_incoming(&self) -> bool {
        self.transfer_type.trim().eq_ignore_ascii_case("in")
    }

    /// Transfer time as reported, or `fallback` when missing or unparseable.
    pub fn transfer_time(&self, fallback: NaiveDateTime) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(self.transaction_date.trim(), DATETIME_FORMAT).unwrap_or_else(|_| {
            if !self.transaction_date.trim().is_empty() {
                log::warn!(
                    "unparseable transactionDate '{}', using receipt time",
                    self.transaction_date
                );
            }
            fallback
        })
    }
}

// ── Outcome ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub status: TransactionStatus,
    pub reason: Option<RejectReason>,
    pub event_id: String,
    /// Id of the recorded transaction. For duplicates, the earlier one if known.
    pub transaction_id: Option<String>,
    pub player_name: Option<String>,
    pub transfer_amount: Money,
    pub allocations: Vec<Allocation>,
    pub remaining_amount: Money,
}

/// JSON body returned to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_received: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions_updated: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_amount: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl WebhookResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            player_name: None,
            amount_received: None,
            sessions_updated: None,
            remaining_amount: None,
            transaction_id: None,
        }
    }
}

impl ReconcileOutcome {
    pub fn is_duplicate(&self) -> bool {
        self.status == TransactionStatus::Duplicate
    }

    pub fn response(&self) -> WebhookResponse {
        match (self.status, self.reason) {
            (TransactionStatus::Duplicate, _) => WebhookResponse {
                transaction_id: self.transaction_id.clone(),
                ..WebhookResponse::failure("Duplicate transaction")
            },
            (TransactionStatus::Failed, reason) => WebhookResponse::failure(
                reason.map(|r| r.message()).unwrap_or("Payment rejected"),
            ),
            (TransactionStatus::Success, _) => {
                let name = self.player_name.clone().unwrap_or_default();
                let message = if self.allocations.is_empty() {
                    format!("No unpaid sessions found for {name}")
                } else {
                    format!("Payment processed for {name}")
                };
                WebhookResponse {
                    success: true,
                    message,
                    player_name: self.player_name.clone(),
                    amount_received: Some(self.transfer_amount),
                    sessions_updated: Some(self.allocations.len()),
                    remaining_amount: Some(self.remaining_amount),
                    transaction_id: self.transaction_id.clone(),
                }
            }
        }
    }
}

// ── Matcher ────────────────────────────────────────────────────

pub struct PaymentMatcher<'a> {
    players: &'a dyn PlayerDirectory,
    sessions: &'a dyn SessionStore,
    transactions: &'a dyn TransactionStore,
    rules: &'a ContentRules,
    config: &'a LedgerConfig,
    api_key: Option<String>,
}

impl<'a> PaymentMatcher<'a> {
    pub fn new(
        players: &'a dyn PlayerDirectory,
        sessions: &'a dyn SessionStore,
        transactions: &'a dyn TransactionStore,
        rules: &'a ContentRules,
        config: &'a LedgerConfig,
    ) -> Self {
        Self {
            players,
            sessions,
            transactions,
            rules,
            config,
            api_key: None,
        }
    }

    /// One store backing all three seams.
    pub fn over<S>(store: &'a S, rules: &'a ContentRules, config: &'a LedgerConfig) -> Self
    where
        S: PlayerDirectory + SessionStore + TransactionStore,
    {
        Self::new(store, store, store, rules, config)
    }

    /// Require callers to present `key`. An empty key accepts everyone.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn authenticate(&self, credential: Option<&str>) -> LedgerResult<()> {
        match &self.api_key {
            None => Ok(()),
            Some(expected) if credential.map(str::trim) == Some(expected.as_str()) => Ok(()),
            Some(_) => Err(LedgerError::Unauthorized),
        }
    }

    /// Process one delivery. `Err` only for authentication, malformed input
    /// and storage failures; every business outcome is an `Ok`.
    pub fn reconcile(
        &self,
        credential: Option<&str>,
        event: &TransferEvent,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReconcileOutcome> {
        self.authenticate(credential)?;
        let event_id = event
            .id
            .clone()
            .ok_or_else(|| LedgerError::MalformedRequest("missing event id".into()))?;
        if event.transfer_amount < 0 {
            return Err(LedgerError::MalformedRequest(
                "transferAmount must not be negative".into(),
            ));
        }

        if let Some(existing) = self.transactions.find_by_event_id(&event_id)? {
            log::info!("event {event_id}: duplicate of transaction {}", existing.transaction_id);
            return Ok(self.duplicate(event_id, event, Some(existing.transaction_id)));
        }
        let claim = self
            .transactions
            .claim_event(&event_id, now, self.config.claim_lease_secs)?;
        if claim == EventClaim::Taken {
            log::info!("event {event_id}: already claimed by another delivery");
            return Ok(self.duplicate(event_id, event, None));
        }

        let result = self.process_claimed(&event_id, event, claim, now);
        if let Err(err) = &result {
            log::warn!("event {event_id}: delivery failed after claim: {err}");
            if let Err(release_err) = self.transactions.release_claim(&event_id, now) {
                log::error!("event {event_id}: could not release claim: {release_err}");
            }
        }
        result
    }

    /// Everything after the claim. The caller owns `event_id`.
    fn process_claimed(
        &self,
        event_id: &str,
        event: &TransferEvent,
        claim: EventClaim,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReconcileOutcome> {
        let event_id = event_id.to_string();
        if !event.is_incoming() {
            return self.reject(event_id, event, RejectReason::NotIncoming, now);
        }
        if !self.rules.has_keyword(&event.content) {
            return self.reject(event_id, event, RejectReason::MissingKeyword, now);
        }
        let Some(player_name) = self.resolve_payer(&event.content)? else {
            return self.reject(event_id, event, RejectReason::UnknownPayer, now);
        };

        let prior = match claim {
            EventClaim::Resumed => self.transactions.allocations_for_event(&event_id)?,
            _ => Vec::new(),
        };
        let (allocations, remaining_amount) =
            self.allocate(&event_id, &player_name, event.transfer_amount, prior)?;

        let transaction = Transaction {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.clone(),
            gateway: event.gateway.clone(),
            transaction_date: event.transfer_time(now.naive_utc()),
            account_number: event.account_number.clone(),
            content: event.content.clone(),
            transfer_amount: event.transfer_amount,
            reference_code: event.reference_code.clone(),
            player_name: Some(player_name.clone()),
            allocations,
            remaining_amount,
            status: TransactionStatus::Success,
            reason: None,
            created_at: now,
        };
        self.transactions.record(&transaction)?;
        log::info!(
            "event {event_id}: success for {player_name}, {} session(s), {} applied, {} remaining",
            transaction.allocations.len(),
            transaction.total_applied(),
            remaining_amount
        );

        Ok(ReconcileOutcome {
            status: TransactionStatus::Success,
            reason: None,
            event_id,
            transaction_id: Some(transaction.transaction_id),
            player_name: Some(player_name),
            transfer_amount: event.transfer_amount,
            allocations: transaction.allocations,
            remaining_amount,
        })
    }

    /// Short code first; otherwise the name before the keyword, spelled the
    /// way the directory stores it when it knows the player.
    fn resolve_payer(&self, content: &str) -> LedgerResult<Option<String>> {
        let clues = self.rules.clues(content);
        if let Some(code) = &clues.short_code {
            if let Some(player) = self.players.find_by_short_code(code)? {
                log::debug!("short code {code} resolves to {}", player.name);
                return Ok(Some(player.name));
            }
            log::debug!("short code {code} is not assigned; falling back to name");
        }
        let Some(name) = clues.name else {
            return Ok(None);
        };
        Ok(Some(
            self.players
                .find_by_name_case_insensitive(&name)?
                .map(|p: Player| p.name)
                .unwrap_or(name),
        ))
    }

    /// FIFO walk over the payer's outstanding sessions. `prior` holds
    /// allocations an earlier attempt already committed for this event.
    fn allocate(
        &self,
        event_id: &str,
        player_name: &str,
        transfer_amount: Money,
        prior: Vec<Allocation>,
    ) -> LedgerResult<(Vec<Allocation>, Money)> {
        let source = PaymentSource::Transfer {
            event_id: event_id.to_string(),
        };
        let already: HashSet<String> = prior.iter().map(|a| a.session_id.clone()).collect();
        let mut remaining = transfer_amount - prior.iter().map(|a| a.amount_applied).sum::<Money>();
        let mut allocations = prior;

        let ledger = DebtLedger::new(self.sessions, self.config.recent_session_cap);
        for outstanding in ledger.outstanding_for(player_name)? {
            if remaining <= 0 {
                break;
            }
            if already.contains(&outstanding.session_id) {
                continue;
            }
            let applied = self.sessions.apply_payment(
                &outstanding.session_id,
                &outstanding.participant_name,
                remaining,
                &source,
            )?;
            // None: settled by someone else since the outstanding list was read.
            if let Some(allocation) = applied {
                remaining -= allocation.amount_applied;
                allocations.push(allocation);
            }
        }
        Ok((allocations, remaining))
    }

    fn duplicate(
        &self,
        event_id: String,
        event: &TransferEvent,
        transaction_id: Option<String>,
    ) -> ReconcileOutcome {
        ReconcileOutcome {
            status: TransactionStatus::Duplicate,
            reason: None,
            event_id,
            transaction_id,
            player_name: None,
            transfer_amount: event.transfer_amount,
            allocations: Vec::new(),
            remaining_amount: event.transfer_amount,
        }
    }

    fn reject(
        &self,
        event_id: String,
        event: &TransferEvent,
        reason: RejectReason,
        now: DateTime<Utc>,
    ) -> LedgerResult<ReconcileOutcome> {
        let transaction = Transaction {
            transaction_id: uuid::Uuid::new_v4().to_string(),
            event_id: event_id.clone(),
            gateway: event.gateway.clone(),
            transaction_date: event.transfer_time(now.naive_utc()),
            account_number: event.account_number.clone(),
            content: event.content.clone(),
            transfer_amount: event.transfer_amount,
            reference_code: event.reference_code.clone(),
            player_name: None,
            allocations: Vec::new(),
            remaining_amount: event.transfer_amount,
            status: TransactionStatus::Failed,
            reason: Some(reason),
            created_at: now,
        };
        self.transactions.record(&transaction)?;
        log::info!("event {event_id}: failed ({})", reason.as_str());
        Ok(ReconcileOutcome {
            status: TransactionStatus::Failed,
            reason: Some(reason),
            event_id,
            transaction_id: Some(transaction.transaction_id),
            player_name: None,
            transfer_amount: event.transfer_amount,
            allocations: Vec::new(),
            remaining_amount: event.transfer_amount,
        })
    }
}

// ── Payment-status polling ─────────────────────────────────────

/// Answer to "has this player paid in the last few minutes?".
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentStatus {
    pub player_name: String,
    pub has_payment: bool,
    /// Most recent matching payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

pub fn payment_status(
    transactions: &dyn TransactionStore,
    player_name: &str,
    within_minutes: i64,
    now: DateTime<Utc>,
) -> LedgerResult<PaymentStatus> {
    let since = now - Duration::minutes(within_minutes.max(0));
    let latest = transactions
        .recent_success_for_player(player_name, since)?
        .into_iter()
        .next();
    Ok(PaymentStatus {
        player_name: player_name.trim().to_string(),
        has_payment: latest.is_some(),
        transaction: latest,
    })
}
