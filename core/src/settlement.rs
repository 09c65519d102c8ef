//! Session service: operator-side session lifecycle and manual payment edits.
//!
//! Design:
//!   - Creating or editing a session runs the splitter over the finalized
//!     participant list. Payers left as `PayerChoice::Default` come from the
//!     player directory's default payer flags.
//!   - Editing replaces the participant list wholesale. A participant kept
//!     across the edit who fronted nothing keeps what they had already paid
//!     (clamped to the new share). One who now fronts a cost has their
//!     earlier credits superseded; that is logged as a payment change.
//!   - Every payment change goes through the version-checked session write,
//!     the same path the webhook allocator uses.

use crate::{
    config::LedgerConfig,
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    ledger::DebtLedger,
    ports::{PaymentSource, PlayerDirectory, SessionStore},
    session::{CourtExpense, PlayerRef, Session, SessionStatus, ShuttlecockExpense},
    splitter::{self, SplitInput, SplitOutcome},
    store::LedgerStore,
    types::{EntityId, Money},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Who fronted a cost.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PayerChoice {
    /// The directory's default payer for that role, if any.
    #[default]
    Default,
    Nobody,
    Player(EntityId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub date: NaiveDate,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub court_name: String,
    #[serde(default)]
    pub court_location: String,
    pub price_per_hour: Money,
    pub duration_minutes: i64,
    pub price_per_shuttlecock: Money,
    pub shuttlecock_quantity: i64,
    #[serde(default)]
    pub court_payer: PayerChoice,
    #[serde(default)]
    pub shuttlecock_payer: PayerChoice,
    /// Player ids in display order.
    pub participant_ids: Vec<EntityId>,
    #[serde(default = "completed")]
    pub status: SessionStatus,
    #[serde(default)]
    pub note: Option<String>,
}

fn completed() -> SessionStatus {
    SessionStatus::Completed
}

/// Result of settling everything owed back to one player.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReturnedSummary {
    pub sessions: usize,
    pub total_returned: Money,
}

pub struct SessionService<'a> {
    store: &'a LedgerStore,
    config: &'a LedgerConfig,
}

impl<'a> SessionService<'a> {
    pub fn new(store: &'a LedgerStore, config: &'a LedgerConfig) -> Self {
        Self { store, config }
    }

    // ── Lifecycle ──────────────────────────────────────────────

    pub fn create_session(&self, new: &NewSession, now: DateTime<Utc>) -> LedgerResult<Session> {
        let (input, outcome) = self.split(new, now)?;
        let session = Session {
            session_id: uuid::Uuid::new_v4().to_string(),
            date: new.date,
            start_time: new.start_time.clone(),
            end_time: new.end_time.clone(),
            court: court_expense(new, &input, &outcome),
            shuttlecock: shuttlecock_expense(new, &input, &outcome),
            total_cost: outcome.total_cost,
            participants: outcome.participants,
            status: new.status,
            note: new.note.clone(),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_session(&session)?;
        log::info!(
            "session {} on {} created: total {}, {} participant(s)",
            session.session_id,
            session.date,
            session.total_cost,
            session.participants.len()
        );
        Ok(session)
    }

    /// Recompute the split and replace the participant list.
    pub fn edit_session(
        &self,
        session_id: &str,
        edit: &NewSession,
        now: DateTime<Utc>,
    ) -> LedgerResult<Session> {
        let (input, outcome) = self.split(edit, now)?;
        let updated = self.store.modify_session(
            session_id,
            now,
            |session| {
                let mut participants = outcome.participants.clone();
                let mut dropped = Vec::new();
                for p in participants.iter_mut() {
                    let Some(old) = session.participants.iter().find(|o| o.player_id == p.player_id) else {
                        continue;
                    };
                    if p.amount_pre_paid > 0 {
                        // Fronting a cost now covers the share; earlier credits are superseded.
                        let credited = old.amount_paid - old.amount_pre_paid.min(old.amount_due);
                        if credited > 0 {
                            log::warn!(
                                "session {session_id}: {} now fronts a cost; {credited} credited earlier is no longer counted",
                                p.player_name
                            );
                            dropped.push(LedgerEvent::PaymentChanged {
                                session_id: session_id.to_string(),
                                player_name: p.player_name.clone(),
                                old_amount_paid: old.amount_paid,
                                new_amount_paid: p.amount_paid,
                                source: PaymentSource::Manual,
                            });
                        }
                        continue;
                    }
                    if old.amount_paid > 0 {
                        p.set_amount_paid(old.amount_paid, now);
                        if p.is_paid && old.is_paid {
                            p.paid_at = old.paid_at;
                        }
                    }
                    p.note = old.note.clone();
                }

                session.date = edit.date;
                session.start_time = edit.start_time.clone();
                session.end_time = edit.end_time.clone();
                session.court = court_expense(edit, &input, &outcome);
                session.shuttlecock = shuttlecock_expense(edit, &input, &outcome);
                session.total_cost = outcome.total_cost;
                session.participants = participants;
                session.status = edit.status;
                session.note = edit.note.clone();

                let mut events = vec![LedgerEvent::ParticipantsReplaced {
                    session_id: session_id.to_string(),
                    total_cost: session.total_cost,
                    participants: session.participants.len(),
                }];
                events.append(&mut dropped);
                Ok(Some((session.clone(), events)))
            },
            |_, _| Ok(()),
        )?;
        let mut session = updated.ok_or_else(|| not_found(session_id))?;
        session.version += 1;
        session.updated_at = now;
        Ok(session)
    }

    pub fn delete_session(&self, session_id: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        if !self.store.delete_session(session_id, now)? {
            return Err(not_found(session_id));
        }
        log::info!("session {session_id} deleted");
        Ok(())
    }

    // ── Manual payments ────────────────────────────────────────

    /// Operator override of one participant's paid amount.
    pub fn set_payment(&self, session_id: &str, player_name: &str, amount_paid: Money) -> LedgerResult<()> {
        if amount_paid < 0 {
            return Err(LedgerError::Validation("amount_paid must not be negative".into()));
        }
        if !self
            .store
            .update_participant_payment(session_id, player_name, amount_paid, &PaymentSource::Manual)?
        {
            return Err(LedgerError::NotFound {
                entity: "participant",
                id: format!("{session_id}/{player_name}"),
            });
        }
        Ok(())
    }

    /// Credit the participant's full share.
    pub fn mark_paid(&self, session_id: &str, player_name: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        if self.store.find_session(session_id)?.is_none() {
            return Err(not_found(session_id));
        }
        if self.pay_in_full(session_id, player_name, &PaymentSource::Manual, now)?.is_none() {
            log::debug!("{player_name} in session {session_id}: nothing left to mark paid");
        }
        Ok(())
    }

    /// Mark every outstanding debt of `player_name` paid. Returns the number
    /// of sessions changed.
    pub fn mark_all_paid(&self, player_name: &str, now: DateTime<Utc>) -> LedgerResult<usize> {
        let ledger = DebtLedger::new(self.store, self.config.recent_session_cap);
        let mut count = 0;
        for outstanding in ledger.outstanding_for(player_name)? {
            let changed = self.pay_in_full(
                &outstanding.session_id,
                &outstanding.participant_name,
                &PaymentSource::BulkMarkPaid,
                now,
            )?;
            if changed.is_some() {
                count += 1;
            }
        }
        log::info!("{count} session(s) marked paid for {player_name}");
        Ok(count)
    }

    /// Raise `amount_paid` to `amount_due` for a debtor. `None` when the
    /// participant is missing, already paid, or is owed money instead.
    fn pay_in_full(
        &self,
        session_id: &str,
        player_name: &str,
        source: &PaymentSource,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<Money>> {
        self.store.modify_session(
            session_id,
            now,
            |session| {
                let Some(p) = session.participant_mut(player_name) else {
                    return Ok(None);
                };
                let owed = p.owed();
                if owed <= 0 {
                    return Ok(None);
                }
                let old = p.amount_paid;
                p.set_amount_paid(p.amount_due, now);
                let event = LedgerEvent::PaymentChanged {
                    session_id: session_id.to_string(),
                    player_name: p.player_name.clone(),
                    old_amount_paid: old,
                    new_amount_paid: p.amount_paid,
                    source: source.clone(),
                };
                Ok(Some((owed, vec![event])))
            },
            |_, _| Ok(()),
        )
    }

    /// Record that everything owed back to `player_name` was returned.
    pub fn mark_received(&self, player_name: &str, now: DateTime<Utc>) -> LedgerResult<ReturnedSummary> {
        let ledger = DebtLedger::new(self.store, self.config.recent_session_cap);
        let details = ledger.receivables_with_details(Some(player_name))?;
        let mut summary = ReturnedSummary::default();

        for line in details.entries.iter().flat_map(|d| &d.sessions) {
            let settled = self.store.modify_session(
                &line.session_id,
                now,
                |session| {
                    let Some(p) = session.participant_mut(player_name) else {
                        return Ok(None);
                    };
                    let amount = p.settle_receivable(now);
                    if amount == 0 {
                        return Ok(None);
                    }
                    let event = LedgerEvent::ReceivableSettled {
                        session_id: line.session_id.clone(),
                        player_name: p.player_name.clone(),
                        amount,
                    };
                    Ok(Some((amount, vec![event])))
                },
                |_, _| Ok(()),
            )?;
            if let Some(amount) = settled {
                summary.sessions += 1;
                summary.total_returned += amount;
            }
        }
        log::info!(
            "returned {} over {} session(s) to {player_name}",
            summary.total_returned,
            summary.sessions
        );
        Ok(summary)
    }

    // ── Split helpers ──────────────────────────────────────────

    fn split(&self, new: &NewSession, now: DateTime<Utc>) -> LedgerResult<(SplitInput, SplitOutcome)> {
        let mut participants = Vec::with_capacity(new.participant_ids.len());
        for id in &new.participant_ids {
            let player = self.store.find_player(id)?.ok_or_else(|| LedgerError::NotFound {
                entity: "player",
                id: id.clone(),
            })?;
            participants.push(PlayerRef {
                player_id: player.player_id,
                player_name: player.name,
            });
        }

        let input = SplitInput {
            price_per_hour: new.price_per_hour,
            duration_minutes: new.duration_minutes,
            price_per_shuttlecock: new.price_per_shuttlecock,
            shuttlecock_quantity: new.shuttlecock_quantity,
            court_payer: self.resolve_payer(&new.court_payer, Role::Court)?,
            shuttlecock_payer: self.resolve_payer(&new.shuttlecock_payer, Role::Shuttlecock)?,
            participants,
        };
        let outcome = splitter::split(&input, self.config.split_policy, now)?;
        Ok((input, outcome))
    }

    fn resolve_payer(&self, choice: &PayerChoice, role: Role) -> LedgerResult<Option<PlayerRef>> {
        let player = match choice {
            PayerChoice::Nobody => None,
            PayerChoice::Default => match role {
                Role::Court => self.store.default_court_payer()?,
                Role::Shuttlecock => self.store.default_shuttlecock_payer()?,
            },
            PayerChoice::Player(id) => Some(self.store.find_player(id)?.ok_or_else(|| {
                LedgerError::NotFound {
                    entity: "player",
                    id: id.clone(),
                }
            })?),
        };
        Ok(player.map(|p| PlayerRef {
            player_id: p.player_id,
            player_name: p.name,
        }))
    }
}

#[derive(Clone, Copy)]
enum Role {
    Court,
    Shuttlecock,
}

fn court_expense(new: &NewSession, input: &SplitInput, outcome: &SplitOutcome) -> CourtExpense {
    CourtExpense {
        name: new.court_name.clone(),
        location: new.court_location.clone(),
        price_per_hour: new.price_per_hour,
        duration_minutes: new.duration_minutes,
        total_court_price: outcome.total_court_price,
        paid_by: input.court_payer.clone(),
    }
}

fn shuttlecock_expense(new: &NewSession, input: &SplitInput, outcome: &SplitOutcome) -> ShuttlecockExpense {
    ShuttlecockExpense {
        price_per_shuttlecock: new.price_per_shuttlecock,
        quantity: new.shuttlecock_quantity,
        total_shuttlecock_price: outcome.total_shuttlecock_price,
        paid_by: input.shuttlecock_payer.clone(),
    }
}

fn not_found(session_id: &str) -> LedgerError {
    LedgerError::NotFound {
        entity: "session",
        id: session_id.to_string(),
    }
}
