use super::{from_millis, parse_date, LedgerStore, DATE_FORMAT};
use crate::{
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    ports::{PaymentSource, SessionStore},
    session::{Session, SessionStatus},
    transaction::Allocation,
    types::{DateRange, Money},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const SESSION_COLUMNS: &str = "session_id, date, start_time, end_time, court_json,
     shuttlecock_json, total_cost, participants_json, status, note, version,
     created_at_ms, updated_at_ms";

/// Raw columns; JSON and dates are decoded after the row is released.
struct SessionRow {
    session_id: String,
    date: String,
    start_time: Option<String>,
    end_time: Option<String>,
    court_json: String,
    shuttlecock_json: String,
    total_cost: Money,
    participants_json: String,
    status: String,
    note: Option<String>,
    version: i64,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            date: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            court_json: row.get(4)?,
            shuttlecock_json: row.get(5)?,
            total_cost: row.get(6)?,
            participants_json: row.get(7)?,
            status: row.get(8)?,
            note: row.get(9)?,
            version: row.get(10)?,
            created_at_ms: row.get(11)?,
            updated_at_ms: row.get(12)?,
        })
    }

    fn decode(self) -> LedgerResult<Session> {
        let status = SessionStatus::parse(&self.status).ok_or_else(|| {
            anyhow::anyhow!("session {} has unknown status '{}'", self.session_id, self.status)
        })?;
        Ok(Session {
            date: parse_date(&self.date)?,
            start_time: self.start_time,
            end_time: self.end_time,
            court: serde_json::from_str(&self.court_json)?,
            shuttlecock: serde_json::from_str(&self.shuttlecock_json)?,
            total_cost: self.total_cost,
            participants: serde_json::from_str(&self.participants_json)?,
            status,
            note: self.note,
            version: self.version,
            created_at: from_millis(self.created_at_ms),
            updated_at: from_millis(self.updated_at_ms),
            session_id: self.session_id,
        })
    }
}

impl LedgerStore {
    fn query_sessions(&self, tail: &str, args: &[&dyn rusqlite::ToSql]) -> LedgerResult<Vec<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM session {tail}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, SessionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SessionRow::decode).collect()
    }

    pub fn insert_session(&self, session: &Session) -> LedgerResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO session (
                session_id, date, start_time, end_time, court_json, shuttlecock_json,
                total_cost, participants_json, status, note, version,
                created_at_ms, updated_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                session.session_id,
                session.date.format(DATE_FORMAT).to_string(),
                session.start_time,
                session.end_time,
                serde_json::to_string(&session.court)?,
                serde_json::to_string(&session.shuttlecock)?,
                session.total_cost,
                serde_json::to_string(&session.participants)?,
                session.status.as_str(),
                session.note,
                session.version,
                session.created_at.timestamp_millis(),
                session.updated_at.timestamp_millis(),
            ],
        )?;
        Self::append_event(
            &tx,
            &session.session_id,
            &LedgerEvent::SessionCreated {
                session_id: session.session_id.clone(),
                total_cost: session.total_cost,
                participants: session.participants.len(),
            },
            session.created_at,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a session entirely. Allocation history under past events stays.
    pub fn delete_session(&self, session_id: &str, now: DateTime<Utc>) -> LedgerResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM session WHERE session_id = ?1", params![session_id])?;
        if removed > 0 {
            Self::append_event(
                &tx,
                session_id,
                &LedgerEvent::SessionDeleted {
                    session_id: session_id.to_string(),
                },
                now,
            )?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn session_count(&self) -> LedgerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM session", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Read-modify-write of one session under an optimistic version check.
    ///
    /// `mutate` edits a fresh copy and returns `None` to abort without writing.
    /// `extra` runs inside the write transaction after the version check
    /// passed, for rows that must commit together with the session.
    /// A lost race re-reads the session and calls `mutate` again.
    pub(crate) fn modify_session<T>(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        mut mutate: impl FnMut(&mut Session) -> LedgerResult<Option<(T, Vec<LedgerEvent>)>>,
        mut extra: impl FnMut(&rusqlite::Connection, &T) -> LedgerResult<()>,
    ) -> LedgerResult<Option<T>> {
        for attempt in 1..=self.max_version_retries {
            let Some(mut session) = self.find_session(session_id)? else {
                return Ok(None);
            };
            let read_version = session.version;
            let Some((value, events)) = mutate(&mut session)? else {
                return Ok(None);
            };

            let tx = self.conn.unchecked_transaction()?;
            let written = tx.execute(
                "UPDATE session
                 SET participants_json = ?1, total_cost = ?2, court_json = ?3,
                     shuttlecock_json = ?4, date = ?5, status = ?6, note = ?7,
                     start_time = ?8, end_time = ?9,
                     version = version + 1, updated_at_ms = ?10
                 WHERE session_id = ?11 AND version = ?12",
                params![
                    serde_json::to_string(&session.participants)?,
                    session.total_cost,
                    serde_json::to_string(&session.court)?,
                    serde_json::to_string(&session.shuttlecock)?,
                    session.date.format(DATE_FORMAT).to_string(),
                    session.status.as_str(),
                    session.note,
                    session.start_time,
                    session.end_time,
                    now.timestamp_millis(),
                    session_id,
                    read_version,
                ],
            )?;
            if written == 0 {
                // Rolled back on drop.
                log::debug!("session {session_id}: version {read_version} is stale (attempt {attempt})");
                continue;
            }
            extra(&*tx, &value)?;
            for event in &events {
                Self::append_event(&tx, session_id, event, now)?;
            }
            tx.commit()?;
            return Ok(Some(value));
        }
        Err(LedgerError::Conflict {
            session_id: session_id.to_string(),
            attempts: self.max_version_retries,
        })
    }

    fn allocation_for(&self, event_id: &str, session_id: &str) -> LedgerResult<Option<Allocation>> {
        let found = self
            .conn
            .query_row(
                "SELECT session_id, amount_applied, fully_paid FROM payment_allocation
                 WHERE event_id = ?1 AND session_id = ?2",
                params![event_id, session_id],
                |row| {
                    Ok(Allocation {
                        session_id: row.get(0)?,
                        amount_applied: row.get(1)?,
                        fully_paid: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }
}

impl SessionStore for LedgerStore {
    fn find_by_date_range(&self, range: DateRange) -> LedgerResult<Vec<Session>> {
        self.query_sessions(
            "WHERE date >= ?1 AND date < ?2 ORDER BY date DESC, created_at_ms DESC",
            &[
                &range.start.format(DATE_FORMAT).to_string(),
                &range.end.format(DATE_FORMAT).to_string(),
            ],
        )
    }

    fn find_recent(&self, limit: usize) -> LedgerResult<Vec<Session>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_sessions("ORDER BY date DESC, created_at_ms DESC LIMIT ?1", &[&limit])
    }

    fn find_session(&self, session_id: &str) -> LedgerResult<Option<Session>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM session WHERE session_id = ?1"),
                params![session_id],
                SessionRow::from_row,
            )
            .optional()?;
        row.map(SessionRow::decode).transpose()
    }

    fn update_participant_payment(
        &self,
        session_id: &str,
        player_name: &str,
        new_amount_paid: Money,
        source: &PaymentSource,
    ) -> LedgerResult<bool> {
        let now = Utc::now();
        let updated = self.modify_session(
            session_id,
            now,
            |session| {
                let Some(p) = session.participant_mut(player_name) else {
                    return Ok(None);
                };
                let old = p.amount_paid;
                p.set_amount_paid(new_amount_paid, now);
                let event = LedgerEvent::PaymentChanged {
                    session_id: session_id.to_string(),
                    player_name: p.player_name.clone(),
                    old_amount_paid: old,
                    new_amount_paid: p.amount_paid,
                    source: source.clone(),
                };
                Ok(Some(((), vec![event])))
            },
            |_, _| Ok(()),
        )?;
        Ok(updated.is_some())
    }

    fn apply_payment(
        &self,
        session_id: &str,
        player_name: &str,
        amount: Money,
        source: &PaymentSource,
    ) -> LedgerResult<Option<Allocation>> {
        if let Some(event_id) = source.event_id() {
            if let Some(earlier) = self.allocation_for(event_id, session_id)? {
                log::info!(
                    "event {event_id}: session {session_id} already credited {}",
                    earlier.amount_applied
                );
                return Ok(Some(earlier));
            }
        }
        if amount <= 0 {
            return Ok(None);
        }

        let now = Utc::now();
        self.modify_session(
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
                let applied = amount.min(owed);
                let old = p.amount_paid;
                p.set_amount_paid(old + applied, now);
                let allocation = Allocation {
                    session_id: session_id.to_string(),
                    amount_applied: applied,
                    fully_paid: applied >= owed,
                };
                let event = LedgerEvent::PaymentChanged {
                    session_id: session_id.to_string(),
                    player_name: p.player_name.clone(),
                    old_amount_paid: old,
                    new_amount_paid: p.amount_paid,
                    source: source.clone(),
                };
                Ok(Some((allocation, vec![event])))
            },
            |conn, allocation| {
                if let Some(event_id) = source.event_id() {
                    conn.execute(
                        "INSERT INTO payment_allocation (event_id, session_id, amount_applied, fully_paid)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            event_id,
                            allocation.session_id,
                            allocation.amount_applied,
                            allocation.fully_paid,
                        ],
                    )?;
                }
                Ok(())
            },
        )
    }
}
