use super::{from_millis, parse_datetime, LedgerStore, DATETIME_FORMAT};
use crate::{
    error::LedgerResult,
    ports::{EventClaim, TransactionStore},
    transaction::{Allocation, RejectReason, Transaction, TransactionStatus},
    types::Money,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const TRANSACTION_COLUMNS: &str = "transaction_id, event_id, gateway, transaction_date,
     account_number, content, transfer_amount, reference_code, player_name,
     allocations_json, remaining_amount, status, reason, created_at_ms";

struct TransactionRow {
    transaction_id: String,
    event_id: String,
    gateway: String,
    transaction_date: String,
    account_number: String,
    content: String,
    transfer_amount: Money,
    reference_code: String,
    player_name: Option<String>,
    allocations_json: String,
    remaining_amount: Money,
    status: String,
    reason: Option<String>,
    created_at_ms: i64,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            transaction_id: row.get(0)?,
            event_id: row.get(1)?,
            gateway: row.get(2)?,
            transaction_date: row.get(3)?,
            account_number: row.get(4)?,
            content: row.get(5)?,
            transfer_amount: row.get(6)?,
            reference_code: row.get(7)?,
            player_name: row.get(8)?,
            allocations_json: row.get(9)?,
            remaining_amount: row.get(10)?,
            status: row.get(11)?,
            reason: row.get(12)?,
            created_at_ms: row.get(13)?,
        })
    }

    fn decode(self) -> LedgerResult<Transaction> {
        let status = TransactionStatus::parse(&self.status).ok_or_else(|| {
            anyhow::anyhow!("transaction {} has unknown status '{}'", self.event_id, self.status)
        })?;
        Ok(Transaction {
            transaction_id: self.transaction_id,
            event_id: self.event_id,
            gateway: self.gateway,
            transaction_date: parse_datetime(&self.transaction_date)?,
            account_number: self.account_number,
            content: self.content,
            transfer_amount: self.transfer_amount,
            reference_code: self.reference_code,
            player_name: self.player_name,
            allocations: serde_json::from_str(&self.allocations_json)?,
            remaining_amount: self.remaining_amount,
            status,
            reason: self.reason.as_deref().and_then(RejectReason::parse),
            created_at: from_millis(self.created_at_ms),
        })
    }
}

impl LedgerStore {
    fn query_transactions(
        &self,
        tail: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> LedgerResult<Vec<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM payment_transaction {tail}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, TransactionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TransactionRow::decode).collect()
    }

    pub fn transaction_count(&self) -> LedgerResult<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM payment_transaction", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl TransactionStore for LedgerStore {
    fn find_by_event_id(&self, event_id: &str) -> LedgerResult<Option<Transaction>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM payment_transaction WHERE event_id = ?1"),
                params![event_id],
                TransactionRow::from_row,
            )
            .optional()?;
        row.map(TransactionRow::decode).transpose()
    }

    fn find_by_reference_code(&self, reference_code: &str) -> LedgerResult<Option<Transaction>> {
        Ok(self
            .query_transactions(
                "WHERE reference_code = ?1 ORDER BY created_at_ms DESC LIMIT 1",
                &[&reference_code],
            )?
            .pop())
    }

    fn claim_event(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        lease_secs: i64,
    ) -> LedgerResult<EventClaim> {
        let recorded: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM payment_transaction WHERE event_id = ?1)",
            params![event_id],
            |row| row.get(0),
        )?;
        if recorded {
            return Ok(EventClaim::Taken);
        }

        let now_ms = now.timestamp_millis();
        let inserted = self.conn.execute(
            "INSERT INTO event_claim (event_id, claimed_at_ms) VALUES (?1, ?2)
             ON CONFLICT(event_id) DO NOTHING",
            params![event_id, now_ms],
        )?;
        if inserted == 1 {
            return Ok(EventClaim::Fresh);
        }

        // Take over a claim whose holder never recorded a transaction.
        let stale_before = now_ms - lease_secs.max(0) * 1000;
        let taken_over = self.conn.execute(
            "UPDATE event_claim SET claimed_at_ms = ?1
             WHERE event_id = ?2 AND claimed_at_ms <= ?3
               AND NOT EXISTS (SELECT 1 FROM payment_transaction WHERE event_id = ?2)",
            params![now_ms, event_id, stale_before],
        )?;
        if taken_over == 1 {
            log::warn!("event {event_id}: stale claim taken over, resuming allocation");
            return Ok(EventClaim::Resumed);
        }
        Ok(EventClaim::Taken)
    }

    fn release_claim(&self, event_id: &str, claimed_at: DateTime<Utc>) -> LedgerResult<()> {
        // Only the holder's own lease is expired; a takeover since then is left alone.
        let released = self.conn.execute(
            "UPDATE event_claim SET claimed_at_ms = 0
             WHERE event_id = ?1 AND claimed_at_ms = ?2",
            params![event_id, claimed_at.timestamp_millis()],
        )?;
        if released == 1 {
            log::warn!("event {event_id}: claim released after a failed delivery");
        }
        Ok(())
    }

    fn allocations_for_event(&self, event_id: &str) -> LedgerResult<Vec<Allocation>> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, amount_applied, fully_paid FROM payment_allocation
             WHERE event_id = ?1 ORDER BY seq ASC",
        )?;
        let allocations = stmt
            .query_map(params![event_id], |row| {
                Ok(Allocation {
                    session_id: row.get(0)?,
                    amount_applied: row.get(1)?,
                    fully_paid: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(allocations)
    }

    fn record(&self, transaction: &Transaction) -> LedgerResult<bool> {
        let inserted = self.conn.execute(
            "INSERT INTO payment_transaction (
                transaction_id, event_id, gateway, transaction_date, account_number,
                content, transfer_amount, reference_code, player_name,
                allocations_json, remaining_amount, status, reason, created_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(event_id) DO NOTHING",
            params![
                transaction.transaction_id,
                transaction.event_id,
                transaction.gateway,
                transaction.transaction_date.format(DATETIME_FORMAT).to_string(),
                transaction.account_number,
                transaction.content,
                transaction.transfer_amount,
                transaction.reference_code,
                transaction.player_name,
                serde_json::to_string(&transaction.allocations)?,
                transaction.remaining_amount,
                transaction.status.as_str(),
                transaction.reason.map(|r| r.as_str()),
                transaction.created_at.timestamp_millis(),
            ],
        )?;
        if inserted == 0 {
            log::warn!(
                "event {}: transaction already recorded, new record dropped",
                transaction.event_id
            );
        }
        Ok(inserted == 1)
    }

    fn recent_success_for_player(
        &self,
        player_name: &str,
        since: DateTime<Utc>,
    ) -> LedgerResult<Vec<Transaction>> {
        let wanted = player_name.trim().to_lowercase();
        let found = self.query_transactions(
            "WHERE status = 'success' AND created_at_ms >= ?1 ORDER BY created_at_ms DESC",
            &[&since.timestamp_millis()],
        )?;
        Ok(found
            .into_iter()
            .filter(|t| {
                t.player_name
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase() == wanted)
            })
            .collect())
    }

    fn list_recent(&self, limit: usize) -> LedgerResult<Vec<Transaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_transactions("ORDER BY created_at_ms DESC LIMIT ?1", &[&limit])
    }
}
