use super::{from_millis, LedgerStore};
use crate::{
    error::{LedgerError, LedgerResult},
    event::LedgerEvent,
    player::{NewPlayer, Player, ShortCode},
    ports::PlayerDirectory,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const PLAYER_COLUMNS: &str = "player_id, name, short_code, phone, email, is_active,
     is_default_court_payer, is_default_shuttlecock_payer, created_at_ms, updated_at_ms";

impl LedgerStore {
    fn map_player_row(row: &Row<'_>) -> rusqlite::Result<Player> {
        let short_code: Option<String> = row.get(2)?;
        Ok(Player {
            player_id: row.get(0)?,
            name: row.get(1)?,
            short_code: short_code.as_deref().and_then(ShortCode::parse),
            phone: row.get(3)?,
            email: row.get(4)?,
            is_active: row.get(5)?,
            is_default_court_payer: row.get(6)?,
            is_default_shuttlecock_payer: row.get(7)?,
            created_at: from_millis(row.get(8)?),
            updated_at: from_millis(row.get(9)?),
        })
    }

    fn query_players(&self, where_clause: &str, args: &[&dyn rusqlite::ToSql]) -> LedgerResult<Vec<Player>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM player {where_clause}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, Self::map_player_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Register a player and give them the next free short code for `prefix`.
    /// Active names must be unique, ignoring case.
    pub fn register_player(
        &self,
        new: &NewPlayer,
        prefix: char,
        now: DateTime<Utc>,
    ) -> LedgerResult<Player> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(LedgerError::Validation("player name must not be empty".into()));
        }

        let tx = self.conn.unchecked_transaction()?;
        if self.active_name_taken(name, None)? {
            return Err(LedgerError::Validation(format!(
                "an active player named '{name}' already exists"
            )));
        }

        let short_code = Self::next_short_code(&tx, prefix)?;
        let player = Player {
            player_id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            short_code,
            phone: new.phone.clone(),
            email: new.email.clone(),
            is_active: true,
            is_default_court_payer: new.is_default_court_payer,
            is_default_shuttlecock_payer: new.is_default_shuttlecock_payer,
            created_at: now,
            updated_at: now,
        };

        // Only one default payer per role.
        if player.is_default_court_payer {
            tx.execute("UPDATE player SET is_default_court_payer = 0", [])?;
        }
        if player.is_default_shuttlecock_payer {
            tx.execute("UPDATE player SET is_default_shuttlecock_payer = 0", [])?;
        }

        tx.execute(
            "INSERT INTO player (
                player_id, name, short_code, phone, email, is_active,
                is_default_court_payer, is_default_shuttlecock_payer,
                created_at_ms, updated_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?8)",
            params![
                player.player_id,
                player.name,
                player.short_code.as_ref().map(|c| c.to_string()),
                player.phone,
                player.email,
                player.is_default_court_payer,
                player.is_default_shuttlecock_payer,
                now.timestamp_millis(),
            ],
        )?;
        Self::append_event(
            &tx,
            &player.player_id,
            &LedgerEvent::PlayerRegistered {
                player_id: player.player_id.clone(),
                name: player.name.clone(),
                short_code: player.short_code.as_ref().map(|c| c.to_string()),
            },
            now,
        )?;
        tx.commit()?;

        log::info!(
            "player registered: {} ({})",
            player.name,
            player.short_code.as_ref().map(|c| c.to_string()).unwrap_or_default()
        );
        Ok(player)
    }

    fn active_name_taken(&self, name: &str, except_id: Option<&str>) -> LedgerResult<bool> {
        Ok(self
            .find_by_name_case_insensitive(name)?
            .is_some_and(|p| p.is_active && Some(p.player_id.as_str()) != except_id))
    }

    /// Highest assigned number for `prefix` plus one. Codes are never reused,
    /// so deactivated players keep theirs.
    fn next_short_code(conn: &rusqlite::Connection, prefix: char) -> LedgerResult<Option<ShortCode>> {
        let pattern = format!("{}%", prefix.to_ascii_uppercase());
        let mut stmt = conn.prepare("SELECT short_code FROM player WHERE short_code LIKE ?1")?;
        let highest = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .filter_map(|raw| ShortCode::parse(raw))
            .max_by_key(ShortCode::number);
        let next = match highest {
            Some(code) => code.next(),
            None => ShortCode::new(prefix, 1),
        };
        if next.is_none() {
            log::warn!("short codes for prefix {prefix} exhausted; player gets none");
        }
        Ok(next)
    }

    /// Change a player's display name. Session snapshots keep the old name.
    pub fn rename_player(&self, player_id: &str, new_name: &str, now: DateTime<Utc>) -> LedgerResult<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(LedgerError::Validation("player name must not be empty".into()));
        }
        let player = self.find_player(player_id)?.ok_or_else(|| LedgerError::NotFound {
            entity: "player",
            id: player_id.to_string(),
        })?;
        if self.active_name_taken(new_name, Some(player_id))? {
            return Err(LedgerError::Validation(format!(
                "an active player named '{new_name}' already exists"
            )));
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE player SET name = ?1, updated_at_ms = ?2 WHERE player_id = ?3",
            params![new_name, now.timestamp_millis(), player_id],
        )?;
        Self::append_event(
            &tx,
            player_id,
            &LedgerEvent::PlayerRenamed {
                player_id: player_id.to_string(),
                old_name: player.name,
                new_name: new_name.to_string(),
            },
            now,
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Soft-delete: the player stays resolvable by id for history.
    pub fn deactivate_player(&self, player_id: &str, now: DateTime<Utc>) -> LedgerResult<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE player SET is_active = 0, is_default_court_payer = 0,
                    is_default_shuttlecock_payer = 0, updated_at_ms = ?1
             WHERE player_id = ?2 AND is_active = 1",
            params![now.timestamp_millis(), player_id],
        )?;
        if changed > 0 {
            Self::append_event(
                &tx,
                player_id,
                &LedgerEvent::PlayerDeactivated {
                    player_id: player_id.to_string(),
                },
                now,
            )?;
        }
        tx.commit()?;
        Ok(changed > 0)
    }

    pub fn default_court_payer(&self) -> LedgerResult<Option<Player>> {
        Ok(self
            .query_players("WHERE is_active = 1 AND is_default_court_payer = 1 LIMIT 1", &[])?
            .pop())
    }

    pub fn default_shuttlecock_payer(&self) -> LedgerResult<Option<Player>> {
        Ok(self
            .query_players(
                "WHERE is_active = 1 AND is_default_shuttlecock_payer = 1 LIMIT 1",
                &[],
            )?
            .pop())
    }
}

impl PlayerDirectory for LedgerStore {
    fn find_by_short_code(&self, code: &ShortCode) -> LedgerResult<Option<Player>> {
        let player = self
            .conn
            .query_row(
                &format!("SELECT {PLAYER_COLUMNS} FROM player WHERE short_code = ?1"),
                params![code.to_string()],
                Self::map_player_row,
            )
            .optional()?;
        Ok(player)
    }

    /// Active players win over deactivated ones with the same name. SQLite's
    /// lower() only folds ASCII, so the comparison happens here.
    fn find_by_name_case_insensitive(&self, name: &str) -> LedgerResult<Option<Player>> {
        let wanted = name.trim().to_lowercase();
        let mut players = self.query_players("ORDER BY is_active DESC, created_at_ms ASC", &[])?;
        let index = players.iter().position(|p| p.name.to_lowercase() == wanted);
        Ok(index.map(|i| players.swap_remove(i)))
    }

    fn find_player(&self, player_id: &str) -> LedgerResult<Option<Player>> {
        let player = self
            .conn
            .query_row(
                &format!("SELECT {PLAYER_COLUMNS} FROM player WHERE player_id = ?1"),
                params![player_id],
                Self::map_player_row,
            )
            .optional()?;
        Ok(player)
    }

    fn list_active(&self) -> LedgerResult<Vec<Player>> {
        let mut players = self.query_players("WHERE is_active = 1", &[])?;
        players.sort_by_key(|p| p.name.to_lowercase());
        Ok(players)
    }
}
