//! Players and their short codes.

use crate::types::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compact payer reference: one letter followed by exactly three digits (`P007`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShortCode {
    prefix: char,
    number: u16,
}

impl ShortCode {
    pub const MAX_NUMBER: u16 = 999;

    pub fn new(prefix: char, number: u16) -> Option<Self> {
        if !prefix.is_ascii_alphabetic() || number == 0 || number > Self::MAX_NUMBER {
            return None;
        }
        Some(Self {
            prefix: prefix.to_ascii_uppercase(),
            number,
        })
    }

    /// Parse `P001` / `p001`. Anything other than letter + three digits is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let mut chars = raw.chars();
        let prefix = chars.next()?;
        let digits: &str = chars.as_str();
        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Self::new(prefix, digits.parse().ok()?)
    }

    pub fn number(&self) -> u16 {
        self.number
    }

    /// The next code in sequence, or `None` once the three digits are exhausted.
    pub fn next(&self) -> Option<Self> {
        Self::new(self.prefix, self.number + 1)
    }
}

impl fmt::Display for ShortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.prefix, self.number)
    }
}

impl TryFrom<String> for ShortCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid short code '{value}'"))
    }
}

impl From<ShortCode> for String {
    fn from(code: ShortCode) -> Self {
        code.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub player_id: EntityId,
    pub name: String,
    pub short_code: Option<ShortCode>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub is_default_court_payer: bool,
    pub is_default_shuttlecock_payer: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for registering a player. The short code is assigned by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewPlayer {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_default_court_payer: bool,
    pub is_default_shuttlecock_payer: bool,
}

impl NewPlayer {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
