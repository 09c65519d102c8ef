use serde::{Deserialize, Serialize};

/// How a session total is divided between participants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Integer division; the remainder goes one unit each to the first
    /// participants in list order. Shares always sum to the total.
    #[default]
    Exact,
    /// Every share is rounded independently (half to even). Shares may
    /// drift from the total by up to `n - 1` units.
    PerShareRounded,
}

/// Rules for reading free-text transfer descriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Case-insensitive substrings marking a transfer as a session payment.
    /// Order matters: name extraction tries them in this order.
    pub keywords: Vec<String>,
    /// Whole-word phrases stripped from the text preceding a keyword.
    pub filler_phrases: Vec<String>,
    /// Letter that starts a player short code (`P` in `P001`).
    pub short_code_prefix: char,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            keywords: ["cau long", "caulong", "badminton", "cl"]
                .into_iter()
                .map(String::from)
                .collect(),
            filler_phrases: [
                "thanh toan",
                "tt",
                "chuyen tien",
                "tra tien",
                "gui tien",
                "nop tien",
                "dong tien",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            short_code_prefix: 'P',
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub matching: MatchingConfig,
    pub split_policy: SplitPolicy,
    /// Number of most recent sessions scanned by queries without a date range.
    pub recent_session_cap: usize,
    /// A claim on an event id older than this, with no transaction recorded,
    /// is treated as abandoned and may be taken over.
    pub claim_lease_secs: i64,
    /// Default look-back window for payment-status polling.
    pub payment_poll_minutes: i64,
    /// Attempts at an optimistic session write before reporting a conflict.
    pub max_version_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            split_policy: SplitPolicy::Exact,
            recent_session_cap: 500,
            claim_lease_secs: 300,
            payment_poll_minutes: 5,
            max_version_retries: 5,
        }
    }
}

impl LedgerConfig {
    /// Load from a JSON rules file. Fields missing from the file keep their defaults.
    /// In tests, use LedgerConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: LedgerConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.matching.keywords.iter().all(|k| k.trim().is_empty()) {
            anyhow::bail!("matching.keywords must contain at least one non-empty keyword");
        }
        if !self.matching.short_code_prefix.is_ascii_alphabetic() {
            anyhow::bail!(
                "matching.short_code_prefix must be an ASCII letter, got '{}'",
                self.matching.short_code_prefix
            );
        }
        if self.recent_session_cap == 0 {
            anyhow::bail!("recent_session_cap must be positive");
        }
        if self.max_version_retries == 0 {
            anyhow::bail!("max_version_retries must be positive");
        }
        Ok(())
    }

    /// Defaults with a small scan window so tests can exercise the cap.
    pub fn default_test() -> Self {
        Self {
            recent_session_cap: 50,
            ..Self::default()
        }
    }
}
