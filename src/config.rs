use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the `roster` binary, read from `ROSTER_*`
/// environment variables. Unparseable numbers fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub team: String,
    pub session_file: PathBuf,
    /// Fixed seed for generation. Random when unset.
    pub seed: Option<u64>,
    pub flush_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            team: "default".into(),
            session_file: PathBuf::from("./roster.json"),
            seed: None,
            flush_timeout: Duration::from_millis(5000),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            team: lookup("ROSTER_TEAM")
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(defaults.team),
            session_file: lookup("ROSTER_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.session_file),
            seed: lookup("ROSTER_SEED").and_then(|s| s.parse().ok()),
            flush_timeout: lookup("ROSTER_FLUSH_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_timeout),
        }
    }
}
