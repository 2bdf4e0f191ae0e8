use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the bot.
///
/// `emit_log` and `purge_interval` are the two options the channel helper has
/// always recognized; the rest are deployment plumbing and safety limits.
#[derive(Clone, Debug)]
pub struct Config {
    pub discord_token: String,
    pub database_path: PathBuf,

    // Presence reactor
    pub emit_log: bool,

    // Purge scheduler
    pub purge_interval: Duration,
    pub purge_max_rounds: u32,
    pub bulk_delete_max_age: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build and validate a config from any key lookup (the process env in
    /// production, a map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let u64_of = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

        let discord_token = get("DISCORD_TOKEN").unwrap_or_default();
        if discord_token.trim().is_empty() {
            return Err(Error::Config(
                "DISCORD_TOKEN environment variable is required".to_string(),
            ));
        }

        let database_path = get("BINDINGS_DB_PATH")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("db/channels.db"));

        let emit_log = get("EMIT_LOG").is_some_and(|s| parse_bool(&s));

        let purge_interval = Duration::from_millis(u64_of("PURGE_INTERVAL_MS").unwrap_or(600_000));
        if purge_interval.is_zero() {
            return Err(Error::Config("PURGE_INTERVAL_MS must be > 0".to_string()));
        }

        let purge_max_rounds = get("PURGE_MAX_ROUNDS")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(50);
        if purge_max_rounds == 0 {
            return Err(Error::Config("PURGE_MAX_ROUNDS must be > 0".to_string()));
        }

        let max_age_days = u64_of("BULK_DELETE_MAX_AGE_DAYS").unwrap_or(14);
        let bulk_delete_max_age = Duration::from_secs(max_age_days * 24 * 60 * 60);

        Ok(Self {
            discord_token,
            database_path,
            emit_log,
            purge_interval,
            purge_max_rounds,
            bulk_delete_max_age,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
