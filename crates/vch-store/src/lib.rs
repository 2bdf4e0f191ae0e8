//! SQLite binding table.
//!
//! The table layout is the one existing deployments already have on disk:
//! `channels(voice_id, text_id, set_to_purge)`. Rows are provisioned by hand;
//! this crate only creates the table when it is missing.

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use rusqlite::{params, types::Value, Connection, Row};
use tracing::warn;

use vch_core::{
    domain::{Binding, FlaggedBinding, TextChannelId, VoiceRoomId},
    errors::Error,
    ports::BindingStore,
    Result,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS channels (
    voice_id     TEXT PRIMARY KEY,
    text_id      TEXT NOT NULL,
    set_to_purge INTEGER NOT NULL DEFAULT 0
);
";

const SELECT_ALL: &str = "SELECT voice_id, text_id, set_to_purge FROM channels";

const SELECT_FLAGGED: &str =
    "SELECT voice_id, text_id, set_to_purge FROM channels WHERE set_to_purge = 1";

// Older files keep ids as INTEGER; compare as text so both forms match.
const UPDATE_FLAG: &str =
    "UPDATE channels SET set_to_purge = ?1 WHERE CAST(voice_id AS TEXT) = ?2";

pub struct SqliteBindingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBindingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        // Bindings are edited by hand while the bot runs; wait out their locks.
        conn.busy_timeout(Duration::from_secs(5)).map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` on the blocking pool so a busy database never parks a runtime worker.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Store("connection mutex poisoned".to_string()))?;
            op(&guard)
        })
        .await
        .map_err(|e| Error::Store(format!("store task failed: {e}")))?
    }

    async fn query_bindings(&self, sql: &'static str) -> Result<Vec<Binding>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(sql).map_err(store_err)?;
            let rows = stmt
                .query_map([], read_row)
                .map_err(store_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(store_err)?;
            Ok(rows.into_iter().flatten().collect())
        })
        .await
    }
}

#[async_trait]
impl BindingStore for SqliteBindingStore {
    async fn list_bindings(&self) -> Result<Vec<Binding>> {
        self.query_bindings(SELECT_ALL).await
    }

    async fn list_flagged(&self) -> Result<Vec<FlaggedBinding>> {
        let rows = self.query_bindings(SELECT_FLAGGED).await?;
        Ok(rows.into_iter().map(FlaggedBinding::from).collect())
    }

    async fn set_flag(&self, voice_id: VoiceRoomId, purge: bool) -> Result<()> {
        let changed = self
            .with_conn(move |conn| {
                conn.execute(UPDATE_FLAG, params![purge as i64, voice_id.0.to_string()])
                    .map_err(store_err)
            })
            .await?;
        if changed == 0 {
            warn!(voice = %voice_id, purge, "no binding row matched purge flag update");
        }
        Ok(())
    }
}

/// `None` for rows whose ids are not snowflakes; those are skipped, not fatal.
fn read_row(row: &Row<'_>) -> rusqlite::Result<Option<Binding>> {
    let voice: Value = row.get(0)?;
    let text: Value = row.get(1)?;
    let flag: Option<i64> = row.get(2)?;

    let (Some(voice_id), Some(text_id)) = (snowflake(&voice), snowflake(&text)) else {
        warn!(voice = ?voice, text = ?text, "skipping binding with malformed ids");
        return Ok(None);
    };

    Ok(Some(Binding {
        voice_id: VoiceRoomId(voice_id),
        text_id: TextChannelId(text_id),
        purge_flag: flag.unwrap_or(0) != 0,
    }))
}

fn snowflake(v: &Value) -> Option<u64> {
    match v {
        Value::Integer(i) => u64::try_from(*i).ok(),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}
