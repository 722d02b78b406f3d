//! Session lifecycle: created on sign-in, torn down on sign-out or expiry.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

use crate::backend::types::Session;

const SESSION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    session_id TEXT NOT NULL,
    account_id TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    cookie TEXT
);
"#;

/// SQLite persistence for the session between runs
pub struct SessionStore {
  conn: Mutex<Connection>,
}

impl SessionStore {
  /// Open or create the session database at the default location
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open session database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory session database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SESSION_SCHEMA)
      .map_err(|e| eyre!("Failed to run session migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("snapgram").join("session.db"))
  }

  pub fn load(&self) -> Result<Option<Session>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, String, String, Option<String>)> = conn
      .query_row(
        "SELECT session_id, account_id, expires_at, cookie FROM session WHERE slot = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read session: {}", e))?;

    let Some((id, account_id, expires_at, cookie)) = row else {
      return Ok(None);
    };

    let expires_at = DateTime::parse_from_rfc3339(&expires_at)
      .map_err(|e| eyre!("Failed to parse session expiry '{}': {}", expires_at, e))?
      .with_timezone(&Utc);

    Ok(Some(Session {
      id,
      account_id,
      expires_at,
      cookie,
    }))
  }

  pub fn save(&self, session: &Session) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO session (slot, session_id, account_id, expires_at, cookie)
         VALUES (1, ?, ?, ?, ?)",
        params![
          session.id,
          session.account_id,
          session.expires_at.to_rfc3339(),
          session.cookie
        ],
      )
      .map_err(|e| eyre!("Failed to store session: {}", e))?;

    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM session", [])
      .map_err(|e| eyre!("Failed to clear session: {}", e))?;

    Ok(())
  }
}

/// The current session, shared by everything that talks to the platform.
///
/// Cloning shares the same session. With a store attached, the session
/// survives restarts until it expires.
#[derive(Clone, Default)]
pub struct SessionContext {
  current: Arc<RwLock<Option<Session>>>,
  store: Option<Arc<SessionStore>>,
}

impl SessionContext {
  pub fn new() -> Self {
    Self::default()
  }

  /// Attach persistent storage and restore an unexpired session from it.
  pub fn with_store(store: SessionStore) -> Result<Self> {
    let restored = match store.load()? {
      Some(session) if !session.is_expired() => {
        info!(account = %session.account_id, "restored session");
        Some(session)
      }
      Some(_) => {
        info!("stored session expired");
        store.clear()?;
        None
      }
      None => None,
    };

    Ok(Self {
      current: Arc::new(RwLock::new(restored)),
      store: Some(Arc::new(store)),
    })
  }

  /// Start a session (sign-in).
  pub fn begin(&self, session: Session) {
    if let Some(store) = &self.store {
      if let Err(e) = store.save(&session) {
        warn!(error = %e, "session not persisted");
      }
    }
    info!(account = %session.account_id, expires = %session.expires_at, "session started");
    *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
  }

  /// Tear the session down (sign-out or detected expiry).
  pub fn end(&self) {
    if let Some(store) = &self.store {
      if let Err(e) = store.clear() {
        warn!(error = %e, "stored session not cleared");
      }
    }

    let previous = self
      .current
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(session) = previous {
      info!(account = %session.account_id, "session ended");
    }
  }

  /// The live session. An expired session is torn down and reported as none.
  pub fn current(&self) -> Option<Session> {
    let session = self
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()?;

    if session.is_expired() {
      self.end();
      return None;
    }
    Some(session)
  }

  pub fn is_authenticated(&self) -> bool {
    self.current().is_some()
  }
}
