//! The Event Store (C2): a content-agnostic repository for raw events, plus
//! the small securities/accounts catalog repositories the coordinator
//! validates `accountId`/`securityId` against.
//!
//! Two backends exist for each repository, following the same shape as this
//! codebase's own `VaultDb`: an in-memory one (the default for local runs
//! and the one every unit test above this layer uses) and a `rusqlite`-backed
//! one opened in WAL mode. Both sides of each pair implement the same
//! trait, so the coordinator never knows which is underneath.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::EngineError;
use crate::model::{Account, AccountId, Event, EventId, EventPatch, Security, SecurityId};

/// Repository for raw ledger events. Durable; the source of truth. Computed
/// views are never stored here — they are always rederived by the replay
/// engine from whatever this trait returns.
pub trait EventStore: Send + Sync {
    fn insert(&self, event: Event) -> Result<Event, EngineError>;
    fn update(&self, id: EventId, patch: &EventPatch) -> Result<Event, EngineError>;
    fn delete(&self, id: EventId) -> Result<(), EngineError>;
    fn get(&self, id: EventId) -> Result<Event, EngineError>;
    fn list(&self, account_id: AccountId, security_id: SecurityId) -> Result<Vec<Event>, EngineError>;
    fn list_all(&self) -> Result<Vec<Event>, EngineError>;
    /// Re-inserts an event exactly as it was, keeping its original `seq`
    /// rather than assigning a new one. Used only to undo a `delete` whose
    /// follow-up slice recompute failed: the event must reoccupy its old
    /// `(date, typeRank, seq)` tie-break position, not jump to the back of
    /// the insertion order.
    fn restore(&self, event: Event) -> Result<Event, EngineError>;
}

pub trait SecurityCatalog: Send + Sync {
    fn insert(&self, security: Security) -> Result<Security, EngineError>;
    fn delete(&self, id: SecurityId) -> Result<(), EngineError>;
    fn get(&self, id: SecurityId) -> Result<Security, EngineError>;
    fn list(&self) -> Result<Vec<Security>, EngineError>;
}

pub trait AccountCatalog: Send + Sync {
    fn insert(&self, account: Account) -> Result<Account, EngineError>;
    fn delete(&self, id: AccountId) -> Result<(), EngineError>;
    fn get(&self, id: AccountId) -> Result<Account, EngineError>;
    fn list(&self) -> Result<Vec<Account>, EngineError>;
}

// ---------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------

#[derive(Default)]
struct MemoryEventStoreInner {
    events: HashMap<EventId, Event>,
    external_ids: HashMap<(AccountId, String), EventId>,
    next_seq: u64,
}

/// The default backend for local development and the one exercised by the
/// unit tests above this layer (no external process required to run them).
pub struct MemoryEventStore {
    inner: Mutex<MemoryEventStoreInner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryEventStoreInner::default()),
        }
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryEventStore {
    fn insert(&self, mut event: Event) -> Result<Event, EngineError> {
        let mut inner = self.inner.lock();
        if let Some(external_id) = &event.external_id {
            if !external_id.is_empty() {
                let key = (event.account_id, external_id.clone());
                if inner.external_ids.contains_key(&key) {
                    return Err(EngineError::Duplicate(external_id.clone()));
                }
            }
        }
        event.seq = inner.next_seq;
        inner.next_seq += 1;
        if let Some(external_id) = &event.external_id {
            if !external_id.is_empty() {
                inner
                    .external_ids
                    .insert((event.account_id, external_id.clone()), event.id);
            }
        }
        inner.events.insert(event.id, event.clone());
        Ok(event)
    }

    fn update(&self, id: EventId, patch: &EventPatch) -> Result<Event, EngineError> {
        let mut inner = self.inner.lock();
        let existing = inner
            .events
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("event {id}")))?;
        let updated = patch.apply(&existing);

        if let Some(external_id) = &updated.external_id {
            if !external_id.is_empty() {
                let key = (updated.account_id, external_id.clone());
                if let Some(owner) = inner.external_ids.get(&key) {
                    if *owner != id {
                        return Err(EngineError::Duplicate(external_id.clone()));
                    }
                }
            }
        }

        if let Some(old_external_id) = &existing.external_id {
            inner
                .external_ids
                .remove(&(existing.account_id, old_external_id.clone()));
        }
        if let Some(new_external_id) = &updated.external_id {
            if !new_external_id.is_empty() {
                inner
                    .external_ids
                    .insert((updated.account_id, new_external_id.clone()), id);
            }
        }

        inner.events.insert(id, updated.clone());
        Ok(updated)
    }

    fn delete(&self, id: EventId) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        let existing = inner
            .events
            .remove(&id)
            .ok_or_else(|| EngineError::not_found(format!("event {id}")))?;
        if let Some(external_id) = existing.external_id {
            inner.external_ids.remove(&(existing.account_id, external_id));
        }
        Ok(())
    }

    fn get(&self, id: EventId) -> Result<Event, EngineError> {
        self.inner
            .lock()
            .events
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("event {id}")))
    }

    fn list(&self, account_id: AccountId, security_id: SecurityId) -> Result<Vec<Event>, EngineError> {
        Ok(self
            .inner
            .lock()
            .events
            .values()
            .filter(|e| e.account_id == account_id && e.security_id == security_id)
            .cloned()
            .collect())
    }

    fn list_all(&self) -> Result<Vec<Event>, EngineError> {
        Ok(self.inner.lock().events.values().cloned().collect())
    }

    fn restore(&self, event: Event) -> Result<Event, EngineError> {
        let mut inner = self.inner.lock();
        if event.seq >= inner.next_seq {
            inner.next_seq = event.seq + 1;
        }
        if let Some(external_id) = &event.external_id {
            if !external_id.is_empty() {
                inner
                    .external_ids
                    .insert((event.account_id, external_id.clone()), event.id);
            }
        }
        inner.events.insert(event.id, event.clone());
        Ok(event)
    }
}

macro_rules! memory_catalog {
    ($store:ident, $trait_name:ident, $item:ty, $id_field:ident, $id_ty:ty) => {
        pub struct $store {
            inner: Mutex<HashMap<$id_ty, $item>>,
        }

        impl $store {
            pub fn new() -> Self {
                Self {
                    inner: Mutex::new(HashMap::new()),
                }
            }
        }

        impl Default for $store {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $trait_name for $store {
            fn insert(&self, item: $item) -> Result<$item, EngineError> {
                let mut inner = self.inner.lock();
                inner.insert(item.$id_field, item.clone());
                Ok(item)
            }

            fn delete(&self, id: $id_ty) -> Result<(), EngineError> {
                self.inner
                    .lock()
                    .remove(&id)
                    .map(|_| ())
                    .ok_or_else(|| EngineError::not_found(format!("{}", id)))
            }

            fn get(&self, id: $id_ty) -> Result<$item, EngineError> {
                self.inner
                    .lock()
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| EngineError::not_found(format!("{}", id)))
            }

            fn list(&self) -> Result<Vec<$item>, EngineError> {
                Ok(self.inner.lock().values().cloned().collect())
            }
        }
    };
}

memory_catalog!(MemorySecurityCatalog, SecurityCatalog, Security, id, SecurityId);
memory_catalog!(MemoryAccountCatalog, AccountCatalog, Account, id, AccountId);

// ---------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------

/// Opens (or creates) the SQLite file backing the engine's persistent
/// store, in WAL mode, and ensures the schema exists. Mirrors this
/// codebase's `VaultDb::new`.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    seq: AtomicU64,
}

impl SqliteBackend {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open acb ledger db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS securities (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                name TEXT NOT NULL,
                currency TEXT NOT NULL,
                kind TEXT NOT NULL
            )",
            [],
        )
        .context("create securities table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                broker TEXT
            )",
            [],
        )
        .context("create accounts table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                external_id TEXT,
                date TEXT NOT NULL,
                seq INTEGER NOT NULL,
                kind TEXT NOT NULL,
                account_id TEXT NOT NULL,
                security_id TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                fees TEXT NOT NULL,
                fx_rate TEXT,
                roc_per_share TEXT,
                ratio TEXT,
                broker TEXT
            )",
            [],
        )
        .context("create events table")?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_events_slice ON events(account_id, security_id)",
            [],
        )
        .ok();
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_external_id
                ON events(account_id, external_id) WHERE external_id IS NOT NULL AND external_id != ''",
            [],
        )
        .ok();

        let next_seq: i64 = conn
            .query_row("SELECT COALESCE(MAX(seq), -1) + 1 FROM events", [], |r| r.get(0))
            .unwrap_or(0);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            seq: AtomicU64::new(next_seq.max(0) as u64),
        })
    }
}

/// Adapts [`SqliteBackend`] to the [`EventStore`] trait. A separate
/// lightweight wrapper (rather than implementing the trait on
/// `SqliteBackend` directly) keeps the catalog adapters below symmetrical.
pub struct SqliteEventStore {
    backend: Arc<SqliteBackend>,
}

impl SqliteEventStore {
    pub fn new(backend: Arc<SqliteBackend>) -> Self {
        Self { backend }
    }
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
    use crate::model::EventType;
    use crate::money::{Money, Shares};
    use std::str::FromStr;

    let id: String = row.get("id")?;
    let external_id: Option<String> = row.get("external_id")?;
    let date: String = row.get("date")?;
    let seq: i64 = row.get("seq")?;
    let kind: String = row.get("kind")?;
    let account_id: String = row.get("account_id")?;
    let security_id: String = row.get("security_id")?;
    let quantity: String = row.get("quantity")?;
    let price: String = row.get("price")?;
    let fees: String = row.get("fees")?;
    let fx_rate: Option<String> = row.get("fx_rate")?;
    let roc_per_share: Option<String> = row.get("roc_per_share")?;
    let ratio: Option<String> = row.get("ratio")?;
    let broker: Option<String> = row.get("broker")?;

    let kind = match kind.as_str() {
        "buy" => EventType::Buy,
        "sell" => EventType::Sell,
        "dividend" => EventType::Dividend,
        "drip" => EventType::Drip,
        "roc" => EventType::Roc,
        "split" => EventType::Split,
        other => {
            return Err(rusqlite::Error::InvalidColumnType(
                0,
                format!("unknown event kind {other}"),
                rusqlite::types::Type::Text,
            ))
        }
    };

    Ok(Event {
        id: uuid::Uuid::parse_str(&id).unwrap_or_default(),
        external_id,
        date: chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").unwrap_or_default(),
        seq: seq as u64,
        kind,
        account_id: uuid::Uuid::parse_str(&account_id).unwrap_or_default(),
        security_id: uuid::Uuid::parse_str(&security_id).unwrap_or_default(),
        quantity: Shares::from_str(&quantity).unwrap_or_default(),
        price: Money::from_str(&price).unwrap_or_default(),
        fees: Money::from_str(&fees).unwrap_or_default(),
        fx_rate: fx_rate.and_then(|v| v.parse().ok()),
        roc_per_share: roc_per_share.and_then(|v| Money::from_str(&v).ok()),
        ratio: ratio.and_then(|v| v.parse().ok()),
        broker,
    })
}

impl EventStore for SqliteEventStore {
    fn insert(&self, mut event: Event) -> Result<Event, EngineError> {
        let conn = self.backend.conn.lock();
        if let Some(external_id) = &event.external_id {
            if !external_id.is_empty() {
                let exists: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM events WHERE account_id = ?1 AND external_id = ?2",
                        params![event.account_id.to_string(), external_id],
                        |r| r.get(0),
                    )
                    .optional()
                    .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
                if exists.is_some() {
                    return Err(EngineError::Duplicate(external_id.clone()));
                }
            }
        }
        event.seq = self.backend.seq.fetch_add(1, Ordering::SeqCst);
        conn.execute(
            "INSERT INTO events (id, external_id, date, seq, kind, account_id, security_id,
                quantity, price, fees, fx_rate, roc_per_share, ratio, broker)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                event.id.to_string(),
                event.external_id,
                event.date.format("%Y-%m-%d").to_string(),
                event.seq as i64,
                event.kind.as_str(),
                event.account_id.to_string(),
                event.security_id.to_string(),
                event.quantity.raw().to_string(),
                event.price.raw().to_string(),
                event.fees.raw().to_string(),
                event.fx_rate.map(|v| v.to_string()),
                event.roc_per_share.map(|v| v.raw().to_string()),
                event.ratio.map(|v| v.to_string()),
                event.broker,
            ],
        )
        .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        Ok(event)
    }

    fn update(&self, id: EventId, patch: &EventPatch) -> Result<Event, EngineError> {
        let existing = self.get(id)?;
        let updated = patch.apply(&existing);

        let conn = self.backend.conn.lock();
        if let Some(external_id) = &updated.external_id {
            if !external_id.is_empty() {
                let owner: Option<String> = conn
                    .query_row(
                        "SELECT id FROM events WHERE account_id = ?1 AND external_id = ?2",
                        params![updated.account_id.to_string(), external_id],
                        |r| r.get(0),
                    )
                    .optional()
                    .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
                if let Some(owner_id) = owner {
                    if owner_id != id.to_string() {
                        return Err(EngineError::Duplicate(external_id.clone()));
                    }
                }
            }
        }

        conn.execute(
            "UPDATE events SET external_id=?2, date=?3, kind=?4, account_id=?5, security_id=?6,
                quantity=?7, price=?8, fees=?9, fx_rate=?10, roc_per_share=?11, ratio=?12, broker=?13
             WHERE id=?1",
            params![
                id.to_string(),
                updated.external_id,
                updated.date.format("%Y-%m-%d").to_string(),
                updated.kind.as_str(),
                updated.account_id.to_string(),
                updated.security_id.to_string(),
                updated.quantity.raw().to_string(),
                updated.price.raw().to_string(),
                updated.fees.raw().to_string(),
                updated.fx_rate.map(|v| v.to_string()),
                updated.roc_per_share.map(|v| v.raw().to_string()),
                updated.ratio.map(|v| v.to_string()),
                updated.broker,
            ],
        )
        .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        Ok(updated)
    }

    fn delete(&self, id: EventId) -> Result<(), EngineError> {
        let conn = self.backend.conn.lock();
        let affected = conn
            .execute("DELETE FROM events WHERE id = ?1", params![id.to_string()])
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        if affected == 0 {
            return Err(EngineError::not_found(format!("event {id}")));
        }
        Ok(())
    }

    fn get(&self, id: EventId) -> Result<Event, EngineError> {
        let conn = self.backend.conn.lock();
        conn.query_row("SELECT * FROM events WHERE id = ?1", params![id.to_string()], row_to_event)
            .optional()
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?
            .ok_or_else(|| EngineError::not_found(format!("event {id}")))
    }

    fn list(&self, account_id: AccountId, security_id: SecurityId) -> Result<Vec<Event>, EngineError> {
        let conn = self.backend.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM events WHERE account_id = ?1 AND security_id = ?2")
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        let rows = stmt
            .query_map(params![account_id.to_string(), security_id.to_string()], row_to_event)
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))
    }

    fn list_all(&self) -> Result<Vec<Event>, EngineError> {
        let conn = self.backend.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM events")
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_event)
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))
    }

    fn restore(&self, event: Event) -> Result<Event, EngineError> {
        let conn = self.backend.conn.lock();
        conn.execute(
            "INSERT INTO events (id, external_id, date, seq, kind, account_id, security_id,
                quantity, price, fees, fx_rate, roc_per_share, ratio, broker)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                event.id.to_string(),
                event.external_id,
                event.date.format("%Y-%m-%d").to_string(),
                event.seq as i64,
                event.kind.as_str(),
                event.account_id.to_string(),
                event.security_id.to_string(),
                event.quantity.raw().to_string(),
                event.price.raw().to_string(),
                event.fees.raw().to_string(),
                event.fx_rate.map(|v| v.to_string()),
                event.roc_per_share.map(|v| v.raw().to_string()),
                event.ratio.map(|v| v.to_string()),
                event.broker,
            ],
        )
        .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        self.backend.seq.fetch_max(event.seq + 1, Ordering::SeqCst);
        Ok(event)
    }
}

pub struct SqliteSecurityCatalog {
    backend: Arc<SqliteBackend>,
}

impl SqliteSecurityCatalog {
    pub fn new(backend: Arc<SqliteBackend>) -> Self {
        Self { backend }
    }
}

impl SecurityCatalog for SqliteSecurityCatalog {
    fn insert(&self, security: Security) -> Result<Security, EngineError> {
        let conn = self.backend.conn.lock();
        let currency = match security.currency {
            crate::model::Currency::Cad => "CAD",
            crate::model::Currency::Usd => "USD",
        };
        conn.execute(
            "INSERT INTO securities (id, symbol, name, currency, kind) VALUES (?1,?2,?3,?4,?5)",
            params![
                security.id.to_string(),
                security.symbol,
                security.name,
                currency,
                security.kind
            ],
        )
        .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        Ok(security)
    }

    fn delete(&self, id: SecurityId) -> Result<(), EngineError> {
        let conn = self.backend.conn.lock();
        let affected = conn
            .execute("DELETE FROM securities WHERE id = ?1", params![id.to_string()])
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        if affected == 0 {
            return Err(EngineError::not_found(format!("security {id}")));
        }
        Ok(())
    }

    fn get(&self, id: SecurityId) -> Result<Security, EngineError> {
        let conn = self.backend.conn.lock();
        conn.query_row(
            "SELECT id, symbol, name, currency, kind FROM securities WHERE id = ?1",
            params![id.to_string()],
            row_to_security,
        )
        .optional()
        .map_err(|e| EngineError::DependencyFailure(e.to_string()))?
        .ok_or_else(|| EngineError::not_found(format!("security {id}")))
    }

    fn list(&self) -> Result<Vec<Security>, EngineError> {
        let conn = self.backend.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, symbol, name, currency, kind FROM securities")
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_security)
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))
    }
}

fn row_to_security(row: &rusqlite::Row) -> rusqlite::Result<Security> {
    let id: String = row.get(0)?;
    let symbol: String = row.get(1)?;
    let name: String = row.get(2)?;
    let currency: String = row.get(3)?;
    let kind: String = row.get(4)?;
    Ok(Security {
        id: uuid::Uuid::parse_str(&id).unwrap_or_default(),
        symbol,
        name,
        currency: if currency == "USD" {
            crate::model::Currency::Usd
        } else {
            crate::model::Currency::Cad
        },
        kind,
    })
}

pub struct SqliteAccountCatalog {
    backend: Arc<SqliteBackend>,
}

impl SqliteAccountCatalog {
    pub fn new(backend: Arc<SqliteBackend>) -> Self {
        Self { backend }
    }
}

impl AccountCatalog for SqliteAccountCatalog {
    fn insert(&self, account: Account) -> Result<Account, EngineError> {
        let conn = self.backend.conn.lock();
        conn.execute(
            "INSERT INTO accounts (id, name, kind, broker) VALUES (?1,?2,?3,?4)",
            params![account.id.to_string(), account.name, account.kind, account.broker],
        )
        .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        Ok(account)
    }

    fn delete(&self, id: AccountId) -> Result<(), EngineError> {
        let conn = self.backend.conn.lock();
        let affected = conn
            .execute("DELETE FROM accounts WHERE id = ?1", params![id.to_string()])
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        if affected == 0 {
            return Err(EngineError::not_found(format!("account {id}")));
        }
        Ok(())
    }

    fn get(&self, id: AccountId) -> Result<Account, EngineError> {
        let conn = self.backend.conn.lock();
        conn.query_row(
            "SELECT id, name, kind, broker FROM accounts WHERE id = ?1",
            params![id.to_string()],
            row_to_account,
        )
        .optional()
        .map_err(|e| EngineError::DependencyFailure(e.to_string()))?
        .ok_or_else(|| EngineError::not_found(format!("account {id}")))
    }

    fn list(&self) -> Result<Vec<Account>, EngineError> {
        let conn = self.backend.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id, name, kind, broker FROM accounts")
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_account)
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))
    }
}

fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let kind: String = row.get(2)?;
    let broker: Option<String> = row.get(3)?;
    Ok(Account {
        id: uuid::Uuid::parse_str(&id).unwrap_or_default(),
        name,
        kind,
        broker,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Event, EventType};
    use crate::money::{Money, Shares};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn sample_event(account_id: AccountId, security_id: SecurityId, external_id: Option<&str>) -> Event {
        Event {
            id: Uuid::new_v4(),
            external_id: external_id.map(|s| s.to_string()),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            seq: 0,
            kind: EventType::Buy,
            account_id,
            security_id,
            quantity: Shares::new(Decimal::from(100)),
            price: Money::new(Decimal::from(50)),
            fees: Money::ZERO,
            fx_rate: None,
            roc_per_share: None,
            ratio: None,
            broker: None,
        }
    }

    #[test]
    fn duplicate_external_id_on_same_account_is_rejected() {
        let store = MemoryEventStore::new();
        let account = Uuid::new_v4();
        let security = Uuid::new_v4();
        store.insert(sample_event(account, security, Some("ext-1"))).unwrap();
        let second = store.insert(sample_event(account, security, Some("ext-1")));
        assert!(matches!(second, Err(EngineError::Duplicate(_))));
    }

    #[test]
    fn same_external_id_on_different_accounts_is_allowed() {
        let store = MemoryEventStore::new();
        let security = Uuid::new_v4();
        store
            .insert(sample_event(Uuid::new_v4(), security, Some("ext-1")))
            .unwrap();
        let second = store.insert(sample_event(Uuid::new_v4(), security, Some("ext-1")));
        assert!(second.is_ok());
    }

    #[test]
    fn delete_then_get_returns_not_found() {
        let store = MemoryEventStore::new();
        let event = store
            .insert(sample_event(Uuid::new_v4(), Uuid::new_v4(), None))
            .unwrap();
        store.delete(event.id).unwrap();
        assert!(matches!(store.get(event.id), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn sqlite_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("acb.db");
        let db_path = db_path.to_str().unwrap();

        let account = Uuid::new_v4();
        let security = Uuid::new_v4();
        let event_id = {
            let backend = Arc::new(SqliteBackend::open(db_path).unwrap());
            let events = SqliteEventStore::new(backend);
            events.insert(sample_event(account, security, Some("ext-1"))).unwrap().id
        };

        let backend = Arc::new(SqliteBackend::open(db_path).unwrap());
        let events = SqliteEventStore::new(backend);
        let reloaded = events.get(event_id).unwrap();
        assert_eq!(reloaded.account_id, account);
        assert_eq!(reloaded.external_id.as_deref(), Some("ext-1"));

        let listed = events.list(account, security).unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn sqlite_backend_rejects_duplicate_external_id() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("acb.db");
        let backend = Arc::new(SqliteBackend::open(db_path.to_str().unwrap()).unwrap());
        let events = SqliteEventStore::new(backend);

        let account = Uuid::new_v4();
        let security = Uuid::new_v4();
        events.insert(sample_event(account, security, Some("dup"))).unwrap();
        let second = events.insert(sample_event(account, security, Some("dup")));
        assert!(matches!(second, Err(EngineError::Duplicate(_))));
    }

    #[test]
    fn sqlite_security_and_account_catalogs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SqliteBackend::open(dir.path().join("acb.db").to_str().unwrap()).unwrap());

        let securities = SqliteSecurityCatalog::new(backend.clone());
        let security = securities
            .insert(Security {
                id: Uuid::new_v4(),
                symbol: "XIC".into(),
                name: "iShares Core TSX".into(),
                currency: crate::model::Currency::Cad,
                kind: "etf".into(),
            })
            .unwrap();
        assert_eq!(securities.get(security.id).unwrap().symbol, "XIC");

        let accounts = SqliteAccountCatalog::new(backend);
        let account = accounts
            .insert(Account {
                id: Uuid::new_v4(),
                name: "Non-Registered".into(),
                kind: "non_registered".into(),
                broker: Some("Questrade".into()),
            })
            .unwrap();
        assert_eq!(accounts.list().unwrap().len(), 1);
        accounts.delete(account.id).unwrap();
        assert!(matches!(accounts.get(account.id), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn memory_restore_keeps_the_original_seq() {
        let store = MemoryEventStore::new();
        let account = Uuid::new_v4();
        let security = Uuid::new_v4();

        let first = store.insert(sample_event(account, security, None)).unwrap();
        let second = store.insert(sample_event(account, security, None)).unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);

        store.delete(first.id).unwrap();
        let restored = store.restore(first.clone()).unwrap();
        assert_eq!(restored.seq, first.seq);

        // a fresh insert afterwards must not collide with the restored seq
        let third = store.insert(sample_event(account, security, None)).unwrap();
        assert_eq!(third.seq, 2);
    }

    #[test]
    fn sqlite_restore_keeps_the_original_seq() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SqliteBackend::open(dir.path().join("acb.db").to_str().unwrap()).unwrap());
        let events = SqliteEventStore::new(backend);

        let account = Uuid::new_v4();
        let security = Uuid::new_v4();
        let first = events.insert(sample_event(account, security, None)).unwrap();
        events.insert(sample_event(account, security, None)).unwrap();

        events.delete(first.id).unwrap();
        let restored = events.restore(first.clone()).unwrap();
        assert_eq!(restored.seq, first.seq);
        assert_eq!(events.get(first.id).unwrap().seq, first.seq);
    }
}
