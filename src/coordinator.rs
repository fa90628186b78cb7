//! The Mutation Coordinator (C5): the transactional wrapper around every
//! create/edit/delete, and the only component that touches both the
//! Ordering Oracle and the Replay Engine.
//!
//! Concurrency follows the same "per-key handle looked up under the map's
//! own lock, then held independently" shape this codebase already uses
//! elsewhere for per-key state: a `parking_lot::RwLock<HashMap<SliceKey,
//! Arc<Mutex<()>>>>` hands out one mutex per `(accountId, securityId)`
//! slice, created lazily. Mutations on disjoint slices proceed fully in
//! parallel; mutations on the same slice serialise on that slice's mutex.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::fx::FxProvider;
use crate::model::{
    Account, AccountId, ComputedView, Event, EventId, EventPatch, EventType, Security, SecurityId,
    SliceKey,
};
use crate::money::{Money, Shares};
use crate::ordering::{canonical_order, check_legality};
use crate::replay::replay_slice;
use crate::store::{AccountCatalog, EventStore, SecurityCatalog};

/// Everything needed to create a new event, before engine-assigned fields
/// (`id`, `seq`) are filled in. Mirrors the request body of
/// `POST /api/transactions`.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub external_id: Option<String>,
    pub date: NaiveDate,
    pub kind: EventType,
    pub account_id: AccountId,
    pub security_id: SecurityId,
    pub quantity: Shares,
    pub price: Money,
    pub fees: Money,
    pub fx_rate: Option<Decimal>,
    pub roc_per_share: Option<Money>,
    pub ratio: Option<Decimal>,
    pub broker: Option<String>,
}

/// Default per-slice wall-clock budget (§5) when a caller doesn't override
/// it via [`MutationCoordinator::with_slice_lock_timeout`].
const DEFAULT_SLICE_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

pub struct MutationCoordinator {
    events: Arc<dyn EventStore>,
    securities: Arc<dyn SecurityCatalog>,
    accounts: Arc<dyn AccountCatalog>,
    fx: Arc<dyn FxProvider>,
    slice_locks: RwLock<HashMap<SliceKey, Arc<Mutex<()>>>>,
    views: RwLock<HashMap<EventId, ComputedView>>,
    slice_lock_timeout: Duration,
}

impl MutationCoordinator {
    /// Builds the coordinator and immediately warms the derived-view cache
    /// from whatever the store already holds (§2: reads are always served
    /// from the last C4 run's outputs). Without this, a process restart
    /// against a populated SQLite store would serve `GET /api/transactions`
    /// and `GET /api/positions` as empty until an unrelated write happened
    /// to touch each slice.
    pub fn new(
        events: Arc<dyn EventStore>,
        securities: Arc<dyn SecurityCatalog>,
        accounts: Arc<dyn AccountCatalog>,
        fx: Arc<dyn FxProvider>,
    ) -> Self {
        let coordinator = Self {
            events,
            securities,
            accounts,
            fx,
            slice_locks: RwLock::new(HashMap::new()),
            views: RwLock::new(HashMap::new()),
            slice_lock_timeout: DEFAULT_SLICE_LOCK_TIMEOUT,
        };
        coordinator.warm_cache();
        coordinator
    }

    /// Overrides the §5 per-slice wall-clock budget (default 30s), per
    /// `ACB_SLICE_LOCK_TIMEOUT_SECS`.
    pub fn with_slice_lock_timeout(mut self, timeout: Duration) -> Self {
        self.slice_lock_timeout = timeout;
        self
    }

    /// Recomputes every slice present in the store at construction time.
    /// Best-effort: a slice that somehow fails replay (e.g. data written by
    /// a version of the engine with looser legality checks) is logged and
    /// skipped rather than aborting startup; its events simply stay absent
    /// from reads until a write touches that slice and succeeds.
    fn warm_cache(&self) {
        let all = match self.events.list_all() {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(%err, "failed to list events while warming computed-view cache");
                return;
            }
        };
        let mut slices: HashSet<SliceKey> = HashSet::new();
        for event in &all {
            slices.insert(event.slice_key());
        }
        let slice_count = slices.len();
        if let Err(err) = self.recompute_slices(slices) {
            tracing::warn!(%err, "failed to warm computed-view cache at startup");
        } else {
            info!(slices = slice_count, events = all.len(), "warmed computed-view cache");
        }
    }

    fn slice_lock(&self, key: SliceKey) -> Arc<Mutex<()>> {
        if let Some(existing) = self.slice_locks.read().get(&key) {
            return existing.clone();
        }
        let mut locks = self.slice_locks.write();
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquires every distinct slice lock in a fixed (sorted) order, so two
    /// concurrent multi-slice mutations can never deadlock against each
    /// other, then recomputes and persists each slice in turn. On any
    /// legality failure the caller is responsible for rolling back the
    /// store write before calling this; this function itself never mutates
    /// the store, only the derived-view cache.
    ///
    /// Each slice's replay is budgeted against `slice_lock_timeout` (§5): if
    /// the wall clock runs past it before a slice's turn comes up, the
    /// remaining slices are abandoned and the whole call fails, so a caller
    /// holding a storage transaction rolls it back rather than committing a
    /// partially-recomputed batch.
    fn recompute_slices(&self, keys: HashSet<SliceKey>) -> Result<(), EngineError> {
        let mut sorted: Vec<SliceKey> = keys.into_iter().collect();
        sorted.sort();
        let handles: Vec<Arc<Mutex<()>>> = sorted.iter().map(|k| self.slice_lock(*k)).collect();
        let _guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();

        let deadline = Instant::now() + self.slice_lock_timeout;
        for key in &sorted {
            if Instant::now() >= deadline {
                return Err(EngineError::Internal(format!(
                    "slice recompute exceeded the {:?} wall-clock budget",
                    self.slice_lock_timeout
                )));
            }
            let raw_events = self.events.list(key.account_id, key.security_id)?;
            let ordered = canonical_order(raw_events);
            check_legality(&ordered)?;
            let views = replay_slice(ordered);
            debug!(
                account_id = %key.account_id,
                security_id = %key.security_id,
                events = views.len(),
                "recomputed slice"
            );
            let mut cache = self.views.write();
            for view in views {
                cache.insert(view.event_id, view);
            }
        }
        Ok(())
    }

    fn security_currency(&self, id: SecurityId) -> Result<crate::model::Currency, EngineError> {
        Ok(self.securities.get(id)?.currency)
    }

    /// Structural validation per §4.5 step 1, shared by create and update:
    /// non-negative quantity/fees, a positive split ratio, a present and
    /// non-negative ROC-per-share. Applies to the event as it would exist
    /// after the write, not just to a freshly-created one.
    fn validate_fields(
        kind: EventType,
        quantity: Shares,
        fees: Money,
        ratio: Option<Decimal>,
        roc_per_share: Option<Money>,
    ) -> Result<(), EngineError> {
        match kind {
            EventType::Split => match ratio {
                None => return Err(EngineError::validation("split requires a ratio")),
                Some(r) if r <= Decimal::ZERO => {
                    return Err(EngineError::validation("split ratio must be positive"))
                }
                Some(_) => {}
            },
            EventType::Roc => match roc_per_share {
                None => return Err(EngineError::validation("roc requires rocPerShare")),
                Some(v) if v.is_negative() => {
                    return Err(EngineError::validation("rocPerShare must be non-negative"))
                }
                Some(_) => {}
            },
            EventType::Buy | EventType::Sell | EventType::Dividend | EventType::Drip => {
                if quantity.is_negative() {
                    return Err(EngineError::validation("quantity must be non-negative"));
                }
            }
        }
        if fees.is_negative() {
            return Err(EngineError::validation("fees must be non-negative"));
        }
        Ok(())
    }

    /// Resolves the CAD-conversion rate for `currency`: `None` for CAD
    /// securities, the caller-supplied rate if positive, or an FX-provider
    /// auto-fill for `date` otherwise (§6.2/§9 open question 5).
    fn resolve_fx_rate(
        &self,
        currency: crate::model::Currency,
        supplied: Option<Decimal>,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, EngineError> {
        if currency.is_cad() {
            return Ok(None);
        }
        match supplied {
            Some(rate) if rate > Decimal::ZERO => Ok(Some(rate)),
            Some(_) => Err(EngineError::validation("fxRate must be positive")),
            None => Ok(Some(
                self.fx
                    .get_rate(currency, date)
                    .map_err(|_| EngineError::DependencyFailure("fx provider unavailable".into()))?,
            )),
        }
    }

    /// Structural validation plus FX auto-fill, per §4.5 step 1. Returns the
    /// fully-formed (but not yet engine-assigned) event.
    fn validate_and_fill(&self, input: NewEvent) -> Result<Event, EngineError> {
        self.accounts.get(input.account_id)?;
        let currency = self.security_currency(input.security_id)?;

        Self::validate_fields(input.kind, input.quantity, input.fees, input.ratio, input.roc_per_share)?;
        let fx_rate = self.resolve_fx_rate(currency, input.fx_rate, input.date)?;

        Ok(Event {
            id: Uuid::new_v4(),
            external_id: input.external_id,
            date: input.date,
            seq: 0,
            kind: input.kind,
            account_id: input.account_id,
            security_id: input.security_id,
            quantity: input.quantity,
            price: input.price,
            fees: input.fees,
            fx_rate,
            roc_per_share: input.roc_per_share,
            ratio: input.ratio,
            broker: input.broker,
        })
    }

    /// `POST /api/transactions`.
    pub fn create(&self, input: NewEvent) -> Result<ComputedView, EngineError> {
        let candidate = self.validate_and_fill(input)?;
        let slice = candidate.slice_key();
        let stored = self.events.insert(candidate)?;

        let mut slices = HashSet::new();
        slices.insert(slice);
        if let Err(err) = self.recompute_slices(slices) {
            let _ = self.events.delete(stored.id);
            return Err(err);
        }

        info!(event_id = %stored.id, "created transaction");
        self.view_for(stored.id)
    }

    /// `PUT /api/transactions/{id}`.
    pub fn update(&self, id: EventId, mut patch: EventPatch) -> Result<ComputedView, EngineError> {
        let before = self.events.get(id)?;
        let after_account = patch.account_id.unwrap_or(before.account_id);
        let after_security = patch.security_id.unwrap_or(before.security_id);
        if after_account != before.account_id || after_security != before.security_id {
            // re-validates the account/currency for the new slice if it moved
            self.accounts.get(after_account)?;
        }
        let currency = self.security_currency(after_security)?;

        let prospective = patch.apply(&before);
        Self::validate_fields(
            prospective.kind,
            prospective.quantity,
            prospective.fees,
            prospective.ratio,
            prospective.roc_per_share,
        )?;
        let fx_rate = self.resolve_fx_rate(currency, prospective.fx_rate, prospective.date)?;
        if fx_rate != prospective.fx_rate {
            patch.fx_rate = Some(fx_rate);
        }

        let updated = self.events.update(id, &patch)?;

        let mut slices = HashSet::new();
        slices.insert(before.slice_key());
        slices.insert(updated.slice_key());
        if let Err(err) = self.recompute_slices(slices) {
            let restore = EventPatch {
                external_id: Some(before.external_id.clone()),
                date: Some(before.date),
                kind: Some(before.kind),
                account_id: Some(before.account_id),
                security_id: Some(before.security_id),
                quantity: Some(before.quantity),
                price: Some(before.price),
                fees: Some(before.fees),
                fx_rate: Some(before.fx_rate),
                roc_per_share: Some(before.roc_per_share),
                ratio: Some(before.ratio),
                broker: Some(before.broker.clone()),
            };
            let _ = self.events.update(id, &restore);
            return Err(err);
        }

        info!(event_id = %id, "updated transaction");
        self.view_for(id)
    }

    /// `DELETE /api/transactions/{id}`.
    pub fn delete(&self, id: EventId) -> Result<(), EngineError> {
        let before = self.events.get(id)?;
        self.events.delete(id)?;

        let mut slices = HashSet::new();
        slices.insert(before.slice_key());
        if let Err(err) = self.recompute_slices(slices) {
            // restore(), not insert(): the latter reassigns `seq`, which
            // would move the restored event to the back of its (date,
            // typeRank) tie-break group instead of back to its original
            // position.
            let _ = self.events.restore(before);
            return Err(err);
        }

        self.views.write().remove(&id);
        info!(event_id = %id, "deleted transaction");
        Ok(())
    }

    pub fn view_for(&self, id: EventId) -> Result<ComputedView, EngineError> {
        self.views
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::Internal(format!("no computed view for event {id}")))
    }

    pub fn list_transactions(
        &self,
        account_id: Option<AccountId>,
        security_id: Option<SecurityId>,
    ) -> Result<Vec<(Event, ComputedView)>, EngineError> {
        let all = self.events.list_all()?;
        let filtered: Vec<Event> = all
            .into_iter()
            .filter(|e| account_id.map_or(true, |a| e.account_id == a))
            .filter(|e| security_id.map_or(true, |s| e.security_id == s))
            .collect();
        let ordered = canonical_order(filtered);
        let cache = self.views.read();
        Ok(ordered
            .into_iter()
            .filter_map(|event| cache.get(&event.id).cloned().map(|view| (event, view)))
            .collect())
    }

    pub fn positions(&self, account_id: Option<AccountId>) -> Result<Vec<crate::model::Position>, EngineError> {
        let all = self.events.list_all()?;
        let mut slices: HashSet<SliceKey> = HashSet::new();
        for event in &all {
            if account_id.map_or(true, |a| event.account_id == a) {
                slices.insert(event.slice_key());
            }
        }

        let cache = self.views.read();
        let mut positions = Vec::new();
        for slice in slices {
            let mut slice_events = self.events.list(slice.account_id, slice.security_id)?;
            slice_events = canonical_order(slice_events);
            if let Some(last) = slice_events.last() {
                if let Some(view) = cache.get(&last.id) {
                    if view.shares_after.is_positive() {
                        positions.push(crate::model::Position {
                            account_id: slice.account_id,
                            security_id: slice.security_id,
                            shares: view.shares_after,
                            acb: view.acb_after,
                            acb_per_share: view.acb_per_share,
                        });
                    }
                }
            }
        }
        Ok(positions)
    }

    pub fn create_security(&self, security: Security) -> Result<Security, EngineError> {
        self.securities.insert(security)
    }

    pub fn delete_security(&self, id: SecurityId) -> Result<(), EngineError> {
        self.securities.delete(id)
    }

    pub fn list_securities(&self) -> Result<Vec<Security>, EngineError> {
        self.securities.list()
    }

    pub fn create_account(&self, account: Account) -> Result<Account, EngineError> {
        self.accounts.insert(account)
    }

    pub fn delete_account(&self, id: AccountId) -> Result<(), EngineError> {
        self.accounts.delete(id)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, EngineError> {
        self.accounts.list()
    }
}
