//! The FX provider collaborator (§6.2): `getRate(currencyPair, date)` with
//! weekend/holiday fallback to the nearest prior business-day rate.
//!
//! A real deployment would implement [`FxProvider`] against a live feed;
//! this module ships a deterministic, table-backed implementation so the
//! service boots and auto-fills a missing `fxRate` on a USD event without an
//! outbound network dependency.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::errors::EngineError;
use crate::model::Currency;

pub trait FxProvider: Send + Sync {
    /// Returns the native-to-CAD rate for `currency` on `date`, falling back
    /// to the nearest earlier date this provider holds a rate for.
    fn get_rate(&self, currency: Currency, date: NaiveDate) -> Result<Decimal, EngineError>;
}

/// CAD never needs conversion; any provider can be asked for it and must
/// return 1 without consulting its table.
pub fn identity_rate(currency: Currency) -> Option<Decimal> {
    if currency.is_cad() {
        Some(Decimal::ONE)
    } else {
        None
    }
}

/// A fixed table of USD→CAD rates seeded at startup, with prior-business-day
/// fallback. Suitable for a single-process deployment and for tests; a
/// production integration would swap this for a live-feed-backed
/// implementation behind the same trait.
pub struct FixedTableFxProvider {
    usd_to_cad: RwLock<BTreeMap<NaiveDate, Decimal>>,
    default_rate: Decimal,
}

impl FixedTableFxProvider {
    pub fn new(default_rate: Decimal) -> Self {
        Self {
            usd_to_cad: RwLock::new(BTreeMap::new()),
            default_rate,
        }
    }

    pub fn seed(&self, date: NaiveDate, rate: Decimal) {
        self.usd_to_cad.write().insert(date, rate);
    }
}

impl Default for FixedTableFxProvider {
    fn default() -> Self {
        Self::new(Decimal::new(135, 2)) // 1.35, a representative USD/CAD rate
    }
}

impl FxProvider for FixedTableFxProvider {
    fn get_rate(&self, currency: Currency, date: NaiveDate) -> Result<Decimal, EngineError> {
        if let Some(rate) = identity_rate(currency) {
            return Ok(rate);
        }
        let table = self.usd_to_cad.read();
        if let Some((_, rate)) = table.range(..=date).next_back() {
            return Ok(*rate);
        }
        Ok(self.default_rate)
    }
}
