//! Core domain types: securities, accounts, events and their computed views.
//!
//! Events are a tagged variant (`EventType`) rather than one struct with
//! dynamically-present fields, so each event carries only the fields its type
//! actually uses; the external JSON shape (which does look like the flatter,
//! all-fields-present document the service receives over HTTP) is produced by
//! the `api` module's request/response DTOs, not by this module.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::{Money, Shares};

pub type SecurityId = Uuid;
pub type AccountId = Uuid;
pub type EventId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Cad,
    Usd,
}

impl Currency {
    pub fn is_cad(self) -> bool {
        matches!(self, Currency::Cad)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub id: SecurityId,
    pub symbol: String,
    pub name: String,
    pub currency: Currency,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub broker: Option<String>,
}

/// The slice an event belongs to: ACB state is scoped per (account, security)
/// and the coordinator serialises mutations at this granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SliceKey {
    pub account_id: AccountId,
    pub security_id: SecurityId,
}

impl SliceKey {
    pub fn new(account_id: AccountId, security_id: SecurityId) -> Self {
        Self {
            account_id,
            security_id,
        }
    }
}

/// Resolves same-date ordering ambiguity; see `ordering::typeRank`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Buy,
    Sell,
    Dividend,
    Drip,
    Roc,
    Split,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Buy => "buy",
            EventType::Sell => "sell",
            EventType::Dividend => "dividend",
            EventType::Drip => "drip",
            EventType::Roc => "roc",
            EventType::Split => "split",
        }
    }
}

/// A single ledger event (transaction). `quantity`/`price`/`fees` are always
/// present on the wire (defaulting to zero) but are only semantically
/// meaningful for the types that use them, per §3 of the engine spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub external_id: Option<String>,
    pub date: NaiveDate,
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub account_id: AccountId,
    pub security_id: SecurityId,
    pub quantity: Shares,
    pub price: Money,
    pub fees: Money,
    pub fx_rate: Option<rust_decimal::Decimal>,
    pub roc_per_share: Option<Money>,
    pub ratio: Option<rust_decimal::Decimal>,
    pub broker: Option<String>,
}

impl Event {
    pub fn slice_key(&self) -> SliceKey {
        SliceKey::new(self.account_id, self.security_id)
    }
}

/// A partial update to an event; `None` fields are left unchanged. Wrapping
/// every field in `Option` (rather than reusing `Event` directly) is what
/// lets `PUT /api/transactions/{id}` patch a single field without the caller
/// re-sending the whole event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    pub external_id: Option<Option<String>>,
    pub date: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub kind: Option<EventType>,
    pub account_id: Option<AccountId>,
    pub security_id: Option<SecurityId>,
    pub quantity: Option<Shares>,
    pub price: Option<Money>,
    pub fees: Option<Money>,
    pub fx_rate: Option<Option<rust_decimal::Decimal>>,
    pub roc_per_share: Option<Option<Money>>,
    pub ratio: Option<Option<rust_decimal::Decimal>>,
    pub broker: Option<Option<String>>,
}

impl EventPatch {
    /// Applies the patch fields onto a clone of `base`, leaving `id`/`seq`
    /// untouched (those are engine-assigned and never editable).
    pub fn apply(&self, base: &Event) -> Event {
        let mut out = base.clone();
        if let Some(v) = &self.external_id {
            out.external_id = v.clone();
        }
        if let Some(v) = self.date {
            out.date = v;
        }
        if let Some(v) = self.kind {
            out.kind = v;
        }
        if let Some(v) = self.account_id {
            out.account_id = v;
        }
        if let Some(v) = self.security_id {
            out.security_id = v;
        }
        if let Some(v) = self.quantity {
            out.quantity = v;
        }
        if let Some(v) = self.price {
            out.price = v;
        }
        if let Some(v) = self.fees {
            out.fees = v;
        }
        if let Some(v) = self.fx_rate {
            out.fx_rate = v;
        }
        if let Some(v) = self.roc_per_share {
            out.roc_per_share = v;
        }
        if let Some(v) = self.ratio {
            out.ratio = v;
        }
        if let Some(v) = &self.broker {
            out.broker = v.clone();
        }
        out
    }
}

/// The output of replaying one event: not persisted as truth, always
/// recomputable from the raw event list for its slice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedView {
    pub event_id: EventId,
    pub shares_after: Shares,
    pub acb_after: Money,
    pub acb_per_share: Money,
    pub proceeds: Option<Money>,
    pub acb_used: Option<Money>,
    pub capital_gain: Option<Money>,
    pub superficial_loss_deferred: Option<Money>,
}

impl ComputedView {
    pub fn acb_per_share(acb: Money, shares: Shares) -> Money {
        if shares.is_zero() {
            Money::ZERO
        } else {
            acb / shares
        }
    }
}

/// A currently-held position, as returned by `GET /api/positions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub account_id: AccountId,
    pub security_id: SecurityId,
    pub shares: Shares,
    pub acb: Money,
    pub acb_per_share: Money,
}
