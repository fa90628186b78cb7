//! The HTTP surface (§6.1): a thin `axum` layer over the coordinator.
//!
//! Every handler takes its DTO, converts it into the coordinator's own
//! types, and converts the coordinator's `Result<_, EngineError>` back into
//! a response via `IntoResponse`. No business logic lives here — the
//! dynamic-field-presence document shape of the original interaction lives
//! only in these request/response structs, never in `model`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::{MutationCoordinator, NewEvent};
use crate::errors::EngineError;
use crate::model::{
    Account, AccountId, ComputedView, Currency, Event, EventPatch, EventType, Security, SecurityId,
};
use crate::money::{Money, Shares};

pub type AppState = Arc<MutationCoordinator>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/securities", post(create_security).get(list_securities))
        .route("/api/securities/:id", delete(delete_security))
        .route("/api/accounts", post(create_account).get(list_accounts))
        .route("/api/accounts/:id", delete(delete_account))
        .route("/api/transactions", get(list_transactions).post(create_transaction))
        .route(
            "/api/transactions/:id",
            put(update_transaction).delete(delete_transaction),
        )
        .route("/api/positions", get(list_positions))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// ---------------------------------------------------------------------
// Securities
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateSecurityRequest {
    symbol: String,
    name: String,
    currency: Currency,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize)]
struct SecurityResponse {
    id: SecurityId,
    symbol: String,
    name: String,
    currency: Currency,
    #[serde(rename = "type")]
    kind: String,
}

impl From<Security> for SecurityResponse {
    fn from(s: Security) -> Self {
        Self {
            id: s.id,
            symbol: s.symbol,
            name: s.name,
            currency: s.currency,
            kind: s.kind,
        }
    }
}

async fn create_security(
    State(state): State<AppState>,
    Json(body): Json<CreateSecurityRequest>,
) -> Result<(StatusCode, Json<SecurityResponse>), EngineError> {
    let security = Security {
        id: Uuid::new_v4(),
        symbol: body.symbol,
        name: body.name,
        currency: body.currency,
        kind: body.kind,
    };
    let created = state.create_security(security)?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn list_securities(State(state): State<AppState>) -> Result<Json<Vec<SecurityResponse>>, EngineError> {
    let securities = state.list_securities()?;
    Ok(Json(securities.into_iter().map(SecurityResponse::from).collect()))
}

async fn delete_security(State(state): State<AppState>, Path(id): Path<SecurityId>) -> Result<StatusCode, EngineError> {
    state.delete_security(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateAccountRequest {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    broker: Option<String>,
}

#[derive(Debug, Serialize)]
struct AccountResponse {
    id: AccountId,
    name: String,
    #[serde(rename = "type")]
    kind: String,
    broker: Option<String>,
}

impl From<Account> for AccountResponse {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            name: a.name,
            kind: a.kind,
            broker: a.broker,
        }
    }
}

async fn create_account(
    State(state): State<AppState>,
    Json(body): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), EngineError> {
    let account = Account {
        id: Uuid::new_v4(),
        name: body.name,
        kind: body.kind,
        broker: body.broker,
    };
    let created = state.create_account(account)?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn list_accounts(State(state): State<AppState>) -> Result<Json<Vec<AccountResponse>>, EngineError> {
    let accounts = state.list_accounts()?;
    Ok(Json(accounts.into_iter().map(AccountResponse::from).collect()))
}

async fn delete_account(State(state): State<AppState>, Path(id): Path<AccountId>) -> Result<StatusCode, EngineError> {
    state.delete_account(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------

/// The flat, all-fields-present document shape the wire protocol uses for
/// an event, mirroring §3/§9: every field is present (defaulting where the
/// event type doesn't use it), and `model::Event` is built from it once on
/// the way in.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub external_id: Option<String>,
    pub date: NaiveDate,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub account_id: AccountId,
    pub security_id: SecurityId,
    #[serde(default)]
    pub quantity: Shares,
    #[serde(default)]
    pub price: Money,
    #[serde(default)]
    pub fees: Money,
    pub fx_rate: Option<Decimal>,
    pub roc_per_share: Option<Money>,
    pub ratio: Option<Decimal>,
    pub broker: Option<String>,
}

impl From<TransactionRequest> for NewEvent {
    fn from(r: TransactionRequest) -> Self {
        NewEvent {
            external_id: r.external_id,
            date: r.date,
            kind: r.kind,
            account_id: r.account_id,
            security_id: r.security_id,
            quantity: r.quantity,
            price: r.price,
            fees: r.fees,
            fx_rate: r.fx_rate,
            roc_per_share: r.roc_per_share,
            ratio: r.ratio,
            broker: r.broker,
        }
    }
}

/// `PUT /api/transactions/{id}`: every field optional, `None` means "leave
/// unchanged". Double-`Option` fields distinguish "absent" from
/// "explicitly cleared" for the nullable underlying fields.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPatchRequest {
    #[serde(default)]
    pub external_id: Option<Option<String>>,
    pub date: Option<NaiveDate>,
    #[serde(rename = "type")]
    pub kind: Option<EventType>,
    pub account_id: Option<AccountId>,
    pub security_id: Option<SecurityId>,
    pub quantity: Option<Shares>,
    pub price: Option<Money>,
    pub fees: Option<Money>,
    #[serde(default)]
    pub fx_rate: Option<Option<Decimal>>,
    #[serde(default)]
    pub roc_per_share: Option<Option<Money>>,
    #[serde(default)]
    pub ratio: Option<Option<Decimal>>,
    #[serde(default)]
    pub broker: Option<Option<String>>,
}

impl From<TransactionPatchRequest> for EventPatch {
    fn from(r: TransactionPatchRequest) -> Self {
        EventPatch {
            external_id: r.external_id,
            date: r.date,
            kind: r.kind,
            account_id: r.account_id,
            security_id: r.security_id,
            quantity: r.quantity,
            price: r.price,
            fees: r.fees,
            fx_rate: r.fx_rate,
            roc_per_share: r.roc_per_share,
            ratio: r.ratio,
            broker: r.broker,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    #[serde(flatten)]
    pub event: EventDto,
    #[serde(flatten)]
    pub computed: ComputedView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDto {
    pub id: Uuid,
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
    pub fx_rate: Option<Decimal>,
    pub roc_per_share: Option<Money>,
    pub ratio: Option<Decimal>,
    pub broker: Option<String>,
}

impl From<Event> for EventDto {
    fn from(e: Event) -> Self {
        Self {
            id: e.id,
            external_id: e.external_id,
            date: e.date,
            seq: e.seq,
            kind: e.kind,
            account_id: e.account_id,
            security_id: e.security_id,
            quantity: e.quantity,
            price: e.price,
            fees: e.fees,
            fx_rate: e.fx_rate,
            roc_per_share: e.roc_per_share,
            ratio: e.ratio,
            broker: e.broker,
        }
    }
}

impl TransactionResponse {
    fn from_pair((event, computed): (Event, ComputedView)) -> Self {
        Self {
            event: event.into(),
            computed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransactionListQuery {
    #[serde(rename = "accountId")]
    pub account_id: Option<AccountId>,
    #[serde(rename = "securityId")]
    pub security_id: Option<SecurityId>,
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(q): Query<TransactionListQuery>,
) -> Result<Json<Vec<TransactionResponse>>, EngineError> {
    let pairs = state.list_transactions(q.account_id, q.security_id)?;
    Ok(Json(pairs.into_iter().map(TransactionResponse::from_pair).collect()))
}

async fn create_transaction(
    State(state): State<AppState>,
    Json(body): Json<TransactionRequest>,
) -> Result<(StatusCode, Json<ComputedView>), EngineError> {
    let view = state.create(body.into())?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn update_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TransactionPatchRequest>,
) -> Result<Json<ComputedView>, EngineError> {
    let view = state.update(id, body.into())?;
    Ok(Json(view))
}

async fn delete_transaction(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, EngineError> {
    state.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PositionQuery {
    #[serde(rename = "accountId")]
    pub account_id: Option<AccountId>,
}

async fn list_positions(
    State(state): State<AppState>,
    Query(q): Query<PositionQuery>,
) -> Result<Json<Vec<crate::model::Position>>, EngineError> {
    Ok(Json(state.positions(q.account_id)?))
}
