use crate::{
    config::ServerConfig,
    error::{ApiError, ApiResult},
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use court_ledger_core::{
    config::LedgerConfig,
    content::ContentRules,
    error::{LedgerError, LedgerResult},
    ledger::{DebtLedger, LedgerEntry, LedgerTotal, LedgerView, MonthDebt, MonthlySummary, PlayerDebt, PlayerDetails},
    matcher::{self, PaymentMatcher, PaymentStatus, TransferEvent, WebhookResponse},
    player::{NewPlayer, Player},
    ports::{PlayerDirectory, SessionStore, TransactionStore},
    session::Session,
    settlement::{NewSession, ReturnedSummary, SessionService},
    store::LedgerStore,
    transaction::Transaction,
    types::{DateRange, Money},
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::timeout::TimeoutLayer;

pub struct AppState {
    pub ledger: LedgerConfig,
    pub rules: ContentRules,
    pub server: ServerConfig,
    /// Database location each request opens its own connection to.
    pub db_uri: String,
    /// Held open so a shared in-memory database outlives individual requests.
    pub _anchor: Mutex<LedgerStore>,
}

impl AppState {
    fn open_store(&self) -> LedgerResult<LedgerStore> {
        Ok(LedgerStore::open_with_timeout(&self.db_uri, self.server.busy_timeout)?
            .with_version_retries(self.ledger.max_version_retries))
    }
}

/// Run `f` against a fresh connection on the blocking pool.
async fn with_store<T, F>(state: &Arc<AppState>, f: F) -> ApiResult<T>
where
    F: FnOnce(&LedgerStore, &AppState) -> LedgerResult<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        let store = state.open_store()?;
        f(&store, &state)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))?;
    Ok(result?)
}

/// `Authorization: Bearer <key>` (or `Apikey <key>`), else `X-API-Key`.
/// Other authorization schemes are ignored.
fn credential(headers: &HeaderMap) -> Option<String> {
    let from_auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().split_once(' '))
        .filter(|(scheme, _)| {
            scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("apikey")
        })
        .map(|(_, key)| key.trim().to_string())
        .filter(|key| !key.is_empty());
    from_auth.or_else(|| {
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
    })
}

fn require_key(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    match &state.server.api_key {
        Some(expected) if credential(headers).as_deref() != Some(expected.as_str()) => {
            Err(LedgerError::Unauthorized.into())
        }
        _ => Ok(()),
    }
}

// ── Webhook ────────────────────────────────────────────────────

async fn sepay_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let credential = credential(&headers);
    let outcome = with_store(&state, move |store, state| {
        let matcher = PaymentMatcher::over(store, &state.rules, &state.ledger)
            .with_api_key(state.server.api_key.clone());
        // Authenticate before looking at the body.
        matcher.authenticate(credential.as_deref())?;
        let event = TransferEvent::from_json(&body)?;
        matcher.reconcile(credential.as_deref(), &event, Utc::now())
    })
    .await?;
    Ok(Json(outcome.response()))
}

// ── Ledger queries ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RangeQuery {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl RangeQuery {
    fn range(&self) -> ApiResult<Option<DateRange>> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start < end => Ok(Some(DateRange::new(start, end))),
            (None, None) => Ok(None),
            _ => Err(LedgerError::Validation("start and end must both be given, start before end".into()).into()),
        }
    }
}

async fn all_debts(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<LedgerView<LedgerEntry>>> {
    let range = q.range()?;
    let view = with_store(&state, move |store, state| {
        DebtLedger::new(store, state.ledger.recent_session_cap).all_debts(range)
    })
    .await?;
    Ok(Json(view))
}

async fn all_to_receive(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<LedgerView<LedgerEntry>>> {
    let range = q.range()?;
    let view = with_store(&state, move |store, state| {
        DebtLedger::new(store, state.ledger.recent_session_cap).all_to_receive(range)
    })
    .await?;
    Ok(Json(view))
}

async fn player_debt(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(q): Query<RangeQuery>,
) -> ApiResult<Json<PlayerDebt>> {
    let range = q.range()?;
    let lookup = name.clone();
    let debt = with_store(&state, move |store, state| {
        DebtLedger::new(store, state.ledger.recent_session_cap).player_debt(&lookup, range)
    })
    .await?;
    debt.map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no data for player '{name}'")))
}

#[derive(Debug, Deserialize)]
struct NameQuery {
    name: Option<String>,
}

async fn debts_with_details(
    State(state): State<Arc<AppState>>,
    Query(q): Query<NameQuery>,
) -> ApiResult<Json<LedgerView<PlayerDetails>>> {
    let view = with_store(&state, move |store, state| {
        DebtLedger::new(store, state.ledger.recent_session_cap).debts_with_details(q.name.as_deref())
    })
    .await?;
    Ok(Json(view))
}

async fn receivables_with_details(
    State(state): State<Arc<AppState>>,
    Query(q): Query<NameQuery>,
) -> ApiResult<Json<LedgerView<PlayerDetails>>> {
    let view = with_store(&state, move |store, state| {
        DebtLedger::new(store, state.ledger.recent_session_cap)
            .receivables_with_details(q.name.as_deref())
    })
    .await?;
    Ok(Json(view))
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct MonthQuery {
    year: i32,
    month: u32,
}

async fn monthly_summary(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MonthQuery>,
) -> ApiResult<Json<MonthlySummary>> {
    let summary = with_store(&state, move |store, state| {
        DebtLedger::new(store, state.ledger.recent_session_cap).monthly_summary(q.year, q.month)
    })
    .await?;
    summary
        .map(Json)
        .ok_or_else(|| LedgerError::Validation(format!("invalid month {}/{}", q.month, q.year)).into())
}

async fn monthly_debt_details(
    State(state): State<Arc<AppState>>,
    Query(q): Query<MonthQuery>,
) -> ApiResult<Json<Vec<PlayerDetails>>> {
    let details = with_store(&state, move |store, state| {
        DebtLedger::new(store, state.ledger.recent_session_cap).debts_with_details_for_month(q.year, q.month)
    })
    .await?;
    Ok(Json(details))
}

async fn months_with_debts(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<MonthDebt>>> {
    let months = with_store(&state, |store, state| {
        DebtLedger::new(store, state.ledger.recent_session_cap).months_with_debts()
    })
    .await?;
    Ok(Json(months))
}

#[derive(Debug, Serialize)]
struct Totals {
    owed: LedgerTotal,
    to_receive: LedgerTotal,
}

async fn totals(State(state): State<Arc<AppState>>) -> ApiResult<Json<Totals>> {
    let totals = with_store(&state, |store, state| {
        let ledger = DebtLedger::new(store, state.ledger.recent_session_cap);
        Ok(Totals {
            owed: ledger.total_owed()?,
            to_receive: ledger.total_to_receive()?,
        })
    })
    .await?;
    Ok(Json(totals))
}

#[derive(Debug, Deserialize)]
struct MinutesQuery {
    minutes: Option<i64>,
}

async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(q): Query<MinutesQuery>,
) -> ApiResult<Json<PaymentStatus>> {
    let status = with_store(&state, move |store, state| {
        let minutes = q.minutes.unwrap_or(state.ledger.payment_poll_minutes);
        matcher::payment_status(store, &name, minutes, Utc::now())
    })
    .await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn recent_transactions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<Transaction>>> {
    let limit = q.limit.unwrap_or(50).min(500);
    let transactions = with_store(&state, move |store, _| store.list_recent(limit)).await?;
    Ok(Json(transactions))
}

// ── Players ────────────────────────────────────────────────────

async fn list_players(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Player>>> {
    let players = with_store(&state, |store, _| store.list_active()).await?;
    Ok(Json(players))
}

async fn create_player(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new): Json<NewPlayer>,
) -> ApiResult<Json<Player>> {
    require_key(&state, &headers)?;
    let player = with_store(&state, move |store, state| {
        store.register_player(&new, state.ledger.matching.short_code_prefix, Utc::now())
    })
    .await?;
    Ok(Json(player))
}

#[derive(Debug, Deserialize)]
struct PlayerNameBody {
    player_name: String,
}

async fn mark_all_paid(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PlayerNameBody>,
) -> ApiResult<Json<serde_json::Value>> {
    require_key(&state, &headers)?;
    let count = with_store(&state, move |store, state| {
        SessionService::new(store, &state.ledger).mark_all_paid(&body.player_name, Utc::now())
    })
    .await?;
    Ok(Json(serde_json::json!({ "success": true, "sessions_updated": count })))
}

async fn mark_received(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PlayerNameBody>,
) -> ApiResult<Json<ReturnedSummary>> {
    require_key(&state, &headers)?;
    let summary = with_store(&state, move |store, state| {
        SessionService::new(store, &state.ledger).mark_received(&body.player_name, Utc::now())
    })
    .await?;
    Ok(Json(summary))
}

// ── Sessions ───────────────────────────────────────────────────

async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(new): Json<NewSession>,
) -> ApiResult<Json<Session>> {
    require_key(&state, &headers)?;
    let session = with_store(&state, move |store, state| {
        SessionService::new(store, &state.ledger).create_session(&new, Utc::now())
    })
    .await?;
    Ok(Json(session))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let lookup = session_id.clone();
    let session = with_store(&state, move |store, _| store.find_session(&lookup)).await?;
    session
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("session '{session_id}' not found")))
}

async fn edit_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(edit): Json<NewSession>,
) -> ApiResult<Json<Session>> {
    require_key(&state, &headers)?;
    let session = with_store(&state, move |store, state| {
        SessionService::new(store, &state.ledger).edit_session(&session_id, &edit, Utc::now())
    })
    .await?;
    Ok(Json(session))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_key(&state, &headers)?;
    with_store(&state, move |store, state| {
        SessionService::new(store, &state.ledger).delete_session(&session_id, Utc::now())
    })
    .await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct PaymentBody {
    player_name: String,
    amount_paid: Money,
}

async fn update_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(body): Json<PaymentBody>,
) -> ApiResult<Json<Session>> {
    require_key(&state, &headers)?;
    let session = with_store(&state, move |store, state| {
        SessionService::new(store, &state.ledger).set_payment(&session_id, &body.player_name, body.amount_paid)?;
        store.find_session(&session_id)?.ok_or_else(|| LedgerError::NotFound {
            entity: "session",
            id: session_id.clone(),
        })
    })
    .await?;
    Ok(Json(session))
}

async fn mark_paid(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Json(body): Json<PlayerNameBody>,
) -> ApiResult<Json<Session>> {
    require_key(&state, &headers)?;
    let session = with_store(&state, move |store, state| {
        SessionService::new(store, &state.ledger).mark_paid(&session_id, &body.player_name, Utc::now())?;
        store.find_session(&session_id)?.ok_or_else(|| LedgerError::NotFound {
            entity: "session",
            id: session_id.clone(),
        })
    })
    .await?;
    Ok(Json(session))
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let timeout = state.server.request_timeout;
    let api = Router::new()
        .route("/stats/debts", get(all_debts))
        .route("/stats/receivables", get(all_to_receive))
        .route("/stats/player/{name}", get(player_debt))
        .route("/stats/debts/details", get(debts_with_details))
        .route("/stats/receivables/details", get(receivables_with_details))
        .route("/stats/monthly", get(monthly_summary))
        .route("/stats/monthly/details", get(monthly_debt_details))
        .route("/stats/months-with-debts", get(months_with_debts))
        .route("/stats/totals", get(totals))
        .route("/payment-status/{name}", get(payment_status))
        .route("/transactions", get(recent_transactions))
        .route("/players", get(list_players).post(create_player))
        .route("/players/mark-all-paid", post(mark_all_paid))
        .route("/players/mark-received", post(mark_received))
        .route("/sessions", post(create_session))
        .route(
            "/sessions/{id}",
            get(get_session).put(edit_session).delete(delete_session),
        )
        .route("/sessions/{id}/payment", put(update_payment))
        .route("/sessions/{id}/mark-paid", post(mark_paid));

    Router::new()
        .route("/webhook/sepay", post(sepay_webhook))
        .nest("/api", api)
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
}
