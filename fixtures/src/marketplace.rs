//! Mock marketplace API for exercising the authenticated client.
//!
//! Serves a handful of canned domain endpoints behind bearer auth, plus the
//! token endpoints. The state lets tests expire the access token out from
//! under a client, force the refresh endpoint to fail, toggle refresh-token
//! rotation, and count how many refresh calls actually hit the wire.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// How long the refresh endpoint stalls before answering. Long enough that
/// concurrent 401 recoveries pile up behind one in-flight refresh.
const REFRESH_DELAY: Duration = Duration::from_millis(100);

const FIXTURE_OTP: &str = "123456";

#[derive(Clone)]
pub struct MarketplaceState {
    inner: Arc<Inner>,
}

struct Inner {
    /// The access token domain endpoints currently accept.
    accepted_access: Mutex<String>,
    /// The access token the refresh endpoint will mint next. Usually equal to
    /// `accepted_access`; tests set them apart to provoke a 401 on the retry.
    minted_access: Mutex<String>,
    /// The refresh token the refresh endpoint currently accepts.
    current_refresh: Mutex<String>,
    /// When set, every refresh call answers with this status instead.
    refresh_failure: Mutex<Option<u16>>,
    rotate_refresh: AtomicBool,
    refresh_calls: AtomicUsize,
}

impl MarketplaceState {
    pub fn new(access: &str, refresh: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                accepted_access: Mutex::new(access.to_string()),
                minted_access: Mutex::new(access.to_string()),
                current_refresh: Mutex::new(refresh.to_string()),
                refresh_failure: Mutex::new(None),
                rotate_refresh: AtomicBool::new(false),
                refresh_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Invalidate the current access token: from now on only `next` is
    /// accepted, and a successful refresh mints `next`.
    pub fn expire_access(&self, next: &str) {
        *self.inner.accepted_access.lock().unwrap() = next.to_string();
        *self.inner.minted_access.lock().unwrap() = next.to_string();
    }

    /// Make the refresh endpoint mint a token that differs from the accepted
    /// one, so a retried request 401s again.
    pub fn set_minted_access(&self, token: &str) {
        *self.inner.minted_access.lock().unwrap() = token.to_string();
    }

    /// Force every refresh call to answer with the given status.
    pub fn set_refresh_failure(&self, status: Option<u16>) {
        *self.inner.refresh_failure.lock().unwrap() = status;
    }

    /// When on, each successful refresh also rotates the refresh token and
    /// includes the new one in the response.
    pub fn set_rotation(&self, rotate: bool) {
        self.inner.rotate_refresh.store(rotate, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> usize {
        self.inner.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn current_refresh(&self) -> String {
        self.inner.current_refresh.lock().unwrap().clone()
    }

    fn accepts(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.inner.accepted_access.lock().unwrap());
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false)
    }
}

pub fn router(state: MarketplaceState) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/lots/:id", get(get_lot))
        .route("/bids/:id", get(get_bid))
        .route("/bids", post(place_bid))
        .route("/payments/:id", get(get_payment))
        .route("/market/prices", get(market_prices))
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginBody {
    phone: String,
    otp: String,
}

async fn login(
    State(state): State<MarketplaceState>,
    Json(body): Json<LoginBody>,
) -> impl IntoResponse {
    if body.otp != FIXTURE_OTP {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "invalid otp" })),
        );
    }

    info!("Marketplace: issuing session for {}", body.phone);
    let access = state.inner.accepted_access.lock().unwrap().clone();
    let refresh = state.current_refresh();
    (
        StatusCode::OK,
        Json(json!({
            "access": access,
            "refresh": refresh,
            "user": {
                "phone": body.phone,
                "name": "Asha Patel",
                "role": "farmer"
            }
        })),
    )
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh: String,
}

async fn refresh(
    State(state): State<MarketplaceState>,
    Json(body): Json<RefreshBody>,
) -> impl IntoResponse {
    state.inner.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(REFRESH_DELAY).await;

    if let Some(status) = *state.inner.refresh_failure.lock().unwrap() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN);
        return (status, Json(json!({ "detail": "refresh rejected" })));
    }

    if body.refresh != state.current_refresh() {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "invalid refresh token" })),
        );
    }

    let access = state.inner.minted_access.lock().unwrap().clone();
    info!("Marketplace: refreshed session, minting {access}");

    if state.inner.rotate_refresh.load(Ordering::SeqCst) {
        let rotated = format!("{}.rot", body.refresh);
        *state.inner.current_refresh.lock().unwrap() = rotated.clone();
        (
            StatusCode::OK,
            Json(json!({ "access": access, "refresh": rotated })),
        )
    } else {
        (StatusCode::OK, Json(json!({ "access": access })))
    }
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "token expired" })),
    )
}

fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "detail": "not found" })),
    )
}

async fn get_lot(
    State(state): State<MarketplaceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !state.accepts(&headers) {
        return unauthorized();
    }

    match id.as_str() {
        "123" => (
            StatusCode::OK,
            Json(json!({
                "id": 123,
                "crop": "wheat",
                "grade": "A",
                "quantity_kg": 1800,
                "asking_price": 2450,
                "status": "open"
            })),
        ),
        _ => not_found(),
    }
}

async fn get_bid(
    State(state): State<MarketplaceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !state.accepts(&headers) {
        return unauthorized();
    }

    match id.as_str() {
        "55" => (
            StatusCode::OK,
            Json(json!({
                "id": 55,
                "lot_id": 123,
                "amount": 2500,
                "bidder": "Verma Traders",
                "status": "leading"
            })),
        ),
        _ => not_found(),
    }
}

#[derive(Deserialize)]
struct PlaceBidBody {
    lot_id: u64,
    amount: u64,
}

async fn place_bid(
    State(state): State<MarketplaceState>,
    headers: HeaderMap,
    Json(body): Json<PlaceBidBody>,
) -> impl IntoResponse {
    if !state.accepts(&headers) {
        return unauthorized();
    }

    (
        StatusCode::CREATED,
        Json(json!({
            "id": 56,
            "lot_id": body.lot_id,
            "amount": body.amount,
            "status": "placed"
        })),
    )
}

async fn get_payment(
    State(state): State<MarketplaceState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !state.accepts(&headers) {
        return unauthorized();
    }

    match id.as_str() {
        "9" => (
            StatusCode::OK,
            Json(json!({
                "id": 9,
                "bid_id": 55,
                "amount": 2500,
                "currency": "INR",
                "status": "settled"
            })),
        ),
        _ => not_found(),
    }
}

async fn market_prices(
    State(state): State<MarketplaceState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !state.accepts(&headers) {
        return unauthorized();
    }

    (
        StatusCode::OK,
        Json(json!({
            "prices": [
                { "crop": "wheat", "modal_price": 2410, "unit": "quintal" },
                { "crop": "soybean", "modal_price": 4620, "unit": "quintal" },
                { "crop": "cotton", "modal_price": 7010, "unit": "quintal" }
            ]
        })),
    )
}
