//! Axum REST API handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, error, info};

use crate::classifier::{self, DeviceInfo};
use crate::config::Config;
use crate::db;
use crate::errors::{AttributionError, Result};
use crate::fingerprint::{non_empty, positive, LaunchFingerprint, NewClick, Platform, Referral};
use crate::landing;
use crate::matcher::Matcher;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub matcher: Arc<Matcher>,
    pub config: Config,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/r/:code", get(landing_page))
        .route("/api/process-click", get(process_click))
        .route("/api/match", post(match_launch))
        .route("/api/device-info", get(device_info))
        .route("/api/referral/apply", post(apply_referral))
        .route("/api/referral/stats/:user_id", get(referral_stats))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProcessClickParams {
    pub code: Option<String>,
    pub sw: Option<String>,
    pub sh: Option<String>,
    pub tz: Option<String>,
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub platform: Option<String>,
    pub ip_address: Option<String>,
    pub os_version: Option<String>,
    pub device_model: Option<String>,
    pub screen_width: Option<f64>,
    pub screen_height: Option<f64>,
    pub language: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyReferralRequest {
    pub referral_code: Option<String>,
    pub referrer_user_id: Option<String>,
    pub referred_user_id: Option<String>,
}

#[derive(Serialize)]
pub struct ApplyReferralResponse {
    pub success: bool,
    pub referrer_bonus: u32,
    pub referred_bonus: u32,
    pub message: &'static str,
}

#[derive(Serialize)]
pub struct ReferralStatsResponse {
    pub total_referrals: usize,
    pub referrals: Vec<Referral>,
    pub referred_by: Option<Referral>,
}

#[derive(Serialize)]
pub struct DeviceInfoResponse {
    pub device_info: ClientInfo,
}

#[derive(Serialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn failure(err: AttributionError) -> Response {
    match err {
        AttributionError::InvalidRequest(msg) => error_response(StatusCode::BAD_REQUEST, msg),
        other => {
            error!("Request failed: {other}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────
// Header helpers
// ─────────────────────────────────────────────────────────

/// Address of the client: the first proxy-reported hop, else the TCP peer.
/// `None` when neither is known; callers never substitute a placeholder.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| header_value("x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

fn peer_addr(connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<SocketAddr> {
    connect_info.map(|ConnectInfo(addr)| addr)
}

fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /r/:code`
///
/// Serves the page that collects browser attributes for the click.
pub async fn landing_page(Path(code): Path<String>) -> Response {
    if !landing::is_valid_code(&code) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid referral code");
    }
    Html(landing::render(&code)).into_response()
}

/// `GET /api/process-click`
///
/// Records iOS clicks for deferred matching and redirects to the store.
/// The visitor is always redirected, even when the click cannot be recorded.
pub async fn process_click(
    State(state): State<Arc<ApiState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(params): Query<ProcessClickParams>,
) -> Response {
    let code = params.code.map(|c| c.trim().to_string()).unwrap_or_default();
    let ua = user_agent(&headers);
    let device = DeviceInfo::parse(&ua);

    // Android installs carry the code through the Play install referrer.
    let is_ios = device.platform == Some(Platform::Ios);
    if is_ios && !landing::is_valid_code(&code) {
        debug!("Not recording click with missing or invalid code {code:?}");
    } else if is_ios {
        let click = NewClick {
            referral_code: code.clone(),
            ip_address: client_ip(&headers, peer_addr(connect_info)),
            user_agent: non_empty(Some(ua)),
            os_version: device.os_version.clone(),
            device_model: device.device_model.clone(),
            screen_width: positive(params.sw.and_then(|v| v.trim().parse().ok())),
            screen_height: positive(params.sh.and_then(|v| v.trim().parse().ok())),
            language: non_empty(params.lang),
            timezone: non_empty(params.tz),
        };

        match db::record_click(
            &state.pool,
            Platform::Ios,
            &click,
            Utc::now().timestamp(),
            state.config.click_ttl_secs(),
        )
        .await
        {
            Ok(record) => info!("Recorded click {} for code {code}", record.id),
            // The visitor still gets to the store; only attribution is lost.
            Err(e) => error!("Failed to record click for code {code}: {e}"),
        }
    }

    let location = classifier::redirect_url(&device, &code, &state.config.links);
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// `POST /api/match`
///
/// Called by the app on its first launch to recover the referral code.
pub async fn match_launch(
    State(state): State<Arc<ApiState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<MatchRequest>,
) -> Response {
    let peer = client_ip(&headers, peer_addr(connect_info));
    let launch = match launch_fingerprint(peer, body) {
        Ok(launch) => launch,
        Err(e) => return failure(e),
    };

    match state.matcher.find_match(&launch).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => failure(e),
    }
}

/// Validate a match request. When the app does not report its address the
/// one the request arrived from is used, if known.
fn launch_fingerprint(
    request_ip: Option<String>,
    body: MatchRequest,
) -> Result<LaunchFingerprint> {
    let raw_platform = non_empty(body.platform).ok_or_else(|| {
        AttributionError::InvalidRequest("Missing required field: platform".to_string())
    })?;
    let platform = Platform::parse(raw_platform.trim()).ok_or_else(|| {
        AttributionError::InvalidRequest(format!("Unsupported platform: {raw_platform}"))
    })?;

    Ok(LaunchFingerprint {
        platform,
        ip_address: non_empty(body.ip_address).or(request_ip),
        os_version: non_empty(body.os_version),
        device_model: non_empty(body.device_model),
        screen_width: positive(body.screen_width),
        screen_height: positive(body.screen_height),
        language: non_empty(body.language),
        timezone: non_empty(body.timezone),
    })
}

/// `GET /api/device-info`
pub async fn device_info(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    Json(DeviceInfoResponse {
        device_info: ClientInfo {
            ip_address: client_ip(&headers, peer_addr(connect_info)),
            user_agent: user_agent(&headers),
        },
    })
}

/// `POST /api/referral/apply`
///
/// Records that `referred_user_id` joined through `referral_code`. The host
/// application credits the returned bonuses itself.
pub async fn apply_referral(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<ApplyReferralRequest>,
) -> Response {
    let (Some(code), Some(referrer), Some(referred)) = (
        non_empty(body.referral_code),
        non_empty(body.referrer_user_id),
        non_empty(body.referred_user_id),
    ) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing required fields: referral_code, referrer_user_id, referred_user_id",
        );
    };

    if referrer == referred {
        return error_response(StatusCode::BAD_REQUEST, "Cannot refer yourself");
    }

    match db::insert_referral(&state.pool, &referrer, &referred, &code, Utc::now().timestamp())
        .await
    {
        Ok(Some(_)) => (
            StatusCode::OK,
            Json(ApplyReferralResponse {
                success: true,
                referrer_bonus: state.config.referrer_bonus,
                referred_bonus: state.config.referred_bonus,
                message: "Referral recorded successfully. Update bonus points in your main database.",
            }),
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::CONFLICT, "Referral already applied"),
        Err(e) => failure(e),
    }
}

/// `GET /api/referral/stats/:user_id`
pub async fn referral_stats(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Response {
    let referrals = match db::get_referrals_by_referrer(&state.pool, &user_id).await {
        Ok(rows) => rows,
        Err(e) => return failure(e),
    };
    let referred_by = match db::get_referred_by(&state.pool, &user_id).await {
        Ok(row) => row,
        Err(e) => return failure(e),
    };

    Json(ReferralStatsResponse {
        total_referrals: referrals.len(),
        referrals,
        referred_by,
    })
    .into_response()
}
