use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, RETRY_AFTER, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use botsense_admin::state::SharedState;
use botsense_bot_detect::beacon::unix_now;
use botsense_bot_detect::{Action, AssessmentRequest, BotDetector, Event, RecaptchaSignal};
use botsense_common::{AppConfig, BotsenseError, SensitivityTier, ServerConfig};
use botsense_ip_reputation::ReputationChecker;
use botsense_rate_limit::RateLimiter;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::context::RequestContext;

/// Everything the public handlers share.
pub struct BotsenseService {
    pub server: ServerConfig,
    pub detector: Arc<BotDetector>,
    pub rate_limiter: Option<RateLimiter>,
    pub reputation: Arc<ReputationChecker>,
    pub admin: SharedState,
}

impl BotsenseService {
    /// Wire the service from configuration. The engine is taken from the
    /// admin state so both surfaces see the same sessions and policy.
    pub fn new(config: &AppConfig, admin: SharedState) -> anyhow::Result<Self> {
        let rate_limiter = if config.rate_limit.enabled {
            let limiter = RateLimiter::from_config(&config.rate_limit);
            limiter.start_cleanup_task(Duration::from_secs(config.rate_limit.cleanup_interval_secs));
            info!(
                window_secs = config.rate_limit.window_secs,
                max_requests = config.rate_limit.max_requests,
                "rate limiter enabled"
            );
            Some(limiter)
        } else {
            None
        };

        let reputation = Arc::new(ReputationChecker::from_config(&config.ip_reputation)?);

        Ok(Self::with_components(
            config.server.clone(),
            admin,
            rate_limiter,
            reputation,
        ))
    }

    /// Assemble from prebuilt parts.
    pub fn with_components(
        server: ServerConfig,
        admin: SharedState,
        rate_limiter: Option<RateLimiter>,
        reputation: Arc<ReputationChecker>,
    ) -> Self {
        Self {
            server,
            detector: admin.detector.clone(),
            rate_limiter,
            reputation,
            admin,
        }
    }

    /// Count the request, derive its context and apply the rate limit.
    fn admit(&self, headers: &HeaderMap, peer: SocketAddr) -> Result<RequestContext, ApiError> {
        self.admin.metrics.requests_total.inc();
        let ctx = RequestContext::from_request(headers, peer, &self.server);

        if let Some(ref limiter) = self.rate_limiter {
            if let Err(exceeded) = limiter.check_and_record(&ctx.client_ip.to_string(), Instant::now()) {
                info!(client_ip = %ctx.client_ip, "request rate limited");
                self.admin.metrics.rate_limited_total.inc();
                return Err(BotsenseError::from(exceeded).into());
            }
        }

        self.detector.observe(&ctx.session_key, Instant::now());
        Ok(ctx)
    }

    /// Attach the session cookie to a response if one was minted.
    fn finish(&self, ctx: &RequestContext, response: impl IntoResponse) -> Response {
        let mut response = response.into_response();
        if let Some(cookie) = ctx.set_cookie(&self.server.session_cookie) {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().append(SET_COOKIE, value);
                }
                Err(e) => warn!(error = %e, "unencodable session cookie"),
            }
        }
        response
    }
}

pub type AppHandle = Arc<BotsenseService>;

/// Build the public router.
pub fn build_router(service: AppHandle) -> Router {
    Router::new()
        .route("/beacon.js", get(beacon_script))
        .route("/collect", post(collect))
        .route("/beacon", post(beacon))
        .route("/evaluate", post(evaluate))
        .route("/session", delete(end_session))
        .with_state(service)
}

/// Error type of the public handlers.
#[derive(Debug)]
pub enum ApiError {
    Engine(BotsenseError),
    BadRequest(String),
}

impl From<BotsenseError> for ApiError {
    fn from(err: BotsenseError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Engine(BotsenseError::RateLimited { retry_after_secs, .. }) => (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_after_secs.to_string())],
                Json(json!({
                    "error": "rate limit exceeded",
                    "retry_after_secs": retry_after_secs
                })),
            )
                .into_response(),
            ApiError::Engine(BotsenseError::InvalidBeacon) => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "invalid or expired beacon token" })),
            )
                .into_response(),
            ApiError::Engine(err) => {
                error!(error = %err, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CollectRequest {
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
pub struct BeaconRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub tier: SensitivityTier,
    #[serde(default)]
    pub recaptcha_score: Option<f64>,
    #[serde(default)]
    pub recaptcha_failed: bool,
}

impl EvaluateRequest {
    fn recaptcha(&self) -> RecaptchaSignal {
        match (self.recaptcha_failed, self.recaptcha_score) {
            (true, _) => RecaptchaSignal::Failed,
            (false, Some(score)) => RecaptchaSignal::Score(score),
            (false, None) => RecaptchaSignal::Absent,
        }
    }
}

/// GET /beacon.js
async fn beacon_script(
    State(svc): State<AppHandle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = svc.admit(&headers, peer)?;
    let script = svc.detector.beacon_script(&ctx.session_key, unix_now());
    Ok(svc.finish(
        &ctx,
        (
            [
                (CONTENT_TYPE, "application/javascript; charset=utf-8"),
                (CACHE_CONTROL, "no-store"),
            ],
            script,
        ),
    ))
}

/// POST /collect
async fn collect(
    State(svc): State<AppHandle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<CollectRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = svc.admit(&headers, peer)?;
    let Json(body) = payload?;

    let outcome = svc.detector.collect(&ctx.session_key, body.events, Instant::now());
    svc.admin
        .metrics
        .events_collected_total
        .inc_by(outcome.accepted as u64);

    Ok(svc.finish(&ctx, (StatusCode::ACCEPTED, Json(outcome))))
}

/// POST /beacon
async fn beacon(
    State(svc): State<AppHandle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<BeaconRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = svc.admit(&headers, peer)?;
    let Json(body) = payload?;

    svc.detector
        .verify_beacon(&ctx.session_key, &body.token, Instant::now(), unix_now())?;
    svc.admin.metrics.beacons_verified_total.inc();
    debug!(session = %ctx.session_key, "beacon verified");

    Ok(svc.finish(&ctx, StatusCode::NO_CONTENT))
}

/// POST /evaluate
async fn evaluate(
    State(svc): State<AppHandle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<EvaluateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = svc.admit(&headers, peer)?;
    let Json(body) = payload?;
    let started = Instant::now();

    let verdict = svc.reputation.check(ctx.client_ip).await;
    svc.admin
        .metrics
        .reputation_lookups
        .with_label_values(&[verdict.source.as_str()])
        .inc();

    let assessment = svc.detector.assess(
        &ctx.session_key,
        AssessmentRequest {
            tier: body.tier,
            user_agent: ctx.user_agent.as_deref(),
            ip_malicious: verdict.malicious,
            recaptcha: body.recaptcha(),
            session_cookie_present: ctx.new_cookie.is_none(),
        },
        Instant::now(),
    );
    let decision = &assessment.decision;
    svc.admin.record_decision(&ctx.session_key, decision);
    svc.admin
        .metrics
        .evaluation_duration
        .observe(started.elapsed().as_secs_f64());

    if decision.action != Action::Allow {
        info!(
            client_ip = %ctx.client_ip,
            action = decision.action.as_str(),
            score = decision.score,
            "request flagged"
        );
    }

    let response = Json(json!({
        "action": decision.action,
        "score": decision.score,
        "risk": decision.risk.value,
        "threshold": decision.threshold,
        "rules": decision.rules(),
        "features": assessment.features,
        "signals": assessment.signals,
    }));
    Ok(svc.finish(&ctx, response))
}

/// DELETE /session
async fn end_session(
    State(svc): State<AppHandle>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = svc.admit(&headers, peer)?;
    svc.detector.end_session(&ctx.session_key);

    let expired = format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax",
        svc.server.session_cookie
    );
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(value) = HeaderValue::from_str(&expired) {
        response.headers_mut().insert(SET_COOKIE, value);
    }
    Ok(response)
}
