//! Login endpoints.
//!
//! The request carries the same parameters as the hosted login URL
//! (`loginName`, `sessionId`, `requestId`, ...). Query strings are used for
//! `GET`, JSON bodies for `POST`.

use super::{respond, LoginRequest, LoginState};
use crate::login::{
    AccountSummary, CookieSessionStore, DeviceConsentOutcome, ErrorKind, FactorKind,
    FactorSubmission, LoginPage, StepError,
};
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    #[serde(flatten)]
    pub request: LoginRequest,
    /// Factor the credential belongs to.
    pub factor: FactorKind,
    /// Password or one-time code.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    /// WebAuthn assertion as returned by the browser.
    #[serde(default)]
    pub credential: Option<serde_json::Value>,
}

impl VerifyRequest {
    fn submission(&self) -> Option<FactorSubmission> {
        let secret = || {
            self.secret
                .as_deref()
                .filter(|secret| !secret.is_empty())
                .map(|secret| SecretString::from(secret.to_string()))
        };
        match self.factor {
            FactorKind::Password => secret().map(FactorSubmission::Password),
            FactorKind::Totp => secret().map(FactorSubmission::Totp),
            FactorKind::OtpEmail => secret().map(FactorSubmission::OtpEmail),
            FactorKind::OtpSms => secret().map(FactorSubmission::OtpSms),
            FactorKind::Passkey | FactorKind::U2f => {
                self.credential
                    .clone()
                    .map(|credential| FactorSubmission::WebAuthn {
                        factor: self.factor,
                        credential,
                    })
            }
            FactorKind::IdentityProvider => None,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub session_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub removed: bool,
}

#[utoipa::path(
    get,
    path= "/v1/login/next",
    params(LoginRequest),
    responses (
        (status = 200, description = "Step to render next", body = LoginPage),
    ),
    tag= "login"
)]
#[instrument(skip_all)]
pub async fn next(
    headers: HeaderMap,
    state: Extension<Arc<LoginState>>,
    Query(request): Query<LoginRequest>,
) -> impl IntoResponse {
    let store = CookieSessionStore::from_headers(&headers);
    let context = request.context(&headers, &state);
    let page = state.flow().next(&store, &context).await;
    respond(&state, &store, StatusCode::OK, page)
}

#[utoipa::path(
    post,
    path= "/v1/login/verify",
    request_body = VerifyRequest,
    responses (
        (status = 200, description = "Step after checking the credential", body = LoginPage),
        (status = 400, description = "Missing credential for the factor"),
    ),
    tag= "login"
)]
#[instrument(skip_all)]
pub async fn verify(
    headers: HeaderMap,
    state: Extension<Arc<LoginState>>,
    Json(payload): Json<VerifyRequest>,
) -> Response {
    let Some(submission) = payload.submission() else {
        debug!("verify request without credential");
        return (
            StatusCode::BAD_REQUEST,
            "Missing credential for factor".to_string(),
        )
            .into_response();
    };

    let store = CookieSessionStore::from_headers(&headers);
    let context = payload.request.context(&headers, &state);
    let page = state.flow().verify(&store, &context, &submission).await;
    respond(&state, &store, StatusCode::OK, page)
}

#[utoipa::path(
    post,
    path= "/v1/login/skip",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Step after skipping the setup prompt", body = LoginPage),
    ),
    tag= "login"
)]
#[instrument(skip_all)]
pub async fn skip(
    headers: HeaderMap,
    state: Extension<Arc<LoginState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let store = CookieSessionStore::from_headers(&headers);
    let context = request.context(&headers, &state);
    let page = state.flow().skip_setup(&store, &context).await;
    respond(&state, &store, StatusCode::OK, page)
}

#[utoipa::path(
    post,
    path= "/v1/login/device",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Device authorized", body = DeviceConsentOutcome),
        (status = 401, description = "No authenticated session", body = DeviceConsentOutcome),
        (status = 404, description = "Not a device request", body = DeviceConsentOutcome),
        (status = 503, description = "Identity backend unavailable", body = DeviceConsentOutcome),
    ),
    tag= "login"
)]
#[instrument(skip_all)]
pub async fn device(
    headers: HeaderMap,
    state: Extension<Arc<LoginState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    let store = CookieSessionStore::from_headers(&headers);
    let context = request.context(&headers, &state);
    let outcome = state.flow().confirm_device(&store, &context).await;
    let status = outcome
        .error
        .as_ref()
        .map_or(StatusCode::OK, |error| status_for(error.kind));
    respond(&state, &store, status, outcome)
}

#[utoipa::path(
    post,
    path= "/v1/login/logout",
    request_body = LogoutRequest,
    responses (
        (status = 200, description = "Session reference removed when present", body = LogoutResponse),
    ),
    tag= "login"
)]
#[instrument(skip_all)]
pub async fn logout(
    headers: HeaderMap,
    state: Extension<Arc<LoginState>>,
    Json(request): Json<LogoutRequest>,
) -> impl IntoResponse {
    let store = CookieSessionStore::from_headers(&headers);
    let removed = state.flow().logout(&store, &request.session_id).await;
    respond(&state, &store, StatusCode::OK, LogoutResponse { removed })
}

#[utoipa::path(
    get,
    path= "/v1/login/sessions",
    params(LoginRequest),
    responses (
        (status = 200, description = "Sessions stored in this browser", body = [AccountSummary]),
        (status = 503, description = "Identity backend unavailable", body = StepError),
    ),
    tag= "login"
)]
#[instrument(skip_all)]
pub async fn sessions(
    headers: HeaderMap,
    state: Extension<Arc<LoginState>>,
    Query(request): Query<LoginRequest>,
) -> Response {
    let store = CookieSessionStore::from_headers(&headers);
    let context = request.context(&headers, &state);
    match state.flow().accounts(&store, &context).await {
        Ok(accounts) => respond(&state, &store, StatusCode::OK, accounts),
        Err(err) => {
            let error = StepError::from(&err);
            respond(&state, &store, status_for(error.kind), error)
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
        ErrorKind::PolicyUnsatisfiable | ErrorKind::Locked => StatusCode::FORBIDDEN,
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
    }
}
