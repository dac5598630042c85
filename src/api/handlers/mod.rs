//! API handlers and the state they share.
//!
//! Every login handler loads the `sessions` cookie into a [`CookieSessionStore`],
//! runs one [`LoginFlow`] operation and writes the cookie back when the store
//! changed.

pub mod health;
pub mod login;

use axum::{
    http::{
        header::{ORIGIN, SET_COOKIE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;
use url::Url;
use utoipa::{IntoParams, ToSchema};

use crate::login::{
    CookieOptions, CookieSessionStore, FactorKind, FlowKind, LoginFlow, RequestContext,
};

pub struct LoginState {
    flow: LoginFlow,
    public_url: Url,
    cookie: CookieOptions,
}

impl LoginState {
    /// Cookies are `Secure` when the public URL is https.
    #[must_use]
    pub fn new(flow: LoginFlow, public_url: Url) -> Self {
        let cookie = CookieOptions::new().with_secure(public_url.scheme() == "https");
        Self {
            flow,
            public_url,
            cookie,
        }
    }

    #[must_use]
    pub fn with_cookie_options(mut self, cookie: CookieOptions) -> Self {
        self.cookie = cookie;
        self
    }

    #[must_use]
    pub fn flow(&self) -> &LoginFlow {
        &self.flow
    }

    #[must_use]
    pub fn public_url(&self) -> &Url {
        &self.public_url
    }

    #[must_use]
    pub fn cookie_options(&self) -> &CookieOptions {
        &self.cookie
    }
}

/// Request parameters shared by every login endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct LoginRequest {
    pub login_name: Option<String>,
    pub session_id: Option<String>,
    pub organization: Option<String>,
    /// Prefixed with `oidc_`, `saml_` or `device_`.
    pub request_id: Option<String>,
    pub code: Option<String>,
    pub user_code: Option<String>,
    pub submit: Option<bool>,
    pub factor: Option<FactorKind>,
    pub skip_setup: Option<bool>,
    pub flow: Option<FlowKind>,
}

impl LoginRequest {
    /// Build the flow context; the origin comes from the `Origin` header or the public URL.
    pub(crate) fn context(&self, headers: &HeaderMap, state: &LoginState) -> RequestContext {
        let origin = headers
            .get(ORIGIN)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Url::parse(value).ok())
            .unwrap_or_else(|| state.public_url.clone());

        let mut context = RequestContext::new(Utc::now())
            .with_origin(origin)
            .with_submit(self.submit.unwrap_or(false))
            .with_flow(self.flow.unwrap_or_default())
            .with_skip_mfa_setup(self.skip_setup.unwrap_or(false));
        context.login_name = non_empty(self.login_name.as_deref());
        context.session_id = non_empty(self.session_id.as_deref());
        context.organization = non_empty(self.organization.as_deref());
        context.code = non_empty(self.code.as_deref());
        context.user_code = non_empty(self.user_code.as_deref());
        if let Some(request_id) = self.request_id.as_deref() {
            context = context.with_request_id(request_id);
        }
        if let Some(factor) = self.factor {
            context = context.with_selected_factor(factor);
        }
        context
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// JSON response that rewrites the `sessions` cookie when the store changed.
pub(crate) fn respond<T: Serialize>(
    state: &LoginState,
    store: &CookieSessionStore,
    status: StatusCode,
    body: T,
) -> Response {
    let mut headers = HeaderMap::new();
    if store.is_dirty() {
        match store.set_cookie_header(state.cookie_options()) {
            Ok(cookie) => {
                headers.insert(SET_COOKIE, cookie);
            }
            Err(err) => error!("Failed to build sessions cookie: {err}"),
        }
    }
    (status, headers, Json(body)).into_response()
}
