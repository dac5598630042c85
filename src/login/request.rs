//! Per-request context threaded through the login flow.
//!
//! Flow Overview:
//! - `oidc_` request ids continue an OIDC authorization request.
//! - `saml_` request ids continue a SAML request.
//! - `device_` request ids end on the device consent step.
//! - Ids without a known prefix are legacy OIDC ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;
use utoipa::ToSchema;

use super::types::FactorKind;

pub(crate) const OIDC_PREFIX: &str = "oidc_";
pub(crate) const SAML_PREFIX: &str = "saml_";
pub(crate) const DEVICE_PREFIX: &str = "device_";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Oidc,
    Saml,
    Device,
}

/// In-flight authorization request the login continues.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestId {
    kind: RequestKind,
    raw: String,
}

impl RequestId {
    /// Classify a raw request id by its prefix; empty ids yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let kind = if raw.starts_with(DEVICE_PREFIX) {
            RequestKind::Device
        } else if raw.starts_with(SAML_PREFIX) {
            RequestKind::Saml
        } else {
            RequestKind::Oidc
        };
        Some(Self {
            kind,
            raw: raw.to_string(),
        })
    }

    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    #[must_use]
    pub fn is_device(&self) -> bool {
        self.kind == RequestKind::Device
    }

    /// Backend identifier without the routing prefix.
    #[must_use]
    pub fn id(&self) -> &str {
        let prefix = match self.kind {
            RequestKind::Oidc => OIDC_PREFIX,
            RequestKind::Saml => SAML_PREFIX,
            RequestKind::Device => DEVICE_PREFIX,
        };
        self.raw.strip_prefix(prefix).unwrap_or(&self.raw)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    #[default]
    Login,
    Invitation,
    Registration,
}

impl FlowKind {
    /// Invitation and registration flows verify the contact before finishing.
    #[must_use]
    pub fn requires_contact_verification(self) -> bool {
        matches!(self, Self::Invitation | Self::Registration)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StepHints {
    pub selected_factor: Option<FactorKind>,
    pub skip_mfa_setup: bool,
}

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub login_name: Option<String>,
    pub session_id: Option<String>,
    pub organization: Option<String>,
    pub request_id: Option<RequestId>,
    pub code: Option<String>,
    pub user_code: Option<String>,
    pub submit: bool,
    pub origin: Option<Url>,
    pub flow: FlowKind,
    pub hints: StepHints,
    pub now: DateTime<Utc>,
}

impl RequestContext {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            login_name: None,
            session_id: None,
            organization: None,
            request_id: None,
            code: None,
            user_code: None,
            submit: false,
            origin: None,
            flow: FlowKind::Login,
            hints: StepHints::default(),
            now,
        }
    }

    #[must_use]
    pub fn with_login_name(mut self, login_name: impl Into<String>) -> Self {
        self.login_name = Some(login_name.into());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = RequestId::parse(request_id);
        self
    }

    #[must_use]
    pub fn with_user_code(mut self, user_code: impl Into<String>) -> Self {
        self.user_code = Some(user_code.into());
        self
    }

    #[must_use]
    pub fn with_submit(mut self, submit: bool) -> Self {
        self.submit = submit;
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Url) -> Self {
        self.origin = Some(origin);
        self
    }

    #[must_use]
    pub fn with_flow(mut self, flow: FlowKind) -> Self {
        self.flow = flow;
        self
    }

    #[must_use]
    pub fn with_selected_factor(mut self, factor: FactorKind) -> Self {
        self.hints.selected_factor = Some(factor);
        self
    }

    #[must_use]
    pub fn with_skip_mfa_setup(mut self, skip: bool) -> Self {
        self.hints.skip_mfa_setup = skip;
        self
    }

    #[must_use]
    pub fn is_identifier_submission(&self) -> bool {
        self.submit && self.login_name.as_deref().is_some_and(|name| !name.is_empty())
    }
}
